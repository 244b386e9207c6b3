// src/routing/table.rs
use super::PathPattern;
use crate::config::RouteConfig;

#[derive(Debug, Clone)]
pub struct Route {
    pub priority: u32,
    pub patterns: Vec<PathPattern>,
    pub upstream: String,
}

impl Route {
    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }
}

/// Immutable, priority-ordered route table.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(mut routes: Vec<Route>) -> Self {
        routes.sort_by_key(|r| r.priority);
        Self { routes }
    }

    pub fn from_config(configs: &[RouteConfig]) -> Self {
        let routes = configs
            .iter()
            .map(|c| Route {
                priority: c.priority,
                patterns: c.patterns.iter().map(|p| PathPattern::parse(p)).collect(),
                upstream: c.upstream.clone(),
            })
            .collect();
        Self::new(routes)
    }

    /// First route, in ascending priority, with a pattern matching `path`.
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.matches(path))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}
