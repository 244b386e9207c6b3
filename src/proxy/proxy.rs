// ────────────────────────────────
// src/proxy/proxy.rs
// Resolves a route, picks a healthy instance and forwards the request
// ────────────────────────────────

use crate::config::{Config, FallbackConfig};
use crate::load_balancer::sticky;
use crate::metrics::{MetricsCollector, Timer};
use crate::routing::RouteTable;
use crate::upstream::{Selection, Upstream, UpstreamRegistry};
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE, SET_COOKIE};
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Outcome of route evaluation for one request.
#[derive(Clone)]
pub enum Dispatch {
    /// No route matched; answer with the fallback, never forward.
    Fallback,
    Forward {
        route: u32,
        upstream: Arc<Upstream>,
        selection: Selection,
    },
}

pub struct Proxy {
    routes: RouteTable,
    registry: Arc<UpstreamRegistry>,
    fallback: FallbackConfig,
    client: HttpClient,
    metrics: Arc<MetricsCollector>,
}

impl Proxy {
    pub fn new(
        config: &Config,
        registry: Arc<UpstreamRegistry>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let client = Client::builder().build::<_, Body>(HttpsConnector::new());

        Self {
            routes: RouteTable::from_config(&config.routes),
            registry,
            fallback: config.fallback.clone(),
            client,
            metrics,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Match `path` against the route table and select an instance.
    ///
    /// Runs to completion without yielding, so the health state it reads is
    /// the one the forward goes to.
    pub fn dispatch(&self, path: &str, headers: &HeaderMap) -> Result<Dispatch, ProxyError> {
        let route = match self.routes.resolve(path) {
            Some(route) => route,
            None => return Ok(Dispatch::Fallback),
        };

        let upstream = self
            .registry
            .get(&route.upstream)
            .ok_or_else(|| ProxyError::UnknownUpstream(route.upstream.clone()))?;

        let affinity = if upstream.stickiness.enabled {
            sticky::affinity_cookie(headers, &upstream.stickiness.cookie_name)
        } else {
            None
        };

        let selection = upstream
            .select(affinity)
            .ok_or_else(|| ProxyError::NoHealthyInstances(upstream.id.clone()))?;

        Ok(Dispatch::Forward {
            route: route.priority,
            upstream,
            selection,
        })
    }

    pub async fn handle(&self, mut req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let (route, upstream, selection) = match self.dispatch(req.uri().path(), req.headers()) {
            Ok(Dispatch::Forward {
                route,
                upstream,
                selection,
            }) => (route, upstream, selection),
            Ok(Dispatch::Fallback) => {
                debug!(path = %req.uri().path(), "no route matched");
                self.metrics.record_fallback();
                return Ok(self.fallback_response());
            }
            Err(e) => {
                if let ProxyError::NoHealthyInstances(upstream) = &e {
                    self.metrics.record_no_healthy_instance(upstream);
                }
                return Err(e);
            }
        };

        let instance = selection.instance.clone();
        let target = upstream_uri(&instance.url, req.uri())?;
        *req.uri_mut() = target;
        debug!(
            route,
            upstream = %upstream.id,
            instance = %instance.id,
            pinned = selection.pinned,
            "forwarding"
        );

        let timer = Timer::new();
        let result = self.client.request(req).await;
        let mut response = match result {
            Ok(response) => response,
            Err(e) => {
                self.metrics.record_request(
                    route,
                    &upstream.id,
                    StatusCode::BAD_GATEWAY.as_u16(),
                    timer.elapsed(),
                );
                return Err(ProxyError::Upstream {
                    instance: instance.id.clone(),
                    source: e,
                });
            }
        };

        self.metrics.record_request(
            route,
            &upstream.id,
            response.status().as_u16(),
            timer.elapsed(),
        );

        if upstream.stickiness.enabled && !selection.pinned {
            match sticky::set_cookie(&upstream.stickiness, &instance) {
                Ok(cookie) => {
                    response.headers_mut().append(SET_COOKIE, cookie);
                }
                Err(e) => warn!(instance = %instance.id, %e, "invalid affinity cookie"),
            }
        }

        Ok(response)
    }

    fn fallback_response(&self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.fallback.body.clone()));
        *response.status_mut() =
            StatusCode::from_u16(self.fallback.status).unwrap_or(StatusCode::NOT_FOUND);
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

/// Instance scheme and authority, original path and query.
fn upstream_uri(base: &Url, original: &Uri) -> Result<Uri, ProxyError> {
    let host = base
        .host_str()
        .ok_or_else(|| ProxyError::InvalidTarget(base.to_string()))?;
    let port = base.port_or_known_default().unwrap_or(80);
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    Uri::builder()
        .scheme(base.scheme())
        .authority(format!("{}:{}", host, port).as_str())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::InvalidTarget(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No healthy instances for upstream {0}")]
    NoHealthyInstances(String),

    #[error("Upstream {instance} failed: {source}")]
    Upstream {
        instance: String,
        #[source]
        source: hyper::Error,
    },

    #[error("Invalid upstream target: {0}")]
    InvalidTarget(String),

    #[error("Route targets unregistered upstream {0}")]
    UnknownUpstream(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoHealthyInstances(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Upstream { .. } | ProxyError::InvalidTarget(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UnknownUpstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Convert ProxyError to Hyper Response for error handling
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let status = err.status();
        let message = status.canonical_reason().unwrap_or("Error");

        let mut response = Response::new(Body::from(message));
        *response.status_mut() = status;
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}
