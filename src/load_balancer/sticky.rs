// src/load_balancer/sticky.rs
//! Cookie-based session affinity.
//!
//! The cookie carries the id of the instance that served the first request.
//! Its `Max-Age` bounds how long the pin lasts; once the browser drops it,
//! selection falls back to the upstream's balancer.

use crate::config::StickinessConfig;
use crate::upstream::Instance;
use hyper::header::{HeaderMap, HeaderValue, InvalidHeaderValue, COOKIE};
use std::sync::Arc;

/// Instance named by `cookie`, if it is among the `healthy` ones.
pub fn pinned_instance(cookie: Option<&str>, healthy: &[Arc<Instance>]) -> Option<Arc<Instance>> {
    let id = cookie?;
    healthy.iter().find(|i| i.id == id).cloned()
}

/// Value of cookie `name` from the request's `Cookie` headers.
pub fn affinity_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

pub fn set_cookie(
    config: &StickinessConfig,
    instance: &Instance,
) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly",
        config.cookie_name, instance.id, config.cookie_duration_secs
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn instance(host: &str) -> Arc<Instance> {
        Arc::new(Instance::new(
            "auth",
            Url::parse(&format!("http://{}:8002", host)).unwrap(),
        ))
    }

    #[test]
    fn pins_to_named_healthy_instance() {
        let healthy = vec![instance("10.0.0.1"), instance("10.0.0.2")];
        let pinned = pinned_instance(Some("10.0.0.2:8002"), &healthy).unwrap();
        assert_eq!(pinned.id, "10.0.0.2:8002");
    }

    #[test]
    fn no_cookie_or_unknown_instance_falls_back() {
        let healthy = vec![instance("10.0.0.1")];
        assert!(pinned_instance(None, &healthy).is_none());
        assert!(pinned_instance(Some("10.0.0.9:8002"), &healthy).is_none());
        assert!(pinned_instance(Some("10.0.0.1:8002"), &[]).is_none());
    }

    #[test]
    fn reads_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("session=abc; GWAFFINITY=10.0.0.1:8002"));
        assert_eq!(affinity_cookie(&headers, "GWAFFINITY"), Some("10.0.0.1:8002"));
        assert_eq!(affinity_cookie(&headers, "session"), Some("abc"));
        assert_eq!(affinity_cookie(&headers, "missing"), None);
    }

    #[test]
    fn reads_cookie_from_second_header() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("a=1"));
        headers.append(COOKIE, HeaderValue::from_static("GWAFFINITY=10.0.0.3:8002"));
        assert_eq!(affinity_cookie(&headers, "GWAFFINITY"), Some("10.0.0.3:8002"));
    }

    #[test]
    fn set_cookie_carries_duration() {
        let config = StickinessConfig {
            enabled: true,
            cookie_name: "GWAFFINITY".to_string(),
            cookie_duration_secs: 3600,
        };
        let value = set_cookie(&config, &instance("10.0.0.1")).unwrap();
        assert_eq!(
            value.to_str().unwrap(),
            "GWAFFINITY=10.0.0.1:8002; Max-Age=3600; Path=/; HttpOnly"
        );
    }
}
