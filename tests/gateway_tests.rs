// tests/gateway_tests.rs
use fund_gateway::config::Config;
use fund_gateway::health::{HealthChecker, HealthSnapshot, HealthState, HealthTracker};
use fund_gateway::metrics::MetricsRegistry;
use fund_gateway::proxy::Proxy;
use fund_gateway::server::{RequestHandler, ServerBuilder};
use fund_gateway::upstream::UpstreamRegistry;
use mockito::Matcher;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const FALLBACK: &str = "Not Found - Use /health, /auth/, /funds/, or /notifications/";

struct Gateway {
    addr: SocketAddr,
    registry: Arc<UpstreamRegistry>,
    checker: Arc<HealthChecker>,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

impl Gateway {
    async fn start(config: Config) -> Self {
        config.validate().unwrap();
        let metrics = MetricsRegistry::new().unwrap().collector();
        let registry = Arc::new(UpstreamRegistry::from_config(&config.upstreams).unwrap());
        let checker =
            Arc::new(HealthChecker::new(registry.clone(), Some(metrics.clone())).unwrap());
        let proxy = Arc::new(Proxy::new(&config, registry.clone(), metrics));

        let server = ServerBuilder::new("127.0.0.1:0".parse().unwrap())
            .with_handler(RequestHandler::new(proxy))
            .bind()
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            server
                .serve_with_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            registry,
            checker,
            shutdown: Some(tx),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Drive the instances of `upstream` through two probe rounds.
    async fn probe_twice(&self, upstream: &str) {
        let upstream = self.registry.get(upstream).unwrap();
        for instance in upstream.instances() {
            let mut tracker = HealthTracker::default();
            self.checker.check_instance(&upstream, instance, &mut tracker).await;
            self.checker.check_instance(&upstream, instance, &mut tracker).await;
        }
    }

    fn force_state(&self, upstream: &str, state: HealthState) {
        let upstream = self.registry.get(upstream).unwrap();
        for instance in upstream.instances() {
            let mut snapshot = HealthSnapshot::initial();
            snapshot.state = state;
            instance.publish_health(snapshot);
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.checker.shutdown();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Built-in table with every upstream pointed at `upstream_url`.
fn config_for(upstream_url: &str, sticky: bool) -> Config {
    let yaml = format!(
        r#"
upstreams:
  - id: auth
    port: 8002
    instances: ["{url}"]
    health_check: {{ interval_secs: 2, timeout_secs: 1 }}
    stickiness: {{ enabled: {sticky}, cookie_duration_secs: 120 }}
  - id: funds
    port: 8003
    instances: ["{url}"]
    health_check: {{ interval_secs: 2, timeout_secs: 1 }}
  - id: notifications
    port: 8001
    instances: ["{url}"]
    health_check: {{ interval_secs: 2, timeout_secs: 1 }}
routes:
  - {{ priority: 50, patterns: ["/health"], upstream: auth }}
  - {{ priority: 85, patterns: ["/docs", "/redoc", "/openapi.json", "/auth/docs"], upstream: auth }}
  - {{ priority: 90, patterns: ["/auth/health", "/auth/docs", "/auth/openapi.json"], upstream: auth }}
  - {{ priority: 100, patterns: ["/auth", "/auth/*"], upstream: auth }}
  - {{ priority: 200, patterns: ["/funds/*"], upstream: funds }}
  - {{ priority: 300, patterns: ["/notifications/*"], upstream: notifications }}
"#,
        url = upstream_url,
        sticky = sticky,
    );
    serde_yaml::from_str(&yaml).unwrap()
}

#[tokio::test]
async fn forwards_path_and_query_verbatim() {
    let mut upstream = mockito::Server::new_async().await;
    upstream.mock("GET", "/health").with_status(200).create_async().await;
    let funds = upstream
        .mock("POST", "/funds/42/subscribe")
        .match_query(Matcher::UrlEncoded("amount".into(), "500000".into()))
        .match_body("{}")
        .with_status(201)
        .with_body("subscribed")
        .create_async()
        .await;

    let gateway = Gateway::start(config_for(&upstream.url(), false)).await;
    gateway.probe_twice("funds").await;

    let response = reqwest::Client::new()
        .post(gateway.url("/funds/42/subscribe?amount=500000"))
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 201);
    assert_eq!(response.text().await.unwrap(), "subscribed");
    funds.assert_async().await;
}

#[tokio::test]
async fn unknown_path_is_never_forwarded() {
    let mut upstream = mockito::Server::new_async().await;
    upstream.mock("GET", "/health").with_status(200).create_async().await;
    let anything = upstream
        .mock("GET", Matcher::Regex("^/unknown".to_string()))
        .expect(0)
        .create_async()
        .await;

    let gateway = Gateway::start(config_for(&upstream.url(), false)).await;
    gateway.probe_twice("auth").await;

    let response = reqwest::get(gateway.url("/unknown/path")).await.unwrap();
    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(response.text().await.unwrap(), FALLBACK);
    anything.assert_async().await;
}

#[tokio::test]
async fn failing_health_checks_make_upstream_unavailable() {
    let mut upstream = mockito::Server::new_async().await;
    upstream.mock("GET", "/health").with_status(500).create_async().await;
    let notifications = upstream
        .mock("GET", "/notifications/user/1")
        .expect(0)
        .create_async()
        .await;

    let gateway = Gateway::start(config_for(&upstream.url(), false)).await;
    gateway.probe_twice("notifications").await;

    let response = reqwest::get(gateway.url("/notifications/user/1")).await.unwrap();
    assert_eq!(response.status().as_u16(), 503);
    notifications.assert_async().await;
}

#[tokio::test]
async fn instance_recovers_after_two_passing_probes() {
    let mut upstream = mockito::Server::new_async().await;
    let ok = upstream.mock("GET", "/health").with_status(200).create_async().await;
    upstream
        .mock("GET", "/auth/login")
        .with_status(200)
        .with_body("token")
        .create_async()
        .await;

    let gateway = Gateway::start(config_for(&upstream.url(), false)).await;
    let auth = gateway.registry.get("auth").unwrap();
    let instance = auth.instances()[0].clone();
    let mut tracker = HealthTracker::default();

    for _ in 0..2 {
        gateway.checker.check_instance(&auth, &instance, &mut tracker).await;
    }
    assert_eq!(instance.state(), HealthState::Healthy);

    ok.remove_async().await;
    let down = upstream.mock("GET", "/health").with_status(503).create_async().await;
    for _ in 0..2 {
        gateway.checker.check_instance(&auth, &instance, &mut tracker).await;
    }
    assert_eq!(instance.state(), HealthState::Unhealthy);
    let response = reqwest::get(gateway.url("/auth/login")).await.unwrap();
    assert_eq!(response.status().as_u16(), 503);

    down.remove_async().await;
    upstream.mock("GET", "/health").with_status(200).create_async().await;
    gateway.checker.check_instance(&auth, &instance, &mut tracker).await;
    assert_eq!(instance.state(), HealthState::Unhealthy);
    gateway.checker.check_instance(&auth, &instance, &mut tracker).await;
    assert_eq!(instance.state(), HealthState::Healthy);

    let response = reqwest::get(gateway.url("/auth/login")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "token");
}

#[tokio::test]
async fn probe_loops_mark_instances_healthy() {
    let mut upstream = mockito::Server::new_async().await;
    upstream.mock("GET", "/health").with_status(200).create_async().await;

    let gateway = Gateway::start(config_for(&upstream.url(), false)).await;
    let tasks = gateway.checker.clone().start();

    // First probe fires immediately, the second one interval (2s) later.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(8);
    loop {
        let all_healthy = gateway
            .registry
            .all()
            .iter()
            .all(|u| u.healthy_instances().len() == 1);
        if all_healthy {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "instances never became healthy");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    gateway.checker.shutdown();
    for task in tasks {
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn transport_error_maps_to_bad_gateway() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();

    let gateway = Gateway::start(config_for(&format!("http://{}", closed), false)).await;
    gateway.force_state("funds", HealthState::Healthy);

    let response = reqwest::get(gateway.url("/funds/1")).await.unwrap();
    assert_eq!(response.status().as_u16(), 502);
}

#[tokio::test]
async fn sticky_upstream_sets_affinity_cookie() {
    let mut upstream = mockito::Server::new_async().await;
    upstream.mock("GET", "/health").with_status(200).create_async().await;
    upstream.mock("GET", "/auth/me").with_status(200).expect(2).create_async().await;

    let gateway = Gateway::start(config_for(&upstream.url(), true)).await;
    gateway.probe_twice("auth").await;
    let instance_id = gateway.registry.get("auth").unwrap().instances()[0].id.clone();

    let first = reqwest::get(gateway.url("/auth/me")).await.unwrap();
    let cookie = first
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(
        cookie,
        format!("GWAFFINITY={}; Max-Age=120; Path=/; HttpOnly", instance_id)
    );

    // A pinned request does not get a fresh cookie.
    let second = reqwest::Client::new()
        .get(gateway.url("/auth/me"))
        .header("cookie", format!("GWAFFINITY={}", instance_id))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status().as_u16(), 200);
    assert!(second.headers().get("set-cookie").is_none());
}
