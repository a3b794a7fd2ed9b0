//! Integration tests for bgproxy.
//!
//! Two fake application instances ("blue" and "green") run behind the proxy.
//! Like the real apps they expose `/version`, `/healthz` and the chaos
//! endpoints, and every response carries `X-App-Pool` and `X-Release-Id`.

use bgproxy::alert::{spawn_watcher, AlertDispatcher, AlertError, AlertHandle, AlertSink, FailoverWatcher};
use bgproxy::backend::{FailoverRouter, Pool};
use bgproxy::config::{load_config, parse_config, Config, Role};
use bgproxy::frontend::FrontendListener;
use bgproxy::health::BackendHealth;
use bgproxy::metrics::{MetricsCollector, MetricsServer};
use bgproxy::proxy::HttpUpstream;
use bgproxy::util::ShutdownSignal;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

const CHAOS_OFF: u8 = 0;
const CHAOS_ERROR: u8 = 1;
const CHAOS_TIMEOUT: u8 = 2;

/// A fake application instance.
struct FakeApp {
    pool: &'static str,
    release: &'static str,
    chaos: AtomicU8,
    hits: AtomicU32,
}

impl FakeApp {
    fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn start_app(pool: &'static str, release: &'static str) -> (SocketAddr, Arc<FakeApp>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Arc::new(FakeApp {
        pool,
        release,
        chaos: AtomicU8::new(CHAOS_OFF),
        hits: AtomicU32::new(0),
    });

    let state = Arc::clone(&app);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                continue;
            };
            let app = Arc::clone(&state);
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let app = Arc::clone(&app);
                    async move { Ok::<_, Infallible>(app_response(req, &app).await) }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (addr, app)
}

async fn app_response(req: Request<Incoming>, app: &FakeApp) -> Response<Full<Bytes>> {
    let path = req.uri().path();

    let status = match path {
        "/chaos/start" => {
            let mode = match req.uri().query() {
                Some(q) if q.contains("mode=timeout") => CHAOS_TIMEOUT,
                _ => CHAOS_ERROR,
            };
            app.chaos.store(mode, Ordering::SeqCst);
            StatusCode::OK
        }
        "/chaos/stop" => {
            app.chaos.store(CHAOS_OFF, Ordering::SeqCst);
            StatusCode::OK
        }
        "/healthz" => StatusCode::OK,
        _ => {
            app.hits.fetch_add(1, Ordering::SeqCst);
            match app.chaos.load(Ordering::SeqCst) {
                CHAOS_ERROR => StatusCode::INTERNAL_SERVER_ERROR,
                CHAOS_TIMEOUT => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    StatusCode::OK
                }
                _ if path == "/version" => StatusCode::OK,
                _ => StatusCode::NOT_FOUND,
            }
        }
    };

    let body = format!(
        r#"{{"pool":"{}","release":"{}","status":{}}}"#,
        app.pool,
        app.release,
        status.as_u16()
    );
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .header("x-app-pool", app.pool)
        .header("x-release-id", app.release)
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

struct Harness {
    proxy: SocketAddr,
    app_addrs: [SocketAddr; 2],
    blue: Arc<FakeApp>,
    green: Arc<FakeApp>,
    router: Arc<FailoverRouter<HttpUpstream>>,
    metrics: MetricsCollector,
    shutdown: ShutdownSignal,
    client: reqwest::Client,
}

impl Harness {
    async fn start(cooldown: &str) -> Self {
        Self::start_with_alerts(cooldown, None).await
    }

    async fn start_with_alerts(cooldown: &str, alerts: Option<AlertHandle>) -> Self {
        let (blue_addr, blue) = start_app("blue", "blue-v1").await;
        let (green_addr, green) = start_app("green", "green-v1").await;

        let config = parse_config(&format!(
            r#"
proxy:
  listen: "127.0.0.1:0"
pool:
  - name: blue
    address: "{blue_addr}"
    role: primary
  - name: green
    address: "{green_addr}"
    role: secondary
failover:
  failure_threshold: 2
  cooldown: {cooldown}
  connect_timeout: 500ms
  response_timeout: 300ms
"#
        ))
        .unwrap();

        Self::with_config(config, [blue_addr, green_addr], blue, green, alerts).await
    }

    async fn with_config(
        config: Config,
        app_addrs: [SocketAddr; 2],
        blue: Arc<FakeApp>,
        green: Arc<FakeApp>,
        alerts: Option<AlertHandle>,
    ) -> Self {
        let metrics = MetricsCollector::new();
        let router = Arc::new(FailoverRouter::from_config(&config, metrics.clone()));
        let listener = FrontendListener::bind(
            config.proxy.clone(),
            Arc::clone(&router),
            metrics.clone(),
            alerts,
        )
        .await
        .unwrap();
        let proxy = listener.local_addr().unwrap();

        let shutdown = ShutdownSignal::new();
        tokio::spawn(listener.run(shutdown.subscribe()));

        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        Self {
            proxy,
            app_addrs,
            blue,
            green,
            router,
            metrics,
            shutdown,
            client,
        }
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("http://{}{}", self.proxy, path))
            .send()
            .await
            .unwrap()
    }

    /// Hit an app directly, bypassing the proxy.
    async fn chaos(&self, app: usize, path: &str) {
        let response = self
            .client
            .post(format!("http://{}{}", self.app_addrs[app], path))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    fn health(&self, name: &str) -> BackendHealth {
        self.router
            .health_snapshot(Instant::now())
            .into_iter()
            .find(|h| h.name == name)
            .unwrap()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.shutdown();
    }
}

fn pool_of(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("x-app-pool")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string()
}

const BLUE: usize = 0;
const GREEN: usize = 1;

#[tokio::test]
async fn test_baseline_all_traffic_to_primary() {
    let harness = Harness::start("10s").await;

    for _ in 0..10 {
        let response = harness.get("/version").await;
        assert_eq!(response.status(), 200);
        assert_eq!(pool_of(&response), "blue");
        assert_eq!(response.headers()["x-release-id"], "blue-v1");
    }

    assert_eq!(harness.blue.hits(), 10);
    assert_eq!(harness.green.hits(), 0);
}

#[tokio::test]
async fn test_primary_errors_fail_over_without_client_errors() {
    let harness = Harness::start("10s").await;
    harness.chaos(BLUE, "/chaos/start?mode=error").await;

    for _ in 0..20 {
        let response = harness.get("/version").await;
        assert_eq!(response.status(), 200);
        assert_eq!(pool_of(&response), "green");
    }

    // Blue is tried until it reaches the failure threshold, then skipped
    assert_eq!(harness.blue.hits(), 2);
    assert_eq!(harness.green.hits(), 20);

    let blue = harness.health("blue");
    assert!(!blue.up);
    assert_eq!(blue.role, Role::Primary);
    assert!(blue.remaining_cooldown.is_some());
}

#[tokio::test]
async fn test_primary_timeouts_fail_over() {
    let harness = Harness::start("10s").await;
    harness.chaos(BLUE, "/chaos/start?mode=timeout").await;

    let started = Instant::now();
    for _ in 0..5 {
        let response = harness.get("/version").await;
        assert_eq!(response.status(), 200);
        assert_eq!(pool_of(&response), "green");
    }

    // Only the first two requests pay the response timeout
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!harness.health("blue").up);
}

#[tokio::test]
async fn test_primary_returns_after_cooldown() {
    let harness = Harness::start("500ms").await;
    harness.chaos(BLUE, "/chaos/start?mode=error").await;

    for _ in 0..4 {
        assert_eq!(pool_of(&harness.get("/version").await), "green");
    }

    harness.chaos(BLUE, "/chaos/stop").await;

    // Still cooling down
    assert_eq!(pool_of(&harness.get("/version").await), "green");

    tokio::time::sleep(Duration::from_millis(700)).await;
    let response = harness.get("/version").await;
    assert_eq!(response.status(), 200);
    assert_eq!(pool_of(&response), "blue");
    assert!(harness.health("blue").up);
}

#[tokio::test]
async fn test_client_errors_pass_through() {
    let harness = Harness::start("10s").await;

    for _ in 0..5 {
        let response = harness.get("/missing").await;
        assert_eq!(response.status(), 404);
        assert_eq!(pool_of(&response), "blue");
    }

    let blue = harness.health("blue");
    assert!(blue.up);
    assert_eq!(blue.consecutive_failures, 0);
    assert_eq!(harness.green.hits(), 0);
}

#[tokio::test]
async fn test_total_outage_returns_last_error() {
    let harness = Harness::start("10s").await;
    harness.chaos(BLUE, "/chaos/start?mode=error").await;
    harness.chaos(GREEN, "/chaos/start?mode=error").await;

    let response = harness.get("/version").await;
    assert_eq!(response.status(), 500);
    assert_eq!(pool_of(&response), "green");

    harness.chaos(GREEN, "/chaos/start?mode=timeout").await;
    harness.chaos(BLUE, "/chaos/start?mode=timeout").await;

    let response = harness.get("/version").await;
    assert_eq!(response.status(), 504);
}

#[tokio::test]
async fn test_concurrent_requests_during_failover() {
    let harness = Harness::start("10s").await;
    harness.chaos(BLUE, "/chaos/start?mode=error").await;

    let requests = (0..50).map(|_| harness.get("/version"));
    let responses = futures::future::join_all(requests).await;

    for response in &responses {
        assert_eq!(response.status(), 200);
        assert_eq!(pool_of(response), "green");
    }
    assert!(!harness.health("blue").up);
}

#[tokio::test]
async fn test_unreachable_primary_fails_over() {
    let (green_addr, green) = start_app("green", "green-v1").await;
    let (unused_addr, blue) = start_app("blue", "blue-v1").await;

    let config = parse_config(&format!(
        r#"
proxy:
  listen: "127.0.0.1:0"
pool:
  - name: blue
    address: "127.0.0.1:1"
    role: primary
  - name: green
    address: "{green_addr}"
failover:
  connect_timeout: 500ms
  response_timeout: 500ms
"#
    ))
    .unwrap();
    let harness = Harness::with_config(config, [unused_addr, green_addr], blue, green, None).await;

    let response = harness.get("/version").await;
    assert_eq!(response.status(), 200);
    assert_eq!(pool_of(&response), "green");
    assert_eq!(harness.health("blue").consecutive_failures, 1);
}

#[tokio::test]
async fn test_metrics_reflect_failover() {
    let harness = Harness::start("10s").await;
    let server = MetricsServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        "/metrics".to_string(),
        harness.metrics.clone(),
    )
    .await
    .unwrap()
    .with_hook(harness.router.clone());
    let metrics_addr = server.local_addr().unwrap();
    tokio::spawn(server.run(harness.shutdown.subscribe()));

    harness.chaos(BLUE, "/chaos/start?mode=error").await;
    for _ in 0..3 {
        harness.get("/version").await;
    }

    let body = harness
        .client
        .get(format!("http://{}/metrics", metrics_addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains(r#"bgproxy_backend_up{backend="blue",role="primary"} 0"#));
    assert!(body.contains(r#"bgproxy_backend_up{backend="green",role="secondary"} 1"#));
    assert!(body.contains(r#"bgproxy_failovers_total{from="blue",to="green"} 2"#));
    assert!(body.contains(r#"bgproxy_requests_total{backend="green",method="GET",status="200"} 3"#));
}

/// Forwards every delivered alert to the test.
struct ChannelSink(mpsc::UnboundedSender<String>);

impl AlertSink for ChannelSink {
    async fn deliver(&self, message: &str) -> Result<(), AlertError> {
        let _ = self.0.send(message.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_failover_raises_alert() {
    let (alert_tx, mut alert_rx) = mpsc::unbounded_channel();
    let alert_shutdown = ShutdownSignal::new();
    let (alerts, watcher_task) = spawn_watcher(
        FailoverWatcher::new("blue", 200, 50.0),
        AlertDispatcher::new(ChannelSink(alert_tx), Duration::from_secs(300)),
        64,
        alert_shutdown.subscribe(),
    );

    let harness = Harness::start_with_alerts("10s", Some(alerts)).await;

    assert_eq!(pool_of(&harness.get("/version").await), "blue");

    harness.chaos(BLUE, "/chaos/start?mode=error").await;
    for _ in 0..3 {
        assert_eq!(pool_of(&harness.get("/version").await), "green");
    }

    let message = tokio::time::timeout(Duration::from_secs(5), alert_rx.recv())
        .await
        .expect("no alert delivered")
        .unwrap();
    assert!(message.starts_with("Failover detected: blue → green"), "{}", message);

    // One pool change, and the cooldown holds back anything else
    assert!(alert_rx.try_recv().is_err());

    alert_shutdown.shutdown();
    watcher_task.await.unwrap();
}

#[test]
fn test_config_loading() {
    use std::io::Write;
    use tempfile::NamedTempFile;

    let config_content = r#"
global:
  log_level: info
  log_format: compact

proxy:
  listen: "0.0.0.0:8080"

pool:
  - name: green
    address: "app_green:3000"
  - name: blue
    address: "app_blue:3000"
    role: primary

failover:
  failure_threshold: 3
  cooldown: 5s
  all_down: fail_fast

alerts:
  enabled: true
  window_size: 100
"#;

    let mut temp_file = NamedTempFile::new().expect("failed to create temp file");
    temp_file
        .write_all(config_content.as_bytes())
        .expect("failed to write config");

    let config = load_config(temp_file.path()).expect("failed to load config");

    assert_eq!(config.pool.len(), 2);
    let pool = Pool::from_config(&config.pool);
    assert_eq!(pool.primary().map(|b| b.name()), Some("blue"));
    assert_eq!(config.failover.failure_threshold, 3);
    assert_eq!(config.failover.cooldown, Duration::from_secs(5));
    assert_eq!(config.alerts.window_size, 100);
    assert!(config.alerts.slack_webhook_url.is_none());
}

#[test]
fn test_invalid_config_reports_every_problem() {
    let result = parse_config(
        r#"
proxy:
  listen: "0.0.0.0:8080"
pool:
  - name: blue
    address: "app_blue"
  - name: green
    address: "app_green:3000"
failover:
  retryable_statuses: [404, 502]
"#,
    );

    let message = result.unwrap_err().to_string();
    assert!(message.contains("app_blue"), "{}", message);
    assert!(message.contains("primary"), "{}", message);
    assert!(message.contains("404"), "{}", message);
}
