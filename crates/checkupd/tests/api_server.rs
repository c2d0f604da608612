//! HTTP surface tests.
//!
//! Drives the router the daemon serves with a controller reading a real
//! configuration file, in-process through `tower::ServiceExt::oneshot`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tower::ServiceExt;

use checkup_api::{
    ApiConfig, ApiState, BasicAuth, authorization_header, build_router, hash_password,
};
use checkup_engine::{Controller, FileSource};
use checkup_metrics::Registry;

struct Harness {
    _dir: tempfile::TempDir,
    config: PathBuf,
    controller: Arc<Controller>,
    router: Router,
}

fn write_config(path: &Path, checkers: serde_json::Value) {
    let doc = serde_json::json!({ "checkers": checkers });
    std::fs::write(path, doc.to_string()).unwrap();
}

fn tcp_checker(name: &str, addr: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "tcp",
        "endpoint_name": name,
        "endpoint_url": addr,
        "every": "20ms"
    })
}

async fn harness(checkers: serde_json::Value, api: ApiConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("checkup.json");
    write_config(&config, checkers);

    let registry = Arc::new(Registry::new(Duration::from_secs(300)));
    let controller = Arc::new(Controller::new(
        Arc::new(FileSource::new(&config)),
        Duration::from_secs(3600),
        registry.clone(),
    ));
    controller.start().await.unwrap();

    let router = build_router(
        ApiState {
            controller: controller.clone(),
            registry,
        },
        &api,
    );
    Harness {
        _dir: dir,
        config,
        controller,
        router,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn healthy_endpoint() {
    let h = harness(serde_json::json!([]), ApiConfig::default()).await;

    let resp = h.router.oneshot(get("/-/healthy")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "OK\n");
}

#[tokio::test]
async fn metrics_expose_check_counters() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let h = harness(
        serde_json::json!([tcp_checker("local", &addr)]),
        ApiConfig {
            metrics_path: "/probe-metrics".to_string(),
            basic_auth: None,
        },
    )
    .await;

    tokio::time::sleep(Duration::from_millis(120)).await;

    let resp = h.router.clone().oneshot(get("/probe-metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_text(resp).await;
    assert!(body.contains("# TYPE checkup_checks_total counter"), "{body}");
    assert!(
        body.contains(&format!(
            "checkup_checks_healthy{{type=\"tcp\",title=\"local\",endpoint=\"{addr}\"}}"
        )),
        "{body}"
    );
    assert!(body.contains("checkup_tcp_up"), "{body}");

    let resp = h.router.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn reload_picks_up_config_changes() {
    let h = harness(
        serde_json::json!([tcp_checker("a", "127.0.0.1:1")]),
        ApiConfig::default(),
    )
    .await;
    assert_eq!(h.controller.active_tasks(), 1);

    write_config(
        &h.config,
        serde_json::json!([
            tcp_checker("a", "127.0.0.1:1"),
            tcp_checker("b", "127.0.0.1:2"),
            tcp_checker("c", "127.0.0.1:3")
        ]),
    );

    let resp = h.router.oneshot(post("/-/reload")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(body["success"], true);

    assert_eq!(h.controller.active_tasks(), 3);
    assert_eq!(h.controller.generation(), 2);
    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn broken_reload_keeps_old_generation() {
    let h = harness(
        serde_json::json!([tcp_checker("a", "127.0.0.1:1")]),
        ApiConfig::default(),
    )
    .await;

    write_config(&h.config, serde_json::json!([{"type": "smtp"}]));

    let resp = h.router.oneshot(post("/-/reload")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "unknown checker type: smtp");

    assert_eq!(h.controller.active_tasks(), 1);
    assert_eq!(h.controller.generation(), 1);
    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn reload_is_post_only() {
    let h = harness(serde_json::json!([]), ApiConfig::default()).await;
    let resp = h.router.oneshot(get("/-/reload")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn basic_auth_guards_every_route() {
    let credentials = BasicAuth::new("admin", hash_password("s3cret").unwrap()).unwrap();
    let h = harness(
        serde_json::json!([]),
        ApiConfig {
            basic_auth: Some(credentials),
            ..ApiConfig::default()
        },
    )
    .await;

    for uri in ["/-/healthy", "/metrics"] {
        let resp = h.router.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(
            resp.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"checkup\""
        );
    }

    let wrong = Request::builder()
        .uri("/-/healthy")
        .header(header::AUTHORIZATION, authorization_header("admin", "nope"))
        .body(Body::empty())
        .unwrap();
    let resp = h.router.clone().oneshot(wrong).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let reload = Request::builder()
        .method("POST")
        .uri("/-/reload")
        .header(header::AUTHORIZATION, authorization_header("admin", "s3cret"))
        .body(Body::empty())
        .unwrap();
    let resp = h.router.oneshot(reload).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
