//! Header handling end to end: sanitization, static headers, identity.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::StatusCode;

use tailnet_ingress::identity::{Identity, IdentityError, IdentitySource, WhoIs};

mod common;

/// Identity service that knows one peer, after an optional delay.
struct StaticWhoIs {
    delay: Duration,
}

impl WhoIs for StaticWhoIs {
    fn whois(&self, peer: SocketAddr) -> BoxFuture<'_, Result<Identity, IdentityError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            assert!(peer.ip().is_loopback());
            Ok(Identity {
                user_id: "12345".into(),
                login_name: "alice@example.com".into(),
                display_name: "Alice Example".into(),
                profile_pic_url: Some("https://example.com/alice.png".into()),
                capabilities: vec!["cap:a".into(), "cap:b".into()],
                node_id: "n67890".into(),
                node_name: "alice-laptop".into(),
                node_capabilities: Vec::new(),
                node_tags: vec!["tag:laptop".into()],
            })
        })
    }
}

async fn fetch(url: String, headers: &[(&str, &str)]) -> common::Echo {
    let mut request = common::client().get(url);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = request.send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.unwrap()
}

fn identity_headers(echo: &common::Echo) -> Vec<&str> {
    echo.headers
        .iter()
        .map(|(k, _)| k.as_str())
        .filter(|k| k.to_ascii_lowercase().starts_with("x-tailscale-"))
        .collect()
}

#[tokio::test]
async fn test_header_sanitization() {
    let upstream = common::start_echo_upstream().await;
    let ingress = common::start_ingress(common::config(&format!("http://{upstream}")), None).await;

    let echo = fetch(
        ingress.overlay_url("/"),
        &[
            ("X-Tailscale-Evil", "true"),
            ("x-tailscale-evil", "true"),
            ("x-tAILSCALE-LoginName", "fake"),
        ],
    )
    .await;
    assert!(identity_headers(&echo).is_empty(), "{:?}", echo.headers);
}

#[tokio::test]
async fn test_custom_headers() {
    let cases = [
        ("X-Something-Custom", "hi there"),
        ("X-Forwarded-Server", "something-made-up.example.com"),
    ];
    let upstream = common::start_echo_upstream().await;

    for (name, value) in cases {
        let mut config = common::config(&format!("http://{upstream}"));
        config.headers.upstream = vec![format!("{name}: {value}")];
        let ingress = common::start_ingress(config, None).await;

        let echo = fetch(ingress.overlay_url("/"), &[(name, "from the caller")]).await;
        assert_eq!(echo.header_all(name), vec![value], "{name}");
    }
}

#[tokio::test]
async fn test_static_header_values_keep_order() {
    let upstream = common::start_echo_upstream().await;
    let mut config = common::config(&format!("http://{upstream}"));
    config.headers.upstream = vec!["X-Multi: first".into(), "X-Multi: second".into()];
    let ingress = common::start_ingress(config, None).await;

    let echo = fetch(ingress.overlay_url("/"), &[]).await;
    assert_eq!(echo.header_all("x-multi"), vec!["first", "second"]);
}

#[tokio::test]
async fn test_recommended_headers() {
    let upstream = common::start_echo_upstream().await;
    let ingress = common::start_ingress(common::config(&format!("http://{upstream}")), None).await;

    let echo = fetch(ingress.overlay_url("/"), &[("X-Forwarded-For", "192.0.2.1")]).await;
    let host = ingress.overlay.to_string();
    assert_eq!(echo.header("x-scheme"), Some("http"));
    assert_eq!(echo.header("x-real-ip"), Some("127.0.0.1"));
    assert_eq!(echo.header("x-forwarded-for"), Some("192.0.2.1, 127.0.0.1"));
    assert_eq!(echo.header("x-forwarded-host"), Some(host.as_str()));
    assert_eq!(echo.header("x-forwarded-proto"), Some("http"));
    assert_eq!(echo.header("x-forwarded-server"), Some("127.0.0.1"));
    assert_eq!(echo.header("x-forwarded-port"), Some(ingress.overlay.port().to_string().as_str()));
    assert_eq!(echo.header("host"), Some(host.as_str()));
    assert!(echo.header("x-request-id").is_some());

    // The funnel listener reports TLS.
    let echo = fetch(ingress.funnel_url("/"), &[]).await;
    assert_eq!(echo.header("x-scheme"), Some("https"));
    assert_eq!(echo.header("x-forwarded-proto"), Some("https"));
}

#[tokio::test]
async fn test_recommended_headers_disabled() {
    let upstream = common::start_echo_upstream().await;
    let mut config = common::config(&format!("http://{upstream}"));
    config.headers.recommended = false;
    let ingress = common::start_ingress(config, None).await;

    let echo = fetch(ingress.overlay_url("/"), &[]).await;
    assert!(echo.header("x-scheme").is_none());
    assert!(echo.header("x-real-ip").is_none());
    assert_eq!(echo.header("host"), Some(upstream.to_string().as_str()));
    assert_eq!(echo.header("x-forwarded-for"), Some("127.0.0.1"));
}

#[tokio::test]
async fn test_identity_headers() {
    let upstream = common::start_echo_upstream().await;
    let whois: Arc<dyn WhoIs> = Arc::new(StaticWhoIs { delay: Duration::ZERO });
    let ingress = common::start_ingress(common::config(&format!("http://{upstream}")), Some(whois)).await;

    let echo = fetch(
        ingress.overlay_url("/"),
        &[("X-Tailscale-User-LoginName", "mallory@example.com")],
    )
    .await;
    assert_eq!(echo.header("x-tailscale-user"), Some("12345"));
    assert_eq!(echo.header_all("x-tailscale-user-loginname"), vec!["alice@example.com"]);
    assert_eq!(echo.header("x-tailscale-user-loginname-localpart"), Some("alice"));
    assert_eq!(echo.header("x-tailscale-user-loginname-domain"), Some("example.com"));
    assert_eq!(echo.header("x-tailscale-user-displayname"), Some("Alice Example"));
    assert_eq!(
        echo.header("x-tailscale-user-profilepicurl"),
        Some("https://example.com/alice.png")
    );
    assert_eq!(echo.header("x-tailscale-caps"), Some("cap:a, cap:b"));
    assert_eq!(echo.header("x-tailscale-node"), Some("n67890"));
    assert_eq!(echo.header("x-tailscale-node-name"), Some("alice-laptop"));
    assert!(echo.header("x-tailscale-node-caps").is_none());
    assert_eq!(echo.header("x-tailscale-node-tags"), Some("tag:laptop"));
}

#[tokio::test]
async fn test_suppressed_identity() {
    let upstream = common::start_echo_upstream().await;
    let mut config = common::config(&format!("http://{upstream}"));
    config.identity.suppress = true;
    let whois: Arc<dyn WhoIs> = Arc::new(StaticWhoIs { delay: Duration::ZERO });
    let ingress = common::start_ingress(config, Some(whois)).await;

    let echo = fetch(ingress.overlay_url("/"), &[("X-Tailscale-User", "spoofed")]).await;
    assert!(identity_headers(&echo).is_empty(), "{:?}", echo.headers);
}

#[tokio::test]
async fn test_slow_identity_lookup_times_out() {
    let upstream = common::start_echo_upstream().await;
    let mut config = common::config(&format!("http://{upstream}"));
    config.identity.timeout_ms = 50;
    let whois: Arc<dyn WhoIs> = Arc::new(StaticWhoIs {
        delay: Duration::from_secs(30),
    });
    let ingress = common::start_ingress(config, Some(whois)).await;

    let echo = tokio::time::timeout(Duration::from_secs(5), fetch(ingress.overlay_url("/"), &[]))
        .await
        .expect("identity lookup must not hold the request");
    assert!(identity_headers(&echo).is_empty());
}

/// Fake overlay daemon answering whois on a UNIX socket.
async fn start_local_api(tag: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("tailnet-ingress-localapi-{tag}-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    let app = axum::Router::new().route(
        "/localapi/v0/whois",
        axum::routing::get(|| async {
            axum::Json(serde_json::json!({
                "UserProfile": {"ID": 777, "LoginName": "bob@example.com", "DisplayName": "Bob"},
                "Node": {"ID": 42, "ComputedName": "bob-desktop"}
            }))
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    path
}

#[tokio::test]
async fn test_reload_applies_identity_settings() {
    let local_api = start_local_api("reload").await;
    let upstream = common::start_echo_upstream().await;
    let mut config = common::config(&format!("http://{upstream}"));
    config.identity.suppress = true;
    config.identity.socket_path = local_api.display().to_string();
    let ingress = common::start_ingress_with(config.clone(), IdentitySource::LocalApi).await;

    let echo = fetch(ingress.overlay_url("/"), &[]).await;
    assert!(identity_headers(&echo).is_empty(), "{:?}", echo.headers);

    config.identity.suppress = false;
    ingress.server.apply(&config).unwrap();
    let echo = fetch(ingress.overlay_url("/"), &[]).await;
    assert_eq!(echo.header("x-tailscale-user-loginname"), Some("bob@example.com"));
    assert_eq!(echo.header("x-tailscale-node-name"), Some("bob-desktop"));

    config.identity.socket_path = "/nonexistent/tailnet-ingress-localapi.sock".into();
    ingress.server.apply(&config).unwrap();
    let echo = fetch(ingress.overlay_url("/"), &[]).await;
    assert!(identity_headers(&echo).is_empty(), "{:?}", echo.headers);

    let _ = std::fs::remove_file(&local_api);
}
