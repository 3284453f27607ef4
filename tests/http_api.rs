// HTTP surface tests against a server bound to an ephemeral local port.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ghostcontext::api::{self, AppState};
use ghostcontext::cache::HolderCache;
use ghostcontext::config::{Config, Settings};
use ghostcontext::error::AnalysisError;
use ghostcontext::holders::{HolderSource, HolderSources};
use ghostcontext::progress::AnalysisEvent;
use ghostcontext::retry::{RetryPolicy, RetryingFetcher};
use ghostcontext::types::{AssetRef, HolderPage};

const SOURCE_WALLET: &str = "0x00000000000000000000000000000000000000aa";
const FRIEND: &str = "0x00000000000000000000000000000000000000bb";

/// Every asset is held by the same friend
struct FriendlySource;

#[async_trait]
impl HolderSource for FriendlySource {
    fn name(&self) -> &'static str {
        "friendly"
    }

    async fn next_page(&self, _asset: &AssetRef, _cursor: Option<&str>) -> Result<HolderPage, AnalysisError> {
        Ok(HolderPage {
            addresses: vec![FRIEND.to_string(), SOURCE_WALLET.to_string()],
            next_cursor: None,
        })
    }
}

fn test_settings() -> Settings {
    Settings::from_config(&Config::default()).expect("default settings")
}

async fn spawn_app(settings: Settings) -> String {
    let source: Arc<dyn HolderSource> = Arc::new(FriendlySource);
    let sources = HolderSources::new(source.clone(), source.clone(), source);
    let state = Arc::new(AppState::new(settings, sources, Arc::new(HolderCache::disabled())));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            api::router(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    format!("http://{}", addr)
}

fn combined_body() -> serde_json::Value {
    serde_json::json!({
        "address": SOURCE_WALLET,
        "nfts": [{"network": "ETH_MAINNET", "address": "0x1111111111111111111111111111111111111111", "name": "Squiggles"}],
        "poaps": [{"eventId": 42, "name": "Meetup"}]
    })
}

#[tokio::test]
async fn combined_analysis_returns_ranked_result() {
    let base = spawn_app(test_settings()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/analyze-combined-overlap", base))
        .json(&combined_body())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["walletAddress"], SOURCE_WALLET);
    assert_eq!(body["analyzedAssets"]["total"], 2);
    assert_eq!(body["minOverlapThreshold"], 2);
    assert_eq!(body["kindredSpirits"][0]["address"], FRIEND);
    assert_eq!(body["kindredSpirits"][0]["overlapPercentage"], "100.0");
    assert_eq!(body["totalKindredSpirits"], 1);
}

#[tokio::test]
async fn invalid_requests_are_400_with_error_body() {
    let base = spawn_app(test_settings()).await;
    let client = reqwest::Client::new();

    let bad_wallet = client
        .post(format!("{}/api/analyze-combined-overlap", base))
        .json(&serde_json::json!({"address": "not-a-wallet", "poaps": [{"eventId": 1}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_wallet.status().as_u16(), 400);
    let body: serde_json::Value = bad_wallet.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("Invalid address"));

    let nothing_selected = client
        .post(format!("{}/api/analyze-combined-overlap/stream", base))
        .json(&serde_json::json!({"address": SOURCE_WALLET}))
        .send()
        .await
        .unwrap();
    assert_eq!(nothing_selected.status().as_u16(), 400);

    let not_json = client
        .post(format!("{}/api/analyze-erc20-overlap", base))
        .header("content-type", "application/json")
        .body("{")
        .send()
        .await
        .unwrap();
    assert_eq!(not_json.status().as_u16(), 400);
}

#[tokio::test]
async fn stream_emits_progress_then_result() {
    let base = spawn_app(test_settings()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/analyze-combined-overlap/stream", base))
        .json(&combined_body())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let text = response.text().await.unwrap();
    let events: Vec<AnalysisEvent> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();

    assert!(matches!(events.first(), Some(AnalysisEvent::Progress { .. })));
    assert!(events.contains(&AnalysisEvent::Progress {
        phase: "Calculating results".into(),
        current: 1,
        total: 1,
    }));
    match events.last() {
        Some(AnalysisEvent::Result(result)) => {
            assert_eq!(result.kindred_spirits[0].address, FRIEND);
        }
        other => panic!("expected a result event last, got {:?}", other),
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn erc20_endpoint_accepts_any_overlap() {
    let base = spawn_app(test_settings()).await;

    let body: serde_json::Value = reqwest::Client::new()
        .post(format!("{}/api/analyze-erc20-overlap", base))
        .json(&serde_json::json!({
            "address": SOURCE_WALLET,
            "tokens": [
                {"address": "0x2222222222222222222222222222222222222222", "symbol": "AAA"},
                {"address": "0x3333333333333333333333333333333333333333", "symbol": "BBB"}
            ]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["minOverlapThreshold"], 1);
    assert_eq!(body["analyzedAssets"]["erc20s"], 2);
    assert_eq!(body["kindredSpirits"][0]["sharedAssets"]["erc20s"][0]["network"], "BASE_MAINNET");
}

#[tokio::test]
async fn analysis_rate_limit_returns_429() {
    let mut settings = test_settings();
    settings.rate_limit.analysis_per_minute = 2;
    let base = spawn_app(settings).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let ok = client
            .post(format!("{}/api/analyze-combined-overlap", base))
            .json(&combined_body())
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status().as_u16(), 200);
    }

    let limited = client
        .post(format!("{}/api/analyze-combined-overlap", base))
        .json(&combined_body())
        .send()
        .await
        .unwrap();
    assert_eq!(limited.status().as_u16(), 429);
    assert!(limited.headers().contains_key("retry-after"));
    assert_eq!(limited.headers()["x-ratelimit-remaining"], "0");

    // Health checks are never limited
    let health = client.get(format!("{}/api/health", base)).send().await.unwrap();
    assert_eq!(health.status().as_u16(), 200);
}

#[tokio::test]
async fn health_check_is_not_rate_limited() {
    let mut settings = test_settings();
    settings.rate_limit.api_per_minute = 1;
    let base = spawn_app(settings).await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let health = client.get(format!("{}/api/health", base)).send().await.unwrap();
        assert_eq!(health.status().as_u16(), 200);
        assert!(!health.headers().contains_key("x-ratelimit-remaining"));
    }
}

#[tokio::test]
async fn disallowed_origin_is_403() {
    let mut settings = test_settings();
    settings.server.allowed_origins = vec!["https://ghostcontext.app".to_string()];
    let base = spawn_app(settings).await;
    let client = reqwest::Client::new();

    let rejected = client
        .post(format!("{}/api/analyze-combined-overlap", base))
        .header("origin", "https://elsewhere.example")
        .json(&combined_body())
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status().as_u16(), 403);

    let allowed = client
        .post(format!("{}/api/analyze-combined-overlap", base))
        .header("origin", "https://ghostcontext.app")
        .json(&combined_body())
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status().as_u16(), 200);
}

#[tokio::test]
async fn health_and_metrics_respond() {
    ghostcontext::metrics::init_metrics().unwrap();
    let base = spawn_app(test_settings()).await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("{}/api/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["cache"]["enabled"], false);

    let metrics = client.get(format!("{}/metrics", base)).send().await.unwrap();
    assert_eq!(metrics.status().as_u16(), 200);
    let text = metrics.text().await.unwrap();
    assert!(text.contains("ghostcontext_http_requests_total"));
}

/// Answers 429 twice, then a holder page
async fn flaky_holders(State(hits): State<Arc<Mutex<Vec<Instant>>>>) -> (StatusCode, Json<serde_json::Value>) {
    let mut hits = hits.lock().unwrap();
    hits.push(Instant::now());
    if hits.len() <= 2 {
        (StatusCode::TOO_MANY_REQUESTS, Json(serde_json::json!({"error": "slow down"})))
    } else {
        (StatusCode::OK, Json(serde_json::json!({"owners": [FRIEND]})))
    }
}

#[tokio::test]
async fn fetcher_retries_429_twice_then_succeeds() {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/owners", get(flaky_holders))
        .with_state(hits.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let policy = RetryPolicy::new(3, Duration::from_millis(50), Duration::from_secs(2));
    let fetcher = RetryingFetcher::new(policy).unwrap();

    let response = fetcher
        .get("stub", &format!("http://{}/owners", addr), &[], &[])
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let hits = hits.lock().unwrap().clone();
    assert_eq!(hits.len(), 3);
    let first_gap = hits[1] - hits[0];
    let second_gap = hits[2] - hits[1];
    assert!(first_gap >= Duration::from_millis(50));
    assert!(second_gap >= first_gap, "{:?} < {:?}", second_gap, first_gap);
}
