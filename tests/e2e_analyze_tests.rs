//! End-to-end tests for the analyze endpoint and its cache tiers

mod common;

use common::{
    MockBehavior, MockLlm, TestClient, TestServer, BOHEMIAN_QUERY, BOHEMIAN_QUERY_MESSY,
    BOHEMIAN_SHARE_ID, FAST_RETRY_CONFIG, HEROES_ARTIST, HEROES_SHARE_ID, HEROES_TITLE,
    MOCK_OVERVIEW,
};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

#[tokio::test]
async fn test_first_analysis_calls_model_and_stores() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.analyze(BOHEMIAN_QUERY).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["success"], true);
    assert_eq!(body["fallback"], false);
    let result = &body["result"];
    assert_eq!(result["artist"], "Queen");
    assert_eq!(result["songTitle"], "Bohemian Rhapsody");
    assert_eq!(result["overview"], MOCK_OVERVIEW);
    assert_eq!(result["themes"].as_array().unwrap().len(), 3);
    assert_eq!(result["fromCache"], false);
    assert_eq!(result["shareId"], BOHEMIAN_SHARE_ID);
    assert_eq!(
        result["shareUrl"],
        format!("{}/share/{}", server.base_url, BOHEMIAN_SHARE_ID)
    );
    assert_eq!(result["accessCount"], 1);
    assert!(result["createdAt"].is_string());
    assert_eq!(body["rateLimitInfo"]["remaining"], 4);

    assert_eq!(server.llm.calls(), 1);
    assert_eq!(server.store.count_analyses().unwrap(), 1);
}

#[tokio::test]
async fn test_repeat_is_served_from_memory() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    client.analyze(BOHEMIAN_QUERY).await;
    let response = client.analyze(BOHEMIAN_QUERY_MESSY).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["result"]["fromCache"], true);
    assert_eq!(body["result"]["shareId"], BOHEMIAN_SHARE_ID);
    assert_eq!(server.llm.calls(), 1);
}

#[tokio::test]
async fn test_repeat_after_restart_is_a_store_hit() {
    let first = TestServer::spawn().await;
    TestClient::new(first.base_url.clone())
        .analyze(BOHEMIAN_QUERY)
        .await;

    let second = first.restart(MockLlm::new(MockBehavior::Answer)).await;
    let response = TestClient::new(second.base_url.clone())
        .analyze(BOHEMIAN_QUERY)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["result"]["fromCache"], true);
    assert_eq!(body["result"]["accessCount"], 2);
    assert_eq!(body["result"]["overview"], MOCK_OVERVIEW);
    assert_eq!(second.llm.calls(), 0);
}

#[tokio::test]
async fn test_structured_request() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.analyze_song(HEROES_ARTIST, HEROES_TITLE).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["artist"], HEROES_ARTIST);
    assert_eq!(body["result"]["songTitle"], HEROES_TITLE);
    assert_eq!(body["result"]["shareId"], HEROES_SHARE_ID);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_model_call() {
    let llm = MockLlm::with_delay(MockBehavior::Answer, Duration::from_millis(300));
    let server = TestServer::spawn_with(llm, FAST_RETRY_CONFIG).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let client = TestClient::with_ip(server.base_url.clone(), &format!("198.51.100.{}", i));
        handles.push(tokio::spawn(async move {
            let response = client.analyze(BOHEMIAN_QUERY).await;
            assert_eq!(response.status(), StatusCode::OK);
            response.json::<Value>().await.unwrap()
        }));
    }

    for handle in handles {
        let body = handle.await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["result"]["shareId"], BOHEMIAN_SHARE_ID);
        assert_eq!(body["result"]["overview"], MOCK_OVERVIEW);
    }
    assert_eq!(server.llm.calls(), 1);
    assert_eq!(server.store.count_analyses().unwrap(), 1);
}

#[tokio::test]
async fn test_invalid_queries_are_rejected() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let long_query = format!("Queen - {}", "a".repeat(600));
    let invalid_queries = ["", "   ", long_query.as_str(), "<script>alert(1)</script>"];
    for query in invalid_queries {
        let response = client.analyze(query).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{:?}", query);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());
        assert!(body.get("result").is_none());
    }

    for raw in ["not json", r#"{"query": 42}"#, r#"{"artist": "Queen"}"#] {
        let response = client.analyze_raw(raw).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", raw);
    }

    // None of that consumed quota or reached the model.
    let status: Value = client.analyze_status().await.json().await.unwrap();
    assert_eq!(status["remaining"], 5);
    assert_eq!(server.llm.calls(), 0);
}

#[tokio::test]
async fn test_cache_stats_reflect_activity() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    client.analyze(BOHEMIAN_QUERY).await;
    client.analyze(BOHEMIAN_QUERY).await;

    let response = client.cache_stats().await;
    assert_eq!(response.status(), StatusCode::OK);
    let stats: Value = response.json().await.unwrap();
    assert_eq!(stats["cache"]["size"], 1);
    assert_eq!(stats["cache"]["hits"], 1);
    assert_eq!(stats["cache"]["maxSize"], 500);
    assert_eq!(stats["circuitBreaker"]["state"], "CLOSED");
    assert_eq!(stats["inFlightRequests"], 0);
    assert_eq!(stats["storedAnalyses"], 1);
}

#[tokio::test]
async fn test_home_and_health() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let home: Value = client.home().await.json().await.unwrap();
    assert!(home["uptime"].is_string());
    assert!(home["version"].is_string());

    let response = client.health().await;
    assert_eq!(response.status(), StatusCode::OK);
    let health: Value = response.json().await.unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["model"], "mock-model");
}
