//! HTTP token fetcher against a mock authentication service

use std::time::Duration;

use keyholder::publisher::{HttpTokenFetcher, TokenFetcher};
use keyholder::Error;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn fetcher(server: &MockServer) -> HttpTokenFetcher {
    HttpTokenFetcher::new(format!("{}/oauth/token", server.uri()), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn test_fetch_returns_access_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "access_token": "minted", "expires_in": 3600 })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let credential = fetcher(&server).await.fetch().await.unwrap();
    assert_eq!(credential.expose(), "minted");
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = fetcher(&server).await.fetch().await.unwrap_err();
    assert!(matches!(err, Error::TokenFetch(_)));
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn test_missing_access_token_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": "x" })))
        .mount(&server)
        .await;

    let err = fetcher(&server).await.fetch().await.unwrap_err();
    assert!(matches!(err, Error::TokenFetch(_)));
}

#[tokio::test]
async fn test_slow_service_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "access_token": "late" }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let fetcher =
        HttpTokenFetcher::new(format!("{}/oauth/token", server.uri()), Duration::from_millis(200)).unwrap();
    let err = fetcher.fetch().await.unwrap_err();
    assert!(matches!(err, Error::TokenFetch(_)));
}
