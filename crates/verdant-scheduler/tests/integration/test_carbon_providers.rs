//! Carbon provider chain against mock HTTP endpoints

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use verdant_core::config::{CarbonConfig, ProviderEndpoint};
use verdant_core::ports::ICarbonIntensityProvider;
use verdant_scheduler::{CarbonDataService, DataSource, HttpIntensityProvider};

use crate::common::{endpoint, mount_intensity};

#[tokio::test]
async fn test_http_provider_reads_intensity() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/intensity"))
        .and(query_param("region", "GB"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "intensity": 212.5
        })))
        .mount(&server)
        .await;

    let provider = HttpIntensityProvider::new(
        &ProviderEndpoint {
            name: "grid".into(),
            url: format!("{}/intensity", server.uri()),
            api_key: Some("secret".into()),
        },
        "GB",
        Duration::from_secs(5),
    )
    .unwrap();

    let reading = provider
        .current_intensity()
        .await
        .expect("Intensity request failed");
    assert_eq!(reading.intensity, 212.5);
    assert_eq!(reading.provider, "grid");
}

#[tokio::test]
async fn test_http_provider_rejects_server_error() {
    let server = MockServer::start().await;
    mount_intensity(&server, 503, serde_json::json!({"error": "down"})).await;

    let provider =
        HttpIntensityProvider::new(&endpoint("grid", &server), "GB", Duration::from_secs(5))
            .unwrap();
    assert!(provider.current_intensity().await.is_err());
}

#[tokio::test]
async fn test_http_provider_rejects_negative_intensity() {
    let server = MockServer::start().await;
    mount_intensity(&server, 200, serde_json::json!({"intensity": -5.0})).await;

    let provider =
        HttpIntensityProvider::new(&endpoint("grid", &server), "GB", Duration::from_secs(5))
            .unwrap();
    let err = provider.current_intensity().await.unwrap_err();
    assert!(err.to_string().contains("invalid intensity"));
}

#[tokio::test]
async fn test_chain_falls_through_to_service() {
    let grid = MockServer::start().await;
    mount_intensity(&grid, 500, serde_json::json!({})).await;

    let service = MockServer::start().await;
    mount_intensity(&service, 200, serde_json::json!({"intensity": 95.0})).await;

    let config = CarbonConfig {
        region: "GB".into(),
        grid_api: Some(endpoint("grid", &grid)),
        services: vec![endpoint("service", &service)],
        request_timeout_secs: 5,
    };
    let chain = CarbonDataService::from_config(&config);
    let forecast = chain.fetch_forecast(Utc::now()).await;

    assert_eq!(forecast.slots.len(), 24);
    assert_eq!(forecast.slots[0].intensity, 95.0);
    assert_eq!(
        forecast.slots[0].source,
        DataSource::Measured {
            provider: "service".into()
        }
    );
    assert!(forecast.slots[1..]
        .iter()
        .all(|s| s.source == DataSource::Simulated));
}

#[tokio::test]
async fn test_chain_simulates_when_everything_is_down() {
    let grid = MockServer::start().await;
    mount_intensity(&grid, 500, serde_json::json!({})).await;

    let provider: Arc<dyn ICarbonIntensityProvider> = Arc::new(
        HttpIntensityProvider::new(&endpoint("grid", &grid), "GB", Duration::from_secs(5))
            .unwrap(),
    );
    let chain = CarbonDataService::new(vec![provider]);
    let forecast = chain.fetch_forecast(Utc::now()).await;

    assert!(!forecast.has_measurements());
    assert_eq!(forecast.slots.len(), 24);
}
