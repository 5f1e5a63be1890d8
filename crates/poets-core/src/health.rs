//! Endpoint health probes: the LLM model list and the media host.

use std::time::Duration;

use serde::Deserialize;

use crate::error::HealthError;

/// Timeout for the model-list request.
const MODELS_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the media host probe.
const MEDIA_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

/// Verify that every required model is served at `base_url`.
///
/// Fetches `GET <base_url>/models` and checks `data[].id` against
/// `required`. Empty entries in `required` are ignored.
pub async fn validate_models(base_url: &str, required: &[String]) -> Result<(), HealthError> {
    let url = format!("{}/models", base_url.trim_end_matches('/'));

    let response = reqwest::Client::new()
        .get(&url)
        .timeout(MODELS_TIMEOUT)
        .send()
        .await
        .map_err(|e| HealthError::Unreachable {
            url: url.clone(),
            source: e,
        })?;

    if !response.status().is_success() {
        return Err(HealthError::BadStatus {
            url,
            status: response.status().as_u16(),
        });
    }

    let body: ModelsResponse = response.json().await.map_err(|e| HealthError::Unreachable {
        url: url.clone(),
        source: e,
    })?;

    let available: Vec<&str> = body.data.iter().map(|m| m.id.as_str()).collect();
    let missing: Vec<String> = required
        .iter()
        .filter(|name| !name.is_empty() && !available.contains(&name.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() {
        tracing::info!(models = available.len(), "model validation passed");
        Ok(())
    } else {
        Err(HealthError::MissingModels { models: missing })
    }
}

/// Probe the media host's `/system_stats` endpoint.
///
/// Returns `true` on HTTP 200. A `None` host is treated as healthy: the
/// workflow scripts are then assumed to be self-contained.
pub async fn check_media_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return true;
    };

    let url = format!("{}/system_stats", host.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(&url)
        .timeout(MEDIA_TIMEOUT)
        .send()
        .await
    {
        Ok(response) => response.status().as_u16() == 200,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "media host health check error");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn required() -> Vec<String> {
        vec!["llama3.1".to_string(), "qwen2.5".to_string(), "phi4".to_string()]
    }

    #[tokio::test]
    async fn validate_models_passes_when_all_present() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "data": [
                {"id": "llama3.1"}, {"id": "qwen2.5"}, {"id": "phi4"}, {"id": "extra"}
            ]
        });
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        validate_models(&server.uri(), &required()).await.expect("valid");
    }

    #[tokio::test]
    async fn validate_models_reports_missing_entries() {
        let server = MockServer::start().await;
        let body = serde_json::json!({"data": [{"id": "llama3.1"}]});
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let err = validate_models(&server.uri(), &required()).await.unwrap_err();
        match err {
            HealthError::MissingModels { models } => {
                assert_eq!(models, vec!["qwen2.5".to_string(), "phi4".to_string()]);
            }
            other => panic!("expected MissingModels, got: {other}"),
        }
    }

    #[tokio::test]
    async fn validate_models_maps_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = validate_models(&server.uri(), &required()).await.unwrap_err();
        assert!(matches!(err, HealthError::BadStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn media_host_healthy_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/system_stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"system": {}})))
            .mount(&server)
            .await;

        assert!(check_media_host(Some(&server.uri())).await);
    }

    #[tokio::test]
    async fn media_host_unhealthy_on_503() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/system_stats"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        assert!(!check_media_host(Some(&server.uri())).await);
    }

    #[tokio::test]
    async fn media_host_unhealthy_when_unreachable() {
        assert!(!check_media_host(Some("http://127.0.0.1:1")).await);
    }

    #[tokio::test]
    async fn absent_media_host_is_healthy() {
        assert!(check_media_host(None).await);
    }
}
