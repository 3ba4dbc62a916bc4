// src/api/credibility.rs
//
// Creator reputation lookups. The service is intermittently available by
// assumption; any absent profile, handle, or score anywhere in the chain is
// a hard, final skip for that launch -- never queued, never retried.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::LadderbotError;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorProfile {
    pub address: String,
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub followers: Option<u64>,
}

#[async_trait]
pub trait CredibilityGate: Send + Sync {
    /// Resolve a creator wallet to a social identity, if the service knows
    /// one. `Ok(None)` means "no identity" and is final.
    async fn resolve_identity(&self, creator_address: &str) -> Result<Option<CreatorProfile>>;

    /// Reputation score for a handle or address. `Ok(None)` means unscored.
    async fn score(&self, handle_or_address: &str) -> Result<Option<f64>>;
}

// ============================================================================
// HTTP ADAPTER
// ============================================================================

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct HttpCredibilityGate {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpCredibilityGate {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build credibility HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.get(&url);
        if let Some(key) = &self.api_key {
            builder = builder.header("X-API-KEY", key);
        }
        builder
            .send()
            .await
            .context(format!("Credibility request failed: {}", path))
    }
}

#[async_trait]
impl CredibilityGate for HttpCredibilityGate {
    async fn resolve_identity(&self, creator_address: &str) -> Result<Option<CreatorProfile>> {
        let response = self
            .get(&format!("/v1/identity/{}", creator_address.to_lowercase()))
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!("No identity for creator {}", creator_address);
                Ok(None)
            }
            status if status.is_success() => {
                let profile: CreatorProfile = response
                    .json()
                    .await
                    .context("Failed to deserialize identity response")?;
                Ok(Some(profile))
            }
            status => Err(LadderbotError::CredibilityError(format!(
                "Identity lookup for {} returned HTTP {}",
                creator_address, status
            ))
            .into()),
        }
    }

    async fn score(&self, handle_or_address: &str) -> Result<Option<f64>> {
        let response = self.get(&format!("/v1/score/{}", handle_or_address)).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: ScoreResponse = response
                    .json()
                    .await
                    .context("Failed to deserialize score response")?;
                Ok(body.score)
            }
            status => Err(LadderbotError::CredibilityError(format!(
                "Score lookup for {} returned HTTP {}",
                handle_or_address, status
            ))
            .into()),
        }
    }
}

// ============================================================================
// STATIC ADAPTER (dry run, tests)
// ============================================================================

/// Answers every lookup with a fixed profile and score so the pipeline can
/// run offline. A `score` of `None` turns it into an always-skip gate.
#[derive(Debug, Clone)]
pub struct StaticCredibilityGate {
    pub score: Option<f64>,
}

#[async_trait]
impl CredibilityGate for StaticCredibilityGate {
    async fn resolve_identity(&self, creator_address: &str) -> Result<Option<CreatorProfile>> {
        let suffix: String = creator_address.to_lowercase().chars().skip(2).take(6).collect();
        Ok(Some(CreatorProfile {
            address: creator_address.to_lowercase(),
            handle: Some(format!("creator_{}", suffix)),
            display_name: None,
            followers: None,
        }))
    }

    async fn score(&self, _handle_or_address: &str) -> Result<Option<f64>> {
        Ok(self.score)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const CREATOR: &str = "0x1111222233334444555566667777888899990000";

    #[tokio::test]
    async fn test_identity_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", format!("/v1/identity/{}", CREATOR).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"address":"{}","handle":"moonboi","displayName":"Moon Boi","followers":4200}}"#,
                CREATOR
            ))
            .create_async()
            .await;

        let gate =
            HttpCredibilityGate::new(&server.url(), None, Duration::from_secs(5)).unwrap();
        let profile = gate.resolve_identity(CREATOR).await.unwrap().unwrap();
        assert_eq!(profile.handle.as_deref(), Some("moonboi"));
        assert_eq!(profile.followers, Some(4200));
    }

    #[tokio::test]
    async fn test_unknown_identity_is_none_not_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", format!("/v1/identity/{}", CREATOR).as_str())
            .with_status(404)
            .create_async()
            .await;

        let gate =
            HttpCredibilityGate::new(&server.url(), None, Duration::from_secs(5)).unwrap();
        assert!(gate.resolve_identity(CREATOR).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/score/moonboi")
            .with_status(503)
            .create_async()
            .await;

        let gate =
            HttpCredibilityGate::new(&server.url(), None, Duration::from_secs(5)).unwrap();
        assert!(gate.score("moonboi").await.is_err());
    }

    #[tokio::test]
    async fn test_unscored_handle_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/score/moonboi")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"score":null}"#)
            .create_async()
            .await;

        let gate =
            HttpCredibilityGate::new(&server.url(), None, Duration::from_secs(5)).unwrap();
        assert_eq!(gate.score("moonboi").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_static_gate_answers_offline() {
        let gate = StaticCredibilityGate { score: Some(72.0) };
        let profile = gate.resolve_identity(CREATOR).await.unwrap().unwrap();
        assert!(profile.handle.is_some());
        assert_eq!(gate.score("whoever").await.unwrap(), Some(72.0));
    }
}
