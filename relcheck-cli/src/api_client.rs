use relcheck_http::error::ErrorBody;
use relcheck_http::models::{CacheStatsResponse, CheckRequestBody, CheckResponseBody, RingOwnerResponse};
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, kind: String, message: String },
}

pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Joins path segments onto the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| ClientError::Url(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Url(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn check(&self, request: &CheckRequestBody) -> Result<CheckResponseBody, ClientError> {
        let url = self.endpoint(&["api", "v1", "check"])?;
        let response = self.client.post(url).json(request).send().await?;
        decode(response).await
    }

    pub async fn ring_owner(&self, object_id: &str) -> Result<RingOwnerResponse, ClientError> {
        let url = self.endpoint(&["api", "v1", "ring", "owner", object_id])?;
        let response = self.client.get(url).send().await?;
        decode(response).await
    }

    pub async fn cache_stats(&self) -> Result<CacheStatsResponse, ClientError> {
        let url = self.endpoint(&["api", "v1", "cache", "stats"])?;
        let response = self.client.get(url).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }
    match response.json::<ErrorBody>().await {
        Ok(body) => Err(ClientError::Api {
            status: status.as_u16(),
            kind: body.kind.to_string(),
            message: body.error,
        }),
        Err(_) => Err(ClientError::Api {
            status: status.as_u16(),
            kind: "unknown".to_string(),
            message: status.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_encodes_segments() {
        let client = ApiClient::new("http://localhost:7070/");
        let url = client
            .endpoint(&["api", "v1", "ring", "owner", "reports/2024?q=1"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:7070/api/v1/ring/owner/reports%2F2024%3Fq=1"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = ApiClient::new("http://gateway.internal/relcheck");
        let url = client.endpoint(&["api", "v1", "check"]).unwrap();
        assert_eq!(url.as_str(), "http://gateway.internal/relcheck/api/v1/check");
    }

    #[test]
    fn test_invalid_base_url() {
        let client = ApiClient::new("not a url");
        assert!(matches!(
            client.endpoint(&["api"]),
            Err(ClientError::Url(_))
        ));
    }
}
