//! OpenSearch document client

use chrono::Utc;
use reqwest::Url;
use thiserror::Error;

use super::credentials::{CredentialsError, CredentialsProvider};
use super::sigv4::{self, SigningError, SigningParams};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Invalid index URL {0:?}")]
    InvalidUrl(String),
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    #[error("Failed to sign request: {0}")]
    Signing(#[from] SigningError),
    #[error("Failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Index request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Configuration for the index client
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Domain endpoint, e.g. `https://search-xyz.ap-south-1.es.amazonaws.com`
    pub domain: String,
    pub index_name: String,
    pub region: String,
    /// SigV4 service name ("es" for managed OpenSearch domains)
    pub service: String,
}

/// Status and body as returned by the index
#[derive(Debug, Clone)]
pub struct IndexResponse {
    pub status: u16,
    pub body: String,
}

impl IndexResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct IndexClient {
    http: reqwest::Client,
    url: Url,
    region: String,
    service: String,
}

impl IndexClient {
    pub fn new(config: IndexConfig) -> Result<Self, IndexError> {
        let raw = format!(
            "{}/{}/_doc",
            config.domain.trim_end_matches('/'),
            config.index_name
        );
        let url = Url::parse(&raw).map_err(|_| IndexError::InvalidUrl(raw.clone()))?;

        Ok(Self {
            http: reqwest::Client::new(),
            url,
            region: config.region,
            service: config.service,
        })
    }

    /// `{domain}/{index_name}/_doc`
    pub fn document_url(&self) -> &Url {
        &self.url
    }

    /// POST one document. The store assigns its id.
    ///
    /// Any HTTP status is a successful call here; only transport failures
    /// are errors.
    pub async fn index_document(
        &self,
        document: &serde_json::Value,
        credentials: &CredentialsProvider,
    ) -> Result<IndexResponse, IndexError> {
        let body = serde_json::to_vec(document)?;
        let credentials = credentials.resolve()?;

        let signature = sigv4::sign(
            "POST",
            &self.url,
            &[("content-type", "application/json")],
            &body,
            &SigningParams {
                credentials: &credentials,
                region: &self.region,
                service: &self.service,
                time: Utc::now(),
            },
        )?;

        let request = self
            .http
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        let response = signature.apply(request).send().await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(IndexResponse { status, body })
    }
}
