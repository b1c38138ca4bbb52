//! Kinesis Data Streams client (PutRecord only)

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::credentials::{CredentialsError, CredentialsProvider};
use super::sigv4::{self, SigningError, SigningParams};

const TARGET_PUT_RECORD: &str = "Kinesis_20131202.PutRecord";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Invalid stream endpoint {0:?}")]
    InvalidEndpoint(String),
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    #[error("Failed to sign request: {0}")]
    Signing(#[from] SigningError),
    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Stream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Stream rejected record ({status}): {error_type}: {message}")]
    Service {
        status: u16,
        error_type: String,
        message: String,
    },
}

/// Result of a successful PutRecord
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutRecordOutput {
    pub shard_id: String,
    pub sequence_number: String,
}

/// Destination for serialized records
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn put_record(
        &self,
        data: &[u8],
        partition_key: &str,
    ) -> Result<PutRecordOutput, StreamError>;
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutRecordInput<'a> {
    stream_name: &'a str,
    data: String,
    partition_key: &'a str,
}

#[derive(Deserialize)]
struct ServiceErrorBody {
    #[serde(rename = "__type", default)]
    error_type: Option<String>,
    #[serde(alias = "Message", default)]
    message: Option<String>,
}

/// Configuration for the stream client
#[derive(Debug, Clone)]
pub struct KinesisConfig {
    pub region: String,
    pub stream_name: String,
    /// Overrides the regional endpoint
    pub endpoint: Option<String>,
}

pub struct KinesisClient {
    http: reqwest::Client,
    endpoint: Url,
    region: String,
    stream_name: String,
    credentials: CredentialsProvider,
}

impl KinesisClient {
    pub fn new(config: KinesisConfig, credentials: CredentialsProvider) -> Result<Self, StreamError> {
        let endpoint = config
            .endpoint
            .unwrap_or_else(|| format!("https://kinesis.{}.amazonaws.com/", config.region));
        let endpoint =
            Url::parse(&endpoint).map_err(|_| StreamError::InvalidEndpoint(endpoint.clone()))?;

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            region: config.region,
            stream_name: config.stream_name,
            credentials,
        })
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }
}

#[async_trait]
impl RecordSink for KinesisClient {
    async fn put_record(
        &self,
        data: &[u8],
        partition_key: &str,
    ) -> Result<PutRecordOutput, StreamError> {
        let body = serde_json::to_vec(&PutRecordInput {
            stream_name: &self.stream_name,
            data: base64::engine::general_purpose::STANDARD.encode(data),
            partition_key,
        })?;

        let credentials = self.credentials.resolve()?;
        let signature = sigv4::sign(
            "POST",
            &self.endpoint,
            &[
                ("content-type", CONTENT_TYPE),
                ("x-amz-target", TARGET_PUT_RECORD),
            ],
            &body,
            &SigningParams {
                credentials: &credentials,
                region: &self.region,
                service: "kinesis",
                time: Utc::now(),
            },
        )?;

        let request = self
            .http
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header("x-amz-target", TARGET_PUT_RECORD)
            .body(body);
        let response = signature.apply(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let parsed: Option<ServiceErrorBody> = serde_json::from_str(&text).ok();
            let (error_type, message) = match parsed {
                Some(body) => (
                    body.error_type.unwrap_or_else(|| "Unknown".to_string()),
                    body.message.unwrap_or_default(),
                ),
                None => ("Unknown".to_string(), text),
            };
            return Err(StreamError::Service {
                status: status.as_u16(),
                error_type,
                message,
            });
        }

        let output: PutRecordOutput = response.json().await?;
        debug!(
            "Record stored in {} at {}",
            output.shard_id, output.sequence_number
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::aws::credentials::Credentials;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> KinesisClient {
        KinesisClient::new(
            KinesisConfig {
                region: "ap-south-1".to_string(),
                stream_name: "hr-kinesis-stream".to_string(),
                endpoint: Some(server.uri()),
            },
            CredentialsProvider::Static(Credentials::new(
                "AKIDEXAMPLE",
                "secret",
                Some("token".to_string()),
            )),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_put_record_request_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("x-amz-target", TARGET_PUT_RECORD))
            .and(header("content-type", CONTENT_TYPE))
            .and(header("x-amz-security-token", "token"))
            .and(header_exists("authorization"))
            .and(header_exists("x-amz-date"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ShardId": "shardId-000000000000",
                "SequenceNumber": "49590338271490256608559692538361571095921575989136588898"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let output = client(&server)
            .put_record(b"{\"heart_rate\":72}\n", "partition-key")
            .await
            .unwrap();
        assert_eq!(output.shard_id, "shardId-000000000000");

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["StreamName"], "hr-kinesis-stream");
        assert_eq!(body["PartitionKey"], "partition-key");
        assert_eq!(body["Data"], "eyJoZWFydF9yYXRlIjo3Mn0K");

        let auth = requests[0]
            .headers
            .get("authorization")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(auth.contains("/ap-south-1/kinesis/aws4_request"));
        assert!(auth.contains("SignedHeaders=content-type;host;x-amz-date;x-amz-security-token;x-amz-target"));
    }

    #[tokio::test]
    async fn test_service_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "__type": "ResourceNotFoundException",
                "message": "Stream hr-kinesis-stream under account 123456789012 not found."
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .put_record(b"{}\n", "partition-key")
            .await
            .unwrap_err();
        match err {
            StreamError::Service {
                status, error_type, ..
            } => {
                assert_eq!(status, 400);
                assert_eq!(error_type, "ResourceNotFoundException");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_default_endpoint_is_regional() {
        let client = KinesisClient::new(
            KinesisConfig {
                region: "ap-south-1".to_string(),
                stream_name: "s".to_string(),
                endpoint: None,
            },
            CredentialsProvider::Environment,
        )
        .unwrap();
        assert_eq!(
            client.endpoint.as_str(),
            "https://kinesis.ap-south-1.amazonaws.com/"
        );
    }
}
