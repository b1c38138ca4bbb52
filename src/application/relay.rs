//! Stream Relay Handler
//!
//! Copies every record of a stream-trigger batch into the search index, one
//! signed POST per record, strictly in order.

use crate::domain::models::{HandlerResponse, StreamEvent};
use crate::domain::settings::{PartialFailurePolicy, Settings};
use crate::infrastructure::aws::credentials::CredentialsProvider;
use crate::infrastructure::aws::opensearch::{IndexClient, IndexConfig, IndexError};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Record {sequence}: payload is not valid base64: {source}")]
    Decode {
        sequence: String,
        source: base64::DecodeError,
    },
    #[error("Record {sequence}: payload is not valid JSON: {source}")]
    Parse {
        sequence: String,
        source: serde_json::Error,
    },
    #[error("Record {sequence}: {source}")]
    Index {
        sequence: String,
        source: IndexError,
    },
}

pub struct RelayHandler {
    index: IndexClient,
    credentials: CredentialsProvider,
    on_partial_failure: PartialFailurePolicy,
}

impl RelayHandler {
    pub fn new(
        index: IndexClient,
        credentials: CredentialsProvider,
        on_partial_failure: PartialFailurePolicy,
    ) -> Self {
        Self {
            index,
            credentials,
            on_partial_failure,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        credentials: CredentialsProvider,
    ) -> Result<Self, IndexError> {
        let index = IndexClient::new(IndexConfig {
            domain: settings.relay.opensearch_domain.clone(),
            index_name: settings.relay.index_name.clone(),
            region: settings.aws.region.clone(),
            service: settings.relay.signing_service.clone(),
        })?;
        Ok(Self::new(
            index,
            credentials,
            settings.relay.on_partial_failure,
        ))
    }

    /// Relay one batch.
    ///
    /// A record that fails to decode or parse aborts the rest of the batch,
    /// as does a transport failure. Index rejections (non-2xx) are logged and
    /// only change the response under [`PartialFailurePolicy::Report`].
    pub async fn handle(&self, event: StreamEvent) -> Result<HandlerResponse, RelayError> {
        self.log_identity();

        let total = event.records.len();
        let mut rejected = 0;

        for record in &event.records {
            let sequence = record.sequence_number().to_string();
            debug!(
                "Record {} (event {}, source {})",
                sequence,
                record.event_id.as_deref().unwrap_or("-"),
                record.event_source_arn.as_deref().unwrap_or("-")
            );

            let payload = record
                .decode_payload()
                .map_err(|source| RelayError::Decode {
                    sequence: sequence.clone(),
                    source,
                })?;

            let document: serde_json::Value =
                serde_json::from_slice(&payload).map_err(|source| RelayError::Parse {
                    sequence: sequence.clone(),
                    source,
                })?;
            info!("Decoded data: {}", document);

            info!("Sending to URL: {}", self.index.document_url());
            let response = self
                .index
                .index_document(&document, &self.credentials)
                .await
                .map_err(|source| RelayError::Index {
                    sequence: sequence.clone(),
                    source,
                })?;
            info!("OpenSearch response: {} {}", response.status, response.body);

            if !response.is_success() {
                rejected += 1;
                warn!(
                    "Record {} rejected by the index with status {}",
                    sequence, response.status
                );
            }
        }

        match self.on_partial_failure {
            PartialFailurePolicy::Report if rejected > 0 => {
                Ok(HandlerResponse::rejected(rejected, total))
            }
            _ => Ok(HandlerResponse::processed()),
        }
    }

    fn log_identity(&self) {
        match self.credentials.resolve() {
            Ok(credentials) => info!(
                "Access Key: {} (from {})",
                credentials.masked_access_key(),
                self.credentials.describe()
            ),
            Err(e) => warn!("Credentials unavailable: {}", e),
        }
    }
}
