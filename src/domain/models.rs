use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One heart-rate reading as it travels through the stream.
///
/// The relay forwards whatever JSON it decodes, so this shape is the only
/// contract between the two halves of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateSample {
    /// Processing time of the BLE notification (UTC)
    pub timestamp: DateTime<Utc>,
    /// Beats per minute
    pub heart_rate: u16,
}

impl HeartRateSample {
    /// Stamp a reading with the current UTC time.
    pub fn now(heart_rate: u16) -> Self {
        Self {
            timestamp: Utc::now(),
            heart_rate,
        }
    }

    /// Stream record payload: compact JSON followed by a newline.
    pub fn to_record_bytes(&self) -> serde_json::Result<Vec<u8>> {
        let mut data = serde_json::to_vec(self)?;
        data.push(b'\n');
        Ok(data)
    }
}

/// Batch delivered by the stream trigger.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StreamEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<StreamRecord>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    pub kinesis: KinesisData,
    #[serde(rename = "eventID", default)]
    pub event_id: Option<String>,
    #[serde(rename = "eventSourceARN", default)]
    pub event_source_arn: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KinesisData {
    /// Base64 of the bytes the producer wrote
    pub data: String,
    #[serde(default)]
    pub partition_key: Option<String>,
    #[serde(default)]
    pub sequence_number: Option<String>,
}

impl StreamRecord {
    /// Undo the transport encoding of the record payload.
    pub fn decode_payload(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(self.kinesis.data.as_bytes())
    }

    pub fn sequence_number(&self) -> &str {
        self.kinesis.sequence_number.as_deref().unwrap_or("-")
    }
}

/// Value returned to the trigger after a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerResponse {
    pub status_code: u16,
    pub body: String,
}

impl HandlerResponse {
    pub fn processed() -> Self {
        Self {
            status_code: 200,
            // The body is itself a JSON document holding a string.
            body: "\"Records processed and sent to OpenSearch\"".to_string(),
        }
    }

    pub fn rejected(failed: usize, total: usize) -> Self {
        Self {
            status_code: 502,
            body: format!("{} of {} records rejected by the index", failed, total),
        }
    }
}
