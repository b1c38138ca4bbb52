//! Heart Rate Publisher
//!
//! Wires the BLE notification stream to the record stream:
//!
//! ```text
//! BLE frames ──► pump task ──► bounded queue ──► publishing task ──► Kinesis
//!               (parse, stamp)   (drop when full)   (one PutRecord at a time)
//! ```

use crate::domain::models::HeartRateSample;
use crate::domain::settings::Settings;
use crate::infrastructure::aws::credentials::CredentialsProvider;
use crate::infrastructure::aws::kinesis::{
    KinesisClient, KinesisConfig, PutRecordOutput, RecordSink, StreamError,
};
use crate::infrastructure::bluetooth::connection::{BleConnection, ConnectionConfig};
use crate::infrastructure::bluetooth::protocol::{self, BpmEncoding};
use anyhow::{Context, Result};
use futures::stream::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Serializes samples and writes them to a record sink
pub struct HeartRatePublisher<S> {
    sink: S,
}

impl<S: RecordSink> HeartRatePublisher<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Write one sample as a single record under `partition_key`
    pub async fn publish(
        &self,
        sample: &HeartRateSample,
        partition_key: &str,
    ) -> Result<PutRecordOutput, StreamError> {
        let data = sample.to_record_bytes()?;
        info!(
            "Sending to Kinesis: heart_rate={} timestamp={}",
            sample.heart_rate, sample.timestamp
        );
        self.sink.put_record(&data, partition_key).await
    }

    /// Publish queued samples until the queue closes. Stops at the first failure.
    pub async fn drain(
        &self,
        mut queue: mpsc::Receiver<HeartRateSample>,
        partition_key: &str,
    ) -> Result<usize, StreamError> {
        let mut published = 0;
        while let Some(sample) = queue.recv().await {
            self.publish(&sample, partition_key).await?;
            published += 1;
        }
        Ok(published)
    }
}

/// What the notification pump saw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub forwarded: usize,
    /// Samples dropped because the queue was full
    pub dropped: usize,
    /// Frames that could not be parsed
    pub rejected: usize,
    /// Frames declaring 16-bit values while only the low byte is read
    pub truncated: usize,
}

/// Parse frames into samples and queue them without ever waiting on the queue.
///
/// Ends when the frame stream ends, the queue closes, or `stop` fires.
pub async fn forward_notifications<St>(
    mut frames: St,
    queue: mpsc::Sender<HeartRateSample>,
    encoding: BpmEncoding,
    mut stop: oneshot::Receiver<()>,
) -> PumpStats
where
    St: Stream<Item = Vec<u8>> + Unpin,
{
    let mut stats = PumpStats::default();

    loop {
        let frame = tokio::select! {
            biased;
            _ = &mut stop => break,
            frame = frames.next() => match frame {
                Some(frame) => frame,
                None => {
                    warn!("Notification stream ended");
                    break;
                }
            },
        };

        let measurement = match protocol::parse_measurement(&frame, encoding) {
            Ok(m) => m,
            Err(e) => {
                warn!("Ignoring notification {:02X?}: {}", frame, e);
                stats.rejected += 1;
                continue;
            }
        };

        if encoding == BpmEncoding::Uint8 && measurement.declares_uint16() {
            stats.truncated += 1;
            if stats.truncated == 1 {
                warn!(
                    "Device reports 16-bit heart rate values (flags {:#04X}); only the low byte is read. \
                     Set publisher.bpm_encoding = \"flag_aware\" to decode them.",
                    measurement.flags
                );
            }
        }

        let sample = HeartRateSample::now(measurement.bpm);
        info!("Heart Rate: {} bpm", sample.heart_rate);

        match queue.try_send(sample) {
            Ok(()) => stats.forwarded += 1,
            Err(mpsc::error::TrySendError::Full(sample)) => {
                stats.dropped += 1;
                warn!(
                    "Publish queue full, dropping {} bpm sample ({} dropped so far)",
                    sample.heart_rate, stats.dropped
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Publish queue closed");
                break;
            }
        }
    }

    stats
}

/// Totals of a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub published: usize,
    pub pump: PumpStats,
}

/// The two running tasks of a streaming session
pub struct Pipeline {
    stop: Option<oneshot::Sender<()>>,
    pump: JoinHandle<PumpStats>,
    publisher: Option<JoinHandle<Result<usize, StreamError>>>,
    published: Option<usize>,
}

impl Pipeline {
    pub fn start<St, S>(
        frames: St,
        publisher: HeartRatePublisher<S>,
        partition_key: String,
        encoding: BpmEncoding,
        queue_capacity: usize,
    ) -> Self
    where
        St: Stream<Item = Vec<u8>> + Unpin + Send + 'static,
        S: RecordSink + 'static,
    {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();

        let pump = tokio::spawn(forward_notifications(frames, tx, encoding, stop_rx));
        let publisher =
            tokio::spawn(async move { publisher.drain(rx, &partition_key).await });

        Self {
            stop: Some(stop_tx),
            pump,
            publisher: Some(publisher),
            published: None,
        }
    }

    /// Let samples flow for `duration`.
    ///
    /// Returns early with the error if publishing fails.
    pub async fn wait(&mut self, duration: Duration) -> Result<()> {
        let Some(publisher) = self.publisher.as_mut() else {
            return Ok(());
        };

        let joined = tokio::select! {
            _ = tokio::time::sleep(duration) => None,
            joined = publisher => Some(joined),
        };
        let Some(joined) = joined else {
            return Ok(());
        };

        self.publisher = None;
        let published = joined.context("Publishing task panicked")??;
        warn!("Publishing ended before the timer after {} records", published);
        self.published = Some(published);
        Ok(())
    }

    /// Stop the pump and publish whatever is still queued
    pub async fn finish(mut self) -> Result<RunSummary> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let pump = self.pump.await.context("Notification task panicked")?;

        let published = match self.publisher.take() {
            Some(handle) => handle.await.context("Publishing task panicked")??,
            None => self.published.unwrap_or_default(),
        };

        Ok(RunSummary { published, pump })
    }
}

/// Stream heart rate for the configured duration.
///
/// connect → subscribe → wait → unsubscribe → disconnect
pub async fn run(
    settings: &Settings,
    credentials: CredentialsProvider,
    duration: Duration,
) -> Result<RunSummary> {
    let publisher_settings = &settings.publisher;

    let sink = KinesisClient::new(
        KinesisConfig {
            region: settings.aws.region.clone(),
            stream_name: publisher_settings.stream_name.clone(),
            endpoint: publisher_settings.kinesis_endpoint.clone(),
        },
        credentials,
    )?;
    info!("Publishing to stream {}", sink.stream_name());

    let connection = BleConnection::connect(&ConnectionConfig {
        device_address: publisher_settings.device_address.clone(),
        characteristic_uuid: publisher_settings.characteristic_uuid.clone(),
    })
    .await
    .context("Failed to connect to heart rate device")?;

    let frames = connection
        .subscribe()
        .await
        .context("Failed to subscribe to heart rate notifications")?;

    let mut pipeline = Pipeline::start(
        frames,
        HeartRatePublisher::new(sink),
        publisher_settings.resolved_partition_key(),
        publisher_settings.bpm_encoding,
        publisher_settings.queue_capacity,
    );

    info!("Streaming heart rate for {} seconds...", duration.as_secs());
    pipeline.wait(duration).await?;

    connection.unsubscribe().await?;
    connection.disconnect().await;

    let summary = pipeline.finish().await?;
    info!(
        "Stopped streaming: {} published, {} dropped, {} unparseable, {} truncated to 8 bits",
        summary.published, summary.pump.dropped, summary.pump.rejected, summary.pump.truncated
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink {
        records: Arc<Mutex<Vec<(Vec<u8>, String)>>>,
        fail: bool,
    }

    #[async_trait]
    impl RecordSink for RecordingSink {
        async fn put_record(
            &self,
            data: &[u8],
            partition_key: &str,
        ) -> Result<PutRecordOutput, StreamError> {
            if self.fail {
                return Err(StreamError::Service {
                    status: 400,
                    error_type: "ResourceNotFoundException".to_string(),
                    message: "no such stream".to_string(),
                });
            }
            let mut records = self.records.lock().unwrap();
            records.push((data.to_vec(), partition_key.to_string()));
            Ok(PutRecordOutput {
                shard_id: "shardId-000000000000".to_string(),
                sequence_number: records.len().to_string(),
            })
        }
    }

    fn frames(list: Vec<Vec<u8>>) -> impl Stream<Item = Vec<u8>> + Unpin + Send + 'static {
        // Keep the stream open like a live BLE subscription.
        futures::stream::iter(list).chain(futures::stream::pending())
    }

    #[tokio::test]
    async fn test_partition_key_is_constant() {
        let sink = RecordingSink::default();
        let publisher = HeartRatePublisher::new(sink.clone());

        for bpm in 60..70 {
            publisher
                .publish(&HeartRateSample::now(bpm), "partition-key")
                .await
                .unwrap();
        }

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 10);
        assert!(records.iter().all(|(_, key)| key == "partition-key"));
        assert!(records.iter().all(|(data, _)| data.ends_with(b"\n")));
    }

    #[tokio::test]
    async fn test_pump_parses_and_skips_bad_frames() {
        let (tx, mut rx) = mpsc::channel(8);
        let (_stop_tx, stop_rx) = oneshot::channel();
        let stream = futures::stream::iter(vec![vec![0x00, 72], vec![0x00], vec![0x00, 80]]);

        let stats = forward_notifications(stream, tx, BpmEncoding::Uint8, stop_rx).await;
        assert_eq!(
            stats,
            PumpStats {
                forwarded: 2,
                dropped: 0,
                rejected: 1,
                truncated: 0,
            }
        );
        assert_eq!(rx.recv().await.unwrap().heart_rate, 72);
        assert_eq!(rx.recv().await.unwrap().heart_rate, 80);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_pump_reads_low_byte_of_wide_frames() {
        let (tx, mut rx) = mpsc::channel(8);
        let (_stop_tx, stop_rx) = oneshot::channel();
        // flags bit 0 set: 16-bit values 0x0148 and 0x0050
        let stream = futures::stream::iter(vec![vec![0x01, 0x48, 0x01], vec![0x01, 0x50, 0x00]]);

        let stats = forward_notifications(stream, tx, BpmEncoding::Uint8, stop_rx).await;
        assert_eq!(stats.forwarded, 2);
        assert_eq!(stats.truncated, 2);
        assert_eq!(rx.recv().await.unwrap().heart_rate, 0x48);
        assert_eq!(rx.recv().await.unwrap().heart_rate, 0x50);
    }

    #[tokio::test]
    async fn test_pump_decodes_wide_frames_when_flag_aware() {
        let (tx, mut rx) = mpsc::channel(8);
        let (_stop_tx, stop_rx) = oneshot::channel();
        let stream = futures::stream::iter(vec![vec![0x01, 0x48, 0x01]]);

        let stats = forward_notifications(stream, tx, BpmEncoding::FlagAware, stop_rx).await;
        assert_eq!(stats.forwarded, 1);
        assert_eq!(stats.truncated, 0);
        assert_eq!(rx.recv().await.unwrap().heart_rate, 0x0148);
    }

    #[tokio::test]
    async fn test_pump_drops_when_queue_full() {
        let (tx, _rx) = mpsc::channel(1);
        let (_stop_tx, stop_rx) = oneshot::channel();
        let stream = futures::stream::iter(vec![vec![0x00, 70], vec![0x00, 71], vec![0x00, 72]]);

        let stats = forward_notifications(stream, tx, BpmEncoding::Uint8, stop_rx).await;
        assert_eq!(stats.forwarded, 1);
        assert_eq!(stats.dropped, 2);
    }

    #[tokio::test]
    async fn test_pump_stops_on_signal() {
        let (tx, _rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = oneshot::channel();
        let pump = tokio::spawn(forward_notifications(
            frames(vec![]),
            tx,
            BpmEncoding::Uint8,
            stop_rx,
        ));

        stop_tx.send(()).unwrap();
        let stats = pump.await.unwrap();
        assert_eq!(stats, PumpStats::default());
    }

    #[tokio::test]
    async fn test_pipeline_publishes_until_timer() {
        let sink = RecordingSink::default();
        let mut pipeline = Pipeline::start(
            frames(vec![vec![0x00, 0x48], vec![0x00, 0x4a]]),
            HeartRatePublisher::new(sink.clone()),
            "partition-key".to_string(),
            BpmEncoding::Uint8,
            8,
        );

        pipeline.wait(Duration::from_millis(50)).await.unwrap();
        let summary = pipeline.finish().await.unwrap();
        assert_eq!(summary.published, 2);
        assert_eq!(summary.pump.forwarded, 2);

        let records = sink.records.lock().unwrap();
        let first: serde_json::Value = serde_json::from_slice(&records[0].0).unwrap();
        assert_eq!(first["heart_rate"], 72);
        assert!(first["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_publish_failure_ends_run() {
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let mut pipeline = Pipeline::start(
            frames(vec![vec![0x00, 0x48]]),
            HeartRatePublisher::new(sink),
            "partition-key".to_string(),
            BpmEncoding::Uint8,
            8,
        );

        let err = pipeline.wait(Duration::from_secs(30)).await.unwrap_err();
        assert!(err.to_string().contains("ResourceNotFoundException"));
    }
}
