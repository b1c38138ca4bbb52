use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::infrastructure::aws::credentials::CredentialsProvider;
use crate::infrastructure::bluetooth::protocol::{BpmEncoding, HEART_RATE_MEASUREMENT_UUID};

/// Prefix for environment overrides, e.g. `HR_TELEMETRY_RELAY__INDEX_NAME`
pub const ENV_PREFIX: &str = "HR_TELEMETRY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "hr_telemetry".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Where request-signing credentials are read from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialsSource {
    /// Environment variables, then the shared credentials file
    #[default]
    Default,
    Environment,
    Profile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsSettings {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub credentials_source: CredentialsSource,
    /// Shared-credentials profile; `AWS_PROFILE` or "default" when unset
    #[serde(default)]
    pub profile: Option<String>,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            region: default_region(),
            credentials_source: CredentialsSource::default(),
            profile: None,
        }
    }
}

impl AwsSettings {
    pub fn credentials_provider(&self) -> CredentialsProvider {
        match self.credentials_source {
            CredentialsSource::Default => CredentialsProvider::Default {
                profile: self.profile.clone(),
            },
            CredentialsSource::Environment => CredentialsProvider::Environment,
            CredentialsSource::Profile => CredentialsProvider::Profile {
                path: None,
                profile: self.profile.clone(),
            },
        }
    }
}

fn default_region() -> String {
    "ap-south-1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherSettings {
    #[serde(default = "default_device_address")]
    pub device_address: String,
    #[serde(default = "default_characteristic_uuid")]
    pub characteristic_uuid: String,
    #[serde(default)]
    pub bpm_encoding: BpmEncoding,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    #[serde(default = "default_partition_key")]
    pub partition_key: String,
    /// Use the device address as partition key instead of `partition_key`
    #[serde(default = "default_false")]
    pub partition_by_device: bool,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Overrides `https://kinesis.{region}.amazonaws.com`
    #[serde(default)]
    pub kinesis_endpoint: Option<String>,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            device_address: default_device_address(),
            characteristic_uuid: default_characteristic_uuid(),
            bpm_encoding: BpmEncoding::default(),
            stream_name: default_stream_name(),
            partition_key: default_partition_key(),
            partition_by_device: default_false(),
            duration_secs: default_duration_secs(),
            queue_capacity: default_queue_capacity(),
            kinesis_endpoint: None,
        }
    }
}

impl PublisherSettings {
    /// Partition key passed to every publish call of a run.
    pub fn resolved_partition_key(&self) -> String {
        if self.partition_by_device {
            self.device_address.clone()
        } else {
            self.partition_key.clone()
        }
    }
}

fn default_device_address() -> String {
    "D4:4A:C4:B0:24:03".to_string()
}
fn default_characteristic_uuid() -> String {
    HEART_RATE_MEASUREMENT_UUID.to_string()
}
fn default_stream_name() -> String {
    "hr-kinesis-stream".to_string()
}
fn default_partition_key() -> String {
    "partition-key".to_string()
}
fn default_duration_secs() -> u64 {
    900
}
fn default_queue_capacity() -> usize {
    64
}

/// What the relay reports when the index rejects documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialFailurePolicy {
    /// Always answer 200 once the batch has been walked
    #[default]
    Ignore,
    /// Answer 502 when any document got a non-2xx status
    Report,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_opensearch_domain")]
    pub opensearch_domain: String,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    #[serde(default = "default_signing_service")]
    pub signing_service: String,
    #[serde(default)]
    pub on_partial_failure: PartialFailurePolicy,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            opensearch_domain: default_opensearch_domain(),
            index_name: default_index_name(),
            signing_service: default_signing_service(),
            on_partial_failure: PartialFailurePolicy::default(),
        }
    }
}

fn default_opensearch_domain() -> String {
    "https://search-garmin-hr-data.ap-south-1.es.amazonaws.com".to_string()
}
fn default_index_name() -> String {
    "heart_rate".to_string()
}
fn default_signing_service() -> String {
    "es".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub aws: AwsSettings,
    #[serde(default)]
    pub publisher: PublisherSettings,
    #[serde(default)]
    pub relay: RelaySettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load settings from `path` (or the per-user default location), then
    /// apply environment overrides.
    pub fn new(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let settings_path = match path {
            Some(path) => path,
            None => Self::get_settings_path()?,
        };
        let settings = Self::load(&settings_path, std::env::vars())?;

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("hr-telemetry");
        path.push("settings.json");
        Ok(path)
    }

    /// Layer the JSON file (when present) under variables from `vars`.
    fn load<I>(path: &Path, vars: I) -> anyhow::Result<Settings>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();

        let mut builder = Config::builder();
        if path.exists() {
            builder = builder.add_source(File::from(path).format(FileFormat::Json));
        }

        let overrides = vars
            .iter()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .cloned()
            .collect();
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(overrides)),
        );

        let mut settings: Settings = builder.build()?.try_deserialize()?;

        // Lambda exports the region it runs in.
        if let Some((_, region)) = vars.iter().find(|(key, _)| key == "AWS_REGION") {
            if !region.is_empty() {
                settings.aws.region = region.clone();
            }
        }

        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn into_settings(self) -> Settings {
        self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env() -> Vec<(String, String)> {
        Vec::new()
    }

    #[test]
    fn test_defaults_match_deployment_constants() {
        let settings = Settings::default();
        assert_eq!(settings.aws.region, "ap-south-1");
        assert_eq!(settings.publisher.device_address, "D4:4A:C4:B0:24:03");
        assert_eq!(settings.publisher.stream_name, "hr-kinesis-stream");
        assert_eq!(settings.publisher.resolved_partition_key(), "partition-key");
        assert_eq!(settings.publisher.duration_secs, 900);
        assert_eq!(settings.publisher.bpm_encoding, BpmEncoding::Uint8);
        assert_eq!(settings.relay.index_name, "heart_rate");
        assert_eq!(settings.relay.on_partial_failure, PartialFailurePolicy::Ignore);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsService::load(&dir.path().join("absent.json"), no_env()).unwrap();
        assert_eq!(settings.publisher.stream_name, "hr-kinesis-stream");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{ "publisher": { "stream_name": "other-stream", "bpm_encoding": "flag_aware" } }"#,
        )
        .unwrap();

        let settings = SettingsService::load(&path, no_env()).unwrap();
        assert_eq!(settings.publisher.stream_name, "other-stream");
        assert_eq!(settings.publisher.bpm_encoding, BpmEncoding::FlagAware);
        assert_eq!(settings.publisher.partition_key, "partition-key");
        assert_eq!(settings.relay.index_name, "heart_rate");
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "relay": { "index_name": "from_file" } }"#).unwrap();

        let env = vec![
            (
                "HR_TELEMETRY_RELAY__INDEX_NAME".to_string(),
                "from_env".to_string(),
            ),
            (
                "HR_TELEMETRY_RELAY__ON_PARTIAL_FAILURE".to_string(),
                "report".to_string(),
            ),
            ("AWS_REGION".to_string(), "eu-west-1".to_string()),
        ];
        let settings = SettingsService::load(&path, env).unwrap();
        assert_eq!(settings.relay.index_name, "from_env");
        assert_eq!(settings.relay.on_partial_failure, PartialFailurePolicy::Report);
        assert_eq!(settings.aws.region, "eu-west-1");
    }

    #[test]
    fn test_credentials_source_selects_provider() {
        let mut aws = AwsSettings::default();
        assert!(matches!(
            aws.credentials_provider(),
            CredentialsProvider::Default { profile: None }
        ));

        aws.credentials_source = CredentialsSource::Profile;
        aws.profile = Some("garmin".to_string());
        assert!(matches!(
            aws.credentials_provider(),
            CredentialsProvider::Profile { path: None, profile: Some(ref p) } if p == "garmin"
        ));
    }

    #[test]
    fn test_partition_by_device() {
        let mut publisher = PublisherSettings::default();
        publisher.partition_by_device = true;
        assert_eq!(publisher.resolved_partition_key(), "D4:4A:C4:B0:24:03");
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut service = SettingsService {
            settings: Settings::default(),
            settings_path: path.clone(),
        };
        service.get_mut().publisher.duration_secs = 60;
        service.save().unwrap();

        let loaded = SettingsService::load(&path, no_env()).unwrap();
        assert_eq!(loaded.publisher.duration_secs, 60);
    }
}
