//! AWS credential resolution
//!
//! Only the static sources are supported: explicit keys, the standard
//! environment variables and the shared credentials file. Nothing here
//! refreshes or assumes roles.

use config::{Config, File, FileFormat};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("Environment variable {0} is not set")]
    MissingVariable(&'static str),
    #[error("Could not determine the shared credentials file location")]
    NoCredentialsFile,
    #[error("Could not read credentials file {path}: {source}")]
    File {
        path: PathBuf,
        source: config::ConfigError,
    },
    #[error("Profile [{0}] has no aws_access_key_id/aws_secret_access_key")]
    IncompleteProfile(String),
    #[error("No credentials found (environment: {env}; profile: {profile})")]
    NotFound { env: String, profile: String },
}

/// Session credentials used for request signing
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// Access key id safe for logs: first 4 characters only
    pub fn masked_access_key(&self) -> String {
        let prefix: String = self.access_key_id.chars().take(4).collect();
        format!("{}****", prefix)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.masked_access_key())
            .field("secret_access_key", &"****")
            .field("session_token", &self.session_token.as_ref().map(|_| "****"))
            .finish()
    }
}

/// Where credentials come from. Resolved on every use.
#[derive(Debug, Clone)]
pub enum CredentialsProvider {
    Static(Credentials),
    /// `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN`
    Environment,
    /// Shared credentials file (INI)
    Profile {
        path: Option<PathBuf>,
        profile: Option<String>,
    },
    /// Environment first, then the shared credentials file
    Default { profile: Option<String> },
}

impl CredentialsProvider {
    pub fn resolve(&self) -> Result<Credentials, CredentialsError> {
        match self {
            Self::Static(credentials) => Ok(credentials.clone()),
            Self::Environment => from_env(),
            Self::Profile { path, profile } => from_profile(path.clone(), profile.as_deref()),
            Self::Default { profile } => match from_env() {
                Ok(credentials) => Ok(credentials),
                Err(env_err) => from_profile(None, profile.as_deref()).map_err(|profile_err| {
                    CredentialsError::NotFound {
                        env: env_err.to_string(),
                        profile: profile_err.to_string(),
                    }
                }),
            },
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Static(_) => "static",
            Self::Environment => "environment",
            Self::Profile { .. } => "profile",
            Self::Default { .. } => "default chain",
        }
    }
}

fn env_var(name: &'static str) -> Result<String, CredentialsError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(CredentialsError::MissingVariable(name))
}

fn from_env() -> Result<Credentials, CredentialsError> {
    Ok(Credentials {
        access_key_id: env_var("AWS_ACCESS_KEY_ID")?,
        secret_access_key: env_var("AWS_SECRET_ACCESS_KEY")?,
        session_token: env_var("AWS_SESSION_TOKEN").ok(),
    })
}

fn credentials_file_path() -> Result<PathBuf, CredentialsError> {
    if let Ok(path) = env_var("AWS_SHARED_CREDENTIALS_FILE") {
        return Ok(PathBuf::from(path));
    }
    let mut path = dirs::home_dir().ok_or(CredentialsError::NoCredentialsFile)?;
    path.push(".aws");
    path.push("credentials");
    Ok(path)
}

fn from_profile(
    path: Option<PathBuf>,
    profile: Option<&str>,
) -> Result<Credentials, CredentialsError> {
    let path = match path {
        Some(path) => path,
        None => credentials_file_path()?,
    };
    let profile = match profile {
        Some(profile) => profile.to_string(),
        None => env_var("AWS_PROFILE").unwrap_or_else(|_| "default".to_string()),
    };

    let file = Config::builder()
        .add_source(File::from(path.as_path()).format(FileFormat::Ini))
        .build()
        .map_err(|source| CredentialsError::File {
            path: path.clone(),
            source,
        })?;

    let get = |key: &str| file.get_string(&format!("{}.{}", profile, key)).ok();

    match (get("aws_access_key_id"), get("aws_secret_access_key")) {
        (Some(access_key_id), Some(secret_access_key)) => Ok(Credentials {
            access_key_id,
            secret_access_key,
            session_token: get("aws_session_token"),
        }),
        _ => Err(CredentialsError::IncompleteProfile(profile)),
    }
}
