//! Lambda Runtime API client
//!
//! Polls the runtime for invocations and reports results back. See the
//! "Custom runtime" section of the Lambda developer guide for the protocol.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, error, info};

const API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("AWS_LAMBDA_RUNTIME_API is not set; not running inside Lambda")]
    NotInLambda,
    #[error("Runtime API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invocation is missing the Lambda-Runtime-Aws-Request-Id header")]
    MissingRequestId,
    #[error("Runtime API answered {status} to {call}")]
    Status { call: &'static str, status: u16 },
}

/// Error document understood by the runtime
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDocument {
    pub error_message: String,
    pub error_type: String,
}

impl ErrorDocument {
    pub fn from_error(error_type: &str, err: &anyhow::Error) -> Self {
        Self {
            error_message: format!("{:#}", err),
            error_type: error_type.to_string(),
        }
    }
}

/// One event handed out by the runtime
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: String,
    pub payload: Vec<u8>,
}

pub struct RuntimeApiClient {
    http: reqwest::Client,
    base: String,
}

impl RuntimeApiClient {
    /// `api` is the `host:port` from `AWS_LAMBDA_RUNTIME_API`
    pub fn new(api: &str) -> Self {
        let api = api.trim_end_matches('/');
        let base = if api.starts_with("http://") || api.starts_with("https://") {
            format!("{}/{}/runtime", api, API_VERSION)
        } else {
            format!("http://{}/{}/runtime", api, API_VERSION)
        };
        Self {
            http: reqwest::Client::new(),
            base,
        }
    }

    pub fn from_env() -> Result<Self, RuntimeError> {
        let api = std::env::var("AWS_LAMBDA_RUNTIME_API").map_err(|_| RuntimeError::NotInLambda)?;
        Ok(Self::new(&api))
    }

    /// Block until the next event arrives
    pub async fn next_invocation(&self) -> Result<Invocation, RuntimeError> {
        let response = self
            .http
            .get(format!("{}/invocation/next", self.base))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RuntimeError::Status {
                call: "invocation/next",
                status: response.status().as_u16(),
            });
        }

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(RuntimeError::MissingRequestId)?;
        let payload = response.bytes().await?.to_vec();

        Ok(Invocation {
            request_id,
            payload,
        })
    }

    pub async fn send_response<T: Serialize>(
        &self,
        request_id: &str,
        body: &T,
    ) -> Result<(), RuntimeError> {
        let url = format!("{}/invocation/{}/response", self.base, request_id);
        self.post("invocation/response", &url, body).await
    }

    pub async fn send_error(
        &self,
        request_id: &str,
        error: &ErrorDocument,
    ) -> Result<(), RuntimeError> {
        let url = format!("{}/invocation/{}/error", self.base, request_id);
        self.post("invocation/error", &url, error).await
    }

    pub async fn send_init_error(&self, error: &ErrorDocument) -> Result<(), RuntimeError> {
        let url = format!("{}/init/error", self.base);
        self.post("init/error", &url, error).await
    }

    async fn post<T: Serialize>(
        &self,
        call: &'static str,
        url: &str,
        body: &T,
    ) -> Result<(), RuntimeError> {
        let response = self.http.post(url).json(body).send().await?;
        if !response.status().is_success() {
            return Err(RuntimeError::Status {
                call,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Fetch one invocation, run `handler` on it and report the outcome
    pub async fn serve_one<E, R, F, Fut>(&self, handler: &F) -> Result<(), RuntimeError>
    where
        E: DeserializeOwned,
        R: Serialize,
        F: Fn(E) -> Fut,
        Fut: Future<Output = anyhow::Result<R>>,
    {
        let invocation = self.next_invocation().await?;
        debug!("Invocation {} received", invocation.request_id);

        let event: E = match serde_json::from_slice(&invocation.payload) {
            Ok(event) => event,
            Err(e) => {
                error!("Invocation {}: invalid event: {}", invocation.request_id, e);
                let doc = ErrorDocument {
                    error_message: e.to_string(),
                    error_type: "Runtime.InvalidEvent".to_string(),
                };
                return self.send_error(&invocation.request_id, &doc).await;
            }
        };

        match handler(event).await {
            Ok(response) => self.send_response(&invocation.request_id, &response).await,
            Err(e) => {
                error!("Invocation {} failed: {:#}", invocation.request_id, e);
                let doc = ErrorDocument::from_error("HandlerError", &e);
                self.send_error(&invocation.request_id, &doc).await
            }
        }
    }

    /// Serve invocations until the runtime stops answering
    pub async fn run<E, R, F, Fut>(&self, handler: F) -> Result<(), RuntimeError>
    where
        E: DeserializeOwned,
        R: Serialize,
        F: Fn(E) -> Fut,
        Fut: Future<Output = anyhow::Result<R>>,
    {
        info!("Serving invocations from {}", self.base);
        loop {
            self.serve_one(&handler).await?;
        }
    }
}
