//! HTTP sender for signed webhook deliveries.
//!
//! Builds the signed POST, executes it with a timeout over one shared
//! connection-pooled client, and reports an outcome record: status
//! code, response-body prefix, wall-clock latency, and a transport
//! error string. Classification of the outcome belongs to the retry
//! policy — the sender never interprets status codes.

use std::time::{Duration, Instant};

use piperelay_core::MAX_RESPONSE_BODY_BYTES;
use reqwest::header;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{DeliveryError, Result},
    signing,
};

/// Configuration for the delivery sender.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Per-request timeout covering connect, send, and body read.
    pub timeout: Duration,
    /// User agent advertised to receivers.
    pub user_agent: String,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), user_agent: "PipeRelay/1.0".to_string() }
    }
}

/// Record of one send execution.
///
/// This maps one-to-one onto an attempt row. Transport failures (DNS,
/// connect, TLS, timeout, cancellation) set `error` and leave
/// `status_code` at 0; an HTTP response of any status is a transport
/// success with an empty `error`.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// HTTP status code, 0 if no response was received.
    pub status_code: u16,
    /// First kilobyte of the response body.
    pub response_body: String,
    /// Wall-clock latency from just before signing to just after the
    /// body prefix was read, in milliseconds.
    pub latency_ms: i64,
    /// Transport error description. Empty on transport success.
    pub error: String,
}

impl SendOutcome {
    fn transport_failure(error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status_code: 0,
            response_body: String::new(),
            latency_ms: latency_ms(elapsed),
            error: error.into(),
        }
    }
}

fn latency_ms(elapsed: Duration) -> i64 {
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}

/// Shared HTTP client for webhook delivery.
///
/// Safe for concurrent use; all workers send through one instance.
#[derive(Debug, Clone)]
pub struct Sender {
    client: reqwest::Client,
}

impl Sender {
    /// Creates a sender with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot
    /// be built.
    pub fn new(config: SenderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| DeliveryError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Creates a sender with default configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(SenderConfig::default())
    }

    /// Executes one signed delivery.
    ///
    /// The payload is sent verbatim as the request body. Cancellation is
    /// reported as a transport failure so the attempt record and retry
    /// classification stay uniform.
    pub async fn send(
        &self,
        url: &str,
        secret: &str,
        message_id: &str,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> SendOutcome {
        let start = Instant::now();

        let signed = signing::sign(secret, payload);

        let request = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-PipeRelay-ID", message_id)
            .header("X-PipeRelay-Timestamp", signed.timestamp.to_string())
            .header("X-PipeRelay-Signature", &signed.signature)
            .body(payload.to_vec());

        let response = tokio::select! {
            () = cancel.cancelled() => {
                return SendOutcome::transport_failure("request cancelled", start.elapsed());
            }
            result = request.send() => match result {
                Ok(response) => response,
                Err(e) => {
                    return SendOutcome::transport_failure(
                        format!("request failed: {e}"),
                        start.elapsed(),
                    );
                }
            },
        };

        let status_code = response.status().as_u16();
        let response_body = tokio::select! {
            () = cancel.cancelled() => String::new(),
            body = read_body_prefix(response) => body,
        };

        let outcome = SendOutcome {
            status_code,
            response_body,
            latency_ms: latency_ms(start.elapsed()),
            error: String::new(),
        };

        debug!(
            message_id,
            status_code = outcome.status_code,
            latency_ms = outcome.latency_ms,
            "webhook send completed"
        );

        outcome
    }
}

/// Reads at most [`MAX_RESPONSE_BODY_BYTES`] of the response body; the
/// remainder is discarded. A read error after the status line is not a
/// transport failure — whatever was collected is kept.
async fn read_body_prefix(mut response: reqwest::Response) -> String {
    let mut collected: Vec<u8> = Vec::new();

    while collected.len() < MAX_RESPONSE_BODY_BYTES {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let remaining = MAX_RESPONSE_BODY_BYTES - collected.len();
                collected.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
            },
            Ok(None) | Err(_) => break,
        }
    }

    String::from_utf8_lossy(&collected).into_owned()
}
