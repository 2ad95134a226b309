//! Browser-automation sidecar client.
//!
//! The sidecar owns the browser contexts and site scripts; this side only
//! ships the account and bet as JSON and classifies the answer.
//!
//! Request:  `POST {endpoint}/execute` `{ account, bet, otp? }`
//! Response: `{ success, retryable?, payout?, reference?, error? }`

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::otp::{reveal, OtpStore};
use super::{BetExecutor, Placement};
use crate::bookies::BookieConfig;
use crate::types::{BetRequest, ExecutionError};

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    account: &'a BookieConfig,
    bet: &'a BetRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    otp: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    success: bool,
    /// Failures are retryable unless the sidecar says otherwise.
    #[serde(default = "default_retryable")]
    retryable: bool,
    #[serde(default)]
    payout: Option<Decimal>,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn default_retryable() -> bool {
    true
}

pub struct HttpExecutor {
    http: Client,
    endpoint: String,
    otp: Arc<OtpStore>,
}

impl HttpExecutor {
    /// `request_timeout` bounds the HTTP exchange; the worker pool applies
    /// its own per-bet deadline on top.
    pub fn new(endpoint: impl Into<String>, otp: Arc<OtpStore>, request_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .user_agent("betrelay/0.1.0 (executor)")
            .build()
            .context("Failed to build HTTP client for executor sidecar")?;

        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            otp,
        })
    }
}

/// Map a sidecar answer onto a placement or a classified failure.
fn classify(status: StatusCode, body: &str) -> Result<Placement, ExecutionError> {
    if status.is_server_error() {
        return Err(ExecutionError::Transient(format!("sidecar returned {status}")));
    }
    if !status.is_success() {
        return Err(ExecutionError::Rejected(format!("sidecar returned {status}: {body}")));
    }

    let resp: ExecuteResponse = serde_json::from_str(body)
        .map_err(|e| ExecutionError::Transient(format!("unreadable sidecar response: {e}")))?;

    if resp.success {
        return Ok(Placement {
            payout: resp.payout,
            reference: resp.reference,
        });
    }

    let message = resp.error.unwrap_or_else(|| "bet not placed".to_string());
    if resp.retryable {
        Err(ExecutionError::Transient(message))
    } else {
        Err(ExecutionError::Rejected(message))
    }
}

#[async_trait]
impl BetExecutor for HttpExecutor {
    async fn execute(
        &self,
        account: &BookieConfig,
        bet: &BetRequest,
    ) -> Result<Placement, ExecutionError> {
        // The code is only consumed once the sidecar answers definitively,
        // so a retry after a transient failure can still log in.
        let code = if account.otp_required {
            let code = self.otp.peek(&account.name);
            if code.is_none() {
                warn!(bookie = %account.name, "OTP required but none received yet");
            }
            code
        } else {
            None
        };

        let body = ExecuteRequest {
            account,
            bet,
            otp: code.as_ref().map(reveal),
        };

        let resp = self
            .http
            .post(format!("{}/execute", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecutionError::Transient(format!("sidecar unreachable: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ExecutionError::Transient(format!("sidecar body read failed: {e}")))?;

        debug!(bookie = %account.name, bet_id = %bet.bet_id, %status, "Sidecar answered");
        let outcome = classify(status, &text);
        if let Some(code) = &code {
            if !matches!(outcome, Err(ExecutionError::Transient(_))) {
                self.otp.consume(&account.name, code);
            }
        }
        outcome
    }
}
