//! Multi-instance JSON-RPC fan-out client for the coin daemons that back the
//! pool. Mirrors the wire shapes of the teacher's own JSON-RPC server
//! (`JsonRpcRequest`/`JsonRpcResponse`/`JsonRpcError`, formerly in `rpc/src/lib.rs`)
//! but from the client side: this crate issues requests instead of answering
//! them.

use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One configured coin daemon endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonInstance {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl DaemonInstance {
    fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Errors one RPC call against a single daemon instance can produce.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// `ECONNREFUSED` or any other transport-level failure to even reach the
    /// daemon.
    #[error("daemon offline: {0}")]
    Offline(String),

    /// A transport error other than connection-refused (timeout, reset,
    /// DNS failure, ...).
    #[error("request error: {0}")]
    RequestError(String),

    /// HTTP 401 — credentials rejected. Logged once per call; callers do not
    /// retry this instance for the current command.
    #[error("unauthorized RPC access")]
    Unauthorized,

    /// The daemon answered with a well-formed JSON-RPC error object.
    #[error("daemon rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// The response body was not valid JSON (even after the `:-nan` repair
    /// pass).
    #[error("malformed daemon response: {0}")]
    MalformedResponse(String),
}

impl DaemonError {
    /// The numeric JSON-RPC error code, if this variant carries one. `-10`
    /// is the daemon's well-known "chain not synced" signal on
    /// `getblocktemplate`.
    pub fn rpc_code(&self) -> Option<i32> {
        match self {
            DaemonError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: i64,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<JsonRpcErrorBody>,
    #[allow(dead_code)]
    id: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i32,
    message: String,
}

/// Generates the quirky request id the reference pool uses: current epoch
/// millis, plus a single random digit, plus an optional per-call index (used
/// to keep ids distinct within one batch).
fn next_id(index: Option<usize>) -> i64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let jitter: i64 = rand::thread_rng().gen_range(0..=9);
    millis + jitter + index.map(|i| i as i64).unwrap_or(0)
}

/// Daemons occasionally emit the non-finite float literal `-nan` inside a
/// numeric field (`":-nan"`), which is not valid JSON. Substituting `:0`
/// lets `serde_json` parse the rest of an otherwise well-formed response.
fn repair_nan(body: &str) -> std::borrow::Cow<'_, str> {
    if body.contains(":-nan") {
        std::borrow::Cow::Owned(body.replace(":-nan", ":0"))
    } else {
        std::borrow::Cow::Borrowed(body)
    }
}

fn parse_response(body: &str) -> Result<Value, DaemonError> {
    let repaired = repair_nan(body);
    let parsed: JsonRpcResponse =
        serde_json::from_str(&repaired).map_err(|e| DaemonError::MalformedResponse(e.to_string()))?;
    if let Some(err) = parsed.error {
        return Err(DaemonError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    Ok(parsed.result)
}

/// Fans JSON-RPC calls out across an ordered list of daemon instances.
pub struct DaemonClient {
    instances: Vec<DaemonInstance>,
    http: reqwest::Client,
}

impl DaemonClient {
    pub fn new(instances: Vec<DaemonInstance>) -> Self {
        Self {
            instances,
            http: reqwest::Client::new(),
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    async fn call_one(
        &self,
        instance: &DaemonInstance,
        method: &str,
        params: Vec<Value>,
        id: i64,
    ) -> Result<Value, DaemonError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        debug!("daemon {} <- {} (id {})", instance.url(), method, id);

        let response = self
            .http
            .post(instance.url())
            .basic_auth(&instance.user, Some(&instance.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    DaemonError::Offline(e.to_string())
                } else {
                    DaemonError::RequestError(e.to_string())
                }
            })?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            warn!("Unauthorized RPC access to {}", instance.url());
            return Err(DaemonError::Unauthorized);
        }

        let body = response
            .text()
            .await
            .map_err(|e| DaemonError::RequestError(e.to_string()))?;

        parse_response(&body)
    }

    /// Broadcasts one JSON-RPC call to every configured instance in
    /// parallel. Results are returned in the same order as the configured
    /// instance list.
    pub async fn cmd(&self, method: &str, params: Vec<Value>) -> Vec<Result<Value, DaemonError>> {
        let futures = self.instances.iter().enumerate().map(|(i, instance)| {
            let id = next_id(Some(i));
            let params = params.clone();
            async move { self.call_one(instance, method, params, id).await }
        });

        futures::future::join_all(futures).await
    }

    /// Sends one JSON-RPC batch request (array of `{method, params}` pairs)
    /// to the first configured instance only, returning the result array in
    /// the same order the calls were given.
    pub async fn batch_cmd(
        &self,
        calls: Vec<(&str, Vec<Value>)>,
    ) -> Result<Vec<Value>, DaemonError> {
        let instance = self
            .instances
            .first()
            .ok_or_else(|| DaemonError::Offline("no daemon instances configured".to_string()))?;

        let id = next_id(None);
        let batch: Vec<JsonRpcRequest> = calls
            .iter()
            .enumerate()
            .map(|(i, (method, params))| JsonRpcRequest {
                jsonrpc: "2.0",
                id: id + i as i64,
                method: *method,
                params: params.clone(),
            })
            .collect();

        let response = self
            .http
            .post(instance.url())
            .basic_auth(&instance.user, Some(&instance.password))
            .json(&batch)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    DaemonError::Offline(e.to_string())
                } else {
                    DaemonError::RequestError(e.to_string())
                }
            })?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            warn!("Unauthorized RPC access to {}", instance.url());
            return Err(DaemonError::Unauthorized);
        }

        let body = response
            .text()
            .await
            .map_err(|e| DaemonError::RequestError(e.to_string()))?;

        let repaired = repair_nan(&body);
        let parsed: Vec<JsonRpcResponse> = serde_json::from_str(&repaired)
            .map_err(|e| DaemonError::MalformedResponse(e.to_string()))?;

        let mut results = Vec::with_capacity(parsed.len());
        for item in parsed {
            if let Some(err) = item.error {
                return Err(DaemonError::Rpc {
                    code: err.code,
                    message: err.message,
                });
            }
            results.push(item.result);
        }
        Ok(results)
    }
}
