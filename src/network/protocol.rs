// src/network/protocol.rs
//! Stratum JSON-RPC message formats
//!
//! Requests are built as `serde_json::Value`s; everything the pool sends is
//! first parsed into [`Incoming`] and then narrowed to the typed payloads
//! below once the session knows what the frame answers.

use crate::miner::job::{Job, Submission};
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use serde::Deserialize;
use serde_json::{Value, json};

/// Client name sent in the login request
pub const USER_AGENT: &str = env!("CARGO_PKG_NAME");

/// Pool error messages that invalidate the whole session
pub const FATAL_POOL_ERRORS: [&str; 3] = ["Unauthenticated", "Timeout", "Invalid job id"];

/// Last-error text shown while reconnecting after a transport failure
pub const NETWORK_ERROR_MSG: &str = "Network error! Reconnecting...";

/// Reply status meaning success
pub const STATUS_OK: &str = "OK";

/// `<name>/<major>.<minor>` agent string
pub fn agent() -> String {
    format!(
        "{}/{}.{}",
        USER_AGENT,
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR")
    )
}

/// Whether a pool error message requires a full reconnect
pub fn is_fatal_pool_error(message: &str) -> bool {
    FATAL_POOL_ERRORS.contains(&message)
}

/// Decodes an 8-hex-digit target into `(target, difficulty)`
///
/// The wire form is the little-endian byte order of the 32-bit threshold.
pub fn decode_target(target_hex: &str) -> Result<(u32, f64), MinerError> {
    let bytes: [u8; 4] = hex::decode(target_hex)?.try_into().map_err(|_| {
        MinerError::DecodeError(format!("target must be 4 bytes: {:?}", target_hex))
    })?;

    let target = u32::from_le_bytes(bytes);
    if target == 0 {
        return Err(MinerError::DecodeError("target is zero".into()));
    }
    Ok((target, crate::miner::job::difficulty(target)))
}

/// Builds a JSON-RPC request
pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "id": id,
        "method": method,
        "params": params,
        "jsonrpc": "2.0",
    })
}

/// Login parameters
pub fn login_params(login: &str, password: &str, agent: &str) -> Value {
    json!({
        "login": login,
        "pass": password,
        "agent": agent,
    })
}

/// Submit parameters; nonce and result are hex of the raw bytes
pub fn submit_params(submission: &Submission) -> Value {
    json!({
        "id": submission.login_id,
        "job_id": submission.job_id,
        "nonce": hex::encode(submission.nonce),
        "result": hex::encode(submission.result),
    })
}

/// Any frame received from the pool
#[derive(Debug, Clone, Deserialize)]
pub struct Incoming {
    /// Request id for replies; absent or null for notifications
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name for notifications
    #[serde(default)]
    pub method: Option<String>,
    /// Notification parameters
    #[serde(default)]
    pub params: Option<Value>,
    /// Reply payload
    #[serde(default)]
    pub result: Option<Value>,
    /// Reply error
    #[serde(default)]
    pub error: Option<Value>,
}

impl Incoming {
    /// Parses one line
    pub fn parse(line: &str) -> Result<Self, MinerError> {
        let incoming: Incoming = serde_json::from_str(line)?;
        Ok(incoming)
    }

    /// Numeric request id, if this is a reply
    pub fn reply_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }

    /// Error carried by the frame, tolerating object or bare string forms
    pub fn rpc_error(&self) -> Option<RpcError> {
        match self.error.as_ref()? {
            Value::Null => None,
            Value::String(message) => Some(RpcError {
                code: -1,
                message: message.clone(),
            }),
            other => Some(
                serde_json::from_value(other.clone()).unwrap_or_else(|_| RpcError {
                    code: -1,
                    message: other.to_string(),
                }),
            ),
        }
    }

    /// Decodes `result` into a typed payload
    pub fn result_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, MinerError> {
        let result = self
            .result
            .clone()
            .ok_or_else(|| MinerError::ProtocolError("reply has no result".into()))?;
        Ok(serde_json::from_value(result)?)
    }

    /// Decodes `params` into a typed payload
    pub fn params_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, MinerError> {
        let params = self
            .params
            .clone()
            .ok_or_else(|| MinerError::ProtocolError("notification has no params".into()))?;
        Ok(serde_json::from_value(params)?)
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcError {
    /// Error code
    #[serde(default)]
    pub code: i64,
    /// Human readable message
    #[serde(default)]
    pub message: String,
}

impl From<RpcError> for MinerError {
    fn from(e: RpcError) -> Self {
        MinerError::PoolError {
            code: e.code,
            message: e.message,
        }
    }
}

/// Result of a login request
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResult {
    /// `"OK"` on success
    #[serde(default)]
    pub status: Option<String>,
    /// Session token
    pub id: String,
    /// First job, if the pool has one ready
    #[serde(default)]
    pub job: Option<JobParams>,
}

/// Job as sent by the pool
#[derive(Debug, Clone, Deserialize)]
pub struct JobParams {
    /// Job identifier
    pub job_id: String,
    /// Hex block template
    pub blob: String,
    /// Hex target
    pub target: String,
}

impl JobParams {
    /// Decodes into a [`Job`] plus its difficulty
    pub fn into_job(
        self,
        login_id: &str,
        variant: AlgorithmType,
    ) -> Result<(Job, f64), MinerError> {
        let (target, difficulty) = decode_target(&self.target)?;
        let blob = hex::decode(&self.blob)?;
        let job = Job::new(self.job_id, &blob, target, login_id, variant)?;
        Ok((job, difficulty))
    }
}

/// Result of a submit request
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResult {
    /// `"OK"` when accepted
    #[serde(default)]
    pub status: Option<String>,
}

impl StatusResult {
    /// Whether the status is `"OK"`
    pub fn is_ok(&self) -> bool {
        self.status.as_deref() == Some(STATUS_OK)
    }
}
