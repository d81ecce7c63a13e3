//! Contains the data models for API requests and responses.

use serde::{Deserialize, Serialize};

/// A shell command line to run against the peripherals.
#[derive(Debug, Deserialize, Serialize)]
pub struct CommandRequest {
    pub command: String,
}

/// Result of running a command line.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct CommandResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn success(output: String) -> Self {
        Self { ok: true, output: Some(output), error: None }
    }

    pub fn failure(error: String) -> Self {
        Self { ok: false, output: None, error: Some(error) }
    }
}
