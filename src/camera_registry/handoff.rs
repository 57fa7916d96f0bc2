//! Handoff token - camera connection bundle for an external consumer
//!
//! `code` = base64(JSON `{ip, username, password, rtsp_url, timestamp}`).
//! The key names are what the receiving side parses; keep them stable.

use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Decoded token contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffPayload {
    pub ip: String,
    pub username: String,
    pub password: String,
    pub rtsp_url: String,
    pub timestamp: DateTime<Utc>,
}

impl HandoffPayload {
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(json))
    }

    pub fn decode(code: &str) -> Result<Self> {
        let json = STANDARD
            .decode(code.trim())
            .map_err(|e| Error::InvalidToken(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| Error::InvalidToken(e.to_string()))
    }
}

/// Result of `generate_handoff_token`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandoffToken {
    pub code: String,
    pub camera_name: String,
    pub video_source: String,
}
