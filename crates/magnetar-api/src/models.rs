//! Request and response bodies of the HTTP surface.
//!
//! Session snapshots are serialised straight from [`magnetar_core::SessionSnapshot`].

use serde::{Deserialize, Serialize};

/// RFC9457 problem document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// Problem type URI.
    #[serde(rename = "type")]
    pub kind: String,
    /// Short summary.
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Occurrence-specific explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Body of `POST /torrents`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct AddSessionRequest {
    /// Magnet URI or torrent-file URL.
    #[serde(default, alias = "magnet_link", alias = "magnetLink")]
    pub locator: Option<String>,
    /// Display name overriding the one reported by the engine.
    #[serde(default)]
    pub name: Option<String>,
}

/// Query of `DELETE /torrents/{id}`.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct RemoveQuery {
    /// Also delete downloaded data.
    #[serde(default, rename = "deleteFiles")]
    pub delete_files: bool,
}

/// Plain acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageResponse {
    /// Human readable outcome.
    pub message: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// Always `ok` while the process answers.
    pub status: String,
    /// Sessions currently registered.
    pub sessions: usize,
    /// Build identifier.
    pub build: String,
}
