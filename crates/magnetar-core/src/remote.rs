//! Byte source that reads a file from the engine's own HTTP server.
//!
//! The `Range` header is forwarded untouched and the upstream status, length and
//! `Content-Range` are mirrored.

use std::io;

use futures_util::StreamExt;
use reqwest::header;
use url::Url;

use crate::source::{SourceError, SourceResponse, SourceStatus};

/// Client for engine-served file URLs.
#[derive(Debug, Clone, Default)]
pub struct RemoteSource {
    client: reqwest::Client,
}

impl RemoteSource {
    /// Wrap an existing client.
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// URL of `relative_path` below `endpoint`, one encoded segment per path component.
    ///
    /// # Errors
    ///
    /// Fails when `endpoint` cannot carry a path (e.g. a `data:` URL).
    pub fn file_url(endpoint: &Url, relative_path: &str) -> Result<Url, SourceError> {
        let mut url = endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| SourceError::Failed {
                operation: "remote.file_url",
                source: anyhow::anyhow!("endpoint cannot be a base URL"),
            })?
            .pop_if_empty()
            .extend(relative_path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    /// Open `relative_path` below `endpoint`.
    ///
    /// # Errors
    ///
    /// Maps 404 to [`SourceError::UnknownFile`], 425/503 to [`SourceError::NotReady`],
    /// and transport failures or other statuses to [`SourceError::Failed`].
    pub async fn open(
        &self,
        endpoint: &Url,
        file_index: usize,
        relative_path: &str,
        range: Option<&str>,
    ) -> Result<SourceResponse, SourceError> {
        let url = Self::file_url(endpoint, relative_path)?;
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(header::RANGE, range);
        }
        let response = request.send().await.map_err(|err| SourceError::Failed {
            operation: "remote.send",
            source: err.into(),
        })?;

        let status = match response.status().as_u16() {
            200 => SourceStatus::Full,
            206 => SourceStatus::Partial,
            416 => SourceStatus::Unsatisfiable,
            404 => return Err(SourceError::UnknownFile { file_index }),
            425 | 503 => return Err(SourceError::NotReady),
            other => {
                return Err(SourceError::Failed {
                    operation: "remote.status",
                    source: anyhow::anyhow!("engine server answered {other}"),
                });
            }
        };
        let content_length = header_value(&response, header::CONTENT_LENGTH)
            .and_then(|value| value.parse::<u64>().ok());
        let content_range = header_value(&response, header::CONTENT_RANGE);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other));

        Ok(SourceResponse {
            status,
            content_length,
            content_range,
            body: Box::pin(body),
        })
    }
}

fn header_value(response: &reqwest::Response, name: header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
