use anyhow::anyhow;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised by the batching engine itself.
///
/// Fetch and consume errors never pass through this type: the engine hands them back to the
/// caller unchanged. Callers with their own error type implement `From<Error>` (anyhow does this
/// already) so the variants below can travel in the same channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("batch size must be greater than zero")]
    InvalidBatchSize,

    #[error("worker count must be at least one")]
    InvalidWorkerCount,

    /// The resource changed between two page fetches of the same run.
    #[error(
        "resource changed during pagination at offset {offset}: expected fingerprint {}, got {}",
        display_fingerprint(.expected),
        display_fingerprint(.actual)
    )]
    Consistency {
        offset: usize,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// A page window reaches past the largest addressable position.
    #[error("page at offset {offset} with {len} items does not fit in a collection")]
    OffsetOverflow { offset: usize, len: usize },

    /// The server rejected an `If-Match` precondition (HTTP 412).
    #[error("precondition failed (HTTP 412) for url ({url}): resource no longer matches {if_match}")]
    PreconditionFailed { url: String, if_match: String },
}

impl Error {
    /// True when the collection changed underneath a run and paging should restart from offset 0.
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            Error::Consistency { .. } | Error::PreconditionFailed { .. }
        )
    }
}

fn display_fingerprint(fingerprint: &Option<String>) -> &str {
    fingerprint.as_deref().unwrap_or("(none)")
}

#[derive(Debug, Default, serde::Deserialize)]
pub(crate) struct ApiErrorResponse {
    #[serde(default)]
    pub(crate) errors: Vec<ApiErrorDetail>,
    // Older services respond with a bare {"message": ...}
    #[serde(default)]
    pub(crate) message: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ApiErrorDetail {
    #[serde(default)]
    pub(crate) code: Option<String>,
    #[serde(default, alias = "description")]
    pub(crate) message: Option<String>,
}

impl ApiErrorResponse {
    fn summary(&self) -> String {
        let mut parts: Vec<String> = self
            .errors
            .iter()
            .filter_map(|e| match (e.code.as_deref(), e.message.as_deref()) {
                (Some(code), Some(msg)) => Some(format!("{}: {}", code, msg)),
                (None, Some(msg)) => Some(msg.to_string()),
                (Some(code), None) => Some(code.to_string()),
                (None, None) => None,
            })
            .collect();
        if let Some(msg) = &self.message {
            parts.push(msg.clone());
        }
        parts.join("; ")
    }
}

pub(crate) fn format_api_error(status: StatusCode, url: &str, body: &str) -> anyhow::Error {
    let server_message = match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(e) => e.summary(),
        Err(_) => body.trim().to_string(),
    };

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return anyhow!(
            "API authentication/authorization failed (HTTP {}).\n- Check DP_SERVICE_AUTH_TOKEN (or `service_token:` in .dpapirc) is a valid service token\n- User-scoped endpoints also need DP_USER_AUTH_TOKEN\n- Collection-scoped reads need DP_COLLECTION_ID\n\nServer message: {}\nrequest: {}",
            status.as_u16(),
            server_message,
            url
        );
    }

    if status == StatusCode::NOT_FOUND {
        return anyhow!(
            "API resource not found (HTTP 404).\n- The resource id may be wrong, or your configured base URL is incorrect\n\nServer message: {}\nrequest: {}",
            server_message,
            url
        );
    }

    anyhow!(
        "API request failed: HTTP {} for url ({})\n{}",
        status.as_u16(),
        url,
        server_message
    )
}
