/// Errors that can occur while looking up game metadata.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// The provider has no entry for the requested game.
    #[error("game not found")]
    NotFound,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status code: {code}, body: {body}")]
    Status { code: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("authentication failed: {0}")]
    Auth(String),
}

impl MetadataError {
    pub fn decode(msg: impl std::fmt::Display) -> Self {
        Self::Decode(msg.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl From<serde_json::Error> for MetadataError {
    fn from(e: serde_json::Error) -> Self {
        Self::decode(e)
    }
}

/// Turn a non-2xx response into [`MetadataError::Status`], keeping a short
/// prefix of the body for diagnostics.
pub(crate) async fn check_status(
    resp: reqwest::Response,
) -> Result<reqwest::Response, MetadataError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(MetadataError::Status {
        code: status.as_u16(),
        body: text.chars().take(200).collect(),
    })
}
