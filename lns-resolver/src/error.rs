//! Error types for `lns-resolver`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    // ---
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{route} returned HTTP {status}: {body}")]
    Status {
        route: String,
        status: u16,
        body: String,
    },

    #[error("{route} returned an undecodable body: {reason}")]
    Decode { route: String, reason: String },

    #[error("invalid endpoint URL `{0}`")]
    InvalidEndpoint(String),
}

// ---------------------------------------------------------------------------
// Bridge to lns_domain::LnsError
// ---------------------------------------------------------------------------

impl From<ResolverError> for lns_domain::LnsError {
    // ---
    fn from(e: ResolverError) -> Self {
        lns_domain::LnsError::Resolver(e.to_string())
    }
}
