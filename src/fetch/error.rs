use crate::signing::{CredentialKind, SignerError};
use crate::storage::StorageError;
use thiserror::Error;

/// Errors surfaced by requesters
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("bad response from {url}: {reason}")]
    BadResponse { url: String, reason: String },

    #[error("platform busy at {url}")]
    Busy { url: String },

    #[error("{url}: giving up after {attempts} attempts, last error: {last}")]
    MaxRetry {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("login required")]
    NeedLogin,

    #[error("signature cookie rejected")]
    InvalidSignatureCookie,

    #[error("community cookie rejected")]
    InvalidCookie,

    #[error("missing credential {0}")]
    MissingCredential(CredentialKind),

    #[error("no available signing service")]
    NoAvailableSigner,

    #[error("{0} is unreachable")]
    Unreachable(String),

    #[error("invalid request url {0}")]
    InvalidUrl(String),

    #[error("signing failed: {0}")]
    Signer(#[from] SignerError),

    #[error("credential store: {0}")]
    Storage(#[from] StorageError),
}

impl FetchError {
    /// Errors that make every further request of the run fail the same way
    pub fn is_auth_terminal(&self) -> bool {
        matches!(
            self,
            Self::NeedLogin
                | Self::InvalidSignatureCookie
                | Self::InvalidCookie
                | Self::MissingCredential(_)
                | Self::NoAvailableSigner
        )
    }

    /// Credential to delete when this error ends a run
    pub fn evicts(&self) -> Option<CredentialKind> {
        match self {
            Self::NeedLogin => Some(CredentialKind::QaSession),
            Self::InvalidSignatureCookie => Some(CredentialKind::QaSignatureCookie),
            Self::InvalidCookie => Some(CredentialKind::CommunityCookie),
            _ => None,
        }
    }
}
