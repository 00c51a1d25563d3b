//! Credentials and request signing
//!
//! This module holds the pieces the Q&A requester needs to authenticate:
//! - Credential kinds stored in the credential store
//! - A weighted, self-correcting pool of signing services
//! - The HTTP client that talks to one signing service

mod credentials;
mod pool;
mod service;

pub use credentials::CredentialKind;
pub use pool::{SignerEntry, SigningPool};
pub use service::{SignRequest, SignerError, SigningClient};
