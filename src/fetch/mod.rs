//! Resilient fetch layer
//!
//! This module handles all outbound requests to the content platforms, including:
//! - A shared, jittered permit source per platform
//! - Bounded retry for full-body and streaming calls
//! - Signed requests for the Q&A platform, cookie requests for the community
//! - Classification of transport and authentication failures

mod client;
mod community;
mod error;
mod limiter;
mod qa;
mod retry;

pub use client::{build_http_client, MediaStream, Requester};
pub use community::CommunityRequester;
pub use error::FetchError;
pub use limiter::RateLimiter;
pub use qa::QaRequester;
pub use retry::{Attempt, RetryEnvelope};
