//! REST client for the Vatel API: session tokens and agent listing.

pub mod client;
pub mod error;
pub mod models;

pub use client::{ApiClient, ApiConfig, DEFAULT_API_BASE, DEFAULT_REQUEST_TIMEOUT};
pub use error::ApiError;
pub use models::{Agent, NoiseCancelSettings, SessionToken, TimeoutSettings, VadSettings, VoiceSettings};
pub use secrecy::SecretString;
