pub mod jwt;
pub mod token;

pub use jwt::{JwtCredentialVerifier, Principal};

/// Why a connection could not be authenticated.
///
/// Signature mismatch, expiry and malformed tokens all surface as
/// `InvalidToken` so the far end cannot tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing access token")]
    MissingToken,
    #[error("invalid access token")]
    InvalidToken,
}
