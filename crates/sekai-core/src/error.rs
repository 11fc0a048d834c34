//! Error types shared across the gateway.

use thiserror::Error;

/// A shared error type for every gateway crate.
///
/// The variants fall into four groups: envelope/crypto failures, game
/// protocol statuses, transport failures, and validation/infrastructure
/// problems. Protocol variants drive specific recovery actions in the
/// session client and pool; the rest propagate to the caller.
#[derive(Error, Debug)]
pub enum SekaiError {
    // ------------------------------------------------------------------
    // Envelope codec
    // ------------------------------------------------------------------
    /// `pack` was handed nothing to encode.
    #[error("payload cannot be empty")]
    EmptyPayload,

    /// `unpack` received a zero-length body.
    #[error("content cannot be empty")]
    EmptyContent,

    /// Ciphertext length is not a multiple of the AES block size.
    #[error("content length is not a multiple of the AES block size")]
    InvalidBlockSize,

    /// PKCS7 padding was malformed after decryption.
    #[error("invalid PKCS7 padding")]
    Padding,

    /// The decrypted bytes were not valid msgpack for the requested shape.
    #[error("msgpack decode error: {0}")]
    Decode(String),

    // ------------------------------------------------------------------
    // Game protocol statuses
    // ------------------------------------------------------------------
    /// The account session expired; the client must re-login.
    #[error("account session expired")]
    SessionExpired,

    /// The CDN cookies expired; the client must refresh them.
    #[error("cookies expired")]
    CookieExpired,

    /// The server demands a newer app version.
    #[error("app upgrade required")]
    UpgradeRequired,

    /// The game server is under maintenance.
    #[error("game server is under maintenance")]
    UnderMaintenance,

    /// The server answered with a status outside the known taxonomy.
    #[error("unknown client error: status={status}")]
    UnknownStatus { status: u16, body: String },

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------
    /// Connection-level failure talking to the upstream server.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request deadline elapsed. Retried within the attempt budget.
    #[error("request timed out")]
    Timeout,

    /// The attempt budget was exhausted without a recorded cause.
    #[error("retries exhausted")]
    RetriesExhausted,

    // ------------------------------------------------------------------
    // Validation & infrastructure
    // ------------------------------------------------------------------
    /// The login response was missing the session token or a version field.
    #[error("invalid login response: {0}")]
    InvalidLoginResponse(String),

    /// Malformed input data (account file, schema file, version file...).
    #[error("parse error: {0}")]
    Parse(String),

    /// Bad or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The requested server region is not known.
    #[error("invalid server region: {0}")]
    InvalidRegion(String),

    /// The upstream answered with an HTTP status outside the taxonomy.
    #[error("invalid HTTP status: {0}")]
    InvalidStatus(u16),

    /// File system failure.
    #[error("io error: {0}")]
    Io(String),

    /// The pool has no logged-in client to serve the request.
    #[error("no client available")]
    NoClientAvailable,
}

impl SekaiError {
    /// Creates a Parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Creates a Config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a Transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a Decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// True for errors the session client retries within its attempt budget.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }

    /// True for the protocol statuses that carry a recovery action.
    pub fn is_protocol_status(&self) -> bool {
        matches!(
            self,
            Self::SessionExpired
                | Self::CookieExpired
                | Self::UpgradeRequired
                | Self::UnderMaintenance
                | Self::UnknownStatus { .. }
        )
    }
}

impl From<std::io::Error> for SekaiError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SekaiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(format!("JSON: {}", err))
    }
}

impl From<toml::de::Error> for SekaiError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// A type alias for `Result<T, SekaiError>`.
pub type Result<T> = std::result::Result<T, SekaiError>;
