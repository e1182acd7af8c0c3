use thiserror::Error;

/// An error occurred while generating parameters for the Secure Remote
/// Password (SRP) protocol.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SrpError {
    /// An argument which was provided to the engine was invalid.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The random generator failed to produce the requested bytes.
    #[error("Random generator failure: {0}")]
    Rng(String),

    /// A protocol scalar (`A mod N`, `B mod N` or `u`) came out zero. The
    /// handshake it belongs to cannot continue and must be restarted.
    #[error("SRP scalar {0} must not be zero")]
    ZeroScalar(&'static str),

    /// The HMAC algorithm failed to generate a hash as the digest length was
    /// invalid.
    #[error("Cryptography error: {0}")]
    CryptographyError(#[from] digest::InvalidLength),
}

/// An error surfaced by an authentication or account operation.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A caller-supplied argument was missing or malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation requires a signed-in user and no valid session exists.
    #[error("User is not authenticated")]
    NotAuthenticated,

    /// The RPC layer failed before a service response was obtained. The
    /// underlying error is propagated unchanged.
    #[error("Transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The service rejected the request with a structured error.
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    /// Big-integer, RNG or key-derivation anomaly. Fatal to the handshake in
    /// flight; the caller must start over.
    #[error("Cryptography failure: {0}")]
    Crypto(#[from] SrpError),

    /// Another operation is already in flight on this user instance.
    #[error("Another operation is in flight for this user")]
    Busy,

    /// Persisted or server-returned state failed to parse.
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// The storage backend failed at the filesystem level.
    #[error("Storage failure: {0}")]
    Storage(#[from] std::io::Error),
}
