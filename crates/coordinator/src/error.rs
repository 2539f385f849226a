use thiserror::Error;

/// Errors surfaced by the coordination core.
#[derive(Debug, Error)]
pub enum Error {
    /// A lookup by id missed.
    #[error("{0} not found")]
    NotFound(String),

    /// Malformed or out-of-order input.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// A FROST operation rejected a contribution.
    #[error(transparent)]
    Crypto(#[from] frostbft_driver::Error),

    /// Committed-state encoding failure; deterministic across replicas.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Local I/O failure from the key-share store.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Configuration file failure.
    #[error(transparent)]
    Config(#[from] toml::de::Error),
}
