//! Error types for configuration and size table handling.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while loading configuration or consulting the size table.
///
/// All of these are fatal to the current invocation; no resize is attempted.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    #[error("malformed size table: {0}")]
    SizeTableParse(#[from] serde_json::Error),

    #[error("incomplete size table: {0}")]
    SizeTableInvalid(String),

    #[error("instance class not in size table: {0}")]
    UnknownClass(String),
}
