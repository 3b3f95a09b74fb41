use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load env file {path}: {source}")]
    EnvFileLoad {
        path: PathBuf,
        source: dotenvy::Error,
    },

    #[error("invalid value for {var}: {value} ({reason})")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
