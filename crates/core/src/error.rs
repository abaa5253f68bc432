use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Insufficient data: {rows} valid rows, at least {required} required")]
    InsufficientData { rows: usize, required: usize },

    #[error("Singular design matrix: collinear or constant spend on [{}]", channels.join(", "))]
    SingularMatrix { channels: Vec<String> },

    #[error("Channel mismatch: {0}")]
    ChannelMismatch(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}
