pub mod record;
pub mod run;
pub mod window;

pub use record::*;
pub use run::*;
pub use window::*;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Staging artifact error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Merge error: {0}")]
    Merge(String),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("A sync run is already in progress")]
    RunInProgress,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
