use thiserror::Error;

#[derive(Debug, Error)]
pub enum PacerError {
    #[error("invalid phase: {0}")]
    InvalidPhase(String),

    #[error("invalid step: {0}")]
    InvalidStep(String),

    #[error("step '{step}' does not belong to phase '{phase}'")]
    StepPhaseMismatch { phase: String, step: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, PacerError>;
