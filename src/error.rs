use thiserror::Error;

/// Ensemble engine error types
#[derive(Error, Debug)]
pub enum EnsembleError {
    /// Malformed input table or mask, raised before any filtering starts
    #[error("Invalid input: {0}")]
    InputValidation(String),

    /// Singular pivot, non-positive-definite factor, failed Cholesky/LDL
    #[error("Numerical failure: {0}")]
    Numerical(String),

    /// Bad configuration, raised at unit construction time
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EnsembleError {
    pub fn numerical(msg: impl Into<String>) -> Self {
        EnsembleError::Numerical(msg.into())
    }

    pub fn input(msg: impl Into<String>) -> Self {
        EnsembleError::InputValidation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        EnsembleError::Configuration(msg.into())
    }

    /// Prefix the message, keeping the category.
    pub fn context(self, what: &str) -> Self {
        match self {
            EnsembleError::InputValidation(m) => EnsembleError::input(format!("{}: {}", what, m)),
            EnsembleError::Numerical(m) => EnsembleError::numerical(format!("{}: {}", what, m)),
            EnsembleError::Configuration(m) => EnsembleError::config(format!("{}: {}", what, m)),
            other => other,
        }
    }

    /// Numerical failures are unit-local; everything else aborts the caller.
    pub fn is_numerical(&self) -> bool {
        matches!(self, EnsembleError::Numerical(_))
    }
}

/// Result type for ensemble operations
pub type EnsembleResult<T> = Result<T, EnsembleError>;
