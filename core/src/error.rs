use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttrError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Singular matrix: I - Q is not invertible ({context})")]
    SingularMatrix { context: String },

    #[error("Division by zero: total removal effect is {total_effect}, attribution cannot be normalized")]
    DivisionByZero { total_effect: f64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AttrError {
    pub fn missing_state(state: &str) -> Self {
        Self::Validation(format!("matrix is missing required state '{state}'"))
    }

    pub fn is_singular(&self) -> bool {
        matches!(self, Self::SingularMatrix { .. })
    }
}

pub type AttrResult<T> = Result<T, AttrError>;
