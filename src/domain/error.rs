use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("unknown sort field `{0}`")]
    UnknownSortField(String),
    #[error("unknown sort direction `{0}`")]
    UnknownSortDirection(String),
    #[error("article validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
