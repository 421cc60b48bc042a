use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid {kind} '{value}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub(crate) fn invalid(kind: &'static str, value: &str, reason: &'static str) -> Self {
        Self::InvalidIdentifier {
            kind,
            value: value.to_string(),
            reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
