use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("malformed input for contract '{contract}': {reason}")]
    MalformedInput { contract: String, reason: String },

    #[error("cannot compare '{old}' with '{new}': {reason}")]
    IncomparableVersions {
        old: String,
        new: String,
        reason: String,
    },

    #[error("failed to parse contract input: {0}")]
    Parse(String),
}

impl ModelError {
    pub fn malformed(contract: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            contract: contract.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

pub type ModelResult<T> = std::result::Result<T, ModelError>;
