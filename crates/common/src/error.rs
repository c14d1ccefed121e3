use thiserror::Error;

/// Failure taxonomy surfaced by the compose facade.
///
/// Every layer below the orchestrator returns its own error type; the
/// orchestrator folds them into one of these variants, and only the HTTP
/// layer turns a variant into a status code.
#[derive(Error, Debug)]
pub enum Error {
    /// Compose, clone or blueprint absent, or owned by another organization.
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("Quota exceeded for user")]
    QuotaExceeded,

    #[error("{0}")]
    Forbidden(String),

    /// Blueprint name already taken within the organization.
    #[error("{0}")]
    Conflict(String),

    /// The build service rejected the request. `status` is what the caller
    /// sees; `detail` holds the raw downstream body and is only logged.
    #[error("{message}")]
    Downstream {
        status: u16,
        message: String,
        detail: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    /// HTTP status equivalent of this error.
    pub fn status(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::Validation(_) => 400,
            Error::QuotaExceeded | Error::Forbidden(_) => 403,
            Error::Conflict(_) => 422,
            Error::Downstream { status, .. } => *status,
            Error::Internal(_) | Error::JsonSerialization(_) | Error::Other(_) => 500,
        }
    }

    /// Message safe to hand back to the caller.
    pub fn public_message(&self) -> String {
        match self {
            Error::Internal(_) | Error::JsonSerialization(_) | Error::Other(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downstream_detail_is_not_public() {
        let err = Error::Downstream {
            status: 500,
            message: "Failed posting compose request to osbuild-composer".to_string(),
            detail: "{\"secret\":\"token\"}".to_string(),
        };

        assert_eq!(err.status(), 500);
        assert!(!err.public_message().contains("secret"));
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let err = Error::Other(anyhow::anyhow!("connection refused to 10.0.0.4"));
        assert_eq!(err.status(), 500);
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn test_status_table() {
        assert_eq!(Error::NotFound("Compose not found".into()).status(), 404);
        assert_eq!(Error::validation("bad").status(), 400);
        assert_eq!(Error::QuotaExceeded.status(), 403);
        assert_eq!(Error::Conflict("taken".into()).status(), 422);
    }
}
