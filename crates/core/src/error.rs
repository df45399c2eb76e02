use serde::{Deserialize, Serialize};

/// Errors surfaced to callers of the presentation engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum KviewError {
    /// Lookup miss: resource, CRD or history entry.
    #[error("not_found: {0}")]
    NotFound(String),
    /// Blank manifest submission.
    #[error("empty_input: manifest text is empty")]
    EmptyInput,
    /// Remote create/update/delete failure; `reason` carries the remote text verbatim.
    #[error("apply: {reason}")]
    Apply { reason: String },
    /// Backend unreachable or still loading.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// Local failure (history store, serialization).
    #[error("internal: {0}")]
    Internal(String),
}

impl KviewError {
    pub fn apply(reason: impl Into<String>) -> Self {
        KviewError::Apply { reason: reason.into() }
    }

    pub fn internal(e: anyhow::Error) -> Self {
        // alternate formatting keeps the context chain
        KviewError::Internal(format!("{:#}", e))
    }
}

pub type KviewResult<T> = Result<T, KviewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_reason_is_verbatim() {
        let e = KviewError::apply("admission webhook \"x\" denied the request");
        assert_eq!(e.to_string(), "apply: admission webhook \"x\" denied the request");
    }

    #[test]
    fn internal_keeps_context_chain() {
        let e = anyhow::anyhow!("disk full").context("writing history entry");
        assert_eq!(KviewError::internal(e).to_string(), "internal: writing history entry: disk full");
    }
}
