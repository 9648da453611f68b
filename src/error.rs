//! The failures that hydration distinguishes.
//!
//! None of these ever escape a query or element: they are logged,
//! turned into page notices, or into an empty region.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HnError {
    /// Malformed attribute values of a query declaration.
    #[error("invalid query descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("invalid or missing kind: {0:?}")]
    InvalidKind(Option<String>),

    /// A placeholder reference that wasn't resolved yet; the query
    /// must not be executed.
    #[error("unresolved placeholder in {attribute:?}: {value:?}")]
    UnresolvedPlaceholder { attribute: &'static str, value: String },

    /// The fetch succeeded but returned zero rows.
    #[error("no events found for filter {0}")]
    NotFound(String),

    #[error("event store failure: {0}")]
    AdapterFailure(String),

    #[error("could not publish: {0}")]
    PublishFailure(String),

    /// A query's declared child is neither a nested query nor an
    /// element template, or a referenced template can't be found.
    #[error("template missing: {0}")]
    TemplateMissing(String),
}

impl HnError {
    /// True for the variants that mean the declaration itself is
    /// unusable (as opposed to data or transport problems).
    pub fn is_invalid_descriptor(&self) -> bool {
        match self {
            HnError::InvalidDescriptor(_)
                | HnError::InvalidKind(_)
                | HnError::UnresolvedPlaceholder { .. } => true,
            HnError::NotFound(_)
                | HnError::AdapterFailure(_)
                | HnError::PublishFailure(_)
                | HnError::TemplateMissing(_) => false,
        }
    }

    /// For wrapping errors from an `EventStore`.
    pub fn adapter(e: anyhow::Error) -> HnError {
        HnError::AdapterFailure(format!("{e:#}"))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_classification() {
        assert!(HnError::InvalidKind(None).is_invalid_descriptor());
        assert!(HnError::UnresolvedPlaceholder {
            attribute: "authors", value: "#".into()
        }.is_invalid_descriptor());
        assert!(! HnError::NotFound("{}".into()).is_invalid_descriptor());
        let e = HnError::adapter(anyhow::anyhow!("relay down"));
        assert_eq!(e.to_string(), "event store failure: relay down");
    }
}
