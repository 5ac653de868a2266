use std::fmt;

use crate::types::FeatureKind;

/// Direction of one transfer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDirection {
    /// Store to exchange representation.
    Export,
    /// Exchange representation to store.
    Import,
    /// Removal of features from the store.
    Delete,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Export => write!(f, "export"),
            Self::Import => write!(f, "import"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Selects which feature kinds one transfer run enumerates.
///
/// An empty kind list selects every transferable kind. Group kinds are
/// never scanned directly; when selected, they are processed through the
/// splitter's group traversal after all other kinds have been discovered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferQuery {
    kinds: Vec<FeatureKind>,
}

impl TransferQuery {
    /// Creates a query covering all transferable kinds.
    pub fn all() -> Self {
        Self::default()
    }

    /// Creates a query restricted to the given kinds.
    pub fn for_kinds(kinds: impl IntoIterator<Item = FeatureKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    /// Returns the kinds this query enumerates, in discovery order.
    pub fn effective_kinds(&self) -> Vec<FeatureKind> {
        if self.kinds.is_empty() {
            FeatureKind::ALL.to_vec()
        } else {
            FeatureKind::ALL
                .iter()
                .copied()
                .filter(|kind| self.kinds.contains(kind))
                .collect()
        }
    }

    /// Returns true if this query includes group features.
    pub fn includes_groups(&self) -> bool {
        self.effective_kinds().iter().any(|kind| kind.is_group())
    }
}
