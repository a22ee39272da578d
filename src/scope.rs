//! Document scopes shared by the vector backends and the lexical index.

use std::collections::BTreeSet;

/// The set of documents a search may return chunks from.
///
/// Shared by every backend so that `None` / `Some([])` filters mean the
/// same thing everywhere: [`DocScope::All`] is unrestricted, and an empty
/// [`DocScope::Only`] matches nothing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DocScope {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl DocScope {
    /// Build a scope from an optional list of document IDs.
    ///
    /// ```
    /// use docsift::scope::DocScope;
    ///
    /// assert!(DocScope::from_filter(None).allows("any"));
    /// assert!(DocScope::from_filter(Some(&[])).is_empty());
    /// assert!(DocScope::from_filter(Some(&["a".to_string()])).allows("a"));
    /// ```
    pub fn from_filter(doc_ids: Option<&[String]>) -> Self {
        match doc_ids {
            None => Self::All,
            Some(ids) => Self::Only(ids.iter().cloned().collect()),
        }
    }

    pub fn allows(&self, doc_id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.contains(doc_id),
        }
    }

    /// True when the scope can never match anything.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Only(ids) if ids.is_empty())
    }

    /// Number of documents when the scope is explicit.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::All => None,
            Self::Only(ids) => Some(ids.len()),
        }
    }

    /// Narrow this scope to the documents also allowed by `other`.
    pub fn intersect(&self, other: &DocScope) -> DocScope {
        match (self, other) {
            (Self::All, s) | (s, Self::All) => s.clone(),
            (Self::Only(a), Self::Only(b)) => {
                Self::Only(a.intersection(b).cloned().collect())
            }
        }
    }

    /// Widen this scope by the documents in `ids`.
    pub fn extend(&mut self, ids: impl IntoIterator<Item = String>) {
        if let Self::Only(own) = self {
            own.extend(ids);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only(ids: &[&str]) -> DocScope {
        DocScope::Only(ids.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn all_allows_everything() {
        assert!(DocScope::All.allows("x"));
        assert!(!DocScope::All.is_empty());
        assert_eq!(DocScope::All.len(), None);
    }

    #[test]
    fn empty_only_allows_nothing() {
        let scope = only(&[]);
        assert!(scope.is_empty());
        assert!(!scope.allows("x"));
    }

    #[test]
    fn intersect() {
        assert_eq!(DocScope::All.intersect(&only(&["a"])), only(&["a"]));
        assert_eq!(only(&["a", "b"]).intersect(&only(&["b", "c"])), only(&["b"]));
        assert!(only(&["a"]).intersect(&only(&["b"])).is_empty());
    }

    #[test]
    fn extend_widens_only_explicit_scopes() {
        let mut scope = only(&["a"]);
        scope.extend(["b".to_string()]);
        assert_eq!(scope, only(&["a", "b"]));

        let mut all = DocScope::All;
        all.extend(["b".to_string()]);
        assert_eq!(all, DocScope::All);
    }
}
