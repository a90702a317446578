//! Search query construction.
//!
//! A [`SearchQuery`] is a boolean AND of field/value terms. Search clients
//! render it into their own wire syntax; the scraper treats it as an opaque
//! token apart from using its display form in error reports.

use std::fmt;

/// A single `field:value` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub field: String,
    pub value: String,
}

impl Term {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Errors raised while building a query from caller input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("query has no terms")]
    EmptyQuery,
    #[error("empty value for field '{field}'")]
    EmptyValue { field: String },
    #[error("invalid value '{value}' for field '{field}'")]
    InvalidValue { field: String, value: String },
}

/// Boolean AND of [`Term`]s.
///
/// `all_versions` asks the backend for one hit per version instead of one
/// hit per artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    terms: Vec<Term>,
    all_versions: bool,
}

impl SearchQuery {
    /// Build a query from terms, validating every value.
    pub fn and(terms: Vec<Term>) -> Result<Self, QueryError> {
        if terms.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        for term in &terms {
            validate_value(term)?;
        }
        Ok(Self {
            terms,
            all_versions: false,
        })
    }

    /// Query matching every published version of one artifact.
    pub fn artifact_versions(group_id: &str, artifact_id: &str) -> Result<Self, QueryError> {
        let mut query = Self::and(vec![Term::new("g", group_id), Term::new("a", artifact_id)])?;
        query.all_versions = true;
        Ok(query)
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn all_versions(&self) -> bool {
        self.all_versions
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{}:\"{}\"", term.field, term.value)?;
        }
        Ok(())
    }
}

/// Values end up inside a quoted term, so only Maven identifier characters
/// are accepted.
fn validate_value(term: &Term) -> Result<(), QueryError> {
    if term.value.trim().is_empty() {
        return Err(QueryError::EmptyValue {
            field: term.field.clone(),
        });
    }
    let ok = term
        .value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+'));
    if !ok {
        return Err(QueryError::InvalidValue {
            field: term.field.clone(),
            value: term.value.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_terms_joined_with_and() {
        let q = SearchQuery::and(vec![
            Term::new("l", "kotlin-tooling-metadata"),
            Term::new("p", "jar"),
        ])
        .unwrap();
        assert_eq!(q.to_string(), "l:\"kotlin-tooling-metadata\" AND p:\"jar\"");
        assert!(!q.all_versions());
    }

    #[test]
    fn artifact_versions_sets_flag() {
        let q = SearchQuery::artifact_versions("io.ktor", "ktor-io").unwrap();
        assert!(q.all_versions());
        assert_eq!(q.to_string(), "g:\"io.ktor\" AND a:\"ktor-io\"");
    }

    #[test]
    fn rejects_empty_and_unsafe_values() {
        assert_eq!(SearchQuery::and(vec![]), Err(QueryError::EmptyQuery));
        assert!(matches!(
            SearchQuery::artifact_versions("", "ktor-io"),
            Err(QueryError::EmptyValue { .. })
        ));
        assert!(matches!(
            SearchQuery::artifact_versions("io.ktor\" OR *", "ktor-io"),
            Err(QueryError::InvalidValue { .. })
        ));
    }

    #[test]
    fn errors_name_the_offending_field() {
        let err = SearchQuery::artifact_versions("io.ktor", " ").unwrap_err();
        assert_eq!(err.to_string(), "empty value for field 'a'");
        let err: Box<dyn std::error::Error> = Box::new(QueryError::InvalidValue {
            field: "g".into(),
            value: "x*".into(),
        });
        assert_eq!(err.to_string(), "invalid value 'x*' for field 'g'");
    }
}
