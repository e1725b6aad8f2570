//! Org-id filters extracted from query expressions.
//!
//! Query expressions (`?expression=...`) belong to the event and metric
//! query languages. Only one thing is needed from them here: the value an
//! expression filters the organization field on, e.g.
//! `request(path).eq(orgId, "42")` filters on `42`.

use std::sync::Arc;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("query has no expression")]
    MissingExpression,
    #[error("path does not address events or metrics")]
    UnknownGrammar,
    #[error("expression has no filter on {0}")]
    NoOrgFilter(String),
    #[error("expression filters {0} on conflicting values")]
    ConflictingFilters(String),
    #[error("unbalanced expression")]
    Unbalanced,
}

/// A query-expression grammar that can report the organization filter value.
pub trait FilterGrammar: Send + Sync {
    fn org_filter(&self, expression: &str) -> Result<String, FilterError>;
}

/// Finds `.eq(<field>, <literal>)` clauses on a single field.
///
/// Literals may be double-quoted, single-quoted or bare integers. Every
/// clause on the field must agree on the value.
#[derive(Debug, Clone)]
pub struct EqualityFilter {
    field: String,
    clause: Regex,
}

impl EqualityFilter {
    pub fn new(field: &str) -> Self {
        let pattern = format!(
            r#"\beq\(\s*{}\s*,\s*(?:"([^"\\]*)"|'([^'\\]*)'|(-?\d+))\s*\)"#,
            regex::escape(field)
        );
        let clause = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => unreachable!("escaped field yields a valid pattern: {e}"),
        };
        Self {
            field: field.to_string(),
            clause,
        }
    }
}

impl FilterGrammar for EqualityFilter {
    fn org_filter(&self, expression: &str) -> Result<String, FilterError> {
        if !balanced(expression) {
            return Err(FilterError::Unbalanced);
        }

        let mut found: Option<String> = None;
        for caps in self.clause.captures_iter(expression) {
            let value = (1..=3)
                .find_map(|i| caps.get(i))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            match &found {
                Some(existing) if *existing != value => {
                    return Err(FilterError::ConflictingFilters(self.field.clone()));
                }
                Some(_) => {}
                None => found = Some(value),
            }
        }
        found.ok_or_else(|| FilterError::NoOrgFilter(self.field.clone()))
    }
}

/// The event and metric grammars, selected by request path.
#[derive(Clone)]
pub struct QueryGrammars {
    pub event: Arc<dyn FilterGrammar>,
    pub metric: Arc<dyn FilterGrammar>,
}

impl QueryGrammars {
    /// Both grammars filter on `field` with [`EqualityFilter`].
    pub fn equality(field: &str) -> Self {
        let grammar: Arc<dyn FilterGrammar> = Arc::new(EqualityFilter::new(field));
        Self {
            event: Arc::clone(&grammar),
            metric: grammar,
        }
    }

    /// Pick a grammar from the path segments (`event`/`events` or `metric`/`metrics`).
    pub fn for_path(&self, path: &str) -> Result<&dyn FilterGrammar, FilterError> {
        for segment in path.split('/') {
            match segment {
                "event" | "events" => return Ok(self.event.as_ref()),
                "metric" | "metrics" => return Ok(self.metric.as_ref()),
                _ => {}
            }
        }
        Err(FilterError::UnknownGrammar)
    }

    /// Extract the org filter from a raw query string.
    pub fn org_filter(&self, path: &str, query: Option<&str>) -> Result<String, FilterError> {
        let expression = query
            .and_then(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .find(|(key, _)| key == "expression")
                    .map(|(_, value)| value.into_owned())
            })
            .ok_or(FilterError::MissingExpression)?;
        self.for_path(path)?.org_filter(&expression)
    }
}

fn balanced(expression: &str) -> bool {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for c in expression.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0 && quote.is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_quoted_and_numeric_filters() {
        let f = EqualityFilter::new("orgId");
        assert_eq!(f.org_filter(r#"request(path).eq(orgId, "42")"#).unwrap(), "42");
        assert_eq!(f.org_filter("sum(request.eq(orgId,'acme'))").unwrap(), "acme");
        assert_eq!(f.org_filter("sum(request.eq(orgId, 7))").unwrap(), "7");
    }

    #[test]
    fn rejects_missing_conflicting_or_unbalanced() {
        let f = EqualityFilter::new("orgId");
        assert_eq!(
            f.org_filter(r#"request.eq(path, "/")"#),
            Err(FilterError::NoOrgFilter("orgId".into()))
        );
        assert_eq!(
            f.org_filter(r#"request.eq(orgId, "1").eq(orgId, "2")"#),
            Err(FilterError::ConflictingFilters("orgId".into()))
        );
        assert_eq!(f.org_filter(r#"request.eq(orgId, "1""#), Err(FilterError::Unbalanced));
    }

    #[test]
    fn agreeing_clauses_are_accepted() {
        let f = EqualityFilter::new("orgId");
        assert_eq!(
            f.org_filter(r#"request.eq(orgId, "1").eq(orgId, "1")"#).unwrap(),
            "1"
        );
    }

    #[test]
    fn grammar_selected_by_path_segment() {
        let grammars = QueryGrammars::equality("orgId");
        assert!(grammars.for_path("/1.0/event/get").is_ok());
        assert!(grammars.for_path("/1.0/metric").is_ok());
        assert!(matches!(
            grammars.for_path("/1.0/types"),
            Err(FilterError::UnknownGrammar)
        ));
    }

    #[test]
    fn org_filter_reads_expression_parameter() {
        let grammars = QueryGrammars::equality("orgId");
        let query = "expression=request.eq(orgId%2C%2242%22)&limit=10";
        assert_eq!(grammars.org_filter("/1.0/event", Some(query)).unwrap(), "42");
        assert_eq!(
            grammars.org_filter("/1.0/event", Some("limit=10")),
            Err(FilterError::MissingExpression)
        );
        assert_eq!(grammars.org_filter("/1.0/event", None), Err(FilterError::MissingExpression));
    }
}
