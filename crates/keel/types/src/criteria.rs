//! Criteria: require-all / require-any / require-none matching

use crate::error::{PolicyError, Result};
use crate::expression::{ExpressionCache, ExpressionParams};
use serde::{Deserialize, Serialize};

/// Matching expressions grouped into three clauses.
///
/// Criteria evaluate to true only when all `require_all` expressions are true,
/// at least one `require_any` expression is true, and none of the
/// `require_none` expressions are true. Empty clauses are skipped, so empty
/// criteria always match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criteria {
    #[serde(default)]
    pub require_all: Vec<String>,

    #[serde(default)]
    pub require_any: Vec<String>,

    #[serde(default)]
    pub require_none: Vec<String>,
}

impl Criteria {
    pub fn require_all(exprs: &[&str]) -> Self {
        Self {
            require_all: exprs.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Criteria that always match
    pub fn always() -> Self {
        Self::default()
    }

    /// All expressions referenced by the criteria
    pub fn expressions(&self) -> impl Iterator<Item = &String> {
        self.require_all
            .iter()
            .chain(self.require_any.iter())
            .chain(self.require_none.iter())
    }

    /// Evaluates the criteria against a set of parameters
    pub fn allows(&self, params: &ExpressionParams, cache: &ExpressionCache) -> Result<bool> {
        for expr in &self.require_all {
            if !evaluate("require-all", expr, params, cache)? {
                return Ok(false);
            }
        }

        for expr in &self.require_none {
            if evaluate("require-none", expr, params, cache)? {
                return Ok(false);
            }
        }

        if self.require_any.is_empty() {
            return Ok(true);
        }

        for expr in &self.require_any {
            if evaluate("require-any", expr, params, cache)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Evaluates optional criteria, where `None` always matches
pub fn matches(
    criteria: Option<&Criteria>,
    params: &ExpressionParams,
    cache: &ExpressionCache,
) -> Result<bool> {
    match criteria {
        Some(c) => c.allows(params, cache),
        None => Ok(true),
    }
}

fn evaluate(
    clause: &'static str,
    expr: &str,
    params: &ExpressionParams,
    cache: &ExpressionCache,
) -> Result<bool> {
    cache
        .evaluate_bool(expr, params)
        .map_err(|e| PolicyError::Criteria {
            clause,
            source: Box::new(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> ExpressionParams {
        ExpressionParams::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_empty_criteria_match() {
        let cache = ExpressionCache::new();
        assert!(Criteria::always().allows(&params(&[]), &cache).unwrap());
        assert!(matches(None, &params(&[]), &cache).unwrap());
    }

    #[test]
    fn test_clauses() {
        let cache = ExpressionCache::new();
        let criteria = Criteria {
            require_all: vec!["org == 'dev'".into()],
            require_any: vec!["team == 'a'".into(), "team == 'b'".into()],
            require_none: vec!["blocked == 'true'".into()],
        };

        assert!(criteria
            .allows(&params(&[("org", "dev"), ("team", "b")]), &cache)
            .unwrap());
        assert!(!criteria
            .allows(&params(&[("org", "dev"), ("team", "c")]), &cache)
            .unwrap());
        assert!(!criteria
            .allows(
                &params(&[("org", "dev"), ("team", "a"), ("blocked", "true")]),
                &cache
            )
            .unwrap());
        assert!(!criteria
            .allows(&params(&[("org", "it"), ("team", "a")]), &cache)
            .unwrap());
    }

    #[test]
    fn test_bad_expression_reports_clause() {
        let cache = ExpressionCache::new();
        let criteria = Criteria::require_all(&["a =="]);
        let err = criteria.allows(&params(&[]), &cache).unwrap_err();
        assert!(err.to_string().contains("require-all"));
    }
}
