//! Query validator (policy engine)
//!
//! Every rule is evaluated independently and every violation is reported;
//! a verdict is valid iff nothing was violated.

use crate::parser::STATEMENT_VERBS;
use crate::rule::{Rule, RuleId, RuleKind, RuleSet};
use crate::scan::QueryScan;
use serde::{Deserialize, Serialize};

/// One violated rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    /// Violated rule
    pub rule_id: RuleId,
    /// Kind of the violated rule
    pub kind: RuleKind,
    /// The rule as written, for display
    pub message: String,
}

impl Violation {
    fn of(rule: &Rule) -> Self {
        Self {
            rule_id: rule.id().clone(),
            kind: rule.kind(),
            message: rule.message().to_string(),
        }
    }
}

/// Policy decision for one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    valid: bool,
    violations: Vec<Violation>,
}

impl Verdict {
    /// Verdict with no violations
    #[inline]
    #[must_use]
    pub fn allow() -> Self {
        Self::from_violations(Vec::new())
    }

    /// Verdict from collected violations; valid iff empty
    #[inline]
    #[must_use]
    pub fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
        }
    }

    /// True when no rule was violated
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Violations in rule order
    #[inline]
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// All violation messages joined with `"; "`
    #[must_use]
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| v.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Stateless policy engine
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    /// Create new validator
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `query` against every rule in `rules`
    #[must_use]
    pub fn validate(&self, query: &str, rules: &RuleSet) -> Verdict {
        if rules.is_empty() {
            return Verdict::allow();
        }

        let scan = QueryScan::new(query);
        let violations: Vec<Violation> = rules
            .rules()
            .iter()
            .filter(|rule| violates(rule, &scan))
            .map(Violation::of)
            .collect();

        tracing::debug!(
            version = rules.version().short(),
            sql = scan.is_sql(),
            violations = violations.len(),
            "validated query"
        );
        Verdict::from_violations(violations)
    }
}

/// Evaluate `query` with the default validator
#[inline]
#[must_use]
pub fn validate(query: &str, rules: &RuleSet) -> Verdict {
    Validator::new().validate(query, rules)
}

fn violates(rule: &Rule, scan: &QueryScan) -> bool {
    match rule.kind() {
        RuleKind::ForbiddenKeyword => {
            scan.is_sql()
                && if STATEMENT_VERBS.contains(&rule.pattern()) {
                    scan.verbs().any(|verb| verb == rule.pattern())
                } else {
                    scan.contains_word(rule.pattern())
                }
        }
        RuleKind::RequiredClause => {
            scan.is_sql()
                && rule.clause().is_some_and(|clause| {
                    scan.statements().iter().any(|stmt| {
                        stmt.verb().is_some_and(|verb| clause.applies_to(verb))
                            && !stmt.has_clause(clause)
                    })
                })
        }
        RuleKind::RowLimitMax => {
            scan.is_sql()
                && matches!(
                    (rule.row_limit(), scan.row_limit()),
                    (Some(max), Some(found)) if found > max
                )
        }
        RuleKind::TableRestriction | RuleKind::ColumnRestriction => {
            scan.contains_word(rule.pattern())
        }
    }
}
