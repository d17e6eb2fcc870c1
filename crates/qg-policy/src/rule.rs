//! Rule model
//!
//! A [`RuleSet`] is the immutable, versioned result of parsing one business
//! rule document. Editing the document produces a new rule set with a new
//! version; nothing here is ever mutated after construction.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of enforceable rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    /// Statement verb or keyword that must not appear
    ForbiddenKeyword,
    /// Clause every applicable statement must carry
    RequiredClause,
    /// Ceiling on an explicit row limit
    RowLimitMax,
    /// Table that must not be referenced
    TableRestriction,
    /// Column that must stay hidden
    ColumnRestriction,
}

impl RuleKind {
    /// Stable textual form, matching the serialized name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForbiddenKeyword => "forbidden-keyword",
            Self::RequiredClause => "required-clause",
            Self::RowLimitMax => "row-limit-max",
            Self::TableRestriction => "table-restriction",
            Self::ColumnRestriction => "column-restriction",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic rule identifier: `rule-<line>-<n>`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    /// Identifier of the `n`-th rule produced by source line `line`
    #[inline]
    #[must_use]
    pub fn new(line: usize, n: usize) -> Self {
        Self(format!("rule-{line}-{n}"))
    }

    /// Borrow as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Clauses a required-clause rule can demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Clause {
    /// `LIMIT n` / `TOP n` / `FETCH FIRST n ROWS`
    Limit,
    /// `WHERE ...`
    Where,
    /// `ORDER BY ...`
    OrderBy,
    /// `GROUP BY ...`
    GroupBy,
}

impl Clause {
    /// Canonical keyword, used as the rule pattern
    #[inline]
    #[must_use]
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Limit => "LIMIT",
            Self::Where => "WHERE",
            Self::OrderBy => "ORDER BY",
            Self::GroupBy => "GROUP BY",
        }
    }

    /// Parse a canonical keyword (case and inner whitespace insensitive)
    #[must_use]
    pub fn from_keyword(value: &str) -> Option<Self> {
        let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_uppercase().as_str() {
            "LIMIT" | "ROW LIMIT" => Some(Self::Limit),
            "WHERE" | "WHERE CLAUSE" => Some(Self::Where),
            "ORDER BY" => Some(Self::OrderBy),
            "GROUP BY" => Some(Self::GroupBy),
            _ => None,
        }
    }

    /// Whether a statement with leading verb `verb` is subject to this clause
    #[must_use]
    pub fn applies_to(&self, verb: &str) -> bool {
        match self {
            Self::Where => matches!(verb, "SELECT" | "WITH" | "UPDATE" | "DELETE"),
            Self::Limit | Self::OrderBy | Self::GroupBy => matches!(verb, "SELECT" | "WITH"),
        }
    }
}

/// One enforceable business rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    id: RuleId,
    kind: RuleKind,
    pattern: String,
    message: String,
}

impl Rule {
    pub(crate) fn new(
        id: RuleId,
        kind: RuleKind,
        pattern: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id,
            kind,
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Rule identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> &RuleId {
        &self.id
    }

    /// Rule kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    /// Normalized pattern: uppercase keyword, clause keyword, decimal ceiling,
    /// or lowercase table/column name depending on the kind
    #[inline]
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The directive as written in the source document
    #[inline]
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Ceiling of a row-limit rule
    #[must_use]
    pub fn row_limit(&self) -> Option<u64> {
        match self.kind {
            RuleKind::RowLimitMax => self.pattern.parse().ok(),
            _ => None,
        }
    }

    /// Clause demanded by a required-clause rule
    #[must_use]
    pub fn clause(&self) -> Option<Clause> {
        match self.kind {
            RuleKind::RequiredClause => Clause::from_keyword(&self.pattern),
            _ => None,
        }
    }
}

/// Non-enforceable line kept alongside the rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    /// 1-based source line
    pub line: usize,
    /// Line text with list markers removed
    pub text: String,
}

/// Content-derived rule set version (BLAKE3 of the source text, hex)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSetVersion(String);

impl RuleSetVersion {
    /// Version of the given source text
    #[must_use]
    pub fn of(source: &str) -> Self {
        Self(blake3::hash(source.as_bytes()).to_hex().to_string())
    }

    /// Full hex digest
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for logs
    #[inline]
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for RuleSetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable parsed form of a business-rule document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    version: RuleSetVersion,
    source_text: String,
    rules: Vec<Rule>,
    annotations: Vec<Annotation>,
}

impl RuleSet {
    pub(crate) fn new(source_text: &str, rules: Vec<Rule>, annotations: Vec<Annotation>) -> Self {
        Self {
            version: RuleSetVersion::of(source_text),
            source_text: source_text.to_string(),
            rules,
            annotations,
        }
    }

    /// Rule set of the empty document: no restrictions
    #[must_use]
    pub fn empty() -> Self {
        Self::new("", Vec::new(), Vec::new())
    }

    /// Content version
    #[inline]
    #[must_use]
    pub fn version(&self) -> &RuleSetVersion {
        &self.version
    }

    /// Document the rules were parsed from
    #[inline]
    #[must_use]
    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    /// Rules in document order
    #[inline]
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Lines that did not match any directive
    #[inline]
    #[must_use]
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Rules of one kind, in document order
    pub fn rules_of(&self, kind: RuleKind) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |r| r.kind == kind)
    }

    /// Find a rule by id
    #[must_use]
    pub fn rule(&self, id: &RuleId) -> Option<&Rule> {
        self.rules.iter().find(|r| &r.id == id)
    }

    /// Number of enforceable rules
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when nothing is enforced
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
