//! Loose lexical scan of a query string
//!
//! Not a SQL parser. Comments are dropped, quoting and bracketing characters
//! become spaces, the text is lowercased and split into statements on `;`.
//! In SQL, single-quoted string literals are removed outright; in a
//! natural-language question an apostrophe is just a space.
//! What comes out is enough for keyword, clause, row-limit and identifier
//! checks.

use crate::parser::STATEMENT_VERBS;
use crate::rule::Clause;
use once_cell::sync::Lazy;
use regex::Regex;

/// Leading words that make a statement look like SQL, besides
/// [`STATEMENT_VERBS`]
const READ_VERBS: &[&str] = &["WITH", "SHOW", "DESCRIBE", "EXPLAIN"];

/// Verbs that also open English sentences. A query led by one of these
/// counts as SQL only with a structural keyword, `*` or `;` in it.
const SENTENCE_VERBS: &[&str] = &["SELECT", "SHOW", "UPDATE", "DESCRIBE", "EXPLAIN", "WITH", "REPLACE"];

static BLOCK_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("block comment regex"));

static LINE_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--[^\n]*").expect("line comment regex"));

static STRUCTURAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:from|into|table|set|where|values|join|limit|database|index|view|schema)\b")
        .expect("structural keyword regex")
});

static STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'(?:[^']|'')*'").expect("string literal regex"));

// `LIMIT offset, count` is tried first so the count is captured
static LIMIT_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\blimit\s+\d+\s*,\s*(\d+)|\blimit\s+(\d+)|\btop\s*\(?\s*(\d+)|\bfetch\s+(?:first|next)\s+(\d+)\s+rows?\b")
        .expect("limit value regex")
});

static WHERE_CLAUSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bwhere\b").expect("where regex"));

static ORDER_BY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\border\s+by\b").expect("order by regex"));

static GROUP_BY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bgroup\s+by\b").expect("group by regex"));

/// One `;`-separated statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    verb: Option<String>,
    text: String,
}

impl Statement {
    fn new(text: &str) -> Self {
        let head = text.trim_start_matches(|c: char| c == '(' || c.is_whitespace());
        let word: String = head
            .chars()
            .take_while(char::is_ascii_alphabetic)
            .collect::<String>()
            .to_ascii_uppercase();
        let verb = (STATEMENT_VERBS.contains(&word.as_str()) || READ_VERBS.contains(&word.as_str()))
            .then_some(word);
        Self {
            verb,
            text: text.to_string(),
        }
    }

    /// Uppercase leading verb, when the statement starts with one
    #[inline]
    #[must_use]
    pub fn verb(&self) -> Option<&str> {
        self.verb.as_deref()
    }

    /// Normalized (lowercase, unquoted) statement text
    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Largest explicit row limit in this statement
    #[must_use]
    pub fn row_limit(&self) -> Option<u64> {
        LIMIT_VALUE
            .captures_iter(&self.text)
            .filter_map(|caps| caps.iter().skip(1).flatten().next().map(|m| m.as_str()))
            .map(|digits| digits.parse::<u64>().unwrap_or(u64::MAX))
            .max()
    }

    /// Whether the statement carries the given clause
    #[must_use]
    pub fn has_clause(&self, clause: Clause) -> bool {
        match clause {
            Clause::Limit => self.row_limit().is_some(),
            Clause::Where => WHERE_CLAUSE.is_match(&self.text),
            Clause::OrderBy => ORDER_BY.is_match(&self.text),
            Clause::GroupBy => GROUP_BY.is_match(&self.text),
        }
    }
}

/// Result of scanning one query string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryScan {
    text: String,
    statements: Vec<Statement>,
    is_sql: bool,
}

impl QueryScan {
    /// Scan a raw query
    #[must_use]
    pub fn new(query: &str) -> Self {
        let without_blocks = BLOCK_COMMENT.replace_all(query, " ");
        let without_comments = LINE_COMMENT.replace_all(&without_blocks, " ");

        let text = normalize(&without_comments);
        let statements = split_statements(&text);
        let is_sql = match statements.first().and_then(Statement::verb) {
            Some(verb) if SENTENCE_VERBS.contains(&verb) => {
                STRUCTURAL.is_match(&text) || text.contains('*') || query.contains(';')
            }
            Some(_) => true,
            None => false,
        };
        if !is_sql {
            return Self {
                text,
                statements,
                is_sql,
            };
        }

        let text = normalize(&STRING_LITERAL.replace_all(&without_comments, " "));
        Self {
            statements: split_statements(&text),
            text,
            is_sql,
        }
    }

    /// Whether the query looks like SQL rather than a natural-language question
    #[inline]
    #[must_use]
    pub fn is_sql(&self) -> bool {
        self.is_sql
    }

    /// Normalized full text
    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Statements in order
    #[inline]
    #[must_use]
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Leading verbs of all statements that have one
    pub fn verbs(&self) -> impl Iterator<Item = &str> {
        self.statements.iter().filter_map(Statement::verb)
    }

    /// Largest explicit row limit across statements
    #[must_use]
    pub fn row_limit(&self) -> Option<u64> {
        self.statements.iter().filter_map(Statement::row_limit).max()
    }

    /// Case-insensitive whole-word search; `[A-Za-z0-9_]` delimit words
    #[must_use]
    pub fn contains_word(&self, word: &str) -> bool {
        let needle = word.to_ascii_lowercase();
        if needle.is_empty() {
            return false;
        }
        let bytes = self.text.as_bytes();
        self.text.match_indices(needle.as_str()).any(|(start, _)| {
            let end = start + needle.len();
            let before_ok = start == 0 || !is_word_byte(bytes[start - 1]);
            let after_ok = end >= bytes.len() || !is_word_byte(bytes[end]);
            before_ok && after_ok
        })
    }
}

fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '"' | '`' | '[' | ']' | '\'' => ' ',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

fn split_statements(text: &str) -> Vec<Statement> {
    text.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Statement::new)
        .collect()
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
