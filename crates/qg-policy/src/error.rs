//! Error types for the policy layer
//!
//! Rule documents are loosely structured prose, so most lines can never fail:
//! anything unrecognized becomes an annotation. The only hard failures are
//! recognized directives whose own parameter cannot be read.

/// Errors while parsing a business-rule document
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Row-limit directive whose ceiling is not a non-negative integer
    #[error("line {line}: row limit '{value}' is not a non-negative integer")]
    InvalidRowLimit { line: usize, value: String },

    /// Required-clause directive naming a clause the validator cannot check
    #[error("line {line}: unknown required clause '{value}'")]
    UnknownClause { line: usize, value: String },

    /// Explicit `key: value` directive with nothing after the colon
    #[error("line {line}: '{directive}' directive has no value")]
    MissingValue { line: usize, directive: String },

    /// Value that cannot name a keyword, table or column
    #[error("line {line}: '{value}' is not a valid identifier")]
    InvalidIdentifier { line: usize, value: String },
}

impl ParseError {
    /// 1-based source line the error points at
    #[inline]
    #[must_use]
    pub fn line(&self) -> usize {
        match self {
            Self::InvalidRowLimit { line, .. }
            | Self::UnknownClause { line, .. }
            | Self::MissingValue { line, .. }
            | Self::InvalidIdentifier { line, .. } => *line,
        }
    }

    pub(crate) fn invalid_row_limit(line: usize, value: impl Into<String>) -> Self {
        Self::InvalidRowLimit {
            line,
            value: value.into(),
        }
    }
}
