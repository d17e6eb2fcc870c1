//! Query governance policy layer (qg-policy)
//!
//! Turns a loosely structured business-rule document into an immutable,
//! versioned [`RuleSet`] and evaluates queries against it.
//!
//! # Quick Start
//!
//! ```rust
//! use qg_policy::prelude::*;
//!
//! let rules = parse("- no DELETE statements allowed\n- return at most 500 rows")?;
//! assert_eq!(rules.len(), 2);
//!
//! let verdict = validate("DELETE FROM orders", &rules);
//! assert!(!verdict.is_valid());
//! assert_eq!(verdict.violations()[0].kind, RuleKind::ForbiddenKeyword);
//! # Ok::<(), qg_policy::ParseError>(())
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod cache;
pub mod error;
pub mod parser;
pub mod rule;
pub mod scan;
pub mod validator;

// Re-exports
pub use cache::{CacheStats, RuleSetCache};
pub use error::ParseError;
pub use parser::{parse, RuleSetParser, STATEMENT_VERBS};
pub use rule::{Annotation, Clause, Rule, RuleId, RuleKind, RuleSet, RuleSetVersion};
pub use scan::{QueryScan, Statement};
pub use validator::{validate, Validator, Verdict, Violation};

/// Common imports
pub mod prelude {
    pub use crate::cache::RuleSetCache;
    pub use crate::error::ParseError;
    pub use crate::parser::{parse, RuleSetParser};
    pub use crate::rule::{RuleKind, RuleSet};
    pub use crate::validator::{validate, Validator, Verdict, Violation};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
