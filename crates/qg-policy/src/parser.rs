//! Business-rule document parser
//!
//! Line-oriented keyword/pattern matching, not a grammar. Each non-blank line
//! is tried against the directive shapes below, first match wins:
//!
//! 1. explicit `key: value` forms (`forbid: DELETE, DROP`, `max rows: 500`, ...)
//! 2. row ceilings (`return at most 500 rows`)
//! 3. required clauses (`queries must include a row limit`)
//! 4. table restrictions (`the salaries table is off-limits`)
//! 5. column restrictions (`never expose the ssn column`)
//! 6. forbidden statement verbs (`no DELETE statements allowed`)
//!
//! Anything else is kept as an [`Annotation`]. Only a recognized directive
//! with an unreadable parameter fails the parse.

use crate::error::ParseError;
use crate::rule::{Annotation, Clause, Rule, RuleId, RuleKind, RuleSet};
use once_cell::sync::Lazy;
use regex::Regex;

/// Statement verbs a forbidden-keyword directive may name
pub const STATEMENT_VERBS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT",
    "REVOKE", "MERGE", "REPLACE", "EXEC", "EXECUTE", "CALL",
];

const IDENT: &str = r"[A-Za-z_][A-Za-z0-9_.$]*";

static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[-*+>#]+|\d+[.)])\s*").expect("list marker regex"));

static EXPLICIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(forbidden|forbid|deny\s+tables?|deny|required|require|max(?:imum)?\s+row\s+limit|max(?:imum)?\s+rows|row\s+limit|restricted\s+tables?|restrict\s+tables?|hidden\s+columns?|hide\s+columns?|restricted\s+columns?|restrict\s+columns?)\s*:\s*(.*)$",
    )
    .expect("explicit directive regex")
});

static ROW_LIMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:at\s+most|no\s+more\s+than|maximum\s+of|maximum|max|up\s+to|limit(?:ed)?\s+to|cap(?:ped)?\s+at)\s+(\S+)\s+rows?\b",
    )
    .expect("row limit regex")
});

static REQUIREMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:must|should|always|required?|needs?\s+to|ha(?:ve|s)\s+to)\b")
        .expect("requirement regex")
});

static WITHOUT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bwithout\b").expect("without regex"));

static NEGATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:no|not|never|forbidden|prohibited|disallowed|don't|dont|cannot|can't|banned|mustn't|shouldn't)\b",
    )
    .expect("negation regex")
});

static RESTRICTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:restricted|off[-\s]limits|confidential|sensitive|hidden|private|no\s+access)\b")
        .expect("restriction regex")
});

static COLUMN_RESTRICTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:hide|mask(?:ed)?|expose[ds]?)\b").expect("column restriction regex")
});

static CLAUSE_PHRASES: Lazy<Vec<(Regex, Clause)>> = Lazy::new(|| {
    [
        (r"(?i)\border\s+by\b|\bordering\b|\bsorted\b", Clause::OrderBy),
        (r"(?i)\bgroup\s+by\b|\bgrouping\b", Clause::GroupBy),
        (r"(?i)\bwhere\b|\bfilter(?:s|ed)?\b", Clause::Where),
        (r"(?i)\blimits?\b", Clause::Limit),
    ]
    .into_iter()
    .map(|(pattern, clause)| (Regex::new(pattern).expect("clause regex"), clause))
    .collect()
});

static QUOTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r#"[`"'\[]({IDENT})[`"'\]]"#)).expect("quoted identifier regex")
});

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^{IDENT}$")).expect("identifier regex"));

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]+").expect("word regex"));

const STOPWORDS: &[&str] = &[
    "a", "access", "all", "allowed", "an", "and", "any", "are", "as", "at", "be", "by", "called",
    "can", "cannot", "column", "columns", "confidential", "contains", "data", "each", "every",
    "field", "fields", "for", "from", "hidden", "in", "into", "is", "it", "its", "may", "must",
    "named", "never", "no", "not", "of", "on", "or", "other", "our", "private", "queries", "query",
    "read", "restricted", "sensitive", "should", "table", "tables", "that", "the", "their",
    "these", "this", "those", "to", "use", "was", "which", "with", "write", "your",
];

/// Entity a restriction directive protects
#[derive(Debug, Clone, Copy)]
enum Entity {
    Table,
    Column,
}

struct EntityPatterns {
    word: Regex,
    colon_list: Regex,
    before: Regex,
    after: Regex,
}

impl EntityPatterns {
    fn new(word: &str) -> Self {
        Self {
            word: Regex::new(&format!(r"(?i)\b{word}\b")).expect("entity word regex"),
            colon_list: Regex::new(&format!(r"(?i)\b{word}\s*:\s*(.+)$"))
                .expect("entity list regex"),
            before: Regex::new(&format!(r"(?i)\b({IDENT})\s+{word}\b"))
                .expect("entity before regex"),
            after: Regex::new(&format!(r"(?i)\b{word}\s+(?:(?:named|called)\s+)?({IDENT})"))
                .expect("entity after regex"),
        }
    }
}

static TABLE: Lazy<EntityPatterns> = Lazy::new(|| EntityPatterns::new("tables?"));
static COLUMN: Lazy<EntityPatterns> = Lazy::new(|| EntityPatterns::new("(?:columns?|fields?)"));

impl Entity {
    fn patterns(self) -> &'static EntityPatterns {
        match self {
            Self::Table => &TABLE,
            Self::Column => &COLUMN,
        }
    }

    fn kind(self) -> RuleKind {
        match self {
            Self::Table => RuleKind::TableRestriction,
            Self::Column => RuleKind::ColumnRestriction,
        }
    }
}

/// Business-rule document parser
///
/// Stateless; parsing the same text twice yields equal [`RuleSet`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleSetParser;

impl RuleSetParser {
    /// Create new parser
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parse a rule document
    ///
    /// # Errors
    /// Returns [`ParseError`] when a recognized directive carries an
    /// unreadable parameter (non-numeric row limit, unknown clause, empty
    /// explicit value, malformed identifier).
    pub fn parse(&self, text: &str) -> Result<RuleSet, ParseError> {
        let mut rules = Vec::new();
        let mut annotations = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = strip_marker(raw);
            if line.is_empty() {
                continue;
            }

            match classify(line_no, line)? {
                Some((kind, patterns)) => {
                    rules.extend(patterns.into_iter().enumerate().map(|(n, pattern)| {
                        Rule::new(RuleId::new(line_no, n + 1), kind, pattern, line)
                    }));
                }
                None => annotations.push(Annotation {
                    line: line_no,
                    text: line.to_string(),
                }),
            }
        }

        let set = RuleSet::new(text, rules, annotations);
        tracing::debug!(
            version = set.version().short(),
            rules = set.len(),
            annotations = set.annotations().len(),
            "parsed rule document"
        );
        Ok(set)
    }
}

/// Parse a rule document with the default parser
///
/// # Errors
/// See [`RuleSetParser::parse`].
#[inline]
pub fn parse(text: &str) -> Result<RuleSet, ParseError> {
    RuleSetParser::new().parse(text)
}

fn strip_marker(raw: &str) -> &str {
    let trimmed = raw.trim();
    match LIST_MARKER.find(trimmed) {
        Some(m) => trimmed[m.end()..].trim(),
        None => trimmed,
    }
}

type Directive = Option<(RuleKind, Vec<String>)>;

fn classify(line_no: usize, line: &str) -> Result<Directive, ParseError> {
    if let Some(caps) = EXPLICIT.captures(line) {
        return explicit(line_no, &caps[1], caps[2].trim()).map(Some);
    }

    if let Some(caps) = ROW_LIMIT.captures(line) {
        let limit = parse_row_limit(line_no, &caps[1])?;
        return Ok(Some((RuleKind::RowLimitMax, vec![limit.to_string()])));
    }

    let negated = NEGATION.is_match(line);

    if (REQUIREMENT.is_match(line) && !negated) || WITHOUT.is_match(line) {
        let clauses = clauses_in(line);
        if !clauses.is_empty() {
            let patterns = clauses.iter().map(|c| c.keyword().to_string()).collect();
            return Ok(Some((RuleKind::RequiredClause, patterns)));
        }
    }

    let restricted = negated || RESTRICTION.is_match(line);

    if restricted && TABLE.word.is_match(line) {
        let names = extract_names(line, Entity::Table);
        if !names.is_empty() {
            return Ok(Some((Entity::Table.kind(), names)));
        }
    }

    if (restricted || COLUMN_RESTRICTION.is_match(line)) && COLUMN.word.is_match(line) {
        let names = extract_names(line, Entity::Column);
        if !names.is_empty() {
            return Ok(Some((Entity::Column.kind(), names)));
        }
    }

    if negated {
        let verbs = verbs_in(line);
        if !verbs.is_empty() {
            return Ok(Some((RuleKind::ForbiddenKeyword, verbs)));
        }
    }

    Ok(None)
}

fn explicit(line_no: usize, key: &str, value: &str) -> Result<(RuleKind, Vec<String>), ParseError> {
    let key = key
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();

    if value.is_empty() {
        return Err(ParseError::MissingValue {
            line: line_no,
            directive: key,
        });
    }

    let entity = if key.contains("table") {
        Some(Entity::Table)
    } else if key.contains("column") {
        Some(Entity::Column)
    } else {
        None
    };

    match (key.as_str(), entity) {
        (_, Some(entity)) => {
            let names = identifiers(line_no, value)?
                .into_iter()
                .map(|n| n.to_ascii_lowercase())
                .collect();
            Ok((entity.kind(), names))
        }
        ("forbid" | "forbidden" | "deny", None) => {
            let keywords = identifiers(line_no, value)?
                .into_iter()
                .map(|k| k.to_ascii_uppercase())
                .collect();
            Ok((RuleKind::ForbiddenKeyword, keywords))
        }
        ("require" | "required", None) => {
            let mut clauses = Vec::new();
            for item in value.split([',', ';']).map(str::trim).filter(|s| !s.is_empty()) {
                let clause = Clause::from_keyword(item).ok_or_else(|| ParseError::UnknownClause {
                    line: line_no,
                    value: item.to_string(),
                })?;
                let keyword = clause.keyword().to_string();
                if !clauses.contains(&keyword) {
                    clauses.push(keyword);
                }
            }
            Ok((RuleKind::RequiredClause, clauses))
        }
        _ => {
            let limit = parse_row_limit(line_no, value)?;
            Ok((RuleKind::RowLimitMax, vec![limit.to_string()]))
        }
    }
}

fn parse_row_limit(line_no: usize, raw: &str) -> Result<u64, ParseError> {
    let cleaned: String = raw.chars().filter(|c| !matches!(c, ',' | '_')).collect();
    cleaned
        .trim()
        .parse::<u64>()
        .map_err(|_| ParseError::invalid_row_limit(line_no, raw))
}

/// Split an explicit list value into validated identifiers
fn identifiers(line_no: usize, value: &str) -> Result<Vec<String>, ParseError> {
    let mut out: Vec<String> = Vec::new();
    let items = value
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .map(|s| s.trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | '[' | ']' | '.')))
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("and") && !s.eq_ignore_ascii_case("or"));

    for item in items {
        if !IDENTIFIER.is_match(item) {
            return Err(ParseError::InvalidIdentifier {
                line: line_no,
                value: item.to_string(),
            });
        }
        if !out.iter().any(|o| o.eq_ignore_ascii_case(item)) {
            out.push(item.to_string());
        }
    }

    if out.is_empty() {
        return Err(ParseError::MissingValue {
            line: line_no,
            directive: value.to_string(),
        });
    }
    Ok(out)
}

fn clauses_in(line: &str) -> Vec<Clause> {
    let mut found: Vec<(usize, Clause)> = CLAUSE_PHRASES
        .iter()
        .filter_map(|(re, clause)| re.find(line).map(|m| (m.start(), *clause)))
        .collect();
    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, clause)| clause).collect()
}

fn verbs_in(line: &str) -> Vec<String> {
    let mut verbs: Vec<String> = Vec::new();
    for word in WORD.find_iter(line) {
        let upper = word.as_str().to_ascii_uppercase();
        if STATEMENT_VERBS.contains(&upper.as_str()) && !verbs.contains(&upper) {
            verbs.push(upper);
        }
    }
    verbs
}

fn is_name_candidate(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    !STOPWORDS.contains(&lower.as_str())
        && !STATEMENT_VERBS.contains(&word.to_ascii_uppercase().as_str())
}

fn push_name(names: &mut Vec<String>, name: &str) {
    let lower = name.trim_end_matches('.').to_ascii_lowercase();
    if !lower.is_empty() && !names.contains(&lower) {
        names.push(lower);
    }
}

fn extract_names(line: &str, entity: Entity) -> Vec<String> {
    let patterns = entity.patterns();
    let mut names: Vec<String> = Vec::new();

    for caps in QUOTED.captures_iter(line) {
        if let Some(m) = caps.get(1) {
            push_name(&mut names, m.as_str());
        }
    }
    if !names.is_empty() {
        return names;
    }

    if let Some(caps) = patterns.colon_list.captures(line) {
        caps[1]
            .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .map(|s| s.trim_matches(|c: char| matches!(c, '.' | ')' | '(')))
            .filter(|s| IDENTIFIER.is_match(s) && is_name_candidate(s))
            .for_each(|s| push_name(&mut names, s));
        if !names.is_empty() {
            return names;
        }
    }

    let mut adjacent: Vec<(usize, &str)> = Vec::new();
    for re in [&patterns.before, &patterns.after] {
        for caps in re.captures_iter(line) {
            if let Some(m) = caps.get(1) {
                if is_name_candidate(m.as_str()) {
                    adjacent.push((m.start(), m.as_str()));
                }
            }
        }
    }
    adjacent.sort_by_key(|(pos, _)| *pos);
    for (_, name) in adjacent {
        push_name(&mut names, name);
    }
    names
}
