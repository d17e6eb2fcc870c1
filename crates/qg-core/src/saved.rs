//! Saved query registry
//!
//! Reusable query templates with CRUD operations. Deleting an unknown id is
//! a no-op.

use crate::error::RegistryError;
use crate::types::{QueryKind, QueryRequest, QueryTarget};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Saved query identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SavedQueryId(String);

impl SavedQueryId {
    /// Generate new id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Borrow as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SavedQueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SavedQueryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SavedQueryId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SavedQueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored query template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedQuery {
    /// Identifier
    pub id: SavedQueryId,
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Query text
    pub query: String,
    /// Backend family the query is written for
    pub kind: QueryKind,
    /// Tags, trimmed and unique
    #[serde(default)]
    pub tags: Vec<String>,
    /// Owner
    pub owner_id: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl SavedQuery {
    /// Request that runs this template for `user_id` against `target_id`
    #[must_use]
    pub fn to_request(&self, user_id: impl Into<String>, target_id: impl Into<String>) -> QueryRequest {
        QueryRequest::new(user_id, QueryTarget::for_kind(self.kind, target_id), self.query.clone())
    }

    fn matches(&self, filter: &SavedQueryFilter) -> bool {
        filter.kind.map_or(true, |k| self.kind == k)
            && filter.owner_id.as_deref().map_or(true, |o| self.owner_id == o)
            && filter
                .tag
                .as_deref()
                .map_or(true, |t| self.tags.iter().any(|tag| tag.eq_ignore_ascii_case(t.trim())))
            && filter.search.as_deref().map_or(true, |term| {
                let term = term.to_lowercase();
                [&self.name, &self.description, &self.query]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&term))
            })
    }
}

/// Input for [`SavedQueryRegistry::create`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSavedQuery {
    /// Display name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Query text
    pub query: String,
    /// Backend family
    pub kind: QueryKind,
    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Owner
    #[serde(default)]
    pub owner_id: String,
}

impl NewSavedQuery {
    /// Create new input
    #[must_use]
    pub fn new(name: impl Into<String>, query: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            query: query.into(),
            kind,
            tags: Vec::new(),
            owner_id: String::new(),
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// With tags
    #[inline]
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// With owner
    #[inline]
    #[must_use]
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }
}

/// Partial update; unset fields keep their value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedQueryPatch {
    /// New name
    pub name: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New query text
    pub query: Option<String>,
    /// New kind
    pub kind: Option<QueryKind>,
    /// Replacement tags
    pub tags: Option<Vec<String>>,
}

impl SavedQueryPatch {
    /// Create empty patch
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With name
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// With query text
    #[inline]
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// With tags
    #[inline]
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }
}

/// Listing filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedQueryFilter {
    /// Backend family
    pub kind: Option<QueryKind>,
    /// Tag (case-insensitive)
    pub tag: Option<String>,
    /// Case-insensitive substring of name, description or query
    pub search: Option<String>,
    /// Owner
    pub owner_id: Option<String>,
}

impl SavedQueryFilter {
    /// Create empty filter
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With kind
    #[inline]
    #[must_use]
    pub fn with_kind(mut self, kind: QueryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// With tag
    #[inline]
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// With search term
    #[inline]
    #[must_use]
    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// With owner
    #[inline]
    #[must_use]
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }
}

/// In-memory saved query store
#[derive(Debug, Default)]
pub struct SavedQueryRegistry {
    entries: DashMap<SavedQueryId, SavedQuery>,
}

impl SavedQueryRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new template
    ///
    /// # Errors
    /// [`RegistryError::Invalid`] for an empty name or query.
    pub fn create(&self, input: NewSavedQuery) -> Result<SavedQuery, RegistryError> {
        let name = required("name", &input.name)?;
        let query = required("query", &input.query)?;
        let now = Utc::now();
        let saved = SavedQuery {
            id: SavedQueryId::new(),
            name,
            description: input.description.trim().to_string(),
            query,
            kind: input.kind,
            tags: normalize_tags(input.tags),
            owner_id: input.owner_id,
            created_at: now,
            updated_at: now,
        };
        self.entries.insert(saved.id.clone(), saved.clone());
        tracing::debug!(id = %saved.id, name = %saved.name, "saved query created");
        Ok(saved)
    }

    /// Merge `patch` into an existing template and bump `updated_at`
    ///
    /// # Errors
    /// [`RegistryError::NotFound`] for an unknown id,
    /// [`RegistryError::Invalid`] when the patch empties the name or query.
    pub fn update(&self, id: &SavedQueryId, patch: SavedQueryPatch) -> Result<SavedQuery, RegistryError> {
        let name = patch.name.as_deref().map(|n| required("name", n)).transpose()?;
        let query = patch.query.as_deref().map(|q| required("query", q)).transpose()?;

        let mut entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let saved = entry.value_mut();
        if let Some(name) = name {
            saved.name = name;
        }
        if let Some(query) = query {
            saved.query = query;
        }
        if let Some(description) = patch.description {
            saved.description = description.trim().to_string();
        }
        if let Some(kind) = patch.kind {
            saved.kind = kind;
        }
        if let Some(tags) = patch.tags {
            saved.tags = normalize_tags(tags);
        }
        saved.updated_at = Utc::now().max(saved.updated_at);
        Ok(saved.clone())
    }

    /// Remove a template; returns whether it existed
    pub fn delete(&self, id: &SavedQueryId) -> bool {
        let removed = self.entries.remove(id).is_some();
        tracing::debug!(%id, removed, "saved query delete");
        removed
    }

    /// Template by id
    #[must_use]
    pub fn get(&self, id: &SavedQueryId) -> Option<SavedQuery> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    /// Templates matching `filter`, most recently updated first
    #[must_use]
    pub fn list(&self, filter: &SavedQueryFilter) -> Vec<SavedQuery> {
        let mut found: Vec<SavedQuery> = self
            .entries
            .iter()
            .filter(|e| e.value().matches(filter))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.id.cmp(&a.id)));
        found
    }

    /// Number of stored templates
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is stored
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn required(field: &str, value: &str) -> Result<String, RegistryError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::Invalid(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            out.push(tag.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(registry: &SavedQueryRegistry, name: &str) -> SavedQuery {
        registry
            .create(
                NewSavedQuery::new(name, "SELECT * FROM orders LIMIT 10", QueryKind::Database)
                    .with_owner("u1")
                    .with_tags([" sales ", "daily", "Sales"]),
            )
            .unwrap()
    }

    #[test]
    fn create_normalizes_input() {
        let registry = SavedQueryRegistry::new();
        let saved = sample(&registry, "  Daily orders ");
        assert_eq!(saved.name, "Daily orders");
        assert_eq!(saved.tags, vec!["sales", "daily"]);
        assert_eq!(saved.created_at, saved.updated_at);
        assert_eq!(registry.get(&saved.id), Some(saved));
    }

    #[test]
    fn create_rejects_empty_fields() {
        let registry = SavedQueryRegistry::new();
        let err = registry
            .create(NewSavedQuery::new("  ", "SELECT 1", QueryKind::Database))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Invalid(_)));
        assert!(registry
            .create(NewSavedQuery::new("name", "", QueryKind::File))
            .is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn ids_are_unique() {
        let registry = SavedQueryRegistry::new();
        let a = sample(&registry, "a");
        let b = sample(&registry, "a");
        assert_ne!(a.id, b.id);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn update_merges_and_bumps_timestamp() {
        let registry = SavedQueryRegistry::new();
        let saved = sample(&registry, "orders");
        let updated = registry
            .update(&saved.id, SavedQueryPatch::new().with_description("top ten"))
            .unwrap();
        assert_eq!(updated.name, "orders");
        assert_eq!(updated.description, "top ten");
        assert_eq!(updated.query, saved.query);
        assert!(updated.updated_at >= saved.updated_at);
        assert_eq!(updated.created_at, saved.created_at);
    }

    #[test]
    fn update_errors() {
        let registry = SavedQueryRegistry::new();
        let missing = SavedQueryId::from("missing");
        assert_eq!(
            registry.update(&missing, SavedQueryPatch::new().with_name("x")),
            Err(RegistryError::NotFound(missing))
        );

        let saved = sample(&registry, "orders");
        assert!(matches!(
            registry.update(&saved.id, SavedQueryPatch::new().with_query(" ")),
            Err(RegistryError::Invalid(_))
        ));
        assert_eq!(registry.get(&saved.id).unwrap().query, saved.query);
    }

    #[test]
    fn delete_is_idempotent() {
        let registry = SavedQueryRegistry::new();
        let saved = sample(&registry, "orders");
        assert!(!registry.delete(&SavedQueryId::from("unknown-id")));
        assert_eq!(registry.len(), 1);
        assert!(registry.delete(&saved.id));
        assert!(!registry.delete(&saved.id));
        assert!(registry.is_empty());
    }

    #[test]
    fn list_filters_and_orders() {
        let registry = SavedQueryRegistry::new();
        let first = sample(&registry, "orders");
        registry
            .create(
                NewSavedQuery::new("contract summary", "summarize the renewal terms", QueryKind::File)
                    .with_owner("u2")
                    .with_description("legal"),
            )
            .unwrap();
        registry
            .update(&first.id, SavedQueryPatch::new().with_name("orders today"))
            .unwrap();

        let all = registry.list(&SavedQueryFilter::new());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "orders today");

        let files = registry.list(&SavedQueryFilter::new().with_kind(QueryKind::File));
        assert_eq!(files.len(), 1);

        assert_eq!(registry.list(&SavedQueryFilter::new().with_tag("SALES")).len(), 1);
        assert_eq!(registry.list(&SavedQueryFilter::new().with_search("LEGAL")).len(), 1);
        assert_eq!(registry.list(&SavedQueryFilter::new().with_search("renewal")).len(), 1);
        assert_eq!(registry.list(&SavedQueryFilter::new().with_owner("u2")).len(), 1);
        assert!(registry.list(&SavedQueryFilter::new().with_search("nothing")).is_empty());
    }

    #[test]
    fn to_request_uses_template_kind() {
        let registry = SavedQueryRegistry::new();
        let saved = sample(&registry, "orders");
        let request = saved.to_request("u9", "warehouse");
        assert_eq!(request.kind, QueryKind::Database);
        assert_eq!(request.target.id(), "warehouse");
        assert_eq!(request.raw_query, saved.query);
    }
}
