//! Store key derivation.
//!
//! Cache and result keys are plain `"{prefix}:{version}:{raw}"` strings.
//! Buffer keys identify a model row by its filter set: the filters are put in
//! canonical form (`name=value` pairs sorted by name, joined with `&`), hashed
//! with MD5, and combined with the model label.
//!
//! ```text
//! counter row     sentry.group:88b48b31b5f100719c64316596b10b0f
//! counter column  sentry.group:88b48b31b5f100719c64316596b10b0f:times_seen
//! extra rows      sentry.group:extra:88b48b31b5f100719c64316596b10b0f
//! ```
//!
//! The `extra` segment sits where a digest would be in counter keys, and a
//! digest is always 32 hex characters, so the two families never collide.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Builds a cache key from the configured prefix and version.
///
/// # Examples
///
/// ```
/// use tuplekit_cache::keys::cache_key;
///
/// assert_eq!(cache_key("", 1, "ololo"), ":1:ololo");
/// assert_eq!(cache_key("", 1, 123123), ":1:123123");
/// ```
#[must_use]
pub fn cache_key(prefix: &str, version: u32, raw: impl fmt::Display) -> String {
    format!("{prefix}:{version}:{raw}")
}

/// `app_label.model_name` identity of a model, rendered lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelLabel {
    app_label: String,
    model_name: String,
}

impl ModelLabel {
    /// Creates a label. Both parts are lowercased.
    #[must_use]
    pub fn new(app_label: &str, model_name: &str) -> Self {
        Self { app_label: app_label.to_lowercase(), model_name: model_name.to_lowercase() }
    }

    /// The application part.
    #[must_use]
    pub fn app_label(&self) -> &str {
        &self.app_label
    }

    /// The lowercased model name.
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl fmt::Display for ModelLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.model_name)
    }
}

impl TryFrom<String> for ModelLabel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.split_once('.') {
            Some((app, model)) if !app.is_empty() && !model.is_empty() => Ok(Self::new(app, model)),
            _ => Err(format!("model label '{value}' is not of the form app.model")),
        }
    }
}

impl From<ModelLabel> for String {
    fn from(label: ModelLabel) -> Self {
        label.to_string()
    }
}

/// Reference to a stored entity, used as a filter value.
///
/// Canonicalizes to its identity alone, so `{"project": <Project 1>}` and
/// `{"project": 1}` address the same buffer row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Model the entity belongs to.
    pub model: ModelLabel,
    /// String form of its primary key.
    pub id: String,
}

impl EntityRef {
    /// Creates a reference from any displayable primary key.
    #[must_use]
    pub fn new(model: ModelLabel, id: impl fmt::Display) -> Self {
        Self { model, id: id.to_string() }
    }
}

/// A single filter value identifying a buffered row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterValue {
    /// Integer, e.g. a primary key.
    Int(i64),
    /// Text, kept verbatim (unicode included).
    Str(String),
    /// Boolean, rendered `True`/`False`.
    Bool(bool),
    /// Another entity, rendered as its identity.
    Entity(EntityRef),
}

impl FilterValue {
    /// Stable string form used in the canonical filter set.
    #[must_use]
    pub fn coerce(&self) -> String {
        match self {
            Self::Int(n) => n.to_string(),
            Self::Str(s) => s.clone(),
            Self::Bool(true) => "True".to_owned(),
            Self::Bool(false) => "False".to_owned(),
            Self::Entity(entity) => entity.id.clone(),
        }
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<EntityRef> for FilterValue {
    fn from(value: EntityRef) -> Self {
        Self::Entity(value)
    }
}

/// Filter set identifying one model row. Ordered by field name.
pub type Filters = BTreeMap<String, FilterValue>;

/// Canonical form of a filter set: `name=value` pairs in name order, joined
/// with `&`.
#[must_use]
pub fn canonical_filters(filters: &Filters) -> String {
    filters
        .iter()
        .map(|(name, value)| format!("{name}={}", value.coerce()))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lowercase hex MD5 digest of the canonical filter set.
#[must_use]
pub fn filters_digest(filters: &Filters) -> String {
    hex::encode(md5::compute(canonical_filters(filters).as_bytes()).0)
}

/// Key of the whole counter row: `"{label}:{digest}"`.
#[must_use]
pub fn buffer_key(model: &ModelLabel, filters: &Filters) -> String {
    BufferKeys::new(model, filters).row()
}

/// Key of one counter column: `"{label}:{digest}:{column}"`.
#[must_use]
pub fn buffer_column_key(model: &ModelLabel, filters: &Filters, column: &str) -> String {
    BufferKeys::new(model, filters).column(column)
}

/// Key of the extra attribute rows: `"{label}:extra:{digest}"`.
#[must_use]
pub fn extra_key(model: &ModelLabel, filters: &Filters) -> String {
    BufferKeys::new(model, filters).extra()
}

/// Every key derived from one `(model, filters)` identity, hashing once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferKeys {
    label: String,
    digest: String,
}

impl BufferKeys {
    /// Canonicalizes and hashes `filters`.
    #[must_use]
    pub fn new(model: &ModelLabel, filters: &Filters) -> Self {
        Self { label: model.to_string(), digest: filters_digest(filters) }
    }

    /// Whole-row key.
    #[must_use]
    pub fn row(&self) -> String {
        format!("{}:{}", self.label, self.digest)
    }

    /// Per-column counter key.
    #[must_use]
    pub fn column(&self, column: &str) -> String {
        format!("{}:{}:{column}", self.label, self.digest)
    }

    /// Extra attribute key.
    #[must_use]
    pub fn extra(&self) -> String {
        format!("{}:extra:{}", self.label, self.digest)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    fn group() -> ModelLabel {
        ModelLabel::new("sentry", "Group")
    }

    fn filters<const N: usize>(pairs: [(&str, FilterValue); N]) -> Filters {
        pairs.into_iter().map(|(k, v)| (k.to_owned(), v)).collect()
    }

    #[rstest]
    #[case::string("", 1, "ololo", ":1:ololo")]
    #[case::prefixed("site", 3, "user:9", "site:3:user:9")]
    fn test_cache_key(
        #[case] prefix: &str,
        #[case] version: u32,
        #[case] raw: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(cache_key(prefix, version, raw), expected);
    }

    #[test]
    fn test_cache_key_integer() {
        assert_eq!(cache_key("", 1, 123_123), ":1:123123");
    }

    #[test]
    fn test_model_label_lowercases() {
        assert_eq!(group().to_string(), "sentry.group");
        assert_eq!(group().model_name(), "group");
    }

    #[test]
    fn test_model_label_serde() {
        let json = serde_json::to_string(&group()).unwrap();
        assert_eq!(json, "\"sentry.group\"");
        let back: ModelLabel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, group());
        assert!(serde_json::from_str::<ModelLabel>("\"nodot\"").is_err());
    }

    #[rstest]
    #[case::int(FilterValue::Int(1), "1")]
    #[case::unicode(FilterValue::from("\u{201d}"), "”")]
    #[case::bool_true(FilterValue::Bool(true), "True")]
    #[case::bool_false(FilterValue::Bool(false), "False")]
    #[case::entity(FilterValue::from(EntityRef::new(ModelLabel::new("sentry", "Project"), 1)), "1")]
    fn test_coerce(#[case] value: FilterValue, #[case] expected: &str) {
        assert_eq!(value.coerce(), expected);
    }

    #[test]
    fn test_canonical_sorts_by_name() {
        let f = filters([("project", FilterValue::Int(3)), ("hash", FilterValue::from("abc"))]);
        assert_eq!(canonical_filters(&f), "hash=abc&project=3");
    }

    #[test]
    fn test_group_times_seen_key() {
        let f = filters([("pk", FilterValue::Int(1))]);
        assert_eq!(
            buffer_column_key(&group(), &f, "times_seen"),
            "sentry.group:88b48b31b5f100719c64316596b10b0f:times_seen"
        );
        assert_eq!(buffer_key(&group(), &f), "sentry.group:88b48b31b5f100719c64316596b10b0f");
    }

    #[test]
    fn test_group_extra_key() {
        let f = filters([("pk", FilterValue::Int(1))]);
        assert_eq!(extra_key(&group(), &f), "sentry.group:extra:88b48b31b5f100719c64316596b10b0f");
    }

    #[test]
    fn test_entity_and_raw_id_share_identity() {
        let project = ModelLabel::new("sentry", "Project");
        let by_entity = filters([("project", FilterValue::from(EntityRef::new(project, 7)))]);
        let by_id = filters([("project", FilterValue::Int(7))]);
        assert_eq!(buffer_key(&group(), &by_entity), buffer_key(&group(), &by_id));
    }

    proptest! {
        /// Counter keys and the extra key of one identity never coincide.
        #[test]
        fn extra_key_never_collides(pk in any::<i64>(), column in "[a-z_]{1,12}") {
            let f = filters([("pk", FilterValue::Int(pk))]);
            let keys = BufferKeys::new(&group(), &f);
            prop_assert_ne!(keys.extra(), keys.row());
            prop_assert_ne!(keys.extra(), keys.column(&column));
        }

        /// Insertion order of filters does not change the key.
        #[test]
        fn key_is_order_independent(a in any::<i64>(), b in ".*") {
            let mut first = Filters::new();
            first.insert("a".into(), FilterValue::Int(a));
            first.insert("b".into(), FilterValue::Str(b.clone()));
            let mut second = Filters::new();
            second.insert("b".into(), FilterValue::Str(b));
            second.insert("a".into(), FilterValue::Int(a));
            prop_assert_eq!(buffer_key(&group(), &first), buffer_key(&group(), &second));
        }
    }
}
