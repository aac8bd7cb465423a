//! In-memory import dataset.
//!
//! The export loader (out of scope here) normalizes an arbitrary forum dump
//! into four per-type record maps keyed by *original* (source) id, with raw
//! fields using the underscore-prefixed convention (`_username`, `_cid`,
//! `_timestamp`, ...). Records carry an engine-owned import state on top of
//! the raw fields; the raw fields themselves are read-only after load.
//!
//! Maps are concurrent because a phase's workers merge authoritative data
//! in parallel; the per-type id lists are fixed before any pipeline starts
//! and drive processing order only.

use dashmap::DashMap;
use serde_json::Value;
use std::fmt;

/// Loose bag of entity fields, exchanged with the target store as JSON.
pub type FieldBag = serde_json::Map<String, Value>;

/// Shallow merge: every entry of `src` is copied over `dst`, overwriting on
/// key collision (authoritative values win).
pub fn merge_fields(dst: &mut FieldBag, src: &FieldBag) {
    for (key, value) in src {
        dst.insert(key.clone(), value.clone());
    }
}

/// Why a record was left unimported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Declared parent is absent from the dataset or not imported.
    MissingParent { parent: String },
    /// No step of the username cascade produced a valid identity.
    InvalidUsername,
    /// The target rejected the creation request.
    CreationFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingParent { parent } => write!(f, "parent {} not imported", parent),
            SkipReason::InvalidUsername => write!(f, "no valid username"),
            SkipReason::CreationFailed(err) => write!(f, "creation failed: {}", err),
        }
    }
}

/// Engine-owned processing state of a record.
///
/// `Imported` is monotonic: once a record carries a target-assigned id it is
/// never re-created or demoted by later stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportState {
    Pending,
    Imported { id: i64 },
    Skipped { reason: SkipReason },
}

/// One source entity: raw fields plus import state and the authoritative
/// overlay merged back after the target accepted it.
#[derive(Debug, Clone)]
pub struct Record {
    raw: FieldBag,
    merged: FieldBag,
    state: ImportState,
}

impl Record {
    pub fn new(raw: FieldBag) -> Self {
        Self {
            raw,
            merged: FieldBag::new(),
            state: ImportState::Pending,
        }
    }

    pub fn state(&self) -> &ImportState {
        &self.state
    }

    /// Target-assigned id, when imported.
    pub fn imported_id(&self) -> Option<i64> {
        match self.state {
            ImportState::Imported { id } => Some(id),
            _ => None,
        }
    }

    pub fn is_imported(&self) -> bool {
        matches!(self.state, ImportState::Imported { .. })
    }

    /// Merge the authoritative fields and tag the record imported.
    /// No-op when the record already left the `Pending` state.
    pub fn mark_imported(&mut self, id: i64, authoritative: &FieldBag) {
        if self.state != ImportState::Pending {
            return;
        }
        merge_fields(&mut self.merged, authoritative);
        self.state = ImportState::Imported { id };
    }

    /// Tag the record skipped. No-op on an already imported record.
    pub fn mark_skipped(&mut self, reason: SkipReason) {
        if matches!(self.state, ImportState::Imported { .. }) {
            return;
        }
        self.state = ImportState::Skipped { reason };
    }

    /// Overlay a single engine-owned field without changing the state.
    pub fn set_field(&mut self, name: &str, value: Value) {
        self.merged.insert(name.to_string(), value);
    }

    /// Field lookup, authoritative overlay first, then raw source fields.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.merged.get(name).or_else(|| self.raw.get(name))
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }

    /// Integer view of a field; numeric strings are accepted, as exports
    /// disagree about id/timestamp representation.
    pub fn i64_field(&self, name: &str) -> Option<i64> {
        match self.field(name)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Loose truthiness matching the export conventions: absent, null,
    /// `false`, `0`, `""` and `"0"` are false, everything else true.
    pub fn truthy(&self, name: &str) -> bool {
        match self.field(name) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Some(Value::String(s)) => !s.is_empty() && s != "0",
            Some(_) => true,
        }
    }

    /// Canonical string form of an id-bearing field, so number and string
    /// encodings of the same source id compare equal.
    pub fn source_ref(&self, name: &str) -> Option<String> {
        match self.field(name)? {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }
}

/// The full dataset for one run: four record maps plus the fixed processing
/// order per type.
#[derive(Debug, Default)]
pub struct ImportDataset {
    pub users: DashMap<String, Record>,
    pub categories: DashMap<String, Record>,
    pub topics: DashMap<String, Record>,
    pub posts: DashMap<String, Record>,
    user_ids: Vec<String>,
    category_ids: Vec<String>,
    topic_ids: Vec<String>,
    post_ids: Vec<String>,
}

impl ImportDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&mut self, id: impl Into<String>, raw: FieldBag) {
        let id = id.into();
        self.user_ids.push(id.clone());
        self.users.insert(id, Record::new(raw));
    }

    pub fn add_category(&mut self, id: impl Into<String>, raw: FieldBag) {
        let id = id.into();
        self.category_ids.push(id.clone());
        self.categories.insert(id, Record::new(raw));
    }

    pub fn add_topic(&mut self, id: impl Into<String>, raw: FieldBag) {
        let id = id.into();
        self.topic_ids.push(id.clone());
        self.topics.insert(id, Record::new(raw));
    }

    pub fn add_post(&mut self, id: impl Into<String>, raw: FieldBag) {
        let id = id.into();
        self.post_ids.push(id.clone());
        self.posts.insert(id, Record::new(raw));
    }

    pub fn user_ids(&self) -> &[String] {
        &self.user_ids
    }

    pub fn category_ids(&self) -> &[String] {
        &self.category_ids
    }

    pub fn topic_ids(&self) -> &[String] {
        &self.topic_ids
    }

    pub fn post_ids(&self) -> &[String] {
        &self.post_ids
    }
}

/// True iff the declared parent exists and has been imported.
///
/// The single gate used by the topic pipeline (parent = category) and the
/// post pipeline (parent = topic).
pub fn can_import_child(parent: Option<&Record>) -> bool {
    parent.map(Record::is_imported).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(value: Value) -> FieldBag {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn imported_state_is_monotonic() {
        let mut record = Record::new(bag(json!({"_name": "general"})));
        assert_eq!(record.state(), &ImportState::Pending);

        let mut authoritative = FieldBag::new();
        authoritative.insert("cid".into(), json!(7));
        record.mark_imported(7, &authoritative);
        assert_eq!(record.imported_id(), Some(7));

        record.mark_skipped(SkipReason::InvalidUsername);
        assert_eq!(record.imported_id(), Some(7));

        record.mark_imported(8, &FieldBag::new());
        assert_eq!(record.imported_id(), Some(7));
    }

    #[test]
    fn merged_fields_shadow_raw_fields() {
        let mut record = Record::new(bag(json!({"_slug": "old", "_views": "42"})));
        assert_eq!(record.str_field("_slug"), Some("old"));
        assert_eq!(record.i64_field("_views"), Some(42));

        record.set_field("_slug", json!("new"));
        assert_eq!(record.str_field("_slug"), Some("new"));
    }

    #[test]
    fn truthiness_follows_export_conventions() {
        let record = Record::new(bag(json!({
            "a": 1, "b": 0, "c": "", "d": "0", "e": "yes", "f": true, "g": null
        })));
        assert!(record.truthy("a"));
        assert!(!record.truthy("b"));
        assert!(!record.truthy("c"));
        assert!(!record.truthy("d"));
        assert!(record.truthy("e"));
        assert!(record.truthy("f"));
        assert!(!record.truthy("g"));
        assert!(!record.truthy("missing"));
    }

    #[test]
    fn source_refs_compare_numbers_and_strings() {
        let record = Record::new(bag(json!({"_uid": 12, "_cid": "12"})));
        assert_eq!(record.source_ref("_uid"), record.source_ref("_cid"));
    }

    #[test]
    fn gate_requires_an_imported_parent() {
        assert!(!can_import_child(None));

        let mut parent = Record::new(FieldBag::new());
        assert!(!can_import_child(Some(&parent)));

        parent.mark_imported(3, &FieldBag::new());
        assert!(can_import_child(Some(&parent)));
    }
}
