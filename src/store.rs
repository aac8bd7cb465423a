//! Abstract contract of the live target forum system.
//!
//! The engine never talks to a concrete storage backend. Everything it needs
//! from the target (entity creation with the target's own validation,
//! object/field access, ordered-set maintenance, group membership, purge
//! enumeration) is expressed here and implemented by the embedding
//! application; an in-memory implementation ships in `test_support`.
//!
//! Creation calls are the only place where an error is a *record-level*
//! event (the target rejected this one entity); pipelines warn and skip.
//! Errors from every other operation are treated as infrastructure failures
//! and abort the run.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::data::FieldBag;

/// Opaque target-side failure; the engine classifies by operation, not by
/// inspecting the error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone)]
pub struct NewCategory {
    pub name: String,
    pub description: String,
    pub order: i64,
    pub parent_cid: Option<i64>,
    pub disabled: bool,
    pub link: Option<String>,
    pub icon: String,
    pub color: String,
    pub bg_color: String,
}

/// Authoritative category as created by the target.
#[derive(Debug, Clone)]
pub struct CreatedCategory {
    pub cid: i64,
    pub fields: FieldBag,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTopic {
    pub uid: i64,
    pub cid: i64,
    pub title: String,
    pub content: String,
    pub thumbnail: Option<String>,
}

/// Topic plus its generated first post.
#[derive(Debug, Clone)]
pub struct CreatedTopic {
    pub tid: i64,
    pub main_pid: i64,
    pub fields: FieldBag,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub uid: i64,
    pub tid: i64,
    pub content: String,
    pub timestamp: i64,
    /// Reply target, passed through unvalidated; the reference may point at
    /// a post that does not exist (yet) and the target accepts it anyway.
    pub reply_to: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CreatedPost {
    pub pid: i64,
    pub fields: FieldBag,
}

#[async_trait]
pub trait TargetStore: Send + Sync {
    // -- entity creation (target applies its own validation) --

    async fn create_category(&self, category: NewCategory) -> Result<CreatedCategory, StoreError>;
    /// Returns the assigned user id.
    async fn create_user(&self, user: NewUser) -> Result<i64, StoreError>;
    async fn create_topic(&self, topic: NewTopic) -> Result<CreatedTopic, StoreError>;
    async fn create_post(&self, post: NewPost) -> Result<CreatedPost, StoreError>;

    // -- purge support --

    /// Purge one category by id, cascading its topics and posts.
    async fn purge_category(&self, cid: i64) -> Result<(), StoreError>;
    async fn delete_user(&self, uid: i64) -> Result<(), StoreError>;
    async fn category_count(&self) -> Result<usize, StoreError>;
    async fn user_count(&self) -> Result<usize, StoreError>;
    /// Ascending page of live ids, `start..=end` by rank.
    async fn category_ids(&self, start: usize, end: usize) -> Result<Vec<i64>, StoreError>;
    async fn user_ids(&self, start: usize, end: usize) -> Result<Vec<i64>, StoreError>;

    // -- object and field access --

    /// Merge `fields` into the object stored at `key`.
    async fn set_object(&self, key: &str, fields: FieldBag) -> Result<(), StoreError>;
    async fn get_object(&self, key: &str) -> Result<Option<FieldBag>, StoreError>;
    async fn set_object_field(&self, key: &str, field: &str, value: Value)
        -> Result<(), StoreError>;
    async fn get_object_field(&self, key: &str, field: &str)
        -> Result<Option<Value>, StoreError>;
    async fn delete_key(&self, key: &str) -> Result<(), StoreError>;
    async fn set_user_fields(&self, uid: i64, fields: FieldBag) -> Result<(), StoreError>;
    async fn set_post_fields(&self, pid: i64, fields: FieldBag) -> Result<(), StoreError>;

    // -- ordered sets --

    /// Add or rescore `member` in the ordered set at `key`.
    async fn sorted_set_add(&self, key: &str, score: f64, member: &str)
        -> Result<(), StoreError>;
    /// Members by descending score, ranks `start..=stop`; `-1` means "to the
    /// end".
    async fn sorted_set_rev_range(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, StoreError>;

    // -- groups --

    async fn join_group(&self, group: &str, uid: i64) -> Result<(), StoreError>;

    // -- best-effort key enumeration --

    /// Keys matching a `*` glob, or `None` when the backend cannot enumerate
    /// keys; callers must skip the dependent cleanup in that case.
    async fn keys_matching(&self, pattern: &str) -> Result<Option<Vec<String>>, StoreError>;
}
