//! Reusable fixtures for unit and integration tests.
//!
//! `MemoryStore` is a fully in-memory [`TargetStore`] standing in for the
//! live forum: it assigns its own ids, keeps objects/ordered sets/groups,
//! ships with the target's pre-existing account 1, and offers fault
//! injection (rejected creations, failing config writes, disabled key
//! enumeration) plus direct assertion helpers.

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::data::{FieldBag, merge_fields};
use crate::migrate::usernames::slugify;
use crate::store::{
    CreatedCategory, CreatedPost, CreatedTopic, NewCategory, NewPost, NewTopic, NewUser,
    StoreError, TargetStore,
};

/// Convenience: build a `FieldBag` from a `json!({...})` literal.
pub fn fields(value: Value) -> FieldBag {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

#[derive(Debug)]
struct MemoryState {
    objects: HashMap<String, FieldBag>,
    sorted_sets: HashMap<String, Vec<(f64, String)>>,
    groups: HashMap<String, BTreeSet<i64>>,
    category_ids: BTreeSet<i64>,
    user_ids: BTreeSet<i64>,
    topic_ids: BTreeSet<i64>,
    next_cid: i64,
    next_uid: i64,
    next_tid: i64,
    next_pid: i64,
    /// Monotonic creation clock, stands in for "now" on the target.
    clock: i64,
    reject_category_names: HashSet<String>,
    reject_usernames: HashSet<String>,
    fail_config_writes: bool,
    supports_key_patterns: bool,
}

impl Default for MemoryState {
    fn default() -> Self {
        let mut state = Self {
            objects: HashMap::new(),
            sorted_sets: HashMap::new(),
            groups: HashMap::new(),
            category_ids: BTreeSet::new(),
            user_ids: BTreeSet::new(),
            topic_ids: BTreeSet::new(),
            next_cid: 1,
            next_uid: 2,
            next_tid: 1,
            next_pid: 1,
            clock: 1_700_000_000_000,
            reject_category_names: HashSet::new(),
            reject_usernames: HashSet::new(),
            fail_config_writes: false,
            supports_key_patterns: true,
        };
        // the target ships with its own administrator account
        state.user_ids.insert(1);
        state
            .objects
            .insert("user:1".to_string(), fields(json!({"uid": 1, "username": "admin"})));
        state
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- fault injection --

    /// Make category creation fail for categories with this name.
    pub fn reject_category_named(&self, name: &str) {
        self.state.lock().reject_category_names.insert(name.to_string());
    }

    /// Make user creation fail for this username.
    pub fn reject_username(&self, username: &str) {
        self.state.lock().reject_usernames.insert(username.to_string());
    }

    pub fn fail_config_writes(&self, fail: bool) {
        self.state.lock().fail_config_writes = fail;
    }

    /// Simulate a backend without key-pattern enumeration.
    pub fn disable_key_patterns(&self) {
        self.state.lock().supports_key_patterns = false;
    }

    // -- seeding --

    pub fn seed_config(&self, config: FieldBag) {
        self.state.lock().objects.insert("config".to_string(), config);
    }

    /// Pre-populate plain member accounts (uid 2..) for purge tests.
    pub fn seed_users(&self, count: usize) {
        let mut state = self.state.lock();
        for _ in 0..count {
            let uid = state.next_uid;
            state.next_uid += 1;
            state.user_ids.insert(uid);
            state.objects.insert(
                format!("user:{}", uid),
                fields(json!({"uid": uid, "username": format!("seed{}", uid)})),
            );
        }
    }

    pub fn seed_categories(&self, count: usize) {
        let mut state = self.state.lock();
        for _ in 0..count {
            let cid = state.next_cid;
            state.next_cid += 1;
            state.category_ids.insert(cid);
            state
                .objects
                .insert(format!("category:{}", cid), fields(json!({"cid": cid})));
        }
    }

    // -- assertion helpers --

    pub fn object(&self, key: &str) -> Option<FieldBag> {
        self.state.lock().objects.get(key).cloned()
    }

    pub fn object_field(&self, key: &str, field: &str) -> Option<Value> {
        self.state
            .lock()
            .objects
            .get(key)
            .and_then(|bag| bag.get(field).cloned())
    }

    /// Members with scores, descending by score.
    pub fn sorted_set_desc(&self, key: &str) -> Vec<(String, f64)> {
        let state = self.state.lock();
        let mut entries: Vec<(String, f64)> = state
            .sorted_sets
            .get(key)
            .map(|set| set.iter().map(|(s, m)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        entries
    }

    pub fn group_members(&self, group: &str) -> Vec<i64> {
        self.state
            .lock()
            .groups
            .get(group)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn live_user_ids(&self) -> Vec<i64> {
        self.state.lock().user_ids.iter().copied().collect()
    }

    pub fn live_category_ids(&self) -> Vec<i64> {
        self.state.lock().category_ids.iter().copied().collect()
    }

    pub fn config(&self) -> FieldBag {
        self.object("config").unwrap_or_default()
    }
}

fn page(ids: &BTreeSet<i64>, start: usize, end: usize) -> Vec<i64> {
    ids.iter()
        .copied()
        .skip(start)
        .take(end.saturating_sub(start) + 1)
        .collect()
}

fn glob_match(pattern: &str, key: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == key;
    }
    let mut rest = key;
    for (index, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if index == 0 {
            match rest.strip_prefix(segment) {
                Some(stripped) => rest = stripped,
                None => return false,
            }
        } else if index == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(at) => rest = &rest[at + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn create_category(&self, category: NewCategory) -> Result<CreatedCategory, StoreError> {
        let mut state = self.state.lock();
        if state.reject_category_names.contains(&category.name) {
            return Err(StoreError::new(format!(
                "category \"{}\" rejected",
                category.name
            )));
        }
        let cid = state.next_cid;
        state.next_cid += 1;
        state.category_ids.insert(cid);

        let object = fields(json!({
            "cid": cid,
            "name": category.name,
            "slug": format!("{}/{}", cid, slugify(&category.name)),
            "description": category.description,
            "order": category.order,
            "disabled": category.disabled as i64,
            "icon": category.icon,
            "color": category.color,
            "bgColor": category.bg_color,
        }));
        state.objects.insert(format!("category:{}", cid), object.clone());
        Ok(CreatedCategory { cid, fields: object })
    }

    async fn create_user(&self, user: NewUser) -> Result<i64, StoreError> {
        let mut state = self.state.lock();
        if state.reject_usernames.contains(&user.username) {
            return Err(StoreError::new(format!(
                "username \"{}\" rejected",
                user.username
            )));
        }
        let uid = state.next_uid;
        state.next_uid += 1;
        state.user_ids.insert(uid);
        state.objects.insert(
            format!("user:{}", uid),
            fields(json!({
                "uid": uid,
                "username": user.username,
                "userslug": slugify(&user.username),
                "email": user.email,
            })),
        );
        Ok(uid)
    }

    async fn create_topic(&self, topic: NewTopic) -> Result<CreatedTopic, StoreError> {
        let mut state = self.state.lock();
        if !state.category_ids.contains(&topic.cid) {
            return Err(StoreError::new(format!("no such category {}", topic.cid)));
        }
        let tid = state.next_tid;
        state.next_tid += 1;
        let pid = state.next_pid;
        state.next_pid += 1;
        state.clock += 1;
        let created_at = state.clock;
        state.topic_ids.insert(tid);

        let object = fields(json!({
            "tid": tid,
            "cid": topic.cid,
            "uid": topic.uid,
            "main_pid": pid,
            "slug": format!("{}/{}", tid, slugify(&topic.title)),
            "title": topic.title,
        }));
        state.objects.insert(format!("topic:{}", tid), object.clone());
        // the generated first post, stamped with the target's clock
        state.objects.insert(
            format!("post:{}", pid),
            fields(json!({
                "pid": pid,
                "tid": tid,
                "uid": topic.uid,
                "content": topic.content,
                "timestamp": created_at,
            })),
        );
        state
            .sorted_sets
            .entry(format!("topic:{}:posts", tid))
            .or_default()
            .push((created_at as f64, pid.to_string()));

        Ok(CreatedTopic {
            tid,
            main_pid: pid,
            fields: object,
        })
    }

    async fn create_post(&self, post: NewPost) -> Result<CreatedPost, StoreError> {
        let mut state = self.state.lock();
        if !state.topic_ids.contains(&post.tid) {
            return Err(StoreError::new(format!("no such topic {}", post.tid)));
        }
        let pid = state.next_pid;
        state.next_pid += 1;

        let object = fields(json!({
            "pid": pid,
            "tid": post.tid,
            "uid": post.uid,
            "content": post.content,
            "timestamp": post.timestamp,
            // reply references are accepted unvalidated
            "toPid": post.reply_to,
        }));
        state.objects.insert(format!("post:{}", pid), object.clone());
        state
            .sorted_sets
            .entry(format!("topic:{}:posts", post.tid))
            .or_default()
            .push((post.timestamp as f64, pid.to_string()));

        Ok(CreatedPost { pid, fields: object })
    }

    async fn purge_category(&self, cid: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.category_ids.remove(&cid);
        state.objects.remove(&format!("category:{}", cid));
        state.sorted_sets.remove(&format!("category:{}:topics", cid));

        // cascade topics and their posts
        let doomed: Vec<i64> = state
            .topic_ids
            .iter()
            .copied()
            .filter(|tid| {
                state
                    .objects
                    .get(&format!("topic:{}", tid))
                    .and_then(|bag| bag.get("cid"))
                    .and_then(Value::as_i64)
                    == Some(cid)
            })
            .collect();
        for tid in doomed {
            state.topic_ids.remove(&tid);
            state.objects.remove(&format!("topic:{}", tid));
            if let Some(posts) = state.sorted_sets.remove(&format!("topic:{}:posts", tid)) {
                for (_, pid) in posts {
                    state.objects.remove(&format!("post:{}", pid));
                }
            }
        }
        Ok(())
    }

    async fn delete_user(&self, uid: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.user_ids.remove(&uid);
        state.objects.remove(&format!("user:{}", uid));
        Ok(())
    }

    async fn category_count(&self) -> Result<usize, StoreError> {
        Ok(self.state.lock().category_ids.len())
    }

    async fn user_count(&self) -> Result<usize, StoreError> {
        Ok(self.state.lock().user_ids.len())
    }

    async fn category_ids(&self, start: usize, end: usize) -> Result<Vec<i64>, StoreError> {
        Ok(page(&self.state.lock().category_ids, start, end))
    }

    async fn user_ids(&self, start: usize, end: usize) -> Result<Vec<i64>, StoreError> {
        Ok(page(&self.state.lock().user_ids, start, end))
    }

    async fn set_object(&self, key: &str, new_fields: FieldBag) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if key == "config" && state.fail_config_writes {
            return Err(StoreError::new("config write refused"));
        }
        let entry = state.objects.entry(key.to_string()).or_default();
        merge_fields(entry, &new_fields);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Option<FieldBag>, StoreError> {
        Ok(self.state.lock().objects.get(key).cloned())
    }

    async fn set_object_field(
        &self,
        key: &str,
        field: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state
            .objects
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn get_object_field(&self, key: &str, field: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .state
            .lock()
            .objects
            .get(key)
            .and_then(|bag| bag.get(field).cloned()))
    }

    async fn delete_key(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.objects.remove(key);
        state.sorted_sets.remove(key);
        Ok(())
    }

    async fn set_user_fields(&self, uid: i64, new_fields: FieldBag) -> Result<(), StoreError> {
        self.set_object(&format!("user:{}", uid), new_fields).await
    }

    async fn set_post_fields(&self, pid: i64, new_fields: FieldBag) -> Result<(), StoreError> {
        self.set_object(&format!("post:{}", pid), new_fields).await
    }

    async fn sorted_set_add(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let set = state.sorted_sets.entry(key.to_string()).or_default();
        set.retain(|(_, m)| m != member);
        set.push((score, member.to_string()));
        Ok(())
    }

    async fn sorted_set_rev_range(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, StoreError> {
        let entries = self.sorted_set_desc(key);
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let len = entries.len() as i64;
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        let start = start.max(0);
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(entries[start as usize..=stop as usize]
            .iter()
            .map(|(member, _)| member.clone())
            .collect())
    }

    async fn join_group(&self, group: &str, uid: i64) -> Result<(), StoreError> {
        self.state
            .lock()
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(uid);
        Ok(())
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Option<Vec<String>>, StoreError> {
        let state = self.state.lock();
        if !state.supports_key_patterns {
            return Ok(None);
        }
        Ok(Some(
            state
                .objects
                .keys()
                .filter(|key| glob_match(pattern, key))
                .cloned()
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching_handles_prefix_middle_and_suffix() {
        assert!(glob_match("confirm:*", "confirm:abc"));
        assert!(!glob_match("confirm:*", "email:abc"));
        assert!(glob_match("email:*:confirm", "email:a@b.c:confirm"));
        assert!(!glob_match("email:*:confirm", "email:a@b.c:verified"));
        assert!(glob_match("config", "config"));
        assert!(!glob_match("config", "config2"));
    }

    #[tokio::test]
    async fn rev_range_orders_by_descending_score() {
        let store = MemoryStore::new();
        store.sorted_set_add("set", 10.0, "a").await.unwrap();
        store.sorted_set_add("set", 30.0, "b").await.unwrap();
        store.sorted_set_add("set", 20.0, "c").await.unwrap();

        let all = store.sorted_set_rev_range("set", 0, -1).await.unwrap();
        assert_eq!(all, vec!["b", "c", "a"]);

        let first = store.sorted_set_rev_range("set", 0, 0).await.unwrap();
        assert_eq!(first, vec!["b"]);
    }

    #[tokio::test]
    async fn sorted_set_add_rescores_existing_members() {
        let store = MemoryStore::new();
        store.sorted_set_add("set", 10.0, "a").await.unwrap();
        store.sorted_set_add("set", 99.0, "a").await.unwrap();
        assert_eq!(store.sorted_set_desc("set"), vec![("a".to_string(), 99.0)]);
    }
}
