use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::{RequestBody, Response};

/// Time-to-live used when a request enables caching without a `cache_time`.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Response,
    pub expire_at: Instant,
    pub inserted_at: Instant,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expire_at
    }
}

/// In-memory response cache with lazy expiry.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the live payload for `key`, evicting it if it has expired.
    pub fn get(&self, key: &str) -> Option<Response> {
        let mut entries = self.lock();
        let entry = entries.get(key)?;
        if entry.is_expired_at(Instant::now()) {
            entries.remove(key);
            return None;
        }
        Some(entry.payload.clone())
    }

    pub fn set(&self, key: impl Into<String>, payload: Response, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let entry = CacheEntry {
            key: key.clone(),
            payload,
            expire_at: now + ttl,
            inserted_at: now,
        };
        self.lock().insert(key, entry);
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn clean_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Cache key for a request.
///
/// Query pairs are sorted and JSON object keys are ordered recursively, so
/// two requests that differ only in parameter order share a key. Every
/// component is length-prefixed, so delimiters inside names or values cannot
/// make two distinct requests collide.
pub fn fingerprint(
    method: &str,
    url: &str,
    query: &[(String, String)],
    body: &RequestBody,
) -> String {
    let mut pairs: Vec<&(String, String)> = query.iter().collect();
    pairs.sort();

    let mut hasher = Sha256::new();
    update_len(&mut hasher, pairs.len());
    for (name, value) in pairs {
        update_field(&mut hasher, name.as_bytes());
        update_field(&mut hasher, value.as_bytes());
    }
    hash_body(&mut hasher, body);
    format!(
        "{}:{url}:{}",
        method.to_ascii_uppercase(),
        hex::encode(hasher.finalize())
    )
}

fn hash_body(hasher: &mut Sha256, body: &RequestBody) {
    match body {
        RequestBody::Empty => hasher.update(b"E"),
        RequestBody::Json(value) => {
            hasher.update(b"J");
            update_field(hasher, canonical_json(value).to_string().as_bytes());
        }
        RequestBody::Bytes { data, content_type } => {
            hasher.update(b"B");
            update_field(hasher, content_type.as_deref().unwrap_or_default().as_bytes());
            update_field(hasher, data);
        }
        RequestBody::Multipart(form) => {
            hasher.update(b"M");
            update_len(hasher, form.fields.len());
            for (name, value) in &form.fields {
                update_field(hasher, name.as_bytes());
                update_field(hasher, value.as_bytes());
            }
            update_len(hasher, form.files.len());
            for (name, file) in &form.files {
                update_field(hasher, name.as_bytes());
                update_field(hasher, file.file_name.as_bytes());
                update_field(
                    hasher,
                    file.content_type.as_deref().unwrap_or_default().as_bytes(),
                );
                update_field(hasher, &file.data);
            }
        }
    }
}

fn update_len(hasher: &mut Sha256, len: usize) {
    hasher.update((len as u64).to_be_bytes());
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    update_len(hasher, bytes.len());
    hasher.update(bytes);
}

fn canonical_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut ordered = Map::new();
            for key in keys {
                ordered.insert(key.clone(), canonical_json(&map[key]));
            }
            Value::Object(ordered)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}
