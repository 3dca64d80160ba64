use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const DEFAULT_CANCEL_REASON: &str = "request cancelled";
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Identifier of one logical request, stable across its retries.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates an id of the form `req_<unix-millis>_<9 base36 chars>`.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        let mut rng = rand::rng();
        let suffix: String = (0..9)
            .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
            .collect();
        Self(format!("req_{millis}_{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Fire-once cancellation handle shared by a context and its request.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason given by the first cancellation, if any.
    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    /// Cancels the handle. Returns `false` if it was already cancelled.
    pub fn cancel(&self, reason: Option<&str>) -> bool {
        let reason = reason.unwrap_or(DEFAULT_CANCEL_REASON).to_owned();
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Completes once the handle is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    fn same_as(&self, other: &CancelHandle) -> bool {
        Arc::ptr_eq(&self.reason, &other.reason)
    }
}

/// Bookkeeping for one in-flight logical request.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: RequestId,
    /// Monotonic creation instant, used for durations.
    pub started_at: Instant,
    /// Wall-clock creation time, for reporting only.
    pub created_at: SystemTime,
    pub retry_count: u32,
    pub cancel_key: Option<String>,
    pub cancel: CancelHandle,
}

impl RequestContext {
    fn new(request_id: RequestId, cancel_key: Option<String>) -> Self {
        Self {
            request_id,
            started_at: Instant::now(),
            created_at: SystemTime::now(),
            retry_count: 0,
            cancel_key,
            cancel: CancelHandle::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Tracks the contexts of in-flight requests, keyed by request id.
///
/// The lock guards only the map structure and is never held across an await.
#[derive(Debug, Default)]
pub struct RequestContextStore {
    contexts: Mutex<HashMap<RequestId, RequestContext>>,
}

impl RequestContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, RequestContext>> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the context for `id`, creating it if absent.
    pub fn create_context(&self, id: &RequestId) -> RequestContext {
        self.lock()
            .entry(id.clone())
            .or_insert_with(|| RequestContext::new(id.clone(), None))
            .clone()
    }

    /// Creates a fresh context, or returns `None` if `id` is already tracked.
    pub(crate) fn register(
        &self,
        id: &RequestId,
        cancel_key: Option<String>,
    ) -> Option<RequestContext> {
        let mut contexts = self.lock();
        if contexts.contains_key(id) {
            return None;
        }
        let context = RequestContext::new(id.clone(), cancel_key);
        contexts.insert(id.clone(), context.clone());
        Some(context)
    }

    pub fn get_context(&self, id: &RequestId) -> Option<RequestContext> {
        self.lock().get(id).cloned()
    }

    /// Applies `update` to the context for `id`. Returns `false` if absent.
    pub fn update_context<F>(&self, id: &RequestId, update: F) -> bool
    where
        F: FnOnce(&mut RequestContext),
    {
        match self.lock().get_mut(id) {
            Some(context) => {
                update(context);
                true
            }
            None => false,
        }
    }

    pub fn remove_context(&self, id: &RequestId) -> Option<RequestContext> {
        self.lock().remove(id)
    }

    /// Removes the context only if it still belongs to `handle`'s request.
    pub(crate) fn release(&self, id: &RequestId, handle: &CancelHandle) {
        let mut contexts = self.lock();
        if contexts
            .get(id)
            .is_some_and(|context| context.cancel.same_as(handle))
        {
            contexts.remove(id);
        }
    }

    /// Cancels and forgets the request `id`.
    ///
    /// Returns `false` without doing anything if `id` is unknown or was
    /// already cancelled. A `true` result only means the signal fired; the
    /// request itself may still succeed if its response already arrived.
    pub fn cancel(&self, id: &RequestId, reason: Option<&str>) -> bool {
        let removed = self.lock().remove(id);
        removed.is_some_and(|context| context.cancel.cancel(reason))
    }

    /// Cancels every tracked request. Returns how many were cancelled.
    pub fn cancel_all(&self, reason: Option<&str>) -> usize {
        let drained: Vec<RequestContext> = self.lock().drain().map(|(_, context)| context).collect();
        drained
            .iter()
            .filter(|context| context.cancel.cancel(reason))
            .count()
    }

    /// Cancels every request registered with `cancel_key`.
    pub fn cancel_by_key(&self, cancel_key: &str, reason: Option<&str>) -> usize {
        self.cancel_matching(
            |context| context.cancel_key.as_deref() == Some(cancel_key),
            reason,
        )
    }

    /// Cancels every request whose context satisfies `predicate`.
    pub fn cancel_matching<P>(&self, predicate: P, reason: Option<&str>) -> usize
    where
        P: Fn(&RequestContext) -> bool,
    {
        let matched: Vec<RequestContext> = {
            let mut contexts = self.lock();
            let ids: Vec<RequestId> = contexts
                .values()
                .filter(|context| predicate(context))
                .map(|context| context.request_id.clone())
                .collect();
            ids.iter().filter_map(|id| contexts.remove(id)).collect()
        };
        matched
            .iter()
            .filter(|context| context.cancel.cancel(reason))
            .count()
    }

    /// Time since the context for `id` was created, or zero if unknown.
    pub fn elapsed(&self, id: &RequestId) -> Duration {
        self.lock()
            .get(id)
            .map(RequestContext::elapsed)
            .unwrap_or_default()
    }

    /// Forgets every context without cancelling it.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn pending_ids(&self) -> Vec<RequestId> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CancelHandle, RequestContextStore, RequestId};

    #[test]
    fn generated_ids_have_expected_shape_and_differ() {
        let first = RequestId::generate();
        let second = RequestId::generate();
        assert!(first.as_str().starts_with("req_"));
        assert_eq!(first.as_str().rsplit('_').next().map(str::len), Some(9));
        assert_ne!(first, second);
    }

    #[test]
    fn create_context_is_idempotent() {
        let store = RequestContextStore::new();
        let id = RequestId::from("req-1");
        let first = store.create_context(&id);
        store.update_context(&id, |context| context.retry_count = 2);
        let second = store.create_context(&id);

        assert_eq!(store.len(), 1);
        assert_eq!(second.retry_count, 2);
        assert!(first.cancel.same_as(&second.cancel));
    }

    #[test]
    fn register_refuses_tracked_id() {
        let store = RequestContextStore::new();
        let id = RequestId::from("dup");
        assert!(store.register(&id, None).is_some());
        assert!(store.register(&id, None).is_none());
    }

    #[test]
    fn update_unknown_id_reports_absence() {
        let store = RequestContextStore::new();
        assert!(!store.update_context(&RequestId::from("missing"), |context| {
            context.retry_count += 1
        }));
    }

    #[test]
    fn cancel_is_fire_once_and_removes_context() {
        let store = RequestContextStore::new();
        let id = RequestId::from("req-1");
        let context = store.create_context(&id);

        assert!(store.cancel(&id, Some("user left")));
        assert!(context.cancel.is_cancelled());
        assert_eq!(context.cancel.reason(), Some("user left"));
        assert!(store.get_context(&id).is_none());

        assert!(!store.cancel(&id, Some("again")));
        assert_eq!(context.cancel.reason(), Some("user left"));
        assert!(!store.cancel(&RequestId::from("unknown"), None));
    }

    #[test]
    fn cancel_handle_keeps_first_reason() {
        let handle = CancelHandle::new();
        assert!(handle.cancel(None));
        assert!(!handle.cancel(Some("late")));
        assert_eq!(handle.reason(), Some("request cancelled"));
    }

    #[test]
    fn cancel_all_and_by_key() {
        let store = RequestContextStore::new();
        let a = store.register(&RequestId::from("a"), Some("users".to_owned())).expect("a");
        let b = store.register(&RequestId::from("b"), Some("users".to_owned())).expect("b");
        let c = store.register(&RequestId::from("c"), None).expect("c");

        assert_eq!(store.cancel_by_key("users", None), 2);
        assert!(a.cancel.is_cancelled());
        assert!(b.cancel.is_cancelled());
        assert!(!c.cancel.is_cancelled());
        assert_eq!(store.pending_ids(), vec![RequestId::from("c")]);

        assert_eq!(store.cancel_all(Some("shutdown")), 1);
        assert!(c.cancel.is_cancelled());
        assert!(store.is_empty());
        assert_eq!(store.cancel_all(None), 0);
    }

    #[test]
    fn release_ignores_foreign_context() {
        let store = RequestContextStore::new();
        let id = RequestId::from("shared");
        let first = store.register(&id, None).expect("first");
        store.cancel(&id, None);
        let second = store.register(&id, None).expect("second");

        store.release(&id, &first.cancel);
        assert!(store.get_context(&id).is_some());
        store.release(&id, &second.cancel);
        assert!(store.get_context(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_uses_monotonic_clock() {
        let store = RequestContextStore::new();
        let id = RequestId::from("timed");
        store.create_context(&id);
        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(store.elapsed(&id) >= Duration::from_millis(250));
        assert_eq!(store.elapsed(&RequestId::from("unknown")), Duration::ZERO);
    }
}
