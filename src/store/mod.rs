/// Time-series store access.
///
/// The store is a JSON tree addressed by slash-separated paths with plain
/// get/set semantics: no transactions, no compare-and-swap. Writing JSON
/// `null` removes a node, as the Realtime Database does.
///
/// Submodules:
/// - `rtdb` — REST client for a hosted Realtime Database.

pub mod rtdb;

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by a store backend.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Non-2xx HTTP response.
    HttpError(u16),
    /// The request did not complete within the configured timeout.
    Timeout,
    /// Connection-level or backend failure.
    Unavailable(String),
    /// The response body was not valid JSON.
    ParseError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::HttpError(code) => write!(f, "HTTP error: {}", code),
            StoreError::Timeout => write!(f, "request timeout"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
            StoreError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// A key-value tree shared by the prediction and forecast cycles.
///
/// Implementations must be usable concurrently for independent paths.
pub trait TreeStore: Send + Sync {
    /// Returns the subtree at `path`, or `None` if the node does not exist.
    fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Replaces the subtree at `path`. `Value::Null` removes the node.
    fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// In-process JSON tree with the same semantics as the hosted store.
///
/// Used by tests and `--dry-run`. Paths can be marked as failing to simulate
/// an unreachable backend for part of the tree.
#[derive(Debug, Default)]
pub struct MemoryStore {
    root: Mutex<Value>,
    failing_reads: Mutex<HashSet<String>>,
    failing_writes: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Creates a store pre-populated with `tree`.
    pub fn with_tree(tree: Value) -> Self {
        let store = MemoryStore::default();
        if let Ok(mut root) = store.root.lock() {
            *root = tree;
        }
        store
    }

    /// Whole tree, for assertions.
    pub fn snapshot(&self) -> Value {
        self.root.lock().map(|r| r.clone()).unwrap_or(Value::Null)
    }

    /// Makes every read at or below `path` fail with `Timeout`.
    pub fn fail_reads_under(&self, path: &str) {
        if let Ok(mut set) = self.failing_reads.lock() {
            set.insert(segments(path).join("/"));
        }
    }

    /// Makes every write at or below `path` fail with `Timeout`.
    pub fn fail_writes_under(&self, path: &str) {
        if let Ok(mut set) = self.failing_writes.lock() {
            set.insert(segments(path).join("/"));
        }
    }

    fn is_failing(list: &Mutex<HashSet<String>>, path: &str) -> bool {
        let normalized = segments(path).join("/");
        match list.lock() {
            Ok(set) => set.iter().any(|prefix| {
                normalized == *prefix || normalized.starts_with(&format!("{}/", prefix))
            }),
            Err(_) => false,
        }
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("memory store lock poisoned".to_string())
    }
}

impl TreeStore for MemoryStore {
    fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        if Self::is_failing(&self.failing_reads, path) {
            return Err(StoreError::Timeout);
        }
        let root = self.root.lock().map_err(|_| Self::poisoned())?;
        let mut node = &*root;
        for segment in segments(path) {
            match node.get(segment) {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        if node.is_null() {
            Ok(None)
        } else {
            Ok(Some(node.clone()))
        }
    }

    fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        if Self::is_failing(&self.failing_writes, path) {
            return Err(StoreError::Timeout);
        }
        let mut root = self.root.lock().map_err(|_| Self::poisoned())?;
        let parts = segments(path);
        if parts.is_empty() {
            *root = value;
            return Ok(());
        }
        set_in(&mut root, &parts, value);
        Ok(())
    }
}

/// Writes `value` at `parts` below `node`, creating objects on the way down
/// and pruning objects left empty by a removal.
fn set_in(node: &mut Value, parts: &[&str], value: Value) {
    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Some(map) = node.as_object_mut() else {
        return;
    };

    let (head, rest) = (parts[0], &parts[1..]);
    if rest.is_empty() {
        if value.is_null() {
            map.remove(head);
        } else {
            map.insert(head.to_string(), value);
        }
        return;
    }

    let child = map.entry(head.to_string()).or_insert(Value::Null);
    set_in(child, rest, value);
    let emptied = match child {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        _ => false,
    };
    if emptied {
        map.remove(head);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_absent_path_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("Polder/pump_on").unwrap(), None);
    }

    #[test]
    fn test_set_creates_intermediate_nodes() {
        let store = MemoryStore::new();
        store.set("Polder/pump_on/2025-01-01-00_00_00", json!(1)).unwrap();
        assert_eq!(
            store.snapshot(),
            json!({"Polder": {"pump_on": {"2025-01-01-00_00_00": 1}}})
        );
        assert_eq!(
            store.get("/Polder/pump_on/").unwrap(),
            Some(json!({"2025-01-01-00_00_00": 1}))
        );
    }

    #[test]
    fn test_set_replaces_subtree() {
        let store = MemoryStore::with_tree(json!({"a": {"b": 1, "c": 2}}));
        store.set("a", json!({"d": 3})).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(json!({"d": 3})));
    }

    #[test]
    fn test_set_null_removes_and_prunes_empty_parents() {
        let store = MemoryStore::with_tree(json!({"Polder": {"x": {"error": "e"}, "y": 1}}));
        store.set("Polder/x/error", Value::Null).unwrap();
        assert_eq!(store.snapshot(), json!({"Polder": {"y": 1}}));
    }

    #[test]
    fn test_set_null_on_missing_path_is_noop() {
        let store = MemoryStore::with_tree(json!({"a": 1}));
        store.set("b/c", Value::Null).unwrap();
        assert_eq!(store.snapshot(), json!({"a": 1}));
    }

    #[test]
    fn test_set_below_scalar_replaces_it_with_object() {
        let store = MemoryStore::with_tree(json!({"a": 5}));
        store.set("a/b", json!(1)).unwrap();
        assert_eq!(store.snapshot(), json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_failing_prefixes_only_affect_their_subtree() {
        let store = MemoryStore::new();
        store.fail_writes_under("Polder/status_banjir");
        store.fail_reads_under("Polder/TMA_Kolam");
        assert!(store.set("Polder/pump_on/k", json!(1)).is_ok());
        assert_eq!(store.set("Polder/status_banjir/k", json!(1)), Err(StoreError::Timeout));
        assert_eq!(store.get("Polder/TMA_Kolam"), Err(StoreError::Timeout));
        assert!(store.get("Polder/TMA_Kolam2").is_ok());
    }
}
