use super::{KvStore, StoreError};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(AHashMap<String, String>),
    List(VecDeque<String>),
}

#[derive(Debug, Default)]
struct State {
    data: AHashMap<String, Value>,
    expires: AHashMap<String, Instant>,
}

impl State {
    fn is_expired(&self, key: &str, now: Instant) -> bool {
        self.expires.get(key).is_some_and(|deadline| *deadline <= now)
    }

    /// Live value for `key`; expired entries read as absent.
    fn live(&self, key: &str) -> Option<&Value> {
        if self.is_expired(key, Instant::now()) {
            return None;
        }
        self.data.get(key)
    }

    /// Drop `key` if its deadline has passed. Called before every write.
    fn purge_if_expired(&mut self, key: &str) {
        if self.is_expired(key, Instant::now()) {
            self.data.remove(key);
            self.expires.remove(key);
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        self.expires.remove(key);
        self.data.remove(key).is_some()
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut AHashMap<String, String>, StoreError> {
        self.purge_if_expired(key);
        match self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(AHashMap::new()))
        {
            Value::Hash(map) => Ok(map),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn list_mut(&mut self, key: &str) -> Result<&mut VecDeque<String>, StoreError> {
        self.purge_if_expired(key);
        match self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::List(VecDeque::new()))
        {
            Value::List(list) => Ok(list),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }
}

fn parse_int(key: &str, raw: &str) -> Result<i64, StoreError> {
    raw.parse::<i64>()
        .map_err(|_| StoreError::NotInteger(key.to_string()))
}

/// In-memory store for tests, benches and the single-process demo.
///
/// Clones share one state, so every node thread holding a clone sees the
/// same keys. Expiry is lazy: expired keys read as absent and are purged on
/// the next write.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys (for testing)
    pub fn len(&self) -> usize {
        let state = self.state.read();
        let now = Instant::now();
        state
            .data
            .keys()
            .filter(|key| !state.is_expired(key, now))
            .count()
    }

    /// Check if empty (for testing)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys, sorted (for testing)
    pub fn keys(&self) -> Vec<String> {
        let state = self.state.read();
        let now = Instant::now();
        let mut keys: Vec<String> = state
            .data
            .keys()
            .filter(|key| !state.is_expired(key, now))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl Clone for InMemoryStore {
    fn clone(&self) -> Self {
        InMemoryStore {
            state: Arc::clone(&self.state),
        }
    }
}

impl KvStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.state.read().live(key) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.state.write();
        state.expires.remove(key);
        state
            .data
            .insert(key.to_string(), Value::Str(value.to_string()));
        Ok(())
    }

    fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        state.purge_if_expired(key);
        if state.data.contains_key(key) {
            return Ok(false);
        }
        state
            .data
            .insert(key.to_string(), Value::Str(value.to_string()));
        state.expires.insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    fn compare_and_del(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        state.purge_if_expired(key);
        let matches = matches!(state.data.get(key), Some(Value::Str(s)) if s == expected);
        if matches {
            state.remove(key);
        }
        Ok(matches)
    }

    fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut state = self.state.write();
        state.purge_if_expired(key);
        let current = match state.data.get(key) {
            None => 0,
            Some(Value::Str(s)) => parse_int(key, s)?,
            Some(_) => return Err(StoreError::WrongType(key.to_string())),
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::NotInteger(key.to_string()))?;
        state
            .data
            .insert(key.to_string(), Value::Str(next.to_string()));
        Ok(next)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.state.read().live(key).is_some())
    }

    fn del(&self, keys: &[&str]) -> Result<usize, StoreError> {
        let mut state = self.state.write();
        let mut removed = 0;
        for key in keys {
            state.purge_if_expired(key);
            if state.remove(key) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        match self.state.read().live(key) {
            None => Ok(None),
            Some(Value::Hash(map)) => Ok(map.get(field).cloned()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.state.write();
        state
            .hash_mut(key)?
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hset_all(&self, key: &str, entries: &[(String, String)]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        let map = state.hash_mut(key)?;
        for (field, value) in entries {
            map.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut state = self.state.write();
        let map = state.hash_mut(key)?;
        let current = match map.get(field) {
            None => 0,
            Some(raw) => parse_int(key, raw)?,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::NotInteger(key.to_string()))?;
        map.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        match self.state.read().live(key) {
            None => Ok(Vec::new()),
            Some(Value::Hash(map)) => Ok(map
                .iter()
                .map(|(f, v)| (f.clone(), v.clone()))
                .collect()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn rpush(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let mut state = self.state.write();
        let list = state.list_mut(key)?;
        list.push_back(value.to_string());
        Ok(list.len())
    }

    fn lindex(&self, key: &str, index: usize) -> Result<Option<String>, StoreError> {
        match self.state.read().live(key) {
            None => Ok(None),
            Some(Value::List(list)) => Ok(list.get(index).cloned()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn llen(&self, key: &str) -> Result<usize, StoreError> {
        match self.state.read().live(key) {
            None => Ok(0),
            Some(Value::List(list)) => Ok(list.len()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strings_and_counters() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));

        assert_eq!(store.incr_by("n", 1).unwrap(), 1);
        assert_eq!(store.incr_by("n", 4).unwrap(), 5);
        assert_eq!(
            store.incr_by("k", 1),
            Err(StoreError::NotInteger("k".to_string()))
        );
    }

    #[test]
    fn test_wrong_type() {
        let store = InMemoryStore::new();
        store.rpush("list", "a").unwrap();
        assert!(matches!(store.get("list"), Err(StoreError::WrongType(_))));
        assert!(matches!(
            store.hset("list", "f", "v"),
            Err(StoreError::WrongType(_))
        ));
    }

    #[test]
    fn test_hash_ops() {
        let store = InMemoryStore::new();
        store.hset("h", "a", "1").unwrap();
        store
            .hset_all("h", &[("b".to_string(), "2".to_string())])
            .unwrap();
        assert_eq!(store.hincr_by("h", "a", 2).unwrap(), 3);
        assert_eq!(store.hincr_by("h", "c", 1).unwrap(), 1);

        let mut all = store.hgetall("h").unwrap();
        all.sort();
        assert_eq!(
            all,
            vec![
                ("a".to_string(), "3".to_string()),
                ("b".to_string(), "2".to_string()),
                ("c".to_string(), "1".to_string()),
            ]
        );
        assert_eq!(store.hget("h", "missing").unwrap(), None);
    }

    #[test]
    fn test_list_ops() {
        let store = InMemoryStore::new();
        assert_eq!(store.llen("l").unwrap(), 0);
        store.rpush("l", "x").unwrap();
        assert_eq!(store.rpush("l", "y").unwrap(), 2);
        assert_eq!(store.lindex("l", 1).unwrap().as_deref(), Some("y"));
        assert_eq!(store.lindex("l", 2).unwrap(), None);
    }

    #[test]
    fn test_set_nx_px_and_compare_and_del() {
        let store = InMemoryStore::new();
        assert!(store.set_nx_px("lock", "a", Duration::from_secs(10)).unwrap());
        assert!(!store.set_nx_px("lock", "b", Duration::from_secs(10)).unwrap());

        assert!(!store.compare_and_del("lock", "b").unwrap());
        assert!(store.compare_and_del("lock", "a").unwrap());
        assert!(!store.exists("lock").unwrap());
    }

    #[test]
    fn test_expiry_is_lazy() {
        let store = InMemoryStore::new();
        assert!(store.set_nx_px("lock", "a", Duration::from_millis(5)).unwrap());
        std::thread::sleep(Duration::from_millis(20));

        assert!(!store.exists("lock").unwrap());
        assert!(store.set_nx_px("lock", "b", Duration::from_secs(1)).unwrap());
        assert_eq!(store.get("lock").unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn test_del_and_shared_clones() {
        let store = InMemoryStore::new();
        let other = store.clone();
        store.set("a", "1").unwrap();
        other.set("b", "2").unwrap();
        assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string()]);

        assert_eq!(other.del(&["a", "b", "c"]).unwrap(), 2);
        assert!(store.is_empty());
    }
}
