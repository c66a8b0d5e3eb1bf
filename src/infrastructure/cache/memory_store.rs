//! In-memory Store
//!
//! Single-process `KeyValueStore` with Redis-like semantics: sets vanish
//! when emptied, counters start at zero and every key may carry a TTL.
//! Expiry uses `tokio::time::Instant`, so paused-clock tests can advance
//! past a TTL deterministically.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::domain::KeyValueStore;
use crate::shared::error::AppError;

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Set(BTreeSet<String>),
    Counter(i64),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-memory key-value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` on the slot for `key`; an expired entry is seen as absent.
    /// Whatever the closure leaves in the slot is written back.
    fn with_slot<R>(&self, key: &str, f: impl FnOnce(&mut Option<Entry>) -> R) -> R {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let mut slot = entries.remove(key).filter(|e| e.is_live(now));
        let result = f(&mut slot);
        if let Some(entry) = slot {
            entries.insert(key.to_string(), entry);
        }
        result
    }
}

fn wrong_type(key: &str) -> AppError {
    AppError::Internal(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_add(&self, key: &str, member: &str) -> Result<(), AppError> {
        self.with_slot(key, |slot| match slot {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => {
                set.insert(member.to_string());
                Ok(())
            }
            Some(_) => Err(wrong_type(key)),
            None => {
                *slot = Some(Entry {
                    value: Value::Set(BTreeSet::from([member.to_string()])),
                    expires_at: None,
                });
                Ok(())
            }
        })
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), AppError> {
        self.with_slot(key, |slot| {
            let emptied = match slot {
                Some(Entry {
                    value: Value::Set(set),
                    ..
                }) => {
                    set.remove(member);
                    set.is_empty()
                }
                Some(_) => return Err(wrong_type(key)),
                None => false,
            };
            if emptied {
                *slot = None;
            }
            Ok(())
        })
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, AppError> {
        self.with_slot(key, |slot| match slot {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, AppError> {
        Ok(self.with_slot(key, |slot| match slot {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        self.with_slot(key, |slot| match slot {
            Some(Entry {
                value: Value::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(Entry {
                value: Value::Counter(n),
                ..
            }) => Ok(Some(n.to_string().into_bytes())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        })
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), AppError> {
        self.with_slot(key, |slot| {
            *slot = Some(Entry {
                value: Value::Bytes(value.to_vec()),
                expires_at: Some(Instant::now() + ttl),
            });
        });
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, AppError> {
        self.with_slot(key, |slot| match slot {
            Some(Entry {
                value: Value::Counter(n),
                expires_at,
            }) => {
                *n += 1;
                expires_at.get_or_insert_with(|| Instant::now() + ttl);
                Ok(*n)
            }
            Some(_) => Err(wrong_type(key)),
            None => {
                *slot = Some(Entry {
                    value: Value::Counter(1),
                    expires_at: Some(Instant::now() + ttl),
                });
                Ok(1)
            }
        })
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.with_slot(key, |slot| slot.take().is_some()))
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, AppError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, e| e.is_live(now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Redis-style glob matching supporting `*`, `?` and `\` escapes.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        let step = match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
                continue;
            }
            Some('?') => Some(1),
            Some('\\') if p + 1 < pattern.len() => {
                (pattern[p + 1] == text[t]).then_some(2)
            }
            Some(c) => (*c == text[t]).then_some(1),
            None => None,
        };

        match step {
            Some(width) => {
                p += width;
                t += 1;
            }
            None => match backtrack {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    backtrack = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("ws:user:*", "ws:user:u1", true ; "star suffix")]
    #[test_case("ws:user:*", "ws:ack:u1:m1", false ; "different prefix")]
    #[test_case("ws:ack:u1:*", "ws:ack:u1:m1", true ; "ack pattern")]
    #[test_case("ws:ack:u1:*", "ws:ack:u10:m1", false ; "user id prefix is not a match")]
    #[test_case("a\\*b:*", "a*b:x", true ; "escaped star is literal")]
    #[test_case("a\\*b:*", "axxb:x", false ; "escaped star does not wildcard")]
    #[test_case("m?", "m1", true ; "question mark")]
    #[test_case("*", "", true ; "star matches empty")]
    fn test_glob_match(pattern: &str, text: &str, expected: bool) {
        assert_eq!(glob_match(pattern, text), expected);
    }

    #[tokio::test]
    async fn test_set_operations() {
        let store = MemoryStore::new();

        store.set_add("s", "a").await.unwrap();
        store.set_add("s", "b").await.unwrap();
        store.set_add("s", "a").await.unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["a", "b"]);

        store.set_remove("s", "a").await.unwrap();
        store.set_remove("s", "b").await.unwrap();
        assert!(store.set_members("s").await.unwrap().is_empty());
        assert!(store.is_empty(), "emptied set must disappear");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", b"v", Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.scan_keys("*").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_restarts_after_expiry() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(1);
        assert_eq!(store.incr_with_ttl("c", ttl).await.unwrap(), 1);
        assert_eq!(store.incr_with_ttl("c", ttl).await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.incr_with_ttl("c", ttl).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_keeps_first_expiry() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_with_ttl("c", Duration::from_secs(2)).await.unwrap(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.incr_with_ttl("c", Duration::from_secs(60)).await.unwrap(), 2);

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(store.incr_with_ttl("c", Duration::from_secs(60)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expire_missing_key() {
        let store = MemoryStore::new();
        assert!(!store.expire("nope", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let store = MemoryStore::new();
        store.incr_with_ttl("c", Duration::from_secs(1)).await.unwrap();
        assert!(store.set_add("c", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", b"v", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }
}
