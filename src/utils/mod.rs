use std::hash::{Hash, Hasher};

use serde::Serialize;

/// Content hash over a value's canonical bincode encoding. Stable within a
/// process, which is all the no-op detection needs; nothing is persisted.
pub fn content_hash<T: Serialize>(value: &T) -> u64 {
    let bytes = bincode::serialize(value).expect("in-memory serialization can not fail");
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}
