use dashmap::DashMap;
use std::hash::Hash;

/// Hot layer: small objects that are actively referenced.
///
/// Entries stay until they are removed explicitly.
#[derive(Debug)]
pub struct HotMap<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, V>,
}

impl<K, V> Default for HotMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K, V> HotMap<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previous value, if any.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_stay_until_removed() {
        let hot: HotMap<String, u32> = HotMap::new();
        for i in 0..1_000 {
            hot.insert(format!("agent-{}", i), i);
        }
        assert_eq!(hot.len(), 1_000);
        assert_eq!(hot.get(&"agent-7".to_string()), Some(7));

        assert_eq!(hot.remove(&"agent-7".to_string()), Some(7));
        assert!(!hot.contains(&"agent-7".to_string()));

        hot.clear();
        assert!(hot.is_empty());
    }
}
