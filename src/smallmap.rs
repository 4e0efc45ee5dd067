//! A map-like object for maps with few entries.

use std::borrow::Borrow;

/// A map-like object implemented as a list of pairs, for cases where the
/// number of entries in the map is small.  Inserting an existing key
/// overwrites, so the last binding for a given key wins.
#[derive(Debug, Default, PartialEq)]
pub struct SmallMap<K, V>(Vec<(K, V)>);

impl<K: PartialEq, V> SmallMap<K, V> {
    pub fn new() -> Self {
        SmallMap(Vec::new())
    }

    pub fn insert(&mut self, k: K, v: V) {
        for (ik, iv) in self.0.iter_mut() {
            if *ik == k {
                *iv = v;
                return;
            }
        }
        self.0.push((k, v));
    }

    pub fn get<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        for (k, v) in self.0.iter() {
            if k.borrow() == q {
                return Some(v);
            }
        }
        None
    }

    pub fn iter(&self) -> std::slice::Iter<(K, V)> {
        self.0.iter()
    }
}

impl<K: PartialEq, V, const N: usize> From<[(K, V); N]> for SmallMap<K, V> {
    fn from(entries: [(K, V); N]) -> Self {
        let mut map = SmallMap::new();
        for (k, v) in entries {
            map.insert(k, v);
        }
        map
    }
}
