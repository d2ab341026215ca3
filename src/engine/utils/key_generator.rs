use std::{collections::HashSet, fmt::Debug, hash::Hash};

use num_traits::{Bounded, One, PrimInt, ToPrimitive, Unsigned, WrappingAdd};
use thiserror::Error;

/// A strongly typed key backed by an unsigned integer id.
///
/// Implemented through [`key_type!`].
pub trait Key: Copy + Eq + Hash + Debug {
    type Id: PrimInt + Unsigned + WrappingAdd + Hash + Debug;

    fn from_id(id: Self::Id) -> Self;
    fn id(&self) -> Self::Id;
}

/// Declare a newtype key usable with [`KeyGenerator`].
macro_rules! key_type {
    ($vis:vis struct $name:ident($id:ty)) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        $vis struct $name($id);
        impl $crate::engine::utils::key_generator::Key for $name {
            type Id = $id;

            fn from_id(id: $id) -> Self {
                Self(id)
            }
            fn id(&self) -> $id {
                self.0
            }
        }
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}
pub(crate) use key_type;

/// Construct for generating unique keys, via an incrementing counter.
///
/// Contains a set of all keys currently in use.
#[derive(Debug, Clone)]
pub struct KeyGenerator<K: Key> {
    last_id: K::Id,
    used_keys: HashSet<K>,
}
impl<K: Key> KeyGenerator<K> {
    pub fn new() -> Self {
        KeyGenerator {
            last_id: K::Id::max_value(),
            used_keys: HashSet::new(),
        }
    }

    /// Amount of unique keys that are left.
    ///
    /// This will be decremented after each call to [`Self::next()`],
    /// which will return an [`OverflowError`] if, and only if this returns 0.
    pub fn remaining_keys(&self) -> usize {
        let max = K::Id::max_value().to_usize().unwrap_or(usize::MAX);
        max - self.used_keys.len()
    }

    /// Return new unique key, registering it as occupied
    /// until [`Self::free()`] is called with this key as argument.
    pub fn next(&mut self) -> Result<K, OverflowError> {
        if self.remaining_keys() == 0 {
            return Err(OverflowError);
        }

        let mut id = self.last_id;
        loop {
            id = id.wrapping_add(&K::Id::one());
            let key = K::from_id(id);
            if !self.used_keys.contains(&key) {
                self.last_id = id;
                self.used_keys.insert(key);
                return Ok(key);
            }
        }
    }

    /// Free key, marking it as no longer occupied.
    /// Reuse of the key will, however, only happen once the counter has wrapped around.
    pub fn free(&mut self, key: K) -> Result<(), InvalidKeyError> {
        if self.used_keys.remove(&key) {
            Ok(())
        } else {
            Err(InvalidKeyError {
                key: format!("{:?}", key),
            })
        }
    }

    /// Check whether key is currently in use
    pub fn in_use(&self, key: K) -> bool {
        self.used_keys.contains(&key)
    }
}
impl<K: Key> Default for KeyGenerator<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("The max number of keys has been exceeded")]
pub struct OverflowError;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Key not present: {key}")]
pub struct InvalidKeyError {
    key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    key_type!(struct SmallKey(u8));
    key_type!(struct WideKey(u32));

    #[test]
    fn add_one() {
        let mut kg = KeyGenerator::<WideKey>::new();
        assert_eq!(kg.remaining_keys(), u32::MAX as usize);
        kg.next().unwrap();
        assert_eq!(kg.remaining_keys(), u32::MAX as usize - 1);
    }

    #[test]
    fn keys_start_at_zero() {
        let mut kg = KeyGenerator::<WideKey>::new();
        assert_eq!(kg.next().unwrap(), WideKey(0));
        assert_eq!(kg.next().unwrap(), WideKey(1));
    }

    #[test]
    fn free_one() {
        let mut kg = KeyGenerator::<WideKey>::new();
        let k = kg.next().unwrap();
        kg.free(k).unwrap();
        assert_eq!(kg.remaining_keys(), u32::MAX as usize);
        assert!(!kg.in_use(k));
    }

    #[test]
    fn free_invalid() {
        let mut kg = KeyGenerator::<WideKey>::new();
        assert!(kg.free(WideKey(6)).is_err());
    }

    #[test]
    fn freed_key_is_not_reused_immediately() {
        let mut kg = KeyGenerator::<WideKey>::new();
        let k = kg.next().unwrap();
        kg.free(k).unwrap();
        assert_ne!(kg.next().unwrap(), k);
    }

    #[test]
    fn overflow() {
        let mut kg = KeyGenerator::<SmallKey>::new();
        for _ in 0..255 {
            kg.next().unwrap();
        }
        assert_eq!(kg.next(), Err(OverflowError));
        assert_eq!(kg.remaining_keys(), 0);
    }
}
