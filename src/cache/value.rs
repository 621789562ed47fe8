//! Values a cache may hold.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

/// A cacheable result.
///
/// `is_null` marks the "no value" result that a policy may decline to
/// cache. `Option::None` and JSON `null` are null; every other provided
/// impl is never null.
pub trait CacheValue: Clone + Send + Sync + 'static {
    fn is_null(&self) -> bool {
        false
    }
}

impl<T: Clone + Send + Sync + 'static> CacheValue for Option<T> {
    fn is_null(&self) -> bool {
        self.is_none()
    }
}

macro_rules! never_null {
    ($($ty:ty),* $(,)?) => {
        $(impl CacheValue for $ty {})*
    };
}

never_null!(
    (), bool, char, String, &'static str,
    u8, u16, u32, u64, u128, usize,
    i8, i16, i32, i64, i128, isize,
    f32, f64,
);

impl CacheValue for serde_json::Value {
    fn is_null(&self) -> bool {
        serde_json::Value::is_null(self)
    }
}

impl<T: Clone + Send + Sync + 'static> CacheValue for Vec<T> {}
impl<T: Clone + Send + Sync + 'static> CacheValue for VecDeque<T> {}
impl<T: ?Sized + Send + Sync + 'static> CacheValue for Arc<T> {}
impl<T: Clone + Ord + Send + Sync + 'static> CacheValue for BTreeSet<T> {}
impl<T: Clone + Eq + Hash + Send + Sync + 'static> CacheValue for HashSet<T> {}

impl<K, V> CacheValue for BTreeMap<K, V>
where
    K: Clone + Ord + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
}

impl<K, V> CacheValue for HashMap<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
}

impl<A: CacheValue, B: CacheValue> CacheValue for (A, B) {}
