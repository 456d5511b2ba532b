//! Keyed shallow merge of a cached collection with a fresh one.
//!
//! The incoming collection is authoritative for membership: items whose key
//! is absent from it are dropped. For items present on both sides the
//! incoming top-level fields overwrite the cached ones, while fields the
//! incoming item does not carry (unset optionals, unknown server fields) are
//! preserved from the cached item.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::hash::Hash;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

/// Merge `incoming` into `existing` by `key`, keeping the incoming order.
///
/// Keys are unique in the result; when `incoming` repeats a key the last
/// occurrence wins, in the position of the first.
pub fn merge<T, K, F>(existing: &[T], incoming: Vec<T>, key: F) -> Vec<T>
where
    T: Serialize + DeserializeOwned,
    K: Hash + Eq,
    F: Fn(&T) -> K,
{
    let previous: HashMap<K, &T> = existing.iter().map(|item| (key(item), item)).collect();
    let mut positions: HashMap<K, usize> = HashMap::with_capacity(incoming.len());
    let mut merged: Vec<T> = Vec::with_capacity(incoming.len());

    for item in incoming {
        let k = key(&item);
        let item = match previous.get(&k) {
            Some(old) => overlay(*old, item),
            None => item,
        };
        match positions.entry(k) {
            Entry::Occupied(slot) => merged[*slot.get()] = item,
            Entry::Vacant(slot) => {
                slot.insert(merged.len());
                merged.push(item);
            }
        }
    }
    merged
}

/// Overlay the top-level fields of `new` onto `old`.
///
/// Falls back to `new` unchanged if either side does not serialize to a
/// JSON object or the combination no longer deserializes.
fn overlay<T: Serialize + DeserializeOwned>(old: &T, new: T) -> T {
    let (Ok(Value::Object(mut base)), Ok(Value::Object(fields))) =
        (serde_json::to_value(old), serde_json::to_value(&new))
    else {
        return new;
    };

    base.extend(fields);
    match serde_json::from_value(Value::Object(base)) {
        Ok(merged) => merged,
        Err(e) => {
            trace!(error = %e, "merged item did not deserialize, keeping incoming");
            new
        }
    }
}
