//! Structural change detection between a cached and a freshly fetched value.
//!
//! Collections are compared after a stable sort on a natural key, so a
//! server returning the same items in a different order is not a change.
//! Elements are then compared with their full `PartialEq`, which covers every
//! field including the flattened extras.

/// Whether two collections differ once both are ordered by `key`.
///
/// `force` short-circuits to `true`; the first sync after registration or
/// re-enabling always counts as a change.
pub fn collection_differs<T, K, F>(old: &[T], new: &[T], key: F, force: bool) -> bool
where
    T: PartialEq,
    K: Ord,
    F: Fn(&T) -> K,
{
    if force {
        return true;
    }
    if old.len() != new.len() {
        return true;
    }

    let mut old_sorted: Vec<&T> = old.iter().collect();
    let mut new_sorted: Vec<&T> = new.iter().collect();
    old_sorted.sort_by_key(|item| key(*item));
    new_sorted.sort_by_key(|item| key(*item));

    old_sorted
        .iter()
        .zip(new_sorted.iter())
        .any(|(a, b)| a != b)
}

/// Whether a single value changed.
pub fn value_differs<T: PartialEq>(old: &T, new: &T, force: bool) -> bool {
    force || old != new
}
