//! Merge strategies.
//!
//! A [`MergeStrategy`] tells the pager where a freshly loaded page
//! attaches to the local list. Both operations return an index into the
//! local list, or `-1` meaning "replace the entire cache":
//!
//! - `find_prepend_index` — a refresh result goes *in front*; local items
//!   before the returned index are dropped as superseded;
//! - `find_append_index` — a next page goes *behind*; local items from the
//!   returned index on are dropped as superseded.
//!
//! [`MergeWithComparator`] orders items directly; [`MergeByKeys`] orders
//! by an extracted key and tolerates non-unique keys by requiring the
//! loader to return *all* items equal to the requested boundary key, so
//! boundary-equal local items are always removed before merging.

use std::cmp::Ordering;

/// Places fresh pages against the local list.
pub trait MergeStrategy<T, K>: Send + Sync {
    /// Index into `list` where a refresh result `prepend` attaches;
    /// `list[..index]` is superseded. `-1` replaces the entire cache.
    ///
    /// `for_refresh_key` is the cursor the refresh was requested with
    /// (`None` for a first-page reload).
    fn find_prepend_index(&self, prepend: &[T], list: &[T], for_refresh_key: Option<&K>) -> isize;

    /// Index into `list` where a next page attaches; `list[index..]` is
    /// superseded. `-1` replaces the entire cache.
    ///
    /// `for_next_key` is the cursor the page was requested with.
    fn find_append_index(&self, list: &[T], next_page: &[T], for_next_key: Option<&K>) -> isize;
}

/// Merge strategy for lists ordered by an item comparator.
///
/// `unique` declares that no two items compare equal; boundary
/// comparisons are strict then (an equal local item is superseded by the
/// fresh copy), lax otherwise (equal local items are kept and left to
/// identity deduplication).
pub struct MergeWithComparator<F> {
    comparator: F,
    unique: bool,
}

impl<F> MergeWithComparator<F> {
    /// Creates the strategy from an item comparator.
    pub fn new<T>(comparator: F, unique: bool) -> Self
    where
        F: Fn(&T, &T) -> Ordering,
    {
        MergeWithComparator { comparator, unique }
    }
}

impl<T, K, F> MergeStrategy<T, K> for MergeWithComparator<F>
where
    F: Fn(&T, &T) -> Ordering + Send + Sync,
{
    fn find_prepend_index(&self, prepend: &[T], list: &[T], for_refresh_key: Option<&K>) -> isize {
        prepend_index(prepend, list, for_refresh_key.is_some(), self.unique, &self.comparator)
    }

    fn find_append_index(&self, list: &[T], next_page: &[T], for_next_key: Option<&K>) -> isize {
        append_index(list, next_page, for_next_key.is_some(), self.unique, &self.comparator)
    }
}

/// Merge strategy for lists ordered by an extracted key.
///
/// Unlike [`MergeWithComparator`] this supports non-unique keys, under one
/// loader contract: a page requested for key `k` must contain *all* items
/// whose key equals `k`. The strategy therefore always supersedes
/// boundary-equal local items (strict comparisons); the fresh page carries
/// the complete replacement.
pub struct MergeByKeys<F, C> {
    key: F,
    comparator: C,
}

impl<F, C> MergeByKeys<F, C> {
    /// Creates the strategy from a key extractor and a key comparator.
    pub fn new<T, K>(key: F, comparator: C) -> Self
    where
        F: Fn(&T) -> K,
        C: Fn(&K, &K) -> Ordering,
    {
        MergeByKeys { key, comparator }
    }
}

impl<T, K, F, C> MergeStrategy<T, K> for MergeByKeys<F, C>
where
    F: Fn(&T) -> K + Send + Sync,
    C: Fn(&K, &K) -> Ordering + Send + Sync,
{
    fn find_prepend_index(&self, prepend: &[T], list: &[T], for_refresh_key: Option<&K>) -> isize {
        let compare = |left: &T, right: &T| (self.comparator)(&(self.key)(left), &(self.key)(right));
        prepend_index(prepend, list, for_refresh_key.is_some(), true, &compare)
    }

    fn find_append_index(&self, list: &[T], next_page: &[T], for_next_key: Option<&K>) -> isize {
        let compare = |left: &T, right: &T| (self.comparator)(&(self.key)(left), &(self.key)(right));
        append_index(list, next_page, for_next_key.is_some(), true, &compare)
    }
}

fn prepend_index<T>(
    prepend: &[T],
    list: &[T],
    keyed: bool,
    strict: bool,
    compare: &impl Fn(&T, &T) -> Ordering,
) -> isize {
    if list.is_empty() {
        return -1;
    }
    let Some(last_of_prepend) = prepend.last() else {
        // An empty keyed refresh changes nothing; an empty first-page
        // reload means the remote is empty and the cache is stale.
        return if keyed { 0 } else { -1 };
    };

    if !keyed {
        // First-page reload: merging requires overlap with the local list.
        let first = compare(&list[0], last_of_prepend);
        let last = compare(&list[list.len() - 1], last_of_prepend);
        if first == Ordering::Greater || last == Ordering::Less {
            return -1;
        }
    }

    // First local position beyond the prepended range: strictly greater
    // when strict, greater-or-equal otherwise.
    for (index, item) in list.iter().enumerate() {
        let ordering = compare(item, last_of_prepend);
        let beyond = if strict { ordering == Ordering::Greater } else { ordering != Ordering::Less };
        if beyond {
            return index as isize;
        }
    }
    list.len() as isize
}

fn append_index<T>(
    list: &[T],
    next_page: &[T],
    keyed: bool,
    strict: bool,
    compare: &impl Fn(&T, &T) -> Ordering,
) -> isize {
    if !keyed {
        return -1;
    }
    let Some(first_of_page) = next_page.first() else {
        return list.len() as isize;
    };

    // Rightmost local position still below the page: strictly less when
    // strict, less-or-equal otherwise. Everything after it is superseded.
    for (index, item) in list.iter().enumerate().rev() {
        let ordering = compare(item, first_of_page);
        let below = if strict { ordering == Ordering::Less } else { ordering != Ordering::Greater };
        if below {
            return (index + 1) as isize;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ordered(unique: bool) -> MergeWithComparator<impl Fn(&i32, &i32) -> Ordering> {
        MergeWithComparator::new(|a: &i32, b: &i32| a.cmp(b), unique)
    }

    #[test]
    fn prepend_replaces_empty_list() {
        let merger = ordered(true);
        assert_eq!(MergeStrategy::<i32, u8>::find_prepend_index(&merger, &[1, 2], &[], None), -1);
    }

    #[test]
    fn prepend_first_page_reload_requires_overlap() {
        let merger = ordered(true);
        // Local entirely beyond the reload: gap of unknown size.
        assert_eq!(
            MergeStrategy::<i32, u8>::find_prepend_index(&merger, &[1, 2], &[5, 6], None),
            -1
        );
        // Local entirely before the reload end: fully superseded.
        assert_eq!(
            MergeStrategy::<i32, u8>::find_prepend_index(&merger, &[5, 6], &[1, 2], None),
            -1
        );
        // Overlap: boundary right after the overlapping items.
        assert_eq!(
            MergeStrategy::<i32, u8>::find_prepend_index(&merger, &[1, 2, 3], &[2, 3, 4], None),
            2
        );
    }

    #[test]
    fn prepend_keyed_boundary_respects_uniqueness() {
        // Boundary value 3 present locally: unique supersedes it, lax
        // keeps it.
        assert_eq!(
            MergeStrategy::<i32, u8>::find_prepend_index(
                &ordered(true),
                &[2, 3],
                &[3, 4, 5],
                Some(&0)
            ),
            1
        );
        assert_eq!(
            MergeStrategy::<i32, u8>::find_prepend_index(
                &ordered(false),
                &[2, 3],
                &[3, 4, 5],
                Some(&0)
            ),
            0
        );
    }

    #[test]
    fn append_without_key_replaces() {
        let merger = ordered(true);
        assert_eq!(MergeStrategy::<i32, u8>::find_append_index(&merger, &[1, 2], &[3], None), -1);
    }

    #[test]
    fn append_empty_page_is_noop() {
        let merger = ordered(true);
        assert_eq!(
            MergeStrategy::<i32, u8>::find_append_index(&merger, &[1, 2], &[], Some(&0)),
            2
        );
    }

    #[test]
    fn append_boundary_respects_uniqueness() {
        // Page starts at 4; local tail [4, 5] overlaps.
        assert_eq!(
            MergeStrategy::<i32, u8>::find_append_index(
                &ordered(true),
                &[1, 2, 3, 4, 5],
                &[4, 5, 6],
                Some(&0)
            ),
            3
        );
        assert_eq!(
            MergeStrategy::<i32, u8>::find_append_index(
                &ordered(false),
                &[1, 2, 3, 4, 5],
                &[4, 5, 6],
                Some(&0)
            ),
            4
        );
        // Page entirely below local: everything superseded.
        assert_eq!(
            MergeStrategy::<i32, u8>::find_append_index(&ordered(true), &[5, 6], &[1, 2], Some(&0)),
            0
        );
    }

    #[test]
    fn by_keys_always_supersedes_boundary_equals() {
        let merger = MergeByKeys::new(|item: &(i32, char)| item.0, |a: &i32, b: &i32| a.cmp(b));
        // Local holds two items with boundary key 4; the page (which must
        // carry all key-4 items) supersedes both.
        let list = vec![(1, 'a'), (4, 'b'), (4, 'c')];
        let page = vec![(4, 'b'), (4, 'c'), (5, 'd')];
        assert_eq!(merger.find_append_index(&list, &page, Some(&4)), 1);
    }
}
