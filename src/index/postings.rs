//! Postings: ascending, duplicate-free lists of series references
//!
//! # Design Notes
//!
//! Iterators are one-shot cursors with `next` / `seek` / `at` / `err`.
//! `at` is only meaningful after `next` or `seek` returned `true`. Every
//! iterator owns its data; nothing aliases the writer-side `MemPostings`
//! it may have been produced from.
//!
//! Combinators:
//! - `merge`: k-way union over a min-heap (OR across values of one name)
//! - `intersect`: merge-join driven by `seek` (AND across names)
//! - `WithoutPostings`: set difference (negative matchers)
//! - `ShardedPostings`: restricts a list to one fingerprint shard

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::index::error::{IndexError, IndexResult};
use crate::index::types::{LabelSet, SeriesRef};

/// Reserved label name and value of the list holding every series
pub const ALL_POSTINGS_KEY: (&str, &str) = ("", "");

/// Forward-only cursor over ascending series references
pub trait Postings {
    /// Advance to the next reference
    fn next(&mut self) -> bool;

    /// Advance to the first reference `>= target`. Never moves backwards:
    /// if the current reference already satisfies the bound, stays put.
    fn seek(&mut self, target: SeriesRef) -> bool;

    /// Current reference
    fn at(&self) -> SeriesRef;

    /// Error that terminated iteration, if any
    fn err(&self) -> Option<&IndexError>;
}

/// Boxed postings that may cross threads
pub type BoxPostings = Box<dyn Postings + Send>;

/// Postings with no references
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyPostings;

impl Postings for EmptyPostings {
    fn next(&mut self) -> bool {
        false
    }

    fn seek(&mut self, _target: SeriesRef) -> bool {
        false
    }

    fn at(&self) -> SeriesRef {
        0
    }

    fn err(&self) -> Option<&IndexError> {
        None
    }
}

/// Shorthand for a boxed `EmptyPostings`
pub fn empty_postings() -> BoxPostings {
    Box::new(EmptyPostings)
}

/// Postings over an owned, sorted list
#[derive(Debug, Clone)]
pub struct ListPostings {
    list: Vec<SeriesRef>,
    /// Index of the next unread element
    pos: usize,
    cur: SeriesRef,
}

impl ListPostings {
    /// `list` must be ascending and free of duplicates
    pub fn new(list: Vec<SeriesRef>) -> Self {
        Self {
            list,
            pos: 0,
            cur: 0,
        }
    }

    pub fn boxed(list: Vec<SeriesRef>) -> BoxPostings {
        Box::new(Self::new(list))
    }

    /// References not yet returned
    pub fn remaining(&self) -> usize {
        self.list.len() - self.pos
    }
}

impl Postings for ListPostings {
    fn next(&mut self) -> bool {
        match self.list.get(self.pos) {
            Some(&v) => {
                self.cur = v;
                self.pos += 1;
                true
            }
            None => false,
        }
    }

    fn seek(&mut self, target: SeriesRef) -> bool {
        if self.pos > 0 && self.cur >= target {
            return true;
        }
        let rest = &self.list[self.pos..];
        let skip = rest.partition_point(|&v| v < target);
        self.pos += skip;
        self.next()
    }

    fn at(&self) -> SeriesRef {
        self.cur
    }

    fn err(&self) -> Option<&IndexError> {
        None
    }
}

/// Union of several postings lists, without duplicates
pub struct MergedPostings {
    its: Vec<BoxPostings>,
    heap: BinaryHeap<Reverse<(SeriesRef, usize)>>,
    initialized: bool,
    started: bool,
    cur: SeriesRef,
    failed: Option<usize>,
}

impl MergedPostings {
    pub fn new(its: Vec<BoxPostings>) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(its.len()),
            its,
            initialized: false,
            started: false,
            cur: 0,
            failed: None,
        }
    }

    fn push_if_valid(&mut self, i: usize, valid: bool) -> bool {
        if valid {
            self.heap.push(Reverse((self.its[i].at(), i)));
        } else if self.its[i].err().is_some() {
            self.failed = Some(i);
            return false;
        }
        true
    }

    fn initialize(&mut self) -> bool {
        self.initialized = true;
        for i in 0..self.its.len() {
            let valid = self.its[i].next();
            if !self.push_if_valid(i, valid) {
                return false;
            }
        }
        true
    }

    /// Take the smallest head as current and move every child sitting on it
    fn advance(&mut self) -> bool {
        let Some(&Reverse((v, _))) = self.heap.peek() else {
            return false;
        };
        self.cur = v;
        self.started = true;
        while let Some(&Reverse((x, i))) = self.heap.peek() {
            if x != v {
                break;
            }
            self.heap.pop();
            let valid = self.its[i].next();
            if !self.push_if_valid(i, valid) {
                return false;
            }
        }
        true
    }
}

impl Postings for MergedPostings {
    fn next(&mut self) -> bool {
        if self.failed.is_some() {
            return false;
        }
        if !self.initialized && !self.initialize() {
            return false;
        }
        self.advance()
    }

    fn seek(&mut self, target: SeriesRef) -> bool {
        if self.failed.is_some() {
            return false;
        }
        if !self.initialized {
            if !self.initialize() {
                return false;
            }
        } else if self.started && self.cur >= target {
            return true;
        }
        while let Some(&Reverse((x, i))) = self.heap.peek() {
            if x >= target {
                break;
            }
            self.heap.pop();
            let valid = self.its[i].seek(target);
            if !self.push_if_valid(i, valid) {
                return false;
            }
        }
        self.advance()
    }

    fn at(&self) -> SeriesRef {
        self.cur
    }

    fn err(&self) -> Option<&IndexError> {
        self.failed.and_then(|i| self.its[i].err())
    }
}

/// Union of `its`; collapses trivial cases
pub fn merge(mut its: Vec<BoxPostings>) -> BoxPostings {
    match its.len() {
        0 => empty_postings(),
        1 => its.remove(0),
        _ => Box::new(MergedPostings::new(its)),
    }
}

/// Intersection of several postings lists
pub struct IntersectPostings {
    its: Vec<BoxPostings>,
    cur: SeriesRef,
    failed: Option<usize>,
}

impl IntersectPostings {
    pub fn new(its: Vec<BoxPostings>) -> Self {
        Self {
            its,
            cur: 0,
            failed: None,
        }
    }

    /// Seek every child to `cur` until they agree
    fn settle(&mut self) -> bool {
        'outer: loop {
            for i in 0..self.its.len() {
                if !self.its[i].seek(self.cur) {
                    if self.its[i].err().is_some() {
                        self.failed = Some(i);
                    }
                    return false;
                }
                let at = self.its[i].at();
                if at > self.cur {
                    self.cur = at;
                    continue 'outer;
                }
            }
            return true;
        }
    }
}

impl Postings for IntersectPostings {
    fn next(&mut self) -> bool {
        if self.its.is_empty() || self.failed.is_some() {
            return false;
        }
        for i in 0..self.its.len() {
            if !self.its[i].next() {
                if self.its[i].err().is_some() {
                    self.failed = Some(i);
                }
                return false;
            }
            let at = self.its[i].at();
            if at > self.cur {
                self.cur = at;
            }
        }
        self.settle()
    }

    fn seek(&mut self, target: SeriesRef) -> bool {
        if self.its.is_empty() || self.failed.is_some() {
            return false;
        }
        if target > self.cur {
            self.cur = target;
        }
        self.settle()
    }

    fn at(&self) -> SeriesRef {
        self.cur
    }

    fn err(&self) -> Option<&IndexError> {
        self.failed.and_then(|i| self.its[i].err())
    }
}

/// Intersection of `its`; an empty input yields no references
pub fn intersect(mut its: Vec<BoxPostings>) -> BoxPostings {
    match its.len() {
        0 => empty_postings(),
        1 => its.remove(0),
        _ => Box::new(IntersectPostings::new(its)),
    }
}

/// References of `full` that are not in `remove`
pub struct WithoutPostings {
    full: BoxPostings,
    remove: BoxPostings,
    cur: SeriesRef,
    started: bool,
    /// `None` until `remove` has been positioned for the first time
    remove_ok: Option<bool>,
}

impl WithoutPostings {
    pub fn new(full: BoxPostings, remove: BoxPostings) -> Self {
        Self {
            full,
            remove,
            cur: 0,
            started: false,
            remove_ok: None,
        }
    }

    fn excluded(&mut self, v: SeriesRef) -> bool {
        let ok = match self.remove_ok {
            None => self.remove.seek(v),
            Some(true) if self.remove.at() < v => self.remove.seek(v),
            Some(ok) => ok,
        };
        self.remove_ok = Some(ok);
        ok && self.remove.at() == v
    }

    fn accept_current(&mut self) -> bool {
        loop {
            let v = self.full.at();
            if !self.excluded(v) {
                self.cur = v;
                self.started = true;
                return true;
            }
            if !self.full.next() {
                return false;
            }
        }
    }
}

impl Postings for WithoutPostings {
    fn next(&mut self) -> bool {
        if !self.full.next() {
            return false;
        }
        self.accept_current()
    }

    fn seek(&mut self, target: SeriesRef) -> bool {
        if self.started && self.cur >= target {
            return true;
        }
        if !self.full.seek(target) {
            return false;
        }
        self.accept_current()
    }

    fn at(&self) -> SeriesRef {
        self.cur
    }

    fn err(&self) -> Option<&IndexError> {
        self.full.err().or_else(|| self.remove.err())
    }
}

/// Postings restricted to a reference window and a per-series filter
///
/// The window comes from the fingerprint offsets table; `accept` checks the
/// stored fingerprint of each candidate.
pub struct ShardedPostings<F> {
    inner: BoxPostings,
    min_ref: SeriesRef,
    max_ref: SeriesRef,
    accept: F,
    started: bool,
    err: Option<IndexError>,
}

impl<F> ShardedPostings<F>
where
    F: FnMut(SeriesRef) -> IndexResult<bool>,
{
    /// Limit `inner` to `[min_ref, max_ref)` and to references `accept` keeps
    pub fn new(inner: BoxPostings, min_ref: SeriesRef, max_ref: SeriesRef, accept: F) -> Self {
        Self {
            inner,
            min_ref,
            max_ref,
            accept,
            started: false,
            err: None,
        }
    }

    fn filter_forward(&mut self, mut valid: bool) -> bool {
        while valid {
            let v = self.inner.at();
            if v >= self.max_ref {
                return false;
            }
            match (self.accept)(v) {
                Ok(true) => return true,
                Ok(false) => valid = self.inner.next(),
                Err(e) => {
                    self.err = Some(e);
                    return false;
                }
            }
        }
        false
    }
}

impl<F> Postings for ShardedPostings<F>
where
    F: FnMut(SeriesRef) -> IndexResult<bool>,
{
    fn next(&mut self) -> bool {
        if self.err.is_some() {
            return false;
        }
        let valid = if self.started {
            self.inner.next()
        } else {
            self.started = true;
            self.inner.seek(self.min_ref)
        };
        self.filter_forward(valid)
    }

    fn seek(&mut self, target: SeriesRef) -> bool {
        if self.err.is_some() {
            return false;
        }
        self.started = true;
        let valid = self.inner.seek(target.max(self.min_ref));
        self.filter_forward(valid)
    }

    fn at(&self) -> SeriesRef {
        self.inner.at()
    }

    fn err(&self) -> Option<&IndexError> {
        self.err.as_ref().or_else(|| self.inner.err())
    }
}

/// Drain `p` into a vector, surfacing its terminal error
pub fn expand_postings(p: &mut dyn Postings) -> IndexResult<Vec<SeriesRef>> {
    let mut out = Vec::new();
    while p.next() {
        out.push(p.at());
    }
    match p.err() {
        Some(e) => Err(IndexError::corrupt(format!("postings iteration failed: {}", e))),
        None => Ok(out),
    }
}

/// In-memory inverted index built while series are added
///
/// Lists stay ascending as long as references are added in ascending order;
/// `ensure_order` repairs them otherwise.
#[derive(Debug, Default, Clone)]
pub struct MemPostings {
    m: HashMap<String, HashMap<String, Vec<SeriesRef>>>,
}

impl MemPostings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `series_ref` under every label of `lset` and under the
    /// all-series key
    pub fn add(&mut self, series_ref: SeriesRef, lset: &LabelSet) {
        for label in lset {
            self.add_for(series_ref, &label.name, &label.value);
        }
        self.add_for(series_ref, ALL_POSTINGS_KEY.0, ALL_POSTINGS_KEY.1);
    }

    fn add_for(&mut self, series_ref: SeriesRef, name: &str, value: &str) {
        let list = self
            .m
            .entry(name.to_string())
            .or_default()
            .entry(value.to_string())
            .or_default();
        if list.last() != Some(&series_ref) {
            list.push(series_ref);
        }
    }

    /// Sort and de-duplicate every list
    pub fn ensure_order(&mut self) {
        for values in self.m.values_mut() {
            for list in values.values_mut() {
                list.sort_unstable();
                list.dedup();
            }
        }
    }

    /// Postings for one name/value pair
    pub fn get(&self, name: &str, value: &str) -> BoxPostings {
        match self.m.get(name).and_then(|values| values.get(value)) {
            Some(list) => ListPostings::boxed(list.clone()),
            None => empty_postings(),
        }
    }

    /// Union of the postings of `values` under `name`
    pub fn postings(&self, name: &str, values: &[&str]) -> BoxPostings {
        merge(values.iter().map(|v| self.get(name, v)).collect())
    }

    /// Every series reference
    pub fn all(&self) -> BoxPostings {
        self.get(ALL_POSTINGS_KEY.0, ALL_POSTINGS_KEY.1)
    }

    /// Raw list for one pair, if present
    pub fn list(&self, name: &str, value: &str) -> Option<&[SeriesRef]> {
        self.m
            .get(name)
            .and_then(|values| values.get(value))
            .map(Vec::as_slice)
    }

    /// Sorted label names, excluding the reserved key
    pub fn label_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .m
            .keys()
            .filter(|n| !n.is_empty())
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Sorted values of `name`
    pub fn label_values(&self, name: &str) -> Vec<String> {
        let mut values: Vec<String> = self
            .m
            .get(name)
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default();
        values.sort();
        values
    }

    /// Every (name, value) key in ascending order; the reserved key sorts first
    pub fn sorted_keys(&self) -> Vec<(String, String)> {
        let mut keys: Vec<(String, String)> = self
            .m
            .iter()
            .flat_map(|(name, values)| values.keys().map(move |v| (name.clone(), v.clone())))
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(refs: &[SeriesRef]) -> BoxPostings {
        ListPostings::boxed(refs.to_vec())
    }

    /// Postings that fail after yielding their references
    struct FailingPostings {
        inner: ListPostings,
        err: Option<IndexError>,
    }

    impl Postings for FailingPostings {
        fn next(&mut self) -> bool {
            if self.inner.next() {
                return true;
            }
            self.err = Some(IndexError::corrupt("bad postings list"));
            false
        }

        fn seek(&mut self, target: SeriesRef) -> bool {
            if self.inner.seek(target) {
                return true;
            }
            self.err = Some(IndexError::corrupt("bad postings list"));
            false
        }

        fn at(&self) -> SeriesRef {
            self.inner.at()
        }

        fn err(&self) -> Option<&IndexError> {
            self.err.as_ref()
        }
    }

    #[test]
    fn test_list_postings_seek() {
        let mut p = ListPostings::new(vec![2, 4, 6, 8, 10]);
        assert!(p.seek(5));
        assert_eq!(p.at(), 6);
        // Seeking backwards keeps the position.
        assert!(p.seek(1));
        assert_eq!(p.at(), 6);
        assert!(p.next());
        assert_eq!(p.at(), 8);
        assert!(p.seek(10));
        assert_eq!(p.at(), 10);
        assert!(!p.seek(11));
        assert!(!p.next());
    }

    #[test]
    fn test_merge() {
        let mut p = merge(vec![list(&[1, 4, 7]), list(&[2, 4, 8]), list(&[]), list(&[1, 9])]);
        assert_eq!(expand_postings(p.as_mut()).unwrap(), vec![1, 2, 4, 7, 8, 9]);

        let mut none = merge(vec![]);
        assert!(expand_postings(none.as_mut()).unwrap().is_empty());
    }

    #[test]
    fn test_merge_seek() {
        let mut p = merge(vec![list(&[1, 5, 10, 20]), list(&[2, 6, 11, 21])]);
        assert!(p.next());
        assert_eq!(p.at(), 1);
        assert!(p.seek(10));
        assert_eq!(p.at(), 10);
        assert!(p.seek(10));
        assert_eq!(p.at(), 10);
        assert!(p.next());
        assert_eq!(p.at(), 11);
        assert!(p.seek(21));
        assert_eq!(p.at(), 21);
        assert!(!p.next());

        let mut fresh = merge(vec![list(&[3, 7]), list(&[4, 9])]);
        assert!(fresh.seek(5));
        assert_eq!(fresh.at(), 7);
    }

    #[test]
    fn test_intersect() {
        let mut p = intersect(vec![
            list(&[1, 2, 3, 4, 5, 6, 1000, 1001]),
            list(&[2, 4, 5, 6, 7, 8, 999, 1001]),
            list(&[1, 2, 5, 6, 7, 8, 1001, 1200]),
        ]);
        assert_eq!(expand_postings(p.as_mut()).unwrap(), vec![2, 5, 6, 1001]);

        let mut disjoint = intersect(vec![list(&[1, 3, 5]), list(&[2, 4, 6])]);
        assert!(expand_postings(disjoint.as_mut()).unwrap().is_empty());

        let mut with_empty = intersect(vec![list(&[1, 2]), list(&[])]);
        assert!(!with_empty.next());

        let mut seeked = intersect(vec![list(&[1, 10, 20, 30]), list(&[10, 20, 30])]);
        assert!(seeked.seek(15));
        assert_eq!(seeked.at(), 20);
        assert!(seeked.next());
        assert_eq!(seeked.at(), 30);
        assert!(!seeked.next());
    }

    #[test]
    fn test_without() {
        let mut p = WithoutPostings::new(list(&[1, 2, 3, 4, 5, 6]), list(&[2, 3, 6, 9]));
        assert_eq!(expand_postings(&mut p).unwrap(), vec![1, 4, 5]);

        let mut nothing_removed = WithoutPostings::new(list(&[1, 2]), list(&[]));
        assert_eq!(expand_postings(&mut nothing_removed).unwrap(), vec![1, 2]);

        let mut everything_removed = WithoutPostings::new(list(&[1, 2]), list(&[1, 2]));
        assert!(expand_postings(&mut everything_removed).unwrap().is_empty());

        let mut seeked = WithoutPostings::new(list(&[1, 2, 3, 4, 5]), list(&[3, 4]));
        assert!(seeked.seek(3));
        assert_eq!(seeked.at(), 5);
    }

    #[test]
    fn test_sharded_postings() {
        // Accept only even references inside [3, 10).
        let mut p = ShardedPostings::new(list(&[1, 2, 4, 5, 6, 8, 10, 12]), 3, 10, |r| {
            Ok(r % 2 == 0)
        });
        assert_eq!(expand_postings(&mut p).unwrap(), vec![4, 6, 8]);

        let mut failing = ShardedPostings::new(list(&[1, 2, 3]), 0, 100, |r| {
            if r == 2 {
                Err(IndexError::corrupt("unreadable series"))
            } else {
                Ok(true)
            }
        });
        assert!(failing.next());
        assert!(!failing.next());
        assert!(failing.err().unwrap().is_corruption());
    }

    #[test]
    fn test_error_propagation() {
        let failing: BoxPostings = Box::new(FailingPostings {
            inner: ListPostings::new(vec![1, 2]),
            err: None,
        });
        let mut p = merge(vec![failing, list(&[3])]);
        assert!(expand_postings(p.as_mut()).is_err());

        let failing: BoxPostings = Box::new(FailingPostings {
            inner: ListPostings::new(vec![1]),
            err: None,
        });
        let mut p = intersect(vec![list(&[1, 2]), failing]);
        assert!(p.next());
        assert!(!p.next());
        assert!(p.err().is_some());
    }

    #[test]
    fn test_mem_postings() {
        let mut mp = MemPostings::new();
        for i in 1..=4u64 {
            let lset = LabelSet::from_pairs([("a", "1".to_string()), ("b", i.to_string())]);
            mp.add(i, &lset);
        }

        let mut a = mp.get("a", "1");
        assert_eq!(expand_postings(a.as_mut()).unwrap(), vec![1, 2, 3, 4]);

        let mut b = mp.postings("b", &["4", "2", "missing"]);
        assert_eq!(expand_postings(b.as_mut()).unwrap(), vec![2, 4]);

        let mut all = mp.all();
        assert_eq!(expand_postings(all.as_mut()).unwrap(), vec![1, 2, 3, 4]);

        assert_eq!(mp.label_names(), vec!["a", "b"]);
        assert_eq!(mp.label_values("b"), vec!["1", "2", "3", "4"]);
        let keys = mp.sorted_keys();
        assert_eq!(keys[0], (String::new(), String::new()));
        assert_eq!(keys.len(), 6);
    }

    #[test]
    fn test_mem_postings_ensure_order() {
        let mut mp = MemPostings::new();
        let lset = LabelSet::from_pairs([("job", "api")]);
        mp.add(5, &lset);
        mp.add(2, &lset);
        mp.add(5, &lset);
        mp.ensure_order();
        assert_eq!(mp.list("job", "api").unwrap(), &[2, 5]);
    }
}
