//! Set operations on sorted doc id lists and position-list predicates.
//!
//! Every function takes and returns strictly increasing sequences.

use crate::index::types::{DocId, Position};
use std::cmp::Ordering;

pub fn intersect(a: &[DocId], b: &[DocId]) -> Vec<DocId> {
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

pub fn union(a: &[DocId], b: &[DocId]) -> Vec<DocId> {
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::with_capacity(a.len() + b.len());
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// Elements of `a` not in `b`
pub fn difference(a: &[DocId], b: &[DocId]) -> Vec<DocId> {
    let mut j = 0;
    let mut out = Vec::with_capacity(a.len());
    for &doc in a {
        while j < b.len() && b[j] < doc {
            j += 1;
        }
        if j >= b.len() || b[j] != doc {
            out.push(doc);
        }
    }
    out
}

/// `0..doc_count` without `a`
pub fn complement(a: &[DocId], doc_count: u32) -> Vec<DocId> {
    let mut out = Vec::with_capacity((doc_count as usize).saturating_sub(a.len()));
    let mut excluded = a.iter().peekable();
    for doc in 0..doc_count {
        if excluded.next_if_eq(&&doc).is_none() {
            out.push(doc);
        }
    }
    out
}

/// Some pair of positions lies at most `radius` apart, in either order
pub fn within(a: &[Position], b: &[Position], radius: u32) -> bool {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].abs_diff(b[j]) <= radius {
            return true;
        }
        if a[i] < b[j] {
            i += 1;
        } else {
            j += 1;
        }
    }
    false
}

/// One position from each list forms a strictly increasing tuple.
///
/// Taking the earliest position after the previous pick is optimal, so a
/// single greedy pass decides it.
pub fn in_order(lists: &[Vec<Position>]) -> bool {
    let mut prev: Option<Position> = None;
    for list in lists {
        let from = match prev {
            None => 0,
            Some(p) => list.partition_point(|&x| x <= p),
        };
        match list.get(from) {
            Some(&p) => prev = Some(p),
            None => return false,
        }
    }
    true
}

/// Some `p` in the first list has `p + k` in list `k` for every `k`
pub fn adjacent(lists: &[Vec<Position>]) -> bool {
    let Some((first, rest)) = lists.split_first() else {
        return false;
    };
    let mut starts: Vec<Position> = first.clone();
    for (k, list) in rest.iter().enumerate() {
        let shift = k as u64 + 1;
        let mut j = 0;
        starts.retain(|&p| {
            let want = p as u64 + shift;
            while j < list.len() && (list[j] as u64) < want {
                j += 1;
            }
            j < list.len() && list[j] as u64 == want
        });
        if starts.is_empty() {
            return false;
        }
    }
    !starts.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_operations() {
        let a = [1, 3, 5, 7];
        let b = [3, 4, 5, 8];
        assert_eq!(intersect(&a, &b), vec![3, 5]);
        assert_eq!(union(&a, &b), vec![1, 3, 4, 5, 7, 8]);
        assert_eq!(difference(&a, &b), vec![1, 7]);
        assert_eq!(difference(&a, &[]), a.to_vec());
        assert_eq!(complement(&a, 9), vec![0, 2, 4, 6, 8]);
        assert_eq!(complement(&[], 3), vec![0, 1, 2]);
        assert!(complement(&[0, 1, 2], 3).is_empty());
    }

    #[test]
    fn test_within_boundary() {
        // hello at 0, world at 3
        assert!(within(&[0], &[3], 3));
        assert!(!within(&[0], &[3], 2));
        // either order
        assert!(within(&[10], &[8], 2));
        assert!(within(&[1, 50, 90], &[20, 88], 2));
        assert!(!within(&[], &[1], 100));
    }

    #[test]
    fn test_in_order() {
        assert!(in_order(&[vec![0], vec![2]]));
        assert!(!in_order(&[vec![2], vec![0]]));
        // greedy pick of a's first position leaves room for b and c
        assert!(in_order(&[vec![1, 9], vec![4, 5], vec![6]]));
        assert!(!in_order(&[vec![5], vec![6], vec![6]]));
        // repeated term needs two distinct positions
        assert!(!in_order(&[vec![3], vec![3]]));
        assert!(in_order(&[vec![3, 7], vec![3, 7]]));
    }

    #[test]
    fn test_adjacent() {
        assert!(adjacent(&[vec![0, 4], vec![5]]));
        assert!(!adjacent(&[vec![0], vec![2]]));
        assert!(adjacent(&[vec![2, 10], vec![3, 11], vec![12]]));
        assert!(!adjacent(&[vec![u32::MAX], vec![0]]));
    }
}
