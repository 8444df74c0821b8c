//! Value Reconciliation
//!
//! `conform` reconciles a freshly produced value with the previous one,
//! preferring previous references when the two are structurally equal.
//!
//! # Why This Matters
//!
//! A handler that rebuilds a collection on every run would otherwise produce
//! a "new" value each time, invalidating every dependent even when nothing
//! actually changed. Conforming the fresh value against the committed one
//! keeps shared references (`Arc`) stable, so:
//!
//! - equality checks on dependents stay cheap (pointer-equal arcs short-circuit),
//! - the ownership tracker sees the same identity and never double-disposes,
//! - no-op writes are detected and dropped before they obsolete a cell.
//!
//! # Implementation Notes
//!
//! Reference preservation is only meaningful for shared containers. Plain
//! values (`i32`, `bool`, `String`) conform to themselves; `Arc<T>` conforms
//! to the previous arc when the contents are equal; collections conform
//! element-wise so inner arcs survive even when the collection as a whole
//! changed.

use std::sync::Arc;

/// Reconcile a fresh value against the previous one.
///
/// Returns a value equal to `next`, built from `prev`'s references wherever
/// the two are structurally equal.
pub trait Conform: Sized {
    fn conform(self, prev: &Self) -> Self;
}

/// Free-function form of [`Conform::conform`].
pub fn conform<T: Conform>(next: T, prev: &T) -> T {
    next.conform(prev)
}

macro_rules! conform_identity {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Conform for $ty {
                #[inline]
                fn conform(self, _prev: &Self) -> Self {
                    self
                }
            }
        )*
    };
}

conform_identity!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    usize,
    i8,
    i16,
    i32,
    i64,
    isize,
    f32,
    f64,
    String,
);

impl<T: PartialEq + ?Sized> Conform for Arc<T> {
    fn conform(self, prev: &Self) -> Self {
        if Arc::ptr_eq(&self, prev) || *self == **prev {
            prev.clone()
        } else {
            self
        }
    }
}

impl<T: Conform> Conform for Option<T> {
    fn conform(self, prev: &Self) -> Self {
        match (self, prev) {
            (Some(next), Some(prev)) => Some(next.conform(prev)),
            (next, _) => next,
        }
    }
}

impl<T: Conform> Conform for Vec<T> {
    fn conform(self, prev: &Self) -> Self {
        self.into_iter()
            .enumerate()
            .map(|(i, item)| match prev.get(i) {
                Some(p) => item.conform(p),
                None => item,
            })
            .collect()
    }
}

impl<A: Conform, B: Conform> Conform for (A, B) {
    fn conform(self, prev: &Self) -> Self {
        (self.0.conform(&prev.0), self.1.conform(&prev.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arc_preserves_previous_reference_when_equal() {
        let prev: Arc<Vec<i32>> = Arc::new(vec![1, 2, 3]);
        let next: Arc<Vec<i32>> = Arc::new(vec![1, 2, 3]);

        let conformed = next.conform(&prev);
        assert!(Arc::ptr_eq(&conformed, &prev));
    }

    #[test]
    fn arc_keeps_new_reference_when_different() {
        let prev: Arc<Vec<i32>> = Arc::new(vec![1, 2, 3]);
        let next: Arc<Vec<i32>> = Arc::new(vec![1, 2, 4]);

        let conformed = next.clone().conform(&prev);
        assert!(!Arc::ptr_eq(&conformed, &prev));
        assert_eq!(*conformed, vec![1, 2, 4]);
    }

    #[test]
    fn vec_conforms_element_wise() {
        let a = Arc::new("a".to_string());
        let b = Arc::new("b".to_string());
        let prev = vec![a.clone(), b.clone()];

        // Rebuilt list: first element equal, second changed, third appended.
        let next = vec![
            Arc::new("a".to_string()),
            Arc::new("c".to_string()),
            Arc::new("d".to_string()),
        ];

        let conformed = next.conform(&prev);
        assert_eq!(conformed.len(), 3);
        // The unchanged element keeps the previous arc.
        assert!(Arc::ptr_eq(&conformed[0], &a));
        assert!(!Arc::ptr_eq(&conformed[1], &b));
        assert_eq!(*conformed[2], "d");
    }

    #[test]
    fn option_conforms_inner_value() {
        let prev = Some(Arc::new(7));
        let next = Some(Arc::new(7));

        let conformed = next.conform(&prev);
        let (conformed, prev) = (conformed.unwrap(), prev.unwrap());
        assert!(Arc::ptr_eq(&conformed, &prev));
    }

    #[test]
    fn none_replaces_some() {
        let prev = Some(Arc::new(7));
        let next: Option<Arc<i32>> = None;
        assert!(next.conform(&prev).is_none());
    }
}
