//! Marks intentional, cheap duplication of reference-counted handles.
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use std::sync::Arc;
use tokio::sync::mpsc;

/// A cheap, intentional duplication of a handle (as opposed to a deep copy).
///
/// Every implementor is either an `Arc` or a thin wrapper around one, so
/// `dupe()` is always an atomic refcount bump. Spelling this out instead of
/// using `Clone` makes it obvious at every call site that no data is being
/// copied, and gives a lint a name (`clippy::clone_on_ref_ptr`) other than
/// bare `.clone()` to flag if a non-cheap `Clone` impl is ever added by
/// mistake.
pub trait Dupe {
    /// Duplicate this handle.
    fn dupe(&self) -> Self;
}

impl<T: ?Sized> Dupe for Arc<T> {
    #[inline]
    fn dupe(&self) -> Self {
        Arc::clone(self)
    }
}

impl<T> Dupe for mpsc::Sender<T> {
    #[inline]
    fn dupe(&self) -> Self {
        self.clone()
    }
}

impl<T> Dupe for mpsc::UnboundedSender<T> {
    #[inline]
    fn dupe(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arc_dupe_shares_allocation() {
        let a = Arc::new(42);
        let b = a.dupe();
        assert_eq!(Arc::strong_count(&a), 2);
        assert_eq!(*a, *b);
    }
}
