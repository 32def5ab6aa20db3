//! Walking and splicing failure chains.
//!
//! A chain is the sequence of failures reachable by following
//! [`Failure::previous`] links, newest first. Two chains are spliced with
//! [`Failure::join`]; this is what happens when a failure occurs while
//! another one is being handled: the newer chain is placed in front of the
//! older one.

use alloc::vec::Vec;
use core::iter::FusedIterator;

use hashbrown::HashSet;
use rustc_hash::FxBuildHasher;

use super::Failure;

/// Iterator over a failure chain, newest first.
///
/// Created by [`Failure::chain`]. Every node is yielded at most once.
pub struct Chain<'a> {
    next: Option<&'a Failure>,
    visited: HashSet<*const (), FxBuildHasher>,
}

impl<'a> Chain<'a> {
    pub(super) fn new(head: &'a Failure) -> Self {
        Self {
            next: Some(head),
            visited: HashSet::with_hasher(FxBuildHasher),
        }
    }
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a Failure;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        if !self.visited.insert(current.node_ptr()) {
            return None;
        }
        self.next = current.previous();
        Some(current)
    }
}

impl FusedIterator for Chain<'_> {}

impl Failure {
    /// Splices two chains: every node of `later`'s chain, followed by every
    /// node of `earlier`'s chain.
    ///
    /// The nodes of `earlier` are linked as they are, so the result shares
    /// them. The nodes of `later` are copied with their links rewired, which
    /// leaves `later` itself untouched.
    ///
    /// ```
    /// use crashguard_internals::failure::Failure;
    ///
    /// let c = Failure::msg("C");
    /// let b = Failure::msg("B").with_previous(Some(c));
    /// let a = Failure::msg("A").with_previous(Some(b));
    ///
    /// let z = Failure::msg("Z");
    /// let x = Failure::msg("X").with_previous(Some(z));
    ///
    /// let joined = Failure::join(a.clone(), x);
    /// let messages: Vec<_> = joined.chain().map(|f| f.message().to_owned()).collect();
    /// assert_eq!(messages, ["X", "Z", "A", "B", "C"]);
    /// assert!(joined.chain().any(|f| f.ptr_eq(&a)));
    /// ```
    #[must_use]
    pub fn join(earlier: Failure, later: Failure) -> Failure {
        let later_nodes: Vec<&Failure> = later.chain().collect();
        let mut head = earlier;
        for node in later_nodes.into_iter().rev() {
            head = node.relinked(Some(head));
        }
        head
    }

    /// Joins any number of chains, oldest first.
    ///
    /// Returns `None` when `chains` is empty.
    #[must_use]
    pub fn join_all<I>(chains: I) -> Option<Failure>
    where
        I: IntoIterator<Item = Failure>,
    {
        chains
            .into_iter()
            .reduce(|earlier, later| Failure::join(earlier, later))
    }
}
