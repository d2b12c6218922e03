// src/core/pubsub/trie.rs

//! A generic token-indexed tree that maps subject patterns to values and answers
//! wildcard matches.
//!
//! Patterns are inserted as token sequences where `*` and `>` are ordinary child
//! keys. Matching walks only the branches compatible with the subject, so the
//! cost is proportional to the number of compatible paths rather than to the
//! number of stored patterns.

use super::subject::{FULL_WILDCARD, WILDCARD};
use bytes::Bytes;
use std::collections::HashMap;

/// One level of the trie. Nodes are created on demand and never pruned.
#[derive(Debug)]
pub struct SubjectNode<T> {
    children: HashMap<Bytes, SubjectNode<T>>,
    values: Vec<T>,
}

impl<T> Default for SubjectNode<T> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            values: Vec::new(),
        }
    }
}

impl<T> SubjectNode<T> {
    fn collect<'a>(&'a self, tokens: &[&[u8]], index: usize, out: &mut Vec<&'a T>) {
        if let Some(token) = tokens.get(index) {
            if *token != WILDCARD {
                if let Some(child) = self.children.get(*token) {
                    child.collect(tokens, index + 1, out);
                }
            }
            if let Some(child) = self.children.get(WILDCARD) {
                child.collect(tokens, index + 1, out);
            }
        } else {
            out.extend(self.values.iter());
        }

        // `>` matches whatever remains, including nothing.
        if let Some(child) = self.children.get(FULL_WILDCARD) {
            out.extend(child.values.iter());
        }
    }

    fn retain<F>(&mut self, keep: &mut F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let before = self.values.len();
        self.values.retain(|value| keep(value));
        let mut removed = before - self.values.len();
        for child in self.children.values_mut() {
            removed += child.retain(keep);
        }
        removed
    }
}

/// A subject trie holding values of type `T` at pattern-terminating nodes.
#[derive(Debug)]
pub struct SubjectTrie<T> {
    root: SubjectNode<T>,
    len: usize,
}

impl<T> Default for SubjectTrie<T> {
    fn default() -> Self {
        Self {
            root: SubjectNode::default(),
            len: 0,
        }
    }
}

impl<T: PartialEq> SubjectTrie<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under the pattern spelled by `tokens`.
    ///
    /// Returns `false` and leaves the trie untouched if an equal value already
    /// terminates at that node.
    pub fn insert(&mut self, tokens: &[&[u8]], value: T) -> bool {
        let mut node = &mut self.root;
        for token in tokens {
            node = node
                .children
                .entry(Bytes::copy_from_slice(token))
                .or_default();
        }
        if node.values.contains(&value) {
            return false;
        }
        node.values.push(value);
        self.len += 1;
        true
    }

    /// Returns every value whose pattern matches the literal subject `tokens`.
    pub fn matches(&self, tokens: &[&[u8]]) -> Vec<&T> {
        let mut out = Vec::new();
        self.root.collect(tokens, 0, &mut out);
        out
    }

    /// Removes every value for which `keep` returns `false` and reports how many
    /// were removed.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let removed = self.root.retain(&mut keep);
        self.len -= removed;
        removed
    }

    /// The number of values stored across all nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
