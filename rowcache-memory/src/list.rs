// Copyright 2026 rowcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! An index-linked doubly linked list backed by a slot arena.
//!
//! Nodes live in a `Vec` and link to each other by slot index, so there are no shared pointers and no cyclic
//! ownership. Slot `0` and slot `1` are the head and tail sentinels; vacated slots are recycled through a free list.

use std::ops::{Index, IndexMut};

const HEAD: usize = 0;
const TAIL: usize = 1;

/// Handle to a node in a [`RecencyList`].
///
/// A token stays valid until its node is removed. After that the slot may be recycled by a later insertion, so the
/// owner must drop the token together with the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(usize);

#[derive(Debug)]
struct Node<T> {
    val: Option<T>,
    prev: usize,
    next: usize,
}

impl<T> Node<T> {
    fn sentinel() -> Self {
        Self {
            val: None,
            prev: HEAD,
            next: TAIL,
        }
    }
}

/// A list ordered from the most recently touched node (front) to the least recently touched node (back).
#[derive(Debug)]
pub struct RecencyList<T> {
    nodes: Vec<Node<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Default for RecencyList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RecencyList<T> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty list with room for `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut nodes = Vec::with_capacity(capacity + 2);
        nodes.push(Node::sentinel());
        nodes.push(Node::sentinel());
        Self {
            nodes,
            free: vec![],
            len: 0,
        }
    }

    /// Insert a value at the front and return its token.
    pub fn push_front(&mut self, val: T) -> Token {
        let node = Node {
            val: Some(val),
            prev: HEAD,
            next: TAIL,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.nodes[index] = node;
                index
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.link_after_head(index);
        self.len += 1;
        Token(index)
    }

    /// Move the node to the front.
    pub fn move_to_front(&mut self, token: Token) {
        self.assert_occupied(token);
        if self.nodes[HEAD].next == token.0 {
            return;
        }
        self.unlink(token.0);
        self.link_after_head(token.0);
    }

    /// Remove the node and return its value.
    ///
    /// Returns `None` if the token does not refer to a live node.
    pub fn remove(&mut self, token: Token) -> Option<T> {
        let val = self.nodes.get_mut(token.0).filter(|_| token.0 > TAIL)?.val.take()?;
        self.unlink(token.0);
        self.free.push(token.0);
        self.len -= 1;
        Some(val)
    }

    /// Token of the most recently touched node.
    #[cfg(test)]
    pub fn front(&self) -> Option<Token> {
        let index = self.nodes[HEAD].next;
        (index != TAIL).then_some(Token(index))
    }

    /// Token of the least recently touched node.
    pub fn back(&self) -> Option<Token> {
        let index = self.nodes[TAIL].prev;
        (index != HEAD).then_some(Token(index))
    }

    /// Get the value of a node.
    pub fn get(&self, token: Token) -> Option<&T> {
        self.nodes.get(token.0).and_then(|node| node.val.as_ref())
    }

    /// Get the mutable value of a node.
    pub fn get_mut(&mut self, token: Token) -> Option<&mut T> {
        self.nodes.get_mut(token.0).and_then(|node| node.val.as_mut())
    }

    /// Iterate from front to back.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            index: self.nodes[HEAD].next,
        }
    }

    /// Remove all nodes.
    ///
    /// Slots are released, the arena keeps its allocation.
    pub fn clear(&mut self) {
        self.nodes.truncate(2);
        self.nodes[HEAD] = Node::sentinel();
        self.nodes[TAIL] = Node::sentinel();
        self.free.clear();
        self.len = 0;
    }

    /// Count of live nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if there is no live node.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn link_after_head(&mut self, index: usize) {
        let next = self.nodes[HEAD].next;
        self.nodes[index].prev = HEAD;
        self.nodes[index].next = next;
        self.nodes[next].prev = index;
        self.nodes[HEAD].next = index;
    }

    fn unlink(&mut self, index: usize) {
        let Node { prev, next, .. } = self.nodes[index];
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[index].prev = HEAD;
        self.nodes[index].next = TAIL;
    }

    fn assert_occupied(&self, token: Token) {
        assert!(
            token.0 > TAIL && self.nodes.get(token.0).is_some_and(|node| node.val.is_some()),
            "invalid token: {token:?}"
        );
    }
}

impl<T> Index<Token> for RecencyList<T> {
    type Output = T;

    fn index(&self, token: Token) -> &Self::Output {
        match self.get(token) {
            Some(val) if token.0 > TAIL => val,
            _ => panic!("invalid token: {token:?}"),
        }
    }
}

impl<T> IndexMut<Token> for RecencyList<T> {
    fn index_mut(&mut self, token: Token) -> &mut Self::Output {
        let sentinel = token.0 <= TAIL;
        match self.get_mut(token) {
            Some(val) if !sentinel => val,
            _ => panic!("invalid token: {token:?}"),
        }
    }
}

/// Front to back iterator over `(token, value)` pairs.
pub struct Iter<'a, T> {
    list: &'a RecencyList<T>,
    index: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (Token, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index == TAIL {
            return None;
        }
        let node = &self.list.nodes[self.index];
        let item = (Token(self.index), node.val.as_ref()?);
        self.index = node.next;
        Some(item)
    }
}
