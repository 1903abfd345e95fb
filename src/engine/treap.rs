//! Persistent treap
//!
//! Nodes are immutable and shared through `Arc`. Every update copies the
//! path from the root to the touched node and returns a new root, so a root
//! cloned by a reader stays a consistent snapshot while writers move on.
//!
//! Invariants:
//! - keys are in-order with respect to the collection's `KeyCompare`
//! - a parent's priority is >= the priority of both children

use std::cmp::Ordering;
use std::sync::Arc;

use super::{Item, KeyCompare};

pub(crate) type Link = Option<Arc<Node>>;

pub(crate) struct Node {
    item: Arc<Item>,
    left: Link,
    right: Link,
}

impl Node {
    fn new(item: Arc<Item>, left: Link, right: Link) -> Arc<Node> {
        Arc::new(Node { item, left, right })
    }
}

/// Look up the item stored under `key`
pub(crate) fn get(root: &Link, key: &[u8], cmp: &KeyCompare) -> Option<Arc<Item>> {
    let mut cur = root.as_ref();
    while let Some(node) = cur {
        match cmp(key, &node.item.key) {
            Ordering::Less => cur = node.left.as_ref(),
            Ordering::Greater => cur = node.right.as_ref(),
            Ordering::Equal => return Some(Arc::clone(&node.item)),
        }
    }
    None
}

/// Insert or replace `item`
///
/// Returns the new root and whether an item with an equal key was replaced.
pub(crate) fn upsert(root: &Link, item: Arc<Item>, cmp: &KeyCompare) -> (Arc<Node>, bool) {
    let node = match root {
        None => return (Node::new(item, None, None), false),
        Some(node) => node,
    };

    match cmp(&item.key, &node.item.key) {
        Ordering::Equal => {
            // The replacement may carry a different priority, so re-seat it
            // into the merged children instead of swapping in place.
            let rest = merge(&node.left, &node.right);
            (upsert(&rest, item, cmp).0, true)
        }
        Ordering::Less => {
            let (child, replaced) = upsert(&node.left, item, cmp);
            if child.item.priority > node.item.priority {
                // rotate right
                let lowered = Node::new(
                    Arc::clone(&node.item),
                    child.right.clone(),
                    node.right.clone(),
                );
                let root = Node::new(Arc::clone(&child.item), child.left.clone(), Some(lowered));
                (root, replaced)
            } else {
                let root = Node::new(Arc::clone(&node.item), Some(child), node.right.clone());
                (root, replaced)
            }
        }
        Ordering::Greater => {
            let (child, replaced) = upsert(&node.right, item, cmp);
            if child.item.priority > node.item.priority {
                // rotate left
                let lowered = Node::new(
                    Arc::clone(&node.item),
                    node.left.clone(),
                    child.left.clone(),
                );
                let root = Node::new(Arc::clone(&child.item), Some(lowered), child.right.clone());
                (root, replaced)
            } else {
                let root = Node::new(Arc::clone(&node.item), node.left.clone(), Some(child));
                (root, replaced)
            }
        }
    }
}

/// Remove the item stored under `key`
///
/// Returns `None` when no such item exists, otherwise the new root.
pub(crate) fn remove(root: &Link, key: &[u8], cmp: &KeyCompare) -> Option<Link> {
    let node = root.as_ref()?;
    match cmp(key, &node.item.key) {
        Ordering::Equal => Some(merge(&node.left, &node.right)),
        Ordering::Less => {
            let left = remove(&node.left, key, cmp)?;
            Some(Some(Node::new(Arc::clone(&node.item), left, node.right.clone())))
        }
        Ordering::Greater => {
            let right = remove(&node.right, key, cmp)?;
            Some(Some(Node::new(Arc::clone(&node.item), node.left.clone(), right)))
        }
    }
}

/// Join two treaps where every key in `left` sorts before every key in `right`
fn merge(left: &Link, right: &Link) -> Link {
    match (left, right) {
        (None, _) => right.clone(),
        (_, None) => left.clone(),
        (Some(l), Some(r)) => {
            if l.item.priority > r.item.priority {
                Some(Node::new(
                    Arc::clone(&l.item),
                    l.left.clone(),
                    merge(&l.right, right),
                ))
            } else {
                Some(Node::new(
                    Arc::clone(&r.item),
                    merge(left, &r.left),
                    r.right.clone(),
                ))
            }
        }
    }
}

pub(crate) fn min(root: &Link) -> Option<Arc<Item>> {
    let mut node = root.as_ref()?;
    while let Some(left) = node.left.as_ref() {
        node = left;
    }
    Some(Arc::clone(&node.item))
}

pub(crate) fn max(root: &Link) -> Option<Arc<Item>> {
    let mut node = root.as_ref()?;
    while let Some(right) = node.right.as_ref() {
        node = right;
    }
    Some(Arc::clone(&node.item))
}

/// In-order visit of every item whose key is >= `start` (all items when
/// `start` is `None`). Stops as soon as `visitor` returns `false`.
///
/// Returns `false` if the visit was stopped early.
pub(crate) fn visit_ascend(
    link: &Link,
    start: Option<&[u8]>,
    cmp: &KeyCompare,
    visitor: &mut dyn FnMut(&Item) -> bool,
) -> bool {
    let node = match link {
        Some(node) => node,
        None => return true,
    };

    let in_range = start.map_or(true, |s| cmp(&node.item.key, s) != Ordering::Less);
    if in_range {
        if !visit_ascend(&node.left, start, cmp, visitor) {
            return false;
        }
        if !visitor(&node.item) {
            return false;
        }
    }
    visit_ascend(&node.right, start, cmp, visitor)
}
