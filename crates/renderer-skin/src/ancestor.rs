use std::{
    collections::HashSet,
    sync::{Arc, Weak},
};

use glam::Mat4;

use crate::scene::Node;

/// Nearest node that is an ancestor of both `a` and `b`, a node counting as
/// its own ancestor.
///
/// When the nodes live in different trees the root of `a` is returned.
pub fn find_common_parent(a: &Arc<Node>, b: &Arc<Node>) -> Arc<Node> {
    if Arc::ptr_eq(a, b) {
        return a.clone();
    }
    let visited: HashSet<usize> = a.ancestors().map(|node| node.id()).collect();
    b.ancestors()
        .find(|node| visited.contains(&node.id()))
        .unwrap_or_else(|| a.root())
}

/// Transform from the space of `node` into the space of `ancestor`.
///
/// If `ancestor` is not on the chain of `node`, the walk stops at the root
/// and the world transform of `node` is returned.
pub fn path_transform(node: &Arc<Node>, ancestor: &Node) -> Mat4 {
    node.ancestors()
        .take_while(|item| item.id() != ancestor.id())
        .fold(Mat4::IDENTITY, |transform, item| {
            item.local_transform() * transform
        })
}

/// Transform from skeleton-root space into skin-node space.
pub fn normalization(skin_node: &Arc<Node>, skeleton_root: &Arc<Node>, ancestor: &Node) -> Mat4 {
    if Arc::ptr_eq(skin_node, skeleton_root) {
        return Mat4::IDENTITY;
    }
    path_transform(skin_node, ancestor).inverse() * path_transform(skeleton_root, ancestor)
}

/// Resolved common ancestor of a skin node and a skeleton root.
#[derive(Debug, Clone)]
pub struct AncestorCache {
    skin_node: usize,
    skeleton_root: usize,
    ancestor: Weak<Node>,
    normalization: Mat4,
}

impl AncestorCache {
    pub fn resolve(skin_node: &Arc<Node>, skeleton_root: &Arc<Node>) -> Self {
        let ancestor = find_common_parent(skin_node, skeleton_root);
        Self {
            skin_node: skin_node.id(),
            skeleton_root: skeleton_root.id(),
            normalization: normalization(skin_node, skeleton_root, &ancestor),
            ancestor: Arc::downgrade(&ancestor),
        }
    }

    pub fn ancestor(&self) -> Option<Arc<Node>> {
        self.ancestor.upgrade()
    }

    /// Normalization computed by the last [`resolve`](Self::resolve) or
    /// [`refresh`](Self::refresh).
    pub fn normalization(&self) -> Mat4 {
        self.normalization
    }

    /// Re-evaluate the normalization along the cached ancestor.
    ///
    /// Returns `None` when the cache was resolved for other nodes or the
    /// ancestor is gone; the cache is unchanged in that case.
    pub fn refresh(&mut self, skin_node: &Arc<Node>, skeleton_root: &Arc<Node>) -> Option<Mat4> {
        if skin_node.id() != self.skin_node || skeleton_root.id() != self.skeleton_root {
            return None;
        }
        let ancestor = self.ancestor.upgrade()?;
        self.normalization = normalization(skin_node, skeleton_root, &ancestor);
        Some(self.normalization)
    }
}
