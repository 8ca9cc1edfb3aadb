//! Minimal scene hierarchy the skin resolves its space normalization against.

use std::{
    fmt::{self, Debug, Formatter},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError, RwLock, Weak,
    },
};

use glam::Mat4;

use crate::error::{ArgumentError, Result};

static ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub fn new_node_id() -> usize {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Receives structural changes of the hierarchy.
///
/// Called after a node, or one of its ancestors, was moved to a new parent.
/// No lock of the hierarchy is held during the call.
pub trait HierarchyListener: Send + Sync {
    fn hierarchy_changed(&self, node: &Node);
}

pub struct Node {
    id: usize,
    name: Option<String>,
    parent: RwLock<Weak<Node>>,
    children: Mutex<Vec<Weak<Node>>>,
    local_transform: RwLock<Mat4>,
    listeners: Mutex<Vec<Weak<dyn HierarchyListener>>>,
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &self.parent().map(|parent| parent.id))
            .field("local_transform", &self.local_transform())
            .finish()
    }
}

impl Node {
    pub fn new() -> Arc<Self> {
        Self::create(None, Mat4::IDENTITY)
    }

    pub fn named(name: impl Into<String>) -> Arc<Self> {
        Self::create(Some(name.into()), Mat4::IDENTITY)
    }

    pub fn with_transform(name: impl Into<String>, transform: Mat4) -> Arc<Self> {
        Self::create(Some(name.into()), transform)
    }

    fn create(name: Option<String>, transform: Mat4) -> Arc<Self> {
        Arc::new(Self {
            id: new_node_id(),
            name,
            parent: RwLock::new(Weak::new()),
            children: Mutex::new(Vec::new()),
            local_transform: RwLock::new(transform),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn parent(&self) -> Option<Arc<Node>> {
        self.parent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    pub fn children(&self) -> Vec<Arc<Node>> {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn local_transform(&self) -> Mat4 {
        *self
            .local_transform
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Moving a node is not a structural change, listeners are not called.
    pub fn set_local_transform(&self, transform: Mat4) {
        *self
            .local_transform
            .write()
            .unwrap_or_else(PoisonError::into_inner) = transform;
    }

    /// The node itself followed by its ancestors, ending at the root.
    pub fn ancestors(self: &Arc<Self>) -> Ancestors {
        Ancestors {
            next: Some(self.clone()),
        }
    }

    pub fn root(self: &Arc<Self>) -> Arc<Node> {
        let mut node = self.clone();
        while let Some(parent) = node.parent() {
            node = parent;
        }
        node
    }

    pub fn world_transform(self: &Arc<Self>) -> Mat4 {
        self.ancestors()
            .fold(Mat4::IDENTITY, |transform, node| {
                node.local_transform() * transform
            })
    }

    /// Attach the node under `parent`, or detach it when `parent` is `None`.
    ///
    /// Listeners of the node and of all its descendants are notified once
    /// the new links are in place.
    pub fn set_parent(self: &Arc<Self>, parent: Option<&Arc<Node>>) -> Result<()> {
        if let Some(parent) = parent {
            if parent.ancestors().any(|node| Arc::ptr_eq(&node, self)) {
                return Err(ArgumentError::CyclicHierarchy {
                    child: self.id,
                    parent: parent.id,
                }
                .into());
            }
        }

        let this = Arc::downgrade(self);
        if let Some(old_parent) = self.parent() {
            old_parent
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|child| child.strong_count() > 0 && !Weak::ptr_eq(child, &this));
        }
        *self.parent.write().unwrap_or_else(PoisonError::into_inner) =
            parent.map(Arc::downgrade).unwrap_or_default();
        if let Some(parent) = parent {
            parent
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(this);
        }

        self.notify_subtree();
        Ok(())
    }

    /// Registering the same listener twice has no effect.
    pub fn subscribe(&self, listener: Weak<dyn HierarchyListener>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|item| item.strong_count() > 0);
        if !listeners.iter().any(|item| Weak::ptr_eq(item, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn unsubscribe(&self, listener: &Weak<dyn HierarchyListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|item| item.strong_count() > 0 && !Weak::ptr_eq(item, listener));
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|item| item.strong_count() > 0)
            .count()
    }

    fn notify_subtree(self: &Arc<Self>) {
        let mut pending = vec![self.clone()];
        while let Some(node) = pending.pop() {
            let listeners: Vec<_> = {
                let mut listeners = node.listeners.lock().unwrap_or_else(PoisonError::into_inner);
                listeners.retain(|item| item.strong_count() > 0);
                listeners.iter().filter_map(Weak::upgrade).collect()
            };
            for listener in listeners {
                listener.hierarchy_changed(&node);
            }
            pending.extend(node.children());
        }
    }
}

pub struct Ancestors {
    next: Option<Arc<Node>>,
}

impl Iterator for Ancestors {
    type Item = Arc<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next.take()?;
        self.next = node.parent();
        Some(node)
    }
}
