//! The model tree: named nodes carrying components.
//!
//! A model graph is a tree of [`ModelNode`]s, each holding one
//! [`Component`] behind a lock so that phase handlers registered on the
//! clock can reach back into sibling components. Within one replica all
//! access is single-threaded (one worker steps one replica at a time);
//! the locks exist so replicas as a whole are `Send`.
//!
//! Lookup is by component type, mirroring how callers think about a
//! graph ("find the data store", "find all reports"). Deep cloning goes
//! through each component's checked clone capability and produces a tree
//! that shares no mutable state with the source.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::component::{CloneError, Component};

/// Stable identity of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Shared cell holding a node's component.
pub type ComponentCell = Arc<Mutex<Box<dyn Component>>>;

/// Errors raised by tree operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A component lock was poisoned by a panicking holder.
    #[error("component lock poisoned for {name}")]
    Poisoned {
        /// The node whose lock is poisoned.
        name: String,
    },

    /// A typed access did not match the component's actual type.
    #[error("component {name} is not a {expected}")]
    TypeMismatch {
        /// The node that was accessed.
        name: String,
        /// The expected component type.
        expected: &'static str,
    },

    /// A component refused to be cloned.
    #[error(transparent)]
    Clone(#[from] CloneError),
}

/// One node of a model tree.
pub struct ModelNode {
    id: NodeId,
    name: String,
    component: ComponentCell,
    children: Vec<ModelNode>,
}

impl ModelNode {
    /// Create a leaf node around a component; the node takes the
    /// component's name.
    pub fn new(component: Box<dyn Component>) -> Self {
        let name = component.name().to_owned();
        Self {
            id: NodeId::new(),
            name,
            component: Arc::new(Mutex::new(component)),
            children: Vec::new(),
        }
    }

    /// The node's identity.
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// The node's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Child nodes, in insertion order.
    pub fn children(&self) -> &[Self] {
        &self.children
    }

    /// Attach a child node.
    pub fn add_child(&mut self, child: Self) {
        self.children.push(child);
    }

    /// The shared cell holding this node's component.
    pub fn component_cell(&self) -> ComponentCell {
        Arc::clone(&self.component)
    }

    /// Replace this node's component in place. The node keeps its id but
    /// takes the new component's name.
    pub fn set_component(&mut self, component: Box<dyn Component>) {
        self.name = component.name().to_owned();
        self.component = Arc::new(Mutex::new(component));
    }

    /// Depth-first traversal, visiting this node before its children.
    pub fn visit<F: FnMut(&Self)>(&self, f: &mut F) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }

    /// Depth-first mutable traversal, visiting this node before its
    /// children.
    pub fn visit_mut<F: FnMut(&mut Self)>(&mut self, f: &mut F) {
        f(self);
        for child in &mut self.children {
            child.visit_mut(f);
        }
    }

    fn holds<T: Component + 'static>(&self) -> bool {
        self.component
            .lock()
            .is_ok_and(|guard| guard.as_any().is::<T>())
    }

    /// Find the first component of type `T` in this subtree (this node
    /// included), depth-first.
    pub fn find_component<T: Component + 'static>(&self) -> Option<ComponentHandle<T>> {
        let mut found = None;
        self.visit(&mut |node| {
            if found.is_none() && node.holds::<T>() {
                found = Some(ComponentHandle::new(node.name.clone(), node.component_cell()));
            }
        });
        found
    }

    /// Find every component of type `T` in this subtree, depth-first.
    pub fn find_all_components<T: Component + 'static>(&self) -> Vec<ComponentHandle<T>> {
        let mut found = Vec::new();
        self.visit(&mut |node| {
            if node.holds::<T>() {
                found.push(ComponentHandle::new(node.name.clone(), node.component_cell()));
            }
        });
        found
    }

    /// Detach every descendant node whose component is of type `T`.
    /// Returns the number of nodes removed.
    pub fn remove_descendants<T: Component + 'static>(&mut self) -> usize {
        let before = self.children.len();
        self.children.retain(|child| !child.holds::<T>());
        let mut removed = before.saturating_sub(self.children.len());
        for child in &mut self.children {
            removed = removed.saturating_add(child.remove_descendants::<T>());
        }
        removed
    }

    /// Deep-clone this subtree through each component's checked clone
    /// capability. The copy gets fresh node ids and shares no mutable
    /// state with the source.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Poisoned`] if a component lock is poisoned,
    /// or [`GraphError::Clone`] if any component refuses duplication.
    pub fn clone_tree(&self) -> Result<Self, GraphError> {
        let component = {
            let guard = self
                .component
                .lock()
                .map_err(|_err| GraphError::Poisoned {
                    name: self.name.clone(),
                })?;
            guard.clone_component()?
        };

        let mut children = Vec::with_capacity(self.children.len());
        for child in &self.children {
            children.push(child.clone_tree()?);
        }

        Ok(Self {
            id: NodeId::new(),
            name: self.name.clone(),
            component: Arc::new(Mutex::new(component)),
            children,
        })
    }
}

impl std::fmt::Debug for ModelNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

/// Typed accessor over an erased component cell.
///
/// The handle holds a strong reference to the cell, so it stays valid
/// even if the node is later detached; it does not keep the component
/// subscribed to anything.
pub struct ComponentHandle<T> {
    name: String,
    cell: ComponentCell,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component + 'static> ComponentHandle<T> {
    fn new(name: String, cell: ComponentCell) -> Self {
        Self {
            name,
            cell,
            _marker: PhantomData,
        }
    }

    /// The name of the node this handle was found on.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn cell(&self) -> ComponentCell {
        Arc::clone(&self.cell)
    }

    /// Run a closure against the component, immutably.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Poisoned`] or [`GraphError::TypeMismatch`].
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, GraphError> {
        let guard = self.cell.lock().map_err(|_err| GraphError::Poisoned {
            name: self.name.clone(),
        })?;
        let typed = guard
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| GraphError::TypeMismatch {
                name: self.name.clone(),
                expected: std::any::type_name::<T>(),
            })?;
        Ok(f(typed))
    }

    /// Run a closure against the component, mutably.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Poisoned`] or [`GraphError::TypeMismatch`].
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, GraphError> {
        let mut guard = self.cell.lock().map_err(|_err| GraphError::Poisoned {
            name: self.name.clone(),
        })?;
        let typed = guard
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| GraphError::TypeMismatch {
                name: self.name.clone(),
                expected: std::any::type_name::<T>(),
            })?;
        Ok(f(typed))
    }
}

impl<T> Clone for ComponentHandle<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            cell: Arc::clone(&self.cell),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for ComponentHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::component::Folder;
    use crate::report::Report;
    use crate::storage::DataStore;

    fn sample_tree() -> ModelNode {
        let mut root = ModelNode::new(Box::new(Folder::new("Simulations")));
        root.add_child(ModelNode::new(Box::new(DataStore::new("Storage"))));

        let mut paddock = ModelNode::new(Box::new(Folder::new("Paddock")));
        paddock.add_child(ModelNode::new(Box::new(Report::new(
            "DailyReport",
            &["Wheat.Grain.Wt"],
        ))));
        root.add_child(paddock);
        root
    }

    #[test]
    fn find_component_is_depth_first() {
        let tree = sample_tree();
        let store = tree.find_component::<DataStore>().unwrap();
        assert_eq!(store.name(), "Storage");
        assert!(tree.find_component::<Report>().is_some());
    }

    #[test]
    fn typed_access_round_trips() {
        let tree = sample_tree();
        let store = tree.find_component::<DataStore>().unwrap();
        store.with_mut(|s| s.set_enabled(false)).unwrap();
        assert!(!store.with(DataStore::is_enabled).unwrap());
    }

    #[test]
    fn mismatched_handle_type_is_an_error() {
        let node = ModelNode::new(Box::new(Folder::new("Lonely")));
        let handle = node.find_component::<Folder>().unwrap();
        let bogus: ComponentHandle<DataStore> =
            ComponentHandle::new("Lonely".to_owned(), node.component_cell());
        assert!(matches!(
            bogus.with(|_s| ()),
            Err(GraphError::TypeMismatch { .. })
        ));
        assert!(handle.with(|_f| ()).is_ok());
    }

    #[test]
    fn remove_descendants_detaches_everywhere() {
        let mut tree = sample_tree();
        assert_eq!(tree.find_all_components::<Report>().len(), 1);
        let removed = tree.remove_descendants::<Report>();
        assert_eq!(removed, 1);
        assert!(tree.find_component::<Report>().is_none());
        // Idempotent.
        assert_eq!(tree.remove_descendants::<Report>(), 0);
    }

    #[test]
    fn clone_tree_is_deep_and_independent() {
        let mut tree = sample_tree();
        // Reports refuse cloning; excise them first.
        tree.remove_descendants::<Report>();

        let copy = tree.clone_tree().unwrap();
        assert_ne!(copy.id(), tree.id());

        // Mutating the original does not leak into the copy.
        let original_store = tree.find_component::<DataStore>().unwrap();
        original_store.with_mut(|s| s.set_enabled(false)).unwrap();
        let copied_store = copy.find_component::<DataStore>().unwrap();
        assert!(copied_store.with(DataStore::is_enabled).unwrap());
    }

    #[test]
    fn clone_tree_refuses_uncloneable_components() {
        let tree = sample_tree();
        assert!(matches!(
            tree.clone_tree(),
            Err(GraphError::Clone(CloneError::NotCloneable { .. }))
        ));
    }
}
