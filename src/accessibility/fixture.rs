//! In-memory accessibility backend.
//!
//! Models a set of processes, each with a root node and any number of
//! descendant nodes. Processes can be terminated and nodes invalidated at
//! runtime to exercise stale-handle paths.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Accessibility, AxHandle, Pid};

/// Node id reserved for the device-wide root.
const SYSTEM_ROOT: AxHandle = AxHandle::from_raw(0);

#[derive(Debug, Default)]
struct Tree {
    /// Live node → owning process.
    owners: HashMap<AxHandle, Pid>,
    /// Visible process → its root node.
    roots: HashMap<Pid, AxHandle>,
}

/// Deterministic [`Accessibility`] implementation backed by a table.
#[derive(Debug)]
pub struct FixtureTree {
    tree: RwLock<Tree>,
    next_id: AtomicU64,
}

impl Default for FixtureTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureTree {
    /// Empty tree: no process is visible.
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Tree::default()),
            next_id: AtomicU64::new(SYSTEM_ROOT.raw() + 1),
        }
    }

    fn alloc(&self) -> AxHandle {
        AxHandle::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Make `pid` visible and return its root node.
    ///
    /// Registering an already-visible pid returns the existing root.
    pub fn add_process(&self, pid: Pid) -> AxHandle {
        let mut tree = self.tree.write().unwrap_or_else(|e| e.into_inner());
        if let Some(&root) = tree.roots.get(&pid) {
            return root;
        }
        let root = self.alloc();
        tree.roots.insert(pid, root);
        tree.owners.insert(root, pid);
        root
    }

    /// Add a node owned by `pid`. Returns `None` if `pid` is not visible.
    pub fn add_element(&self, pid: Pid) -> Option<AxHandle> {
        let mut tree = self.tree.write().unwrap_or_else(|e| e.into_inner());
        if !tree.roots.contains_key(&pid) {
            return None;
        }
        let handle = self.alloc();
        tree.owners.insert(handle, pid);
        Some(handle)
    }

    /// Drop a single node. Later owner lookups for it fail.
    pub fn invalidate(&self, handle: AxHandle) {
        let mut tree = self.tree.write().unwrap_or_else(|e| e.into_inner());
        tree.owners.remove(&handle);
        tree.roots.retain(|_, root| *root != handle);
    }

    /// Remove `pid` and every node it owns.
    pub fn terminate(&self, pid: Pid) {
        let mut tree = self.tree.write().unwrap_or_else(|e| e.into_inner());
        tree.roots.remove(&pid);
        tree.owners.retain(|_, owner| *owner != pid);
    }
}

impl Accessibility for FixtureTree {
    fn lookup_owning_process(&self, handle: AxHandle) -> Option<Pid> {
        let tree = self.tree.read().unwrap_or_else(|e| e.into_inner());
        tree.owners.get(&handle).copied()
    }

    fn root_element(&self, pid: Pid) -> Option<AxHandle> {
        let tree = self.tree.read().unwrap_or_else(|e| e.into_inner());
        tree.roots.get(&pid).copied()
    }

    fn system_root_element(&self) -> AxHandle {
        SYSTEM_ROOT
    }
}
