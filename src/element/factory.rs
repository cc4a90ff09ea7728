//! Native identity construction against an accessibility backend.

use std::sync::OnceLock;

use crate::accessibility::{Accessibility, AxHandle, Pid};

use super::{ElementError, ElementIdentity, SYSTEM_PID};

/// Builds native [`ElementIdentity`] values from a live accessibility tree.
///
/// Creating the factory is the explicit initialization point for the
/// device root: it is resolved on first use and memoized for the factory's
/// lifetime. Hold one factory per process.
pub struct ElementFactory<A> {
    ax: A,
    device_root: OnceLock<ElementIdentity>,
}

impl<A: Accessibility> ElementFactory<A> {
    /// Factory over `ax`. The device root is not resolved until first use.
    pub fn new(ax: A) -> Self {
        Self {
            ax,
            device_root: OnceLock::new(),
        }
    }

    /// Identity for an existing node, attributed to its current owner.
    ///
    /// Fails with [`ElementError::UnresolvableProcess`] if the node is
    /// gone or its owner cannot be determined.
    pub fn from_handle(&self, handle: AxHandle) -> Result<ElementIdentity, ElementError> {
        let pid = self
            .ax
            .lookup_owning_process(handle)
            .ok_or(ElementError::UnresolvableProcess { handle })?;
        tracing::debug!(pid, %handle, "native element from handle");
        Ok(ElementIdentity::native(pid, handle, false))
    }

    /// Identity for the root of `pid`'s accessibility tree.
    ///
    /// Fails with [`ElementError::ProcessNotAccessible`] if the subsystem
    /// does not see `pid`.
    pub fn from_pid(&self, pid: Pid) -> Result<ElementIdentity, ElementError> {
        let handle = self
            .ax
            .root_element(pid)
            .ok_or(ElementError::ProcessNotAccessible { pid })?;
        tracing::debug!(pid, %handle, "native element from pid");
        Ok(ElementIdentity::native(pid, handle, false))
    }

    /// The device-wide root element, owned by [`SYSTEM_PID`].
    pub fn device_root(&self) -> &ElementIdentity {
        self.device_root.get_or_init(|| {
            let handle = self.ax.system_root_element();
            tracing::debug!(%handle, "device root resolved");
            ElementIdentity::native(SYSTEM_PID, handle, true)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::accessibility::FixtureTree;
    use crate::element::ElementKind;

    fn factory() -> (Arc<FixtureTree>, ElementFactory<Arc<FixtureTree>>) {
        let tree = Arc::new(FixtureTree::new());
        (tree.clone(), ElementFactory::new(tree))
    }

    #[test]
    fn from_pid_returns_process_root() {
        let (tree, factory) = factory();
        let root = tree.add_process(501);

        let el = factory.from_pid(501).unwrap();
        assert_eq!(el.kind(), ElementKind::Native);
        assert_eq!(el.pid(), 501);
        assert_eq!(el.handle(), Ok(root));
        assert!(el.payload().is_err());
        assert!(!el.is_device_root());
    }

    #[test]
    fn from_pid_unknown_process_fails() {
        let (_tree, factory) = factory();
        assert_eq!(
            factory.from_pid(999),
            Err(ElementError::ProcessNotAccessible { pid: 999 })
        );
    }

    #[test]
    fn from_pid_after_terminate_fails() {
        let (tree, factory) = factory();
        tree.add_process(12);
        assert!(factory.from_pid(12).is_ok());

        tree.terminate(12);
        assert!(matches!(
            factory.from_pid(12),
            Err(ElementError::ProcessNotAccessible { pid: 12 })
        ));
    }

    #[test]
    fn from_handle_attributes_owner() {
        let (tree, factory) = factory();
        tree.add_process(77);
        let node = tree.add_element(77).unwrap();

        let el = factory.from_handle(node).unwrap();
        assert_eq!(el.pid(), 77);
        assert_eq!(el.handle(), Ok(node));
    }

    #[test]
    fn from_handle_invalidated_node_fails() {
        let (tree, factory) = factory();
        tree.add_process(77);
        let node = tree.add_element(77).unwrap();
        tree.invalidate(node);

        assert_eq!(
            factory.from_handle(node),
            Err(ElementError::UnresolvableProcess { handle: node })
        );
    }

    #[test]
    fn device_root_is_memoized() {
        let (_tree, factory) = factory();
        let first = factory.device_root().clone();
        let second = factory.device_root();

        assert!(first.is_device_root());
        assert!(second.is_device_root());
        assert_eq!(first.pid(), SYSTEM_PID);
        assert_eq!(second.pid(), SYSTEM_PID);
        assert_eq!(&first, second);
        assert!(first.handle().is_ok());
    }

    #[test]
    fn device_root_differs_from_process_root() {
        let (tree, factory) = factory();
        tree.add_process(1);
        let app = factory.from_pid(1).unwrap();
        assert_ne!(&app, factory.device_root());
        assert!(!app.is_device_root());
    }
}
