//! Element identity — one handle type for real and synthetic UI elements.
//!
//! An [`ElementIdentity`] names either a live node in a foreign process's
//! accessibility tree (`Native`) or a synthetic stand-in carrying test data
//! (`Mock`). Locators and assertions take the identity as-is and never
//! branch on where it came from.

mod factory;

pub use factory::ElementFactory;

use bytes::Bytes;

use crate::accessibility::{AxHandle, Pid};

/// Owning pid reported by the device root, which spans every process.
pub const SYSTEM_PID: Pid = -1;

/// Which variant an identity holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// Backed by a node in a live accessibility tree.
    Native,
    /// Synthetic stand-in carrying a caller payload.
    Mock,
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => f.write_str("native"),
            Self::Mock => f.write_str("mock"),
        }
    }
}

/// Caller-defined data attached to a mock identity.
///
/// Treated as opaque bytes. The default payload is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Payload(Bytes);

impl Payload {
    /// Wrap caller data without copying it.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    /// The raw payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// True for the default payload.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&'static str> for Payload {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

/// Element identity errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ElementError {
    /// The handle's owning process could not be determined.
    #[error("cannot resolve owning process of {handle}")]
    UnresolvableProcess {
        /// The node whose owner was looked up.
        handle: AxHandle,
    },
    /// The pid is not visible to the accessibility subsystem.
    #[error("process {pid} is not accessible")]
    ProcessNotAccessible {
        /// The pid that was asked for.
        pid: Pid,
    },
    /// A variant-specific field was read on the other variant.
    #[error("{expected}-only field read on a {actual} element")]
    WrongVariant {
        /// Variant the field belongs to.
        expected: ElementKind,
        /// Variant the identity actually holds.
        actual: ElementKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Inner {
    Native {
        pid: Pid,
        handle: AxHandle,
        device_root: bool,
    },
    Mock {
        pid: Pid,
        payload: Payload,
    },
}

/// Immutable reference to a UI element, native or mock.
///
/// Native identities come from [`ElementFactory`]; mock identities are
/// built directly with [`ElementIdentity::mock`] and never touch the
/// accessibility subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementIdentity(Inner);

impl ElementIdentity {
    pub(crate) fn native(pid: Pid, handle: AxHandle, device_root: bool) -> Self {
        Self(Inner::Native {
            pid,
            handle,
            device_root,
        })
    }

    /// Mock identity with an empty payload.
    pub fn mock(pid: Pid) -> Self {
        Self::mock_with_payload(pid, Payload::default())
    }

    /// Mock identity carrying `payload`. The pid need not be a live process.
    pub fn mock_with_payload(pid: Pid, payload: impl Into<Payload>) -> Self {
        Self(Inner::Mock {
            pid,
            payload: payload.into(),
        })
    }

    /// Which variant this identity holds. Fixed at construction.
    pub fn kind(&self) -> ElementKind {
        match self.0 {
            Inner::Native { .. } => ElementKind::Native,
            Inner::Mock { .. } => ElementKind::Mock,
        }
    }

    /// Shorthand for `kind() == ElementKind::Native`.
    pub fn is_native(&self) -> bool {
        self.kind() == ElementKind::Native
    }

    /// Owning process id. [`SYSTEM_PID`] for the device root.
    pub fn pid(&self) -> Pid {
        match self.0 {
            Inner::Native { pid, .. } | Inner::Mock { pid, .. } => pid,
        }
    }

    /// True only for the device-wide root element.
    pub fn is_device_root(&self) -> bool {
        matches!(
            self.0,
            Inner::Native {
                device_root: true,
                ..
            }
        )
    }

    /// Accessibility handle of a native identity.
    pub fn handle(&self) -> Result<AxHandle, ElementError> {
        match self.0 {
            Inner::Native { handle, .. } => Ok(handle),
            Inner::Mock { .. } => Err(ElementError::WrongVariant {
                expected: ElementKind::Native,
                actual: ElementKind::Mock,
            }),
        }
    }

    /// Payload of a mock identity.
    pub fn payload(&self) -> Result<&Payload, ElementError> {
        match &self.0 {
            Inner::Mock { payload, .. } => Ok(payload),
            Inner::Native { .. } => Err(ElementError::WrongVariant {
                expected: ElementKind::Mock,
                actual: ElementKind::Native,
            }),
        }
    }
}

impl std::fmt::Display for ElementIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Inner::Native {
                device_root: true,
                handle,
                ..
            } => write!(f, "device-root({handle})"),
            Inner::Native { pid, handle, .. } => write!(f, "native(pid={pid}, {handle})"),
            Inner::Mock { pid, payload } => {
                write!(f, "mock(pid={pid}, {} bytes)", payload.as_bytes().len())
            }
        }
    }
}
