//! Counted ownership of channel-resident values.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

use crate::channel::Channel;

/// Opaque identifier for one value owned by an execution channel.
///
/// A handle is just a name; ownership lives in [`SharedHandle`]. `Option<Handle>`
/// stands in for a null handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NonZeroU64);

impl Handle {
    /// Returns `None` for the raw value 0, which channels never hand out.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Handle)
    }

    /// The channel's numeric id for this value, never 0.
    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sole owner of a handle; releases it back to its channel when dropped.
struct HandleOwner {
    handle: Handle,
    channel: Arc<dyn Channel>,
}

impl Drop for HandleOwner {
    fn drop(&mut self) {
        tracing::trace!(handle = %self.handle, channel = self.channel.name(), "releasing handle");
        self.channel.del(self.handle);
    }
}

/// Shared ownership of a [`Handle`].
///
/// Cloning shares the handle; the channel's `del` runs exactly once, when the
/// last clone is dropped. A null `SharedHandle` owns nothing and never calls
/// into a channel.
#[derive(Clone, Default)]
pub struct SharedHandle {
    owner: Option<Arc<HandleOwner>>,
}

impl SharedHandle {
    /// Takes ownership of `handle`, which must not already be owned elsewhere.
    pub fn new(handle: Option<Handle>, channel: Arc<dyn Channel>) -> Self {
        Self {
            owner: handle.map(|handle| Arc::new(HandleOwner { handle, channel })),
        }
    }

    /// Owns nothing. Same as `SharedHandle::default()`.
    pub fn null() -> Self {
        Self::default()
    }

    /// Raw handle for passing to the channel. Does not transfer ownership.
    pub fn get(&self) -> Option<Handle> {
        self.owner.as_ref().map(|o| o.handle)
    }

    /// True when nothing is owned. `get` and `channel` then return `None`.
    pub fn is_null(&self) -> bool {
        self.owner.is_none()
    }

    /// Channel that will receive the release call.
    pub fn channel(&self) -> Option<&Arc<dyn Channel>> {
        self.owner.as_ref().map(|o| &o.channel)
    }

    /// Number of `SharedHandle`s currently sharing this handle (0 when null).
    pub fn use_count(&self) -> usize {
        self.owner.as_ref().map_or(0, Arc::strong_count)
    }

    /// Moves ownership out, leaving `self` null.
    ///
    /// The use count is unchanged: the share held by `self` moves to the
    /// returned value, so no release happens here.
    pub fn take(&mut self) -> SharedHandle {
        std::mem::take(self)
    }
}

impl fmt::Debug for SharedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(h) => write!(f, "SharedHandle({h}, owners={})", self.use_count()),
            None => f.write_str("SharedHandle(null)"),
        }
    }
}
