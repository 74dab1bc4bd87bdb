//! Identifiers shared with the native engine.

use std::fmt;

/// An opaque pointer to an externally refcounted native resource.
///
/// Zero is the null handle; native open calls return it on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawHandle(pub u64);

impl RawHandle {
    /// The null handle.
    pub const NULL: Self = Self(0);

    /// Creates a raw handle.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// True for the null handle.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle:{:#x}", self.0)
    }
}

/// The engine's identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawToken(pub u64);

impl RawToken {
    /// Creates a raw token.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RawToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token:{}", self.0)
    }
}

/// Routing id handed to the engine in place of a callback context pointer.
///
/// A slot is reused once its listener is removed, but every reuse bumps the
/// generation, so an id held past removal never matches again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId {
    slot: u32,
    generation: u32,
}

impl RouteId {
    /// Creates a route id.
    #[must_use]
    pub const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    /// Slot index in the routing table.
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.slot
    }

    /// Generation of the slot when this id was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Packs the id into one integer, generation in the high half.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        ((self.generation as u64) << 32) | self.slot as u64
    }

    /// Inverse of [`RouteId::as_u64`].
    #[must_use]
    pub const fn from_u64(packed: u64) -> Self {
        Self {
            slot: packed as u32,
            generation: (packed >> 32) as u32,
        }
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route:{}/{}", self.slot, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle() {
        assert!(RawHandle::NULL.is_null());
        assert!(!RawHandle::new(7).is_null());
        assert_eq!(RawHandle::new(255).to_string(), "handle:0xff");
    }

    #[test]
    fn route_id_packing() {
        let id = RouteId::new(3, 9);
        let packed = id.as_u64();
        assert_eq!(RouteId::from_u64(packed), id);
        assert_eq!(packed >> 32, 9);
        assert_eq!(id.to_string(), "route:3/9");
    }
}
