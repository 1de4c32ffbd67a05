//! Small typed-id wrappers, in the style of `moire_web::app::ids::ConnectionId`:
//! a newtype around the raw integer with `next()`/`Display`/ordering derives,
//! rather than bare `u64`/`i64` threaded through every signature.

use std::fmt;
use std::num::NonZeroU64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(NonZeroU64);

impl EntityId {
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically allocates entity ids for a single graph, starting at 1.
#[derive(Debug, Clone, Copy)]
pub struct EntityIdAllocator {
    next: u64,
}

impl EntityIdAllocator {
    pub fn starting_at(next: u64) -> Self {
        Self {
            next: next.max(1),
        }
    }

    pub fn peek(&self) -> u64 {
        self.next
    }

    pub fn set_next(&mut self, next: u64) {
        self.next = next.max(self.next);
    }

    pub fn allocate(&mut self) -> EntityId {
        let id = EntityId::new(self.next).expect("allocator never hands out zero");
        self.next += 1;
        id
    }

    /// Ensures subsequent allocations never collide with `used`, without
    /// allocating anything now. Used by full-sync, which preserves
    /// caller-supplied entity ids verbatim (see SPEC_FULL.md §4.6).
    pub fn observe(&mut self, used: u64) {
        if used >= self.next {
            self.next = used + 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId(u64);

impl TxId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TxIdAllocator {
    next: u64,
}

impl TxIdAllocator {
    pub fn starting_at(next: u64) -> Self {
        Self { next: next.max(1) }
    }

    pub fn allocate(&mut self) -> TxId {
        let id = TxId::new(self.next);
        self.next += 1;
        id
    }
}
