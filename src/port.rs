//! Ports and the per-stage dynamic port allocation table.
//!
//! Variable-arity stages (the batcher, the demultiplexer) grant ports on
//! request, keyed by the external source handle. The `PortPool` is the
//! explicit allocation table for those grants: a handle maps to exactly one
//! port, duplicates are refused, and capacity is enforced at reservation
//! time rather than discovered later inside a stage.

use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Binding state of a port. A port carries at most one link; the binding
/// records which kind of link claimed it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortBinding {
    Unbound,
    Static,
    Dynamic { slot: u32 },
}

/// A connection point on a stage.
///
/// Fixed ports exist from stage creation with `slot == None`. Requested
/// ports are appended by the pool with their slot recorded, and disappear
/// again when the pool is released.
#[derive(Clone, Debug)]
pub struct Port {
    pub direction: PortDirection,
    pub slot: Option<u32>,
    pub binding: PortBinding,
}

impl Port {
    pub fn fixed(direction: PortDirection) -> Self {
        Self {
            direction,
            slot: None,
            binding: PortBinding::Unbound,
        }
    }

    pub fn requested(direction: PortDirection, slot: u32) -> Self {
        Self {
            direction,
            slot: Some(slot),
            binding: PortBinding::Unbound,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.binding != PortBinding::Unbound
    }
}

/// Why the pool refused an allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolRefusal {
    /// The handle is already bound to a port. Refused rather than
    /// overwritten.
    Occupied,
    /// The pool is at capacity.
    Exhausted,
}

/// Allocation table for one stage's dynamic ports.
#[derive(Clone, Debug)]
pub struct PortPool {
    capacity: Option<u32>,
    slots: BTreeMap<u32, usize>,
}

impl PortPool {
    /// A pool with `capacity == None` grants ports without limit.
    pub fn new(capacity: Option<u32>) -> Self {
        Self {
            capacity,
            slots: BTreeMap::new(),
        }
    }

    /// Reserve the slot for `handle`, recording which port index it maps to.
    pub fn allocate(&mut self, handle: u32, port_index: usize) -> Result<(), PoolRefusal> {
        if self.slots.contains_key(&handle) {
            return Err(PoolRefusal::Occupied);
        }
        if let Some(capacity) = self.capacity {
            if self.slots.len() as u32 >= capacity {
                return Err(PoolRefusal::Exhausted);
            }
        }
        self.slots.insert(handle, port_index);
        Ok(())
    }

    /// Release the slot for `handle`, returning the port index it mapped to.
    pub fn release(&mut self, handle: u32) -> Option<usize> {
        self.slots.remove(&handle)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn port_index(&self, handle: u32) -> Option<usize> {
        self.slots.get(&handle).copied()
    }

    /// Bound handles in ascending order.
    pub fn handles(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> Option<u32> {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_refuses_duplicate_handles() {
        let mut pool = PortPool::new(Some(4));
        pool.allocate(0, 0).expect("first allocation");
        assert_eq!(pool.allocate(0, 1), Err(PoolRefusal::Occupied));
        assert_eq!(pool.port_index(0), Some(0));
    }

    #[test]
    fn pool_enforces_capacity() {
        let mut pool = PortPool::new(Some(2));
        pool.allocate(0, 0).expect("slot 0");
        pool.allocate(1, 1).expect("slot 1");
        assert_eq!(pool.allocate(2, 2), Err(PoolRefusal::Exhausted));
    }

    #[test]
    fn pool_release_frees_the_handle() {
        let mut pool = PortPool::new(Some(1));
        pool.allocate(7, 0).expect("slot 7");
        assert_eq!(pool.release(7), Some(0));
        assert!(pool.is_empty());
        pool.allocate(7, 0).expect("slot 7 again after release");
    }

    #[test]
    fn unbounded_pool_keeps_granting() {
        let mut pool = PortPool::new(None);
        for handle in 0..64 {
            pool.allocate(handle, handle as usize).expect("grant");
        }
        assert_eq!(pool.len(), 64);
        let handles: Vec<u32> = pool.handles().collect();
        assert_eq!(handles[0], 0);
        assert_eq!(handles[63], 63);
    }
}
