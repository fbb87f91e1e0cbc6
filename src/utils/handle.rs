use std::hash::Hash;
use std::marker::PhantomData;

/// Typed index into a [`Pool`].
///
/// A handle is a slot plus a generation counter; a handle taken before the
/// slot was released never aliases the slot's new occupant. Handles are the
/// resource identity used throughout hazard tracking, so equality and hashing
/// compare slot + generation only.
pub struct Handle<T> {
    pub slot: u16,
    pub generation: u16,
    phantom: PhantomData<T>,
}

impl<T> Handle<T> {
    pub fn new(slot: u16, generation: u16) -> Self {
        Self {
            slot,
            generation,
            phantom: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
        self.generation.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self {
            slot: 0,
            generation: 0,
            phantom: PhantomData,
        }
    }
}

/// Fixed-capacity slot arena backing one resource kind.
pub struct Pool<T> {
    items: Vec<Option<T>>,
    empty: Vec<usize>,
    generation: Vec<u16>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        const INITIAL_SIZE: usize = 1024;
        Pool::new(INITIAL_SIZE)
    }
}

impl<T> Pool<T> {
    pub fn new(initial_size: usize) -> Self {
        // Slot indices are u16; extra capacity would alias on truncation.
        let size = initial_size.min(u16::MAX as usize + 1);
        let mut p = Pool {
            items: Vec::with_capacity(size),
            empty: (0..size).rev().collect(),
            generation: vec![0; size],
        };
        p.items.resize_with(size, || None);
        p
    }

    /// Insert an item, returning `None` when every slot is occupied.
    pub fn insert(&mut self, item: T) -> Option<Handle<T>> {
        let slot = self.empty.pop()?;
        self.items[slot] = Some(item);

        Some(Handle::new(slot as u16, self.generation[slot]))
    }

    /// Release a slot. The generation is bumped so outstanding handles to the
    /// released item stop resolving.
    pub fn release(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = handle.slot as usize;
        if self.generation[slot] != handle.generation {
            return None;
        }
        let item = self.items[slot].take()?;
        self.generation[slot] = self.generation[slot].wrapping_add(1);
        self.empty.push(slot);
        Some(item)
    }

    pub fn get_ref(&self, handle: Handle<T>) -> Option<&T> {
        let slot = handle.slot as usize;
        if self.generation.get(slot) == Some(&handle.generation) {
            self.items[slot].as_ref()
        } else {
            None
        }
    }

    pub fn get_mut_ref(&mut self, handle: Handle<T>) -> Option<&mut T> {
        let slot = handle.slot as usize;
        if self.generation.get(slot) == Some(&handle.generation) {
            self.items[slot].as_mut()
        } else {
            None
        }
    }

    /// Drain every live item, releasing all slots. Used at device teardown.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        for slot in 0..self.items.len() {
            if let Some(item) = self.items[slot].take() {
                self.generation[slot] = self.generation[slot].wrapping_add(1);
                self.empty.push(slot);
                out.push(item);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handles_do_not_resolve() {
        let mut pool = Pool::new(4);
        let a = pool.insert(10u32).unwrap();
        assert_eq!(pool.get_ref(a), Some(&10));

        pool.release(a);
        assert_eq!(pool.get_ref(a), None);

        // Slot reuse gets a new generation.
        let b = pool.insert(20u32).unwrap();
        assert_eq!(pool.get_ref(b), Some(&20));
        assert_ne!(a, b);
        assert_eq!(pool.get_ref(a), None);
    }

    #[test]
    fn exhausted_pool_returns_none() {
        let mut pool = Pool::new(2);
        assert!(pool.insert(0u8).is_some());
        assert!(pool.insert(1u8).is_some());
        assert!(pool.insert(2u8).is_none());
    }

    #[test]
    fn capacity_is_clamped_to_addressable_slots() {
        let mut pool = Pool::new(u16::MAX as usize + 50);
        for _ in 0..=u16::MAX as usize {
            assert!(pool.insert(0u8).is_some());
        }
        // Slot 65536 would wrap to 0 in a handle; it must not exist.
        assert!(pool.insert(0u8).is_none());
    }
}
