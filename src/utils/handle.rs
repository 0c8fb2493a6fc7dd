use std::hash::Hash;
use std::marker::PhantomData;

/// Typed index into a [`Pool`]. The slot is reused after release; the
/// generation distinguishes a stale handle from the slot's current occupant.
pub struct Handle<T> {
    pub slot: u16,
    pub generation: u16,
    phantom: PhantomData<T>,
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .field("phantom", &self.phantom)
            .finish()
    }
}

impl<T> Handle<T> {
    pub(crate) fn new(slot: u16, generation: u16) -> Self {
        Self {
            slot,
            generation,
            phantom: PhantomData,
        }
    }

    /// Rebuild a handle from its raw parts. Only meaningful for values that
    /// came out of a pool (or tooling surfaces that transport the packed
    /// key); a fabricated handle simply fails to resolve.
    pub fn from_raw_parts(slot: u16, generation: u16) -> Self {
        Self::new(slot, generation)
    }

    /// Packed (slot, generation) value. Used where a handle participates in
    /// an ordering key and only identity matters.
    pub fn key(&self) -> u32 {
        ((self.slot as u32) << 16) | self.generation as u32
    }

    pub fn valid(&self) -> bool {
        *self != Self::default()
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

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
            slot: u16::MAX,
            generation: u16::MAX,
            phantom: PhantomData,
        }
    }
}

/// Slot arena with generational handles. Backends keep one pool per resource
/// kind; the orchestrator keeps one per instance kind.
pub struct Pool<T> {
    items: Vec<Option<T>>,
    empty: Vec<usize>,
    generation: Vec<u16>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl<T> Pool<T> {
    pub fn new(initial_size: usize) -> Self {
        let mut p = Pool {
            items: Vec::with_capacity(initial_size),
            empty: Vec::with_capacity(initial_size),
            generation: vec![0; initial_size],
        };

        p.empty = (0..initial_size).rev().collect();
        p.items.resize_with(initial_size, || None);
        p
    }

    pub fn insert(&mut self, item: T) -> Option<Handle<T>> {
        let slot = match self.empty.pop() {
            Some(slot) => slot,
            None => {
                // Grow by one slab. Slots above u16::MAX cannot be addressed.
                let old = self.items.len();
                if old >= u16::MAX as usize {
                    return None;
                }
                let new = (old * 2).clamp(old + 1, u16::MAX as usize);
                self.items.resize_with(new, || None);
                self.generation.resize(new, 0);
                self.empty.extend((old + 1..new).rev());
                old
            }
        };

        self.items[slot] = Some(item);

        Some(Handle::new(slot as u16, self.generation[slot]))
    }

    /// Frees the slot and bumps its generation so stale handles stop
    /// resolving.
    pub fn release(&mut self, item: Handle<T>) -> Option<T> {
        let slot = item.slot as usize;
        if slot >= self.items.len() || self.generation[slot] != item.generation {
            return None;
        }
        let prev = self.items[slot].take()?;
        self.generation[slot] = self.generation[slot].wrapping_add(1);
        self.empty.push(slot);
        Some(prev)
    }

    pub fn get_ref(&self, item: Handle<T>) -> Option<&T> {
        let slot = item.slot as usize;
        if slot < self.items.len() && self.generation[slot] == item.generation {
            self.items[slot].as_ref()
        } else {
            None
        }
    }

    pub fn get_mut_ref(&mut self, item: Handle<T>) -> Option<&mut T> {
        let slot = item.slot as usize;
        if slot < self.items.len() && self.generation[slot] == item.generation {
            self.items[slot].as_mut()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.items.len() - self.empty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn for_each_occupied<F>(&self, mut func: F)
    where
        F: FnMut(Handle<T>, &T),
    {
        for (slot, item) in self.items.iter().enumerate() {
            if let Some(item) = item {
                func(Handle::new(slot as u16, self.generation[slot]), item);
            }
        }
    }

    pub fn for_each_occupied_mut<F>(&mut self, mut func: F)
    where
        F: FnMut(Handle<T>, &mut T),
    {
        for (slot, item) in self.items.iter_mut().enumerate() {
            if let Some(item) = item {
                func(Handle::new(slot as u16, self.generation[slot]), item);
            }
        }
    }

    pub fn drain<F>(&mut self, mut func: F)
    where
        F: FnMut(T),
    {
        for (slot, item) in self.items.iter_mut().enumerate() {
            if let Some(item) = item.take() {
                self.generation[slot] = self.generation[slot].wrapping_add(1);
                self.empty.push(slot);
                func(item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handles_stop_resolving_after_release() {
        let mut pool: Pool<u32> = Pool::new(4);
        let a = pool.insert(7).unwrap();
        assert_eq!(pool.get_ref(a), Some(&7));

        pool.release(a);
        assert_eq!(pool.get_ref(a), None);

        // Reusing the slot must hand out a different generation.
        let b = pool.insert(9).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.get_ref(a), None);
        assert_eq!(pool.get_ref(b), Some(&9));
    }

    #[test]
    fn pool_grows_past_initial_capacity() {
        let mut pool: Pool<usize> = Pool::new(2);
        let handles: Vec<_> = (0..64).map(|i| pool.insert(i).unwrap()).collect();
        for (i, h) in handles.iter().enumerate() {
            assert_eq!(pool.get_ref(*h), Some(&i));
        }
        assert_eq!(pool.len(), 64);
    }

    #[test]
    fn handle_key_orders_by_slot_then_generation() {
        let a = Handle::<u32>::new(1, 0);
        let b = Handle::<u32>::new(1, 1);
        let c = Handle::<u32>::new(2, 0);
        assert!(a < b);
        assert!(b < c);
    }
}
