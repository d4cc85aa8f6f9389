//! Generational slab used by the reactor to store task futures.
//!
//! Every insert returns a [`Key`] carrying the slot index and the slot's
//! generation. Removing a value bumps the generation, so stale keys held by
//! wakers that fire late never address a newer occupant of the same slot.
//!
//! A value can be checked out with [`Slab::take`] while it is being polled
//! and returned with [`Slab::restore`]. If the key was removed in between,
//! `restore` hands the value back to the caller to drop.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Key {
    index: u32,
    generation: u32,
}

enum Slot<T> {
    Vacant { generation: u32 },
    Occupied { generation: u32, value: Option<T> },
}

pub(crate) struct Slab<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Slab<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn insert(&mut self, value: T) -> Key {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            let generation = match slot {
                Slot::Vacant { generation } => *generation,
                Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            *slot = Slot::Occupied {
                generation,
                value: Some(value),
            };

            return Key { index, generation };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 0,
            value: Some(value),
        });

        Key {
            index,
            generation: 0,
        }
    }

    /// Checks the value out of its slot, leaving the key live.
    pub(crate) fn take(&mut self, key: Key) -> Option<T> {
        match self.slots.get_mut(key.index as usize) {
            Some(Slot::Occupied { generation, value }) if *generation == key.generation => {
                value.take()
            }
            _ => None,
        }
    }

    /// Returns a checked-out value. Gives it back if `key` was removed meanwhile.
    pub(crate) fn restore(&mut self, key: Key, item: T) -> Option<T> {
        match self.slots.get_mut(key.index as usize) {
            Some(Slot::Occupied { generation, value })
                if *generation == key.generation && value.is_none() =>
            {
                *value = Some(item);
                None
            }
            _ => Some(item),
        }
    }

    /// Frees the slot. Returns the value unless it is currently checked out.
    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;

        match slot {
            Slot::Occupied { generation, .. } if *generation == key.generation => {
                let next = generation.wrapping_add(1);
                let previous = std::mem::replace(slot, Slot::Vacant { generation: next });

                self.free.push(key.index);
                self.len -= 1;

                match previous {
                    Slot::Occupied { value, .. } => value,
                    Slot::Vacant { .. } => None,
                }
            }
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: Key) -> bool {
        matches!(
            self.slots.get(key.index as usize),
            Some(Slot::Occupied { generation, .. }) if *generation == key.generation
        )
    }

    /// Removes every value, returning those not checked out.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.len);

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Slot::Occupied { generation, value } = slot {
                let next = generation.wrapping_add(1);
                values.extend(value.take());
                *slot = Slot::Vacant { generation: next };
                self.free.push(index as u32);
            }
        }

        self.len = 0;
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_key_does_not_reach_new_occupant() {
        let mut slab = Slab::with_capacity(4);

        let first = slab.insert("first");
        assert_eq!(slab.remove(first), Some("first"));

        let second = slab.insert("second");
        assert!(!slab.contains(first));
        assert_eq!(slab.take(first), None);
        assert_eq!(slab.take(second), Some("second"));
    }

    #[test]
    fn restore_after_remove_returns_value() {
        let mut slab = Slab::with_capacity(1);
        let key = slab.insert(7);

        let value = slab.take(key).expect("checked out");
        assert_eq!(slab.remove(key), None);
        assert_eq!(slab.restore(key, value), Some(7));
        assert!(slab.is_empty());
    }

    #[test]
    fn drain_skips_checked_out_values() {
        let mut slab = Slab::with_capacity(2);
        let a = slab.insert(1);
        let _b = slab.insert(2);

        let _held = slab.take(a);
        assert_eq!(slab.drain(), vec![2]);
        assert_eq!(slab.len(), 0);
    }
}
