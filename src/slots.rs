use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tracing::{debug, warn};

use crate::error::{CapacityExceeded, SlotError};

const NAME_PREFIX: &str = "Player";

/// Name reported for any index that does not hold a live connection.
pub const UNKNOWN_NAME: &str = "Player_Unknown";

/// Fixed-capacity registry of live connections.
///
/// Each occupied index owns one handle. Freed indices go back into a
/// min-heap, so the smallest free index is always handed out next and
/// display names stay dense and predictable. Closing a connection is
/// dropping its handle: `evict` drops it immediately, and dropping the table
/// drops every remaining handle exactly once.
#[derive(Debug)]
pub struct SlotTable<T> {
    slots: Box<[Option<T>]>,
    free: BinaryHeap<Reverse<usize>>,
    live: usize,
}

impl<T> SlotTable<T> {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| None).collect();
        let free = (0..capacity).map(Reverse).collect();

        debug!(capacity, "slot table initialized");

        Self {
            slots,
            free,
            live: 0,
        }
    }

    /// Stores `handle` in the smallest free slot and returns its index.
    ///
    /// A full table hands the handle back untouched.
    pub fn admit(&mut self, handle: T) -> Result<usize, CapacityExceeded<T>> {
        let Some(Reverse(index)) = self.free.pop() else {
            warn!(capacity = self.capacity(), "admission refused: table full");
            return Err(CapacityExceeded {
                capacity: self.capacity(),
                handle,
            });
        };

        debug_assert!(self.slots[index].is_none(), "free pool held a live slot {index}");

        self.slots[index] = Some(handle);
        self.live += 1;

        debug!(slot = index, live = self.live, "slot occupied");

        Ok(index)
    }

    /// Closes the connection in `index` and returns the index to the pool.
    pub fn evict(&mut self, index: usize) -> Result<(), SlotError> {
        let capacity = self.capacity();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(SlotError::InvalidIndex { index, capacity })?;

        let handle = slot.take().ok_or(SlotError::AlreadyEvicted(index))?;
        drop(handle);

        self.live -= 1;
        self.free.push(Reverse(index));

        debug!(slot = index, live = self.live, "slot released");

        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)?.as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index)?.as_mut()
    }

    pub fn display_name(&self, index: usize) -> String {
        match self.get(index) {
            Some(_) => format!("{NAME_PREFIX}_{index}"),
            None => UNKNOWN_NAME.to_string(),
        }
    }

    /// Live handles in ascending index order.
    pub fn live(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    #[cfg(test)]
    fn free_indices(&self) -> Vec<usize> {
        let mut free: Vec<usize> = self.free.iter().map(|Reverse(i)| *i).collect();
        free.sort_unstable();
        free
    }

    #[cfg(test)]
    fn live_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Debug)]
    struct Tracked {
        closes: Rc<Cell<usize>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.closes.set(self.closes.get() + 1);
        }
    }

    #[test]
    fn admits_in_ascending_order() {
        let mut table = SlotTable::new(3);

        assert_eq!(table.admit("a").unwrap(), 0);
        assert_eq!(table.admit("b").unwrap(), 1);
        assert_eq!(table.admit("c").unwrap(), 2);
        assert_eq!(table.live_count(), 3);
        assert!(table.is_full());
    }

    #[test]
    fn reuses_smallest_free_index_first() {
        let mut table = SlotTable::new(10);
        for i in 0..10 {
            table.admit(i).unwrap();
        }

        table.evict(5).unwrap();
        table.evict(2).unwrap();

        assert_eq!(table.admit(100).unwrap(), 2);
        assert_eq!(table.admit(101).unwrap(), 5);
    }

    #[test]
    fn full_table_returns_handle_and_keeps_slots() {
        let mut table = SlotTable::new(2);
        table.admit("first").unwrap();
        table.admit("second").unwrap();

        let err = table.admit("third").unwrap_err();

        assert_eq!(err.handle, "third");
        assert_eq!(err.capacity, 2);
        assert_eq!(table.get(0), Some(&"first"));
        assert_eq!(table.get(1), Some(&"second"));
        assert_eq!(table.live_count(), 2);
    }

    #[test]
    fn evict_rejects_bad_index_without_mutation() {
        let mut table = SlotTable::new(2);
        table.admit("only").unwrap();

        assert_eq!(
            table.evict(7),
            Err(SlotError::InvalidIndex {
                index: 7,
                capacity: 2
            })
        );
        assert_eq!(table.evict(1), Err(SlotError::AlreadyEvicted(1)));

        assert_eq!(table.live_count(), 1);
        assert_eq!(table.free_indices(), vec![1]);

        table.evict(0).unwrap();
        assert_eq!(table.evict(0), Err(SlotError::AlreadyEvicted(0)));
        assert_eq!(table.free_indices(), vec![0, 1]);
    }

    #[test]
    fn lookups_tolerate_bad_input() {
        let mut table = SlotTable::new(4);
        table.admit("x").unwrap();

        assert_eq!(table.get(0), Some(&"x"));
        assert_eq!(table.get(1), None);
        assert_eq!(table.get(usize::MAX), None);

        assert_eq!(table.display_name(0), "Player_0");
        assert_eq!(table.display_name(1), UNKNOWN_NAME);
        assert_eq!(table.display_name(99), UNKNOWN_NAME);
    }

    #[test]
    fn live_is_index_ordered() {
        let mut table = SlotTable::new(4);
        for name in ["a", "b", "c", "d"] {
            table.admit(name).unwrap();
        }
        table.evict(1).unwrap();

        let live: Vec<_> = table.live().copied().collect();
        assert_eq!(live, vec!["a", "c", "d"]);
    }

    #[test]
    fn evict_and_drop_close_each_handle_once() {
        let closes = Rc::new(Cell::new(0));
        let mut table = SlotTable::new(4);
        for _ in 0..3 {
            table
                .admit(Tracked {
                    closes: closes.clone(),
                })
                .unwrap();
        }

        table.evict(1).unwrap();
        assert_eq!(closes.get(), 1);
        assert!(table.evict(1).is_err());
        assert_eq!(closes.get(), 1);

        drop(table);
        assert_eq!(closes.get(), 3);
    }

    #[test]
    fn random_churn_keeps_pool_and_live_partitioned() {
        const N: usize = 10;
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut table = SlotTable::new(N);

        for step in 0..2_000 {
            if rng.gen_bool(0.55) {
                let was_full = table.is_full();
                let smallest = table.free_indices().first().copied();
                match table.admit(step) {
                    Ok(index) => assert_eq!(Some(index), smallest),
                    Err(_) => assert!(was_full),
                }
            } else {
                let _ = table.evict(rng.gen_range(0..N + 2));
            }

            let live = table.live_indices();
            let free = table.free_indices();
            assert_eq!(live.len(), table.live_count());

            let mut all: Vec<usize> = live.iter().chain(free.iter()).copied().collect();
            all.sort_unstable();
            assert_eq!(all, (0..N).collect::<Vec<_>>());
        }
    }
}
