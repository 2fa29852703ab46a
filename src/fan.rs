//! Fixed-capacity storage for terminal connections.

/// Maximum number of inputs a single output can feed.
pub const MAX_FAN_OUT: usize = 8;

/// Maximum number of outputs that can feed a single input.
pub const MAX_FAN_IN: usize = 32;

/// A set with a compile-time capacity.
///
/// Inserting into a full set hands the item back instead of growing or
/// silently dropping it. Removal keeps the remaining items packed at the front.
pub struct FanSet<T, const N: usize> {
    slots: [Option<T>; N],
    len: usize,
}

impl<T, const N: usize> FanSet<T, N> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == N
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Insert `item`, or return it if the set is already at capacity.
    pub fn try_insert(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.slots[self.len] = Some(item);
        self.len += 1;
        Ok(())
    }

    /// Remove and return the first item matching `pred`.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> Option<T> {
        let pos = self.iter().position(|item| pred(item))?;
        let removed = self.slots[pos].take();
        self.slots[pos..self.len].rotate_left(1);
        self.len -= 1;
        removed
    }

    /// Keep only the items matching `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        let mut write = 0;
        for read in 0..self.len {
            let keep_it = self.slots[read].as_ref().map_or(false, &mut keep);
            if keep_it {
                self.slots.swap(write, read);
                write += 1;
            } else {
                self.slots[read] = None;
            }
        }
        self.len = write;
    }

    pub fn contains_where(&self, pred: impl FnMut(&T) -> bool) -> bool {
        self.iter().any(pred)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots[..self.len].iter().filter_map(Option::as_ref)
    }

    pub fn clear(&mut self) {
        for slot in self.slots[..self.len].iter_mut() {
            *slot = None;
        }
        self.len = 0;
    }
}

impl<T, const N: usize> Default for FanSet<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_beyond_capacity() {
        let mut set = FanSet::<u32, 2>::new();
        assert!(set.try_insert(1).is_ok());
        assert!(set.try_insert(2).is_ok());
        assert_eq!(set.try_insert(3), Err(3));
        assert_eq!(set.len(), 2);
        assert!(set.is_full());
    }

    #[test]
    fn remove_keeps_items_packed() {
        let mut set = FanSet::<u32, 4>::new();
        for i in 0..4 {
            set.try_insert(i).unwrap();
        }
        assert_eq!(set.remove_where(|i| *i == 1), Some(1));
        assert_eq!(set.iter().copied().collect::<Vec<_>>(), vec![0, 2, 3]);
        assert!(set.try_insert(9).is_ok());
        assert_eq!(set.iter().copied().collect::<Vec<_>>(), vec![0, 2, 3, 9]);
        assert_eq!(set.remove_where(|i| *i == 42), None);
    }

    #[test]
    fn retain_drops_unmatched() {
        let mut set = FanSet::<u32, 8>::new();
        for i in 0..6 {
            set.try_insert(i).unwrap();
        }
        set.retain(|i| i % 2 == 0);
        assert_eq!(set.iter().copied().collect::<Vec<_>>(), vec![0, 2, 4]);
        assert_eq!(set.len(), 3);
    }
}
