//! Frame buffering: the fixed pair of frame slots and the index that
//! alternates between them.

use std::ops::{Index, IndexMut};

/// Number of frames that may be in flight at once.
pub const BUFFERING: usize = 2;

/// Index of the current frame slot.
///
/// Takes the values `0, 1, 0, 1, ...`; the only way to move it is
/// [`FrameIndex::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameIndex(u8);

impl FrameIndex {
    /// The first slot.
    pub const FIRST: Self = Self(0);

    /// Slot number in `0..BUFFERING`.
    pub const fn get(self) -> usize {
        self.0 as usize
    }

    /// Move to the next slot, wrapping.
    pub fn advance(&mut self) {
        self.0 = ((self.0 as usize + 1) % BUFFERING) as u8;
    }

    /// The slot after this one.
    #[must_use]
    pub fn next(self) -> Self {
        let mut next = self;
        next.advance();
        next
    }
}

/// One value per frame slot, indexed by [`FrameIndex`].
#[derive(Debug, Clone, Default)]
pub struct PerFrame<T>([T; BUFFERING]);

impl<T> PerFrame<T> {
    /// Build each slot's value from its index.
    pub fn from_fn(mut f: impl FnMut(FrameIndex) -> T) -> Self {
        let mut index = FrameIndex::FIRST;
        Self(std::array::from_fn(|_| {
            let value = f(index);
            index.advance();
            value
        }))
    }

    /// Build each slot's value with a fallible constructor.
    pub fn try_from_fn<E>(
        mut f: impl FnMut(FrameIndex) -> std::result::Result<T, E>,
    ) -> std::result::Result<Self, E> {
        let mut values = Vec::with_capacity(BUFFERING);
        let mut index = FrameIndex::FIRST;
        for _ in 0..BUFFERING {
            values.push(f(index)?);
            index.advance();
        }
        match values.try_into() {
            Ok(array) => Ok(Self(array)),
            Err(_) => unreachable!("exactly BUFFERING values were pushed"),
        }
    }

    /// Iterate over all slots.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }

    /// Iterate mutably over all slots.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.0.iter_mut()
    }
}

impl<T> Index<FrameIndex> for PerFrame<T> {
    type Output = T;

    fn index(&self, index: FrameIndex) -> &T {
        &self.0[index.get()]
    }
}

impl<T> IndexMut<FrameIndex> for PerFrame<T> {
    fn index_mut(&mut self, index: FrameIndex) -> &mut T {
        &mut self.0[index.get()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_alternates_strictly() {
        let mut index = FrameIndex::FIRST;
        let seen: Vec<usize> = (0..8)
            .map(|_| {
                let value = index.get();
                index.advance();
                value
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn next_does_not_mutate() {
        let index = FrameIndex::FIRST;
        assert_eq!(index.next().get(), 1);
        assert_eq!(index.get(), 0);
        assert_eq!(index.next().next(), index);
    }

    #[test]
    fn per_frame_indexing() {
        let mut values = PerFrame::from_fn(|i| i.get() * 10);
        let second = FrameIndex::FIRST.next();
        assert_eq!(values[FrameIndex::FIRST], 0);
        assert_eq!(values[second], 10);
        values[second] += 1;
        assert_eq!(values.iter().copied().collect::<Vec<_>>(), vec![0, 11]);
    }

    #[test]
    fn per_frame_fallible_construction_stops_on_error() {
        let mut calls = 0;
        let result: Result<PerFrame<u32>, &str> = PerFrame::try_from_fn(|i| {
            calls += 1;
            if i.get() == 0 {
                Err("boom")
            } else {
                Ok(1)
            }
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
