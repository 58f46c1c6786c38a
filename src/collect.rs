use parking_lot::Mutex;

use crate::error::Error;

/// Gathers page items into their logical positions, whatever order the pages arrive in.
///
/// Meant to be shared by reference with a page consumer running on several workers.
#[derive(Debug)]
pub struct OffsetCollector<T> {
    slots: Mutex<Vec<Option<T>>>,
}

impl<T> Default for OffsetCollector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OffsetCollector<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Stores `items` at positions `offset..offset + items.len()`.
    ///
    /// Returns how many of those positions were already filled and got overwritten.
    pub fn place(&self, offset: usize, items: Vec<T>) -> Result<usize, Error> {
        let Some(end) = offset.checked_add(items.len()) else {
            return Err(Error::OffsetOverflow {
                offset,
                len: items.len(),
            });
        };
        let mut slots = self.slots.lock();
        if slots.len() < end {
            slots.resize_with(end, || None);
        }
        let mut overwritten = 0;
        for (slot, item) in slots[offset..end].iter_mut().zip(items) {
            if slot.replace(item).is_some() {
                overwritten += 1;
            }
        }
        Ok(overwritten)
    }

    /// Number of positions currently filled.
    pub fn len(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items in collection order. Positions no page covered are skipped.
    pub fn into_items(self) -> Vec<T> {
        self.slots.into_inner().into_iter().flatten().collect()
    }
}
