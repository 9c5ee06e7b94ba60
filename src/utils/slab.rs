/// A simple slab allocator.
///
/// A `Slab` stores values of type `T` in a contiguous array and hands
/// out small indices that are reused after removal. The event loop uses
/// these indices as demultiplexer tokens, so looking up the owner of a
/// ready descriptor is a single array access.
///
/// Internally, it keeps track of:
/// - occupied and vacant slots,
/// - a stack of free indices,
/// - the number of occupied slots.
pub(crate) struct Slab<T> {
    /// Storage; `None` marks a vacant slot.
    items: Vec<Option<T>>,
    /// Stack of free indices that can be reused.
    free: Vec<usize>,
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a new `Slab` with `size` pre-allocated vacant slots.
    pub(crate) fn new(size: usize) -> Self {
        let items = (0..size).map(|_| None).collect();
        let free = (0..size).rev().collect();

        Self {
            items,
            free,
            len: 0,
        }
    }

    /// Index that the next [`insert`](Self::insert) will use.
    pub(crate) fn vacant_key(&self) -> usize {
        self.free.last().copied().unwrap_or(self.items.len())
    }

    /// Inserts a value into the slab and returns its index.
    ///
    /// Freed slots are reused (most recently freed first); otherwise
    /// the slab grows exponentially.
    pub(crate) fn insert(&mut self, item: T) -> usize {
        let index = if let Some(i) = self.free.pop() {
            i
        } else {
            let len = self.items.len();
            let new_len = if len == 0 { 1 } else { 2 * len };

            self.items.extend((len..new_len).map(|_| None));
            self.free.extend(((len + 1)..new_len).rev());

            len
        };

        self.items[index] = Some(item);
        self.len += 1;

        index
    }

    /// Removes and returns the value stored at `index`, if any.
    ///
    /// The slot becomes free and may be reused by future insertions.
    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        let item = self.items.get_mut(index)?.take()?;

        self.free.push(index);
        self.len -= 1;

        Some(item)
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)?.as_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}
