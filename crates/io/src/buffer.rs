//! C1: a growable byte buffer with an explicit `user_size` and a
//! consumer-controlled parse `offset`, matching spec.md §3/§4.1.

/// Whether `resize` is allowed to shrink the underlying allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShrinkPolicy {
    Shrinkable,
    NonShrinkable,
}

/// Invariant: `capacity() >= user_size()` always; `offset() <= user_size()`
/// always. `resize` on a `NonShrinkable` buffer never decreases capacity.
#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
    user_size: usize,
    offset: usize,
    policy: ShrinkPolicy,
}

impl Buffer {
    pub fn new(policy: ShrinkPolicy) -> Self {
        Self { data: Vec::new(), user_size: 0, offset: 0, policy }
    }

    pub fn with_capacity(cap: usize, policy: ShrinkPolicy) -> Self {
        Self { data: Vec::with_capacity(cap), user_size: 0, offset: 0, policy }
    }

    /// `realloc`: sets `user_size` to `new_size`, preserving
    /// `[0, min(old_user_size, new_size))` and clamping `offset`.
    pub fn resize(&mut self, new_size: usize) {
        if new_size > self.data.len() {
            self.data.resize(new_size, 0);
        } else if self.policy == ShrinkPolicy::Shrinkable {
            self.data.truncate(new_size);
            self.data.shrink_to_fit();
        }
        // NonShrinkable: keep the underlying allocation at its current
        // length/capacity even though user_size drops below it.
        self.user_size = new_size;
        if self.offset > self.user_size {
            self.offset = self.user_size;
        }
    }

    /// Grows `user_size` by `extra`, returning the start of the new region
    /// (the append point used by `recv` to write incoming bytes).
    pub fn grow(&mut self, extra: usize) -> usize {
        let start = self.user_size;
        self.resize(self.user_size + extra);
        start
    }

    /// `realloc(0)`, releasing payload storage regardless of shrink policy.
    pub fn clear(&mut self) {
        self.data.clear();
        self.data.shrink_to_fit();
        self.user_size = 0;
        self.offset = 0;
    }

    pub fn user_size(&self) -> usize {
        self.user_size
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset.min(self.user_size);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.user_size]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.user_size]
    }

    /// The unread tail, `[offset, user_size)`.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.offset..self.user_size]
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new(ShrinkPolicy::NonShrinkable)
    }
}
