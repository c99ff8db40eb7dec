use crate::buffer::Buffer;

/// The direction of an async I/O task, also the key half of a job
/// registration `(fd, op)` (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Read,
    Write,
}

/// One READ or WRITE task per connection (spec.md §3: "Async I/O Task").
/// `active` tracks whether a `send`/`recv` is currently in flight, which is
/// how `send`/`recv` implement invariant 1 ("at most one task per
/// (connection, direction)") by rejecting an overlapping call rather than
/// silently clobbering the buffer (spec.md §9, resolved Open Question).
#[derive(Debug, Default)]
pub struct IoTask {
    pub buffer: Buffer,
    pub progress: usize,
    pub active: bool,
}

impl IoTask {
    pub fn reset_for_send(&mut self, data: &[u8]) {
        self.buffer.clear();
        self.buffer.resize(data.len());
        self.buffer.as_mut_slice().copy_from_slice(data);
        self.progress = 0;
        self.active = true;
    }

    /// Appends `size` bytes of room starting at the buffer's current
    /// `offset`, the READ task's append point (spec.md §4.3).
    pub fn reset_for_recv(&mut self, size: usize) {
        if !self.active {
            self.progress = 0;
        }
        self.buffer.grow(size);
        self.active = true;
    }
}

/// Outcome delivered to a recv completion callback.
#[derive(Debug)]
pub enum RecvOutcome {
    /// All requested bytes landed in the task buffer.
    Complete,
    /// The peer closed the connection (zero bytes pending on a readable fd).
    Eof,
    /// A hard read error (not `EAGAIN`, which just waits for the next
    /// readiness notification).
    Error(std::io::Error),
}

/// Outcome delivered to a send completion callback.
#[derive(Debug)]
pub enum SendOutcome {
    Complete,
    Error(std::io::Error),
}
