//! Console sink: bounded capture of guest stdout/stderr.
//!
//! Writes are append-only and truncate at capacity instead of failing,
//! so console-heavy guest code keeps making progress even when the host
//! has not drained the buffer.

use crate::constants::CONSOLE_CAPACITY;

/// Bounded append-only capture buffer.
#[derive(Debug)]
pub struct ConsoleSink {
    buffer: Vec<u8>,
    capacity: usize,
    truncated: u64,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::with_capacity(CONSOLE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::new(),
            capacity,
            truncated: 0,
        }
    }

    /// Appends as many bytes as fit and returns the count accepted.
    ///
    /// Never fails; a full buffer accepts 0.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let room = self.capacity - self.buffer.len();
        let accepted = bytes.len().min(room);
        self.buffer.extend_from_slice(&bytes[..accepted]);
        self.truncated += (bytes.len() - accepted) as u64;
        accepted
    }

    /// Accumulated raw bytes.
    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }

    /// Accumulated text, lossy on invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    /// Discards the accumulated bytes. Capacity is unchanged.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Drains the accumulated bytes, leaving the sink empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Bytes dropped to the capacity bound so far.
    pub fn truncated_bytes(&self) -> u64 {
        self.truncated
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}
