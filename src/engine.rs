//! Execution engine seam.
//!
//! The instruction-executing virtual machine is an external collaborator:
//! this layer never interprets guest instructions itself. It consumes only
//! a flat addressable memory buffer and an execute/step entry point, both
//! behind the [`ExecutionEngine`] trait so tests can substitute a stub.

/// Outcome of one engine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// Engine executed and can continue.
    Continue,
    /// Guest raised a syscall; the caller should dispatch it.
    Syscall,
    /// Guest halted.
    Halted,
}

/// The instruction-executing virtual machine, as seen from this layer.
///
/// Implementations own a flat guest memory buffer. Addresses in syscall
/// arguments index directly into it; the emulation layer bounds-checks
/// every access and never assumes protection or paging.
pub trait ExecutionEngine {
    /// Read-only view of the flat guest memory.
    fn memory(&self) -> &[u8];

    /// Mutable view of the flat guest memory.
    fn memory_mut(&mut self) -> &mut [u8];

    /// Sets the address execution starts from.
    fn set_entry_point(&mut self, addr: u32);

    /// Executes until the next stopping condition.
    fn step(&mut self) -> StepResult;

    /// Releases engine-owned state during guest teardown.
    fn release(&mut self) {}

    /// Copies `bytes` into guest memory at `addr`.
    ///
    /// Returns the byte count copied, truncated at the end of memory.
    fn write_memory(&mut self, addr: u32, bytes: &[u8]) -> usize {
        let mem = self.memory_mut();
        let start = addr as usize;
        if start >= mem.len() {
            return 0;
        }
        let n = bytes.len().min(mem.len() - start);
        mem[start..start + n].copy_from_slice(&bytes[..n]);
        n
    }

    /// Borrows `len` bytes of guest memory at `addr`, or `None` when the
    /// range leaves the buffer.
    fn read_memory(&self, addr: u32, len: u32) -> Option<&[u8]> {
        let start = addr as usize;
        let end = start.checked_add(len as usize)?;
        self.memory().get(start..end)
    }
}

/// Inert engine for tests: a plain memory buffer that halts immediately.
#[derive(Debug)]
pub struct NullEngine {
    memory: Vec<u8>,
    entry_point: u32,
    released: bool,
}

impl NullEngine {
    pub fn new(memory_size: usize) -> Self {
        Self {
            memory: vec![0u8; memory_size],
            entry_point: 0,
            released: false,
        }
    }

    pub fn entry_point(&self) -> u32 {
        self.entry_point
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl ExecutionEngine for NullEngine {
    fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    fn set_entry_point(&mut self, addr: u32) {
        self.entry_point = addr;
    }

    fn step(&mut self) -> StepResult {
        StepResult::Halted
    }

    fn release(&mut self) {
        self.released = true;
        self.memory = Vec::new();
    }
}
