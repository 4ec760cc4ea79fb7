//! # Guest Resource Tables
//!
//! Fixed-capacity bookkeeping tables behind the syscall surface: descriptors,
//! threads, futexes, sockets, and epoll sets. Each table wraps the same
//! [`SlotArena`] allocator, so the linear first-free scan and its invariants
//! live in one audited place.
//!
//! Capacities are small (see [`crate::constants`]), which keeps the scan
//! cheap and the exhaustion behavior guest-visible and testable: a full
//! table is how the guest observes `EMFILE`/`EAGAIN`.
//!
//! All entries are bookkeeping only. A [`ThreadEntry`] does not execute;
//! a [`SocketEntry`] never touches a real network.

use crate::constants::{
    MAX_DESCRIPTORS, MAX_EPOLL_SETS, MAX_EPOLL_WATCHES, MAX_FUTEXES, MAX_SOCKETS, MAX_THREADS,
    RESERVED_DESCRIPTORS,
};
use tracing::{debug, warn};

// =============================================================================
// Table Errors
// =============================================================================

/// Failure modes shared by all tables.
///
/// The dispatcher maps these to errno: `Exhausted` becomes `EMFILE` or
/// `EAGAIN` depending on the table, `NotFound` and `Protected` become
/// `EBADF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// No free slot remains.
    Exhausted,
    /// Index is out of range or not in use.
    NotFound,
    /// Index is a reserved standard stream and can never be released.
    Protected,
}

// =============================================================================
// Slot Arena
// =============================================================================

/// Fixed-capacity slot store with linear first-free allocation.
///
/// Indices are stable for the lifetime of an entry and reusable after
/// release. Capacity never grows.
#[derive(Debug)]
pub struct SlotArena<T> {
    slots: Vec<Option<T>>,
}

impl<T> SlotArena<T> {
    /// Creates an arena with `capacity` empty slots.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    /// Places `value` in the first free slot at or after `start`.
    pub fn allocate_from(&mut self, start: usize, value: T) -> Result<usize, TableError> {
        match self.slots[start..].iter().position(Option::is_none) {
            Some(rel) => {
                let index = start + rel;
                self.slots[index] = Some(value);
                Ok(index)
            }
            None => Err(TableError::Exhausted),
        }
    }

    /// Places `value` in the first free slot.
    pub fn allocate(&mut self, value: T) -> Result<usize, TableError> {
        self.allocate_from(0, value)
    }

    /// Stores `value` at a specific free slot. Fails if occupied.
    pub fn insert_at(&mut self, index: usize, value: T) -> Result<(), TableError> {
        match self.slots.get_mut(index) {
            Some(slot @ None) => {
                *slot = Some(value);
                Ok(())
            }
            _ => Err(TableError::NotFound),
        }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Frees a slot, returning its entry.
    pub fn release(&mut self, index: usize) -> Result<T, TableError> {
        self.slots
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(TableError::NotFound)
    }

    /// Iterates over occupied slots with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|v| (i, v)))
    }

    /// Iterates mutably over occupied slots with their indices.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|v| (i, v)))
    }

    /// Number of occupied slots.
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

// =============================================================================
// Descriptor Table
// =============================================================================

/// What a descriptor refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    /// One of the three standard streams.
    Stream,
    /// Regular file opened by path.
    File,
    /// One end of a pipe.
    Pipe,
    /// Socket (entry index in the socket table stored in `link`).
    Socket,
    /// eventfd counter descriptor.
    EventFd,
    /// timerfd descriptor.
    TimerFd,
    /// signalfd descriptor.
    SignalFd,
    /// Anonymous memory file.
    MemFd,
}

/// One open descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorEntry {
    pub kind: DescriptorKind,
    /// Open flags as passed by the guest (O_CLOEXEC etc., uninterpreted).
    pub flags: u32,
    /// Read/write cursor.
    pub position: u64,
    /// Declared size for files; 0 for non-file kinds.
    pub size: u64,
    /// Path or synthetic name for diagnostics.
    pub path: String,
    /// Cross-table link: socket index for `Socket`, peer fd for `Pipe`.
    pub link: Option<usize>,
}

impl DescriptorEntry {
    /// Entry for a freshly opened regular file.
    pub fn file(path: impl Into<String>, flags: u32) -> Self {
        Self {
            kind: DescriptorKind::File,
            flags,
            position: 0,
            size: 0,
            path: path.into(),
            link: None,
        }
    }

    /// Entry of an arbitrary non-file kind.
    pub fn of_kind(kind: DescriptorKind, flags: u32, path: impl Into<String>) -> Self {
        Self {
            kind,
            flags,
            position: 0,
            size: 0,
            path: path.into(),
            link: None,
        }
    }
}

/// Per-guest descriptor table.
///
/// Slots 0/1/2 are the standard streams: pre-populated at construction,
/// excluded from allocation, and protected from release for the lifetime
/// of the guest.
#[derive(Debug)]
pub struct DescriptorTable {
    arena: SlotArena<DescriptorEntry>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        let mut arena = SlotArena::with_capacity(MAX_DESCRIPTORS);
        for (fd, name) in ["/dev/stdin", "/dev/stdout", "/dev/stderr"]
            .iter()
            .enumerate()
        {
            // Capacity is MAX_DESCRIPTORS (> 3) and the arena is empty.
            let _ = arena.insert_at(fd, DescriptorEntry::of_kind(DescriptorKind::Stream, 0, *name));
        }
        Self { arena }
    }

    /// Allocates the lowest free descriptor at or above the reserved range.
    pub fn allocate(&mut self, entry: DescriptorEntry) -> Result<usize, TableError> {
        let result = self.arena.allocate_from(RESERVED_DESCRIPTORS, entry);
        if result.is_err() {
            warn!("descriptor table exhausted ({} slots)", MAX_DESCRIPTORS);
        }
        result
    }

    /// Allocates the lowest free descriptor at or above `min`, for
    /// `F_DUPFD`-style requests. `min` below the reserved range is clamped.
    pub fn allocate_from(
        &mut self,
        min: usize,
        entry: DescriptorEntry,
    ) -> Result<usize, TableError> {
        let start = min.max(RESERVED_DESCRIPTORS);
        if start >= self.arena.capacity() {
            return Err(TableError::Exhausted);
        }
        self.arena.allocate_from(start, entry)
    }

    /// Places an entry at an exact descriptor, releasing any current
    /// occupant first (dup3 semantics). Reserved targets are rejected.
    pub fn place_at(&mut self, fd: usize, entry: DescriptorEntry) -> Result<(), TableError> {
        if fd < RESERVED_DESCRIPTORS {
            return Err(TableError::Protected);
        }
        if fd >= self.arena.capacity() {
            return Err(TableError::NotFound);
        }
        let _ = self.arena.release(fd);
        self.arena.insert_at(fd, entry)
    }

    pub fn get(&self, fd: usize) -> Option<&DescriptorEntry> {
        self.arena.get(fd)
    }

    pub fn get_mut(&mut self, fd: usize) -> Option<&mut DescriptorEntry> {
        self.arena.get_mut(fd)
    }

    /// Releases a descriptor. The standard streams always fail `Protected`.
    pub fn release(&mut self, fd: usize) -> Result<DescriptorEntry, TableError> {
        if fd < RESERVED_DESCRIPTORS {
            return Err(TableError::Protected);
        }
        self.arena.release(fd)
    }

    /// Open descriptors, including the standard streams.
    pub fn open_count(&self) -> usize {
        self.arena.in_use()
    }
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Thread Table
// =============================================================================

/// One bookkeeping thread entry.
#[derive(Debug, Clone)]
pub struct ThreadEntry {
    pub tid: u32,
    pub pid: u32,
    pub parent_tid: u32,
    pub stack_pointer: u32,
}

/// Per-guest thread table.
///
/// Thread ids are monotonically increasing for the lifetime of the guest
/// and never reused, even after a thread is reaped.
#[derive(Debug)]
pub struct ThreadTable {
    arena: SlotArena<ThreadEntry>,
    next_tid: u32,
}

impl ThreadTable {
    pub fn new() -> Self {
        Self {
            arena: SlotArena::with_capacity(MAX_THREADS),
            next_tid: 1,
        }
    }

    /// Records a new thread and returns its tid.
    pub fn spawn(
        &mut self,
        pid: u32,
        parent_tid: u32,
        stack_pointer: u32,
    ) -> Result<u32, TableError> {
        let tid = self.next_tid;
        let entry = ThreadEntry {
            tid,
            pid,
            parent_tid,
            stack_pointer,
        };
        match self.arena.allocate(entry) {
            Ok(_) => {
                self.next_tid += 1;
                debug!("spawned thread tid={} parent={}", tid, parent_tid);
                Ok(tid)
            }
            Err(e) => {
                warn!("thread table exhausted ({} slots)", MAX_THREADS);
                Err(e)
            }
        }
    }

    /// Reaps one child of `parent_tid`, waitpid-style.
    ///
    /// `pid < 0` matches any child; otherwise only the child with that
    /// exact tid. The matched entry is deactivated and its tid returned.
    pub fn reap(&mut self, parent_tid: u32, pid: i32) -> Option<u32> {
        let index = self
            .arena
            .iter()
            .find(|(_, t)| {
                t.parent_tid == parent_tid && (pid < 0 || t.tid == pid as u32)
            })
            .map(|(i, _)| i)?;
        self.arena.release(index).ok().map(|t| t.tid)
    }

    pub fn get(&self, tid: u32) -> Option<&ThreadEntry> {
        self.arena.iter().map(|(_, t)| t).find(|t| t.tid == tid)
    }

    /// Active (unreaped) thread entries.
    pub fn active_count(&self) -> usize {
        self.arena.in_use()
    }

    /// The tid the next spawn will assign.
    pub fn next_tid(&self) -> u32 {
        self.next_tid
    }
}

impl Default for ThreadTable {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Futex Table
// =============================================================================

/// One tracked futex word.
#[derive(Debug, Clone)]
pub struct FutexEntry {
    /// Guest address of the futex word.
    pub addr: u32,
    /// Waiters recorded by WAIT ops. Bookkeeping only; nothing blocks.
    pub waiters: u32,
}

/// Per-guest futex table.
#[derive(Debug)]
pub struct FutexTable {
    arena: SlotArena<FutexEntry>,
}

impl FutexTable {
    pub fn new() -> Self {
        Self {
            arena: SlotArena::with_capacity(MAX_FUTEXES),
        }
    }

    /// Finds the entry for `addr`, creating one if the table has room.
    ///
    /// Returns `None` only when the address is new and the table is full;
    /// the dispatcher treats that as a non-event since waits never block.
    pub fn touch(&mut self, addr: u32) -> Option<&mut FutexEntry> {
        let existing = self.arena.iter().find(|(_, f)| f.addr == addr).map(|(i, _)| i);
        let index = match existing {
            Some(i) => i,
            None => self.arena.allocate(FutexEntry { addr, waiters: 0 }).ok()?,
        };
        self.arena.get_mut(index)
    }

    pub fn get(&self, addr: u32) -> Option<&FutexEntry> {
        self.arena.iter().map(|(_, f)| f).find(|f| f.addr == addr)
    }

    pub fn tracked_count(&self) -> usize {
        self.arena.in_use()
    }
}

impl Default for FutexTable {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Socket Table
// =============================================================================

/// Connection bookkeeping state for a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Created,
    Bound,
    Listening,
    Connected,
}

/// One socket entry. No transport exists behind it.
#[derive(Debug, Clone)]
pub struct SocketEntry {
    pub domain: u32,
    pub stype: u32,
    pub protocol: u32,
    pub state: SocketState,
}

/// Per-guest socket table.
#[derive(Debug)]
pub struct SocketTable {
    arena: SlotArena<SocketEntry>,
}

impl SocketTable {
    pub fn new() -> Self {
        Self {
            arena: SlotArena::with_capacity(MAX_SOCKETS),
        }
    }

    pub fn allocate(
        &mut self,
        domain: u32,
        stype: u32,
        protocol: u32,
    ) -> Result<usize, TableError> {
        let result = self.arena.allocate(SocketEntry {
            domain,
            stype,
            protocol,
            state: SocketState::Created,
        });
        if result.is_err() {
            warn!("socket table exhausted ({} slots)", MAX_SOCKETS);
        }
        result
    }

    pub fn get(&self, index: usize) -> Option<&SocketEntry> {
        self.arena.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut SocketEntry> {
        self.arena.get_mut(index)
    }

    pub fn release(&mut self, index: usize) -> Result<SocketEntry, TableError> {
        self.arena.release(index)
    }

    pub fn open_count(&self) -> usize {
        self.arena.in_use()
    }
}

impl Default for SocketTable {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Epoll Table
// =============================================================================

/// One epoll set: a bounded list of watched descriptors.
#[derive(Debug, Clone, Default)]
pub struct EpollSet {
    pub watched: Vec<u32>,
}

/// Per-guest epoll table.
#[derive(Debug)]
pub struct EpollTable {
    arena: SlotArena<EpollSet>,
}

impl EpollTable {
    pub fn new() -> Self {
        Self {
            arena: SlotArena::with_capacity(MAX_EPOLL_SETS),
        }
    }

    pub fn allocate(&mut self) -> Result<usize, TableError> {
        self.arena.allocate(EpollSet::default())
    }

    /// Adds `fd` to a set's watch list. Idempotent for an fd already
    /// watched; fails `Exhausted` at the per-set watch bound.
    pub fn watch(&mut self, index: usize, fd: u32) -> Result<(), TableError> {
        let set = self.arena.get_mut(index).ok_or(TableError::NotFound)?;
        if set.watched.contains(&fd) {
            return Ok(());
        }
        if set.watched.len() >= MAX_EPOLL_WATCHES {
            return Err(TableError::Exhausted);
        }
        set.watched.push(fd);
        Ok(())
    }

    /// Removes `fd` from a set's watch list.
    pub fn unwatch(&mut self, index: usize, fd: u32) -> Result<(), TableError> {
        let set = self.arena.get_mut(index).ok_or(TableError::NotFound)?;
        match set.watched.iter().position(|&w| w == fd) {
            Some(pos) => {
                set.watched.swap_remove(pos);
                Ok(())
            }
            None => Err(TableError::NotFound),
        }
    }

    pub fn get(&self, index: usize) -> Option<&EpollSet> {
        self.arena.get(index)
    }

    pub fn release(&mut self, index: usize) -> Result<EpollSet, TableError> {
        self.arena.release(index)
    }

    pub fn open_count(&self) -> usize {
        self.arena.in_use()
    }
}

impl Default for EpollTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_arena_reuses_released_slots() {
        let mut arena: SlotArena<u32> = SlotArena::with_capacity(4);
        let a = arena.allocate(10).unwrap();
        let b = arena.allocate(20).unwrap();
        assert_eq!((a, b), (0, 1));
        arena.release(0).unwrap();
        assert_eq!(arena.allocate(30).unwrap(), 0);
    }

    #[test]
    fn descriptor_table_never_allocates_std_streams() {
        let mut table = DescriptorTable::new();
        let fd = table.allocate(DescriptorEntry::file("/a", 0)).unwrap();
        assert!(fd >= RESERVED_DESCRIPTORS);
    }

    #[test]
    fn std_streams_are_protected() {
        let mut table = DescriptorTable::new();
        for fd in 0..RESERVED_DESCRIPTORS {
            assert_eq!(table.release(fd), Err(TableError::Protected));
        }
    }

    #[test]
    fn thread_ids_are_monotonic_across_reaps() {
        let mut table = ThreadTable::new();
        let t1 = table.spawn(1, 0, 0).unwrap();
        let t2 = table.spawn(1, t1, 0).unwrap();
        assert!(t2 > t1);
        assert_eq!(table.reap(t1, -1), Some(t2));
        let t3 = table.spawn(1, t1, 0).unwrap();
        assert!(t3 > t2, "reaped tid must never be reused");
    }

    #[test]
    fn reap_respects_pid_filter() {
        let mut table = ThreadTable::new();
        let parent = table.spawn(1, 0, 0).unwrap();
        let child = table.spawn(1, parent, 0).unwrap();
        assert_eq!(table.reap(parent, (child + 1) as i32), None);
        assert_eq!(table.reap(parent, child as i32), Some(child));
    }

    #[test]
    fn futex_touch_is_idempotent_per_address() {
        let mut table = FutexTable::new();
        table.touch(0x1000).unwrap().waiters += 1;
        table.touch(0x1000).unwrap().waiters += 1;
        assert_eq!(table.tracked_count(), 1);
        assert_eq!(table.get(0x1000).unwrap().waiters, 2);
    }

    #[test]
    fn epoll_watch_bounds_and_idempotence() {
        let mut table = EpollTable::new();
        let set = table.allocate().unwrap();
        table.watch(set, 5).unwrap();
        table.watch(set, 5).unwrap();
        assert_eq!(table.get(set).unwrap().watched.len(), 1);
        for fd in 0..MAX_EPOLL_WATCHES as u32 {
            let _ = table.watch(set, 100 + fd);
        }
        assert_eq!(table.watch(set, 999), Err(TableError::Exhausted));
    }
}
