//! # Syscall Dispatcher
//!
//! Stateless router from a syscall number and four word-sized arguments to
//! a handler operating on an explicit [`GuestContext`]. Handlers follow the
//! negative-errno convention: every return is a 32-bit signed value,
//! non-negative on success (counts, ids, addresses), `-errno` on failure.
//!
//! The dispatch table is a registered map from number to handler function,
//! built once in [`SyscallDispatcher::new`]; adding a syscall is an
//! additive [`register`](SyscallDispatcher::register) call, not an edit to
//! a monolithic switch. Unrecognized numbers degrade to `-ENOSYS`.
//!
//! No handler blocks. Operations that would block in a real kernel —
//! futex waits, socket I/O, epoll waits — complete immediately with
//! ABI-correct results (see the crate docs for the model).

use crate::abi::*;
use crate::arena::{ArenaError, MemoryArena};
use crate::console::ConsoleSink;
use crate::engine::ExecutionEngine;
use crate::tables::{
    DescriptorEntry, DescriptorKind, DescriptorTable, EpollTable, FutexTable, SocketState,
    SocketTable, TableError, ThreadTable,
};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Longest guest path string a handler will read.
const MAX_PATH_LEN: usize = 255;

// =============================================================================
// Guest Context
// =============================================================================

/// Mutable view of one guest's state, borrowed for the duration of a single
/// dispatch. All tables belong to one `GuestInstance`; dispatch is never
/// reentrant, so no locking is involved.
pub struct GuestContext<'a> {
    pub descriptors: &'a mut DescriptorTable,
    pub threads: &'a mut ThreadTable,
    pub futexes: &'a mut FutexTable,
    pub sockets: &'a mut SocketTable,
    pub epolls: &'a mut EpollTable,
    pub arena: &'a mut MemoryArena,
    pub console: &'a mut ConsoleSink,
    pub engine: &'a mut dyn ExecutionEngine,
    /// Tid of the thread issuing the syscall.
    pub current_tid: u32,
    /// Pid of the emulated process.
    pub current_pid: u32,
    /// Set by `exit`/`exit_group`; the owner transitions the lifecycle.
    pub exit_status: Option<i32>,
}

impl GuestContext<'_> {
    /// Reads a NUL-terminated guest string, bounded by [`MAX_PATH_LEN`].
    fn read_guest_cstr(&self, addr: u32) -> Option<String> {
        let memory = self.engine.memory();
        let start = addr as usize;
        if start >= memory.len() {
            return None;
        }
        let window = &memory[start..memory.len().min(start + MAX_PATH_LEN)];
        let end = window.iter().position(|&b| b == 0).unwrap_or(window.len());
        Some(String::from_utf8_lossy(&window[..end]).into_owned())
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Handler signature: guest state plus the four raw argument words.
pub type Handler = fn(&mut GuestContext<'_>, [u32; 4]) -> i32;

/// Registered map from syscall number to handler.
pub struct SyscallDispatcher {
    handlers: HashMap<u32, Handler>,
}

impl SyscallDispatcher {
    /// Builds the dispatcher with every implemented syscall registered.
    pub fn new() -> Self {
        let mut d = Self {
            handlers: HashMap::new(),
        };

        // Lifecycle
        d.register(SYS_EXIT, sys_exit);
        d.register(SYS_EXIT_GROUP, sys_exit);
        d.register(SYS_FORK, sys_fork);
        d.register(SYS_CLONE, sys_clone);
        d.register(SYS_EXECVE, sys_execve);
        d.register(SYS_GETPID, sys_getpid);
        d.register(SYS_GETTID, sys_gettid);
        d.register(SYS_GETPPID, sys_getppid);

        // I/O
        d.register(SYS_READ, sys_read);
        d.register(SYS_WRITE, sys_write);
        d.register(SYS_OPEN, sys_open);
        d.register(SYS_OPENAT, sys_openat);
        d.register(SYS_CLOSE, sys_close);

        // Process wait
        d.register(SYS_WAIT4, sys_wait4);

        // Memory
        d.register(SYS_BRK, sys_brk);
        d.register(SYS_MMAP2, sys_mmap2);
        d.register(SYS_MUNMAP, sys_munmap);

        // Synchronization
        d.register(SYS_FUTEX, sys_futex);

        // Descriptor duplication / control
        d.register(SYS_DUP, sys_dup);
        d.register(SYS_DUP3, sys_dup3);
        d.register(SYS_PIPE2, sys_pipe2);
        d.register(SYS_FCNTL64, sys_fcntl);

        // Sockets
        d.register(SYS_SOCKET, sys_socket);
        d.register(SYS_BIND, sys_bind);
        d.register(SYS_LISTEN, sys_listen);
        d.register(SYS_CONNECT, sys_connect);
        d.register(SYS_ACCEPT, sys_accept);
        d.register(SYS_SENDTO, sys_sendto);
        d.register(SYS_RECVFROM, sys_recvfrom);

        // Epoll and event descriptors
        d.register(SYS_EPOLL_CREATE1, sys_epoll_create1);
        d.register(SYS_EPOLL_CTL, sys_epoll_ctl);
        d.register(SYS_EPOLL_WAIT, sys_epoll_wait);
        d.register(SYS_EVENTFD2, sys_eventfd2);
        d.register(SYS_TIMERFD_CREATE, sys_timerfd_create);
        d.register(SYS_SIGNALFD4, sys_signalfd4);
        d.register(SYS_MEMFD_CREATE, sys_memfd_create);

        d
    }

    /// Registers (or replaces) the handler for a syscall number.
    pub fn register(&mut self, number: u32, handler: Handler) {
        self.handlers.insert(number, handler);
    }

    /// Routes one syscall. Unknown numbers return `-ENOSYS`.
    pub fn dispatch(&self, ctx: &mut GuestContext<'_>, number: u32, args: [u32; 4]) -> i32 {
        match self.handlers.get(&number) {
            Some(handler) => {
                let ret = handler(ctx, args);
                trace!("syscall {} {:x?} -> {}", number, args, ret);
                ret
            }
            None => {
                debug!("unimplemented syscall {}", number);
                -ENOSYS
            }
        }
    }

    /// Number of registered syscalls.
    pub fn registered_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for SyscallDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Errno Mapping Helpers
// =============================================================================

/// Clamps a byte count into the non-negative i32 return range.
fn count_ret(count: u32) -> i32 {
    count.min(i32::MAX as u32) as i32
}

fn table_errno(err: TableError) -> i32 {
    match err {
        TableError::Exhausted => -EMFILE,
        TableError::NotFound | TableError::Protected => -EBADF,
    }
}

fn arena_errno(err: ArenaError) -> i32 {
    match err {
        ArenaError::OutOfRange => -ENOMEM,
        ArenaError::InvalidArgument => -EINVAL,
    }
}

// =============================================================================
// Lifecycle Handlers
// =============================================================================

fn sys_exit(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    ctx.exit_status = Some(args[0] as i32);
    0
}

fn sys_fork(ctx: &mut GuestContext<'_>, _args: [u32; 4]) -> i32 {
    match ctx.threads.spawn(ctx.current_pid, ctx.current_tid, 0) {
        Ok(tid) => tid as i32,
        Err(_) => -EAGAIN,
    }
}

fn sys_clone(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    // args: flags, child_stack, ptid, ctid. Flags are accepted uninspected.
    match ctx.threads.spawn(ctx.current_pid, ctx.current_tid, args[1]) {
        Ok(tid) => tid as i32,
        Err(_) => -EAGAIN,
    }
}

/// Accepted without replacing the running image.
fn sys_execve(_ctx: &mut GuestContext<'_>, _args: [u32; 4]) -> i32 {
    0
}

fn sys_getpid(ctx: &mut GuestContext<'_>, _args: [u32; 4]) -> i32 {
    ctx.current_pid as i32
}

fn sys_gettid(ctx: &mut GuestContext<'_>, _args: [u32; 4]) -> i32 {
    ctx.current_tid as i32
}

fn sys_getppid(ctx: &mut GuestContext<'_>, _args: [u32; 4]) -> i32 {
    ctx.threads
        .get(ctx.current_tid)
        .map_or(0, |t| t.parent_tid as i32)
}

// =============================================================================
// I/O Handlers
// =============================================================================

fn sys_read(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let [fd, buf, count, _] = args;
    let Some(entry) = ctx.descriptors.get(fd as usize) else {
        return -EBADF;
    };
    if count == 0 {
        return 0;
    }
    if ctx.engine.read_memory(buf, count).is_none() {
        return -EFAULT;
    }
    match entry.kind {
        // Standard input is always at EOF.
        DescriptorKind::Stream => 0,
        DescriptorKind::File => {
            let Some(entry) = ctx.descriptors.get_mut(fd as usize) else {
                return -EBADF;
            };
            let available = entry.size.saturating_sub(entry.position);
            let n = u64::from(count).min(available);
            entry.position += n;
            // No file contents are persisted; the window reads as zeros.
            let zeros = vec![0u8; n as usize];
            ctx.engine.write_memory(buf, &zeros);
            count_ret(n as u32)
        }
        // Pipes, sockets, and event descriptors have nothing queued.
        _ => 0,
    }
}

fn sys_write(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let [fd, buf, count, _] = args;
    if ctx.descriptors.get(fd as usize).is_none() {
        return -EBADF;
    }
    if count == 0 {
        return 0;
    }
    let Some(payload) = ctx.engine.read_memory(buf, count) else {
        return -EFAULT;
    };

    if fd == STDOUT_FD || fd == STDERR_FD {
        // The guest sees the full count even when the sink truncates.
        let payload = payload.to_vec();
        ctx.console.write(&payload);
        return count_ret(count);
    }

    // Bytes are not persisted; only the cursor and size advance.
    let Some(entry) = ctx.descriptors.get_mut(fd as usize) else {
        return -EBADF;
    };
    entry.position += u64::from(count);
    if entry.kind == DescriptorKind::File {
        entry.size = entry.size.max(entry.position);
    }
    count_ret(count)
}

fn sys_open(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let [path_ptr, flags, _mode, _] = args;
    open_common(ctx, path_ptr, flags)
}

fn sys_openat(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    // args: dirfd, path, flags, mode. dirfd is accepted uninspected; guest
    // paths here are absolute names, not real filesystem lookups.
    let [_dirfd, path_ptr, flags, _] = args;
    open_common(ctx, path_ptr, flags)
}

fn open_common(ctx: &mut GuestContext<'_>, path_ptr: u32, flags: u32) -> i32 {
    let Some(path) = ctx.read_guest_cstr(path_ptr) else {
        return -EFAULT;
    };
    match ctx.descriptors.allocate(DescriptorEntry::file(path, flags)) {
        Ok(fd) => fd as i32,
        Err(e) => table_errno(e),
    }
}

fn sys_close(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let fd = args[0] as usize;
    match ctx.descriptors.release(fd) {
        Ok(entry) => {
            // Closing a socket descriptor frees its socket table entry too.
            if entry.kind == DescriptorKind::Socket {
                if let Some(index) = entry.link {
                    let _ = ctx.sockets.release(index);
                }
            }
            0
        }
        Err(_) => -EBADF,
    }
}

// =============================================================================
// Process Wait
// =============================================================================

fn sys_wait4(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    // args: pid, status_ptr, options, rusage. Status and rusage are not
    // written back; no exit codes are modeled for bookkeeping threads.
    let pid = args[0] as i32;
    match ctx.threads.reap(ctx.current_tid, pid) {
        Some(tid) => tid as i32,
        None => -ECHILD,
    }
}

// =============================================================================
// Memory Handlers
// =============================================================================

fn sys_brk(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let target = args[0];
    if target == 0 {
        return ctx.arena.query_break() as i32;
    }
    match ctx.arena.set_break(target) {
        Ok(new_break) => new_break as i32,
        Err(e) => arena_errno(e),
    }
}

fn sys_mmap2(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    // args: addr_hint, length, prot, flags. Protection bits are accepted
    // and ignored; no page protection exists in the flat memory model.
    let [hint, length, _prot, _flags] = args;
    match ctx.arena.map(length, hint) {
        Ok(addr) => addr as i32,
        Err(e) => arena_errno(e),
    }
}

fn sys_munmap(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let [addr, length, _, _] = args;
    match ctx.arena.unmap(addr, length) {
        Ok(()) => 0,
        Err(e) => arena_errno(e),
    }
}

// =============================================================================
// Synchronization
// =============================================================================

fn sys_futex(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let [uaddr, op, _val, _timeout] = args;
    match op & FUTEX_CMD_MASK {
        FUTEX_WAIT | FUTEX_WAIT_BITSET => {
            // Nothing blocks: the wait is recorded and completes at once.
            if let Some(futex) = ctx.futexes.touch(uaddr) {
                futex.waiters += 1;
            }
            0
        }
        FUTEX_WAKE | FUTEX_WAKE_BITSET => {
            if let Some(futex) = ctx.futexes.touch(uaddr) {
                futex.waiters = futex.waiters.saturating_sub(1);
            }
            // One waiter is reported woken whether or not any waited.
            1
        }
        FUTEX_REQUEUE | FUTEX_CMP_REQUEUE => 0,
        _ => -ENOSYS,
    }
}

// =============================================================================
// Descriptor Duplication / Control
// =============================================================================

fn sys_dup(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let fd = args[0] as usize;
    let Some(entry) = ctx.descriptors.get(fd).cloned() else {
        return -EBADF;
    };
    match ctx.descriptors.allocate(entry) {
        Ok(new_fd) => new_fd as i32,
        Err(e) => table_errno(e),
    }
}

fn sys_dup3(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let [oldfd, newfd, _flags, _] = args;
    if oldfd == newfd {
        return -EINVAL;
    }
    let Some(entry) = ctx.descriptors.get(oldfd as usize).cloned() else {
        return -EBADF;
    };
    match ctx.descriptors.place_at(newfd as usize, entry) {
        Ok(()) => newfd as i32,
        Err(TableError::Exhausted) => -EMFILE,
        Err(_) => -EBADF,
    }
}

fn sys_pipe2(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let [pipefd_ptr, flags, _, _] = args;
    if ctx.engine.read_memory(pipefd_ptr, 8).is_none() {
        return -EFAULT;
    }

    // Both ends or neither: the first allocation is rolled back when the
    // second fails.
    let read_end = match ctx
        .descriptors
        .allocate(DescriptorEntry::of_kind(DescriptorKind::Pipe, flags, "pipe:[r]"))
    {
        Ok(fd) => fd,
        Err(e) => return table_errno(e),
    };
    let write_end = match ctx
        .descriptors
        .allocate(DescriptorEntry::of_kind(DescriptorKind::Pipe, flags, "pipe:[w]"))
    {
        Ok(fd) => fd,
        Err(e) => {
            let _ = ctx.descriptors.release(read_end);
            return table_errno(e);
        }
    };
    if let Some(r) = ctx.descriptors.get_mut(read_end) {
        r.link = Some(write_end);
    }
    if let Some(w) = ctx.descriptors.get_mut(write_end) {
        w.link = Some(read_end);
    }

    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&(read_end as u32).to_le_bytes());
    out[4..].copy_from_slice(&(write_end as u32).to_le_bytes());
    ctx.engine.write_memory(pipefd_ptr, &out);
    0
}

fn sys_fcntl(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let [fd, cmd, arg, _] = args;
    let Some(entry) = ctx.descriptors.get(fd as usize).cloned() else {
        return -EBADF;
    };
    match cmd {
        F_DUPFD => match ctx.descriptors.allocate_from(arg as usize, entry) {
            Ok(new_fd) => new_fd as i32,
            Err(e) => table_errno(e),
        },
        F_GETFL => entry.flags as i32,
        F_SETFL => {
            if let Some(e) = ctx.descriptors.get_mut(fd as usize) {
                e.flags = arg;
            }
            0
        }
        F_GETFD | F_SETFD => 0,
        // Unrecognized commands succeed for forward compatibility.
        _ => 0,
    }
}

// =============================================================================
// Socket Handlers
// =============================================================================
//
// No transport exists behind these: connection-oriented operations update
// bookkeeping state and return success so protocol code above them keeps
// running.
// =============================================================================

fn sys_socket(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let [domain, stype, protocol, _] = args;
    let index = match ctx.sockets.allocate(domain, stype, protocol) {
        Ok(i) => i,
        Err(_) => return -EMFILE,
    };
    let mut entry =
        DescriptorEntry::of_kind(DescriptorKind::Socket, 0, format!("socket:[{index}]"));
    entry.link = Some(index);
    match ctx.descriptors.allocate(entry) {
        Ok(fd) => fd as i32,
        Err(e) => {
            let _ = ctx.sockets.release(index);
            table_errno(e)
        }
    }
}

/// Looks up the socket table index behind a descriptor.
fn socket_index(ctx: &GuestContext<'_>, fd: u32) -> Option<usize> {
    let entry = ctx.descriptors.get(fd as usize)?;
    if entry.kind != DescriptorKind::Socket {
        return None;
    }
    entry.link
}

fn sys_bind(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let Some(index) = socket_index(ctx, args[0]) else {
        return -EBADF;
    };
    if let Some(socket) = ctx.sockets.get_mut(index) {
        socket.state = SocketState::Bound;
    }
    0
}

fn sys_listen(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let Some(index) = socket_index(ctx, args[0]) else {
        return -EBADF;
    };
    if let Some(socket) = ctx.sockets.get_mut(index) {
        socket.state = SocketState::Listening;
    }
    0
}

fn sys_connect(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let Some(index) = socket_index(ctx, args[0]) else {
        return -EBADF;
    };
    if let Some(socket) = ctx.sockets.get_mut(index) {
        socket.state = SocketState::Connected;
    }
    0
}

fn sys_accept(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let Some(listening) = socket_index(ctx, args[0]) else {
        return -EBADF;
    };
    let Some((domain, stype, protocol)) = ctx
        .sockets
        .get(listening)
        .map(|s| (s.domain, s.stype, s.protocol))
    else {
        return -EBADF;
    };
    // The accepted connection gets its own socket entry and descriptor.
    let index = match ctx.sockets.allocate(domain, stype, protocol) {
        Ok(i) => i,
        Err(_) => return -EMFILE,
    };
    if let Some(socket) = ctx.sockets.get_mut(index) {
        socket.state = SocketState::Connected;
    }
    let mut entry =
        DescriptorEntry::of_kind(DescriptorKind::Socket, 0, format!("socket:[{index}]"));
    entry.link = Some(index);
    match ctx.descriptors.allocate(entry) {
        Ok(fd) => fd as i32,
        Err(e) => {
            let _ = ctx.sockets.release(index);
            table_errno(e)
        }
    }
}

fn sys_sendto(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let [fd, _buf, count, _] = args;
    if socket_index(ctx, fd).is_none() {
        return -EBADF;
    }
    // Bytes are accepted and dropped; the claimed count is ABI-correct.
    count_ret(count)
}

fn sys_recvfrom(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    if socket_index(ctx, args[0]).is_none() {
        return -EBADF;
    }
    // Nothing is ever queued to receive.
    0
}

// =============================================================================
// Epoll and Event Descriptors
// =============================================================================

fn sys_epoll_create1(ctx: &mut GuestContext<'_>, _args: [u32; 4]) -> i32 {
    match ctx.epolls.allocate() {
        Ok(index) => index as i32,
        Err(_) => -EMFILE,
    }
}

fn sys_epoll_ctl(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let [epfd, op, fd, _event_ptr] = args;
    match op {
        EPOLL_CTL_ADD | EPOLL_CTL_MOD => match ctx.epolls.watch(epfd as usize, fd) {
            Ok(()) => 0,
            Err(TableError::Exhausted) => -ENOMEM,
            Err(_) => -EBADF,
        },
        EPOLL_CTL_DEL => match ctx.epolls.unwatch(epfd as usize, fd) {
            Ok(()) => 0,
            Err(_) => -EBADF,
        },
        _ => -EINVAL,
    }
}

fn sys_epoll_wait(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    // args: epfd, events_ptr, maxevents, timeout. The timeout is accepted
    // and ignored; no descriptor is ever ready.
    if ctx.epolls.get(args[0] as usize).is_none() {
        return -EBADF;
    }
    0
}

fn sys_eventfd2(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let [_initval, flags, _, _] = args;
    match ctx
        .descriptors
        .allocate(DescriptorEntry::of_kind(DescriptorKind::EventFd, flags, "anon_inode:[eventfd]"))
    {
        Ok(fd) => fd as i32,
        Err(e) => table_errno(e),
    }
}

fn sys_timerfd_create(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let [_clockid, flags, _, _] = args;
    match ctx
        .descriptors
        .allocate(DescriptorEntry::of_kind(DescriptorKind::TimerFd, flags, "anon_inode:[timerfd]"))
    {
        Ok(fd) => fd as i32,
        Err(e) => table_errno(e),
    }
}

fn sys_signalfd4(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let [_fd, _mask_ptr, _sizemask, flags] = args;
    match ctx
        .descriptors
        .allocate(DescriptorEntry::of_kind(DescriptorKind::SignalFd, flags, "anon_inode:[signalfd]"))
    {
        Ok(fd) => fd as i32,
        Err(e) => table_errno(e),
    }
}

fn sys_memfd_create(ctx: &mut GuestContext<'_>, args: [u32; 4]) -> i32 {
    let [name_ptr, flags, _, _] = args;
    let Some(name) = ctx.read_guest_cstr(name_ptr) else {
        return -EFAULT;
    };
    let entry = DescriptorEntry::of_kind(DescriptorKind::MemFd, flags, format!("memfd:{name}"));
    match ctx.descriptors.allocate(entry) {
        Ok(fd) => fd as i32,
        Err(e) => table_errno(e),
    }
}
