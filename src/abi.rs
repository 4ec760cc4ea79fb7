//! Guest ABI constants.
//!
//! Syscall numbers follow the 32-bit ARM EABI table the emulated runtime
//! targets: four word-sized arguments in, one signed word out, failures
//! reported as negative errno values. Only the numbers the dispatcher
//! implements are listed; everything else resolves to `-ENOSYS`.

// =============================================================================
// Errno Values (returned negated)
// =============================================================================

/// Bad file descriptor.
pub const EBADF: i32 = 9;
/// No child processes.
pub const ECHILD: i32 = 10;
/// Resource temporarily unavailable.
pub const EAGAIN: i32 = 11;
/// Out of memory.
pub const ENOMEM: i32 = 12;
/// Bad address (guest pointer outside engine memory).
pub const EFAULT: i32 = 14;
/// Invalid argument.
pub const EINVAL: i32 = 22;
/// Too many open files.
pub const EMFILE: i32 = 24;
/// Function not implemented.
pub const ENOSYS: i32 = 38;

// =============================================================================
// Syscall Numbers (ARM EABI)
// =============================================================================

pub const SYS_EXIT: u32 = 1;
pub const SYS_FORK: u32 = 2;
pub const SYS_READ: u32 = 3;
pub const SYS_WRITE: u32 = 4;
pub const SYS_OPEN: u32 = 5;
pub const SYS_CLOSE: u32 = 6;
pub const SYS_EXECVE: u32 = 11;
pub const SYS_GETPID: u32 = 20;
pub const SYS_DUP: u32 = 41;
pub const SYS_BRK: u32 = 45;
pub const SYS_GETPPID: u32 = 64;
pub const SYS_MUNMAP: u32 = 91;
pub const SYS_WAIT4: u32 = 114;
pub const SYS_CLONE: u32 = 120;
pub const SYS_MMAP2: u32 = 192;
pub const SYS_FCNTL64: u32 = 221;
pub const SYS_GETTID: u32 = 224;
pub const SYS_FUTEX: u32 = 240;
pub const SYS_EXIT_GROUP: u32 = 248;
pub const SYS_EPOLL_CTL: u32 = 251;
pub const SYS_EPOLL_WAIT: u32 = 252;
pub const SYS_SOCKET: u32 = 281;
pub const SYS_BIND: u32 = 282;
pub const SYS_CONNECT: u32 = 283;
pub const SYS_LISTEN: u32 = 284;
pub const SYS_ACCEPT: u32 = 285;
pub const SYS_SENDTO: u32 = 290;
pub const SYS_RECVFROM: u32 = 292;
pub const SYS_OPENAT: u32 = 322;
pub const SYS_TIMERFD_CREATE: u32 = 350;
pub const SYS_SIGNALFD4: u32 = 355;
pub const SYS_EVENTFD2: u32 = 356;
pub const SYS_EPOLL_CREATE1: u32 = 357;
pub const SYS_DUP3: u32 = 358;
pub const SYS_PIPE2: u32 = 359;
pub const SYS_MEMFD_CREATE: u32 = 385;

// =============================================================================
// Futex Operations
// =============================================================================
//
// The private flag (128) and clock-realtime flag (256) are masked off
// before matching; the dispatcher treats private and shared futexes alike.
// =============================================================================

pub const FUTEX_WAIT: u32 = 0;
pub const FUTEX_WAKE: u32 = 1;
pub const FUTEX_REQUEUE: u32 = 3;
pub const FUTEX_CMP_REQUEUE: u32 = 4;
pub const FUTEX_WAIT_BITSET: u32 = 9;
pub const FUTEX_WAKE_BITSET: u32 = 10;

/// Mask selecting the futex command from the op word.
pub const FUTEX_CMD_MASK: u32 = 0x7f;

// =============================================================================
// Epoll Control Operations
// =============================================================================

pub const EPOLL_CTL_ADD: u32 = 1;
pub const EPOLL_CTL_DEL: u32 = 2;
pub const EPOLL_CTL_MOD: u32 = 3;

// =============================================================================
// Fcntl Commands
// =============================================================================

pub const F_DUPFD: u32 = 0;
pub const F_GETFD: u32 = 1;
pub const F_SETFD: u32 = 2;
pub const F_GETFL: u32 = 3;
pub const F_SETFL: u32 = 4;

// =============================================================================
// Well-Known Descriptors
// =============================================================================

pub const STDIN_FD: u32 = 0;
pub const STDOUT_FD: u32 = 1;
pub const STDERR_FD: u32 = 2;
