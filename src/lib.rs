//! # guestkit
//!
//! **Guest-ABI emulation layer**
//!
//! This crate loads multi-version Android-style boot images, exposes a
//! syscall dispatch surface mimicking a POSIX/Android runtime, and keeps
//! the bookkeeping state guest code observes through syscall returns:
//! file descriptors, threads, futexes, sockets, epoll sets, and a heap
//! arena. The instruction-executing virtual machine stays external,
//! consumed through the [`ExecutionEngine`] trait as a flat memory buffer
//! plus an execute/step entry point.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           guestkit                                  │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                      GuestInstance                          │    │
//! │  │  load_kernel() → start() → dispatch_syscall() → stop()      │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! │           │                        │                                │
//! │  ┌────────┴─────────┐   ┌──────────┴────────────────────────┐       │
//! │  │  BootImage       │   │       SyscallDispatcher           │       │
//! │  │  (v0-v4 headers) │   │  number → handler, -errno results │       │
//! │  └──────────────────┘   └──────────┬────────────────────────┘       │
//! │                                    │                                │
//! │  ┌──────────────┐ ┌───────────┐ ┌──┴──────────┐ ┌──────────────┐    │
//! │  │ Descriptor / │ │  Memory   │ │ ConsoleSink │ │ PropertyStore│    │
//! │  │ Thread/Futex/│ │  Arena    │ │  (bounded)  │ │  (bounded)   │    │
//! │  │ Socket/Epoll │ │ (brk/mmap)│ └─────────────┘ └──────────────┘    │
//! │  │   tables     │ └───────────┘                                     │
//! │  └──────────────┘                                                   │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │              ExecutionEngine (external collaborator)                │
//! │           flat memory buffer  │  execute/step entry point           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! ```text
//!  Initialized ──load_kernel──► Booting ──start──► Running ◄─resume─ Paused
//!                                  │                  │   └──pause──►  │
//!                                  └───────stop───────┴──────stop──────┘
//!                                                     ▼
//!                                                  Stopped
//! ```
//!
//! # Emulation Model
//!
//! Execution is single-threaded and synchronous. The dispatcher runs one
//! syscall to completion before the next can be issued, so no internal
//! locking exists. Nothing blocks: futex waits complete immediately,
//! socket operations succeed without transport, and timeout arguments are
//! accepted and ignored. "Threads" are bookkeeping entries, not execution
//! contexts. These are deliberate simplifications of the modeled kernel,
//! chosen so guest code observes ABI-correct results without a scheduler.
//!
//! # Error Contract
//!
//! Two families, never mixed:
//!
//! - **Load-time** failures ([`Error`]): boot-image parse errors and
//!   lifecycle misuse. A failed load aborts only that attempt and leaves
//!   the instance in its previous state.
//! - **Syscall-time** failures: negative errno codes in the `i32` return
//!   (`EBADF`=-9, `ECHILD`=-10, `EAGAIN`=-11, `ENOMEM`=-12, `EINVAL`=-22,
//!   `EMFILE`=-24, `ENOSYS`=-38). Unknown syscall numbers degrade to
//!   `-ENOSYS` rather than failing the host call.
//!
//! # Example
//!
//! ```rust,ignore
//! use guestkit::{GuestInstance, NullEngine};
//!
//! let mut guest = GuestInstance::new(Box::new(NullEngine::new(64 * 1024 * 1024)));
//! guest.load_kernel(&boot_image_bytes)?;
//! guest.start()?;
//!
//! // The engine raises syscalls; the host routes them here.
//! let ret = guest.dispatch_syscall(4, [1, msg_addr, msg_len, 0])?; // write
//! assert_eq!(ret, msg_len as i32);
//! println!("{}", guest.console_output());
//! # Ok::<(), guestkit::Error>(())
//! ```

pub mod abi;
pub mod arena;
pub mod bootimg;
pub mod console;
pub mod constants;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod guest;
pub mod props;
pub mod tables;

// Re-exports
pub use arena::{ArenaError, MemoryArena};
pub use bootimg::{BootImage, GkiHeader, ImageSummary, LegacyHeader, OsVersion, ParseOptions};
pub use console::ConsoleSink;
pub use constants::*;
pub use dispatch::{GuestContext, SyscallDispatcher};
pub use engine::{ExecutionEngine, NullEngine, StepResult};
pub use error::{Error, Result};
pub use guest::{GuestId, GuestInstance, GuestState, GuestStatus};
pub use props::PropertyStore;
pub use tables::{
    DescriptorEntry, DescriptorKind, DescriptorTable, EpollTable, FutexTable, SocketEntry,
    SocketState, SocketTable, TableError, ThreadEntry, ThreadTable,
};
