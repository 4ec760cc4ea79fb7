//! # Guest Lifecycle and Instance
//!
//! [`GuestInstance`] is the facade over one emulated guest: it owns every
//! resource table, the heap arena, the console sink, the property store,
//! the loaded image buffers, and the caller-supplied execution engine.
//! All mutation flows through image-load calls and syscall dispatch.
//!
//! ## Lifecycle
//!
//! ```text
//!                load_kernel            start
//!  ┌─────────────┐      ┌─────────┐      ┌─────────┐
//!  │ Initialized │ ───► │ Booting │ ───► │ Running │ ◄──┐
//!  └─────────────┘      └────┬────┘      └──┬───┬──┘    │ resume
//!                            │              │   │       │
//!                            │ stop   pause │   └──► ┌────────┐
//!                            │              │  stop  │ Paused │
//!                            ▼              ▼   ┌─── └────────┘
//!                       ┌─────────────────────┐ │
//!                       │       Stopped       │◄┘
//!                       └─────────────────────┘
//! ```
//!
//! Image loading is valid in `Initialized` and `Booting`; dispatch only in
//! `Running`. A parse failure aborts the load attempt and leaves the state
//! untouched. `Error` is entered only by [`GuestInstance::fail`] when the
//! host observes an unrecoverable engine condition.

use crate::bootimg::{BootImage, ImageSummary, ParseOptions};
use crate::constants::MAX_IMAGE_SIZE;
use crate::console::ConsoleSink;
use crate::dispatch::{GuestContext, SyscallDispatcher};
use crate::engine::ExecutionEngine;
use crate::error::{Error, Result};
use crate::arena::MemoryArena;
use crate::props::PropertyStore;
use crate::tables::{DescriptorTable, EpollTable, FutexTable, SocketTable, ThreadTable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// =============================================================================
// Guest ID
// =============================================================================

/// Unique identifier for a guest instance.
///
/// UUIDv7 gives time-ordered ids, convenient for log correlation when
/// several guests run in one host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuestId(uuid::Uuid);

impl GuestId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }
}

impl Default for GuestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GuestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Guest State
// =============================================================================

/// Lifecycle state of a guest instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestState {
    /// Created; no images loaded.
    Initialized,
    /// At least the kernel image is loaded and parsed.
    Booting,
    /// Dispatching syscalls.
    Running,
    /// Suspended by the host; resumable.
    Paused,
    /// Halted by `exit`, `stop()`, or teardown.
    Stopped,
    /// Unrecoverable engine failure reported by the host.
    Error,
}

impl std::fmt::Display for GuestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Booting => write!(f, "booting"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Guest Status
// =============================================================================

/// Point-in-time status snapshot of a guest.
#[derive(Debug, Clone, Serialize)]
pub struct GuestStatus {
    pub id: GuestId,
    pub state: GuestState,
    /// When the guest entered `Running` for the first time.
    pub started_at: Option<DateTime<Utc>>,
    /// When the guest stopped (if it has).
    pub stopped_at: Option<DateTime<Utc>>,
    /// Status passed to `exit`, once the guest has exited.
    pub exit_status: Option<i32>,
    /// Parsed boot image summary, once a kernel is loaded.
    pub boot: Option<ImageSummary>,
    pub open_descriptors: usize,
    pub active_threads: usize,
    pub heap_used_bytes: u32,
    pub console_bytes: usize,
    pub properties: usize,
}

// =============================================================================
// Guest Instance
// =============================================================================

/// One emulated guest: tables, arena, console, properties, image buffers,
/// and the externally implemented execution engine.
pub struct GuestInstance {
    id: GuestId,
    state: GuestState,
    dispatcher: SyscallDispatcher,
    parse_options: ParseOptions,

    descriptors: DescriptorTable,
    threads: ThreadTable,
    futexes: FutexTable,
    sockets: SocketTable,
    epolls: EpollTable,
    arena: MemoryArena,
    console: ConsoleSink,
    properties: PropertyStore,
    engine: Box<dyn ExecutionEngine>,

    boot: Option<BootImage>,
    kernel: Option<Vec<u8>>,
    ramdisk: Option<Vec<u8>>,
    system_image: Option<Vec<u8>>,
    data_image: Option<Vec<u8>>,

    main_tid: u32,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    exit_status: Option<i32>,
}

impl GuestInstance {
    /// Creates a guest in `Initialized` state around an engine.
    pub fn new(engine: Box<dyn ExecutionEngine>) -> Self {
        let id = GuestId::new();
        info!("guest {} created", id);
        Self {
            id,
            state: GuestState::Initialized,
            dispatcher: SyscallDispatcher::new(),
            parse_options: ParseOptions::default(),
            descriptors: DescriptorTable::new(),
            threads: ThreadTable::new(),
            futexes: FutexTable::new(),
            sockets: SocketTable::new(),
            epolls: EpollTable::new(),
            arena: MemoryArena::new(),
            console: ConsoleSink::new(),
            properties: PropertyStore::new(),
            engine,
            boot: None,
            kernel: None,
            ramdisk: None,
            system_image: None,
            data_image: None,
            main_tid: 0,
            started_at: None,
            stopped_at: None,
            exit_status: None,
        }
    }

    /// Overrides the GKI load-address defaults used when parsing kernels.
    pub fn with_parse_options(mut self, opts: ParseOptions) -> Self {
        self.parse_options = opts;
        self
    }

    pub fn id(&self) -> GuestId {
        self.id
    }

    pub fn state(&self) -> GuestState {
        self.state
    }

    pub fn boot_image(&self) -> Option<&BootImage> {
        self.boot.as_ref()
    }

    /// The externally implemented execution engine.
    pub fn engine(&self) -> &dyn ExecutionEngine {
        self.engine.as_ref()
    }

    /// Mutable engine access, for staging guest memory from the host.
    pub fn engine_mut(&mut self) -> &mut dyn ExecutionEngine {
        self.engine.as_mut()
    }

    // =========================================================================
    // Image Loading
    // =========================================================================

    /// Loads and parses a kernel boot image.
    ///
    /// Valid in `Initialized` or `Booting`; transitions to `Booting` on
    /// success. The kernel payload is copied into engine memory at the
    /// header's kernel load address. A parse failure aborts only this
    /// load attempt and leaves the lifecycle state unchanged.
    pub fn load_kernel(&mut self, bytes: &[u8]) -> Result<ImageSummary> {
        self.require_loadable("load_kernel")?;
        check_image_size("kernel", bytes)?;

        let image = BootImage::parse_with(bytes, self.parse_options)?;
        let summary = image.summary();
        info!(
            "guest {}: kernel image v{} parsed, {} byte kernel at offset {:#x}",
            self.id, summary.header_version, summary.kernel_size, summary.kernel_offset
        );

        let offset = summary.kernel_offset as usize;
        let size = summary.kernel_size as usize;
        if let Some(payload) = bytes.get(offset..offset.saturating_add(size).min(bytes.len())) {
            let copied = self.engine.write_memory(summary.kernel_load_addr, payload);
            if copied < payload.len() {
                warn!(
                    "guest {}: kernel truncated to engine memory ({} of {} bytes)",
                    self.id,
                    copied,
                    payload.len()
                );
            }
        }

        self.boot = Some(image);
        self.kernel = Some(bytes.to_vec());
        self.state = GuestState::Booting;
        Ok(summary)
    }

    /// Loads a standalone ramdisk, copied to the ramdisk load address when
    /// a boot header has been parsed.
    pub fn load_ramdisk(&mut self, bytes: &[u8]) -> Result<()> {
        self.require_loadable("load_ramdisk")?;
        check_image_size("ramdisk", bytes)?;
        if let Some(boot) = &self.boot {
            self.engine.write_memory(boot.ramdisk_load_addr(), bytes);
        }
        self.ramdisk = Some(bytes.to_vec());
        debug!("guest {}: ramdisk loaded ({} bytes)", self.id, bytes.len());
        Ok(())
    }

    /// Attaches a system partition image buffer.
    pub fn load_system_image(&mut self, bytes: &[u8]) -> Result<()> {
        self.require_loadable("load_system_image")?;
        check_image_size("system", bytes)?;
        self.system_image = Some(bytes.to_vec());
        debug!("guest {}: system image loaded ({} bytes)", self.id, bytes.len());
        Ok(())
    }

    /// Attaches a data partition image buffer.
    pub fn load_data_image(&mut self, bytes: &[u8]) -> Result<()> {
        self.require_loadable("load_data_image")?;
        check_image_size("data", bytes)?;
        self.data_image = Some(bytes.to_vec());
        debug!("guest {}: data image loaded ({} bytes)", self.id, bytes.len());
        Ok(())
    }

    fn require_loadable(&self, operation: &'static str) -> Result<()> {
        match self.state {
            GuestState::Initialized | GuestState::Booting => Ok(()),
            state => Err(Error::InvalidState {
                state,
                operation,
                expected: "initialized|booting",
            }),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts execution: `Booting -> Running`.
    ///
    /// Requires a parsed kernel; sets the engine entry point to the kernel
    /// load address and records the main thread (tid 1).
    pub fn start(&mut self) -> Result<()> {
        if self.state != GuestState::Booting {
            return Err(Error::InvalidState {
                state: self.state,
                operation: "start",
                expected: "booting",
            });
        }
        let Some(boot) = &self.boot else {
            return Err(Error::NoKernel);
        };
        self.engine.set_entry_point(boot.kernel_load_addr());

        // Main thread: tid 1, its own process, no parent. The table is
        // empty before the first start, so the spawn cannot exhaust it.
        self.main_tid = self.threads.spawn(1, 0, 0).unwrap_or(1);
        self.state = GuestState::Running;
        self.started_at = Some(Utc::now());
        info!("guest {} running (main tid {})", self.id, self.main_tid);
        Ok(())
    }

    /// Suspends dispatch: `Running -> Paused`.
    pub fn pause(&mut self) -> Result<()> {
        if self.state != GuestState::Running {
            return Err(Error::InvalidState {
                state: self.state,
                operation: "pause",
                expected: "running",
            });
        }
        self.state = GuestState::Paused;
        debug!("guest {} paused", self.id);
        Ok(())
    }

    /// Resumes dispatch: `Paused -> Running`.
    pub fn resume(&mut self) -> Result<()> {
        if self.state != GuestState::Paused {
            return Err(Error::InvalidState {
                state: self.state,
                operation: "resume",
                expected: "paused",
            });
        }
        self.state = GuestState::Running;
        debug!("guest {} resumed", self.id);
        Ok(())
    }

    /// Stops the guest from any live state.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            GuestState::Booting | GuestState::Running | GuestState::Paused => {
                self.state = GuestState::Stopped;
                self.stopped_at = Some(Utc::now());
                info!("guest {} stopped", self.id);
                Ok(())
            }
            state => Err(Error::InvalidState {
                state,
                operation: "stop",
                expected: "booting|running|paused",
            }),
        }
    }

    /// Marks the guest failed after an unrecoverable engine condition.
    pub fn fail(&mut self) {
        warn!("guest {} entered error state", self.id);
        self.state = GuestState::Error;
        self.stopped_at = Some(Utc::now());
    }

    /// Tears the guest down: releases image buffers and engine state.
    ///
    /// Valid from any state; the guest ends `Stopped`.
    pub fn shutdown(&mut self) {
        self.kernel = None;
        self.ramdisk = None;
        self.system_image = None;
        self.data_image = None;
        self.engine.release();
        if self.state != GuestState::Stopped {
            self.state = GuestState::Stopped;
            self.stopped_at = Some(Utc::now());
        }
        info!("guest {} shut down", self.id);
    }

    // =========================================================================
    // Syscall Dispatch
    // =========================================================================

    /// Dispatches one syscall raised by the execution engine.
    ///
    /// Only valid while `Running`; the returned value follows the
    /// negative-errno convention and is what the guest's calling
    /// convention expects. An `exit` transitions the guest to `Stopped`
    /// after its handler returns.
    pub fn dispatch_syscall(&mut self, number: u32, args: [u32; 4]) -> Result<i32> {
        if self.state != GuestState::Running {
            return Err(Error::InvalidState {
                state: self.state,
                operation: "dispatch_syscall",
                expected: "running",
            });
        }

        let mut ctx = GuestContext {
            descriptors: &mut self.descriptors,
            threads: &mut self.threads,
            futexes: &mut self.futexes,
            sockets: &mut self.sockets,
            epolls: &mut self.epolls,
            arena: &mut self.arena,
            console: &mut self.console,
            engine: self.engine.as_mut(),
            current_tid: self.main_tid,
            current_pid: 1,
            exit_status: None,
        };
        let ret = self.dispatcher.dispatch(&mut ctx, number, args);
        let exited = ctx.exit_status;

        if let Some(status) = exited {
            self.exit_status = Some(status);
            self.state = GuestState::Stopped;
            self.stopped_at = Some(Utc::now());
            info!("guest {} exited with status {}", self.id, status);
        }
        Ok(ret)
    }

    // =========================================================================
    // Console and Properties
    // =========================================================================

    /// Accumulated console text (stdout and stderr interleaved).
    pub fn console_output(&self) -> String {
        self.console.text()
    }

    /// Accumulated console bytes.
    pub fn console_bytes(&self) -> &[u8] {
        self.console.contents()
    }

    pub fn clear_console(&mut self) {
        self.console.clear();
    }

    /// Sets a property, host-side.
    pub fn set_property(&mut self, key: &str, value: &str) -> Result<()> {
        self.properties.set(key, value)
    }

    /// Reads a property by name.
    pub fn get_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key)
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Point-in-time status snapshot.
    pub fn status(&self) -> GuestStatus {
        GuestStatus {
            id: self.id,
            state: self.state,
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            exit_status: self.exit_status,
            boot: self.boot.as_ref().map(BootImage::summary),
            open_descriptors: self.descriptors.open_count(),
            active_threads: self.threads.active_count(),
            heap_used_bytes: self.arena.used_bytes(),
            console_bytes: self.console.len(),
            properties: self.properties.len(),
        }
    }

    /// Status snapshot as a JSON document.
    pub fn status_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.status())?)
    }
}

fn check_image_size(image: &'static str, bytes: &[u8]) -> Result<()> {
    if bytes.len() > MAX_IMAGE_SIZE {
        return Err(Error::ImageTooLarge {
            image,
            size: bytes.len(),
            limit: MAX_IMAGE_SIZE,
        });
    }
    Ok(())
}
