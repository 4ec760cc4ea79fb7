//! Tests for the guest lifecycle state machine, image loading, properties,
//! and status reporting.

use guestkit::abi::{SYS_EXIT_GROUP, SYS_GETPID, SYS_MMAP2, SYS_OPEN, SYS_WRITE};
use guestkit::{
    Error, GuestInstance, GuestState, NullEngine, ParseOptions, GKI_KERNEL_LOAD_ADDR,
    GKI_RAMDISK_LOAD_ADDR, MAX_PROPERTIES,
};

const ENGINE_MEMORY: usize = 32 * 1024 * 1024;

fn boot_image_with_kernel(kernel: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; 4096 + kernel.len().div_ceil(4096) * 4096];
    buf[..8].copy_from_slice(b"ANDROID!");
    buf[8..12].copy_from_slice(&(kernel.len() as u32).to_le_bytes());
    buf[20..24].copy_from_slice(&1580u32.to_le_bytes());
    buf[40..44].copy_from_slice(&3u32.to_le_bytes());
    buf[4096..4096 + kernel.len()].copy_from_slice(kernel);
    buf
}

fn fresh_guest() -> GuestInstance {
    // RUST_LOG=guestkit=debug surfaces transition logs when debugging.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    GuestInstance::new(Box::new(NullEngine::new(ENGINE_MEMORY)))
}

fn booted_guest() -> GuestInstance {
    let mut guest = fresh_guest();
    guest.load_kernel(&boot_image_with_kernel(b"\xde\xad\xbe\xef")).unwrap();
    guest
}

// =============================================================================
// Lifecycle Transitions
// =============================================================================

#[test]
fn test_new_guest_is_initialized() {
    let guest = fresh_guest();
    assert_eq!(guest.state(), GuestState::Initialized);
    assert!(guest.boot_image().is_none());
}

#[test]
fn test_guest_ids_are_unique() {
    let a = fresh_guest();
    let b = fresh_guest();
    assert_ne!(a.id(), b.id());
    assert!(!a.id().to_string().is_empty());
}

#[test]
fn test_full_lifecycle() {
    let mut guest = booted_guest();
    assert_eq!(guest.state(), GuestState::Booting);

    guest.start().unwrap();
    assert_eq!(guest.state(), GuestState::Running);

    guest.pause().unwrap();
    assert_eq!(guest.state(), GuestState::Paused);

    guest.resume().unwrap();
    assert_eq!(guest.state(), GuestState::Running);

    guest.stop().unwrap();
    assert_eq!(guest.state(), GuestState::Stopped);

    let status = guest.status();
    assert!(status.started_at.is_some());
    assert!(status.stopped_at.is_some());
}

#[test]
fn test_start_without_kernel_is_rejected() {
    let mut guest = fresh_guest();
    assert!(matches!(
        guest.start(),
        Err(Error::InvalidState { operation: "start", .. })
    ));
    assert_eq!(guest.state(), GuestState::Initialized);
}

#[test]
fn test_invalid_transitions_are_rejected() {
    let mut guest = booted_guest();
    // Pause and resume require Running / Paused respectively.
    assert!(guest.pause().is_err());
    assert!(guest.resume().is_err());

    guest.start().unwrap();
    assert!(guest.resume().is_err());

    guest.stop().unwrap();
    assert!(guest.start().is_err());
    assert!(guest.pause().is_err());
    assert!(guest.stop().is_err());
}

#[test]
fn test_dispatch_requires_running() {
    let mut guest = booted_guest();
    assert!(matches!(
        guest.dispatch_syscall(SYS_GETPID, [0; 4]),
        Err(Error::InvalidState { operation: "dispatch_syscall", .. })
    ));
    guest.start().unwrap();
    guest.pause().unwrap();
    assert!(guest.dispatch_syscall(SYS_GETPID, [0; 4]).is_err());
    guest.resume().unwrap();
    assert_eq!(guest.dispatch_syscall(SYS_GETPID, [0; 4]).unwrap(), 1);
}

#[test]
fn test_fail_enters_error_state() {
    let mut guest = booted_guest();
    guest.start().unwrap();
    guest.fail();
    assert_eq!(guest.state(), GuestState::Error);
    assert!(guest.stop().is_err());
}

#[test]
fn test_shutdown_releases_engine_from_any_state() {
    let mut guest = booted_guest();
    guest.start().unwrap();
    guest.shutdown();
    assert_eq!(guest.state(), GuestState::Stopped);
    // NullEngine drops its buffer on release.
    assert!(guest.engine().memory().is_empty());

    // Shutdown of a never-started guest is also valid.
    let mut idle = fresh_guest();
    idle.shutdown();
    assert_eq!(idle.state(), GuestState::Stopped);
}

// =============================================================================
// Image Loading
// =============================================================================

#[test]
fn test_load_kernel_copies_payload_to_load_address() {
    let mut guest = fresh_guest();
    let summary = guest
        .load_kernel(&boot_image_with_kernel(b"\xde\xad\xbe\xef"))
        .unwrap();
    assert_eq!(summary.kernel_load_addr, GKI_KERNEL_LOAD_ADDR);
    assert_eq!(
        guest.engine().read_memory(GKI_KERNEL_LOAD_ADDR, 4).unwrap(),
        b"\xde\xad\xbe\xef"
    );
}

#[test]
fn test_load_kernel_parse_failure_keeps_state() {
    let mut guest = fresh_guest();
    let mut garbage = vec![0u8; 2048];
    garbage[..8].copy_from_slice(b"GARBAGE!");
    assert!(matches!(
        guest.load_kernel(&garbage),
        Err(Error::BadMagic { .. })
    ));
    assert_eq!(guest.state(), GuestState::Initialized);
    assert!(guest.boot_image().is_none());

    // A later valid load still succeeds.
    guest.load_kernel(&boot_image_with_kernel(b"ok")).unwrap();
    assert_eq!(guest.state(), GuestState::Booting);
}

#[test]
fn test_load_ramdisk_lands_at_ramdisk_address() {
    let mut guest = booted_guest();
    guest.load_ramdisk(b"initramfs-contents").unwrap();
    assert_eq!(
        guest.engine().read_memory(GKI_RAMDISK_LOAD_ADDR, 9).unwrap(),
        b"initramfs"
    );
}

#[test]
fn test_loading_after_start_is_rejected() {
    let mut guest = booted_guest();
    guest.start().unwrap();
    let image = boot_image_with_kernel(b"late");
    assert!(guest.load_kernel(&image).is_err());
    assert!(guest.load_ramdisk(b"late").is_err());
    assert!(guest.load_system_image(b"late").is_err());
    assert!(guest.load_data_image(b"late").is_err());
}

#[test]
fn test_custom_parse_options_override_load_addresses() {
    let mut guest = fresh_guest().with_parse_options(ParseOptions {
        kernel_load_addr: 0x0010_0000,
        ramdisk_load_addr: 0x0090_0000,
    });
    let summary = guest
        .load_kernel(&boot_image_with_kernel(b"entry"))
        .unwrap();
    assert_eq!(summary.kernel_load_addr, 0x0010_0000);
    assert_eq!(summary.ramdisk_load_addr, 0x0090_0000);
    assert_eq!(
        guest.engine().read_memory(0x0010_0000, 5).unwrap(),
        b"entry"
    );
}

// =============================================================================
// Console
// =============================================================================

#[test]
fn test_console_accumulates_and_clears() {
    let mut guest = booted_guest();
    guest.start().unwrap();
    let msg = b"boot: init done\n";
    guest.engine_mut().write_memory(0x100, msg);
    guest
        .dispatch_syscall(SYS_WRITE, [1, 0x100, msg.len() as u32, 0])
        .unwrap();
    assert_eq!(guest.console_output(), "boot: init done\n");
    assert_eq!(guest.console_bytes(), msg);

    guest.clear_console();
    assert!(guest.console_output().is_empty());
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn test_default_properties_are_seeded() {
    let guest = fresh_guest();
    assert_eq!(guest.get_property("ro.build.version.sdk"), Some("33"));
    assert!(guest.get_property("ro.serialno").is_some());
    assert_eq!(guest.get_property("no.such.key"), None);
}

#[test]
fn test_set_property_validates_and_overwrites() {
    let mut guest = fresh_guest();
    guest.set_property("persist.sys.locale", "en-US").unwrap();
    assert_eq!(guest.get_property("persist.sys.locale"), Some("en-US"));

    guest.set_property("persist.sys.locale", "de-DE").unwrap();
    assert_eq!(guest.get_property("persist.sys.locale"), Some("de-DE"));

    assert!(matches!(
        guest.set_property("bad key!", "v"),
        Err(Error::InvalidProperty { .. })
    ));
    let long_value = "x".repeat(200);
    assert!(guest.set_property("sys.long", &long_value).is_err());
}

#[test]
fn test_property_table_capacity_is_enforced() {
    let mut guest = fresh_guest();
    let seeded = guest.status().properties;
    for i in 0..(MAX_PROPERTIES - seeded) {
        guest.set_property(&format!("test.key.{i}"), "v").unwrap();
    }
    assert!(matches!(
        guest.set_property("test.key.overflow", "v"),
        Err(Error::PropertyTableFull { .. })
    ));
    // Overwriting an existing key still works at capacity.
    guest.set_property("test.key.0", "updated").unwrap();
    assert_eq!(guest.get_property("test.key.0"), Some("updated"));
}

// =============================================================================
// Status
// =============================================================================

#[test]
fn test_status_reflects_resource_usage() {
    let mut guest = booted_guest();
    guest.start().unwrap();

    let before = guest.status();
    assert_eq!(before.state, GuestState::Running);
    assert_eq!(before.open_descriptors, 3, "standard streams only");
    assert_eq!(before.active_threads, 1, "main thread");
    assert_eq!(before.boot.as_ref().map(|b| b.header_version), Some(3));

    // Open a file and grow the heap, then observe the deltas.
    guest.engine_mut().write_memory(0x100, b"/f\0");
    guest.dispatch_syscall(SYS_OPEN, [0x100, 0, 0, 0]).unwrap();
    guest.dispatch_syscall(SYS_MMAP2, [0, 8192, 0, 0]).unwrap();

    let after = guest.status();
    assert_eq!(after.open_descriptors, 4);
    assert_eq!(after.heap_used_bytes, 8192);
}

#[test]
fn test_exit_status_recorded() {
    let mut guest = booted_guest();
    guest.start().unwrap();
    guest.dispatch_syscall(SYS_EXIT_GROUP, [42, 0, 0, 0]).unwrap();
    let status = guest.status();
    assert_eq!(status.state, GuestState::Stopped);
    assert_eq!(status.exit_status, Some(42));
    assert!(status.stopped_at.is_some());
}

#[test]
fn test_status_json_names_the_state() {
    let mut guest = booted_guest();
    guest.start().unwrap();
    let json = guest.status_json().unwrap();
    assert!(json.contains("\"state\": \"running\""));
    assert!(json.contains("\"active_threads\": 1"));
    assert!(json.contains("\"header_version\": 3"));
}
