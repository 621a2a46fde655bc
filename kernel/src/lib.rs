// SPDX-License-Identifier: GPL-2.0

//! The Rust kernel crate.
//!
//! This crate provides the core kernel APIs and functionality for a 32-bit
//! x86 kernel: physical and virtual memory management, a process model with
//! an ELF32 loader, a virtual filesystem over an in-memory device namespace
//! and a FAT12/16/32 storage engine, per-process file descriptors, a
//! syscall boundary, and a dynamic symbol/relocation loader.

// Pure-logic modules (FAT cluster math, VFS path resolution, ELF header
// parsing, the ANSI parser, ...) carry ordinary `#[test]`s runnable under
// `cargo test` on the host; that only works with `std` linked, so `no_std`
// itself is conditional on not running under the host test harness. The
// on-target integration-test path (`target_os = "none"`) keeps the
// custom-test-framework/QEMU-exit machinery below.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![cfg_attr(target_os = "none", feature(custom_test_frameworks))]
#![cfg_attr(all(test, target_os = "none"), test_runner(crate::test_runner))]
#![cfg_attr(all(test, target_os = "none"), reexport_test_harness_main = "test_main")]
#![feature(alloc_error_handler)]
#![feature(panic_info_message)]
#![feature(asm_const)]
#![feature(const_mut_refs)]
#![feature(allocator_api)]

extern crate alloc;

pub mod arch;
pub mod block;
pub mod config;
pub mod console;
pub mod dynlib;
pub mod error;
pub mod fat;
pub mod fd;
pub mod init;
pub mod logging;
pub mod memory;
pub mod panic;
pub mod prelude;
pub mod process;
pub mod sync;
pub mod syscall;
pub mod terminal;
pub mod time;
pub mod types;
pub mod vfs;

/// Kernel version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = "Rust Kernel";

/// Kernel entry point called from architecture-specific boot code.
#[no_mangle]
pub extern "C" fn kernel_main() -> ! {
	early_kernel_init();

	if let Err(e) = memory::init(None) {
		panic!("memory initialization failed: {:?}", e);
	}

	if logging::init_logging().is_err() {
		crate::console::write_str("logging initialization failed\n");
	}

	init::init_subsystems();
	init::main_kernel_loop();
}

/// Console-only initialization, before the heap exists.
fn early_kernel_init() {
	arch::early_init();

	if console::init().is_err() {
		loop {}
	}

	crate::console::write_str("\n");
	crate::console::write_str("Booting Rust Kernel...\n");
}

/// Test runner for on-target (QEMU) integration tests only; host-run unit
/// tests use the standard `libtest` harness instead.
#[cfg(all(test, target_os = "none"))]
fn test_runner(tests: &[&dyn Fn()]) {
	crate::info!("Running {} tests", tests.len());
	for test in tests {
		test();
	}
	exit_qemu(QemuExitCode::Success);
}

#[cfg(all(test, target_os = "none"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
	Success = 0x10,
	Failed = 0x11,
}

#[cfg(all(test, target_os = "none"))]
pub fn exit_qemu(exit_code: QemuExitCode) {
	use arch::x86::port::Port;

	unsafe {
		let mut port = Port::new(0xf4);
		port.write(exit_code as u32);
	}
}

/// Global allocator error handler (no_std target only; host test builds
/// link std, which installs its own).
#[cfg(not(test))]
#[alloc_error_handler]
fn alloc_error_handler(layout: alloc::alloc::Layout) -> ! {
	panic!("allocation error: {:?}", layout)
}
