// SPDX-License-Identifier: GPL-2.0

//! Kernel panic handler

use core::fmt::Write;
use core::panic::PanicInfo;

/// Panic handler (no_std target only; host test builds use std's).
#[cfg(not(test))]
#[panic_handler]
pub fn panic_handler(info: &PanicInfo) -> ! {
	#[cfg(target_arch = "x86")]
	unsafe {
		core::arch::asm!("cli");
	}

	let mut writer = PanicWriter;
	writeln!(writer, "\n\n=== KERNEL PANIC ===").ok();

	if let Some(location) = info.location() {
		writeln!(
			writer,
			"Panic at {}:{}:{}",
			location.file(),
			location.line(),
			location.column()
		)
		.ok();
	}

	let message = info.message();
	writeln!(writer, "Message: {}", message).ok();

	writeln!(writer, "===================\n").ok();

	print_stack_trace(&mut writer);
	save_panic_info(info);

	loop {
		#[cfg(target_arch = "x86")]
		unsafe {
			core::arch::asm!("hlt");
		}

		#[cfg(not(target_arch = "x86"))]
		core::hint::spin_loop();
	}
}

/// Walk the current ebp chain, printing each frame's return address.
fn print_stack_trace<W: core::fmt::Write>(writer: &mut W) {
	writeln!(writer, "Stack trace:").ok();

	let mut ebp: *const u32;
	#[cfg(target_arch = "x86")]
	unsafe {
		core::arch::asm!("mov {}, ebp", out(reg) ebp);
	}
	#[cfg(not(target_arch = "x86"))]
	{
		ebp = core::ptr::null();
	}

	let mut frame_count = 0;
	while !ebp.is_null() && frame_count < 10 {
		unsafe {
			let ret_addr = ebp.add(1).read_volatile();
			writeln!(writer, "  #{}: 0x{:08x}", frame_count, ret_addr).ok();

			let next = ebp.read_volatile() as *const u32;
			frame_count += 1;

			if (next as usize) <= (ebp as usize) || (next as usize) < 0x1000 {
				break;
			}
			ebp = next;
		}
	}
}

/// Mirror the panic message into the ring-buffered kernel log.
fn save_panic_info(info: &core::panic::PanicInfo) {
	if let Some(location) = info.location() {
		crate::info!(
			"PANIC LOGGED: {}:{}:{} - {}",
			location.file(),
			location.line(),
			location.column(),
			info.message()
		);
	} else {
		crate::info!("PANIC LOGGED: {}", info.message());
	}
}

/// Writer for panic messages, routed through the same console the rest of
/// the kernel prints through.
struct PanicWriter;

impl Write for PanicWriter {
	fn write_str(&mut self, s: &str) -> core::fmt::Result {
		crate::console::write_str(s);
		Ok(())
	}
}
