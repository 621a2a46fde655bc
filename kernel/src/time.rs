// SPDX-License-Identifier: GPL-2.0

//! Jiffies-based system time: a PIT-driven tick counter plus the bounded
//! busy-wait helpers hardware drivers poll on (e.g. the floppy controller's
//! IRQ wait).
//!
//! TSC calibration, CMOS RTC reading, and a timer wheel belong to a
//! scheduler this kernel doesn't have; only the tick counter itself
//! survives from that machinery.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::HW_WAIT_MAX_ITERATIONS;
use crate::error::{Error, Result};
use crate::types::Jiffies;

/// System clock frequency (Hz) the PIT is programmed to tick at.
pub const HZ: u64 = 100;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
const PIT_FREQUENCY: u32 = 1_193_182;
const PIT_MODE2_CHANNEL0: u8 = 0x36;
const TIMER_IRQ_VECTOR: u8 = crate::arch::x86::idt::IRQ_BASE;

static JIFFIES_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Program PIT channel 0 for a `HZ`-rate square wave and register the tick
/// handler on IRQ0.
pub fn init() {
	let divisor = (PIT_FREQUENCY / HZ as u32) as u16;
	unsafe {
		crate::arch::x86::port::outb(PIT_COMMAND, PIT_MODE2_CHANNEL0);
		crate::arch::x86::port::outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
		crate::arch::x86::port::outb(PIT_CHANNEL0, (divisor >> 8) as u8);
	}
	crate::arch::x86::idt::register_handler(TIMER_IRQ_VECTOR, timer_tick);
	crate::info!("PIT timer initialized at {} Hz", HZ);
}

fn timer_tick(_vector: u8) {
	update_jiffies();
}

/// Current tick count since boot.
pub fn get_jiffies() -> Jiffies {
	Jiffies(JIFFIES_COUNTER.load(Ordering::Relaxed))
}

/// Advance the tick counter. Called from the IRQ0 handler.
pub fn update_jiffies() {
	JIFFIES_COUNTER.fetch_add(1, Ordering::Relaxed);
}

pub fn jiffies_to_msecs(jiffies: Jiffies) -> u64 {
	jiffies.0 * 1000 / HZ
}

pub fn msecs_to_jiffies(ms: u64) -> Jiffies {
	Jiffies(ms * HZ / 1000)
}

/// Busy-wait on `poll` until it returns `true`, bounded by
/// [`HW_WAIT_MAX_ITERATIONS`]. Used by hardware drivers (e.g. the floppy
/// controller's IRQ wait) that have no interrupt-driven completion path
/// wired up yet.
pub fn busy_wait_until(mut poll: impl FnMut() -> bool) -> Result<()> {
	for _ in 0..HW_WAIT_MAX_ITERATIONS {
		if poll() {
			return Ok(());
		}
		core::hint::spin_loop();
	}
	Err(Error::Timeout)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn jiffies_msec_round_trip_is_consistent_with_hz() {
		assert_eq!(jiffies_to_msecs(Jiffies(HZ)), 1000);
		assert_eq!(msecs_to_jiffies(1000).0, HZ);
	}

	#[test]
	fn busy_wait_returns_ok_once_condition_is_true() {
		let mut calls = 0;
		let result = busy_wait_until(|| {
			calls += 1;
			calls >= 3
		});
		assert!(result.is_ok());
		assert_eq!(calls, 3);
	}

	#[test]
	fn busy_wait_times_out_when_condition_never_holds() {
		assert_eq!(busy_wait_until(|| false), Err(Error::Timeout));
	}
}
