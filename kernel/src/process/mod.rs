// SPDX-License-Identifier: GPL-2.0

//! Process control blocks and the process table.
//!
//! Grounded on `process.rs`'s `Process`/`ProcessTable`/`allocate_pid`,
//! collapsed from a multi-threaded model to one single-threaded process per
//! PCB. The scheduler such a PCB would normally feed into is out of scope:
//! this module only owns process lifecycle, not dispatch.

pub mod elf;

use alloc::vec::Vec;

use crate::arch::x86::context::Context;
use crate::config::USER_HEAP_START;
use crate::error::{Error, Result};
use crate::fd::FdTable;
use crate::memory::process_mem::{self, UserHeap, UserStack};
use crate::memory::{page_table, PageDirectory};
use crate::sync::Spinlock;
use crate::types::{Pid, VirtAddr};

/// Runnable state. The scheduler that would consume this is future work;
/// it is tracked here so a later scheduler has something to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
	Runnable,
	Blocked,
	Zombie(i32),
}

/// Process control block. Owns its address space and, for user-mode
/// processes, its heap/stack ranges; kernel-mode processes share the kernel
/// address space and carry `None` for both.
pub struct Pcb {
	pub pid: Pid,
	pub parent: Option<Pid>,
	pub state: ProcessState,
	pub kernel_mode: bool,
	pub address_space: PageDirectory,
	pub heap: Option<UserHeap>,
	pub stack: Option<UserStack>,
	pub context: Context,
	pub priority: u8,
	pub time_slice: u32,
	pub signal_mask: u32,
	pub exit_code: i32,
	pub fds: FdTable,
}

impl Pcb {
	/// `brk(target)`: grow/shrink the user heap so it ends exactly at
	/// `target`, rounded up to a page boundary.
	pub fn brk(&mut self, target: VirtAddr) -> Result<VirtAddr> {
		let heap = self.heap.as_mut().ok_or(Error::InvalidOperation)?;
		process_mem::process_brk(self.address_space, heap, target)?;
		Ok(heap.end)
	}

	/// Incremental `sbrk(delta)`, returning the previous break.
	pub fn sbrk(&mut self, delta: isize) -> Result<VirtAddr> {
		let heap = self.heap.as_mut().ok_or(Error::InvalidOperation)?;
		process_mem::process_sbrk(self.address_space, heap, delta)
	}
}

const MAX_PROCESSES: usize = 64;

struct ProcessTable {
	next_pid: u32,
	processes: Vec<Pcb>,
}

static TABLE: Spinlock<ProcessTable> = Spinlock::new(ProcessTable {
	next_pid: 1,
	processes: Vec::new(),
});

fn allocate_pid(table: &mut ProcessTable) -> Pid {
	let pid = Pid(table.next_pid);
	table.next_pid += 1;
	pid
}

/// Address where control returns when a process's entry function returns
/// normally — the sentinel word written at the top of the user stack.
/// Signal delivery / real process exit handling is out of scope; this just
/// needs to be a stable, non-zero value the loader can seed and the
/// trap-return path can recognize.
pub const EXIT_HANDLER_ADDR: u32 = 0xFFFF_0000;

/// Create a process. The kernel-mode path shares the kernel address space
/// and skips user heap/stack setup entirely: it exists so PID 0 — the
/// kernel's own "thread" — has a PCB a future scheduler can treat uniformly
/// with user processes.
pub fn process_create(entry_ip: u32, kernel_mode: bool) -> Result<Pid> {
	let mut table = TABLE.lock();
	if table.processes.len() >= MAX_PROCESSES {
		return Err(Error::TableFull);
	}
	let pid = allocate_pid(&mut table);

	if kernel_mode {
		let mut context = Context::new();
		context.regs.eip = entry_ip;
		context.regs.eflags = 0x202;
		let pcb = Pcb {
			pid,
			parent: None,
			state: ProcessState::Runnable,
			kernel_mode: true,
			address_space: page_table::kernel_directory(),
			heap: None,
			stack: None,
			context,
			priority: 0,
			time_slice: 0,
			signal_mask: 0,
			exit_code: 0,
			fds: FdTable::new(),
		};
		table.processes.push(pcb);
		return Ok(pid);
	}

	let address_space = match page_table::create_address_space() {
		Ok(pd) => pd,
		Err(e) => return Err(e),
	};

	let heap = match process_mem::process_heap_init(address_space, VirtAddr::new(USER_HEAP_START)) {
		Ok(h) => h,
		Err(e) => {
			page_table::destroy_address_space(address_space);
			return Err(e);
		}
	};

	let stack = match process_mem::process_stack_init(address_space, EXIT_HANDLER_ADDR) {
		Ok(s) => s,
		Err(e) => {
			page_table::destroy_address_space(address_space);
			return Err(e);
		}
	};

	let context = Context::new_user(entry_ip, stack.top.as_usize() as u32);

	let pcb = Pcb {
		pid,
		parent: None,
		state: ProcessState::Runnable,
		kernel_mode: false,
		address_space,
		heap: Some(heap),
		stack: Some(stack),
		context,
		priority: 10,
		time_slice: 10,
		signal_mask: 0,
		exit_code: 0,
		fds: FdTable::new(),
	};
	table.processes.push(pcb);
	Ok(pid)
}

/// Tear down a process: release every user mapping and its backing frame,
/// close all descriptors, fall back to the kernel address space if this
/// process was active, then drop the PCB.
pub fn process_destroy(pid: Pid) -> Result<()> {
	let mut table = TABLE.lock();
	let idx = table.processes.iter().position(|p| p.pid == pid).ok_or(Error::ESRCH)?;
	let mut pcb = table.processes.remove(idx);

	pcb.fds.close_all();

	if !pcb.kernel_mode {
		unmap_user_range(pcb.address_space, &mut pcb.heap);
		unmap_user_stack(pcb.address_space, &mut pcb.stack);

		if page_table::current() == pcb.address_space {
			page_table::switch_to(page_table::kernel_directory());
		}
		page_table::destroy_address_space(pcb.address_space);
	}

	Ok(())
}

fn unmap_user_range(pd: PageDirectory, heap: &mut Option<UserHeap>) {
	if let Some(h) = heap.take() {
		let mut vaddr = h.start;
		while vaddr.as_usize() < h.end.as_usize() {
			if let Some(frame) = page_table::translate(pd, vaddr) {
				let _ = page_table::unmap(pd, vaddr);
				crate::memory::pmm::free_frame(frame);
			}
			vaddr = vaddr + crate::config::PAGE_SIZE;
		}
	}
}

fn unmap_user_stack(pd: PageDirectory, stack: &mut Option<UserStack>) {
	if let Some(s) = stack.take() {
		let mut vaddr = s.bottom;
		while vaddr.as_usize() < s.top.as_usize() + crate::config::PAGE_SIZE {
			if let Some(frame) = page_table::translate(pd, vaddr) {
				let _ = page_table::unmap(pd, vaddr);
				crate::memory::pmm::free_frame(frame);
			}
			vaddr = vaddr + crate::config::PAGE_SIZE;
		}
	}
}

pub fn with_pcb<R>(pid: Pid, f: impl FnOnce(&mut Pcb) -> R) -> Option<R> {
	let mut table = TABLE.lock();
	table.processes.iter_mut().find(|p| p.pid == pid).map(f)
}

pub fn exists(pid: Pid) -> bool {
	TABLE.lock().processes.iter().any(|p| p.pid == pid)
}

pub fn count() -> usize {
	TABLE.lock().processes.len()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pid_allocation_is_monotonic() {
		let mut table = ProcessTable {
			next_pid: 1,
			processes: Vec::new(),
		};
		let a = allocate_pid(&mut table);
		let b = allocate_pid(&mut table);
		assert!(b.0 > a.0);
	}
}
