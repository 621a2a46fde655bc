// SPDX-License-Identifier: GPL-2.0

//! Per-process user heap (`brk`/`sbrk`) and user stack mapping.
//!
//! Both operate on a caller-supplied [`PageDirectory`] so they can be used
//! while building a process that isn't the currently active address space.

use crate::arch::StackOps;
use crate::config::{PAGE_SIZE, USER_STACK_SIZE, USER_STACK_TOP};
use crate::error::{Error, Result};
use crate::memory::page_table;
use crate::memory::pmm;
use crate::memory::{PageDirectory, PageFlags};
use crate::types::VirtAddr;

/// Hard cap on how far a process heap may grow past its start, so a runaway
/// `brk` request can't silently eat all of physical memory.
pub const USER_HEAP_MAX: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct UserHeap {
	pub start: VirtAddr,
	pub end: VirtAddr,
}

/// Map the first heap page and record the range. `vaddr_start` must be
/// page-aligned.
pub fn process_heap_init(pd: PageDirectory, vaddr_start: VirtAddr) -> Result<UserHeap> {
	let frame = pmm::allocate_frame()?;
	let flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER;
	if let Err(e) = page_table::map(pd, vaddr_start, frame, flags) {
		pmm::free_frame(frame);
		return Err(e);
	}
	Ok(UserHeap {
		start: vaddr_start,
		end: vaddr_start + PAGE_SIZE,
	})
}

/// Grow (or shrink) the heap so that `end == target`, rounded up to a page
/// boundary, mapping one frame per new page. On failure the heap is left
/// extended only as far as frames were actually obtained — the caller rolls
/// back by calling this again with the previous `end`.
pub fn process_brk(pd: PageDirectory, heap: &mut UserHeap, target: VirtAddr) -> Result<()> {
	if target.as_usize() < heap.start.as_usize() {
		return Err(Error::InvalidArgument);
	}
	if target.as_usize() - heap.start.as_usize() > USER_HEAP_MAX {
		return Err(Error::OutOfMemory);
	}

	let aligned_target = VirtAddr::new((target.as_usize() + PAGE_SIZE - 1) & !(PAGE_SIZE - 1));

	if aligned_target.as_usize() > heap.end.as_usize() {
		let mut vaddr = heap.end;
		while vaddr.as_usize() < aligned_target.as_usize() {
			let frame = match pmm::allocate_frame() {
				Ok(f) => f,
				Err(e) => {
					heap.end = vaddr;
					return Err(e);
				}
			};
			let flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER;
			if let Err(e) = page_table::map(pd, vaddr, frame, flags) {
				pmm::free_frame(frame);
				heap.end = vaddr;
				return Err(e);
			}
			vaddr = vaddr + PAGE_SIZE;
		}
		heap.end = aligned_target;
	} else if aligned_target.as_usize() < heap.end.as_usize() {
		let mut vaddr = aligned_target;
		while vaddr.as_usize() < heap.end.as_usize() {
			if let Some(frame) = page_table::translate(pd, vaddr) {
				let _ = page_table::unmap(pd, vaddr);
				pmm::free_frame(frame);
			}
			vaddr = vaddr + PAGE_SIZE;
		}
		heap.end = aligned_target;
	}

	Ok(())
}

/// Incremental form of `brk`: grow/shrink by `delta` bytes, returning the
/// previous break address (Unix `sbrk` convention).
pub fn process_sbrk(pd: PageDirectory, heap: &mut UserHeap, delta: isize) -> Result<VirtAddr> {
	let old_end = heap.end;
	let target = if delta >= 0 {
		VirtAddr::new(old_end.as_usize() + delta as usize)
	} else {
		let shrink = (-delta) as usize;
		if shrink > old_end.as_usize() - heap.start.as_usize() {
			return Err(Error::InvalidArgument);
		}
		VirtAddr::new(old_end.as_usize() - shrink)
	};
	process_brk(pd, heap, target)?;
	Ok(old_end)
}

#[derive(Debug, Clone, Copy)]
pub struct UserStack {
	pub top: VirtAddr,
	pub bottom: VirtAddr,
}

/// Map the fixed-size user stack high in the address space, then — with
/// `pd` temporarily active — write the exit-handler return address at the
/// very top of the stack as the sentinel the process "returns" into when
/// its entry function returns. Control is handed back to whatever address
/// space was active before this call.
pub fn process_stack_init(pd: PageDirectory, exit_handler: u32) -> Result<UserStack> {
	let top = VirtAddr::new(USER_STACK_TOP);
	let bottom = VirtAddr::new(USER_STACK_TOP - USER_STACK_SIZE);

	let mut mapped = alloc::vec::Vec::new();
	let mut vaddr = bottom;
	while vaddr.as_usize() < top.as_usize() {
		let frame = match pmm::allocate_frame() {
			Ok(f) => f,
			Err(e) => {
				rollback(pd, &mapped);
				return Err(e);
			}
		};
		let flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER;
		if let Err(e) = page_table::map(pd, vaddr, frame, flags) {
			pmm::free_frame(frame);
			rollback(pd, &mapped);
			return Err(e);
		}
		mapped.push(vaddr);
		vaddr = vaddr + PAGE_SIZE;
	}

	let previous = page_table::current();
	page_table::switch_to(pd);
	unsafe {
		crate::arch::ARCH.write_word(top.as_usize() - 4, exit_handler);
	}
	page_table::switch_to(previous);

	Ok(UserStack {
		top: VirtAddr::new(top.as_usize() - 4),
		bottom,
	})
}

fn rollback(pd: PageDirectory, mapped: &[VirtAddr]) {
	for &vaddr in mapped {
		if let Some(frame) = page_table::translate(pd, vaddr) {
			let _ = page_table::unmap(pd, vaddr);
			pmm::free_frame(frame);
		}
	}
}
