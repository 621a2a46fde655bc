// SPDX-License-Identifier: GPL-2.0

//! Memory management subsystem: physical frame allocator, page-table
//! manager, kernel heap, and per-process heap/stack mapping.

pub mod kheap;
pub mod pmm;
pub mod process_mem;

pub mod page_table;

pub use page_table::PageDirectory;

use alloc::string::String;

use crate::error::{Error, Result};
pub use crate::types::{Pfn, PhysAddr, VirtAddr};

bitflags::bitflags! {
	/// Page mapping permission bits. The architecture exposes at minimum
	/// {present, rw, user}; higher bits are reserved for future use.
	#[derive(Clone, Copy, PartialEq, Eq, Debug)]
	pub struct PageFlags: u32 {
		const PRESENT = 1 << 0;
		const WRITABLE = 1 << 1;
		const USER = 1 << 2;
	}
}

impl PageFlags {
	pub const fn new(flags: u32) -> Self {
		Self::from_bits_truncate(flags)
	}

	pub fn as_raw(self) -> u32 {
		self.bits()
	}
}

/// Bring up the memory subsystem: the PMM bitmap, the kernel's own page
/// directory (with kernel high-half mappings installed), and the kernel
/// heap. Must run after `arch::early_init` and before any allocation.
pub fn init(mem_upper_kib: Option<usize>) -> Result<()> {
	pmm::init(mem_upper_kib)?;
	page_table::init()?;
	kheap::init()?;
	crate::info!("Memory management initialized");
	Ok(())
}

/// Current PMM/page-table snapshot for diagnostics.
#[derive(Debug, Clone)]
pub struct MemoryInfo {
	pub total_frames: usize,
	pub free_frames: usize,
	pub used_frames: usize,
}

pub fn memory_info() -> MemoryInfo {
	let stats = pmm::stats();
	MemoryInfo {
		total_frames: stats.total,
		free_frames: stats.free,
		used_frames: stats.used,
	}
}

/// User-space pointer wrapper for kernel/user data transfer. Validation is
/// limited to null checks and range containment within user space; actual
/// page-fault recovery is left to the trap handler (out of scope here).
#[derive(Debug, Clone, Copy)]
pub struct UserPtr<T> {
	ptr: *mut T,
}

impl<T> UserPtr<T> {
	pub fn new(ptr: *mut T) -> Result<Self> {
		if ptr.is_null() {
			return Err(Error::InvalidArgument);
		}
		if (ptr as usize) >= crate::config::USER_SPACE_END {
			return Err(Error::InvalidArgument);
		}
		Ok(Self { ptr })
	}

	pub fn from_const(ptr: *const T) -> Result<Self> {
		Self::new(ptr as *mut T)
	}

	pub fn as_ptr(&self) -> *mut T {
		self.ptr
	}

	pub fn is_null(&self) -> bool {
		self.ptr.is_null()
	}
}

/// User-space byte-slice pointer.
#[derive(Debug, Clone, Copy)]
pub struct UserSlicePtr {
	ptr: *mut u8,
	len: usize,
}

impl UserSlicePtr {
	/// # Safety
	/// Caller must ensure `ptr..ptr+len` lies within the currently-active
	/// address space's user region.
	pub unsafe fn new(ptr: *mut u8, len: usize) -> Self {
		Self { ptr, len }
	}

	pub fn as_ptr(&self) -> *mut u8 {
		self.ptr
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}
}

/// Copy from a kernel slice into user space.
pub fn copy_to_user(user_ptr: UserSlicePtr, data: &[u8]) -> Result<()> {
	if user_ptr.ptr.is_null() {
		return Err(Error::InvalidArgument);
	}
	let n = core::cmp::min(user_ptr.len, data.len());
	unsafe {
		core::ptr::copy_nonoverlapping(data.as_ptr(), user_ptr.ptr, n);
	}
	Ok(())
}

/// Copy from user space into a kernel slice.
pub fn copy_from_user(data: &mut [u8], user_ptr: UserSlicePtr) -> Result<()> {
	if user_ptr.ptr.is_null() {
		return Err(Error::InvalidArgument);
	}
	let n = core::cmp::min(user_ptr.len, data.len());
	unsafe {
		core::ptr::copy_nonoverlapping(user_ptr.ptr, data.as_mut_ptr(), n);
	}
	Ok(())
}

/// Copy a NUL-terminated string out of user space, e.g. a syscall path
/// argument.
pub fn copy_string_from_user(user_ptr: UserPtr<u8>, max_len: usize) -> Result<String> {
	if user_ptr.ptr.is_null() {
		return Err(Error::InvalidArgument);
	}

	let mut buffer = alloc::vec![0u8; max_len];
	let mut len = 0;
	unsafe {
		for i in 0..max_len {
			let byte = *user_ptr.ptr.add(i);
			if byte == 0 {
				break;
			}
			buffer[i] = byte;
			len += 1;
		}
	}
	buffer.truncate(len);
	String::from_utf8(buffer).map_err(|_| Error::InvalidArgument)
}
