// SPDX-License-Identifier: GPL-2.0

//! 32-bit two-level page-table manager: page directory (1024 entries) over
//! page tables (1024 entries), 4 KiB pages. Kernel high-half (>= 3 GiB,
//! directory indices 768..1024) is pre-populated once at init and shared by
//! every address space created afterwards, so a switch never loses
//! visibility of kernel code, heap, and data.

use crate::arch::{PagingOps, ARCH};
use crate::config::{KERNEL_BASE, PAGE_SIZE};
use crate::error::{Error, Result};
use crate::memory::pmm;
use crate::memory::PageFlags;
use crate::sync::Spinlock;
use crate::types::{PhysAddr, VirtAddr};

const ENTRIES: usize = 1024;
const KERNEL_DIR_START: usize = KERNEL_BASE >> 22; // 768

fn dir_index(vaddr: VirtAddr) -> usize {
	(vaddr.as_usize() >> 22) & 0x3FF
}

fn table_index(vaddr: VirtAddr) -> usize {
	(vaddr.as_usize() >> 12) & 0x3FF
}

fn entry_addr(entry: u32) -> PhysAddr {
	PhysAddr::new((entry & !0xFFF) as usize)
}

fn entry_present(entry: u32) -> bool {
	entry & 1 != 0
}

fn table_ptr(phys: PhysAddr) -> *mut u32 {
	phys.as_usize() as *mut u32
}

fn zero_table(phys: PhysAddr) {
	let ptr = table_ptr(phys);
	unsafe {
		core::ptr::write_bytes(ptr, 0, ENTRIES);
	}
}

unsafe fn read_entry(table: PhysAddr, index: usize) -> u32 {
	core::ptr::read_volatile(table_ptr(table).add(index))
}

unsafe fn write_entry(table: PhysAddr, index: usize, value: u32) {
	core::ptr::write_volatile(table_ptr(table).add(index), value);
}

/// A handle to one address space's page directory. Cheap to copy; callers
/// should treat it as an opaque token rather than dereference the address
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDirectory {
	phys: PhysAddr,
}

impl PageDirectory {
	pub fn phys_addr(self) -> PhysAddr {
		self.phys
	}
}

struct Manager {
	kernel_dir: Option<PageDirectory>,
	current: PhysAddr,
}

impl Manager {
	const fn empty() -> Self {
		Self {
			kernel_dir: None,
			current: PhysAddr::new(0),
		}
	}
}

static MANAGER: Spinlock<Manager> = Spinlock::new(Manager::empty());

/// Bring up the kernel's own page directory: allocate it, and pre-allocate
/// a second-level page table for every directory slot in the kernel half
/// (indices 768..1024) so later kernel mappings (heap growth, new drivers)
/// never need a new directory entry that user address spaces created
/// earlier would be missing.
pub fn init() -> Result<()> {
	let dir_phys = pmm::allocate_frame()?;
	zero_table(dir_phys);

	for idx in KERNEL_DIR_START..ENTRIES {
		let table_phys = match pmm::allocate_frame() {
			Ok(p) => p,
			Err(e) => {
				free_dir_tables(dir_phys, KERNEL_DIR_START, idx);
				pmm::free_frame(dir_phys);
				return Err(e);
			}
		};
		zero_table(table_phys);
		unsafe {
			write_entry(
				dir_phys,
				idx,
				(table_phys.as_usize() as u32) | PageFlags::PRESENT.as_raw() | PageFlags::WRITABLE.as_raw(),
			);
		}
	}

	let mut mgr = MANAGER.lock();
	mgr.kernel_dir = Some(PageDirectory { phys: dir_phys });
	mgr.current = dir_phys;
	crate::info!("Page directory initialized, kernel half shared at index {}", KERNEL_DIR_START);
	Ok(())
}

fn free_dir_tables(dir: PhysAddr, start: usize, end: usize) {
	for idx in start..end {
		let entry = unsafe { read_entry(dir, idx) };
		if entry_present(entry) {
			pmm::free_frame(entry_addr(entry));
		}
	}
}

pub fn kernel_directory() -> PageDirectory {
	MANAGER.lock().kernel_dir.expect("page tables not initialized")
}

/// Create a fresh address space: a new directory with the user half empty
/// and the kernel half entries copied verbatim from the kernel directory.
pub fn create_address_space() -> Result<PageDirectory> {
	let kernel_dir = kernel_directory();
	let dir_phys = pmm::allocate_frame()?;
	zero_table(dir_phys);
	unsafe {
		for idx in KERNEL_DIR_START..ENTRIES {
			let entry = read_entry(kernel_dir.phys, idx);
			write_entry(dir_phys, idx, entry);
		}
	}
	Ok(PageDirectory { phys: dir_phys })
}

/// Tear down an address space: free every present user-half page-table
/// frame and the directory itself. Does NOT free the physical frames the
/// page tables pointed at — the caller (`Process_Destroy`) must unmap each
/// user mapping first so those frames are returned to the PMM individually.
pub fn destroy_address_space(pd: PageDirectory) {
	free_dir_tables(pd.phys, 0, KERNEL_DIR_START);
	pmm::free_frame(pd.phys);
}

/// Map `vaddr` to `paddr` with `flags`, allocating an intermediate
/// page-table frame on demand if this is the first mapping in that 4 MiB
/// range.
pub fn map(pd: PageDirectory, vaddr: VirtAddr, paddr: PhysAddr, flags: PageFlags) -> Result<()> {
	let d_idx = dir_index(vaddr);
	let t_idx = table_index(vaddr);

	let dir_entry = unsafe { read_entry(pd.phys, d_idx) };
	let table_phys = if entry_present(dir_entry) {
		entry_addr(dir_entry)
	} else {
		let table_phys = pmm::allocate_frame()?;
		zero_table(table_phys);
		unsafe {
			write_entry(
				pd.phys,
				d_idx,
				(table_phys.as_usize() as u32)
					| PageFlags::PRESENT.as_raw()
					| PageFlags::WRITABLE.as_raw()
					| PageFlags::USER.as_raw(),
			);
		}
		table_phys
	};

	unsafe {
		write_entry(table_phys, t_idx, (paddr.as_usize() as u32) | flags.as_raw());
	}
	Ok(())
}

/// Unmap `vaddr`, invalidating its TLB entry. Returns `Err(NotFound)` if
/// nothing was mapped there.
pub fn unmap(pd: PageDirectory, vaddr: VirtAddr) -> Result<()> {
	let d_idx = dir_index(vaddr);
	let t_idx = table_index(vaddr);

	let dir_entry = unsafe { read_entry(pd.phys, d_idx) };
	if !entry_present(dir_entry) {
		return Err(Error::NotFound);
	}
	let table_phys = entry_addr(dir_entry);
	let pte = unsafe { read_entry(table_phys, t_idx) };
	if !entry_present(pte) {
		return Err(Error::NotFound);
	}
	unsafe {
		write_entry(table_phys, t_idx, 0);
		ARCH.invalidate_page(vaddr.as_usize());
	}
	Ok(())
}

/// Walk `pd` to find the physical address `vaddr` currently maps to.
pub fn translate(pd: PageDirectory, vaddr: VirtAddr) -> Option<PhysAddr> {
	let d_idx = dir_index(vaddr);
	let t_idx = table_index(vaddr);

	let dir_entry = unsafe { read_entry(pd.phys, d_idx) };
	if !entry_present(dir_entry) {
		return None;
	}
	let table_phys = entry_addr(dir_entry);
	let pte = unsafe { read_entry(table_phys, t_idx) };
	if !entry_present(pte) {
		return None;
	}
	let offset = vaddr.as_usize() & 0xFFF;
	Some(entry_addr(pte) + offset)
}

/// Switch the active address space. A CR3 reload is a full TLB flush.
pub fn switch_to(pd: PageDirectory) {
	unsafe {
		ARCH.load_directory(pd.phys);
	}
	MANAGER.lock().current = pd.phys;
}

pub fn current() -> PageDirectory {
	PageDirectory {
		phys: MANAGER.lock().current,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dir_and_table_index_decompose_vaddr() {
		let v = VirtAddr::new(0xC100_1234);
		assert_eq!(dir_index(v), 0xC100_1234usize >> 22);
		assert_eq!(table_index(v), (0xC100_1234usize >> 12) & 0x3FF);
	}

	#[test]
	fn kernel_dir_start_matches_kernel_base() {
		assert_eq!(KERNEL_DIR_START, 768);
	}
}
