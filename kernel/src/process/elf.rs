// SPDX-License-Identifier: GPL-2.0

//! ELF32 process loader.
//!
//! The original `SimpleElfHeader` placeholder didn't match the real ELF32
//! layout; this is rewritten against
//! `other_examples/ccbb18a0_maestro-os-maestro__kernel-src-process-exec-elf.rs.rs`
//! for real `Elf32_Ehdr`/`Elf32_Phdr` field semantics, while keeping the
//! page-mapping-loop idiom from the original `setup_user_address_space`.

use alloc::vec;

use crate::config::PAGE_SIZE;
use crate::error::{Error, Result};
use crate::memory::page_table;
use crate::memory::pmm;
use crate::memory::PageFlags;
use crate::process::{self, Pcb};
use crate::types::{Pid, VirtAddr};
use crate::vfs;

const EI_NIDENT: usize = 16;
const ELFMAG: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const EM_386: u16 = 3;
const ET_EXEC: u16 = 2;

const PT_LOAD: u32 = 1;

const PHDR_SIZE: usize = 32;
const EHDR_SIZE: usize = 52;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Elf32Header {
	e_type: u16,
	e_entry: u32,
	e_phoff: u32,
	e_phentsize: u16,
	e_phnum: u16,
}

fn parse_header(buf: &[u8]) -> Result<Elf32Header> {
	if buf.len() < EHDR_SIZE {
		return Err(Error::CorruptMedium);
	}
	if buf[0..4] != ELFMAG {
		return Err(Error::CorruptMedium);
	}
	if buf[4] != ELFCLASS32 {
		return Err(Error::CorruptMedium);
	}
	if buf[5] != ELFDATA2LSB {
		return Err(Error::CorruptMedium);
	}

	let e_type = u16::from_le_bytes([buf[16], buf[17]]);
	let e_machine = u16::from_le_bytes([buf[18], buf[19]]);
	if e_machine != EM_386 {
		return Err(Error::CorruptMedium);
	}

	let e_entry = u32::from_le_bytes(buf[24..28].try_into().unwrap());
	let e_phoff = u32::from_le_bytes(buf[EI_NIDENT + 12..EI_NIDENT + 16].try_into().unwrap());
	let e_phentsize = u16::from_le_bytes([buf[42], buf[43]]);
	let e_phnum = u16::from_le_bytes([buf[44], buf[45]]);

	if e_phentsize as usize != PHDR_SIZE || e_phnum == 0 {
		return Err(Error::CorruptMedium);
	}

	Ok(Elf32Header {
		e_type,
		e_entry,
		e_phoff,
		e_phentsize,
		e_phnum,
	})
}

#[derive(Debug, Clone, Copy)]
struct ProgramHeader {
	p_type: u32,
	p_offset: u32,
	p_vaddr: u32,
	p_filesz: u32,
	p_memsz: u32,
}

fn parse_program_header(buf: &[u8]) -> ProgramHeader {
	ProgramHeader {
		p_type: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
		p_offset: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
		p_vaddr: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
		p_filesz: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
		p_memsz: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
	}
}

const BOUNCE_CHUNK: usize = 512;

/// Map every 4 KiB page of `[vaddr & ~0xFFF, vaddr + memsz)` RW/user in
/// `pd`. On any allocation failure every page mapped so far by this call is
/// rolled back before returning the error (the caller then destroys the
/// whole PCB, which unwinds everything else).
fn map_segment(pd: crate::memory::PageDirectory, vaddr: u32, memsz: u32) -> Result<()> {
	let start = (vaddr as usize) & !(PAGE_SIZE - 1);
	let end = vaddr as usize + memsz as usize;
	let mut mapped = vec![];

	let mut page = start;
	while page < end {
		let frame = match pmm::allocate_frame() {
			Ok(f) => f,
			Err(e) => {
				rollback(pd, &mapped);
				return Err(e);
			}
		};
		let flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER;
		if let Err(e) = page_table::map(pd, VirtAddr::new(page), frame, flags) {
			pmm::free_frame(frame);
			rollback(pd, &mapped);
			return Err(e);
		}
		mapped.push(VirtAddr::new(page));
		page += PAGE_SIZE;
	}
	Ok(())
}

fn rollback(pd: crate::memory::PageDirectory, mapped: &[VirtAddr]) {
	for &v in mapped {
		if let Some(frame) = page_table::translate(pd, v) {
			let _ = page_table::unmap(pd, v);
			pmm::free_frame(frame);
		}
	}
}

/// Copy `filesz` bytes from the open file at `p_offset` into `vaddr` inside
/// `pd`, then zero the BSS tail `[vaddr+filesz, vaddr+memsz)`. The
/// destination virtual range is only mapped in `pd`, so every chunk copy
/// (and the BSS zero) requires switching into `pd`, writing, and switching
/// back. Do not try to build a kernel-global scratch mapping instead.
fn copy_segment(file: &mut vfs::OpenFile, ph: &ProgramHeader, pd: crate::memory::PageDirectory) -> Result<()> {
	let previous = page_table::current();

	vfs::seek(file, ph.p_offset as u64)?;
	let mut remaining = ph.p_filesz as usize;
	let mut dest = ph.p_vaddr as usize;
	let mut chunk = [0u8; BOUNCE_CHUNK];

	while remaining > 0 {
		let n = remaining.min(BOUNCE_CHUNK);
		let read = vfs::read(file, &mut chunk[..n])?;
		if read == 0 {
			return Err(Error::CorruptMedium);
		}

		page_table::switch_to(pd);
		unsafe {
			core::ptr::copy_nonoverlapping(chunk.as_ptr(), dest as *mut u8, read);
		}
		page_table::switch_to(previous);

		dest += read;
		remaining -= read;
	}

	if ph.p_memsz > ph.p_filesz {
		let bss_start = ph.p_vaddr as usize + ph.p_filesz as usize;
		let bss_len = (ph.p_memsz - ph.p_filesz) as usize;
		page_table::switch_to(pd);
		unsafe {
			core::ptr::write_bytes(bss_start as *mut u8, 0, bss_len);
		}
		page_table::switch_to(previous);
	}

	Ok(())
}

/// Open `path` through the VFS, parse its ELF32 header, create a fresh
/// process and map+copy every `PT_LOAD` segment into it. On any failure the
/// half-built process is destroyed (which unwinds every mapping already
/// made) and the error is returned; the opened file is always closed.
pub fn elf_load_process(path: &str, kernel_mode: bool) -> Result<Pid> {
	let mut file = vfs::open(path, false)?;

	let result = (|| -> Result<Pid> {
		let mut header_buf = [0u8; EHDR_SIZE];
		vfs::seek(&mut file, 0)?;
		let n = vfs::read(&mut file, &mut header_buf)?;
		if n < EHDR_SIZE {
			return Err(Error::CorruptMedium);
		}
		let header = parse_header(&header_buf)?;
		if header.e_type != ET_EXEC {
			return Err(Error::CorruptMedium);
		}

		let pid = process::process_create(header.e_entry, kernel_mode)?;

		let load_result = (|| -> Result<()> {
			for i in 0..header.e_phnum {
				let off = header.e_phoff as u64 + i as u64 * header.e_phentsize as u64;
				vfs::seek(&mut file, off)?;
				let mut ph_buf = [0u8; PHDR_SIZE];
				let n = vfs::read(&mut file, &mut ph_buf)?;
				if n != PHDR_SIZE {
					return Err(Error::CorruptMedium);
				}
				let ph = parse_program_header(&ph_buf);
				if ph.p_type != PT_LOAD {
					continue;
				}

				let pd = process::with_pcb(pid, |p: &mut Pcb| p.address_space).ok_or(Error::ESRCH)?;
				map_segment(pd, ph.p_vaddr, ph.p_memsz)?;
				copy_segment(&mut file, &ph, pd)?;
			}
			Ok(())
		})();

		if let Err(e) = load_result {
			let _ = process::process_destroy(pid);
			return Err(e);
		}

		Ok(pid)
	})();

	vfs::close(file);
	result
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_header(phnum: u16, entry: u32, phoff: u32) -> [u8; EHDR_SIZE] {
		let mut buf = [0u8; EHDR_SIZE];
		buf[0..4].copy_from_slice(&ELFMAG);
		buf[4] = ELFCLASS32;
		buf[5] = ELFDATA2LSB;
		buf[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
		buf[18..20].copy_from_slice(&EM_386.to_le_bytes());
		buf[24..28].copy_from_slice(&entry.to_le_bytes());
		buf[EI_NIDENT + 12..EI_NIDENT + 16].copy_from_slice(&phoff.to_le_bytes());
		buf[42..44].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
		buf[44..46].copy_from_slice(&phnum.to_le_bytes());
		buf
	}

	#[test]
	fn rejects_bad_magic() {
		let mut buf = sample_header(1, 0x0804_8000, EHDR_SIZE as u32);
		buf[0] = 0;
		assert_eq!(parse_header(&buf), Err(Error::CorruptMedium));
	}

	#[test]
	fn rejects_wrong_machine() {
		let mut buf = sample_header(1, 0x0804_8000, EHDR_SIZE as u32);
		buf[18..20].copy_from_slice(&0u16.to_le_bytes());
		assert_eq!(parse_header(&buf), Err(Error::CorruptMedium));
	}

	#[test]
	fn parses_valid_header() {
		let buf = sample_header(2, 0x0804_8000, EHDR_SIZE as u32);
		let header = parse_header(&buf).unwrap();
		assert_eq!(header.e_entry, 0x0804_8000);
		assert_eq!(header.e_phnum, 2);
	}

	#[test]
	fn program_header_fields_decode() {
		let mut buf = [0u8; PHDR_SIZE];
		buf[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
		buf[4..8].copy_from_slice(&0u32.to_le_bytes());
		buf[8..12].copy_from_slice(&0x0804_8000u32.to_le_bytes());
		buf[16..20].copy_from_slice(&0x1000u32.to_le_bytes());
		buf[20..24].copy_from_slice(&0x2000u32.to_le_bytes());
		let ph = parse_program_header(&buf);
		assert_eq!(ph.p_type, PT_LOAD);
		assert_eq!(ph.p_vaddr, 0x0804_8000);
		assert_eq!(ph.p_filesz, 0x1000);
		assert_eq!(ph.p_memsz, 0x2000);
	}
}
