// SPDX-License-Identifier: GPL-2.0

//! Dynamic library subsystem: ELF symbol-table extraction, the cross-module
//! global symbol registry, and `R_386_*` relocation application.
//!
//! Replaces the Linux-LKM-style `module_loader.rs` (init/cleanup function
//! pointers, refcounted dependency graph) outright — that solves a different
//! problem (loadable kernel modules) than this one (ELF symbol resolution and
//! relocation). The `BTreeMap`-keyed `Spinlock`-guarded global-registry
//! pattern is kept; the payload becomes `(name, address, source module,
//! kernel-or-library)` tuples instead of module lifecycle state.
//!
//! Symbol discovery walks formal relocation sections (`SHT_REL` /
//! `Elf32_Rel`) exclusively, never instruction scanning.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::config::MAX_SYMBOLS;
use crate::error::{Error, Result};
use crate::sync::Spinlock;

const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_REL: u32 = 9;
const SHT_DYNSYM: u32 = 11;

const SHDR_SIZE: usize = 40;
const SYM_SIZE: usize = 16;
const REL_SIZE: usize = 8;

const STB_LOCAL: u8 = 0;
const SHN_UNDEF: u16 = 0;

pub const R_386_NONE: u32 = 0;
pub const R_386_32: u32 = 1;
pub const R_386_PC32: u32 = 2;
pub const R_386_GLOB_DAT: u32 = 6;
pub const R_386_JMP_SLOT: u32 = 7;
pub const R_386_RELATIVE: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolOrigin {
	Kernel,
	Library,
}

#[derive(Debug, Clone)]
pub struct SymbolEntry {
	pub address: u32,
	pub source_module: String,
	pub origin: SymbolOrigin,
}

static SYMBOLS: Spinlock<BTreeMap<String, SymbolEntry>> = Spinlock::new(BTreeMap::new());

/// Publish `name` at `address`, attributed to `module`. Append-only: once
/// the load phase is done, readers see a stable snapshot. A full table is a
/// resource-exhaustion error.
pub fn publish_symbol(name: &str, address: u32, module: &str, origin: SymbolOrigin) -> Result<()> {
	let mut symbols = SYMBOLS.lock();
	if symbols.len() >= MAX_SYMBOLS && !symbols.contains_key(name) {
		return Err(Error::TableFull);
	}
	symbols.insert(
		name.to_string(),
		SymbolEntry {
			address,
			source_module: module.to_string(),
			origin,
		},
	);
	Ok(())
}

pub fn resolve_symbol(name: &str) -> Option<SymbolEntry> {
	SYMBOLS.lock().get(name).cloned()
}

pub fn symbol_count() -> usize {
	SYMBOLS.lock().len()
}

struct SectionHeader {
	sh_name: u32,
	sh_type: u32,
	sh_offset: u32,
	sh_size: u32,
	sh_link: u32,
	sh_entsize: u32,
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
	u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
	u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}

fn parse_section_header(buf: &[u8]) -> SectionHeader {
	SectionHeader {
		sh_name: read_u32(buf, 0),
		sh_type: read_u32(buf, 4),
		sh_offset: read_u32(buf, 16),
		sh_size: read_u32(buf, 20),
		sh_link: read_u32(buf, 24),
		sh_entsize: read_u32(buf, 36),
	}
}

fn section_headers(image: &[u8]) -> Result<Vec<SectionHeader>> {
	if image.len() < 52 {
		return Err(Error::CorruptMedium);
	}
	let e_shoff = read_u32(image, 32) as usize;
	let e_shentsize = read_u16(image, 46) as usize;
	let e_shnum = read_u16(image, 48) as usize;
	if e_shnum == 0 || e_shentsize != SHDR_SIZE {
		return Err(Error::CorruptMedium);
	}
	let mut headers = Vec::with_capacity(e_shnum);
	for i in 0..e_shnum {
		let off = e_shoff + i * e_shentsize;
		if off + SHDR_SIZE > image.len() {
			return Err(Error::CorruptMedium);
		}
		headers.push(parse_section_header(&image[off..off + SHDR_SIZE]));
	}
	Ok(headers)
}

fn name_at(strtab: &[u8], offset: u32) -> String {
	let start = offset as usize;
	if start >= strtab.len() {
		return String::new();
	}
	let end = strtab[start..].iter().position(|&b| b == 0).map(|p| start + p).unwrap_or(strtab.len());
	String::from_utf8_lossy(&strtab[start..end]).into_owned()
}

struct ExtractedSymbol {
	name: String,
	address: u32,
}

/// Find `.symtab`/`.strtab`, falling back to `.dynsym`/`.dynstr`, and
/// extract every non-local symbol with a defined section index. Runtime
/// address is `load_base + (st_value - link_base)`.
fn extract_symbols(image: &[u8], headers: &[SectionHeader], load_base: u32, link_base: u32) -> Vec<ExtractedSymbol> {
	let symtab_idx = headers
		.iter()
		.position(|h| h.sh_type == SHT_SYMTAB)
		.or_else(|| headers.iter().position(|h| h.sh_type == SHT_DYNSYM));
	let Some(symtab_idx) = symtab_idx else {
		return Vec::new();
	};
	let symtab = &headers[symtab_idx];
	let strtab_idx = symtab.sh_link as usize;
	let Some(strtab_hdr) = headers.get(strtab_idx) else {
		return Vec::new();
	};

	let strtab_start = strtab_hdr.sh_offset as usize;
	let strtab_end = strtab_start + strtab_hdr.sh_size as usize;
	if strtab_end > image.len() {
		return Vec::new();
	}
	let strtab = &image[strtab_start..strtab_end];

	let sym_start = symtab.sh_offset as usize;
	let entsize = if symtab.sh_entsize as usize == 0 { SYM_SIZE } else { symtab.sh_entsize as usize };
	let count = symtab.sh_size as usize / entsize;

	let mut out = Vec::new();
	for i in 0..count {
		let off = sym_start + i * entsize;
		if off + SYM_SIZE > image.len() {
			break;
		}
		let entry = &image[off..off + SYM_SIZE];
		let st_name = read_u32(entry, 0);
		let st_value = read_u32(entry, 4);
		let st_info = entry[12];
		let st_shndx = read_u16(entry, 14);

		let bind = st_info >> 4;
		if bind == STB_LOCAL || st_shndx == SHN_UNDEF {
			continue;
		}
		let name = name_at(strtab, st_name);
		if name.is_empty() {
			continue;
		}
		out.push(ExtractedSymbol {
			name,
			address: load_base.wrapping_add(st_value.wrapping_sub(link_base)),
		});
	}
	out
}

/// Detect the link-time base: the entry point masked to 64 KiB alignment,
/// falling back to the first `PT_LOAD` segment's virtual address.
pub fn detect_link_base(entry: u32, first_load_vaddr: Option<u32>) -> u32 {
	let masked = entry & !0xFFFF;
	if masked != 0 {
		masked
	} else {
		first_load_vaddr.unwrap_or(0)
	}
}

#[derive(Debug, Clone)]
pub struct LibraryModule {
	pub name: String,
	pub load_base: u32,
	pub entry_point: u32,
	pub size: u32,
	pub dependencies: Vec<String>,
	pub exports: Vec<(String, u32)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelocStats {
	pub applied: usize,
	pub plt_warnings: usize,
}

/// Load a module's symbol table and publish its exports into the global
/// registry. `image` is the module's file bytes, addressed 1:1 against its
/// link-time virtual layout (`image[0]` == `link_base`). Does not apply
/// relocations; call [`apply_relocations`] afterward once every
/// dependency's exports are published.
pub fn load_module_symbols(
	image: &[u8],
	name: &str,
	load_base: u32,
	entry_point: u32,
	dependencies: Vec<String>,
) -> Result<LibraryModule> {
	let headers = section_headers(image)?;
	let link_base = detect_link_base(entry_point, None);
	let extracted = extract_symbols(image, &headers, load_base, link_base);

	let mut exports = Vec::with_capacity(extracted.len());
	for sym in &extracted {
		publish_symbol(&sym.name, sym.address, name, SymbolOrigin::Library)?;
		exports.push((sym.name.clone(), sym.address));
	}

	Ok(LibraryModule {
		name: name.to_string(),
		load_base,
		entry_point,
		size: image.len() as u32,
		dependencies,
		exports,
	})
}

/// Apply every relocation in a single `SHT_REL` section to `image`.
/// `symbol_for` resolves a symbol-table index to its runtime address
/// (looked up through the global registry by the caller).
///
/// - `R_386_NONE`: skipped.
/// - `R_386_RELATIVE`: adds `load_base - link_base` to the existing word,
///   unless that word already falls inside `[load_base, load_base+size)` —
///   treated as already relocated.
/// - `R_386_32`: writes `symbol_addr + addend`.
/// - `R_386_PC32`: writes `symbol_addr + addend - relocation_target`.
/// - `R_386_GLOB_DAT`/`R_386_JMP_SLOT`: writes `symbol_addr`.
///
/// Unresolved PLT symbols (`is_plt == true`) are counted as warnings and
/// skipped; an unresolved symbol in any other relocation section is fatal.
pub fn apply_relocations(
	image: &mut [u8],
	rel_section_offset: u32,
	rel_section_size: u32,
	link_base: u32,
	load_base: u32,
	module_size: u32,
	is_plt: bool,
	symbol_for: impl Fn(u32) -> Option<u32>,
) -> Result<RelocStats> {
	let mut stats = RelocStats::default();
	let start = rel_section_offset as usize;
	let count = rel_section_size as usize / REL_SIZE;
	let delta = load_base.wrapping_sub(link_base);

	for i in 0..count {
		let off = start + i * REL_SIZE;
		if off + REL_SIZE > image.len() {
			return Err(Error::CorruptMedium);
		}
		let r_offset = read_u32(&image[off..off + REL_SIZE], 0);
		let r_info = read_u32(&image[off..off + REL_SIZE], 4);
		let sym_index = r_info >> 8;
		let rel_type = r_info & 0xFF;

		let target_off = r_offset.wrapping_sub(link_base) as usize;
		if target_off + 4 > image.len() {
			return Err(Error::CorruptMedium);
		}

		if rel_type == R_386_NONE {
			continue;
		}

		let existing = read_u32(image, target_off);

		let new_value = match rel_type {
			R_386_RELATIVE => {
				if existing >= load_base && existing < load_base.wrapping_add(module_size) {
					existing
				} else {
					existing.wrapping_add(delta)
				}
			}
			R_386_32 | R_386_PC32 | R_386_GLOB_DAT | R_386_JMP_SLOT => {
				let Some(symbol_addr) = symbol_for(sym_index) else {
					if is_plt {
						stats.plt_warnings += 1;
						continue;
					} else {
						return Err(Error::UnresolvedSymbol);
					}
				};
				match rel_type {
					R_386_32 => symbol_addr.wrapping_add(existing),
					R_386_PC32 => symbol_addr.wrapping_add(existing).wrapping_sub(r_offset),
					_ => symbol_addr,
				}
			}
			_ => {
				if is_plt {
					stats.plt_warnings += 1;
					continue;
				}
				return Err(Error::UnresolvedSymbol);
			}
		};

		image[target_off..target_off + 4].copy_from_slice(&new_value.to_le_bytes());
		stats.applied += 1;
	}

	Ok(stats)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn publish_and_resolve_round_trip() {
		publish_symbol("printf", 0x1000, "libc", SymbolOrigin::Library).unwrap();
		let entry = resolve_symbol("printf").unwrap();
		assert_eq!(entry.address, 0x1000);
		assert_eq!(entry.source_module, "libc");
	}

	#[test]
	fn link_base_falls_back_to_first_load_segment() {
		assert_eq!(detect_link_base(0, Some(0x0804_8000)), 0x0804_8000);
		assert_eq!(detect_link_base(0x0804_8123, None), 0x0804_8000);
	}

	#[test]
	fn glob_dat_writes_absolute_symbol_address() {
		let mut image = alloc::vec![0u8; 64];
		// one R_386_GLOB_DAT relocation at link-relative offset 0x10,
		// targeting symbol index 1.
		let rel_off = 16usize;
		image[rel_off..rel_off + 4].copy_from_slice(&0x10u32.to_le_bytes());
		image[rel_off + 4..rel_off + 8].copy_from_slice(&((1u32 << 8) | R_386_GLOB_DAT).to_le_bytes());

		let stats = apply_relocations(&mut image, rel_off as u32, REL_SIZE as u32, 0, 0, 64, false, |idx| {
			if idx == 1 {
				Some(0xDEAD_BEEF)
			} else {
				None
			}
		})
		.unwrap();

		assert_eq!(stats.applied, 1);
		assert_eq!(read_u32(&image, 0x10), 0xDEAD_BEEF);
	}

	#[test]
	fn unresolved_kernel_relocation_is_fatal() {
		let mut image = alloc::vec![0u8; 32];
		image[0..4].copy_from_slice(&0u32.to_le_bytes());
		image[4..8].copy_from_slice(&((3u32 << 8) | R_386_32).to_le_bytes());
		let result = apply_relocations(&mut image, 0, REL_SIZE as u32, 0, 0, 32, false, |_| None);
		assert_eq!(result, Err(Error::UnresolvedSymbol));
	}

	#[test]
	fn unresolved_plt_relocation_is_a_warning_not_fatal() {
		let mut image = alloc::vec![0u8; 32];
		image[0..4].copy_from_slice(&0u32.to_le_bytes());
		image[4..8].copy_from_slice(&((3u32 << 8) | R_386_JMP_SLOT).to_le_bytes());
		let stats = apply_relocations(&mut image, 0, REL_SIZE as u32, 0, 0, 32, true, |_| None).unwrap();
		assert_eq!(stats.plt_warnings, 1);
		assert_eq!(stats.applied, 0);
	}

	#[test]
	fn relative_reloc_skips_already_relocated_value() {
		let mut image = alloc::vec![0u8; 16];
		// existing value already inside [load_base, load_base+size)
		image[0..4].copy_from_slice(&0x2000u32.to_le_bytes());
		image[4..8].copy_from_slice(&((0u32 << 8) | R_386_RELATIVE).to_le_bytes());
		apply_relocations(&mut image, 0, REL_SIZE as u32, 0x1000, 0x2000, 0x1000, false, |_| None).unwrap();
		assert_eq!(read_u32(&image, 0), 0x2000);
	}
}
