// SPDX-License-Identifier: GPL-2.0

//! FAT12/16/32 storage engine: a single process-wide instance wrapping one
//! mounted partition at a time, reached only through the [`FatOps`] `FsOps`
//! implementor so the VFS never sees FAT internals.
//!
//! Cluster-chain idiom grounded on
//! `other_examples/af9c6e96_vsrinivas-fuchsia__...-fatfs-src-fs.rs.rs`.

pub mod bpb;

use alloc::string::String;
use alloc::vec::Vec;

use crate::block::Partition;
use crate::config::{FAT32_ROOT_SIZE_CAP, FAT_CACHE_SECTORS, FAT_MAX_SECTOR_ADVANCES, MAX_FAT_OPEN_FILES, SECTOR_SIZE};
use crate::error::{Error, Result};
use crate::sync::Spinlock;
use crate::vfs::{FsHandle, FsOps};

use bpb::{FatGeometry, FatType};

const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_ARCHIVE: u8 = 0x20;
const ATTR_LFN: u8 = 0x0F;

const ENTRY_FREE: u8 = 0x00;
const ENTRY_DELETED: u8 = 0xE5;

/// Either the FAT12/16 root (a fixed sector range) or any other directory
/// (a cluster chain, including the FAT32 root).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirLoc {
	FixedRoot { lba: u64, sectors: u32 },
	Cluster(u32),
}

struct DirCursor {
	loc: DirLoc,
	index: u32,
	cluster: u32,
	sector_in_cluster: u32,
}

impl DirCursor {
	fn new(loc: DirLoc) -> Self {
		let cluster = match loc {
			DirLoc::Cluster(c) => c,
			DirLoc::FixedRoot { .. } => 0,
		};
		Self {
			loc,
			index: 0,
			cluster,
			sector_in_cluster: 0,
		}
	}

	fn current_lba(&self, geometry: &FatGeometry) -> Option<u64> {
		match self.loc {
			DirLoc::FixedRoot { lba, sectors } => {
				if self.index < sectors {
					Some(lba + self.index as u64)
				} else {
					None
				}
			}
			DirLoc::Cluster(_) => {
				if geometry.is_eof_or_free(self.cluster) {
					None
				} else {
					Some(geometry.cluster_to_lba(self.cluster) + self.sector_in_cluster as u64)
				}
			}
		}
	}

	/// Move to the next sector. Returns `Ok(false)` when the directory is
	/// exhausted.
	fn advance(&mut self, state: &mut FatEngineState, partition: &Partition) -> Result<bool> {
		match self.loc {
			DirLoc::FixedRoot { sectors, .. } => {
				self.index += 1;
				Ok(self.index < sectors)
			}
			DirLoc::Cluster(_) => {
				self.sector_in_cluster += 1;
				if self.sector_in_cluster >= state.geometry.sectors_per_cluster as u32 {
					self.sector_in_cluster = 0;
					self.cluster = next_cluster(state, partition, self.cluster)?;
				}
				Ok(!state.geometry.is_eof_or_free(self.cluster))
			}
		}
	}
}

#[derive(Clone, Copy)]
struct RawDirEntry {
	name: [u8; 11],
	attr: u8,
	first_cluster: u32,
	size: u32,
}

fn parse_dir_entry(bytes: &[u8]) -> RawDirEntry {
	let mut name = [0u8; 11];
	name.copy_from_slice(&bytes[0..11]);
	let hi = u16::from_le_bytes([bytes[20], bytes[21]]);
	let lo = u16::from_le_bytes([bytes[26], bytes[27]]);
	RawDirEntry {
		name,
		attr: bytes[11],
		first_cluster: ((hi as u32) << 16) | lo as u32,
		size: u32::from_le_bytes([bytes[28], bytes[29], bytes[30], bytes[31]]),
	}
}

fn write_dir_entry_metadata(sector: &mut [u8], offset: usize, first_cluster: u32, size: u32) {
	sector[offset + 20..offset + 22].copy_from_slice(&((first_cluster >> 16) as u16).to_le_bytes());
	sector[offset + 26..offset + 28].copy_from_slice(&(first_cluster as u16).to_le_bytes());
	sector[offset + 28..offset + 32].copy_from_slice(&size.to_le_bytes());
}

fn to_83(component: &str) -> [u8; 11] {
	let mut out = [b' '; 11];
	let (base, ext) = match component.rfind('.') {
		Some(i) => (&component[..i], &component[i + 1..]),
		None => (component, ""),
	};
	for (i, b) in base.bytes().take(8).enumerate() {
		out[i] = b.to_ascii_uppercase();
	}
	for (i, b) in ext.bytes().take(3).enumerate() {
		out[8 + i] = b.to_ascii_uppercase();
	}
	out
}

fn is_dot_entry(name: &[u8; 11]) -> bool {
	name == b".          " || name == b"..         "
}

struct FatCache {
	first_sector: u32,
	data: [u8; FAT_CACHE_SECTORS * SECTOR_SIZE],
}

const CACHE_INVALID: u32 = 0xFFFF_FFFF;

impl FatCache {
	fn new() -> Self {
		Self {
			first_sector: CACHE_INVALID,
			data: [0u8; FAT_CACHE_SECTORS * SECTOR_SIZE],
		}
	}

	fn invalidate(&mut self) {
		self.first_sector = CACHE_INVALID;
	}
}

fn ensure_cached(state: &mut FatEngineState, partition: &Partition, rel_sector: u32, fat_copy: u32) -> Result<()> {
	let cache = &mut state.cache;
	if cache.first_sector != CACHE_INVALID && rel_sector >= cache.first_sector && rel_sector < cache.first_sector + FAT_CACHE_SECTORS as u32 {
		return Ok(());
	}
	let lba = state.geometry.fat_start_lba + fat_copy as u64 * state.geometry.sectors_per_fat as u64 + rel_sector as u64;
	let remaining = state.geometry.sectors_per_fat.saturating_sub(rel_sector);
	let count = FAT_CACHE_SECTORS.min(remaining.max(1) as usize) as u32;
	partition.read_sectors(lba, count, &mut cache.data[..count as usize * SECTOR_SIZE])?;
	cache.first_sector = rel_sector;
	Ok(())
}

fn read_fat_byte(state: &mut FatEngineState, partition: &Partition, rel_sector: u32, byte_in_sector: u32) -> Result<u8> {
	ensure_cached(state, partition, rel_sector, 0)?;
	let window_off = (rel_sector - state.cache.first_sector) as usize * SECTOR_SIZE + byte_in_sector as usize;
	Ok(state.cache.data[window_off])
}

fn next_cluster(state: &mut FatEngineState, partition: &Partition, cluster: u32) -> Result<u32> {
	if cluster < 2 {
		return Ok(1); // treated as EOF by is_eof_or_free
	}
	let bps = state.geometry.bytes_per_sector as u32;
	let byte_offset = match state.geometry.fat_type {
		FatType::Fat12 => cluster * 3 / 2,
		FatType::Fat16 => cluster * 2,
		FatType::Fat32 => cluster * 4,
	};
	let rel_sector = byte_offset / bps;
	let in_sector = byte_offset % bps;

	let value = match state.geometry.fat_type {
		FatType::Fat12 => {
			let b0 = read_fat_byte(state, partition, rel_sector, in_sector)? as u16;
			let b1 = if in_sector + 1 < bps {
				read_fat_byte(state, partition, rel_sector, in_sector + 1)? as u16
			} else {
				read_fat_byte(state, partition, rel_sector + 1, 0)? as u16
			};
			let raw16 = b0 | (b1 << 8);
			let raw = if cluster % 2 == 0 { raw16 & 0x0FFF } else { raw16 >> 4 };
			raw as u32
		}
		FatType::Fat16 => {
			let b0 = read_fat_byte(state, partition, rel_sector, in_sector)? as u32;
			let b1 = if in_sector + 1 < bps {
				read_fat_byte(state, partition, rel_sector, in_sector + 1)? as u32
			} else {
				read_fat_byte(state, partition, rel_sector + 1, 0)? as u32
			};
			b0 | (b1 << 8)
		}
		FatType::Fat32 => {
			let mut bytes = [0u8; 4];
			for i in 0..4u32 {
				let (s, o) = if in_sector + i < bps { (rel_sector, in_sector + i) } else { (rel_sector + 1, in_sector + i - bps) };
				bytes[i as usize] = read_fat_byte(state, partition, s, o)?;
			}
			u32::from_le_bytes(bytes) & 0x0FFF_FFFF
		}
	};
	Ok(value)
}

fn eoc_value(fat_type: FatType) -> u32 {
	match fat_type {
		FatType::Fat12 => 0x0FFF,
		FatType::Fat16 => 0xFFFF,
		FatType::Fat32 => 0x0FFF_FFFF,
	}
}

fn write_fat_entry(state: &mut FatEngineState, partition: &Partition, cluster: u32, value: u32) -> Result<()> {
	let bps = state.geometry.bytes_per_sector as u32;
	let byte_offset = match state.geometry.fat_type {
		FatType::Fat12 => cluster * 3 / 2,
		FatType::Fat16 => cluster * 2,
		FatType::Fat32 => cluster * 4,
	};
	let rel_sector = byte_offset / bps;
	let in_sector = (byte_offset % bps) as usize;

	for copy in 0..state.geometry.num_fats as u64 {
		let lba = state.geometry.fat_start_lba + copy * state.geometry.sectors_per_fat as u64 + rel_sector as u64;
		let mut sector = [0u8; SECTOR_SIZE];
		partition.read_sectors(lba, 1, &mut sector)?;

		let mut next_sector_buf: Option<[u8; SECTOR_SIZE]> = None;
		let crosses = in_sector + 1 >= bps as usize;
		if crosses {
			let mut nb = [0u8; SECTOR_SIZE];
			partition.read_sectors(lba + 1, 1, &mut nb)?;
			next_sector_buf = Some(nb);
		}

		match state.geometry.fat_type {
			FatType::Fat12 => {
				let old0 = sector[in_sector] as u16;
				let old1 = if crosses {
					next_sector_buf.unwrap()[0] as u16
				} else {
					sector[in_sector + 1] as u16
				};
				let old16 = old0 | (old1 << 8);
				let new16 = if cluster % 2 == 0 {
					(old16 & 0xF000) | (value as u16 & 0x0FFF)
				} else {
					(old16 & 0x000F) | ((value as u16 & 0x0FFF) << 4)
				};
				sector[in_sector] = (new16 & 0xFF) as u8;
				if crosses {
					let mut nb = next_sector_buf.unwrap();
					nb[0] = (new16 >> 8) as u8;
					partition.write_sectors(lba + 1, 1, &nb)?;
				} else {
					sector[in_sector + 1] = (new16 >> 8) as u8;
				}
			}
			FatType::Fat16 => {
				let bytes = (value as u16).to_le_bytes();
				sector[in_sector] = bytes[0];
				if crosses {
					let mut nb = next_sector_buf.unwrap();
					nb[0] = bytes[1];
					partition.write_sectors(lba + 1, 1, &nb)?;
				} else {
					sector[in_sector + 1] = bytes[1];
				}
			}
			FatType::Fat32 => {
				let masked = value & 0x0FFF_FFFF;
				let bytes = masked.to_le_bytes();
				for i in 0..4usize {
					if in_sector + i < bps as usize {
						sector[in_sector + i] = bytes[i];
					} else if let Some(ref mut nb) = next_sector_buf {
						nb[in_sector + i - bps as usize] = bytes[i];
					}
				}
				if let Some(nb) = next_sector_buf {
					partition.write_sectors(lba + 1, 1, &nb)?;
				}
			}
		}
		partition.write_sectors(lba, 1, &sector)?;
	}

	state.cache.invalidate();
	Ok(())
}

fn allocate_free_cluster(state: &mut FatEngineState, partition: &Partition) -> Result<u32> {
	let max = state.geometry.cluster_count + 2;
	let mut cluster = 2u32;
	while cluster < max {
		let v = next_cluster(state, partition, cluster)?;
		if v == 0 {
			return Ok(cluster);
		}
		cluster += 1;
	}
	Err(Error::ENOSPC)
}

fn zero_cluster(state: &FatEngineState, partition: &Partition, cluster: u32) -> Result<()> {
	let zero = [0u8; SECTOR_SIZE];
	let lba = state.geometry.cluster_to_lba(cluster);
	for i in 0..state.geometry.sectors_per_cluster as u64 {
		partition.write_sectors(lba + i, 1, &zero)?;
	}
	Ok(())
}

fn free_chain(state: &mut FatEngineState, partition: &Partition, first_cluster: u32) -> Result<()> {
	if first_cluster < 2 {
		return Ok(());
	}
	let mut cluster = first_cluster;
	loop {
		let next = next_cluster(state, partition, cluster)?;
		zero_cluster(state, partition, cluster)?;
		write_fat_entry(state, partition, cluster, 0)?;
		if state.geometry.is_eof_or_free(next) {
			break;
		}
		cluster = next;
	}
	Ok(())
}

fn root_dirloc(geometry: &FatGeometry) -> DirLoc {
	match geometry.fat_type {
		FatType::Fat32 => DirLoc::Cluster(geometry.root_cluster),
		_ => DirLoc::FixedRoot {
			lba: geometry.root_dir_lba,
			sectors: geometry.root_dir_sectors,
		},
	}
}

/// Find a child with the given 8.3 name in `loc`. Returns the sector LBA,
/// in-sector byte offset, and parsed entry.
fn find_entry(state: &mut FatEngineState, partition: &Partition, loc: DirLoc, name83: &[u8; 11]) -> Result<Option<(u64, usize, RawDirEntry)>> {
	let mut cursor = DirCursor::new(loc);
	loop {
		let lba = match cursor.current_lba(&state.geometry) {
			Some(l) => l,
			None => return Ok(None),
		};
		let mut sector = [0u8; SECTOR_SIZE];
		partition.read_sectors(lba, 1, &mut sector)?;

		for slot in 0..(SECTOR_SIZE / 32) {
			let off = slot * 32;
			if sector[off] == ENTRY_FREE {
				return Ok(None);
			}
			if sector[off] == ENTRY_DELETED {
				continue;
			}
			if sector[off + 11] == ATTR_LFN {
				continue;
			}
			let entry = parse_dir_entry(&sector[off..off + 32]);
			if &entry.name == name83 {
				return Ok(Some((lba, off, entry)));
			}
		}

		if !cursor.advance(state, partition)? {
			return Ok(None);
		}
	}
}

fn find_free_slot(state: &mut FatEngineState, partition: &Partition, loc: DirLoc) -> Result<Option<(u64, usize)>> {
	let mut cursor = DirCursor::new(loc);
	loop {
		let lba = match cursor.current_lba(&state.geometry) {
			Some(l) => l,
			None => return Ok(None),
		};
		let sector = {
			let mut buf = [0u8; SECTOR_SIZE];
			partition.read_sectors(lba, 1, &mut buf)?;
			buf
		};
		for slot in 0..(SECTOR_SIZE / 32) {
			let off = slot * 32;
			if sector[off] == ENTRY_FREE || sector[off] == ENTRY_DELETED {
				return Ok(Some((lba, off)));
			}
		}
		if !cursor.advance(state, partition)? {
			return Ok(None);
		}
	}
}

fn free_directory_recursive(state: &mut FatEngineState, partition: &Partition, cluster: u32) -> Result<()> {
	let mut cursor = DirCursor::new(DirLoc::Cluster(cluster));
	loop {
		let lba = match cursor.current_lba(&state.geometry) {
			Some(l) => l,
			None => break,
		};
		let mut sector = [0u8; SECTOR_SIZE];
		partition.read_sectors(lba, 1, &mut sector)?;

		let mut children = Vec::new();
		let mut stop = false;
		for slot in 0..(SECTOR_SIZE / 32) {
			let off = slot * 32;
			if sector[off] == ENTRY_FREE {
				stop = true;
				break;
			}
			if sector[off] == ENTRY_DELETED || sector[off + 11] == ATTR_LFN {
				continue;
			}
			let entry = parse_dir_entry(&sector[off..off + 32]);
			if is_dot_entry(&entry.name) {
				continue;
			}
			children.push(entry);
		}

		for child in children {
			if child.attr & ATTR_DIRECTORY != 0 {
				free_directory_recursive(state, partition, child.first_cluster)?;
			}
			free_chain(state, partition, child.first_cluster)?;
		}

		if stop || !cursor.advance(state, partition)? {
			break;
		}
	}
	Ok(())
}

fn resolve_parent<'a>(path: &'a str) -> (String, &'a str) {
	let trimmed = path.trim_start_matches('/');
	match trimmed.rfind('/') {
		Some(i) => (alloc::format!("/{}", &trimmed[..i]), &trimmed[i + 1..]),
		None => (String::from("/"), trimmed),
	}
}

fn walk_to_dirloc(state: &mut FatEngineState, partition: &Partition, path: &str) -> Result<DirLoc> {
	let mut loc = root_dirloc(&state.geometry);
	for component in path.trim_matches('/').split('/').filter(|c| !c.is_empty()) {
		let name83 = to_83(component);
		let (_, _, entry) = find_entry(state, partition, loc, &name83)?.ok_or(Error::ENOENT)?;
		if entry.attr & ATTR_DIRECTORY == 0 {
			return Err(Error::ENOTDIR);
		}
		loc = DirLoc::Cluster(entry.first_cluster);
	}
	Ok(loc)
}

#[derive(PartialEq, Clone, Copy)]
enum FileState {
	Fresh,
	Reading,
	Writing,
}

struct FatFile {
	in_use: bool,
	is_dir: bool,
	is_root: bool,
	current_cluster: u32,
	sector_in_cluster: u32,
	first_cluster: u32,
	truncated_once: bool,
	parent_loc: DirLoc,
	name83: [u8; 11],
	state: FileState,
	position: u64,
	size: u64,
}

impl FatFile {
	fn empty() -> Self {
		Self {
			in_use: false,
			is_dir: false,
			is_root: false,
			current_cluster: 0,
			sector_in_cluster: 0,
			first_cluster: 0,
			truncated_once: false,
			parent_loc: DirLoc::FixedRoot { lba: 0, sectors: 0 },
			name83: [0; 11],
			state: FileState::Fresh,
			position: 0,
			size: 0,
		}
	}
}

struct FatEngineState {
	geometry: FatGeometry,
	cache: FatCache,
	files: Vec<FatFile>,
}

static ENGINE: Spinlock<Option<FatEngineState>> = Spinlock::new(None);

/// Mount a partition: parse its boot sector and install it as the single
/// process-wide FAT engine instance. Returns the detected FAT type.
pub fn mount(partition: &Partition) -> Result<FatType> {
	let mut sector0 = [0u8; SECTOR_SIZE];
	partition.read_sectors(0, 1, &mut sector0)?;
	let geometry = bpb::parse(&sector0)?;

	let mut files = Vec::with_capacity(MAX_FAT_OPEN_FILES);
	for _ in 0..MAX_FAT_OPEN_FILES {
		files.push(FatFile::empty());
	}

	let fat_type = geometry.fat_type;
	*ENGINE.lock() = Some(FatEngineState {
		geometry,
		cache: FatCache::new(),
		files,
	});
	Ok(fat_type)
}

fn with_engine<R>(f: impl FnOnce(&mut FatEngineState) -> Result<R>) -> Result<R> {
	let mut guard = ENGINE.lock();
	let state = guard.as_mut().ok_or(Error::NotInitialized)?;
	f(state)
}

fn file_size_for(geometry: &FatGeometry, is_root: bool, entry_size: u32) -> u64 {
	if is_root && geometry.fat_type == FatType::Fat32 {
		FAT32_ROOT_SIZE_CAP as u64
	} else {
		entry_size as u64
	}
}

fn do_open(state: &mut FatEngineState, partition: &Partition, path: &str) -> Result<usize> {
	let trimmed = path.trim_matches('/');

	let (is_root, is_dir, first_cluster, size, parent_loc, name83) = if trimmed.is_empty() {
		(true, true, 0, 0u64, root_dirloc(&state.geometry), [0u8; 11])
	} else {
		let (parent_path, basename) = resolve_parent(path);
		let parent_loc = walk_to_dirloc(state, partition, &parent_path)?;
		let name83 = to_83(basename);
		let (_, _, entry) = find_entry(state, partition, parent_loc, &name83)?.ok_or(Error::ENOENT)?;
		let is_dir = entry.attr & ATTR_DIRECTORY != 0;
		(false, is_dir, entry.first_cluster, entry.size as u64, parent_loc, name83)
	};

	let slot = state.files.iter().position(|f| !f.in_use).ok_or(Error::TableFull)?;
	let cluster = if is_root {
		match root_dirloc(&state.geometry) {
			DirLoc::Cluster(c) => c,
			DirLoc::FixedRoot { .. } => 0,
		}
	} else {
		first_cluster
	};

	state.files[slot] = FatFile {
		in_use: true,
		is_dir,
		is_root,
		current_cluster: cluster,
		sector_in_cluster: 0,
		first_cluster: cluster,
		truncated_once: false,
		parent_loc,
		name83,
		state: FileState::Fresh,
		position: 0,
		size: file_size_for(&state.geometry, is_root, size as u32),
	};
	Ok(slot)
}

fn do_read(state: &mut FatEngineState, partition: &Partition, handle: usize, buf: &mut [u8]) -> Result<usize> {
	let geometry = state.geometry;
	let file = state.files.get(handle).ok_or(Error::EBADF)?;
	if file.is_dir {
		return Err(Error::EISDIR);
	}
	if file.position >= file.size {
		return Ok(0);
	}
	let want = core::cmp::min(buf.len() as u64, file.size - file.position) as usize;

	let mut cluster = file.current_cluster;
	let mut sector_in_cluster = file.sector_in_cluster;
	let mut position = file.position;
	let mut read_total = 0usize;
	let mut advances = 0usize;

	while read_total < want {
		let lba = geometry.cluster_to_lba(cluster) + sector_in_cluster as u64;
		let mut sector = [0u8; SECTOR_SIZE];
		partition.read_sectors(lba, 1, &mut sector)?;

		let in_sector = (position % SECTOR_SIZE as u64) as usize;
		let take = core::cmp::min(SECTOR_SIZE - in_sector, want - read_total);
		buf[read_total..read_total + take].copy_from_slice(&sector[in_sector..in_sector + take]);

		read_total += take;
		position += take as u64;

		if in_sector + take == SECTOR_SIZE && read_total < want {
			sector_in_cluster += 1;
			if sector_in_cluster >= geometry.sectors_per_cluster as u32 {
				sector_in_cluster = 0;
				cluster = next_cluster(state, partition, cluster)?;
				advances += 1;
				if advances > FAT_MAX_SECTOR_ADVANCES {
					return Err(Error::CorruptFilesystem);
				}
				if geometry.is_eof_or_free(cluster) {
					break;
				}
			}
		}
	}

	let file = &mut state.files[handle];
	file.current_cluster = cluster;
	file.sector_in_cluster = sector_in_cluster;
	file.position = position;
	file.state = FileState::Reading;
	Ok(read_total)
}

fn do_truncate_file(state: &mut FatEngineState, partition: &Partition, handle: usize) -> Result<()> {
	let first_cluster = state.files[handle].first_cluster;
	if first_cluster >= 2 {
		let next = next_cluster(state, partition, first_cluster)?;
		if !state.geometry.is_eof_or_free(next) {
			free_chain(state, partition, next)?;
		}
		let eoc = eoc_value(state.geometry.fat_type);
		write_fat_entry(state, partition, first_cluster, eoc)?;
	}
	let file = &mut state.files[handle];
	file.current_cluster = file.first_cluster;
	file.sector_in_cluster = 0;
	file.position = 0;
	file.size = 0;
	file.truncated_once = true;
	file.state = FileState::Fresh;
	persist_metadata(state, partition, handle)?;
	Ok(())
}

fn persist_metadata(state: &mut FatEngineState, partition: &Partition, handle: usize) -> Result<()> {
	let (parent_loc, name83, first_cluster, size) = {
		let f = &state.files[handle];
		(f.parent_loc, f.name83, f.first_cluster, f.size as u32)
	};
	if let Some((lba, off, _)) = find_entry(state, partition, parent_loc, &name83)? {
		let mut sector = [0u8; SECTOR_SIZE];
		partition.read_sectors(lba, 1, &mut sector)?;
		write_dir_entry_metadata(&mut sector, off, first_cluster, size);
		partition.write_sectors(lba, 1, &sector)?;
	}
	Ok(())
}

fn do_write(state: &mut FatEngineState, partition: &Partition, handle: usize, data: &[u8]) -> Result<usize> {
	{
		let file = state.files.get(handle).ok_or(Error::EBADF)?;
		if file.is_dir || file.is_root {
			return Err(Error::PermissionDenied);
		}
	}

	{
		let file = &state.files[handle];
		if matches!(file.state, FileState::Fresh | FileState::Reading) && file.position == 0 && file.size > 0 {
			do_truncate_file(state, partition, handle)?;
		}
	}

	state.files[handle].state = FileState::Writing;

	let mut written = 0usize;
	loop {
		let (cluster, sector_in_cluster, position) = {
			let f = &state.files[handle];
			(f.current_cluster, f.sector_in_cluster, f.position)
		};
		if written >= data.len() {
			break;
		}

		let lba = state.geometry.cluster_to_lba(cluster) + sector_in_cluster as u64;
		let mut sector = [0u8; SECTOR_SIZE];
		partition.read_sectors(lba, 1, &mut sector)?;

		let in_sector = (position % SECTOR_SIZE as u64) as usize;
		let take = core::cmp::min(SECTOR_SIZE - in_sector, data.len() - written);
		sector[in_sector..in_sector + take].copy_from_slice(&data[written..written + take]);
		partition.write_sectors(lba, 1, &sector)?;

		written += take;
		let new_position = position + take as u64;
		{
			let f = &mut state.files[handle];
			f.position = new_position;
			if f.position > f.size {
				f.size = f.position;
			}
		}

		if in_sector + take == SECTOR_SIZE && written < data.len() {
			let sic = sector_in_cluster + 1;
			if sic >= state.geometry.sectors_per_cluster as u32 {
				let new_cluster = allocate_free_cluster(state, partition)?;
				write_fat_entry(state, partition, cluster, new_cluster)?;
				let eoc = eoc_value(state.geometry.fat_type);
				write_fat_entry(state, partition, new_cluster, eoc)?;
				let f = &mut state.files[handle];
				f.current_cluster = new_cluster;
				f.sector_in_cluster = 0;
			} else {
				let f = &mut state.files[handle];
				f.sector_in_cluster = sic;
			}
		}
	}

	persist_metadata(state, partition, handle)?;
	Ok(written)
}

fn do_seek(state: &mut FatEngineState, partition: &Partition, handle: usize, pos: u64) -> Result<()> {
	let (size, first_cluster) = {
		let f = state.files.get(handle).ok_or(Error::EBADF)?;
		(f.size, f.first_cluster)
	};
	if pos > size {
		return Err(Error::InvalidArgument);
	}

	let target_sector = pos / SECTOR_SIZE as u64;
	let spc = state.geometry.sectors_per_cluster as u64;
	let mut cluster = first_cluster;
	let mut remaining = target_sector;
	let mut advances = 0usize;
	while remaining >= spc {
		cluster = next_cluster(state, partition, cluster)?;
		if state.geometry.is_eof_or_free(cluster) {
			break;
		}
		remaining -= spc;
		advances += 1;
		if advances > FAT_MAX_SECTOR_ADVANCES {
			return Err(Error::CorruptFilesystem);
		}
	}

	let f = &mut state.files[handle];
	f.current_cluster = cluster;
	f.sector_in_cluster = remaining as u32;
	f.position = pos;
	Ok(())
}

fn do_create(state: &mut FatEngineState, partition: &Partition, path: &str) -> Result<()> {
	let (parent_path, basename) = resolve_parent(path);
	let parent_loc = walk_to_dirloc(state, partition, &parent_path)?;
	let name83 = to_83(basename);

	if find_entry(state, partition, parent_loc, &name83)?.is_some() {
		return Err(Error::EEXIST);
	}

	let cluster = allocate_free_cluster(state, partition)?;
	let eoc = eoc_value(state.geometry.fat_type);
	write_fat_entry(state, partition, cluster, eoc)?;

	let (lba, off) = find_free_slot(state, partition, parent_loc)?.ok_or(Error::ENOSPC)?;
	let mut sector = [0u8; SECTOR_SIZE];
	partition.read_sectors(lba, 1, &mut sector)?;
	sector[off..off + 11].copy_from_slice(&name83);
	sector[off + 11] = ATTR_ARCHIVE;
	for b in &mut sector[off + 12..off + 20] {
		*b = 0;
	}
	write_dir_entry_metadata(&mut sector, off, cluster, 0);
	partition.write_sectors(lba, 1, &sector)?;
	Ok(())
}

fn do_delete(state: &mut FatEngineState, partition: &Partition, path: &str) -> Result<()> {
	let (parent_path, basename) = resolve_parent(path);
	let parent_loc = walk_to_dirloc(state, partition, &parent_path)?;
	let name83 = to_83(basename);

	let (lba, off, entry) = find_entry(state, partition, parent_loc, &name83)?.ok_or(Error::ENOENT)?;
	if entry.attr & ATTR_DIRECTORY != 0 {
		free_directory_recursive(state, partition, entry.first_cluster)?;
	}
	free_chain(state, partition, entry.first_cluster)?;

	let mut sector = [0u8; SECTOR_SIZE];
	partition.read_sectors(lba, 1, &mut sector)?;
	sector[off] = ENTRY_DELETED;
	partition.write_sectors(lba, 1, &sector)?;
	Ok(())
}

/// The `FsOps` implementor the VFS dispatches FAT-mounted partitions
/// through. Zero-sized; all state lives in the global `ENGINE` singleton.
pub struct FatOps;

pub static FAT_OPS: FatOps = FatOps;

impl FsOps for FatOps {
	fn open(&self, partition: &Partition, path: &str) -> Result<FsHandle> {
		with_engine(|state| do_open(state, partition, path)).map(FsHandle::Fat)
	}

	fn read(&self, partition: &Partition, handle: FsHandle, buf: &mut [u8]) -> Result<usize> {
		let idx = handle.fat_index()?;
		with_engine(|state| do_read(state, partition, idx, buf))
	}

	fn write(&self, partition: &Partition, handle: FsHandle, buf: &[u8]) -> Result<usize> {
		let idx = handle.fat_index()?;
		with_engine(|state| do_write(state, partition, idx, buf))
	}

	fn seek(&self, partition: &Partition, handle: FsHandle, pos: u64) -> Result<()> {
		let idx = handle.fat_index()?;
		with_engine(|state| do_seek(state, partition, idx, pos))
	}

	fn close(&self, _partition: &Partition, handle: FsHandle) {
		if let Ok(idx) = handle.fat_index() {
			let _ = with_engine(|state| {
				if let Some(f) = state.files.get_mut(idx) {
					f.in_use = false;
				}
				Ok(())
			});
		}
	}

	fn get_size(&self, _partition: &Partition, handle: FsHandle) -> Result<u64> {
		let idx = handle.fat_index()?;
		with_engine(|state| state.files.get(idx).map(|f| f.size).ok_or(Error::EBADF))
	}

	fn is_directory(&self, _partition: &Partition, handle: FsHandle) -> bool {
		let idx = match handle.fat_index() {
			Ok(i) => i,
			Err(_) => return false,
		};
		with_engine(|state| Ok(state.files.get(idx).map(|f| f.is_dir).unwrap_or(false))).unwrap_or(false)
	}

	fn create(&self, partition: &Partition, path: &str) -> Result<()> {
		with_engine(|state| do_create(state, partition, path))
	}

	fn truncate(&self, partition: &Partition, handle: FsHandle) -> Result<()> {
		let idx = handle.fat_index()?;
		with_engine(|state| do_truncate_file(state, partition, idx))
	}

	fn delete(&self, partition: &Partition, path: &str) -> Result<()> {
		with_engine(|state| do_delete(state, partition, path))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::block::{Disk, FsType as BlockFsType};
	use alloc::sync::Arc;

	struct MemDevice {
		data: Spinlock<Vec<u8>>,
	}

	impl crate::block::BlockDevice for MemDevice {
		fn read_sectors(&self, lba: u64, count: u32, buf: &mut [u8]) -> Result<()> {
			let data = self.data.lock();
			let start = lba as usize * SECTOR_SIZE;
			let len = count as usize * SECTOR_SIZE;
			buf[..len].copy_from_slice(&data[start..start + len]);
			Ok(())
		}
		fn write_sectors(&self, lba: u64, count: u32, buf: &[u8]) -> Result<()> {
			let mut data = self.data.lock();
			let start = lba as usize * SECTOR_SIZE;
			let len = count as usize * SECTOR_SIZE;
			data[start..start + len].copy_from_slice(&buf[..len]);
			Ok(())
		}
		fn total_sectors(&self) -> u64 {
			(self.data.lock().len() / SECTOR_SIZE) as u64
		}
	}

	fn make_fat16_partition(total_sectors: usize) -> Partition {
		let mut image = alloc::vec![0u8; total_sectors * SECTOR_SIZE];
		image[11..13].copy_from_slice(&512u16.to_le_bytes());
		image[13] = 1; // sectors/cluster
		image[14..16].copy_from_slice(&1u16.to_le_bytes()); // reserved
		image[16] = 1; // 1 fat copy, simplifies the test fixture
		image[17..19].copy_from_slice(&16u16.to_le_bytes()); // 16 root entries -> 1 sector
		image[19..21].copy_from_slice(&(total_sectors as u16).to_le_bytes());
		image[22..24].copy_from_slice(&4u16.to_le_bytes()); // sectors/fat
		image[510] = 0x55;
		image[511] = 0xAA;

		let device = Arc::new(MemDevice { data: Spinlock::new(image) });
		let disk = Arc::new(Disk {
			id: 0,
			device,
			total_sectors: total_sectors as u64,
		});
		Partition {
			disk,
			offset_lba: 0,
			size_sectors: total_sectors as u64,
			type_byte: 0x06,
			label: String::from("TEST"),
			uuid: 0,
			root: true,
			filesystem: crate::block::Filesystem::new(BlockFsType::Fat16),
		}
	}

	#[test]
	fn create_write_read_round_trip() {
		let partition = make_fat16_partition(512);
		mount(&partition).unwrap();

		do_create_path(&partition, "/f.txt");
		let handle = open_path(&partition, "/f.txt");
		with_engine(|state| do_write(state, &partition, handle, b"hello")).unwrap();
		with_engine(|state| do_seek(state, &partition, handle, 0)).unwrap();
		let mut buf = [0u8; 5];
		let n = with_engine(|state| do_read(state, &partition, handle, &mut buf)).unwrap();
		assert_eq!(n, 5);
		assert_eq!(&buf, b"hello");
	}

	#[test]
	fn truncate_is_idempotent() {
		let partition = make_fat16_partition(512);
		mount(&partition).unwrap();
		do_create_path(&partition, "/t.txt");
		let handle = open_path(&partition, "/t.txt");
		with_engine(|state| do_write(state, &partition, handle, b"0123456789")).unwrap();

		with_engine(|state| do_truncate_file(state, &partition, handle)).unwrap();
		with_engine(|state| do_truncate_file(state, &partition, handle)).unwrap();
		let size = with_engine(|state| Ok(state.files[handle].size)).unwrap();
		assert_eq!(size, 0);
	}

	#[test]
	fn write_triggers_one_shot_truncate() {
		let partition = make_fat16_partition(512);
		mount(&partition).unwrap();
		do_create_path(&partition, "/a.txt");
		let handle = open_path(&partition, "/a.txt");
		with_engine(|state| do_write(state, &partition, handle, b"0123456789")).unwrap();
		with_engine(|state| state.files[handle].in_use = true).unwrap();
		let _ = with_engine(|state| {
			state.files[handle].position = 0;
			state.files[handle].state = FileState::Reading;
			Ok(())
		});
		with_engine(|state| do_write(state, &partition, handle, b"xy")).unwrap();
		let size = with_engine(|state| Ok(state.files[handle].size)).unwrap();
		assert_eq!(size, 2);
	}

	fn do_create_path(partition: &Partition, path: &str) {
		with_engine(|state| do_create(state, partition, path)).unwrap();
	}

	fn open_path(partition: &Partition, path: &str) -> usize {
		with_engine(|state| do_open(state, partition, path)).unwrap()
	}
}
