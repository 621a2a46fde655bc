// SPDX-License-Identifier: GPL-2.0

//! Disk registry and MBR partition-table scan.
//!
//! The real transports (ATA PIO, floppy) are external collaborators per
//! spec.md's scope; this module only owns what's inside the core's
//! responsibility once a [`BlockDevice`] exists: keeping a bounded registry
//! of disks, reading their MBR, and turning partition-table entries into
//! [`Partition`] records the FAT engine and VFS can mount. Grounded on the
//! `Disk`/`Partition` data model of spec.md §3 and the boot control flow of
//! spec.md §2 ("block-device scan populates mount candidates").

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::{BlockDevice, Disk, Filesystem, FsType, Partition, VolumeId};
use crate::config::{MAX_DISKS, MBR_ENTRY_SIZE, MBR_MAX_ENTRIES, MBR_TABLE_OFFSET, SECTOR_SIZE};
use crate::error::{Error, Result};
use crate::fat::bpb;
use crate::sync::Spinlock;

static DISKS: Spinlock<Vec<Arc<Disk>>> = Spinlock::new(Vec::new());

/// Register a disk (a device plus its geometry) into the disk registry and
/// return its index. Distinct from [`super::register`], which tracks
/// mounted partitions rather than raw disks.
pub fn register_disk(device: Arc<dyn BlockDevice>) -> Result<u32> {
	let mut disks = DISKS.lock();
	if disks.len() >= MAX_DISKS {
		return Err(Error::TableFull);
	}
	let id = disks.len() as u32;
	let total_sectors = device.total_sectors();
	disks.push(Arc::new(Disk { id, device, total_sectors }));
	Ok(id)
}

fn le_u32(b: &[u8], off: usize) -> u32 {
	u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

struct MbrEntry {
	boot_flag: u8,
	type_byte: u8,
	start_lba: u32,
	sector_count: u32,
}

fn parse_mbr(sector0: &[u8]) -> Option<Vec<MbrEntry>> {
	if sector0.len() < SECTOR_SIZE || sector0[510] != 0x55 || sector0[511] != 0xAA {
		return None;
	}
	let mut out = Vec::with_capacity(MBR_MAX_ENTRIES);
	for i in 0..MBR_MAX_ENTRIES {
		let off = MBR_TABLE_OFFSET + i * MBR_ENTRY_SIZE;
		let entry = &sector0[off..off + MBR_ENTRY_SIZE];
		let type_byte = entry[4];
		if type_byte == 0 {
			continue;
		}
		out.push(MbrEntry {
			boot_flag: entry[0],
			type_byte,
			start_lba: le_u32(entry, 8),
			sector_count: le_u32(entry, 12),
		});
	}
	Some(out)
}

/// FAT type hinted by an MBR partition type byte; only used to pick the
/// [`FsType`] label before the BPB itself is parsed (which is the real,
/// authoritative classification per spec.md §4.6).
fn fs_type_for_partition_byte(type_byte: u8) -> FsType {
	match type_byte {
		0x01 | 0x04 | 0x06 | 0x0E => FsType::Fat16,
		0x0B | 0x0C | 0x0F => FsType::Fat32,
		_ => FsType::Fat16,
	}
}

/// Build and register a [`Partition`] for one disk slice, deferring the
/// precise FAT12/16/32 classification to [`bpb::parse`] against the
/// partition's own sector 0 (BPBs, unlike MBR entries, carry the canonical
/// cluster-count thresholds spec.md §4.6 classifies by).
fn register_partition(disk: &Arc<Disk>, offset_lba: u64, size_sectors: u64, type_byte: u8, root: bool, label: &str) -> Result<VolumeId> {
	let partition = Partition {
		disk: disk.clone(),
		offset_lba,
		size_sectors,
		type_byte,
		label: String::from(label),
		uuid: 0,
		root,
		filesystem: Filesystem::new(fs_type_for_partition_byte(type_byte)),
	};
	super::register(partition, None)
}

/// Candidate partition found by scanning a disk, not yet mounted.
pub struct MountCandidate {
	pub volume: VolumeId,
	pub root: bool,
}

/// Scan one disk's MBR and register every partition entry it finds as a
/// mount candidate. If the disk carries no valid partition table but its
/// own sector 0 parses as a bare FAT BPB, treat it as an unpartitioned
/// "superfloppy" and register the whole disk as one candidate.
pub fn scan_disk(disk_id: u32) -> Result<Vec<MountCandidate>> {
	let disk = {
		let disks = DISKS.lock();
		disks.iter().find(|d| d.id == disk_id).cloned().ok_or(Error::ENODEV)?
	};

	let mut sector0 = [0u8; SECTOR_SIZE];
	disk.device.read_sectors(0, 1, &mut sector0)?;

	let mut candidates = Vec::new();
	match parse_mbr(&sector0) {
		Some(entries) if !entries.is_empty() => {
			for (i, entry) in entries.iter().enumerate() {
				let label = format!("disk{}p{}", disk_id, i);
				let root = entry.boot_flag == 0x80;
				let volume = register_partition(&disk, entry.start_lba as u64, entry.sector_count as u64, entry.type_byte, root, &label)?;
				candidates.push(MountCandidate { volume, root });
			}
		}
		_ => {
			if bpb::parse(&sector0).is_ok() {
				let label = format!("disk{}", disk_id);
				let volume = register_partition(&disk, 0, disk.total_sectors, 0x0C, true, &label)?;
				candidates.push(MountCandidate { volume, root: true });
			}
		}
	}
	Ok(candidates)
}

/// Scan every registered disk and return every mount candidate found across
/// all of them, in disk registration order.
pub fn scan_all_disks() -> Vec<MountCandidate> {
	let ids: Vec<u32> = DISKS.lock().iter().map(|d| d.id).collect();
	let mut all = Vec::new();
	for id in ids {
		if let Ok(mut found) = scan_disk(id) {
			all.append(&mut found);
		}
	}
	all
}

#[cfg(test)]
mod tests {
	use super::*;

	struct MemDevice {
		data: Spinlock<Vec<u8>>,
	}

	impl MemDevice {
		fn new(sectors: usize) -> Self {
			Self {
				data: Spinlock::new(alloc::vec![0u8; sectors * SECTOR_SIZE]),
			}
		}
	}

	impl BlockDevice for MemDevice {
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

	fn write_mbr_entry(sector0: &mut [u8], index: usize, boot_flag: u8, type_byte: u8, start_lba: u32, sector_count: u32) {
		let off = MBR_TABLE_OFFSET + index * MBR_ENTRY_SIZE;
		sector0[off] = boot_flag;
		sector0[off + 4] = type_byte;
		sector0[off + 8..off + 12].copy_from_slice(&start_lba.to_le_bytes());
		sector0[off + 12..off + 16].copy_from_slice(&sector_count.to_le_bytes());
		sector0[510] = 0x55;
		sector0[511] = 0xAA;
	}

	#[test]
	fn scans_single_bootable_partition() {
		super::super::init();
		let mut data = alloc::vec![0u8; 4096 * SECTOR_SIZE];
		write_mbr_entry(&mut data[..SECTOR_SIZE], 0, 0x80, 0x0C, 2048, 2000);
		let device = Arc::new(MemDevice { data: Spinlock::new(data) });
		let id = register_disk(device).unwrap();
		let candidates = scan_disk(id).unwrap();
		assert_eq!(candidates.len(), 1);
		assert!(candidates[0].root);
	}

	#[test]
	fn superfloppy_without_partition_table_is_one_candidate() {
		super::super::init();
		let mut data = alloc::vec![0u8; 512 * SECTOR_SIZE];
		data[11..13].copy_from_slice(&512u16.to_le_bytes());
		data[13] = 1;
		data[14..16].copy_from_slice(&1u16.to_le_bytes());
		data[16] = 1;
		data[17..19].copy_from_slice(&16u16.to_le_bytes());
		data[19..21].copy_from_slice(&512u16.to_le_bytes());
		data[22..24].copy_from_slice(&4u16.to_le_bytes());
		data[510] = 0x55;
		data[511] = 0xAA;
		let device = Arc::new(MemDevice { data: Spinlock::new(data) });
		let id = register_disk(device).unwrap();
		let candidates = scan_disk(id).unwrap();
		assert_eq!(candidates.len(), 1);
	}

	#[test]
	fn ignores_empty_partition_entries() {
		super::super::init();
		let mut data = alloc::vec![0u8; 4096 * SECTOR_SIZE];
		write_mbr_entry(&mut data[..SECTOR_SIZE], 0, 0x80, 0x0C, 2048, 2000);
		// entries 1..3 stay zeroed (unused)
		let device = Arc::new(MemDevice { data: Spinlock::new(data) });
		let id = register_disk(device).unwrap();
		let candidates = scan_disk(id).unwrap();
		assert_eq!(candidates.len(), 1);
	}
}
