// SPDX-License-Identifier: GPL-2.0

//! Block device abstraction, disks, partitions, and the global volumes
//! arena.
//!
//! The source this design is grounded on validated a `Partition*` by
//! checking it fell within the global volumes array or the kernel heap
//! before dereferencing it, a defense against dangling pointers. Rust's
//! ownership model makes that check structural instead of runtime: callers
//! never hold a `Partition` pointer at all, only a bounds-checked
//! [`VolumeId`] handle into the arena below (see DESIGN.md's "Pointer
//! graphs" note).

pub mod scan;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::config::{MAX_VOLUMES, SECTOR_SIZE};
use crate::error::{Error, Result};
use crate::sync::Spinlock;

/// Uniform sector read/write over whatever physical transport backs a disk
/// (ATA PIO, floppy, or — in this repo, since those transports are out of
/// scope — a RAM-backed stand-in). Multi-sector transfers are preferred;
/// floppy-path callers must not cross a 64 KiB physical boundary, which is
/// the caller's responsibility since this trait has no notion of physical
/// contiguity.
pub trait BlockDevice: Send + Sync {
	fn read_sectors(&self, lba: u64, count: u32, buf: &mut [u8]) -> Result<()>;
	fn write_sectors(&self, lba: u64, count: u32, buf: &[u8]) -> Result<()>;
	fn total_sectors(&self) -> u64;
}

pub struct Disk {
	pub id: u32,
	pub device: Arc<dyn BlockDevice>,
	pub total_sectors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsType {
	Fat12,
	Fat16,
	Fat32,
	DevFs,
}

/// A filesystem record bound to a partition at mount time. `ops` is the
/// polymorphic per-filesystem operation vtable; it is `None` until mount
/// binds one.
pub struct Filesystem {
	pub fs_type: FsType,
	pub ops: Option<&'static dyn crate::vfs::FsOps>,
	pub mounted: bool,
	pub read_only: bool,
	pub block_size: usize,
}

impl Filesystem {
	pub fn new(fs_type: FsType) -> Self {
		Self {
			fs_type,
			ops: None,
			mounted: false,
			read_only: false,
			block_size: SECTOR_SIZE,
		}
	}
}

pub struct Partition {
	pub disk: Arc<Disk>,
	pub offset_lba: u64,
	pub size_sectors: u64,
	pub type_byte: u8,
	pub label: String,
	pub uuid: u128,
	pub root: bool,
	pub filesystem: Filesystem,
}

impl Partition {
	pub fn read_sectors(&self, lba: u64, count: u32, buf: &mut [u8]) -> Result<()> {
		self.bounds_check(lba, count)?;
		self.disk.device.read_sectors(self.offset_lba + lba, count, buf)
	}

	pub fn write_sectors(&self, lba: u64, count: u32, buf: &[u8]) -> Result<()> {
		self.bounds_check(lba, count)?;
		self.disk.device.write_sectors(self.offset_lba + lba, count, buf)
	}

	fn bounds_check(&self, lba: u64, count: u32) -> Result<()> {
		let end = lba.checked_add(count as u64).ok_or(Error::InvalidArgument)?;
		if end > self.size_sectors {
			return Err(Error::InvalidArgument);
		}
		Ok(())
	}
}

/// Handle into the global volumes arena. Bounds-checked on every use, never
/// a raw pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeId(pub usize);

static VOLUMES: Spinlock<Vec<Option<Partition>>> = Spinlock::new(Vec::new());

pub fn init() {
	let mut volumes = VOLUMES.lock();
	volumes.clear();
	for _ in 0..MAX_VOLUMES {
		volumes.push(None);
	}
}

/// Register a partition into the first free slot, skipping `reserved_slot`
/// (if any) so it remains available for `register_at`.
pub fn register(partition: Partition, reserved_slot: Option<usize>) -> Result<VolumeId> {
	let mut volumes = VOLUMES.lock();
	for (idx, slot) in volumes.iter_mut().enumerate() {
		if Some(idx) == reserved_slot {
			continue;
		}
		if slot.is_none() {
			*slot = Some(partition);
			return Ok(VolumeId(idx));
		}
	}
	Err(Error::TableFull)
}

/// Place a partition at an exact slot (used for the reserved devfs slot so
/// it survives disk re-scans).
pub fn register_at(slot: usize, partition: Partition) -> Result<VolumeId> {
	let mut volumes = VOLUMES.lock();
	let entry = volumes.get_mut(slot).ok_or(Error::InvalidArgument)?;
	*entry = Some(partition);
	Ok(VolumeId(slot))
}

pub fn with<R>(id: VolumeId, f: impl FnOnce(&Partition) -> R) -> Option<R> {
	let volumes = VOLUMES.lock();
	volumes.get(id.0).and_then(|slot| slot.as_ref()).map(f)
}

pub fn with_mut<R>(id: VolumeId, f: impl FnOnce(&mut Partition) -> R) -> Option<R> {
	let mut volumes = VOLUMES.lock();
	volumes.get_mut(id.0).and_then(|slot| slot.as_mut()).map(f)
}

pub fn unregister(id: VolumeId) {
	let mut volumes = VOLUMES.lock();
	if let Some(slot) = volumes.get_mut(id.0) {
		*slot = None;
	}
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

	fn test_partition(offset: u64, size: u64) -> Partition {
		let disk = Arc::new(Disk {
			id: 0,
			device: Arc::new(MemDevice::new(2048)),
			total_sectors: 2048,
		});
		Partition {
			disk,
			offset_lba: offset,
			size_sectors: size,
			type_byte: 0x0C,
			label: String::from("TEST"),
			uuid: 0,
			root: true,
			filesystem: Filesystem::new(FsType::Fat32),
		}
	}

	#[test]
	fn partition_biases_lba_by_offset() {
		let part = test_partition(100, 50);
		let mut buf = [0xAAu8; SECTOR_SIZE];
		part.write_sectors(0, 1, &buf).unwrap();
		buf = [0u8; SECTOR_SIZE];
		part.read_sectors(0, 1, &mut buf).unwrap();
		assert_eq!(buf[0], 0xAA);

		let mut raw = [0u8; SECTOR_SIZE];
		part.disk.device.read_sectors(100, 1, &mut raw).unwrap();
		assert_eq!(raw[0], 0xAA);
	}

	#[test]
	fn partition_rejects_out_of_range_access() {
		let part = test_partition(0, 10);
		let mut buf = [0u8; SECTOR_SIZE];
		assert!(part.read_sectors(9, 2, &mut buf).is_err());
	}

	#[test]
	fn volume_registration_round_trips() {
		init();
		let id = register(test_partition(0, 10), None).unwrap();
		assert!(with(id, |p| p.size_sectors).is_some());
		unregister(id);
		assert!(with(id, |p| p.size_sectors).is_none());
	}
}
