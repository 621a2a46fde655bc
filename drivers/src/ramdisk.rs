// SPDX-License-Identifier: GPL-2.0

//! RAM-backed block device.
//!
//! Stands in for the ATA/floppy transport spec.md declares out of scope, so
//! the FAT engine and VFS have something concrete to mount in tests and as
//! a boot-time fallback. Grounded on the teacher's `RamDisk` (itself modeled
//! on Linux's `drivers/block/brd.c`), rewritten against `kernel`'s actual
//! `BlockDevice` trait instead of the teacher's `BlockDriverOps`/`Driver`/
//! loadable-module scaffolding, none of which this kernel has.

use alloc::vec;
use alloc::vec::Vec;

use kernel::block::BlockDevice;
use kernel::config::SECTOR_SIZE;
use kernel::error::{Error, Result};
use kernel::sync::Spinlock;

pub struct RamBlockDevice {
	sectors: Spinlock<Vec<u8>>,
	total_sectors: u64,
}

impl RamBlockDevice {
	/// Allocate a RAM disk of `sector_count` zeroed sectors.
	pub fn new(sector_count: u64) -> Self {
		Self {
			sectors: Spinlock::new(vec![0u8; (sector_count as usize) * SECTOR_SIZE]),
			total_sectors: sector_count,
		}
	}

	fn bounds_check(&self, lba: u64, count: u32) -> Result<(usize, usize)> {
		let end = lba.checked_add(count as u64).ok_or(Error::InvalidArgument)?;
		if end > self.total_sectors {
			return Err(Error::InvalidArgument);
		}
		let start = lba as usize * SECTOR_SIZE;
		let len = count as usize * SECTOR_SIZE;
		Ok((start, len))
	}
}

impl BlockDevice for RamBlockDevice {
	fn read_sectors(&self, lba: u64, count: u32, buf: &mut [u8]) -> Result<()> {
		let (start, len) = self.bounds_check(lba, count)?;
		if buf.len() < len {
			return Err(Error::InvalidArgument);
		}
		let data = self.sectors.lock();
		buf[..len].copy_from_slice(&data[start..start + len]);
		Ok(())
	}

	fn write_sectors(&self, lba: u64, count: u32, buf: &[u8]) -> Result<()> {
		let (start, len) = self.bounds_check(lba, count)?;
		if buf.len() < len {
			return Err(Error::InvalidArgument);
		}
		let mut data = self.sectors.lock();
		data[start..start + len].copy_from_slice(&buf[..len]);
		Ok(())
	}

	fn total_sectors(&self) -> u64 {
		self.total_sectors
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn write_then_read_round_trips() {
		let dev = RamBlockDevice::new(16);
		let mut write_buf = vec![0u8; SECTOR_SIZE * 2];
		write_buf[0] = 0xAB;
		write_buf[SECTOR_SIZE] = 0xCD;
		dev.write_sectors(3, 2, &write_buf).unwrap();

		let mut read_buf = vec![0u8; SECTOR_SIZE * 2];
		dev.read_sectors(3, 2, &mut read_buf).unwrap();
		assert_eq!(read_buf, write_buf);
	}

	#[test]
	fn out_of_range_access_is_rejected() {
		let dev = RamBlockDevice::new(4);
		let mut buf = vec![0u8; SECTOR_SIZE];
		assert!(dev.read_sectors(4, 1, &mut buf).is_err());
		assert!(dev.write_sectors(3, 2, &buf).is_err());
	}

	#[test]
	fn fresh_disk_reads_zeroed() {
		let dev = RamBlockDevice::new(2);
		let mut buf = vec![0xFFu8; SECTOR_SIZE];
		dev.read_sectors(0, 1, &mut buf).unwrap();
		assert!(buf.iter().all(|&b| b == 0));
	}
}
