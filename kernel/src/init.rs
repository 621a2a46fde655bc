// SPDX-License-Identifier: GPL-2.0

//! Kernel initialization: brings up every subsystem lib.rs's `kernel_main`
//! doesn't already own (memory is initialized before this runs) and hands
//! control to the idle loop.

use alloc::string::String;
use alloc::sync::Arc;

use crate::block::{BlockDevice, Disk, Filesystem, FsType, Partition};
use crate::config::DEVFS_MOUNT_SLOT;
use crate::error::Result;

/// Backing device for the devfs partition. devfs never reads or writes
/// sectors through [`crate::vfs::FsOps`] -- every node is synthesized -- so
/// this only needs to satisfy the trait, not do anything.
struct NullBlockDevice;

impl BlockDevice for NullBlockDevice {
	fn read_sectors(&self, _lba: u64, _count: u32, _buf: &mut [u8]) -> Result<()> {
		Ok(())
	}

	fn write_sectors(&self, _lba: u64, _count: u32, _buf: &[u8]) -> Result<()> {
		Ok(())
	}

	fn total_sectors(&self) -> u64 {
		0
	}
}

/// Scan every registered disk's partition table and mount the first
/// candidate flagged `root` (or, failing that, the first candidate at all)
/// at `/`. Matches spec.md §2's boot order: the scan only discovers
/// candidates; FAT mounting happens after devfs is already in place.
fn mount_fat_root() -> Result<()> {
	let mut candidates = crate::block::scan::scan_all_disks();
	candidates.sort_by_key(|c| !c.root);

	for candidate in candidates {
		let mounted = crate::block::with(candidate.volume, |p| {
			let image = crate::fat::mount(p)?;
			Ok::<_, crate::error::Error>(image)
		});
		match mounted {
			Some(Ok(fat_type)) => {
				crate::block::with_mut(candidate.volume, |p| {
					p.filesystem.ops = Some(&crate::fat::FAT_OPS);
					p.filesystem.mounted = true;
				});
				crate::vfs::mount("/", candidate.volume)?;
				crate::info!("mounted {:?} root filesystem at /", fat_type);
				return Ok(());
			}
			_ => continue,
		}
	}
	Err(crate::error::Error::NotFound)
}

fn mount_devfs() -> Result<()> {
	let disk = Arc::new(Disk {
		id: u32::MAX,
		device: Arc::new(NullBlockDevice),
		total_sectors: 0,
	});
	let mut filesystem = Filesystem::new(FsType::DevFs);
	filesystem.ops = Some(&crate::vfs::devfs::DEV_OPS);
	filesystem.mounted = true;

	let partition = Partition {
		disk,
		offset_lba: 0,
		size_sectors: 0,
		type_byte: 0,
		label: String::from("devfs"),
		uuid: 0,
		root: false,
		filesystem,
	};

	let volume = crate::block::register_at(DEVFS_MOUNT_SLOT, partition)?;
	crate::vfs::mount("/dev", volume)
}

/// Bring up every subsystem in boot order: interrupts, timekeeping,
/// terminals, the block/VFS arenas, devfs, then the initial shell process.
pub fn init_subsystems() {
	crate::arch::x86::idt::init();
	crate::time::init();
	crate::terminal::init();
	crate::block::init();
	crate::vfs::init();

	if let Err(e) = mount_devfs() {
		crate::error!("failed to mount devfs: {:?}", e);
	}

	if let Err(e) = mount_fat_root() {
		crate::error!("no root filesystem mounted: {:?}", e);
	}

	unsafe {
		crate::arch::x86::pic::unmask_irq(0);
		crate::arch::x86::pic::unmask_irq(1);
	}

	crate::info!("{} {} subsystems initialized", crate::NAME, crate::VERSION);

	match crate::process::elf::elf_load_process("/usr/bin/sh", false) {
		Ok(pid) => crate::info!("loaded initial shell as pid {}", pid.0),
		Err(e) => crate::error!("failed to load initial shell: {:?}", e),
	}
}

/// Idle loop. There is no scheduler to dispatch into, so this just parks
/// the CPU between interrupts; the timer tick, keyboard IRQ, and syscall
/// trap gate are the only things that currently run.
pub fn main_kernel_loop() -> ! {
	crate::console::write_str("Entering kernel idle loop...\n");
	loop {
		unsafe {
			core::arch::asm!("sti; hlt");
		}
	}
}
