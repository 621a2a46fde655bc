// SPDX-License-Identifier: GPL-2.0

//! Named bounds and memory-map constants shared across subsystems.

use crate::types::VirtAddr;

/// Page size in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Sector size used by every block device and the FAT engine.
pub const SECTOR_SIZE: usize = 512;

/// Virtual memory map.
pub const USER_SPACE_END: usize = 0xC000_0000;
pub const KERNEL_BASE: usize = 0xC000_0000;
pub const KERNEL_HEAP_START: usize = 0xC100_0000;
pub const KERNEL_HEAP_END: usize = 0xFF00_0000;
pub const USER_CODE_BASE: usize = 0x0804_8000;
pub const USER_HEAP_START: usize = 0x1000_0000;
pub const USER_STACK_TOP: usize = 0xBFFF_0000;
pub const USER_STACK_SIZE: usize = 64 * 1024;

pub fn kernel_heap_start() -> VirtAddr {
	VirtAddr::new(KERNEL_HEAP_START)
}

pub fn kernel_heap_end() -> VirtAddr {
	VirtAddr::new(KERNEL_HEAP_END)
}

/// Default cap on total physical memory tracked by the PMM bitmap when
/// no richer memory map is available from the boot loader.
pub const DEFAULT_PHYS_MEM_CAP: usize = 64 * 1024 * 1024;

/// Maximum number of simultaneous VFS mounts.
pub const MAX_MOUNTS: usize = 8;

/// Per-process open file descriptor table size.
pub const MAX_FDS: usize = 16;

/// Maximum devfs device nodes.
pub const MAX_DEV_NODES: usize = 32;

/// Maximum number of disks/partitions tracked in the global volumes arena
/// (includes the reserved devfs slot below).
pub const MAX_VOLUMES: usize = 32;

/// Reserved devfs mount table slot, kept stable across disk rescans.
pub const DEVFS_MOUNT_SLOT: usize = 30;

/// Global dynamic-linking symbol table capacity.
pub const MAX_SYMBOLS: usize = 1024;

/// FAT sector cache depth.
pub const FAT_CACHE_SECTORS: usize = 5;

/// Maximum FAT open files tracked by the engine at once.
pub const MAX_FAT_OPEN_FILES: usize = 32;

/// Terminal scrollback geometry.
pub const TERM_SCROLLBACK_LINES: usize = 1000;
pub const TERM_COLUMNS: usize = 80;
pub const TERM_SCREEN_HEIGHT: usize = 25;
pub const TERM_COUNT: usize = 8;

/// Safety bound on cluster-chain walks per single read call.
pub const FAT_MAX_SECTOR_ADVANCES: usize = 10_000;

/// Implicit size cap used to bound FAT32 root-directory scans.
pub const FAT32_ROOT_SIZE_CAP: usize = 16 * 1024 * 1024;

/// Iteration cap for hardware busy-wait polling (e.g. `FDC_WaitIRQ`).
pub const HW_WAIT_MAX_ITERATIONS: usize = 1_000_000;

/// MBR partition table geometry: four 16-byte entries starting at byte 446
/// of sector 0, terminated by the `0x55AA` signature at 510.
pub const MBR_TABLE_OFFSET: usize = 446;
pub const MBR_ENTRY_SIZE: usize = 16;
pub const MBR_MAX_ENTRIES: usize = 4;

/// Maximum disks tracked by the block layer's disk registry (distinct from
/// `MAX_VOLUMES`, which counts mounted partitions).
pub const MAX_DISKS: usize = 4;
