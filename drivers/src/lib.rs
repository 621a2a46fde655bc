// SPDX-License-Identifier: GPL-2.0

//! Out-of-tree-style drivers implementing `kernel`'s `BlockDevice` trait.
//!
//! `/dev/null`, `/dev/zero`, `/dev/full`, and the terminal character devices
//! live in `kernel::vfs::devfs` directly, mirroring how the teacher's VFS
//! collapses separate `FileOperations`/`InodeOperations` drivers into one
//! trait. What's left here is the transport a real disk driver would own:
//! a RAM-backed block device standing in for ATA/floppy.

// `ramdisk.rs` carries ordinary `#[test]`s with no custom test-runner, so
// `no_std` is conditional on not running under the host's `libtest` harness,
// the same trick `kernel/src/lib.rs` uses.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod ramdisk;
pub use ramdisk::RamBlockDevice;
