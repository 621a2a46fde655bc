// SPDX-License-Identifier: GPL-2.0

//! In-memory device-node namespace mounted at `/dev`.
//!
//! Grounded on `fs/devfs.rs`'s `NullDevOps`/`ZeroDevOps`/`FullDevOps`, with
//! `console`/`tty`/`tty0..tty7` routed into the [`crate::terminal`] module
//! instead of a framebuffer driver.

use crate::block::Partition;
use crate::config::TERM_COUNT;
use crate::error::{Error, Result};
use crate::vfs::{FsHandle, FsOps};

#[derive(Clone, Copy, PartialEq, Eq)]
enum DevKind {
	Null,
	Zero,
	Full,
	Tty(usize),
	/// `/dev/tty`: aliases whichever terminal is currently active, unlike
	/// `console`/`ttyN` which bind to a fixed terminal index.
	ActiveTty,
}

struct DevNode {
	name: &'static str,
	kind: DevKind,
}

/// Fixed node table. `tty` aliases the currently active terminal; `console`
/// is a fixed alias for terminal 0, distinguishing the controlling tty from
/// the boot console.
const NODE_COUNT: usize = 5 + TERM_COUNT;

fn node_table() -> [DevNode; NODE_COUNT] {
	[
		DevNode { name: "null", kind: DevKind::Null },
		DevNode { name: "zero", kind: DevKind::Zero },
		DevNode { name: "full", kind: DevKind::Full },
		DevNode { name: "tty", kind: DevKind::ActiveTty },
		DevNode { name: "console", kind: DevKind::Tty(0) },
		DevNode { name: "tty0", kind: DevKind::Tty(0) },
		DevNode { name: "tty1", kind: DevKind::Tty(1) },
		DevNode { name: "tty2", kind: DevKind::Tty(2) },
		DevNode { name: "tty3", kind: DevKind::Tty(3) },
		DevNode { name: "tty4", kind: DevKind::Tty(4) },
		DevNode { name: "tty5", kind: DevKind::Tty(5) },
		DevNode { name: "tty6", kind: DevKind::Tty(6) },
		DevNode { name: "tty7", kind: DevKind::Tty(7) },
	]
}

fn find_node(name: &str) -> Option<DevKind> {
	node_table().into_iter().find(|n| n.name == name).map(|n| n.kind)
}

fn kind_for_handle(handle: FsHandle) -> Result<DevKind> {
	let idx = handle.dev_index()?;
	let table = node_table();
	table.get(idx).map(|n| n.kind).ok_or(Error::EBADF)
}

pub struct DevFsOps;

pub static DEV_OPS: DevFsOps = DevFsOps;

impl FsOps for DevFsOps {
	fn open(&self, _partition: &Partition, path: &str) -> Result<FsHandle> {
		let name = path.trim_matches('/');
		let table = node_table();
		let idx = table.iter().position(|n| n.name == name).ok_or(Error::ENOENT)?;
		Ok(FsHandle::Dev(idx))
	}

	fn read(&self, _partition: &Partition, handle: FsHandle, buf: &mut [u8]) -> Result<usize> {
		match kind_for_handle(handle)? {
			DevKind::Null => Ok(0),
			DevKind::Zero | DevKind::Full => {
				buf.fill(0);
				Ok(buf.len())
			}
			DevKind::Tty(idx) => crate::terminal::read_tty(idx, buf),
			DevKind::ActiveTty => crate::terminal::read_tty(crate::terminal::active(), buf),
		}
	}

	fn write(&self, _partition: &Partition, handle: FsHandle, buf: &[u8]) -> Result<usize> {
		match kind_for_handle(handle)? {
			DevKind::Null | DevKind::Zero => Ok(buf.len()),
			DevKind::Full => Ok(0),
			DevKind::Tty(idx) => crate::terminal::write_tty(idx, buf),
			DevKind::ActiveTty => crate::terminal::write_tty(crate::terminal::active(), buf),
		}
	}

	/// Device handles carry no on-disk position; `vfs::read`/`vfs::write`
	/// always seek before the operation, so this has to succeed as a no-op
	/// rather than reject with `ESPIPE`, or every device read/write through
	/// the FD/VFS path would fail before ever reaching the device body.
	fn seek(&self, _partition: &Partition, _handle: FsHandle, _pos: u64) -> Result<()> {
		Ok(())
	}

	fn close(&self, _partition: &Partition, _handle: FsHandle) {}

	fn get_size(&self, _partition: &Partition, _handle: FsHandle) -> Result<u64> {
		Ok(0)
	}

	fn is_directory(&self, _partition: &Partition, _handle: FsHandle) -> bool {
		false
	}

	fn create(&self, _partition: &Partition, _path: &str) -> Result<()> {
		Err(Error::NotSupported)
	}

	fn truncate(&self, _partition: &Partition, _handle: FsHandle) -> Result<()> {
		Ok(())
	}

	fn delete(&self, _partition: &Partition, _path: &str) -> Result<()> {
		Err(Error::NotSupported)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn node_names_are_unique_and_cover_all_ttys() {
		let table = node_table();
		for i in 0..TERM_COUNT {
			let name = alloc::format!("tty{}", i);
			assert!(table.iter().any(|n| n.name == name));
		}
		assert!(table.iter().any(|n| n.name == "tty"));
	}

	#[test]
	fn unknown_name_is_not_found() {
		assert!(find_node("bogus").is_none());
	}
}
