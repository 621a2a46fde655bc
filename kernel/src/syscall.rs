// SPDX-License-Identifier: GPL-2.0

//! System-call boundary: extracts a syscall number and up to six
//! register-packed arguments from the saved [`RegisterFrame`], dispatches by
//! number, and marshals the result back into the frame's accumulator for the
//! trap-return path.
//!
//! Grounded on `syscalls.rs`'s dispatcher table idiom, narrowed
//! to a POSIX-numbered file/process subset plus minimal process-lifecycle
//! stubs (`EXIT`, `GETPID`, `FORK`, `KILL`) so a shell can terminate and
//! query itself even though multitasking itself stays out of scope.

use crate::arch::RegisterFrame;
use crate::error::Error;
use crate::memory::{copy_from_user, copy_string_from_user, copy_to_user, UserPtr, UserSlicePtr};
use crate::process::{self, Pcb};
use crate::types::{Pid, VirtAddr};

pub const SYS_READ: u32 = 3;
pub const SYS_WRITE: u32 = 4;
pub const SYS_OPEN: u32 = 5;
pub const SYS_CLOSE: u32 = 6;
pub const SYS_LSEEK: u32 = 19;
pub const SYS_BRK: u32 = 45;
pub const SYS_EXIT: u32 = 1;
pub const SYS_GETPID: u32 = 20;
pub const SYS_FORK: u32 = 2;
pub const SYS_KILL: u32 = 37;
pub const SYS_SBRK: u32 = 186;

const MAX_RW_LEN: usize = 64 * 1024;
const MAX_PATH_LEN: usize = 256;

/// Negative-sentinel ABI: syscalls surface failure as `-1`-family errno
/// values in the accumulator.
fn to_ret(result: Result<i64, Error>) -> i64 {
	match result {
		Ok(v) => v,
		Err(e) => e.to_errno() as i64,
	}
}

fn do_read(pid: Pid, fd: usize, buf_ptr: u32, len: u32) -> Result<i64, Error> {
	let len = (len as usize).min(MAX_RW_LEN);
	let user_slice = unsafe { UserSlicePtr::new(buf_ptr as *mut u8, len) };
	let mut kernel_buf = alloc::vec![0u8; len];
	let n = process::with_pcb(pid, |p: &mut Pcb| p.fds.read(fd, &mut kernel_buf))
		.ok_or(Error::ESRCH)??;
	copy_to_user(user_slice, &kernel_buf[..n])?;
	Ok(n as i64)
}

fn do_write(pid: Pid, fd: usize, buf_ptr: u32, len: u32) -> Result<i64, Error> {
	let len = (len as usize).min(MAX_RW_LEN);
	let user_slice = unsafe { UserSlicePtr::new(buf_ptr as *mut u8, len) };
	let mut kernel_buf = alloc::vec![0u8; len];
	copy_from_user(&mut kernel_buf, user_slice)?;
	let n = process::with_pcb(pid, |p: &mut Pcb| p.fds.write(fd, &kernel_buf))
		.ok_or(Error::ESRCH)??;
	Ok(n as i64)
}

fn do_open(pid: Pid, path_ptr: u32, flags: u32) -> Result<i64, Error> {
	let user_ptr = UserPtr::<u8>::new(path_ptr as *mut u8)?;
	let path = copy_string_from_user(user_ptr, MAX_PATH_LEN)?;
	let fd = process::with_pcb(pid, |p: &mut Pcb| p.fds.open(&path, flags))
		.ok_or(Error::ESRCH)??;
	Ok(fd as i64)
}

fn do_close(pid: Pid, fd: usize) -> Result<i64, Error> {
	process::with_pcb(pid, |p: &mut Pcb| p.fds.close(fd)).ok_or(Error::ESRCH)??;
	Ok(0)
}

fn do_lseek(pid: Pid, fd: usize, offset: i64, whence: i32) -> Result<i64, Error> {
	let pos = process::with_pcb(pid, |p: &mut Pcb| p.fds.lseek(fd, offset, whence))
		.ok_or(Error::ESRCH)??;
	Ok(pos as i64)
}

fn do_brk(pid: Pid, target: u32) -> Result<i64, Error> {
	let new_brk = process::with_pcb(pid, |p: &mut Pcb| p.brk(VirtAddr::new(target as usize)))
		.ok_or(Error::ESRCH)??;
	Ok(new_brk.as_usize() as i64)
}

fn do_sbrk(pid: Pid, delta: i32) -> Result<i64, Error> {
	let old_brk = process::with_pcb(pid, |p: &mut Pcb| p.sbrk(delta as isize))
		.ok_or(Error::ESRCH)??;
	Ok(old_brk.as_usize() as i64)
}

/// Dispatch one trapped syscall for `pid`, writing the return value into
/// `frame.eax`. Unknown numbers and the deliberately-unimplemented
/// fork/kill stubs return `-ENOSYS`.
pub fn dispatch(pid: Pid, frame: &mut RegisterFrame) {
	let number = frame.eax;
	let a0 = frame.ebx;
	let a1 = frame.ecx;
	let a2 = frame.edx;
	let a3 = frame.esi;

	let result: Result<i64, Error> = match number {
		SYS_READ => do_read(pid, a0 as usize, a1, a2),
		SYS_WRITE => do_write(pid, a0 as usize, a1, a2),
		SYS_OPEN => do_open(pid, a0, a1),
		SYS_CLOSE => do_close(pid, a0 as usize),
		SYS_LSEEK => do_lseek(pid, a0 as usize, a1 as i32 as i64, a2 as i32),
		SYS_BRK => do_brk(pid, a0),
		SYS_SBRK => do_sbrk(pid, a0 as i32),
		SYS_EXIT => {
			let _ = a3;
			let _ = process::process_destroy(pid);
			Ok(0)
		}
		SYS_GETPID => Ok(pid.0 as i64),
		SYS_FORK => Err(Error::NotSupported),
		SYS_KILL => Err(Error::NotSupported),
		_ => Err(Error::NotSupported),
	};

	frame.eax = to_ret(result) as u32;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unknown_syscall_returns_enosys() {
		let mut frame = RegisterFrame::new();
		frame.eax = 9999;
		dispatch(Pid(1), &mut frame);
		assert_eq!(frame.eax as i32, Error::NotSupported.to_errno());
	}

	#[test]
	fn getpid_returns_caller_pid() {
		let mut frame = RegisterFrame::new();
		frame.eax = SYS_GETPID;
		dispatch(Pid(7), &mut frame);
		assert_eq!(frame.eax, 7);
	}

	#[test]
	fn fork_is_unimplemented() {
		let mut frame = RegisterFrame::new();
		frame.eax = SYS_FORK;
		dispatch(Pid(1), &mut frame);
		assert_eq!(frame.eax as i32, Error::NotSupported.to_errno());
	}
}
