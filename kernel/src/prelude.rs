// SPDX-License-Identifier: GPL-2.0

//! Kernel prelude - commonly used types and traits

// Re-export macros
pub use alloc::vec;
// Re-export common alloc types
pub use alloc::{
	boxed::Box,
	collections::{BTreeMap, BTreeSet},
	format,
	string::{String, ToString},
	vec::Vec,
};
// Re-export core types
pub use core::{
	fmt, mem,
	option::Option::{self, None, Some},
	ptr,
	result::Result as CoreResult,
	slice, str,
};

pub use crate::error::{Error, Result};
pub use crate::memory::{PageDirectory, PhysAddr, UserPtr, UserSlicePtr, VirtAddr};
pub use crate::process::Pcb;
pub use crate::sync::{Mutex, RwLock, Spinlock};
pub use crate::types::*;

/// Print macros for kernel logging
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::console::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ($crate::console::_kprint(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("[KERNEL] {}\n", format_args!($($arg)*)));
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "debug")]
        $crate::logging::log_debug(module_path!(), &alloc::format!($($arg)*))
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => ($crate::logging::log_info(module_path!(), &alloc::format!($($arg)*)));
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => ($crate::logging::log_warning(module_path!(), &alloc::format!($($arg)*)));
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => ($crate::logging::log_error(module_path!(), &alloc::format!($($arg)*)));
}
