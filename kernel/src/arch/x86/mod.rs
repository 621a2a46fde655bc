// SPDX-License-Identifier: GPL-2.0

//! 32-bit x86 architecture support.

pub mod context;
pub mod gdt;
pub mod idt;
pub mod pic;
pub mod port;
