// SPDX-License-Identifier: GPL-2.0

//! Multi-terminal line discipline and display model.
//!
//! Eight independent terminals (`tty0..tty7`), each with its own scrollback
//! ring, cursor, SGR attribute state, and canonical/raw input queue. Screen
//! state here is an in-kernel model consumed through `/dev/ttyN`; actual
//! early boot text still goes through [`crate::console`], which this module
//! mirrors `tty0`'s output into so boot messages stay visible on real
//! hardware.
//!
//! ANSI CSI handling grounded on the VGA/serial byte-oriented write path in
//! `console.rs`, generalized to a persistent per-terminal parser state so a
//! CSI sequence split across two `write()` calls still parses correctly.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{TERM_COLUMNS, TERM_COUNT, TERM_SCREEN_HEIGHT, TERM_SCROLLBACK_LINES};
use crate::error::{Error, Result};
use crate::sync::Spinlock;

/// Kill character (CTRL+U): erase the whole line buffer.
const KILL_CHAR: u8 = 0x15;
/// Interrupt character (CTRL+C): discard the line and flag the foreground
/// process for signal delivery (signal delivery itself is out of scope).
const INTERRUPT_CHAR: u8 = 0x03;
/// EOF sentinel (CTRL+D): flushes the line buffer without appending `\n`.
const EOF_SENTINEL: u8 = 0x04;

/// Terminal a process's stdin/stdout/stderr route through. Defaults to
/// `tty0`, the boot console.
static ACTIVE_TERMINAL: AtomicUsize = AtomicUsize::new(0);

pub fn active() -> usize {
	ACTIVE_TERMINAL.load(Ordering::Relaxed)
}

pub fn set_active(idx: usize) {
	ACTIVE_TERMINAL.store(idx, Ordering::Relaxed);
}

#[derive(Clone, Copy)]
struct Cell {
	ch: u8,
	attr: u8,
}

impl Cell {
	const fn blank() -> Self {
		Self { ch: b' ', attr: 0x07 }
	}
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ParserState {
	Normal,
	Escape,
	Csi,
}

struct Terminal {
	screen: Vec<Vec<Cell>>,
	scrollback: VecDeque<Vec<Cell>>,
	cursor_row: usize,
	cursor_col: usize,
	attr: u8,
	parser: ParserState,
	csi_params: Vec<u16>,
	csi_current: Option<u16>,
	canonical: bool,
	echo: bool,
	line_buffer: Vec<u8>,
	completed_lines: VecDeque<Vec<u8>>,
	raw_queue: VecDeque<u8>,
	interrupt_pending: bool,
}

impl Terminal {
	fn new() -> Self {
		Self {
			screen: alloc::vec![alloc::vec![Cell::blank(); TERM_COLUMNS]; TERM_SCREEN_HEIGHT],
			scrollback: VecDeque::new(),
			cursor_row: 0,
			cursor_col: 0,
			attr: 0x07,
			parser: ParserState::Normal,
			csi_params: Vec::new(),
			csi_current: None,
			canonical: true,
			echo: true,
			line_buffer: Vec::new(),
			completed_lines: VecDeque::new(),
			raw_queue: VecDeque::new(),
			interrupt_pending: false,
		}
	}

	fn put_char(&mut self, byte: u8) {
		match byte {
			b'\n' => self.newline(),
			b'\r' => self.cursor_col = 0,
			0x08 => {
				if self.cursor_col > 0 {
					self.cursor_col -= 1;
					self.screen[self.cursor_row][self.cursor_col] = Cell { ch: b' ', attr: self.attr };
				}
			}
			byte => {
				if self.cursor_col >= TERM_COLUMNS {
					self.newline();
				}
				self.screen[self.cursor_row][self.cursor_col] = Cell { ch: byte, attr: self.attr };
				self.cursor_col += 1;
			}
		}
	}

	fn newline(&mut self) {
		self.cursor_col = 0;
		if self.cursor_row + 1 < TERM_SCREEN_HEIGHT {
			self.cursor_row += 1;
			return;
		}
		let top = self.screen.remove(0);
		if self.scrollback.len() >= TERM_SCROLLBACK_LINES {
			self.scrollback.pop_front();
		}
		self.scrollback.push_back(top);
		self.screen.push(alloc::vec![Cell::blank(); TERM_COLUMNS]);
	}

	fn erase_screen(&mut self, mode: u16) {
		match mode {
			0 => {
				for col in self.cursor_col..TERM_COLUMNS {
					self.screen[self.cursor_row][col] = Cell::blank();
				}
				for row in (self.cursor_row + 1)..TERM_SCREEN_HEIGHT {
					self.screen[row].iter_mut().for_each(|c| *c = Cell::blank());
				}
			}
			1 => {
				for row in 0..self.cursor_row {
					self.screen[row].iter_mut().for_each(|c| *c = Cell::blank());
				}
				for col in 0..=self.cursor_col.min(TERM_COLUMNS - 1) {
					self.screen[self.cursor_row][col] = Cell::blank();
				}
			}
			_ => {
				for row in self.screen.iter_mut() {
					row.iter_mut().for_each(|c| *c = Cell::blank());
				}
			}
		}
	}

	fn erase_line(&mut self, mode: u16) {
		let row = self.cursor_row;
		match mode {
			0 => {
				for col in self.cursor_col..TERM_COLUMNS {
					self.screen[row][col] = Cell::blank();
				}
			}
			1 => {
				for col in 0..=self.cursor_col.min(TERM_COLUMNS - 1) {
					self.screen[row][col] = Cell::blank();
				}
			}
			_ => {
				self.screen[row].iter_mut().for_each(|c| *c = Cell::blank());
			}
		}
	}

	fn apply_sgr(&mut self, params: &[u16]) {
		if params.is_empty() {
			self.attr = 0x07;
			return;
		}
		for &p in params {
			match p {
				0 => self.attr = 0x07,
				1 => self.attr |= 0x08,
				30..=37 => self.attr = (self.attr & 0xF0) | (p - 30) as u8,
				40..=47 => self.attr = (self.attr & 0x0F) | (((p - 40) as u8) << 4),
				_ => {}
			}
		}
	}

	fn finish_csi(&mut self, final_byte: u8) {
		if let Some(cur) = self.csi_current.take() {
			self.csi_params.push(cur);
		}
		let params = core::mem::take(&mut self.csi_params);
		let n = params.first().copied().unwrap_or(1).max(1) as usize;
		match final_byte {
			b'A' => self.cursor_row = self.cursor_row.saturating_sub(n),
			b'B' => self.cursor_row = (self.cursor_row + n).min(TERM_SCREEN_HEIGHT - 1),
			b'C' => self.cursor_col = (self.cursor_col + n).min(TERM_COLUMNS - 1),
			b'D' => self.cursor_col = self.cursor_col.saturating_sub(n),
			b'H' | b'f' => {
				let row = params.first().copied().unwrap_or(1).max(1) as usize - 1;
				let col = params.get(1).copied().unwrap_or(1).max(1) as usize - 1;
				self.cursor_row = row.min(TERM_SCREEN_HEIGHT - 1);
				self.cursor_col = col.min(TERM_COLUMNS - 1);
			}
			b'J' => self.erase_screen(params.first().copied().unwrap_or(0)),
			b'K' => self.erase_line(params.first().copied().unwrap_or(0)),
			b'm' => self.apply_sgr(&params),
			_ => {}
		}
		self.parser = ParserState::Normal;
	}

	fn feed_output_byte(&mut self, byte: u8) {
		match self.parser {
			ParserState::Normal => {
				if byte == 0x1B {
					self.parser = ParserState::Escape;
				} else {
					self.put_char(byte);
				}
			}
			ParserState::Escape => {
				if byte == b'[' {
					self.parser = ParserState::Csi;
					self.csi_params.clear();
					self.csi_current = None;
				} else {
					self.parser = ParserState::Normal;
				}
			}
			ParserState::Csi => match byte {
				b'0'..=b'9' => {
					let d = (byte - b'0') as u16;
					self.csi_current = Some(self.csi_current.unwrap_or(0) * 10 + d);
				}
				b';' => {
					self.csi_params.push(self.csi_current.take().unwrap_or(0));
				}
				0x40..=0x7E => self.finish_csi(byte),
				_ => self.parser = ParserState::Normal,
			},
		}
	}

	fn feed_input_byte(&mut self, byte: u8) {
		if !self.canonical {
			self.raw_queue.push_back(byte);
			return;
		}
		match byte {
			b'\n' | EOF_SENTINEL => {
				if self.echo && byte == b'\n' {
					self.put_char(b'\n');
				}
				self.line_buffer.push(b'\n');
				let line = core::mem::take(&mut self.line_buffer);
				self.completed_lines.push_back(line);
			}
			0x08 => {
				if self.line_buffer.pop().is_some() && self.echo {
					self.put_char(0x08);
				}
			}
			KILL_CHAR => {
				if self.echo {
					for _ in 0..self.line_buffer.len() {
						self.put_char(0x08);
					}
				}
				self.line_buffer.clear();
			}
			INTERRUPT_CHAR => {
				self.line_buffer.clear();
				self.interrupt_pending = true;
			}
			byte => {
				self.line_buffer.push(byte);
				if self.echo {
					self.put_char(byte);
				}
			}
		}
	}
}

static TERMINALS: Spinlock<Vec<Terminal>> = Spinlock::new(Vec::new());

pub fn init() {
	let mut terms = TERMINALS.lock();
	terms.clear();
	for _ in 0..TERM_COUNT {
		terms.push(Terminal::new());
	}
}

/// Feed output bytes (from a process's write to `/dev/ttyN`) through the
/// ANSI parser into terminal `idx`'s screen model.
pub fn write_tty(idx: usize, buf: &[u8]) -> Result<usize> {
	let mut terms = TERMINALS.lock();
	let term = terms.get_mut(idx).ok_or(Error::ENODEV)?;
	for &byte in buf {
		term.feed_output_byte(byte);
	}
	if idx == 0 {
		if let Ok(s) = core::str::from_utf8(buf) {
			crate::console::write_str(s);
		}
	}
	Ok(buf.len())
}

/// Pull a completed canonical-mode line, or whatever is queued in raw mode.
/// Returns `Error::WouldBlock` when nothing is available yet — there is no
/// blocking process scheduler to suspend the caller on.
pub fn read_tty(idx: usize, buf: &mut [u8]) -> Result<usize> {
	let mut terms = TERMINALS.lock();
	let term = terms.get_mut(idx).ok_or(Error::ENODEV)?;
	if term.canonical {
		match term.completed_lines.pop_front() {
			Some(line) => {
				let n = line.len().min(buf.len());
				buf[..n].copy_from_slice(&line[..n]);
				Ok(n)
			}
			None => Err(Error::WouldBlock),
		}
	} else {
		let mut n = 0;
		while n < buf.len() {
			match term.raw_queue.pop_front() {
				Some(b) => {
					buf[n] = b;
					n += 1;
				}
				None => break,
			}
		}
		if n == 0 {
			Err(Error::WouldBlock)
		} else {
			Ok(n)
		}
	}
}

/// Deliver a keystroke to terminal `idx`'s line discipline. Called by the
/// keyboard driver's interrupt handler.
pub fn push_input(idx: usize, byte: u8) -> Result<()> {
	let mut terms = TERMINALS.lock();
	let term = terms.get_mut(idx).ok_or(Error::ENODEV)?;
	term.feed_input_byte(byte);
	Ok(())
}

pub fn set_canonical(idx: usize, canonical: bool) -> Result<()> {
	let mut terms = TERMINALS.lock();
	let term = terms.get_mut(idx).ok_or(Error::ENODEV)?;
	term.canonical = canonical;
	Ok(())
}

pub fn set_echo(idx: usize, echo: bool) -> Result<()> {
	let mut terms = TERMINALS.lock();
	let term = terms.get_mut(idx).ok_or(Error::ENODEV)?;
	term.echo = echo;
	Ok(())
}

/// Consume and clear the pending-interrupt flag a CTRL+C raised. The
/// scheduler this would signal into is out of scope; callers poll this to
/// learn a foreground job should be interrupted.
pub fn take_interrupt(idx: usize) -> Result<bool> {
	let mut terms = TERMINALS.lock();
	let term = terms.get_mut(idx).ok_or(Error::ENODEV)?;
	Ok(core::mem::take(&mut term.interrupt_pending))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn canonical_line_completes_on_newline() {
		init();
		for b in b"hi\n" {
			push_input(0, *b).unwrap();
		}
		let mut buf = [0u8; 8];
		let n = read_tty(0, &mut buf).unwrap();
		assert_eq!(&buf[..n], b"hi\n");
	}

	#[test]
	fn empty_queue_reports_would_block() {
		init();
		let mut buf = [0u8; 8];
		assert_eq!(read_tty(0, &mut buf), Err(Error::WouldBlock));
	}

	#[test]
	fn csi_sequence_split_across_writes_still_parses() {
		init();
		write_tty(0, b"\x1b[").unwrap();
		write_tty(0, b"2J").unwrap();
		let terms = TERMINALS.lock();
		assert!(matches!(terms[0].parser, ParserState::Normal));
	}

	#[test]
	fn cursor_forward_respects_column_bound() {
		init();
		write_tty(0, b"\x1b[200C").unwrap();
		let terms = TERMINALS.lock();
		assert_eq!(terms[0].cursor_col, TERM_COLUMNS - 1);
	}

	#[test]
	fn backspace_in_raw_mode_is_not_special() {
		init();
		set_canonical(0, false).unwrap();
		push_input(0, 0x08).unwrap();
		let mut buf = [0u8; 1];
		let n = read_tty(0, &mut buf).unwrap();
		assert_eq!(buf[..n], [0x08]);
	}

	#[test]
	fn kill_char_erases_line_before_newline() {
		init();
		for b in b"hello" {
			push_input(0, *b).unwrap();
		}
		push_input(0, KILL_CHAR).unwrap();
		push_input(0, b'h').unwrap();
		push_input(0, b'i').unwrap();
		push_input(0, b'\n').unwrap();
		let mut buf = [0u8; 8];
		let n = read_tty(0, &mut buf).unwrap();
		assert_eq!(&buf[..n], b"hi\n");
	}

	#[test]
	fn interrupt_char_discards_line_and_sets_pending() {
		init();
		for b in b"partial" {
			push_input(0, *b).unwrap();
		}
		push_input(0, INTERRUPT_CHAR).unwrap();
		let mut buf = [0u8; 8];
		assert_eq!(read_tty(0, &mut buf), Err(Error::WouldBlock));
		assert!(take_interrupt(0).unwrap());
		assert!(!take_interrupt(0).unwrap());
	}

	#[test]
	fn sgr_reset_restores_default_color() {
		init();
		write_tty(0, b"\x1b[31;1m").unwrap();
		write_tty(0, b"\x1b[0m").unwrap();
		let terms = TERMINALS.lock();
		assert_eq!(terms[0].attr, 0x07);
	}
}
