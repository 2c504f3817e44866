/*
 * linereader.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, an embedded HTTP engine.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Accumulates transport bytes into newline-terminated lines. Reads are
//! byte-at-a-time so the reader never consumes past the `\n` that ends the
//! current line; wire lines are short, so this stays off the hot path.

use std::io;

use crate::transport::Transport;

/// Line accumulator over a caller-supplied fixed buffer. When a line outgrows
/// the fixed buffer a growable one transparently takes over.
pub(crate) struct LineReader<'s, 'b> {
    strm: &'s mut dyn Transport,
    fixed: &'b mut [u8],
    fixed_used: usize,
    grown: Vec<u8>,
}

impl<'s, 'b> LineReader<'s, 'b> {
    pub fn new(strm: &'s mut dyn Transport, fixed: &'b mut [u8]) -> Self {
        LineReader {
            strm,
            fixed,
            fixed_used: 0,
            grown: Vec::new(),
        }
    }

    /// Read one line, including its terminator. `Ok(false)` means the peer
    /// ended the stream with zero bytes pending: a clean connection end, not
    /// an error. End-of-stream mid-line yields the partial line as `Ok(true)`.
    pub fn getline(&mut self) -> io::Result<bool> {
        self.fixed_used = 0;
        self.grown.clear();
        let mut byte = [0u8; 1];
        loop {
            let n = self.strm.read(&mut byte)?;
            if n == 0 {
                if self.len() == 0 {
                    return Ok(false);
                }
                break;
            }
            self.append(byte[0]);
            if byte[0] == b'\n' {
                break;
            }
        }
        Ok(true)
    }

    /// The current line, terminator included.
    pub fn line(&self) -> &[u8] {
        if self.grown.is_empty() {
            &self.fixed[..self.fixed_used]
        } else {
            &self.grown
        }
    }

    pub fn len(&self) -> usize {
        if self.grown.is_empty() {
            self.fixed_used
        } else {
            self.grown.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(&mut self, byte: u8) {
        if self.grown.is_empty() && self.fixed_used < self.fixed.len() {
            self.fixed[self.fixed_used] = byte;
            self.fixed_used += 1;
        } else {
            if self.grown.is_empty() {
                self.grown.extend_from_slice(&self.fixed[..self.fixed_used]);
            }
            self.grown.push(byte);
        }
    }
}

/// Strip one trailing `\r\n` or `\n` from a wire line.
pub(crate) fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\r\n").unwrap_or(line);
    match line.strip_suffix(b"\n") {
        Some(stripped) => stripped,
        None => line,
    }
}
