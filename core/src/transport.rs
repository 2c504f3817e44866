/*
 * transport.rs
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

//! Byte-level transports. Everything above this layer works against the
//! `Transport` trait; plain TCP and the in-memory buffer stream live here,
//! the TLS wrappers in the tls module.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

/// A bidirectional byte stream a connection runs over.
///
/// Read timeouts are owned by the connection loops: the keep-alive idle wait
/// and the in-message read timeout differ, so the loops switch them as a
/// message progresses.
pub trait Transport: Read + Write {
    /// Peer address, when the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Set the timeout applied to subsequent reads. `None` blocks forever.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Half-close: signal the end of outgoing data while reads stay open.
    /// Dropping a socket with unread input pending resets it, destroying
    /// responses the peer has not read yet; half-closing first avoids that.
    fn shutdown_write(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

/// In-memory transport: reads from a preloaded input, records writes.
/// Used by unit tests and anywhere a message must be framed without a socket.
#[derive(Debug, Default)]
pub struct BufferStream {
    input: Vec<u8>,
    position: usize,
    output: Vec<u8>,
}

impl BufferStream {
    pub fn new(input: impl Into<Vec<u8>>) -> Self {
        BufferStream {
            input: input.into(),
            position: 0,
            output: Vec::new(),
        }
    }

    /// Bytes written into the stream so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn into_output(self) -> Vec<u8> {
        self.output
    }

    /// Unread remainder of the input.
    pub fn remaining(&self) -> usize {
        self.input.len() - self.position
    }
}

impl Read for BufferStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.input.len() - self.position;
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.input[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

impl Write for BufferStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for BufferStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        Ok(())
    }
}
