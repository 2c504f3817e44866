/*
 * error.rs
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

//! Engine errors.

use std::fmt;
use std::io;

/// Errors from parsing, body transfer, routing, or transport operations.
#[derive(Debug)]
pub enum Error {
    /// Transport-level read/write/connect failure.
    Io(io::Error),
    /// Malformed request line, status line, header, chunk framing, or multipart structure.
    Malformed(String),
    /// Declared body length exceeds the configured maximum.
    PayloadTooLarge,
    /// Request target exceeds the configured maximum length.
    UriTooLong,
    /// Body carries a content encoding this build cannot decode.
    UnsupportedEncoding,
    /// A progress callback asked for the transfer to stop.
    Cancelled,
    /// TLS handshake, configuration, or certificate verification failure.
    Tls(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Status code a server should answer with when this error aborts a request.
    pub fn status(&self) -> i32 {
        match self {
            Error::Malformed(_) | Error::Io(_) => 400,
            Error::PayloadTooLarge => 413,
            Error::UriTooLong => 414,
            Error::UnsupportedEncoding => 415,
            Error::Cancelled | Error::Tls(_) => 500,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "i/o error: {}", e),
            Error::Malformed(m) => write!(f, "malformed message: {}", m),
            Error::PayloadTooLarge => write!(f, "payload too large"),
            Error::UriTooLong => write!(f, "request target too long"),
            Error::UnsupportedEncoding => write!(f, "unsupported content encoding"),
            Error::Cancelled => write!(f, "transfer cancelled"),
            Error::Tls(m) => write!(f, "tls error: {}", m),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
