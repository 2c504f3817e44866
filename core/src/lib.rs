/*
 * lib.rs
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

//! Corriere: an embedded HTTP/1.x engine with a blocking server and client.
//!
//! The server runs a fixed worker pool behind a polling accept loop, routes
//! requests by regex, serves static files and speaks keep-alive with a
//! per-connection request budget. The client opens one connection per call.
//! Both ends share the same transport abstraction, line reader, header and
//! URL codecs and body framer, so anything that can carry bytes (including
//! an in-memory buffer) can carry HTTP.
//!
//! TLS (rustls) and gzip (flate2) support are compiled in by default and can
//! be switched off by disabling the `tls` and `gzip` features.

mod body;
mod config;
mod linereader;
mod multipart;
mod pool;
mod router;

pub mod client;
pub mod error;
pub mod message;
pub mod server;
#[cfg(feature = "tls")]
pub mod tls;
pub mod transport;
pub mod urlcodec;

pub use client::Client;
pub use error::{Error, Result};
pub use message::{
    make_range_header, status_message, ContentProducer, ContentReceiver, Headers, Method,
    MultipartFile, Params, Progress, Request, Response,
};
pub use server::Server;
#[cfg(feature = "tls")]
pub use tls::VerifyResult;
pub use transport::{BufferStream, Transport};
pub use urlcodec::{decode_url, encode_url, parse_query};
