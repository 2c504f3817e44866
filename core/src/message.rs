/*
 * message.rs
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

//! Request/Response data model: methods, header and parameter multimaps,
//! multipart file descriptors, body callbacks, and the small pieces of wire
//! vocabulary (status reasons, Range synthesis, header-line grammar).
//!
//! One Request/Response pair exists per server connection cycle or per client
//! call; nothing here is pooled or reused across cycles.

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::config::LINE_BUFFER_SIZE;
use crate::error::{Error, Result};
use crate::linereader::{trim_line_ending, LineReader};
use crate::transport::Transport;

/// Request method. The engine speaks a closed set; unknown tokens on the wire
/// are malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }

    pub fn from_token(token: &str) -> Option<Method> {
        match token {
            "GET" => Some(Method::Get),
            "HEAD" => Some(Method::Head),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "PATCH" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            "OPTIONS" => Some(Method::Options),
            _ => None,
        }
    }

    /// Methods the server reads a request body for.
    pub fn has_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header multimap. Lookups are case-insensitive; the stored casing,
/// insertion order, and duplicates are preserved on output.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    /// Append a header. Duplicates are kept; nothing is replaced.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Value for `name`, or `default` when absent.
    pub fn value_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Ordered query/form parameter multimap. Keys are case-sensitive.
#[derive(Debug, Clone, Default)]
pub struct Params {
    entries: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Self {
        Params::default()
    }

    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One decoded multipart part: where its payload lives in the request body.
/// Offset and length index the original body buffer; the payload is never
/// copied out during decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartFile {
    pub filename: String,
    pub content_type: String,
    pub offset: usize,
    pub length: usize,
}

/// Transfer progress callback: `(bytes_read, total)`, return false to abort.
pub type Progress = Box<dyn FnMut(u64, u64) -> bool + Send + 'static>;

/// Pull-based body producer: called with the running offset, returns the next
/// chunk; an empty chunk ends the body.
pub type ContentProducer = Box<dyn FnMut(u64) -> Bytes + Send + 'static>;

/// Push-based body consumer for streamed downloads.
pub type ContentReceiver = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// An incoming request on the server, or an outgoing request on the client.
#[derive(Default)]
pub struct Request {
    pub method: Method,
    /// Raw request-target as it appeared on the wire.
    pub target: String,
    /// URL-decoded path component of the target.
    pub path: String,
    pub query: Params,
    pub headers: Headers,
    pub body: Bytes,
    /// Multipart parts by field name, in body order.
    pub files: Vec<(String, MultipartFile)>,
    /// Sub-groups bound from the matched route pattern.
    pub captures: Vec<String>,
    pub remote_addr: Option<SocketAddr>,
}

impl Request {
    pub fn new() -> Self {
        Request::default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.add(name, value);
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.query.get(key)
    }

    pub fn has_param(&self, key: &str) -> bool {
        self.query.contains(key)
    }

    pub fn has_file(&self, name: &str) -> bool {
        self.files.iter().any(|(n, _)| n == name)
    }

    /// First multipart part registered under `name`.
    pub fn file(&self, name: &str) -> Option<&MultipartFile> {
        self.files.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// Payload of a multipart part as a zero-copy slice of the body.
    pub fn file_content(&self, file: &MultipartFile) -> Bytes {
        self.body.slice(file.offset..file.offset + file.length)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("path", &self.path)
            .field("headers", &self.headers.len())
            .field("body", &self.body.len())
            .finish()
    }
}

/// An outgoing response on the server, or a parsed response on the client.
///
/// `body` and the content producer are mutually exclusive; setting one clears
/// the other. A receiver, when attached on the client side, consumes body
/// bytes as they arrive instead of accumulating them into `body`.
pub struct Response {
    /// Status code; -1 until a handler or parser assigns one.
    pub status: i32,
    pub headers: Headers,
    pub body: Bytes,
    pub(crate) producer: Option<ContentProducer>,
    pub(crate) receiver: Option<ContentReceiver>,
    pub(crate) progress: Option<Progress>,
}

impl Default for Response {
    fn default() -> Self {
        Response {
            status: -1,
            headers: Headers::new(),
            body: Bytes::new(),
            producer: None,
            receiver: None,
            progress: None,
        }
    }
}

impl Response {
    pub fn new() -> Self {
        Response::default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.add(name, value);
    }

    /// Set the body and its content type.
    pub fn set_content(&mut self, body: impl Into<Bytes>, content_type: &str) {
        self.body = body.into();
        self.producer = None;
        self.set_header("Content-Type", content_type);
    }

    /// 302 redirect to `url`.
    pub fn set_redirect(&mut self, url: &str) {
        self.set_header("Location", url);
        self.status = 302;
    }

    /// Attach a pull-based body producer; replaces any fixed body.
    pub fn set_content_producer(
        &mut self,
        producer: impl FnMut(u64) -> Bytes + Send + 'static,
    ) {
        self.body = Bytes::new();
        self.producer = Some(Box::new(producer));
    }

    pub fn has_content_producer(&self) -> bool {
        self.producer.is_some()
    }

    /// Attach a push-based consumer for a streamed download.
    pub fn set_receiver(&mut self, receiver: impl FnMut(&[u8]) + Send + 'static) {
        self.receiver = Some(Box::new(receiver));
    }

    /// Attach a transfer progress callback; returning false aborts the read.
    pub fn set_progress(&mut self, progress: impl FnMut(u64, u64) -> bool + Send + 'static) {
        self.progress = Some(Box::new(progress));
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers.len())
            .field("body", &self.body.len())
            .field("producer", &self.producer.is_some())
            .finish()
    }
}

/// Default reason phrase for a status code. Unknown codes fall back to the
/// internal-error phrase.
pub fn status_message(status: i32) -> &'static str {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        413 => "Payload Too Large",
        414 => "Request-URI Too Long",
        415 => "Unsupported Media Type",
        _ => "Internal Server Error",
    }
}

/// Build a `Range` header from `(first, last)` pairs; `None` as the last
/// position leaves the range open-ended: `bytes=a-b, c-d, e-`.
pub fn make_range_header(ranges: &[(u64, Option<u64>)]) -> (String, String) {
    let mut field = String::from("bytes=");
    for (i, (first, last)) in ranges.iter().enumerate() {
        if i > 0 {
            field.push_str(", ");
        }
        field.push_str(&first.to_string());
        field.push('-');
        if let Some(last) = last {
            field.push_str(&last.to_string());
        }
    }
    ("Range".to_string(), field)
}

/// Parse one `Name: Value` header line, both sides trimmed. Lines without a
/// colon or with an empty name are malformed.
pub(crate) fn parse_header_line(line: &[u8]) -> Result<(String, String)> {
    let line = trim_line_ending(line);
    let text = String::from_utf8_lossy(line);
    let (name, value) = text
        .split_once(':')
        .ok_or_else(|| Error::malformed("header line without colon"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::malformed("header line with empty name"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Read header lines off the transport until the bare CRLF that ends the
/// block. End-of-stream before the terminator is malformed.
pub(crate) fn read_headers(strm: &mut dyn Transport, headers: &mut Headers) -> Result<()> {
    let mut buf = [0u8; LINE_BUFFER_SIZE];
    let mut reader = LineReader::new(strm, &mut buf);
    loop {
        if !reader.getline()? {
            return Err(Error::malformed("end of stream inside header block"));
        }
        if reader.line() == b"\r\n" {
            return Ok(());
        }
        let (name, value) = parse_header_line(reader.line())?;
        headers.add(name, value);
    }
}
