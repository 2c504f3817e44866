/*
 * client.rs
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

//! The HTTP client: one connection per call, request written whole, response
//! read until framing or end of stream. TLS connections verify the peer
//! unless verification is switched off, and the outcome of hostname
//! verification can be inspected after the call.
//!
//! ```no_run
//! use corriere_core::Client;
//!
//! let client = Client::new("example.com", 0);
//! let res = client.get("/index.html").unwrap();
//! assert_eq!(res.status, 200);
//! ```

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

#[cfg(feature = "tls")]
use std::path::PathBuf;
#[cfg(feature = "tls")]
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tracing::debug;

use crate::body;
use crate::config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_PAYLOAD_LENGTH, DEFAULT_READ_TIMEOUT, LINE_BUFFER_SIZE,
};
use crate::error::{Error, Result};
use crate::linereader::{trim_line_ending, LineReader};
use crate::message::{read_headers, Headers, Method, Params, Request, Response};
#[cfg(feature = "tls")]
use crate::tls::{self, VerifyResult};
use crate::transport::Transport;
use crate::urlcodec::encode_url;

pub struct Client {
    host: String,
    port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
    payload_max_length: usize,
    #[cfg(feature = "tls")]
    secure: bool,
    #[cfg(feature = "tls")]
    ca_cert_path: Option<PathBuf>,
    #[cfg(feature = "tls")]
    verify: bool,
    #[cfg(feature = "tls")]
    verify_report: Arc<Mutex<VerifyResult>>,
}

impl Client {
    /// Plain HTTP client for `host`. Port 0 means the scheme default.
    pub fn new(host: &str, port: u16) -> Client {
        Client {
            host: host.to_string(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            payload_max_length: DEFAULT_MAX_PAYLOAD_LENGTH,
            #[cfg(feature = "tls")]
            secure: false,
            #[cfg(feature = "tls")]
            ca_cert_path: None,
            #[cfg(feature = "tls")]
            verify: true,
            #[cfg(feature = "tls")]
            verify_report: Arc::new(Mutex::new(VerifyResult::NotVerified)),
        }
    }

    /// HTTPS client for `host`. Port 0 means 443.
    #[cfg(feature = "tls")]
    pub fn new_tls(host: &str, port: u16) -> Client {
        let mut client = Client::new(host, port);
        client.secure = true;
        client
    }

    #[cfg(feature = "tls")]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    #[cfg(not(feature = "tls"))]
    pub fn is_secure(&self) -> bool {
        false
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.read_timeout = timeout;
        self
    }

    /// Largest response body accepted before the call fails.
    pub fn set_payload_max_length(&mut self, length: usize) -> &mut Self {
        self.payload_max_length = length;
        self
    }

    /// Trust anchors from this PEM file instead of the platform store.
    #[cfg(feature = "tls")]
    pub fn set_ca_cert_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Switch certificate verification off. The handshake then accepts any
    /// peer; [`verify_result`](Client::verify_result) reports NotVerified.
    #[cfg(feature = "tls")]
    pub fn set_verify(&mut self, verify: bool) -> &mut Self {
        self.verify = verify;
        self
    }

    /// Outcome of peer verification for the most recent TLS connection.
    #[cfg(feature = "tls")]
    pub fn verify_result(&self) -> VerifyResult {
        *self
            .verify_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, path: &str) -> Result<Response> {
        let mut req = self.request(Method::Get, path);
        let mut res = Response::new();
        self.send(&mut req, &mut res)?;
        Ok(res)
    }

    pub fn get_with_headers(&self, path: &str, headers: Headers) -> Result<Response> {
        let mut req = self.request(Method::Get, path);
        req.headers = headers;
        let mut res = Response::new();
        self.send(&mut req, &mut res)?;
        Ok(res)
    }

    /// GET, delivering body bytes to `receiver` as they arrive instead of
    /// accumulating them.
    pub fn get_streamed(
        &self,
        path: &str,
        receiver: impl FnMut(&[u8]) + Send + 'static,
    ) -> Result<Response> {
        let mut req = self.request(Method::Get, path);
        let mut res = Response::new();
        res.set_receiver(receiver);
        self.send(&mut req, &mut res)?;
        Ok(res)
    }

    /// GET with a progress callback; returning false from it aborts the
    /// transfer.
    pub fn get_with_progress(
        &self,
        path: &str,
        progress: impl FnMut(u64, u64) -> bool + Send + 'static,
    ) -> Result<Response> {
        let mut req = self.request(Method::Get, path);
        let mut res = Response::new();
        res.set_progress(progress);
        self.send(&mut req, &mut res)?;
        Ok(res)
    }

    pub fn head(&self, path: &str) -> Result<Response> {
        let mut req = self.request(Method::Head, path);
        let mut res = Response::new();
        self.send(&mut req, &mut res)?;
        Ok(res)
    }

    pub fn post(
        &self,
        path: &str,
        body: impl Into<Bytes>,
        content_type: &str,
    ) -> Result<Response> {
        self.send_with_body(Method::Post, path, body.into(), content_type)
    }

    /// POST a form-encoded parameter set.
    pub fn post_params(&self, path: &str, params: &Params) -> Result<Response> {
        self.post(path, encode_params(params), "application/x-www-form-urlencoded")
    }

    pub fn put(
        &self,
        path: &str,
        body: impl Into<Bytes>,
        content_type: &str,
    ) -> Result<Response> {
        self.send_with_body(Method::Put, path, body.into(), content_type)
    }

    pub fn patch(
        &self,
        path: &str,
        body: impl Into<Bytes>,
        content_type: &str,
    ) -> Result<Response> {
        self.send_with_body(Method::Patch, path, body.into(), content_type)
    }

    pub fn delete(&self, path: &str) -> Result<Response> {
        let mut req = self.request(Method::Delete, path);
        let mut res = Response::new();
        self.send(&mut req, &mut res)?;
        Ok(res)
    }

    pub fn options(&self, path: &str) -> Result<Response> {
        let mut req = self.request(Method::Options, path);
        let mut res = Response::new();
        self.send(&mut req, &mut res)?;
        Ok(res)
    }

    /// Run one full request/response exchange on a fresh connection.
    /// Receiver and progress callbacks attached to `res` are consumed.
    pub fn send(&self, req: &mut Request, res: &mut Response) -> Result<()> {
        debug!("{} {}:{} {}", req.method, self.host, self.effective_port(), req.target);
        let mut strm = self.connect()?;
        self.write_request(strm.as_mut(), req)?;
        self.read_response(strm.as_mut(), req, res)
    }

    fn request(&self, method: Method, path: &str) -> Request {
        let mut req = Request::new();
        req.method = method;
        req.target = path.to_string();
        req
    }

    fn send_with_body(
        &self,
        method: Method,
        path: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<Response> {
        let mut req = self.request(method, path);
        req.body = body;
        req.set_header("Content-Type", content_type);
        let mut res = Response::new();
        self.send(&mut req, &mut res)?;
        Ok(res)
    }

    fn effective_port(&self) -> u16 {
        if self.port != 0 {
            self.port
        } else if self.is_secure() {
            443
        } else {
            80
        }
    }

    fn connect(&self) -> Result<Box<dyn Transport>> {
        let port = self.effective_port();
        let addrs = (self.host.as_str(), port).to_socket_addrs()?;
        let mut last_err: Option<io::Error> = None;
        let mut connected = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(sock) => {
                    connected = Some(sock);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let sock = match connected {
            Some(sock) => sock,
            None => {
                return Err(Error::Io(last_err.unwrap_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
                })))
            }
        };
        sock.set_read_timeout(Some(self.read_timeout))?;
        sock.set_write_timeout(Some(self.read_timeout))?;
        self.wrap(sock)
    }

    #[cfg(feature = "tls")]
    fn wrap(&self, sock: TcpStream) -> Result<Box<dyn Transport>> {
        if self.secure {
            let strm = tls::connect_client(
                sock,
                &self.host,
                self.ca_cert_path.as_deref(),
                self.verify,
                Arc::clone(&self.verify_report),
            )?;
            Ok(Box::new(strm))
        } else {
            Ok(Box::new(sock))
        }
    }

    #[cfg(not(feature = "tls"))]
    fn wrap(&self, sock: TcpStream) -> Result<Box<dyn Transport>> {
        Ok(Box::new(sock))
    }

    /// Default headers are only added when the caller has not set them.
    fn write_request(&self, strm: &mut dyn Transport, req: &Request) -> Result<()> {
        let mut head = format!("{} {} HTTP/1.1\r\n", req.method, encode_url(&req.target));
        if !req.headers.contains("Host") {
            let port = self.effective_port();
            let default_port = if self.is_secure() { 443 } else { 80 };
            if port == default_port {
                head.push_str(&format!("Host: {}\r\n", self.host));
            } else {
                head.push_str(&format!("Host: {}:{}\r\n", self.host, port));
            }
        }
        if !req.headers.contains("Accept") {
            head.push_str("Accept: */*\r\n");
        }
        if !req.headers.contains("User-Agent") {
            head.push_str(concat!("User-Agent: corriere/", env!("CARGO_PKG_VERSION"), "\r\n"));
        }
        if !req.headers.contains("Connection") {
            head.push_str("Connection: close\r\n");
        }
        if !req.body.is_empty() && !req.headers.contains("Content-Length") {
            head.push_str(&format!("Content-Length: {}\r\n", req.body.len()));
        }
        for (name, value) in req.headers.iter() {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        strm.write_all(head.as_bytes())?;
        if !req.body.is_empty() {
            strm.write_all(&req.body)?;
        }
        strm.flush()?;
        Ok(())
    }

    fn read_response(
        &self,
        strm: &mut dyn Transport,
        req: &Request,
        res: &mut Response,
    ) -> Result<()> {
        let mut linebuf = [0u8; LINE_BUFFER_SIZE];
        let status_line = {
            let mut reader = LineReader::new(strm, &mut linebuf);
            if !reader.getline()? {
                return Err(Error::malformed("no response from server"));
            }
            reader.line().to_vec()
        };
        res.status = parse_status_line(&status_line)
            .ok_or_else(|| Error::malformed("malformed status line"))?;
        read_headers(strm, &mut res.headers)?;
        if req.method == Method::Head {
            return Ok(());
        }
        let mut receiver = res.receiver.take();
        let mut progress = res.progress.take();
        let mut accumulated: Vec<u8> = Vec::new();
        body::read_body(
            strm,
            &res.headers,
            self.payload_max_length,
            true,
            &mut progress,
            &mut |chunk| match receiver.as_mut() {
                Some(receiver) => receiver(chunk),
                None => accumulated.extend_from_slice(chunk),
            },
        )?;
        if receiver.is_none() {
            res.body = Bytes::from(accumulated);
        }
        Ok(())
    }
}

fn encode_params(params: &Params) -> String {
    let mut form = String::new();
    for (key, value) in params.iter() {
        if !form.is_empty() {
            form.push('&');
        }
        form.push_str(&encode_url(key));
        form.push('=');
        form.push_str(&encode_url(value));
    }
    form
}

/// Extract the status code; the reason phrase is not kept.
fn parse_status_line(line: &[u8]) -> Option<i32> {
    let line = trim_line_ending(line);
    let text = std::str::from_utf8(line).ok()?;
    let (version, rest) = text.split_once(' ')?;
    if version != "HTTP/1.1" && version != "HTTP/1.0" {
        return None;
    }
    let code = match rest.split_once(' ') {
        Some((code, _reason)) => code,
        None => rest,
    };
    code.parse::<i32>().ok()
}
