/*
 * server.rs
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

//! The embedded HTTP server: a blocking accept loop feeding a fixed worker
//! pool, with per-connection keep-alive accounting, regex routing, static
//! file serving and hook points for error pages and request logging.
//!
//! ```no_run
//! use corriere_core::Server;
//!
//! let mut server = Server::new();
//! server.get("/hello/(.+)", |req, res| {
//!     res.set_content(format!("hello, {}", req.captures[0]), "text/plain");
//! });
//! server.listen("127.0.0.1", 8080).unwrap();
//! ```

use std::fs;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

#[cfg(feature = "tls")]
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::body;
use crate::config::{
    default_worker_count, ACCEPT_POLL_INTERVAL, CLOSE_DRAIN_LIMIT, CLOSE_DRAIN_TIMEOUT,
    DEFAULT_KEEP_ALIVE_MAX_REQUESTS, DEFAULT_KEEP_ALIVE_TIMEOUT, DEFAULT_MAX_PAYLOAD_LENGTH,
    DEFAULT_MAX_TARGET_LENGTH, DEFAULT_READ_TIMEOUT, LINE_BUFFER_SIZE, RECV_BUFFER_SIZE,
};
use crate::error::{Error, Result};
use crate::linereader::LineReader;
use crate::message::{read_headers, status_message, Method, Request, Response};
use crate::multipart;
use crate::pool;
use crate::router::{Handler, Router};
#[cfg(feature = "tls")]
use crate::tls;
use crate::transport::Transport;
use crate::urlcodec::{decode_url, parse_query};

type Logger = Box<dyn Fn(&Request, &Response) + Send + Sync + 'static>;

/// What to do with the connection after a request cycle.
enum Flow {
    KeepAlive,
    Close,
}

pub struct Server {
    router: Router,
    base_dir: Option<PathBuf>,
    error_handler: Option<Handler>,
    logger: Option<Logger>,
    keep_alive_max_requests: usize,
    keep_alive_timeout: Duration,
    read_timeout: Duration,
    payload_max_length: usize,
    max_target_length: usize,
    worker_count: usize,
    running: AtomicBool,
    bound: Mutex<Option<TcpListener>>,
    #[cfg(feature = "tls")]
    tls: Option<Arc<rustls::ServerConfig>>,
}

impl Default for Server {
    fn default() -> Self {
        Server::new()
    }
}

impl Server {
    pub fn new() -> Server {
        Server {
            router: Router::new(),
            base_dir: None,
            error_handler: None,
            logger: None,
            keep_alive_max_requests: DEFAULT_KEEP_ALIVE_MAX_REQUESTS,
            keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            payload_max_length: DEFAULT_MAX_PAYLOAD_LENGTH,
            max_target_length: DEFAULT_MAX_TARGET_LENGTH,
            worker_count: default_worker_count(),
            running: AtomicBool::new(false),
            bound: Mutex::new(None),
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    pub fn get(
        &mut self,
        pattern: &str,
        handler: impl Fn(&Request, &mut Response) + Send + Sync + 'static,
    ) -> &mut Self {
        self.router.add(Method::Get, pattern, Box::new(handler));
        self
    }

    pub fn post(
        &mut self,
        pattern: &str,
        handler: impl Fn(&Request, &mut Response) + Send + Sync + 'static,
    ) -> &mut Self {
        self.router.add(Method::Post, pattern, Box::new(handler));
        self
    }

    pub fn put(
        &mut self,
        pattern: &str,
        handler: impl Fn(&Request, &mut Response) + Send + Sync + 'static,
    ) -> &mut Self {
        self.router.add(Method::Put, pattern, Box::new(handler));
        self
    }

    pub fn patch(
        &mut self,
        pattern: &str,
        handler: impl Fn(&Request, &mut Response) + Send + Sync + 'static,
    ) -> &mut Self {
        self.router.add(Method::Patch, pattern, Box::new(handler));
        self
    }

    pub fn delete(
        &mut self,
        pattern: &str,
        handler: impl Fn(&Request, &mut Response) + Send + Sync + 'static,
    ) -> &mut Self {
        self.router.add(Method::Delete, pattern, Box::new(handler));
        self
    }

    pub fn options(
        &mut self,
        pattern: &str,
        handler: impl Fn(&Request, &mut Response) + Send + Sync + 'static,
    ) -> &mut Self {
        self.router.add(Method::Options, pattern, Box::new(handler));
        self
    }

    /// Serve static files for GET/HEAD from this directory when no route
    /// claims the path first. A trailing slash maps to index.html.
    pub fn set_base_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Hook run on every response with status >= 400, before it is written.
    pub fn set_error_handler(
        &mut self,
        handler: impl Fn(&Request, &mut Response) + Send + Sync + 'static,
    ) -> &mut Self {
        self.error_handler = Some(Box::new(handler));
        self
    }

    /// Hook run after every response has been written.
    pub fn set_logger(
        &mut self,
        logger: impl Fn(&Request, &Response) + Send + Sync + 'static,
    ) -> &mut Self {
        self.logger = Some(Box::new(logger));
        self
    }

    /// Requests served per connection before it is closed.
    pub fn set_keep_alive_max_requests(&mut self, count: usize) -> &mut Self {
        self.keep_alive_max_requests = count.max(1);
        self
    }

    /// How long an idle connection may wait for its next request.
    pub fn set_keep_alive_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.keep_alive_timeout = timeout;
        self
    }

    /// Read timeout applied once a request has started arriving.
    pub fn set_read_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.read_timeout = timeout;
        self
    }

    /// Largest request body accepted before answering 413.
    pub fn set_payload_max_length(&mut self, length: usize) -> &mut Self {
        self.payload_max_length = length;
        self
    }

    /// Longest request-target accepted before answering 414.
    pub fn set_max_target_length(&mut self, length: usize) -> &mut Self {
        self.max_target_length = length;
        self
    }

    pub fn set_worker_count(&mut self, count: usize) -> &mut Self {
        self.worker_count = count.max(1);
        self
    }

    /// Serve TLS with the given PEM certificate chain and private key.
    #[cfg(feature = "tls")]
    pub fn set_tls_files(&mut self, cert_path: &Path, key_path: &Path) -> Result<&mut Self> {
        self.tls = Some(Arc::new(tls::server_config(cert_path, key_path)?));
        Ok(self)
    }

    /// Bind to an OS-assigned port and return it; serve later with
    /// [`listen_after_bind`](Server::listen_after_bind).
    pub fn bind_to_any_port(&self, host: &str) -> Result<u16> {
        let listener = TcpListener::bind((host, 0))?;
        let port = listener.local_addr()?.port();
        *self.bound.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
        Ok(port)
    }

    /// Serve on the listener prepared by [`bind_to_any_port`](Server::bind_to_any_port).
    /// Blocks until [`stop`](Server::stop) is called.
    pub fn listen_after_bind(&self) -> Result<()> {
        let listener = self
            .bound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                Error::Io(io::Error::new(io::ErrorKind::NotConnected, "no bound listener"))
            })?;
        self.listen_internal(listener)
    }

    /// Bind and serve. Blocks until [`stop`](Server::stop) is called.
    pub fn listen(&self, host: &str, port: u16) -> Result<()> {
        let listener = TcpListener::bind((host, port))?;
        self.listen_internal(listener)
    }

    /// Ask a running server to shut down. The accept loop notices within its
    /// poll interval; in-flight requests finish first.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn listen_internal(&self, listener: TcpListener) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "server is already running",
            )));
        }
        let result = self.accept_loop(&listener);
        self.running.store(false, Ordering::SeqCst);
        result
    }

    fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        // Nonblocking accept so the loop can poll the running flag.
        listener.set_nonblocking(true)?;
        if let Ok(addr) = listener.local_addr() {
            info!("listening on {}", addr);
        }
        pool::serve(
            self.worker_count,
            |sock: TcpStream| self.serve_socket(sock),
            |tx| {
                while self.running.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((sock, addr)) => {
                            debug!("accepted connection from {}", addr);
                            // Accepted sockets can inherit the listener's
                            // nonblocking mode.
                            if let Err(e) = sock.set_nonblocking(false) {
                                warn!("failed to reset socket mode: {}", e);
                                continue;
                            }
                            if tx.send(sock).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(ACCEPT_POLL_INTERVAL);
                        }
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            thread::sleep(ACCEPT_POLL_INTERVAL);
                        }
                    }
                }
                info!("server stopped");
            },
        )?;
        Ok(())
    }

    fn serve_socket(&self, sock: TcpStream) {
        match self.make_transport(sock) {
            Ok(mut strm) => {
                if let Err(e) = self.serve_connection(strm.as_mut()) {
                    debug!("connection closed with error: {}", e);
                }
            }
            Err(e) => warn!("failed to establish transport: {}", e),
        }
    }

    #[cfg(feature = "tls")]
    fn make_transport(&self, sock: TcpStream) -> Result<Box<dyn Transport>> {
        match &self.tls {
            Some(config) => Ok(Box::new(tls::accept_server(sock, Arc::clone(config))?)),
            None => Ok(Box::new(sock)),
        }
    }

    #[cfg(not(feature = "tls"))]
    fn make_transport(&self, sock: TcpStream) -> Result<Box<dyn Transport>> {
        Ok(Box::new(sock))
    }

    /// Serve up to the keep-alive budget of requests on one connection, then
    /// wind the connection down.
    fn serve_connection(&self, strm: &mut dyn Transport) -> Result<()> {
        let served = self.run_requests(strm);
        close_gracefully(strm);
        served
    }

    fn run_requests(&self, strm: &mut dyn Transport) -> Result<()> {
        let mut budget = self.keep_alive_max_requests.max(1);
        loop {
            let last = budget == 1;
            match self.process_request(strm, last)? {
                Flow::Close => return Ok(()),
                Flow::KeepAlive => {}
            }
            budget -= 1;
            if budget == 0 {
                return Ok(());
            }
        }
    }

    /// One request/response cycle. `last` forces the close handshake on the
    /// final budgeted request.
    fn process_request(&self, strm: &mut dyn Transport, last: bool) -> Result<Flow> {
        // A connection idling between requests gets the keep-alive timeout;
        // once bytes arrive the per-read timeout takes over.
        strm.set_read_timeout(Some(self.keep_alive_timeout))?;
        let mut linebuf = [0u8; LINE_BUFFER_SIZE];
        let request_line = {
            let mut reader = LineReader::new(strm, &mut linebuf);
            match reader.getline() {
                Ok(true) => reader.line().to_vec(),
                // Zero-byte read between requests is the peer closing.
                Ok(false) => return Ok(Flow::Close),
                Err(e) => {
                    let timed_out = matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    );
                    if timed_out && reader.is_empty() {
                        return Ok(Flow::Close);
                    }
                    return Err(Error::Io(e));
                }
            }
        };
        strm.set_read_timeout(Some(self.read_timeout))?;

        let Some((method, target, http10)) = parse_request_line(&request_line) else {
            return self.fail_request(strm, &Error::malformed("malformed request line"));
        };
        if target.len() > self.max_target_length {
            return self.fail_request(strm, &Error::UriTooLong);
        }

        let mut req = Request::new();
        let mut res = Response::new();
        req.method = method;
        req.remote_addr = strm.peer_addr();
        match target.split_once('?') {
            Some((path, query)) => {
                req.path = decode_url(path);
                parse_query(query, &mut req.query);
            }
            None => req.path = decode_url(&target),
        }
        req.target = target;

        match read_headers(strm, &mut req.headers) {
            Ok(()) => {}
            Err(Error::Io(e)) => return Err(Error::Io(e)),
            Err(e) => return self.fail_request(strm, &e),
        }
        let connection_close = match req.headers.get("Connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => true,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => false,
            _ => http10,
        };

        if req.method.has_body() {
            let mut buf: Vec<u8> = Vec::new();
            let read = body::read_body(
                strm,
                &req.headers,
                self.payload_max_length,
                false,
                &mut None,
                &mut |chunk| buf.extend_from_slice(chunk),
            );
            match read {
                Ok(()) => req.body = Bytes::from(buf),
                Err(Error::Io(e)) => return Err(Error::Io(e)),
                Err(e) => return self.fail_request(strm, &e),
            }
            let content_type = req.headers.value_or("Content-Type", "");
            if content_type.starts_with("multipart/form-data") {
                let decoded = match multipart::parse_multipart_boundary(content_type) {
                    Some(boundary) => multipart::parse_multipart_formdata(&boundary, &req.body),
                    None => Err(Error::malformed("missing multipart boundary")),
                };
                match decoded {
                    Ok(files) => req.files = files,
                    Err(e) => return self.fail_request(strm, &e),
                }
            } else if content_type.starts_with("application/x-www-form-urlencoded") {
                let form = String::from_utf8_lossy(&req.body).into_owned();
                parse_query(&form, &mut req.query);
            }
        }

        let handled =
            self.handle_file_request(&req, &mut res) || self.router.dispatch(&mut req, &mut res);
        if !handled {
            res.status = 404;
        }
        if res.status == -1 {
            res.status = 200;
        }

        let close = connection_close || last;
        self.finish_response(strm, close, &req, &mut res)?;
        if close {
            return Ok(Flow::Close);
        }
        Ok(Flow::KeepAlive)
    }

    /// Answer with the canned status for `err` and close; used when the
    /// request never reached a handler.
    fn fail_request(&self, strm: &mut dyn Transport, err: &Error) -> Result<Flow> {
        debug!("rejecting request: {}", err);
        let req = Request::new();
        let mut res = Response::new();
        res.status = err.status();
        self.finish_response(strm, true, &req, &mut res)?;
        Ok(Flow::Close)
    }

    fn finish_response(
        &self,
        strm: &mut dyn Transport,
        close: bool,
        req: &Request,
        res: &mut Response,
    ) -> Result<()> {
        if res.status >= 400 {
            if let Some(handler) = &self.error_handler {
                handler(req, res);
            }
        }
        self.write_response(strm, close, req, res)?;
        debug!("{} {} -> {}", req.method, req.target, res.status);
        if let Some(logger) = &self.logger {
            logger(req, res);
        }
        Ok(())
    }

    fn write_response(
        &self,
        strm: &mut dyn Transport,
        close: bool,
        req: &Request,
        res: &mut Response,
    ) -> Result<()> {
        debug_assert!(res.status != -1);

        #[cfg(feature = "gzip")]
        if res.producer.is_none()
            && !res.body.is_empty()
            && !res.headers.contains("Content-Encoding")
            && req
                .headers
                .get("Accept-Encoding")
                .is_some_and(|v| v.contains("gzip"))
        {
            if let Some(ct) = res.headers.get("Content-Type") {
                if body::can_compress(ct) {
                    if let Ok(compressed) = body::compress(&res.body) {
                        res.body = compressed;
                        res.headers.add("Content-Encoding", "gzip");
                    }
                }
            }
        }

        let mut head = format!("HTTP/1.1 {} {}\r\n", res.status, status_message(res.status));
        if close {
            head.push_str("Connection: close\r\n");
        } else if req
            .headers
            .get("Connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("keep-alive"))
        {
            head.push_str("Connection: Keep-Alive\r\n");
        }
        if res.producer.is_none() {
            if !res.headers.contains("Content-Length") {
                head.push_str(&format!("Content-Length: {}\r\n", res.body.len()));
            }
        } else if !res.headers.contains("Content-Length")
            && !res.headers.contains("Transfer-Encoding")
        {
            head.push_str("Transfer-Encoding: chunked\r\n");
        }
        for (name, value) in res.headers.iter() {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        strm.write_all(head.as_bytes())?;

        if req.method != Method::Head {
            if let Some(producer) = res.producer.as_mut() {
                let declared = res
                    .headers
                    .get("Content-Length")
                    .and_then(|v| v.trim().parse::<u64>().ok());
                match declared {
                    Some(total) => body::write_content_length(strm, producer, total)?,
                    None => body::write_content_chunked(strm, producer)?,
                }
            } else if !res.body.is_empty() {
                strm.write_all(&res.body)?;
            }
        }
        strm.flush()?;
        Ok(())
    }

    fn handle_file_request(&self, req: &Request, res: &mut Response) -> bool {
        let Some(base) = &self.base_dir else {
            return false;
        };
        if !matches!(req.method, Method::Get | Method::Head) {
            return false;
        }
        if !is_valid_path(&req.path) {
            return false;
        }
        let mut path = req.path.clone();
        if path.ends_with('/') {
            path.push_str("index.html");
        }
        let full = base.join(path.trim_start_matches('/'));
        match fs::read(&full) {
            Ok(data) => {
                res.set_content(data, find_content_type(&full));
                res.status = 200;
                true
            }
            Err(_) => false,
        }
    }
}

/// Split `METHOD target HTTP/1.x` off a CRLF-terminated line. The target may
/// itself contain spaces; the version is whatever follows the last one.
fn parse_request_line(line: &[u8]) -> Option<(Method, String, bool)> {
    let line = line.strip_suffix(b"\r\n")?;
    let text = std::str::from_utf8(line).ok()?;
    let (method_token, rest) = text.split_once(' ')?;
    let (target, version) = rest.rsplit_once(' ')?;
    let method = Method::from_token(method_token)?;
    if target.is_empty() {
        return None;
    }
    let http10 = match version {
        "HTTP/1.1" => false,
        "HTTP/1.0" => true,
        _ => return None,
    };
    Some((method, target.to_string(), http10))
}

/// Half-close, then discard input the peer has already sent. Closing with
/// unread bytes pending resets the socket and destroys responses still in
/// the peer's receive queue. The drain is bounded by a byte allowance and
/// the drain timeout.
fn close_gracefully(strm: &mut dyn Transport) {
    if strm.shutdown_write().is_err() {
        return;
    }
    let _ = strm.set_read_timeout(Some(CLOSE_DRAIN_TIMEOUT));
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    let mut allowance = CLOSE_DRAIN_LIMIT;
    while allowance > 0 {
        match strm.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => allowance = allowance.saturating_sub(n),
        }
    }
}

/// Reject paths that would escape the static file root.
fn is_valid_path(path: &str) -> bool {
    let mut level = 0i32;
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if level == 0 {
                    return false;
                }
                level -= 1;
            }
            _ => level += 1,
        }
    }
    true
}

fn find_content_type(path: &Path) -> &'static str {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "js" => "application/javascript",
        "css" => "text/css",
        "xml" => "application/xml",
        "jpeg" | "jpg" => "image/jpg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "xhtml" => "application/xhtml+xml",
        "gz" => "application/gzip",
        _ => "application/octet-stream",
    }
}
