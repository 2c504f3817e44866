/*
 * body.rs
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

//! Body framing: reads bodies delimited by Content-Length, chunked
//! transfer coding, or end-of-stream, and writes producer-driven bodies.
//! Gzip content is decoded transparently when the `gzip` feature is on.

use std::io::{self, Write};

use bytes::Bytes;

#[cfg(feature = "gzip")]
use flate2::{write::GzDecoder, write::GzEncoder, Compression};

use crate::config::{CHUNK_LINE_BUFFER_SIZE, RECV_BUFFER_SIZE};
use crate::error::{Error, Result};
use crate::linereader::{trim_line_ending, LineReader};
use crate::message::{ContentProducer, Headers, Progress};
use crate::transport::Transport;

/// Read a message body off the transport, pushing decoded bytes into
/// `receiver` as they arrive.
///
/// Framing is chosen from `headers`: chunked transfer coding when
/// `Transfer-Encoding: chunked` is present, a fixed length when
/// `Content-Length` is present, otherwise end-of-stream when
/// `allow_read_to_eof` permits it (responses without framing) or an empty
/// body when it does not (requests must declare their length). A message
/// carrying both framing headers is malformed.
pub(crate) fn read_body(
    strm: &mut dyn Transport,
    headers: &Headers,
    max_length: usize,
    allow_read_to_eof: bool,
    progress: &mut Option<Progress>,
    receiver: &mut dyn FnMut(&[u8]),
) -> Result<()> {
    let encoding = headers.value_or("Content-Encoding", "identity");
    if encoding.eq_ignore_ascii_case("gzip") {
        #[cfg(feature = "gzip")]
        {
            let mut decoder = GzDecoder::new(ReceiverWriter { receiver });
            read_raw(strm, headers, max_length, allow_read_to_eof, progress, &mut |chunk| {
                decoder
                    .write_all(chunk)
                    .map_err(|_| Error::malformed("invalid gzip stream"))
            })?;
            return decoder
                .try_finish()
                .map_err(|_| Error::malformed("truncated gzip stream"));
        }
        #[cfg(not(feature = "gzip"))]
        return Err(Error::UnsupportedEncoding);
    } else if !encoding.eq_ignore_ascii_case("identity") {
        return Err(Error::UnsupportedEncoding);
    }
    read_raw(strm, headers, max_length, allow_read_to_eof, progress, &mut |chunk| {
        receiver(chunk);
        Ok(())
    })
}

/// Forwards decompressed output to the caller's receiver.
#[cfg(feature = "gzip")]
struct ReceiverWriter<'a> {
    receiver: &'a mut dyn FnMut(&[u8]),
}

#[cfg(feature = "gzip")]
impl Write for ReceiverWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (self.receiver)(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn read_raw(
    strm: &mut dyn Transport,
    headers: &Headers,
    max_length: usize,
    allow_read_to_eof: bool,
    progress: &mut Option<Progress>,
    sink: &mut dyn FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    let transfer_encoding = headers.get("Transfer-Encoding");
    let content_length = headers.get("Content-Length");
    if let Some(te) = transfer_encoding {
        if content_length.is_some() {
            return Err(Error::malformed(
                "both transfer-encoding and content-length present",
            ));
        }
        if !te.trim().eq_ignore_ascii_case("chunked") {
            return Err(Error::UnsupportedEncoding);
        }
        return read_chunked(strm, max_length, sink);
    }
    match content_length {
        None => {
            if allow_read_to_eof {
                read_to_eof(strm, max_length, progress, sink)
            } else {
                Ok(())
            }
        }
        Some(value) => {
            let len: u64 = value
                .trim()
                .parse()
                .map_err(|_| Error::malformed("invalid content-length"))?;
            read_fixed(strm, len, max_length, progress, sink)
        }
    }
}

fn read_fixed(
    strm: &mut dyn Transport,
    len: u64,
    max_length: usize,
    progress: &mut Option<Progress>,
    sink: &mut dyn FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    if len > max_length as u64 {
        // Skip the payload so the connection stays framed for the caller's
        // error response, then report the overflow.
        drain(strm, len);
        return Err(Error::PayloadTooLarge);
    }
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    let mut done: u64 = 0;
    while done < len {
        let want = (len - done).min(RECV_BUFFER_SIZE as u64) as usize;
        let n = strm.read(&mut buf[..want])?;
        if n == 0 {
            return Err(Error::malformed("end of stream inside body"));
        }
        sink(&buf[..n])?;
        done += n as u64;
        if let Some(cb) = progress.as_mut() {
            if !cb(done, len) {
                return Err(Error::Cancelled);
            }
        }
    }
    Ok(())
}

fn read_to_eof(
    strm: &mut dyn Transport,
    max_length: usize,
    progress: &mut Option<Progress>,
    sink: &mut dyn FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    let mut done: u64 = 0;
    loop {
        let n = strm.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        done += n as u64;
        if done > max_length as u64 {
            return Err(Error::PayloadTooLarge);
        }
        sink(&buf[..n])?;
        if let Some(cb) = progress.as_mut() {
            // Total is unknown without framing.
            if !cb(done, 0) {
                return Err(Error::Cancelled);
            }
        }
    }
}

fn read_chunked(
    strm: &mut dyn Transport,
    max_length: usize,
    sink: &mut dyn FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    let mut total: u64 = 0;
    loop {
        let size = {
            let mut linebuf = [0u8; CHUNK_LINE_BUFFER_SIZE];
            let mut reader = LineReader::new(strm, &mut linebuf);
            if !reader.getline()? {
                return Err(Error::malformed("end of stream inside chunked body"));
            }
            parse_chunk_size(reader.line())?
        };
        if size == 0 {
            break;
        }
        total += size;
        if total > max_length as u64 {
            return Err(Error::PayloadTooLarge);
        }
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(RECV_BUFFER_SIZE as u64) as usize;
            let n = strm.read(&mut buf[..want])?;
            if n == 0 {
                return Err(Error::malformed("end of stream inside chunk"));
            }
            sink(&buf[..n])?;
            remaining -= n as u64;
        }
        read_chunk_terminator(strm)?;
    }
    // Trailer fields are not supported; the last chunk must be followed by a
    // bare CRLF.
    read_chunk_terminator(strm)
}

fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let line = trim_line_ending(line);
    let text =
        std::str::from_utf8(line).map_err(|_| Error::malformed("invalid chunk size line"))?;
    // Chunk extensions after ';' are ignored.
    let size = match text.split_once(';') {
        Some((size, _)) => size,
        None => text,
    }
    .trim();
    if size.is_empty() {
        return Err(Error::malformed("empty chunk size"));
    }
    u64::from_str_radix(size, 16).map_err(|_| Error::malformed("invalid chunk size"))
}

fn read_chunk_terminator(strm: &mut dyn Transport) -> Result<()> {
    let mut linebuf = [0u8; CHUNK_LINE_BUFFER_SIZE];
    let mut reader = LineReader::new(strm, &mut linebuf);
    if !reader.getline()? || reader.line() != b"\r\n" {
        return Err(Error::malformed("missing chunk terminator"));
    }
    Ok(())
}

/// Best-effort skip of an oversized payload so an error response can still
/// go out on a framed connection.
fn drain(strm: &mut dyn Transport, mut remaining: u64) {
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    while remaining > 0 {
        let want = remaining.min(RECV_BUFFER_SIZE as u64) as usize;
        match strm.read(&mut buf[..want]) {
            Ok(0) | Err(_) => break,
            Ok(n) => remaining -= n as u64,
        }
    }
}

/// Write a producer-driven body using chunked transfer coding. The producer
/// is called with the running offset until it returns an empty chunk.
pub(crate) fn write_content_chunked(
    strm: &mut dyn Transport,
    producer: &mut ContentProducer,
) -> io::Result<()> {
    let mut offset: u64 = 0;
    loop {
        let chunk = producer(offset);
        if chunk.is_empty() {
            return strm.write_all(b"0\r\n\r\n");
        }
        write!(strm, "{:x}\r\n", chunk.len())?;
        strm.write_all(&chunk)?;
        strm.write_all(b"\r\n")?;
        offset += chunk.len() as u64;
    }
}

/// Write exactly `total` producer-driven bytes with no transfer coding.
/// A premature empty chunk is a write error; excess bytes are clamped.
pub(crate) fn write_content_length(
    strm: &mut dyn Transport,
    producer: &mut ContentProducer,
    total: u64,
) -> io::Result<()> {
    let mut offset: u64 = 0;
    while offset < total {
        let chunk = producer(offset);
        if chunk.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "content producer ended before declared length",
            ));
        }
        let take = (total - offset).min(chunk.len() as u64) as usize;
        strm.write_all(&chunk[..take])?;
        offset += take as u64;
    }
    Ok(())
}

/// True when a response of this media type is worth gzip-compressing.
#[cfg(feature = "gzip")]
pub(crate) fn can_compress(content_type: &str) -> bool {
    let media_type = match content_type.split_once(';') {
        Some((mt, _)) => mt,
        None => content_type,
    }
    .trim();
    media_type.starts_with("text/")
        || matches!(
            media_type,
            "application/javascript"
                | "application/json"
                | "application/xml"
                | "application/xhtml+xml"
        )
}

#[cfg(feature = "gzip")]
pub(crate) fn compress(data: &[u8]) -> io::Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BufferStream;

    fn collect(
        input: &[u8],
        headers: &Headers,
        max_length: usize,
        allow_read_to_eof: bool,
    ) -> Result<Vec<u8>> {
        let mut strm = BufferStream::new(input);
        let mut out = Vec::new();
        read_body(&mut strm, headers, max_length, allow_read_to_eof, &mut None, &mut |chunk| {
            out.extend_from_slice(chunk)
        })?;
        Ok(out)
    }

    fn headers_of(pairs: &[(&str, &str)]) -> Headers {
        let mut headers = Headers::new();
        for (n, v) in pairs {
            headers.add(*n, *v);
        }
        headers
    }

    #[test]
    fn fixed_length_body() {
        let headers = headers_of(&[("Content-Length", "5")]);
        let out = collect(b"helloXTRA", &headers, usize::MAX, false).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn fixed_length_is_parsed_strictly() {
        for bad in ["5x", "0x10", "-1", ""] {
            let headers = headers_of(&[("Content-Length", bad)]);
            assert!(matches!(
                collect(b"hello", &headers, usize::MAX, false),
                Err(Error::Malformed(_))
            ));
        }
    }

    #[test]
    fn both_framing_headers_rejected() {
        let headers = headers_of(&[
            ("Transfer-Encoding", "chunked"),
            ("Content-Length", "5"),
        ]);
        assert!(matches!(
            collect(b"5\r\nhello\r\n0\r\n\r\n", &headers, usize::MAX, false),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn unknown_transfer_coding_rejected() {
        let headers = headers_of(&[("Transfer-Encoding", "gzip")]);
        assert!(matches!(
            collect(b"data", &headers, usize::MAX, false),
            Err(Error::UnsupportedEncoding)
        ));
    }

    #[test]
    fn missing_length_means_empty_for_requests() {
        let headers = Headers::new();
        let mut strm = BufferStream::new(&b"leftover"[..]);
        let mut out = Vec::new();
        read_body(&mut strm, &headers, usize::MAX, false, &mut None, &mut |chunk| {
            out.extend_from_slice(chunk)
        })
        .unwrap();
        assert!(out.is_empty());
        assert_eq!(strm.remaining(), b"leftover".len());
    }

    #[test]
    fn missing_length_reads_to_eof_for_responses() {
        let headers = Headers::new();
        let out = collect(b"the whole stream", &headers, usize::MAX, true).unwrap();
        assert_eq!(out, b"the whole stream");
    }

    #[test]
    fn oversized_body_is_drained_without_delivery() {
        let headers = headers_of(&[("Content-Length", "20")]);
        let mut strm = BufferStream::new(&b"01234567890123456789"[..]);
        let mut delivered = 0usize;
        let result = read_body(&mut strm, &headers, 10, false, &mut None, &mut |chunk| {
            delivered += chunk.len()
        });
        assert!(matches!(result, Err(Error::PayloadTooLarge)));
        assert_eq!(delivered, 0);
        assert_eq!(strm.remaining(), 0);
    }

    #[test]
    fn truncated_body_is_malformed() {
        let headers = headers_of(&[("Content-Length", "10")]);
        assert!(matches!(
            collect(b"short", &headers, usize::MAX, false),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn chunked_body() {
        let headers = headers_of(&[("Transfer-Encoding", "chunked")]);
        let out = collect(
            b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
            &headers,
            usize::MAX,
            false,
        )
        .unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn chunked_wikipedia_vector() {
        let headers = headers_of(&[("Transfer-Encoding", "chunked")]);
        let out = collect(
            b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n",
            &headers,
            usize::MAX,
            false,
        )
        .unwrap();
        assert_eq!(out, b"Wikipedia");
        assert!(matches!(
            collect(b"4\r\nWiki\r\n5\r\npedia\r\n", &headers, usize::MAX, false),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn chunk_extensions_are_ignored() {
        let headers = headers_of(&[("Transfer-Encoding", "chunked")]);
        let out = collect(
            b"5;name=value\r\nhello\r\n0\r\n\r\n",
            &headers,
            usize::MAX,
            false,
        )
        .unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn chunk_without_terminator_is_malformed() {
        let headers = headers_of(&[("Transfer-Encoding", "chunked")]);
        assert!(matches!(
            collect(b"5\r\nhelloXX0\r\n\r\n", &headers, usize::MAX, false),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn chunked_requires_final_terminator() {
        let headers = headers_of(&[("Transfer-Encoding", "chunked")]);
        assert!(matches!(
            collect(b"5\r\nhello\r\n0\r\n", &headers, usize::MAX, false),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn bad_chunk_size_is_malformed() {
        let headers = headers_of(&[("Transfer-Encoding", "chunked")]);
        assert!(matches!(
            collect(b"zz\r\ndata\r\n0\r\n\r\n", &headers, usize::MAX, false),
            Err(Error::Malformed(_))
        ));
        assert!(matches!(
            collect(b"\r\ndata\r\n0\r\n\r\n", &headers, usize::MAX, false),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn progress_can_cancel() {
        let headers = headers_of(&[("Content-Length", "5")]);
        let mut strm = BufferStream::new(&b"hello"[..]);
        let mut progress: Option<Progress> = Some(Box::new(|_, _| false));
        let result = read_body(&mut strm, &headers, usize::MAX, false, &mut progress, &mut |_| {});
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn progress_sees_totals() {
        let headers = headers_of(&[("Content-Length", "5")]);
        let mut strm = BufferStream::new(&b"hello"[..]);
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let mut progress: Option<Progress> = Some(Box::new(move |done, total| {
            seen2.lock().unwrap().push((done, total));
            true
        }));
        read_body(&mut strm, &headers, usize::MAX, false, &mut progress, &mut |_| {}).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.last(), Some(&(5, 5)));
    }

    #[test]
    fn chunked_write_format() {
        let mut strm = BufferStream::new(&[][..]);
        let chunks = [&b"hello"[..], &b" world"[..], &[][..]];
        let mut i = 0;
        let mut producer: ContentProducer = Box::new(move |_| {
            let c = Bytes::copy_from_slice(chunks[i]);
            i += 1;
            c
        });
        write_content_chunked(&mut strm, &mut producer).unwrap();
        assert_eq!(strm.output(), b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n");
    }

    #[test]
    fn chunked_write_reports_offsets() {
        let mut strm = BufferStream::new(&[][..]);
        let mut producer: ContentProducer = Box::new(|offset| {
            if offset >= 10 {
                Bytes::new()
            } else {
                Bytes::from_static(b"01234")
            }
        });
        write_content_chunked(&mut strm, &mut producer).unwrap();
        assert_eq!(strm.output(), b"5\r\n01234\r\n5\r\n01234\r\n0\r\n\r\n");
    }

    #[test]
    fn fixed_write_rejects_short_producer() {
        let mut strm = BufferStream::new(&[][..]);
        let mut producer: ContentProducer = Box::new(|_| Bytes::new());
        let err = write_content_length(&mut strm, &mut producer, 10).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }

    #[test]
    fn fixed_write_clamps_to_total() {
        let mut strm = BufferStream::new(&[][..]);
        let mut producer: ContentProducer = Box::new(|_| Bytes::from_static(b"0123456789abcdef"));
        write_content_length(&mut strm, &mut producer, 10).unwrap();
        assert_eq!(strm.output(), b"0123456789");
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn gzip_body_is_decoded() {
        let compressed = compress(b"hello gzip world").unwrap();
        let headers = headers_of(&[
            ("Content-Encoding", "gzip"),
            ("Content-Length", &compressed.len().to_string()),
        ]);
        let out = collect(&compressed, &headers, usize::MAX, false).unwrap();
        assert_eq!(out, b"hello gzip world");
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn truncated_gzip_body_is_malformed() {
        let compressed = compress(b"hello gzip world").unwrap();
        let truncated = &compressed[..compressed.len() - 4];
        let headers = headers_of(&[
            ("Content-Encoding", "gzip"),
            ("Content-Length", &truncated.len().to_string()),
        ]);
        assert!(matches!(
            collect(truncated, &headers, usize::MAX, false),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn unknown_content_encoding_rejected() {
        let headers = headers_of(&[("Content-Encoding", "br"), ("Content-Length", "4")]);
        assert!(matches!(
            collect(b"data", &headers, usize::MAX, false),
            Err(Error::UnsupportedEncoding)
        ));
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn compressible_media_types() {
        assert!(can_compress("text/html"));
        assert!(can_compress("text/plain; charset=utf-8"));
        assert!(can_compress("application/json"));
        assert!(!can_compress("image/png"));
        assert!(!can_compress("application/octet-stream"));
    }
}
