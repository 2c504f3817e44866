/*
 * multipart.rs
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

//! multipart/form-data decoding. Parts are described by offset and length
//! into the already-read request body; payloads are never copied during
//! parsing.

use crate::error::{Error, Result};
use crate::message::MultipartFile;

const CRLF: &[u8] = b"\r\n";

/// Extract the boundary token from a multipart Content-Type value.
/// Surrounding quotes are stripped.
pub(crate) fn parse_multipart_boundary(content_type: &str) -> Option<String> {
    let idx = content_type.find("boundary=")?;
    let value = content_type[idx + "boundary=".len()..].trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Decode a multipart/form-data body into named part descriptors.
///
/// The body must begin with the dash-boundary and every part payload must be
/// terminated by a CRLF followed by the dash-boundary. Any structural defect
/// fails the whole decode; no partial part list is produced.
pub(crate) fn parse_multipart_formdata(
    boundary: &str,
    body: &[u8],
) -> Result<Vec<(String, MultipartFile)>> {
    let dash = format!("--{}", boundary).into_bytes();
    if !body.starts_with(&dash) {
        return Err(Error::malformed("multipart body does not start with boundary"));
    }
    let mut files = Vec::new();
    let mut pos = dash.len();
    // Skip the remainder of the boundary line.
    pos = find(body, CRLF, pos)
        .ok_or_else(|| Error::malformed("unterminated multipart boundary line"))?
        + CRLF.len();
    while pos < body.len() {
        let mut name = String::new();
        let mut filename = String::new();
        let mut content_type = String::new();
        loop {
            let next = find(body, CRLF, pos)
                .ok_or_else(|| Error::malformed("unterminated multipart header line"))?;
            if next == pos {
                break;
            }
            let line = String::from_utf8_lossy(&body[pos..next]);
            if let Some(value) = strip_header(&line, "content-type:") {
                content_type = value.to_string();
            } else if let Some(value) = strip_header(&line, "content-disposition:") {
                (name, filename) = parse_disposition(value)?;
            }
            pos = next + CRLF.len();
        }
        pos += CRLF.len();
        // The payload runs to the CRLF that introduces the next boundary.
        let marker = [CRLF, &dash].concat();
        let end = find(body, &marker, pos)
            .ok_or_else(|| Error::malformed("unterminated multipart part"))?;
        files.push((
            name,
            MultipartFile {
                filename,
                content_type,
                offset: pos,
                length: end - pos,
            },
        ));
        pos = end + marker.len();
        // Skip the rest of the boundary line; "--" here marks the close.
        pos = find(body, CRLF, pos)
            .ok_or_else(|| Error::malformed("unterminated multipart boundary line"))?
            + CRLF.len();
    }
    Ok(files)
}

/// Case-insensitive header-name match; returns the trimmed value on a hit.
fn strip_header<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(line[prefix.len()..].trim())
    } else {
        None
    }
}

/// Parse a `form-data; name="a"; filename="b"` disposition value. Parameter
/// values must be quoted.
fn parse_disposition(value: &str) -> Result<(String, String)> {
    let value = value.trim();
    let token = "form-data";
    if value.len() < token.len() || !value[..token.len()].eq_ignore_ascii_case(token) {
        return Err(Error::malformed("content-disposition is not form-data"));
    }
    let rest = &value[token.len()..];
    if !rest.is_empty() && !rest.trim_start().starts_with(';') {
        return Err(Error::malformed("content-disposition is not form-data"));
    }
    let mut name = String::new();
    let mut filename = String::new();
    for param in rest.split(';') {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        let (key, raw) = param
            .split_once('=')
            .ok_or_else(|| Error::malformed("malformed disposition parameter"))?;
        let quoted = raw
            .trim()
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .ok_or_else(|| Error::malformed("unquoted disposition parameter"))?;
        match key.trim() {
            "name" => name = quoted.to_string(),
            "filename" => filename = quoted.to_string(),
            _ => {}
        }
    }
    Ok((name, filename))
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| from + i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_forms() {
        assert_eq!(
            parse_multipart_boundary("multipart/form-data; boundary=xyz"),
            Some("xyz".to_string())
        );
        assert_eq!(
            parse_multipart_boundary("multipart/form-data; boundary=\"quoted token\""),
            Some("quoted token".to_string())
        );
        assert_eq!(parse_multipart_boundary("multipart/form-data"), None);
        assert_eq!(parse_multipart_boundary("multipart/form-data; boundary="), None);
    }

    fn body_of(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (headers, payload) in parts {
            body.extend_from_slice(b"--split\r\n");
            body.extend_from_slice(headers.as_bytes());
            body.extend_from_slice(b"\r\n\r\n");
            body.extend_from_slice(payload.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(b"--split--\r\n");
        body
    }

    #[test]
    fn single_part() {
        let body = body_of(&[(
            "Content-Disposition: form-data; name=\"note\"",
            "hello there",
        )]);
        let files = parse_multipart_formdata("split", &body).unwrap();
        assert_eq!(files.len(), 1);
        let (name, file) = &files[0];
        assert_eq!(name, "note");
        assert_eq!(file.filename, "");
        assert_eq!(file.content_type, "");
        assert_eq!(&body[file.offset..file.offset + file.length], b"hello there");
    }

    #[test]
    fn file_part_with_content_type() {
        let body = body_of(&[(
            "Content-Disposition: form-data; name=\"up\"; filename=\"a.bin\"\r\nContent-Type: application/octet-stream",
            "\0\x01binary\r\npayload--",
        )]);
        let files = parse_multipart_formdata("split", &body).unwrap();
        let (name, file) = &files[0];
        assert_eq!(name, "up");
        assert_eq!(file.filename, "a.bin");
        assert_eq!(file.content_type, "application/octet-stream");
        assert_eq!(
            &body[file.offset..file.offset + file.length],
            b"\0\x01binary\r\npayload--"
        );
    }

    #[test]
    fn multiple_parts_keep_order() {
        let body = body_of(&[
            ("Content-Disposition: form-data; name=\"a\"", "1"),
            ("Content-Disposition: form-data; name=\"b\"", "2"),
        ]);
        let files = parse_multipart_formdata("split", &body).unwrap();
        let names: Vec<&str> = files.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(&body[files[1].1.offset..files[1].1.offset + files[1].1.length], b"2");
    }

    #[test]
    fn empty_payload() {
        let body = body_of(&[("Content-Disposition: form-data; name=\"empty\"", "")]);
        let files = parse_multipart_formdata("split", &body).unwrap();
        assert_eq!(files[0].1.length, 0);
    }

    #[test]
    fn missing_disposition_gives_empty_name() {
        let body = body_of(&[("X-Unrelated: yes", "data")]);
        let files = parse_multipart_formdata("split", &body).unwrap();
        assert_eq!(files[0].0, "");
    }

    #[test]
    fn unquoted_parameter_is_malformed() {
        let body = body_of(&[("Content-Disposition: form-data; name=bare", "data")]);
        assert!(parse_multipart_formdata("split", &body).is_err());
    }

    #[test]
    fn non_form_data_disposition_is_malformed() {
        let body = body_of(&[("Content-Disposition: attachment; name=\"x\"", "data")]);
        assert!(parse_multipart_formdata("split", &body).is_err());
    }

    #[test]
    fn preamble_is_rejected() {
        let mut body = b"preamble\r\n".to_vec();
        body.extend_from_slice(&body_of(&[(
            "Content-Disposition: form-data; name=\"x\"",
            "1",
        )]));
        assert!(parse_multipart_formdata("split", &body).is_err());
    }

    #[test]
    fn unterminated_part_is_malformed() {
        let body = b"--split\r\nContent-Disposition: form-data; name=\"x\"\r\n\r\npayload".to_vec();
        assert!(parse_multipart_formdata("split", &body).is_err());
    }

    #[test]
    fn decode_failure_yields_no_parts() {
        let mut body = body_of(&[("Content-Disposition: form-data; name=\"ok\"", "1")]);
        // Corrupt the closing boundary of a second, malformed part.
        body.truncate(body.len() - CRLF.len() - 2);
        body.extend_from_slice(b"\r\nContent-Disposition: form-data; name=\"bad\"\r\n\r\nx");
        assert!(parse_multipart_formdata("split", &body).is_err());
    }
}
