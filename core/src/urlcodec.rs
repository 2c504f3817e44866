/*
 * urlcodec.rs
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

//! URL percent codec and query-string parsing.
//!
//! The decoder accepts the legacy `%uXXXX` escape alongside `%XX`, maps `+`
//! to space, and copies invalid escapes through verbatim. The encoder escapes
//! the small set of characters that break request lines and form values and
//! every byte above 0x7F; the rest pass through untouched.

use percent_encoding::{utf8_percent_encode, AsciiSet};

use crate::message::Params;

/// Characters escaped on outgoing paths and form values. Non-ASCII bytes are
/// always escaped by the percent encoder regardless of the set.
const URL_ESCAPE: &AsciiSet = &AsciiSet::EMPTY
    .add(b' ')
    .add(b'+')
    .add(b'\r')
    .add(b'\n')
    .add(b'\'')
    .add(b',')
    .add(b':')
    .add(b';');

/// Percent-encode a path or form value for the wire.
pub fn encode_url(s: &str) -> String {
    utf8_percent_encode(s, URL_ESCAPE).to_string()
}

/// Decode `%XX`, `%uXXXX`, and `+` escapes. A `%` that is not followed by a
/// valid escape is kept verbatim. Code points in the surrogate range decode
/// to nothing. Byte sequences that do not form valid UTF-8 after decoding are
/// replaced, not rejected.
pub fn decode_url(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 1 < bytes.len() && bytes[i + 1] == b'u' => {
                if let Some(code) = parse_hex(bytes, i + 2, 4) {
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(utf8_bytes(code, &mut buf));
                    i += 6;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            b'%' => {
                if let Some(value) = parse_hex(bytes, i + 1, 2) {
                    out.push(value as u8);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Split a query string on `&`, then each pair on its first `=`. Keys and
/// values are URL-decoded; duplicate keys are all retained in order. Also
/// used for `application/x-www-form-urlencoded` bodies.
pub fn parse_query(s: &str, params: &mut Params) {
    for pair in s.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once('=') {
            Some((key, value)) => (key, value),
            None => (pair, ""),
        };
        params.add(decode_url(key), decode_url(value));
    }
}

/// Exactly `count` hex digits starting at `pos`, or nothing.
fn parse_hex(bytes: &[u8], pos: usize, count: usize) -> Option<u32> {
    if pos + count > bytes.len() {
        return None;
    }
    let mut value: u32 = 0;
    for &b in &bytes[pos..pos + count] {
        value = value * 16 + hex_digit(b)?;
    }
    Some(value)
}

fn hex_digit(b: u8) -> Option<u32> {
    match b {
        b'0'..=b'9' => Some((b - b'0') as u32),
        b'a'..=b'f' => Some((b - b'a' + 10) as u32),
        b'A'..=b'F' => Some((b - b'A' + 10) as u32),
        _ => None,
    }
}

/// UTF-8 encoding of a code point; empty for surrogates and out-of-range.
fn utf8_bytes(code: u32, buf: &mut [u8; 4]) -> &[u8] {
    match char::from_u32(code) {
        Some(c) => c.encode_utf8(buf).as_bytes(),
        None => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_table() {
        assert_eq!(encode_url("a b"), "a%20b");
        assert_eq!(encode_url("a+b"), "a%2Bb");
        assert_eq!(encode_url("a\r\nb"), "a%0D%0Ab");
        assert_eq!(encode_url("it's"), "it%27s");
        assert_eq!(encode_url("a,b:c;d"), "a%2Cb%3Ac%3Bd");
        assert_eq!(encode_url("/path?q=1&r=2"), "/path?q=1&r=2");
    }

    #[test]
    fn encode_non_ascii_uppercase_hex() {
        assert_eq!(encode_url("é"), "%C3%A9");
    }

    #[test]
    fn decode_percent_escapes() {
        assert_eq!(decode_url("a%20b"), "a b");
        assert_eq!(decode_url("a+b"), "a b");
        assert_eq!(decode_url("%C3%A9"), "é");
    }

    #[test]
    fn decode_unicode_escape() {
        assert_eq!(decode_url("%u00e9"), "é");
        assert_eq!(decode_url("%u20AC"), "€");
    }

    #[test]
    fn decode_surrogate_emits_nothing() {
        assert_eq!(decode_url("a%uD800b"), "ab");
        assert_eq!(decode_url("%uDFFF"), "");
    }

    #[test]
    fn invalid_escapes_kept_verbatim() {
        assert_eq!(decode_url("100%"), "100%");
        assert_eq!(decode_url("%zz"), "%zz");
        assert_eq!(decode_url("%u12"), "%u12");
        assert_eq!(decode_url("%1"), "%1");
    }

    #[test]
    fn roundtrip_ascii_and_utf8() {
        for s in [
            "hello world",
            "it's, a:test;+plus",
            "héllo wörld",
            "日本語のテキスト",
            "mixed ascii é 漢字 end",
            "\r\n",
        ] {
            assert_eq!(decode_url(&encode_url(s)), s);
        }
    }

    #[test]
    fn query_splits_on_first_equals_only() {
        let mut params = Params::new();
        parse_query("a=b=c&d=e", &mut params);
        assert_eq!(params.get("a"), Some("b=c"));
        assert_eq!(params.get("d"), Some("e"));
    }

    #[test]
    fn query_keeps_duplicates_in_order() {
        let mut params = Params::new();
        parse_query("k=1&k=2&k=3", &mut params);
        let values: Vec<&str> = params.get_all("k").collect();
        assert_eq!(values, ["1", "2", "3"]);
    }

    #[test]
    fn query_decodes_keys_and_values() {
        let mut params = Params::new();
        parse_query("na%20me=va%2Clue&flag", &mut params);
        assert_eq!(params.get("na me"), Some("va,lue"));
        assert_eq!(params.get("flag"), Some(""));
    }
}
