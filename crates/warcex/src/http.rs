//! HTTP message parsing for `application/http` record blocks.

use std::io::Read;

use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};

use crate::types::Headers;

/// First line of an HTTP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StartLine {
    Request { method: String, target: String },
    Status { code: u16 },
}

/// A parsed HTTP message with its body already de-chunked and decoded.
#[derive(Debug, Clone)]
pub(crate) struct HttpMessage {
    pub start: StartLine,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// Parse an HTTP/1.x message as captured in a WARC request or response block.
pub(crate) fn parse_message(block: &[u8]) -> Result<HttpMessage, String> {
    let (head, body) = split_head(block);
    let head = String::from_utf8_lossy(head);
    let mut lines = head.lines().map(|l| l.trim_end_matches('\r'));

    let first = lines
        .by_ref()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| "empty HTTP message".to_string())?;
    let start = parse_start_line(first)?;

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // Obsolete line folding
            if let Some(value) = headers.last_value_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        match line.split_once(':') {
            Some((name, value)) => headers.push(name.trim(), value.trim()),
            None => tracing::debug!("Ignoring malformed header line: {line:?}"),
        }
    }

    let body = decode_body(&headers, body.to_vec());
    Ok(HttpMessage {
        start,
        headers,
        body,
    })
}

/// Split at the first blank line, whichever line ending it uses.
fn split_head(block: &[u8]) -> (&[u8], &[u8]) {
    let crlf = find(block, b"\r\n\r\n").map(|pos| (pos, 4));
    let lf = find(block, b"\n\n").map(|pos| (pos, 2));
    let boundary = match (crlf, lf) {
        (Some(c), Some(l)) => Some(if l.0 < c.0 { l } else { c }),
        (c, l) => c.or(l),
    };
    match boundary {
        Some((pos, len)) => (&block[..pos], &block[pos + len..]),
        None => (block, &block[block.len()..]),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_start_line(line: &str) -> Result<StartLine, String> {
    let mut parts = line.split_whitespace();
    let first = parts.next().unwrap_or("");

    if first.starts_with("HTTP/") {
        let code = parts
            .next()
            .and_then(|c| c.parse::<u16>().ok())
            .ok_or_else(|| format!("invalid status line: {line:?}"))?;
        return Ok(StartLine::Status { code });
    }

    match (parts.next(), parts.next()) {
        (Some(target), Some(version)) if version.starts_with("HTTP/") && !first.is_empty() => {
            Ok(StartLine::Request {
                method: first.to_ascii_uppercase(),
                target: target.to_string(),
            })
        }
        _ => Err(format!("invalid request line: {line:?}")),
    }
}

/// Undo transfer and content encodings. Anything that fails to decode is kept as captured.
fn decode_body(headers: &Headers, body: Vec<u8>) -> Vec<u8> {
    let chunked = headers
        .get("Transfer-Encoding")
        .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
    let body = if chunked {
        dechunk(&body).unwrap_or(body)
    } else {
        body
    };

    let encoding = headers
        .get("Content-Encoding")
        .map(|e| e.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let decoded = match encoding.as_str() {
        "gzip" | "x-gzip" => read_all(MultiGzDecoder::new(&body[..])),
        "deflate" => read_all(ZlibDecoder::new(&body[..]))
            .or_else(|| read_all(DeflateDecoder::new(&body[..]))),
        _ => None,
    };
    decoded.unwrap_or(body)
}

fn read_all<R: Read>(mut reader: R) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).ok()?;
    Some(out)
}

fn dechunk(body: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let mut rest = body;

    loop {
        let line_end = find(rest, b"\r\n")?;
        let size_line = std::str::from_utf8(&rest[..line_end]).ok()?;
        let size_hex = size_line.split(';').next()?.trim();
        let size = usize::from_str_radix(size_hex, 16).ok()?;
        rest = &rest[line_end + 2..];

        if size == 0 {
            return Some(out);
        }
        if rest.len() < size {
            return None;
        }
        out.extend_from_slice(&rest[..size]);
        rest = rest.get(size..)?;
        rest = rest.strip_prefix(b"\r\n").unwrap_or(rest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_request() {
        let msg = parse_message(
            b"POST /post HTTP/1.1\r\nHost: example.com\r\nContent-Type: application/json\r\n\r\n{\"a\":1}",
        )
        .unwrap();
        assert_eq!(
            msg.start,
            StartLine::Request {
                method: "POST".to_string(),
                target: "/post".to_string()
            }
        );
        assert_eq!(msg.headers.get("host"), Some("example.com"));
        assert_eq!(msg.body, b"{\"a\":1}");
    }

    #[test]
    fn test_parse_response_without_reason() {
        let msg = parse_message(b"HTTP/1.1 204\r\nServer: test\r\n\r\n").unwrap();
        assert_eq!(msg.start, StartLine::Status { code: 204 });
        assert!(msg.body.is_empty());
    }

    #[test]
    fn test_header_folding() {
        let msg = parse_message(b"HTTP/1.1 200 OK\r\nX-Long: first\r\n  second\r\n\r\n").unwrap();
        assert_eq!(msg.headers.get("x-long"), Some("first second"));
    }

    #[test]
    fn test_invalid_start_line() {
        assert!(parse_message(b"garbage\r\n\r\n").is_err());
        assert!(parse_message(b"HTTP/1.1 abc OK\r\n\r\n").is_err());
        assert!(parse_message(b"").is_err());
    }

    #[test]
    fn test_lf_only_head_with_crlf_in_body() {
        let block = b"HTTP/1.1 200 OK\nContent-Type: text/plain\n\nline one\r\n\r\nline two";
        let msg = parse_message(block).unwrap();
        assert_eq!(msg.headers.get("content-type"), Some("text/plain"));
        assert_eq!(msg.body, b"line one\r\n\r\nline two");
    }

    #[test]
    fn test_chunked_body() {
        let msg = parse_message(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        )
        .unwrap();
        assert_eq!(msg.body, b"hello world");
    }

    #[test]
    fn test_broken_chunked_body_kept_raw() {
        let raw = b"zz\r\nhello\r\n";
        let msg = parse_message(
            &[
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".as_slice(),
                raw.as_slice(),
            ]
            .concat(),
        )
        .unwrap();
        assert_eq!(msg.body, raw);
    }

    #[test]
    fn test_gzip_content_encoding() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"{\"compressed\":true}").unwrap();
        let gz = encoder.finish().unwrap();

        let block = [
            b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Type: application/json\r\n\r\n"
                .as_slice(),
            gz.as_slice(),
        ]
        .concat();
        let msg = parse_message(&block).unwrap();
        assert_eq!(msg.body, b"{\"compressed\":true}");
    }
}
