//! Request-line extraction.
//!
//! Only the route of the first `GET /` line is kept. Everything else the
//! client sends (other header lines, any body) is ignored.

use std::borrow::Cow;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::time::timeout;

use common::ServiceError;

/// Maximum number of lines read while looking for the request line.
pub const MAX_HEADER_LINES: usize = 100;

/// Maximum length of a single line, terminator included.
pub const MAX_LINE_BYTES: u64 = 8 * 1024;

const REQUEST_PREFIX: &str = "GET /";

/// Read lines until a `GET /` line, a blank line, or end of stream.
///
/// Returns `Ok(None)` when no usable route was found. Each individual read is
/// bounded by `read_timeout`.
///
/// # Errors
///
/// [`ServiceError::Timeout`] if the peer stays silent too long, or
/// [`ServiceError::Io`] on a socket failure.
pub async fn read_route<R>(
    reader: &mut R,
    read_timeout: Duration,
) -> Result<Option<String>, ServiceError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(256);

    for _ in 0..MAX_HEADER_LINES {
        buf.clear();
        let n = timeout(
            read_timeout,
            (&mut *reader).take(MAX_LINE_BYTES).read_until(b'\n', &mut buf),
        )
        .await
        .map_err(|_| ServiceError::Timeout(read_timeout))??;

        if n == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Ok(None);
        }
        if line.starts_with(REQUEST_PREFIX) {
            return Ok(route_from_request_line(line));
        }
        if !buf.ends_with(b"\n") {
            // Line longer than MAX_LINE_BYTES; stop instead of resyncing mid-line.
            return Ok(None);
        }
    }
    Ok(None)
}

/// Extract and decode the route from a `GET /<route> HTTP/x` line.
///
/// The route is the text between the first `/` and the next space. A line
/// without that space, or whose route does not decode to UTF-8, yields `None`.
pub fn route_from_request_line(line: &str) -> Option<String> {
    let start = line.find('/')? + 1;
    let end = start + line[start..].find(' ')?;
    decode_route(&line[start..end])
}

/// Form-URL decode a raw route: `+` becomes a space, `%XX` becomes a byte.
///
/// A `%` not followed by two hex digits makes the route unparseable.
pub fn decode_route(raw: &str) -> Option<String> {
    if !escapes_well_formed(raw) {
        return None;
    }
    let spaced: Cow<'_, str> = if raw.contains('+') {
        Cow::Owned(raw.replace('+', " "))
    } else {
        Cow::Borrowed(raw)
    };
    percent_decode_str(&spaced)
        .decode_utf8()
        .ok()
        .map(Cow::into_owned)
}

fn escapes_well_formed(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            match bytes.get(i + 1..i + 3) {
                Some(hex) if hex.iter().all(u8::is_ascii_hexdigit) => i += 3,
                _ => return false,
            }
        } else {
            i += 1;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    const T: Duration = Duration::from_secs(10);

    async fn route_of(input: &'static [u8]) -> Option<String> {
        let mut reader = BufReader::new(input);
        read_route(&mut reader, T).await.unwrap()
    }

    #[test]
    fn parses_simple_route() {
        assert_eq!(
            route_from_request_line("GET /status HTTP/1.0").as_deref(),
            Some("status")
        );
    }

    #[test]
    fn keeps_query_string() {
        assert_eq!(
            route_from_request_line("GET /sgv.json?count=2 HTTP/1.1").as_deref(),
            Some("sgv.json?count=2")
        );
    }

    #[test]
    fn root_route_is_empty() {
        assert_eq!(route_from_request_line("GET / HTTP/1.0").as_deref(), Some(""));
    }

    #[test]
    fn missing_version_is_rejected() {
        assert_eq!(route_from_request_line("GET /status"), None);
    }

    #[test]
    fn decodes_percent_escapes() {
        assert_eq!(decode_route("hello%20world").as_deref(), Some("hello world"));
        assert_eq!(decode_route("caf%C3%A9").as_deref(), Some("café"));
    }

    #[test]
    fn decodes_plus_as_space() {
        assert_eq!(decode_route("a+b").as_deref(), Some("a b"));
        assert_eq!(decode_route("a%2Bb").as_deref(), Some("a+b"));
    }

    #[test]
    fn rejects_invalid_utf8() {
        assert_eq!(decode_route("%FF%FE"), None);
    }

    #[test]
    fn rejects_malformed_escapes() {
        assert_eq!(decode_route("a%zzb"), None);
        assert_eq!(decode_route("a%2"), None);
        assert_eq!(decode_route("a%"), None);
        assert_eq!(decode_route("%g1"), None);
        assert_eq!(route_from_request_line("GET /a%zzb HTTP/1.0"), None);
        assert_eq!(route_from_request_line("GET /a%2 HTTP/1.0"), None);
    }

    #[test]
    fn accepts_mixed_case_hex() {
        assert_eq!(decode_route("%2f%2F").as_deref(), Some("//"));
    }

    #[tokio::test]
    async fn reads_route_with_crlf() {
        assert_eq!(
            route_of(b"GET /status HTTP/1.0\r\nHost: localhost\r\n\r\n").await.as_deref(),
            Some("status")
        );
    }

    #[tokio::test]
    async fn reads_route_with_bare_lf() {
        assert_eq!(route_of(b"GET /ping HTTP/1.0\n\n").await.as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn skips_leading_non_get_lines() {
        assert_eq!(
            route_of(b"X-Noise: 1\r\nGET /late HTTP/1.0\r\n\r\n").await.as_deref(),
            Some("late")
        );
    }

    #[tokio::test]
    async fn blank_line_before_get_means_no_route() {
        assert_eq!(route_of(b"\r\nGET /status HTTP/1.0\r\n\r\n").await, None);
    }

    #[tokio::test]
    async fn other_methods_have_no_route() {
        assert_eq!(route_of(b"POST /status HTTP/1.0\r\n\r\n").await, None);
    }

    #[tokio::test]
    async fn end_of_stream_means_no_route() {
        assert_eq!(route_of(b"").await, None);
        assert_eq!(route_of(b"Host: x\r\n").await, None);
    }

    #[tokio::test]
    async fn overlong_line_means_no_route() {
        let mut input = vec![b'x'; MAX_LINE_BYTES as usize + 10];
        input.extend_from_slice(b"\r\nGET /status HTTP/1.0\r\n\r\n");
        let mut reader = BufReader::new(input.as_slice());
        assert_eq!(read_route(&mut reader, T).await.unwrap(), None);
    }

    #[tokio::test]
    async fn header_line_budget_is_enforced() {
        let mut input = b"X: y\r\n".repeat(MAX_HEADER_LINES);
        input.extend_from_slice(b"GET /status HTTP/1.0\r\n\r\n");
        let mut reader = BufReader::new(input.as_slice());
        assert_eq!(read_route(&mut reader, T).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = BufReader::new(server);
        let err = read_route(&mut reader, T).await.unwrap_err();
        assert!(matches!(err, ServiceError::Timeout(_)));
        drop(client);
    }
}
