//! Minimal HTTP/1.1 head parsing for flow attribution.
//!
//! Just enough to pull method, target, status and a few headers out of
//! intercepted streams. Bodies and deeper protocol state are out of
//! scope; the raw bytes go to the PCAP files regardless.

use crate::record::AuthScheme;

#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// Parses a request head from the start of `data`. Returns `None` until a
/// complete head (terminated by a blank line) is present.
pub fn parse_request_head(data: &[u8]) -> Option<RequestHead> {
    let head = complete_head(data)?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    Some(RequestHead {
        method,
        target,
        headers: parse_headers(lines),
    })
}

/// Parses a response head from the start of `data`.
pub fn parse_response_head(data: &[u8]) -> Option<ResponseHead> {
    let head = complete_head(data)?;
    let mut lines = head.split("\r\n");
    let status_line = lines.next()?;
    let mut parts = status_line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    let status = parts.next()?.parse().ok()?;
    Some(ResponseHead {
        status,
        headers: parse_headers(lines),
    })
}

fn complete_head(data: &[u8]) -> Option<&str> {
    let end = data.windows(4).position(|w| w == b"\r\n\r\n")?;
    std::str::from_utf8(&data[..end]).ok()
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<(String, String)> {
    lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}

pub fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

/// Names of cookies present on the request; values are not retained.
pub fn cookie_names(headers: &[(String, String)]) -> Vec<String> {
    header(headers, "cookie")
        .map(|value| {
            value
                .split(';')
                .filter_map(|pair| pair.split('=').next())
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Classifies the Authorization header, discarding the credential itself.
pub fn auth_scheme(headers: &[(String, String)]) -> Option<AuthScheme> {
    let value = header(headers, "authorization")?;
    let scheme = value.split_whitespace().next()?;
    Some(match scheme.to_ascii_lowercase().as_str() {
        "basic" => AuthScheme::Basic,
        "bearer" => AuthScheme::Bearer,
        "oauth" => AuthScheme::OAuth,
        _ => AuthScheme::Other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &[u8] = b"GET /index HTTP/1.1\r\nHost: example.com\r\n\
        User-Agent: curl/8.0\r\nCookie: sid=abc123; theme=dark\r\n\
        Authorization: Bearer eyJ0eXA\r\n\r\nbody bytes";

    #[test]
    fn parses_request_head() {
        let head = parse_request_head(REQUEST).unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.target, "/index");
        assert_eq!(header(&head.headers, "host"), Some("example.com"));
        assert_eq!(header(&head.headers, "user-agent"), Some("curl/8.0"));
    }

    #[test]
    fn incomplete_head_is_none() {
        assert!(parse_request_head(b"GET /index HTTP/1.1\r\nHost: ex").is_none());
    }

    #[test]
    fn garbage_is_none() {
        assert!(parse_request_head(b"\x16\x03\x01\x02\x00\r\n\r\n").is_none());
        assert!(parse_response_head(b"not http\r\n\r\n").is_none());
    }

    #[test]
    fn parses_response_status() {
        let head = parse_response_head(b"HTTP/1.1 404 Not Found\r\nServer: nginx\r\n\r\n").unwrap();
        assert_eq!(head.status, 404);
        assert_eq!(header(&head.headers, "server"), Some("nginx"));
    }

    #[test]
    fn cookie_names_only() {
        let head = parse_request_head(REQUEST).unwrap();
        assert_eq!(cookie_names(&head.headers), vec!["sid", "theme"]);
    }

    #[test]
    fn auth_scheme_without_credential() {
        let head = parse_request_head(REQUEST).unwrap();
        assert_eq!(auth_scheme(&head.headers), Some(AuthScheme::Bearer));

        let basic = parse_request_head(
            b"GET / HTTP/1.1\r\nAuthorization: Basic dXNlcjpwYXNz\r\n\r\n",
        )
        .unwrap();
        assert_eq!(auth_scheme(&basic.headers), Some(AuthScheme::Basic));
    }
}
