//! Proxy list file format: line-oriented `host:port` or
//! `host:port@user:pass`. Blank lines are ignored; a malformed line is a
//! non-fatal parse error the caller logs and skips. Default type is http.

use thiserror::Error;

use super::{Proxy, ProxyType};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProxyParseError {
    #[error("empty line")]
    Empty,
    #[error("missing port: {0}")]
    MissingPort(String),
    #[error("invalid port: {0}")]
    InvalidPort(String),
}

/// Parse a single proxy-list line. Returns `Err` for malformed lines;
/// callers should log and skip rather than abort the whole file.
pub fn parse_proxy_line(line: &str) -> Result<Proxy, ProxyParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProxyParseError::Empty);
    }

    let (host_port, auth) = match line.split_once('@') {
        Some((hp, rest)) => (hp, Some(rest)),
        None => (line, None),
    };

    let (host, port) = host_port
        .split_once(':')
        .ok_or_else(|| ProxyParseError::MissingPort(line.to_string()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| ProxyParseError::InvalidPort(port.to_string()))?;

    let mut proxy = Proxy::new(ProxyType::Http, host, port);

    if let Some(auth) = auth {
        if let Some((user, pass)) = auth.split_once(':') {
            proxy = proxy.with_auth(user, pass);
        }
    }

    Ok(proxy)
}

/// Format a `Proxy` back into the list-file line shape. Round-trips with
/// `parse_proxy_line` for well-formed lines.
pub fn format_proxy_line(proxy: &Proxy) -> String {
    match &proxy.auth {
        Some(auth) => format!("{}:{}@{}:{}", proxy.host, proxy.port, auth.username, auth.password),
        None => format!("{}:{}", proxy.host, proxy.port),
    }
}

/// Parse an entire proxy-list file's contents. Blank lines are skipped
/// silently; malformed non-blank lines are logged and skipped, never
/// fatal to the whole file.
pub fn parse_proxy_list(contents: &str) -> Vec<Proxy> {
    let mut proxies = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_proxy_line(line) {
            Ok(proxy) => proxies.push(proxy),
            Err(e) => {
                tracing::warn!(line = lineno + 1, error = %e, "skipping malformed proxy list line");
            }
        }
    }
    proxies
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_host_port() {
        let p = parse_proxy_line("10.0.0.1:8080").unwrap();
        assert_eq!(p.host, "10.0.0.1");
        assert_eq!(p.port, 8080);
        assert!(p.auth.is_none());
    }

    #[test]
    fn parses_host_port_with_auth() {
        let p = parse_proxy_line("10.0.0.1:8080@alice:s3cret").unwrap();
        assert_eq!(p.auth.as_ref().unwrap().username, "alice");
        assert_eq!(p.auth.as_ref().unwrap().password, "s3cret");
    }

    #[test]
    fn round_trips_well_formed_lines() {
        for line in ["10.0.0.1:8080", "10.0.0.1:8080@alice:s3cret"] {
            let proxy = parse_proxy_line(line).unwrap();
            assert_eq!(format_proxy_line(&proxy), line);
        }
    }

    #[test]
    fn blank_lines_are_ignored_and_bad_lines_skipped() {
        let contents = "\n10.0.0.1:8080\nnot-a-proxy\n\n10.0.0.2:9090@u:p\n";
        let parsed = parse_proxy_list(contents);
        assert_eq!(parsed.len(), 2);
    }
}
