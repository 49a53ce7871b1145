// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request-line and header parsing.

use anyhow::{Result, bail};

use crate::collections::Set;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    /// `METHOD /path[?query] HTTP/x.y`
    Plain,
    /// `METHOD http://host:port/path HTTP/x.y`
    Proxy,
    /// `CONNECT host:port HTTP/x.y`
    Connect,
    /// `METHOD * HTTP/x.y`
    Asterisk,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub query: Option<String>,
    pub urlv: Vec<String>,
    pub version: (u8, u8),
    pub request_type: RequestType,
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Per-operator limits enforced while parsing a request line and headers.
#[derive(Debug, Clone, Copy)]
pub struct ParseLimits {
    pub max_line: usize,
    pub max_uri: usize,
    pub max_headers: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_line: 8192,
            max_uri: 4096,
            max_headers: 128,
        }
    }
}

impl Request {
    /// Parses `line` (without the trailing CRLF) as an HTTP request line.
    pub fn parse_line(line: &str, limits: &ParseLimits) -> Result<Self> {
        if line.len() > limits.max_line {
            bail!("request line too long");
        }
        let mut parts = line.split(' ');
        let method = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| {
            anyhow::anyhow!("missing method")
        })?;
        let target = parts.next().ok_or_else(|| anyhow::anyhow!("missing request target"))?;
        let version_tok = parts.next().ok_or_else(|| anyhow::anyhow!("missing HTTP version"))?;
        if parts.next().is_some() {
            bail!("malformed request line");
        }

        if target.len() > limits.max_uri {
            bail!("request URI too long");
        }

        let version = parse_version(version_tok)?;

        if target == "*" {
            return Ok(Self {
                method: method.to_string(),
                url: "*".to_string(),
                query: None,
                urlv: Vec::new(),
                version,
                request_type: RequestType::Asterisk,
                host: None,
                port: None,
            });
        }

        if method.eq_ignore_ascii_case("CONNECT") {
            let (host, port) = target
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("CONNECT target must be host:port"))?;
            return Ok(Self {
                method: method.to_string(),
                url: target.to_string(),
                query: None,
                urlv: Vec::new(),
                version,
                request_type: RequestType::Connect,
                host: Some(host.to_string()),
                port: Some(port.parse().map_err(|_| anyhow::anyhow!("bad CONNECT port"))?),
            });
        }

        if let Some(rest) = target.strip_prefix("http://").or_else(|| target.strip_prefix("https://")) {
            let (authority, path) = rest.split_once('/').map(|(a, p)| (a, format!("/{p}"))).unwrap_or((rest, "/".to_string()));
            let (host, port) = match authority.split_once(':') {
                Some((h, p)) => (h.to_string(), Some(p.parse().map_err(|_| anyhow::anyhow!("bad proxy port"))?)),
                None => (authority.to_string(), None),
            };
            let (url, query) = split_query(&path);
            return Ok(Self {
                method: method.to_string(),
                url: url.clone(),
                query,
                urlv: split_segments(&url),
                version,
                request_type: RequestType::Proxy,
                host: Some(host),
                port,
            });
        }

        if !target.starts_with('/') {
            bail!("invalid request path: {target}");
        }
        let (url, query) = split_query(target);
        Ok(Self {
            method: method.to_string(),
            urlv: split_segments(&url),
            url,
            query,
            version,
            request_type: RequestType::Plain,
            host: None,
            port: None,
        })
    }
}

fn split_query(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    }
}

fn split_segments(url: &str) -> Vec<String> {
    url.split('/').filter(|s| !s.is_empty()).map(String::from).collect()
}

fn parse_version(tok: &str) -> Result<(u8, u8)> {
    let rest = tok.strip_prefix("HTTP/").ok_or_else(|| anyhow::anyhow!("not an HTTP version: {tok}"))?;
    let (major, minor) = rest.split_once('.').ok_or_else(|| anyhow::anyhow!("malformed HTTP version: {tok}"))?;
    Ok((
        major.parse().map_err(|_| anyhow::anyhow!("bad major version"))?,
        minor.parse().map_err(|_| anyhow::anyhow!("bad minor version"))?,
    ))
}

/// How duplicate/competing header casing should be normalized on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCase {
    Preserve,
    ToLower,
    ToUpper,
}

/// Reads `lines` (already split on CRLF, no terminating blank line) into a
/// header [`Set`], honoring continuation lines (leading whitespace) and the
/// configured case disposition.
pub fn parse_headers(lines: &[&str], case: HeaderCase, limits: &ParseLimits) -> Result<Set> {
    let mut fields: Vec<(String, String)> = Vec::new();
    for line in lines {
        if line.len() > limits.max_line {
            bail!("header line too long");
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            let (_, last_value) =
                fields.last_mut().ok_or_else(|| anyhow::anyhow!("continuation with no prior header"))?;
            last_value.push(' ');
            last_value.push_str(line.trim());
            continue;
        }
        if fields.len() >= limits.max_headers {
            bail!("too many headers");
        }
        let (key, value) = line.split_once(':').ok_or_else(|| anyhow::anyhow!("malformed header: {line}"))?;
        fields.push((apply_case(key.trim(), case), value.trim().to_string()));
    }

    let mut set = Set::create(Some("headers"));
    for (key, value) in fields {
        set.put(&key, &value);
    }
    Ok(set)
}

fn apply_case(key: &str, case: HeaderCase) -> String {
    match case {
        HeaderCase::Preserve => key.to_string(),
        HeaderCase::ToLower => key.to_ascii_lowercase(),
        HeaderCase::ToUpper => key.to_ascii_uppercase(),
    }
}
