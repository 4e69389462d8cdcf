//! Access record formatting.
//!
//! # Responsibilities
//! - Snapshot the request metadata a record needs (peer, method, target, user-agent)
//! - Render one access record as a single `\n`-terminated line
//! - Escape free-form fields so a record can never span lines
//!
//! # Record Layout
//! ```text
//! <rfc3339> <host> <method> "<uri>" <status> <duration-ms> <bytes> <ratio> "<user-agent>" "<message>"
//! ```

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::http::{header, Method, Request, Uri};
use chrono::{Local, SecondsFormat};

/// Marker printed in place of a compression ratio that carries no signal.
pub const NO_RATIO: &str = "-";

/// Request metadata captured when the request enters the logging layer.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    /// Peer address as reported by the transport, e.g. `127.0.0.1:51234`.
    pub remote_addr: String,
    pub method: Method,
    pub uri: Uri,
    /// Raw `User-Agent` bytes; not necessarily UTF-8.
    pub user_agent: Vec<u8>,
}

impl RequestMeta {
    /// Snapshot the metadata of an incoming request.
    ///
    /// The peer address comes from the `ConnectInfo<SocketAddr>` extension that
    /// axum installs when serving with `into_make_service_with_connect_info`.
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let remote_addr = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default();

        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .map(|v| v.as_bytes().to_vec())
            .unwrap_or_default();

        Self {
            remote_addr,
            method: req.method().clone(),
            uri: req.uri().clone(),
            user_agent,
        }
    }
}

/// Values that vary per emission of a record.
#[derive(Debug, Clone, Copy)]
pub struct Outcome<'a> {
    /// Status code, `0` when the handler never produced a response.
    pub status: u16,
    pub duration: Duration,
    pub bytes: u64,
    pub ratio: &'a str,
    pub message: &'a str,
}

/// Render a full access record, including the trailing newline.
pub fn format_record(meta: &RequestMeta, outcome: &Outcome<'_>) -> String {
    let timestamp = Local::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    format!(
        "{} {} {} \"{}\" {} {} {} {} {} {}\n",
        timestamp,
        remote_host(&meta.remote_addr),
        meta.method,
        meta.uri,
        outcome.status,
        outcome.duration.as_millis(),
        outcome.bytes,
        outcome.ratio,
        quote_bytes(&meta.user_agent),
        quote(outcome.message),
    )
}

/// Strip the port from a peer address.
///
/// Bracketed IPv6 (`[::1]:80`) and plain `host:port` forms are reduced to the
/// host. Anything else, including a bare IPv6 address, is returned unchanged.
pub fn remote_host(addr: &str) -> String {
    if let Ok(sock) = addr.parse::<SocketAddr>() {
        return sock.ip().to_string();
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            host.to_string()
        }
        _ => addr.to_string(),
    }
}

/// Double-quote a string with C-style escapes.
///
/// Quotes, backslashes and every control or non-printable code point are
/// escaped, so the result never contains a raw line break.
pub fn quote(s: &str) -> String {
    quote_bytes(s.as_bytes())
}

/// Like [`quote`], for bytes that may not be valid UTF-8.
///
/// Invalid bytes are written as `\xNN`.
pub fn quote_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for chunk in bytes.utf8_chunks() {
        for c in chunk.valid().chars() {
            escape_char(&mut out, c);
        }
        for b in chunk.invalid() {
            let _ = write!(out, "\\x{:02x}", b);
        }
    }
    out.push('"');
    out
}

fn escape_char(out: &mut String, c: char) {
    match c {
        '"' => out.push_str("\\\""),
        '\\' => out.push_str("\\\\"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        '\u{07}' => out.push_str("\\a"),
        '\u{08}' => out.push_str("\\b"),
        '\u{0c}' => out.push_str("\\f"),
        '\u{0b}' => out.push_str("\\v"),
        c if (c as u32) < 0x20 || c == '\u{7f}' => {
            let _ = write!(out, "\\x{:02x}", c as u32);
        }
        c if !is_printable(c) => {
            let cp = c as u32;
            if cp <= 0xffff {
                let _ = write!(out, "\\u{:04x}", cp);
            } else {
                let _ = write!(out, "\\U{:08x}", cp);
            }
        }
        c => out.push(c),
    }
}

/// Whether `c` is printed as-is: anything but controls, separators other
/// than the ASCII space, format characters, private use and noncharacters.
///
/// Unassigned code points are not detected and pass through.
fn is_printable(c: char) -> bool {
    if c == ' ' {
        return true;
    }
    if c.is_control() || c.is_whitespace() {
        return false;
    }
    !matches!(
        c as u32,
        // separators not covered by is_whitespace
        0x180e | 0x200b
        // format characters
        | 0x00ad
        | 0x0600..=0x0605
        | 0x061c
        | 0x06dd
        | 0x070f
        | 0x0890..=0x0891
        | 0x08e2
        | 0x200c..=0x200f
        | 0x202a..=0x202e
        | 0x2060..=0x2064
        | 0x2066..=0x206f
        | 0xfeff
        | 0xfff9..=0xfffb
        | 0x110bd
        | 0x110cd
        | 0x13430..=0x1343f
        | 0x1bca0..=0x1bca3
        | 0x1d173..=0x1d17a
        | 0xe0001
        | 0xe0020..=0xe007f
        // private use
        | 0xe000..=0xf8ff
        | 0xf0000..=0x10ffff
        // noncharacters
        | 0xfdd0..=0xfdef
    ) && (c as u32) & 0xfffe != 0xfffe
}
