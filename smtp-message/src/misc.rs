use std::{fmt, io::IoSlice};

use lazy_static::lazy_static;
use regex_automata::{Regex, RegexBuilder};

lazy_static! {
    static ref HOSTNAME_ASCII: Regex = RegexBuilder::new()
        .allow_invalid_utf8(true)
        .build(r#"^[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?)*$"#)
        .unwrap();
    static ref HOSTNAME_UTF8: Regex = RegexBuilder::new()
        .allow_invalid_utf8(true)
        .build(r#"^[^\x00-\x20\x7f@,:;<>\[\]\\"]+$"#)
        .unwrap();
    static ref LOCALPART_ASCII: Regex = RegexBuilder::new()
        .allow_invalid_utf8(true)
        .build(r#"^[a-zA-Z0-9!#$%&'*+/=?^_`{|}~.-]+$"#)
        .unwrap();
    static ref LOCALPART_UTF8: Regex = RegexBuilder::new()
        .allow_invalid_utf8(true)
        .build(r#"^[^\x00-\x20\x7f@,:;<>\[\]\\"]+$"#)
        .unwrap();
}

fn matches_fully(re: &Regex, buf: &[u8]) -> bool {
    re.find(buf).map(|(_, end)| end == buf.len()).unwrap_or(false)
}

fn is_ascii(s: &[u8]) -> bool {
    s.iter().all(|b| b.is_ascii())
}

/// A string that may need UTF-8 (SMTPUTF8, RFC 6531) to be represented.
///
/// Which variant a parser produced (not merely whether the bytes happen to
/// be ASCII) is what callers use to decide whether SMTPUTF8 was required.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum MaybeUtf8 {
    Ascii(String),
    Utf8(String),
}

impl MaybeUtf8 {
    pub fn is_utf8(&self) -> bool {
        matches!(self, MaybeUtf8::Utf8(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            MaybeUtf8::Ascii(s) => s,
            MaybeUtf8::Utf8(s) => s,
        }
    }

    pub fn as_io_slice(&self) -> IoSlice {
        IoSlice::new(self.as_str().as_bytes())
    }
}

impl From<&str> for MaybeUtf8 {
    fn from(s: &str) -> Self {
        if is_ascii(s.as_bytes()) {
            MaybeUtf8::Ascii(s.to_owned())
        } else {
            MaybeUtf8::Utf8(s.to_owned())
        }
    }
}

/// A parsed hostname or address literal, per RFC 5321 `Domain` / RFC 6531.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Hostname {
    Utf8Domain { raw: String, punycode: String },
    AsciiDomain { raw: String },
    Ipv4 { raw: String },
    Ipv6 { raw: String },
}

impl Hostname {
    /// Parses a hostname or address literal from the start of `buf`, up to
    /// (but not including) the first byte in `term`. Returns the parsed
    /// value and the unconsumed remainder.
    pub fn parse_until<'a>(buf: &'a [u8], term: &[u8]) -> Option<(Hostname, &'a [u8])> {
        let limit = buf.iter().position(|b| term.contains(b)).unwrap_or(buf.len());
        let candidate = &buf[..limit];
        if candidate.is_empty() {
            return None;
        }
        if candidate.starts_with(b"[") && candidate.ends_with(b"]") {
            let inner = std::str::from_utf8(candidate).ok()?;
            let kind = if inner[1..inner.len() - 1].starts_with("IPv6:") {
                Hostname::Ipv6 { raw: inner.to_owned() }
            } else {
                Hostname::Ipv4 { raw: inner.to_owned() }
            };
            return Some((kind, &buf[limit..]));
        }
        if matches_fully(&HOSTNAME_ASCII, candidate) {
            let raw = std::str::from_utf8(candidate).ok()?.to_owned();
            return Some((Hostname::AsciiDomain { raw }, &buf[limit..]));
        }
        if matches_fully(&HOSTNAME_UTF8, candidate) {
            let raw = std::str::from_utf8(candidate).ok()?.to_owned();
            let punycode = idna::domain_to_ascii(&raw).ok()?;
            return Some((Hostname::Utf8Domain { raw, punycode }, &buf[limit..]));
        }
        None
    }

    pub fn is_utf8(&self) -> bool {
        matches!(self, Hostname::Utf8Domain { .. })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Hostname::Utf8Domain { raw, .. } => raw,
            Hostname::AsciiDomain { raw } => raw,
            Hostname::Ipv4 { raw } => raw,
            Hostname::Ipv6 { raw } => raw,
        }
    }

    pub fn as_io_slice(&self) -> IoSlice {
        IoSlice::new(self.as_str().as_bytes())
    }
}

impl fmt::Display for Hostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The local-part of an email address.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Localpart {
    Ascii { raw: String },
    Utf8 { raw: String },
}

impl Localpart {
    pub fn parse_until<'a>(buf: &'a [u8], term: &[u8]) -> Option<(Localpart, &'a [u8])> {
        let limit = buf.iter().position(|b| term.contains(b)).unwrap_or(buf.len());
        let candidate = &buf[..limit];
        if candidate.is_empty() {
            return None;
        }
        if matches_fully(&LOCALPART_ASCII, candidate) {
            let raw = std::str::from_utf8(candidate).ok()?.to_owned();
            return Some((Localpart::Ascii { raw }, &buf[limit..]));
        }
        if matches_fully(&LOCALPART_UTF8, candidate) {
            let raw = std::str::from_utf8(candidate).ok()?.to_owned();
            return Some((Localpart::Utf8 { raw }, &buf[limit..]));
        }
        None
    }

    pub fn is_utf8(&self) -> bool {
        matches!(self, Localpart::Utf8 { .. })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Localpart::Ascii { raw } => raw,
            Localpart::Utf8 { raw } => raw,
        }
    }

    pub fn as_io_slice(&self) -> IoSlice {
        IoSlice::new(self.as_str().as_bytes())
    }
}

/// How an address required SMTPUTF8, if at all — folded into the
/// envelope's `utf8_mailboxes` flag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Utf8Classification {
    PlainAscii,
    Utf8Mailbox,
    Utf8Domain,
    Utf8Both,
}

/// A parsed RFC 5321 reverse-path / forward-path mailbox.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Email {
    pub localpart: Localpart,
    pub hostname: Option<Hostname>,
}

impl Email {
    /// Parses `<localpart@hostname>` or a bare `localpart@hostname`, up to
    /// (not including) any byte in `term`.
    pub fn parse_until<'a>(buf: &'a [u8], term: &[u8]) -> Option<(Email, &'a [u8])> {
        let bracketed = buf.first() == Some(&b'<');
        let body = if bracketed { &buf[1..] } else { buf };
        if body.is_empty() {
            return None;
        }
        // `<>` is the null reverse-path, used for bounces.
        if bracketed && body.first() == Some(&b'>') {
            return Some((
                Email {
                    localpart: Localpart::Ascii { raw: String::new() },
                    hostname: None,
                },
                &body[1..],
            ));
        }
        let mut term_local = Vec::from(term);
        term_local.push(b'@');
        if bracketed {
            term_local.push(b'>');
        }
        let (localpart, rest) = Localpart::parse_until(body, &term_local)?;
        let (hostname, rest) = if rest.first() == Some(&b'@') {
            let mut term_host = Vec::from(term);
            if bracketed {
                term_host.push(b'>');
            }
            let (hostname, rest) = Hostname::parse_until(&rest[1..], &term_host)?;
            (Some(hostname), rest)
        } else {
            (None, rest)
        };
        if bracketed {
            if rest.first() != Some(&b'>') {
                return None;
            }
            Some((Email { localpart, hostname }, &rest[1..]))
        } else {
            Some((Email { localpart, hostname }, rest))
        }
    }

    pub fn as_io_slices(&self) -> Vec<IoSlice> {
        let mut v = vec![self.localpart.as_io_slice()];
        if let Some(h) = &self.hostname {
            v.push(IoSlice::new(b"@"));
            v.push(h.as_io_slice());
        }
        v
    }

    /// Classification used to populate the envelope's `utf8_mailboxes`
    /// flag and to pick ASCII- vs UTF8-safe wire encoding.
    pub fn classify(&self) -> Utf8Classification {
        let local_utf8 = self.localpart.is_utf8();
        let host_utf8 = self.hostname.as_ref().map(|h| h.is_utf8()).unwrap_or(false);
        match (local_utf8, host_utf8) {
            (false, false) => Utf8Classification::PlainAscii,
            (true, false) => Utf8Classification::Utf8Mailbox,
            (false, true) => Utf8Classification::Utf8Domain,
            (true, true) => Utf8Classification::Utf8Both,
        }
    }

    pub fn to_string_lossy(&self) -> String {
        let mut s = String::new();
        s.push_str(self.localpart.as_str());
        if let Some(h) = &self.hostname {
            s.push('@');
            s.push_str(h.as_str());
        }
        s
    }
}

/// Incremental CR-LF scanner state, carried across `read()` calls so that a
/// CRLF split across two reads is still detected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NextCrLfState {
    Start,
    CrPassed,
}

impl Default for NextCrLfState {
    fn default() -> Self {
        NextCrLfState::Start
    }
}

/// Finds the index right after the next `\r\n` in `buf`, resuming from
/// `state`. Returns `None` (and updates `state`) if no full CRLF has been
/// seen yet.
pub fn next_crlf(buf: &[u8], state: &mut NextCrLfState) -> Option<usize> {
    let mut i = 0;
    while i < buf.len() {
        match (*state, buf[i]) {
            (NextCrLfState::Start, b'\r') => {
                *state = NextCrLfState::CrPassed;
            }
            (NextCrLfState::CrPassed, b'\n') => {
                *state = NextCrLfState::Start;
                return Some(i + 1);
            }
            (NextCrLfState::CrPassed, b'\r') => {
                // stay in CrPassed
            }
            (_, _) => {
                *state = NextCrLfState::Start;
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_crlf_works() {
        let tests: &[(&[u8], NextCrLfState, Option<usize>, NextCrLfState)] = &[
            (b"hello world", NextCrLfState::Start, None, NextCrLfState::Start),
            (b"hello world\r", NextCrLfState::Start, None, NextCrLfState::CrPassed),
            (b"hello world\r\n", NextCrLfState::Start, Some(13), NextCrLfState::Start),
            (b"\nrest", NextCrLfState::CrPassed, Some(1), NextCrLfState::Start),
        ];
        for (inp, mut st, out, endst) in tests.iter().cloned() {
            let res = next_crlf(inp, &mut st);
            assert_eq!(res, out);
            assert_eq!(st, endst);
        }
    }

    #[test]
    fn email_parse_basic() {
        let (e, rest) = Email::parse_until(b"<a@x.example>\r\n", b"\r\n").unwrap();
        assert_eq!(rest, b"\r\n");
        assert_eq!(e.to_string_lossy(), "a@x.example");
    }

    #[test]
    fn email_parse_null_path() {
        let (e, rest) = Email::parse_until(b"<>\r\n", b"\r\n").unwrap();
        assert_eq!(rest, b"\r\n");
        assert_eq!(e.to_string_lossy(), "");
    }

    #[test]
    fn hostname_ip_literal() {
        let (h, rest) = Hostname::parse_until(b"[192.0.2.1]>", b">").unwrap();
        assert!(matches!(h, Hostname::Ipv4 { .. }));
        assert_eq!(rest, b">");
    }

    #[test]
    fn email_unbracketed() {
        let (e, rest) = Email::parse_until(b"a@x.example more", b" ").unwrap();
        assert_eq!(rest, b" more");
        assert_eq!(e.to_string_lossy(), "a@x.example");
    }
}
