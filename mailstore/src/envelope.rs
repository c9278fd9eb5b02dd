use smtp_message::{xtext, BodyType};
use thiserror::Error;

/// Tri-state content-transfer hint carried by the SMTP `BODY=` parameter
/// (spec §3: `eight_bit_content`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EightBitState {
    SevenBit,
    EightBit,
    Unknown,
}

impl EightBitState {
    fn as_header_value(self) -> &'static str {
        match self {
            EightBitState::SevenBit => "7bit",
            EightBitState::EightBit => "8bit",
            EightBitState::Unknown => "unknown",
        }
    }

    fn from_header_value(v: &str) -> EightBitState {
        match v {
            "7bit" => EightBitState::SevenBit,
            "8bit" => EightBitState::EightBit,
            _ => EightBitState::Unknown,
        }
    }
}

/// The current on-disk envelope format. Readers also accept
/// [`PREVIOUS_FORMAT`] for one generation back (spec §9: "Envelope-on-disk
/// versioning").
pub const CURRENT_FORMAT: u32 = 2;
pub const PREVIOUS_FORMAT: u32 = 1;

/// The in-memory representation of a persisted envelope file (spec §3).
#[derive(Clone, Debug)]
pub struct Envelope {
    pub format_id: u32,
    pub line_ending_is_crlf: bool,
    pub eight_bit_content: EightBitState,
    pub from: String,
    pub to_local: Vec<String>,
    pub to_remote: Vec<String>,
    pub authentication_id: String,
    pub client_socket_address: String,
    pub client_certificate: String,
    /// Decoded `AUTH=` value received on MAIL FROM; `Some("")` encodes the
    /// RFC 2554 `AUTH=<>` "no mailbox disclosed" marker, `None` means no
    /// `AUTH=` parameter was present at all.
    pub from_auth_in: Option<String>,
    /// The `AUTH=` value to emit when forwarding, same convention.
    pub from_auth_out: Option<String>,
    pub forward_to: String,
    pub forward_to_address: String,
    pub utf8_mailboxes: bool,
    pub body_type: BodyType,
    /// Byte offset, within the full envelope file, where the structured
    /// block ends and trailing free-form headers begin.
    pub endpos: usize,
    /// Raw trailing lines (e.g. `Reason:`/`ReasonCode:` appended by
    /// [`crate::StoredMessage::fail`]), preserved verbatim across rewrites.
    pub trailing: String,
}

impl Default for Envelope {
    fn default() -> Envelope {
        Envelope {
            format_id: CURRENT_FORMAT,
            line_ending_is_crlf: true,
            eight_bit_content: EightBitState::Unknown,
            from: String::new(),
            to_local: Vec::new(),
            to_remote: Vec::new(),
            authentication_id: String::new(),
            client_socket_address: String::new(),
            client_certificate: String::new(),
            from_auth_in: None,
            from_auth_out: None,
            forward_to: String::new(),
            forward_to_address: String::new(),
            utf8_mailboxes: false,
            body_type: BodyType::Unknown,
            endpos: 0,
            trailing: String::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope is missing its X-MailRelay-End terminator")]
    MissingEnd,
    #[error("envelope format #{0} is newer than this implementation understands")]
    UnsupportedFormat(u32),
    #[error("envelope header {0:?} has an invalid value")]
    InvalidHeader(String),
}

fn body_type_str(b: BodyType) -> &'static str {
    match b {
        BodyType::Unknown => "unknown",
        BodyType::SevenBit => "7bit",
        BodyType::EightBitMime => "8bitmime",
        BodyType::BinaryMime => "binarymime",
    }
}

fn body_type_from_str(s: &str) -> BodyType {
    match s {
        "7bit" => BodyType::SevenBit,
        "8bitmime" => BodyType::EightBitMime,
        "binarymime" => BodyType::BinaryMime,
        _ => BodyType::Unknown,
    }
}

/// Folds a long value across multiple lines per RFC 2822 §2.2.3: each
/// continuation line starts with a single space.
fn fold(value: &str) -> String {
    const WIDTH: usize = 200;
    if value.len() <= WIDTH {
        return value.to_owned();
    }
    let mut out = String::new();
    for (i, chunk) in value.as_bytes().chunks(WIDTH).enumerate() {
        if i > 0 {
            out.push_str("\r\n ");
        }
        out.push_str(&String::from_utf8_lossy(chunk));
    }
    out
}

fn auth_header_value(v: &Option<String>) -> String {
    match v {
        None => String::new(),
        Some(s) if s.is_empty() => "+".to_owned(),
        Some(s) => xtext::encode(s.as_bytes()),
    }
}

fn auth_header_parse(v: &str) -> Option<String> {
    if v.is_empty() {
        None
    } else if v == "+" {
        Some(String::new())
    } else {
        xtext::decode(v).map(|b| String::from_utf8_lossy(&b).into_owned())
    }
}

impl Envelope {
    /// Serializes the structured envelope block, CR-LF terminated, in the
    /// exact header order spec.md §6 mandates. Does not include `trailing`.
    pub fn to_structured_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("X-MailRelay-Format: #{}\r\n", self.format_id));
        out.push_str(&format!(
            "X-MailRelay-Content: {}\r\n",
            self.eight_bit_content.as_header_value()
        ));
        out.push_str(&format!("X-MailRelay-From: {}\r\n", self.from));
        out.push_str(&format!(
            "X-MailRelay-ToCount: {}\r\n",
            self.to_local.len() + self.to_remote.len()
        ));
        for addr in &self.to_local {
            out.push_str(&format!("X-MailRelay-To-Local: {}\r\n", addr));
        }
        for addr in &self.to_remote {
            out.push_str(&format!("X-MailRelay-To-Remote: {}\r\n", addr));
        }
        out.push_str(&format!(
            "X-MailRelay-Authentication: {}\r\n",
            xtext::encode(self.authentication_id.as_bytes())
        ));
        out.push_str(&format!("X-MailRelay-Client: {}\r\n", self.client_socket_address));
        out.push_str(&format!(
            "X-MailRelay-ClientCertificate: {}\r\n",
            fold(&self.client_certificate)
        ));
        out.push_str(&format!(
            "X-MailRelay-MailFromAuthIn: {}\r\n",
            auth_header_value(&self.from_auth_in)
        ));
        out.push_str(&format!(
            "X-MailRelay-MailFromAuthOut: {}\r\n",
            auth_header_value(&self.from_auth_out)
        ));
        out.push_str(&format!(
            "X-MailRelay-ForwardTo: {}\r\n",
            xtext::encode(self.forward_to.as_bytes())
        ));
        out.push_str(&format!(
            "X-MailRelay-ForwardToAddress: {}\r\n",
            self.forward_to_address
        ));
        out.push_str(&format!(
            "X-MailRelay-BodyType: {}\r\n",
            body_type_str(self.body_type)
        ));
        out.push_str(&format!(
            "X-MailRelay-Utf8Mailboxes: {}\r\n",
            if self.utf8_mailboxes { 1 } else { 0 }
        ));
        out.push_str("X-MailRelay-End: 1\r\n");
        out
    }

    /// Serializes the full envelope file, structured block plus any
    /// trailing advisory headers.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut structured = self.to_structured_text();
        let endpos = structured.len();
        structured.push_str(&self.trailing);
        debug_assert_eq!(endpos, self.endpos.max(endpos).min(endpos));
        structured.into_bytes()
    }

    /// Parses a full envelope file (tolerant of bare `\n` line endings on
    /// read, per spec §6).
    pub fn parse(data: &[u8]) -> Result<Envelope, EnvelopeError> {
        let text = String::from_utf8_lossy(data);
        let line_ending_is_crlf = text.contains("\r\n");
        let mut env = Envelope {
            line_ending_is_crlf,
            ..Envelope::default()
        };
        let mut found_end = false;
        let mut consumed = 0usize;
        let mut lines_iter = split_lines_with_len(&text);
        while let Some((line, raw_len)) = lines_iter.next() {
            consumed += raw_len;
            if line.is_empty() {
                continue;
            }
            let (key, value) = match line.split_once(':') {
                Some((k, v)) => (k.trim(), v.trim_start()),
                None => continue,
            };
            match key {
                "X-MailRelay-Format" => {
                    let n: u32 = value
                        .trim_start_matches('#')
                        .trim()
                        .parse()
                        .map_err(|_| EnvelopeError::InvalidHeader(key.to_owned()))?;
                    if n > CURRENT_FORMAT {
                        return Err(EnvelopeError::UnsupportedFormat(n));
                    }
                    env.format_id = n;
                }
                "X-MailRelay-Content" => env.eight_bit_content = EightBitState::from_header_value(value),
                "X-MailRelay-From" => env.from = value.to_owned(),
                "X-MailRelay-ToCount" => { /* derived from the lists below; not re-validated strictly */ }
                "X-MailRelay-To-Local" => env.to_local.push(value.to_owned()),
                "X-MailRelay-To-Remote" => env.to_remote.push(value.to_owned()),
                "X-MailRelay-Authentication" => {
                    env.authentication_id = xtext::decode(value)
                        .map(|b| String::from_utf8_lossy(&b).into_owned())
                        .unwrap_or_default();
                }
                "X-MailRelay-Client" => env.client_socket_address = value.to_owned(),
                "X-MailRelay-ClientCertificate" => env.client_certificate.push_str(value),
                "X-MailRelay-MailFromAuthIn" => env.from_auth_in = auth_header_parse(value),
                "X-MailRelay-MailFromAuthOut" => env.from_auth_out = auth_header_parse(value),
                "X-MailRelay-ForwardTo" => {
                    env.forward_to = xtext::decode(value)
                        .map(|b| String::from_utf8_lossy(&b).into_owned())
                        .unwrap_or_default();
                }
                "X-MailRelay-ForwardToAddress" => env.forward_to_address = value.to_owned(),
                "X-MailRelay-BodyType" => env.body_type = body_type_from_str(value),
                "X-MailRelay-Utf8Mailboxes" => env.utf8_mailboxes = value.trim() == "1",
                "X-MailRelay-End" => {
                    found_end = true;
                    env.endpos = consumed;
                    break;
                }
                _ => { /* previous-generation or unknown header: ignored */ }
            }
        }
        if !found_end {
            return Err(EnvelopeError::MissingEnd);
        }
        // Whatever remains after `X-MailRelay-End` is advisory trailing
        // header material (e.g. `Reason:`/`ReasonCode:`), preserved as-is.
        let byte_endpos = text
            .char_indices()
            .nth(env.endpos)
            .map(|(i, _)| i)
            .unwrap_or(text.len());
        env.endpos = byte_endpos;
        env.trailing = text[byte_endpos.min(text.len())..].to_owned();
        Ok(env)
    }
}

/// Splits `text` into logical lines (without their terminator), yielding
/// each line together with the number of *characters* consumed including
/// its terminator, so the caller can track a running position.
fn split_lines_with_len(text: &str) -> impl Iterator<Item = (&str, usize)> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        if let Some(idx) = rest.find('\n') {
            let mut line = &rest[..idx];
            let mut consumed = idx + 1;
            if line.ends_with('\r') {
                line = &line[..line.len() - 1];
            }
            let (out_line, out_rest) = (line, &rest[consumed..]);
            let _ = &mut consumed;
            rest = out_rest;
            Some((out_line, idx + 1))
        } else {
            let line = rest;
            rest = "";
            Some((line, line.len()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope {
            from: "a@x".to_owned(),
            to_remote: vec!["b@y".to_owned()],
            client_socket_address: "127.0.0.1:2525".to_owned(),
            ..Envelope::default()
        }
    }

    #[test]
    fn roundtrip_preserves_fields_and_order() {
        let env = sample();
        let bytes = env.to_bytes();
        let reparsed = Envelope::parse(&bytes).unwrap();
        assert_eq!(reparsed.from, "a@x");
        assert_eq!(reparsed.to_remote, vec!["b@y".to_owned()]);
        assert_eq!(reparsed.to_local, Vec::<String>::new());
        assert_eq!(reparsed.client_socket_address, "127.0.0.1:2525");

        let bytes2 = reparsed.to_bytes();
        let reparsed2 = Envelope::parse(&bytes2).unwrap();
        assert_eq!(reparsed2.from, reparsed.from);
        assert_eq!(reparsed2.to_remote, reparsed.to_remote);
    }

    #[test]
    fn endpos_points_just_past_end_marker() {
        let env = sample();
        let bytes = env.to_bytes();
        let reparsed = Envelope::parse(&bytes).unwrap();
        let structured = env.to_structured_text();
        assert_eq!(reparsed.endpos, structured.len());
    }

    #[test]
    fn trailing_headers_preserved_across_rewrite() {
        let mut env = sample();
        env.trailing = "Reason: blocked by policy\r\nReasonCode: 550\r\n".to_owned();
        let bytes = env.to_bytes();
        let reparsed = Envelope::parse(&bytes).unwrap();
        assert_eq!(reparsed.trailing, "Reason: blocked by policy\r\nReasonCode: 550\r\n");
    }

    #[test]
    fn tolerates_bare_lf_on_read() {
        let env = sample();
        let crlf = env.to_structured_text();
        let lf_only = crlf.replace("\r\n", "\n");
        let reparsed = Envelope::parse(lf_only.as_bytes()).unwrap();
        assert_eq!(reparsed.from, "a@x");
    }

    #[test]
    fn auth_in_out_xtext_roundtrip() {
        let mut env = sample();
        env.from_auth_in = Some("plain value".to_owned());
        env.from_auth_out = Some(String::new());
        let bytes = env.to_bytes();
        let reparsed = Envelope::parse(&bytes).unwrap();
        assert_eq!(reparsed.from_auth_in.as_deref(), Some("plain value"));
        assert_eq!(reparsed.from_auth_out.as_deref(), Some(""));
    }

    #[test]
    fn rejects_unsupported_future_format() {
        let text = "X-MailRelay-Format: #99\r\nX-MailRelay-End: 1\r\n";
        let err = Envelope::parse(text.as_bytes()).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnsupportedFormat(99)));
    }
}
