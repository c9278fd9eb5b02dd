use std::fmt;

/// A three-digit SMTP reply code (RFC 5321 §4.2).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReplyCode(u16);

#[allow(dead_code)]
impl ReplyCode {
    pub const SERVICE_READY: ReplyCode = ReplyCode(220);
    pub const CLOSING_CHANNEL: ReplyCode = ReplyCode(221);
    pub const AUTH_SUCCESSFUL: ReplyCode = ReplyCode(235);
    pub const OKAY: ReplyCode = ReplyCode(250);
    pub const USER_NOT_LOCAL_WILL_FORWARD: ReplyCode = ReplyCode(251);
    pub const CANNOT_VRFY_BUT_PLEASE_TRY: ReplyCode = ReplyCode(252);
    pub const AUTH_CONTINUE: ReplyCode = ReplyCode(334);
    pub const START_MAIL_INPUT: ReplyCode = ReplyCode(354);
    pub const SERVICE_NOT_AVAILABLE: ReplyCode = ReplyCode(421);
    pub const MAILBOX_TEMPORARILY_UNAVAILABLE: ReplyCode = ReplyCode(450);
    pub const LOCAL_ERROR: ReplyCode = ReplyCode(451);
    pub const INSUFFICIENT_STORAGE: ReplyCode = ReplyCode(452);
    pub const AUTH_TEMPORARY_FAILURE: ReplyCode = ReplyCode(454);
    pub const COMMAND_UNRECOGNIZED: ReplyCode = ReplyCode(500);
    pub const SYNTAX_ERROR: ReplyCode = ReplyCode(501);
    pub const COMMAND_UNIMPLEMENTED: ReplyCode = ReplyCode(502);
    pub const BAD_SEQUENCE: ReplyCode = ReplyCode(503);
    pub const PARAMETER_UNIMPLEMENTED: ReplyCode = ReplyCode(504);
    pub const AUTH_REQUIRED: ReplyCode = ReplyCode(530);
    pub const AUTH_CREDENTIALS_INVALID: ReplyCode = ReplyCode(535);
    pub const MAILBOX_UNAVAILABLE: ReplyCode = ReplyCode(550);
    pub const USER_NOT_LOCAL: ReplyCode = ReplyCode(551);
    pub const EXCEEDED_STORAGE: ReplyCode = ReplyCode(552);
    pub const MAILBOX_NAME_INCORRECT: ReplyCode = ReplyCode(553);
    pub const TRANSACTION_FAILED: ReplyCode = ReplyCode(554);

    pub const fn custom(code: u16) -> ReplyCode {
        ReplyCode(code)
    }

    pub fn code(&self) -> u16 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 < 400
    }

    pub fn is_transient(&self) -> bool {
        (400..500).contains(&self.0)
    }

    pub fn is_permanent(&self) -> bool {
        self.0 >= 500
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// RFC 3463/2034 enhanced status code, e.g. `2.1.5`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EnhancedReplyCode {
    pub class: u8,
    pub subject: u16,
    pub detail: u16,
}

#[allow(dead_code)]
impl EnhancedReplyCode {
    pub const SUCCESS: EnhancedReplyCode = EnhancedReplyCode { class: 2, subject: 0, detail: 0 };
    pub const SUCCESS_DESTINATION_VALID: EnhancedReplyCode =
        EnhancedReplyCode { class: 2, subject: 1, detail: 5 };
    pub const TRANSIENT_MAILBOX_FULL: EnhancedReplyCode =
        EnhancedReplyCode { class: 4, subject: 2, detail: 2 };
    pub const PERMANENT_MAILBOX_UNAVAILABLE: EnhancedReplyCode =
        EnhancedReplyCode { class: 5, subject: 1, detail: 1 };
    pub const PERMANENT_SYNTAX_ERROR: EnhancedReplyCode =
        EnhancedReplyCode { class: 5, subject: 5, detail: 2 };

    pub const fn custom(class: u8, subject: u16, detail: u16) -> EnhancedReplyCode {
        EnhancedReplyCode { class, subject, detail }
    }

    /// Classifies the RFC 3463 subject field, used by the forwarding
    /// client to decide whether a rejection is mailbox-level,
    /// mail-system-level, or something else entirely.
    pub fn subject_class(&self) -> EnhancedReplyCodeSubject {
        match self.subject {
            1 => EnhancedReplyCodeSubject::Mailbox,
            2 => EnhancedReplyCodeSubject::MailSystem,
            3 => EnhancedReplyCodeSubject::Network,
            4 => EnhancedReplyCodeSubject::Protocol,
            5 => EnhancedReplyCodeSubject::Content,
            6 => EnhancedReplyCodeSubject::Security,
            _ => EnhancedReplyCodeSubject::Other,
        }
    }

    /// Parses a leading `class.subject.detail ` prefix off a reply line's
    /// text, if present, returning the code and the remaining text.
    fn parse_prefix(text: &str) -> Option<(EnhancedReplyCode, &str)> {
        let mut parts = text.splitn(2, ' ');
        let code_str = parts.next()?;
        let rest = parts.next().unwrap_or("");
        let mut fields = code_str.splitn(3, '.');
        let class: u8 = fields.next()?.parse().ok()?;
        let subject: u16 = fields.next()?.parse().ok()?;
        let detail: u16 = fields.next()?.parse().ok()?;
        if fields.next().is_some() {
            return None;
        }
        if !(2..=5).contains(&class) {
            return None;
        }
        Some((EnhancedReplyCode { class, subject, detail }, rest))
    }
}

/// RFC 3463 §3 enhanced status code subject classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnhancedReplyCodeSubject {
    Other,
    Mailbox,
    MailSystem,
    Network,
    Protocol,
    Content,
    Security,
}

impl fmt::Display for EnhancedReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// One line of a (possibly multi-line) SMTP reply.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReplyLine {
    pub code: ReplyCode,
    pub is_last: bool,
    pub text: String,
}

/// A full SMTP reply: one or more lines sharing the same code, all but the
/// last using `-` as the separator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reply {
    pub code: ReplyCode,
    pub ecode: Option<EnhancedReplyCode>,
    pub lines: Vec<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ReplyParseError {
    #[error("reply line does not start with a three-digit code")]
    MissingCode,
    #[error("reply line's code separator is neither '-' nor ' '")]
    BadSeparator,
    #[error("reply line is not valid UTF-8")]
    NotUtf8,
}

impl ReplyLine {
    /// Parses a single reply line, without its trailing CRLF (e.g.
    /// `"250-relay.example"` or `"250 2.0.0 queued"`).
    pub fn parse(line: &[u8]) -> Result<ReplyLine, ReplyParseError> {
        let line = std::str::from_utf8(line).map_err(|_| ReplyParseError::NotUtf8)?;
        if line.len() < 4 || !line.as_bytes()[..3].iter().all(|b| b.is_ascii_digit()) {
            return Err(ReplyParseError::MissingCode);
        }
        let code: u16 = line[..3].parse().map_err(|_| ReplyParseError::MissingCode)?;
        let is_last = match line.as_bytes()[3] {
            b' ' => true,
            b'-' => false,
            _ => return Err(ReplyParseError::BadSeparator),
        };
        Ok(ReplyLine {
            code: ReplyCode::custom(code),
            is_last,
            text: line[4..].to_owned(),
        })
    }
}

impl Reply {
    /// Parses one full (possibly multi-line) reply out of consecutive CRLF
    /// lines already split by the caller (e.g. via
    /// [`crate::next_crlf`]-driven buffering, the way the forwarding
    /// client's transport does). Returns `None` if `lines` ends mid-reply
    /// (no line marked `is_last` yet).
    pub fn from_lines(lines: &[Vec<u8>]) -> Result<Option<(Reply, usize)>, ReplyParseError> {
        let mut parsed = Vec::new();
        for (i, raw) in lines.iter().enumerate() {
            let line = ReplyLine::parse(raw)?;
            let is_last = line.is_last;
            parsed.push(line);
            if is_last {
                let code = parsed[0].code;
                let ecode = EnhancedReplyCode::parse_prefix(&parsed.last().unwrap().text)
                    .map(|(e, _)| e);
                let lines = parsed.into_iter().map(|l| l.text).collect();
                return Ok(Some((Reply { code, ecode, lines }, i + 1)));
            }
        }
        Ok(None)
    }

    pub fn new(code: ReplyCode, ecode: Option<EnhancedReplyCode>, text: impl Into<String>) -> Reply {
        Reply { code, ecode, lines: vec![text.into()] }
    }

    pub fn multiline(
        code: ReplyCode,
        ecode: Option<EnhancedReplyCode>,
        lines: Vec<String>,
    ) -> Reply {
        Reply { code, ecode, lines }
    }

    /// Renders the reply as the exact bytes to put on the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let n = self.lines.len().max(1);
        for (i, line) in self.lines.iter().enumerate() {
            let is_last = i + 1 == n;
            out.extend_from_slice(self.code.to_string().as_bytes());
            out.push(if is_last { b' ' } else { b'-' });
            if is_last {
                if let Some(ecode) = &self.ecode {
                    out.extend_from_slice(ecode.to_string().as_bytes());
                    out.push(b' ');
                }
            }
            out.extend_from_slice(line.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out
    }

    pub fn is_positive(&self) -> bool {
        self.code.is_positive()
    }

    pub fn is_transient(&self) -> bool {
        self.code.is_transient()
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.lines.join(" / "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_with_enhanced_code() {
        let r = Reply::new(ReplyCode::OKAY, Some(EnhancedReplyCode::SUCCESS), "queued");
        assert_eq!(r.to_bytes(), b"250 2.0.0 queued\r\n");
    }

    #[test]
    fn multiline_reply() {
        let r = Reply::multiline(
            ReplyCode::custom(250),
            None,
            vec!["relay.example".to_owned(), "PIPELINING".to_owned()],
        );
        assert_eq!(r.to_bytes(), b"250-relay.example\r\n250 PIPELINING\r\n");
    }

    #[test]
    fn parses_multiline_reply_from_split_lines() {
        let lines: Vec<Vec<u8>> = vec![
            b"250-relay.example".to_vec(),
            b"250-PIPELINING".to_vec(),
            b"250 SIZE 1000000".to_vec(),
        ];
        let (reply, consumed) = Reply::from_lines(&lines).unwrap().unwrap();
        assert_eq!(consumed, 3);
        assert_eq!(reply.code, ReplyCode::OKAY);
        assert_eq!(reply.lines, vec!["relay.example", "PIPELINING", "SIZE 1000000"]);
    }

    #[test]
    fn incomplete_multiline_reply_yields_none() {
        let lines: Vec<Vec<u8>> = vec![b"250-relay.example".to_vec()];
        assert_eq!(Reply::from_lines(&lines).unwrap(), None);
    }

    #[test]
    fn extracts_enhanced_code_and_classifies_mailbox_subject() {
        let lines: Vec<Vec<u8>> = vec![b"550 5.1.1 mailbox unavailable".to_vec()];
        let (reply, _) = Reply::from_lines(&lines).unwrap().unwrap();
        let ecode = reply.ecode.unwrap();
        assert_eq!(ecode, EnhancedReplyCode::custom(5, 1, 1));
        assert_eq!(ecode.subject_class(), EnhancedReplyCodeSubject::Mailbox);
    }
}
