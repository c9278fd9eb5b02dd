use crate::{
    misc::{Email, Hostname},
    parameters::{parse_parameters, Parameters},
};

/// A single parsed SMTP command line (without the terminating CRLF).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Helo { hostname: String },
    Ehlo { hostname: String },
    MailFrom { from: Option<Email>, params: Parameters },
    RcptTo { to: Email, params: Parameters },
    Data,
    Bdat { chunk_size: u64, last: bool },
    Rset,
    Auth { mechanism: String, initial_response: Option<String> },
    AuthContinuation { response: String },
    StartTls,
    Vrfy { argument: String },
    Expn { argument: String },
    Help { argument: Option<String> },
    Noop,
    Quit,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CommandParseError {
    #[error("unrecognized command verb")]
    UnrecognizedVerb,
    #[error("malformed command syntax")]
    Syntax,
    #[error("line contains a disallowed control character")]
    DisallowedByte,
}

fn verb_and_rest(line: &[u8]) -> (&[u8], &[u8]) {
    let end = line.iter().position(|&b| b == b' ' || b == b':').unwrap_or(line.len());
    let mut rest_start = end;
    // Swallow one separator (space or, for MAIL/RCPT, `:`) and any further
    // spaces, so `MAIL FROM:<a@b>` and `MAILFROM: <a@b>` both work.
    if rest_start < line.len() {
        rest_start += 1;
    }
    while rest_start < line.len() && line[rest_start] == b' ' {
        rest_start += 1;
    }
    (&line[..end], &line[rest_start..])
}

fn has_control_byte(line: &[u8]) -> bool {
    line.iter().any(|&b| b < 0x20 && b != b'\t')
}

impl Command {
    /// Parses one command line (without the trailing CRLF, which the
    /// caller has already stripped via [`crate::next_crlf`]).
    pub fn parse(line: &[u8]) -> Result<Command, CommandParseError> {
        if has_control_byte(line) {
            return Err(CommandParseError::DisallowedByte);
        }
        let (verb, rest) = verb_and_rest(line);
        let verb_upper = String::from_utf8_lossy(verb).to_ascii_uppercase();
        match verb_upper.as_str() {
            "HELO" => Ok(Command::Helo {
                hostname: String::from_utf8_lossy(rest).into_owned(),
            }),
            "EHLO" => Ok(Command::Ehlo {
                hostname: String::from_utf8_lossy(rest).into_owned(),
            }),
            "MAIL" => parse_mail(rest),
            "RCPT" => parse_rcpt(rest),
            "DATA" => Ok(Command::Data),
            "BDAT" => parse_bdat(rest),
            "RSET" => Ok(Command::Rset),
            "AUTH" => parse_auth(rest),
            "STARTTLS" => Ok(Command::StartTls),
            "VRFY" => Ok(Command::Vrfy { argument: String::from_utf8_lossy(rest).into_owned() }),
            "EXPN" => Ok(Command::Expn { argument: String::from_utf8_lossy(rest).into_owned() }),
            "HELP" => Ok(Command::Help {
                argument: if rest.is_empty() {
                    None
                } else {
                    Some(String::from_utf8_lossy(rest).into_owned())
                },
            }),
            "NOOP" => Ok(Command::Noop),
            "QUIT" => Ok(Command::Quit),
            _ => Err(CommandParseError::UnrecognizedVerb),
        }
    }

    /// Renders the command back to the wire form, without the trailing
    /// CRLF (the caller appends it), for the forwarding client's outbound
    /// connection.
    pub fn to_line(&self) -> String {
        match self {
            Command::Helo { hostname } => format!("HELO {}", hostname),
            Command::Ehlo { hostname } => format!("EHLO {}", hostname),
            Command::MailFrom { from, params } => format!(
                "MAIL FROM:<{}>{}",
                from.as_ref().map(|e| e.to_string_lossy()).unwrap_or_default(),
                params.to_line()
            ),
            Command::RcptTo { to, params } => {
                format!("RCPT TO:<{}>{}", to.to_string_lossy(), params.to_line())
            }
            Command::Data => "DATA".to_owned(),
            Command::Bdat { chunk_size, last } => {
                if *last {
                    format!("BDAT {} LAST", chunk_size)
                } else {
                    format!("BDAT {}", chunk_size)
                }
            }
            Command::Rset => "RSET".to_owned(),
            Command::Auth { mechanism, initial_response } => match initial_response {
                Some(r) => format!("AUTH {} {}", mechanism, r),
                None => format!("AUTH {}", mechanism),
            },
            Command::AuthContinuation { response } => response.clone(),
            Command::StartTls => "STARTTLS".to_owned(),
            Command::Vrfy { argument } => format!("VRFY {}", argument),
            Command::Expn { argument } => format!("EXPN {}", argument),
            Command::Help { argument } => match argument {
                Some(a) => format!("HELP {}", a),
                None => "HELP".to_owned(),
            },
            Command::Noop => "NOOP".to_owned(),
            Command::Quit => "QUIT".to_owned(),
        }
    }

    /// Parses an AUTH continuation line sent outside of command context
    /// (the server is mid-`Auth` state and expects a raw response, not a
    /// verb).
    pub fn parse_auth_continuation(line: &[u8]) -> Result<Command, CommandParseError> {
        if has_control_byte(line) {
            return Err(CommandParseError::DisallowedByte);
        }
        Ok(Command::AuthContinuation {
            response: String::from_utf8_lossy(line).into_owned(),
        })
    }
}

fn parse_mail(rest: &[u8]) -> Result<Command, CommandParseError> {
    // Accept both `FROM:<addr> params` and (tolerantly) `FROM: <addr>`.
    let rest = strip_prefix_ci(rest, b"FROM").ok_or(CommandParseError::Syntax)?;
    let rest = strip_one(rest, b':').unwrap_or(rest);
    let rest = skip_spaces(rest);
    let (email, after) = if rest.first() == Some(&b'<') && rest.get(1) == Some(&b'>') {
        (None, &rest[2..])
    } else {
        let (email, after) = Email::parse_until(rest, b" ").ok_or(CommandParseError::Syntax)?;
        (Some(email), after)
    };
    let (after, params) = parse_parameters(after).map_err(|_| CommandParseError::Syntax)?;
    if !after.is_empty() {
        return Err(CommandParseError::Syntax);
    }
    Ok(Command::MailFrom { from: email, params })
}

fn parse_rcpt(rest: &[u8]) -> Result<Command, CommandParseError> {
    let rest = strip_prefix_ci(rest, b"TO").ok_or(CommandParseError::Syntax)?;
    let rest = strip_one(rest, b':').unwrap_or(rest);
    let rest = skip_spaces(rest);
    let (email, after) = Email::parse_until(rest, b" ").ok_or(CommandParseError::Syntax)?;
    let (after, params) = parse_parameters(after).map_err(|_| CommandParseError::Syntax)?;
    if !after.is_empty() {
        return Err(CommandParseError::Syntax);
    }
    Ok(Command::RcptTo { to: email, params })
}

fn parse_bdat(rest: &[u8]) -> Result<Command, CommandParseError> {
    let rest_str = std::str::from_utf8(rest).map_err(|_| CommandParseError::Syntax)?;
    let mut parts = rest_str.split_ascii_whitespace();
    let size_str = parts.next().ok_or(CommandParseError::Syntax)?;
    let chunk_size: u64 = size_str.parse().map_err(|_| CommandParseError::Syntax)?;
    let last = match parts.next() {
        None => false,
        Some(tag) if tag.eq_ignore_ascii_case("LAST") => true,
        Some(_) => return Err(CommandParseError::Syntax),
    };
    if parts.next().is_some() {
        return Err(CommandParseError::Syntax);
    }
    Ok(Command::Bdat { chunk_size, last })
}

fn parse_auth(rest: &[u8]) -> Result<Command, CommandParseError> {
    let rest_str = std::str::from_utf8(rest).map_err(|_| CommandParseError::Syntax)?;
    let mut parts = rest_str.splitn(2, ' ');
    let mechanism = parts.next().filter(|s| !s.is_empty()).ok_or(CommandParseError::Syntax)?;
    let initial_response = parts.next().map(|s| s.to_owned());
    Ok(Command::Auth {
        mechanism: mechanism.to_ascii_uppercase(),
        initial_response,
    })
}

fn strip_prefix_ci<'a>(buf: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    if buf.len() >= prefix.len() && buf[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&buf[prefix.len()..])
    } else {
        None
    }
}

fn strip_one(buf: &[u8], b: u8) -> Option<&[u8]> {
    if buf.first() == Some(&b) {
        Some(&buf[1..])
    } else {
        None
    }
}

fn skip_spaces(buf: &[u8]) -> &[u8] {
    let n = buf.iter().take_while(|&&b| b == b' ').count();
    &buf[n..]
}

/// Parses a bare hostname argument, e.g. the EHLO/HELO argument, as a best
/// effort classification (used only for logging/capability decisions, not
/// for strict validation — RFC 5321 servers are tolerant here).
pub fn parse_hello_hostname(arg: &str) -> Option<Hostname> {
    Hostname::parse_until(arg.as_bytes(), b"").map(|(h, _)| h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mail_from_basic() {
        let cmd = Command::parse(b"MAIL FROM:<a@x>").unwrap();
        match cmd {
            Command::MailFrom { from, params } => {
                assert_eq!(from.unwrap().to_string_lossy(), "a@x");
                assert_eq!(params, Parameters::none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parse_mail_from_with_params() {
        let cmd = Command::parse(b"MAIL FROM:<a@x> SIZE=100 BODY=8BITMIME").unwrap();
        match cmd {
            Command::MailFrom { from, params } => {
                assert_eq!(from.unwrap().to_string_lossy(), "a@x");
                assert_eq!(params.get("size"), Some(Some("100")));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parse_null_reverse_path() {
        let cmd = Command::parse(b"MAIL FROM:<>").unwrap();
        match cmd {
            Command::MailFrom { from, .. } => assert!(from.is_none()),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parse_rcpt_to() {
        let cmd = Command::parse(b"RCPT TO:<b@y>").unwrap();
        match cmd {
            Command::RcptTo { to, .. } => assert_eq!(to.to_string_lossy(), "b@y"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parse_bdat_with_last() {
        assert_eq!(
            Command::parse(b"BDAT 6 LAST").unwrap(),
            Command::Bdat { chunk_size: 6, last: true }
        );
        assert_eq!(
            Command::parse(b"BDAT 5").unwrap(),
            Command::Bdat { chunk_size: 5, last: false }
        );
    }

    #[test]
    fn unknown_verb_rejected() {
        assert_eq!(Command::parse(b"FROBNICATE").unwrap_err(), CommandParseError::UnrecognizedVerb);
    }

    #[test]
    fn control_byte_rejected() {
        assert_eq!(
            Command::parse(b"NOOP\x01").unwrap_err(),
            CommandParseError::DisallowedByte
        );
    }

    #[test]
    fn to_line_round_trips_mail_from() {
        let cmd = Command::parse(b"MAIL FROM:<a@x> SIZE=100").unwrap();
        assert_eq!(cmd.to_line(), "MAIL FROM:<a@x> SIZE=100");
    }

    #[test]
    fn to_line_bdat_last() {
        let cmd = Command::Bdat { chunk_size: 12, last: true };
        assert_eq!(cmd.to_line(), "BDAT 12 LAST");
    }

    #[test]
    fn auth_with_initial_response() {
        let cmd = Command::parse(b"AUTH PLAIN AGEAYQBi").unwrap();
        assert_eq!(
            cmd,
            Command::Auth {
                mechanism: "PLAIN".to_owned(),
                initial_response: Some("AGEAYQBi".to_owned())
            }
        );
    }
}
