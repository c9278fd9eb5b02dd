use async_trait::async_trait;
use futures::{AsyncReadExt, AsyncWriteExt};
use smol::net::TcpStream;

use crate::verifier::{AddressVerifier, VerifyRequest, VerifyStatus};

/// Speaks the pipe-delimited verifier protocol (spec §6 "Network verifier"):
/// sends `<addr>|<from>|<ip>|<domain>|<mech>|<extra>`, reads back one
/// pipe-delimited response line whose leading numeric field selects
/// local/remote/permanent-reject/temporary-reject/abort.
pub struct NetworkVerifier {
    addr: String,
}

impl NetworkVerifier {
    pub fn new(addr: impl Into<String>) -> NetworkVerifier {
        NetworkVerifier { addr: addr.into() }
    }

    async fn exchange(&self, request: &VerifyRequest) -> std::io::Result<String> {
        let domain = request.address.split('@').nth(1).unwrap_or("");
        let line = format!(
            "{}|{}|{}|{}|{}|\r\n",
            request.address, request.mail_from, request.client_ip, domain, request.authentication_id
        );
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.write_all(line.as_bytes()).await?;
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.ends_with(b"\n") {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&buf).trim_end().to_owned())
    }
}

#[async_trait]
impl AddressVerifier for NetworkVerifier {
    async fn verify(&self, request: &VerifyRequest) -> VerifyStatus {
        match self.exchange(request).await {
            Ok(line) => parse_fields(&line),
            Err(e) => VerifyStatus::temporary_reject(
                "verifier unavailable",
                format!("network verifier {} unreachable: {}", self.addr, e),
            ),
        }
    }

    fn name(&self) -> &str {
        "network"
    }
}

/// Parses a pipe-delimited verifier response line (spec §6): `0` selects
/// local (mailbox, full-name), `1` remote (address), `2` permanent-reject,
/// `3` temporary-reject, `100` abort.
pub(crate) fn parse_fields(line: &str) -> VerifyStatus {
    let mut fields = line.split('|');
    let code: i32 = match fields.next().and_then(|f| f.trim().parse().ok()) {
        Some(c) => c,
        None => return VerifyStatus::temporary_reject("malformed response", "verifier sent garbage"),
    };
    match code {
        0 => {
            let mailbox = fields.next().unwrap_or("").to_owned();
            let full_name = fields.next().unwrap_or("").to_owned();
            VerifyStatus::local(mailbox, full_name)
        }
        1 => {
            let address = fields.next().unwrap_or("").to_owned();
            VerifyStatus::remote(address)
        }
        2 => {
            let reason = fields.next().unwrap_or("rejected").to_owned();
            VerifyStatus::permanent_reject(reason.clone(), reason)
        }
        3 => {
            let reason = fields.next().unwrap_or("try again later").to_owned();
            VerifyStatus::temporary_reject(reason.clone(), reason)
        }
        100 => VerifyStatus::abort(fields.next().unwrap_or("aborted by verifier").to_owned()),
        _ => VerifyStatus::temporary_reject("malformed response", "unknown verifier status code"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_local_response() {
        let status = parse_fields("0|jdoe|John Doe");
        assert!(status.is_valid);
        assert!(status.is_local);
        assert_eq!(status.recipient, "jdoe");
        assert_eq!(status.full_name, "John Doe");
    }

    #[test]
    fn parses_remote_response() {
        let status = parse_fields("1|b@y");
        assert!(status.is_valid);
        assert!(!status.is_local);
        assert_eq!(status.address, "b@y");
    }

    #[test]
    fn parses_permanent_and_temporary_rejects() {
        assert!(!parse_fields("2|no such user").is_valid);
        assert!(!parse_fields("2|no such user").temporary);
        assert!(parse_fields("3|mailbox full").temporary);
    }

    #[test]
    fn parses_abort() {
        assert!(parse_fields("100|blacklisted host").abort);
    }
}
