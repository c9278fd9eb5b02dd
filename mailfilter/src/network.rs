use async_trait::async_trait;
use futures::{AsyncReadExt, AsyncWriteExt};
use mailstore::MessageId;
use smol::net::TcpStream;

use crate::{filter::Filter, result::FilterOutcome};

/// Speaks a minimal line-based protocol to a configured TCP endpoint: sends
/// the message id followed by CRLF, reads back a single response line,
/// optionally tab-separated into "response" and "reason" (spec §4.3
/// "NetworkFilter"). Grounded on the teacher's buffer-management pattern in
/// `smtp-client`'s reply reader, reused here for a single request/response
/// round trip instead of a full SMTP session.
pub struct NetworkFilter {
    addr: String,
}

impl NetworkFilter {
    pub fn new(addr: impl Into<String>) -> NetworkFilter {
        NetworkFilter { addr: addr.into() }
    }

    async fn exchange(&self, id: &MessageId) -> std::io::Result<String> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.write_all(id.as_str().as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
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
impl Filter for NetworkFilter {
    async fn run(&self, id: &MessageId) -> FilterOutcome {
        match self.exchange(id).await {
            Ok(line) => parse_response_line(&line),
            Err(e) => FilterOutcome::fail(
                "filter unavailable",
                format!("network filter {} unreachable: {}", self.addr, e),
                450,
            ),
        }
    }

    fn name(&self) -> &str {
        "network"
    }
}

/// Parses a NetworkFilter response line: empty means `ok`; otherwise the
/// part before an optional tab is the response and the part after is the
/// reason (defaulting to the response text if no tab is present).
fn parse_response_line(line: &str) -> FilterOutcome {
    if line.is_empty() {
        return FilterOutcome::ok();
    }
    let (response, reason) = match line.split_once('\t') {
        Some((r, reason)) => (r.to_owned(), reason.to_owned()),
        None => (line.to_owned(), line.to_owned()),
    };
    FilterOutcome::fail(response, reason, 550)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_line_is_ok() {
        assert_eq!(parse_response_line("").result, crate::result::FilterResult::Ok);
    }

    #[test]
    fn tab_separated_line_splits_response_and_reason() {
        let o = parse_response_line("blocked\tspam score 9.1");
        assert_eq!(o.response, "blocked");
        assert_eq!(o.reason, "spam score 9.1");
    }

    #[test]
    fn line_without_tab_uses_whole_line_for_both() {
        let o = parse_response_line("blocked");
        assert_eq!(o.response, "blocked");
        assert_eq!(o.reason, "blocked");
    }
}
