use std::{future::Future, io, net::IpAddr};

use chrono::Utc;
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use smtp_message::{Command, NextCrLfState, Reply, ReplyParseError};
use trust_dns_resolver::{error::ResolveError, proto::error::ProtoError};

const MAX_REPLY_BUFFER: usize = 64 * 1024;

const ZERO_DURATION: std::time::Duration = std::time::Duration::from_secs(0);

/// Errors a forwarding attempt can fail with, carrying enough detail that
/// the caller can decide whether to retry, bounce, or quarantine the
/// stored message.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Retrieving MX DNS records for '{0}'")]
    DnsMx(String, #[source] ResolveError),

    #[error("Converting hostname '{0}' to to-be-resolved name")]
    HostToTrustDns(String, #[source] ProtoError),

    #[error("Retrieving IP DNS records for '{1}'")]
    DnsIp(trust_dns_resolver::Name, #[source] ResolveError),

    #[error("Connecting to '{0}' port '{1}'")]
    Connecting(IpAddr, u16, #[source] io::Error),

    #[error("Receiving reply bytes")]
    ReceivingReplyBytes(#[source] io::Error),

    #[error("Timed out while waiting for a reply")]
    TimedOutWaitingForReply,

    #[error("Connection aborted")]
    ConnectionAborted,

    #[error("Reply does not fit in buffer")]
    TooLongReply,

    #[error("Syntax error parsing a reply: {0}")]
    SyntaxError(#[source] ReplyParseError),

    #[error("Timed out while sending a command")]
    TimedOutSendingCommand,

    #[error("Sending command")]
    SendingCommand(#[source] io::Error),

    #[error("Negotiating TLS")]
    NegotiatingTls(#[source] io::Error),

    #[error("Cannot do TLS with remote server")]
    CannotDoTls,

    #[error("Mail-level transient issue: {0}")]
    TransientMail(Reply),

    #[error("Mailbox-level transient issue: {0}")]
    TransientMailbox(Reply),

    #[error("Mail system-level transient issue: {0}")]
    TransientMailSystem(Reply),

    #[error("Mail-level permanent issue: {0}")]
    PermanentMail(Reply),

    #[error("Mailbox-level permanent issue: {0}")]
    PermanentMailbox(Reply),

    #[error("Mail system-level permanent issue: {0}")]
    PermanentMailSystem(Reply),

    #[error("Unexpected reply code: {0}")]
    UnexpectedReplyCode(Reply),

    #[error("Timed out while sending data")]
    TimedOutSendingData,

    #[error("Sending data")]
    SendingData(#[source] io::Error),

    #[error("Reading the mail from the provided reader")]
    ReadingMail(#[source] io::Error),

    #[error("Authentication rejected by remote server")]
    AuthRejected(Reply),
}

pub enum TransportErrorSeverity {
    Local,
    NetworkTransient,
    MailTransient,
    MailboxTransient,
    MailSystemTransient,
    MailPermanent,
    MailboxPermanent,
    MailSystemPermanent,
}

impl TransportError {
    pub fn severity(&self) -> TransportErrorSeverity {
        use TransportError::*;
        match self {
            DnsMx(_, _) => TransportErrorSeverity::NetworkTransient,
            HostToTrustDns(_, _) => TransportErrorSeverity::Local,
            DnsIp(_, _) => TransportErrorSeverity::NetworkTransient,
            Connecting(_, _, _) => TransportErrorSeverity::NetworkTransient,
            ReceivingReplyBytes(_) => TransportErrorSeverity::NetworkTransient,
            TimedOutWaitingForReply => TransportErrorSeverity::NetworkTransient,
            ConnectionAborted => TransportErrorSeverity::NetworkTransient,
            TooLongReply => TransportErrorSeverity::NetworkTransient,
            SyntaxError(_) => TransportErrorSeverity::MailSystemTransient,
            TimedOutSendingCommand => TransportErrorSeverity::NetworkTransient,
            SendingCommand(_) => TransportErrorSeverity::NetworkTransient,
            NegotiatingTls(_) => TransportErrorSeverity::NetworkTransient,
            CannotDoTls => TransportErrorSeverity::NetworkTransient,
            TransientMail(_) => TransportErrorSeverity::MailTransient,
            TransientMailbox(_) => TransportErrorSeverity::MailboxTransient,
            TransientMailSystem(_) => TransportErrorSeverity::MailSystemTransient,
            PermanentMail(_) => TransportErrorSeverity::MailPermanent,
            PermanentMailbox(_) => TransportErrorSeverity::MailboxPermanent,
            PermanentMailSystem(_) => TransportErrorSeverity::MailSystemPermanent,
            UnexpectedReplyCode(_) => TransportErrorSeverity::NetworkTransient,
            TimedOutSendingData => TransportErrorSeverity::NetworkTransient,
            SendingData(_) => TransportErrorSeverity::NetworkTransient,
            ReadingMail(_) => TransportErrorSeverity::Local,
            AuthRejected(_) => TransportErrorSeverity::MailSystemTransient,
        }
    }
}

/// Expected reply-code class a given command should get back; anything else
/// is classified via [`TransportError::severity`] through `verify_reply`.
#[derive(Clone, Copy, Eq, PartialEq)]
pub enum ExpectedReply {
    PositiveCompletion,
    PositiveIntermediate,
}

pub(crate) async fn read_for_reply<T>(
    fut: impl Future<Output = io::Result<T>>,
    waiting_for_reply_since: &chrono::DateTime<Utc>,
    timeout: chrono::Duration,
) -> Result<T, TransportError> {
    smol::future::or(
        async { fut.await.map_err(TransportError::ReceivingReplyBytes) },
        async {
            let max_delay: std::time::Duration = (*waiting_for_reply_since + timeout - Utc::now())
                .to_std()
                .unwrap_or(ZERO_DURATION);
            smol::Timer::after(max_delay).await;
            Err(TransportError::TimedOutWaitingForReply)
        },
    )
    .await
}

/// Accumulates raw bytes into CRLF-delimited lines and hands full,
/// possibly-multiline replies to the caller, one [`smtp_message::Reply`] at
/// a time, mirroring the line-buffering `smtp-server`'s `LineReader` does
/// on the receiving side of a connection.
pub(crate) struct ReplyReader {
    buf: Vec<u8>,
    crlf_state: NextCrLfState,
    lines: Vec<Vec<u8>>,
}

impl ReplyReader {
    pub(crate) fn new() -> ReplyReader {
        ReplyReader { buf: Vec::new(), crlf_state: NextCrLfState::default(), lines: Vec::new() }
    }

    fn drain_lines(&mut self) {
        loop {
            let mut state = self.crlf_state;
            match smtp_message::next_crlf(&self.buf, &mut state) {
                Some(end) => {
                    self.crlf_state = state;
                    let line: Vec<u8> = self.buf.drain(..end).collect();
                    self.lines.push(line[..line.len() - 2].to_vec());
                }
                None => {
                    self.crlf_state = state;
                    break;
                }
            }
        }
    }

    pub(crate) async fn read_reply<IO>(
        &mut self,
        io: &mut IO,
        timeout: chrono::Duration,
    ) -> Result<Reply, TransportError>
    where
        IO: Unpin + Send + AsyncRead + AsyncWrite,
    {
        let start = Utc::now();
        loop {
            self.drain_lines();
            match Reply::from_lines(&self.lines) {
                Ok(Some((reply, consumed))) => {
                    self.lines.drain(..consumed);
                    return Ok(reply);
                }
                Ok(None) => {}
                Err(e) => return Err(TransportError::SyntaxError(e)),
            }
            if self.buf.len() + self.lines.iter().map(|l| l.len()).sum::<usize>()
                > MAX_REPLY_BUFFER
            {
                return Err(TransportError::TooLongReply);
            }
            let mut chunk = [0u8; 4096];
            let n = read_for_reply(io.read(&mut chunk), &start, timeout).await?;
            if n == 0 {
                return Err(TransportError::ConnectionAborted);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

pub(crate) fn verify_reply(r: Reply, expected: ExpectedReply) -> Result<(), TransportError> {
    use smtp_message::EnhancedReplyCodeSubject::*;
    use TransportError::*;
    let is_expected = match expected {
        ExpectedReply::PositiveCompletion => (200..300).contains(&r.code.code()),
        ExpectedReply::PositiveIntermediate => (300..400).contains(&r.code.code()),
    };
    if is_expected {
        return Ok(());
    }
    let subject = r.ecode.map(|e| e.subject_class());
    match (r.code.is_transient(), r.code.is_permanent(), subject) {
        (true, _, Some(Mailbox)) => Err(TransientMailbox(r)),
        (false, true, Some(Mailbox)) => Err(PermanentMailbox(r)),
        (true, _, Some(MailSystem)) => Err(TransientMailSystem(r)),
        (false, true, Some(MailSystem)) => Err(PermanentMailSystem(r)),
        (true, _, _) => Err(TransientMail(r)),
        (false, true, _) => Err(PermanentMail(r)),
        (_, _, _) => Err(UnexpectedReplyCode(r)),
    }
}

pub(crate) async fn send_command<IO>(
    io: &mut IO,
    cmd: Command,
    timeout: chrono::Duration,
) -> Result<(), TransportError>
where
    IO: Unpin + Send + AsyncRead + AsyncWrite,
{
    let mut line = cmd.to_line().into_bytes();
    line.extend_from_slice(b"\r\n");
    tracing::trace!(cmd = %String::from_utf8_lossy(&line), "sending command");
    smol::future::or(
        async {
            io.write_all(&line).await.map_err(TransportError::SendingCommand)?;
            Ok(())
        },
        async {
            smol::Timer::after(timeout.to_std().unwrap_or(ZERO_DURATION)).await;
            Err(TransportError::TimedOutSendingCommand)
        },
    )
    .await
}
