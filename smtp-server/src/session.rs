use std::sync::Arc;
use std::{io, pin::Pin};

use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use smtp_message::{
    BodyType, Command, CommandParseError, EscapedDataReader, Parameters, Reply, ReplyCode,
};

use addressverifier::{VerifierCommand, VerifyRequest};

use crate::{
    auth::{decode_base64_field, decode_plain, encode_base64_field},
    config::{BoxedDuplex, ServerConfig},
    linereader::LineReader,
    state::{MailInProgress, State},
};

enum AuthContinuation {
    Plain,
    LoginUsername,
    LoginPassword { username: String },
}

/// One SMTP connection's state machine (spec §4.2). Built fresh per accepted
/// connection and driven to completion by [`run`].
pub struct Session {
    cfg: Arc<dyn ServerConfig>,
    conn: LineReader<BoxedDuplex>,
    state: State,
    hello_seen: bool,
    client_addr: String,
    is_encrypted: bool,
    authenticated_id: Option<String>,
    auth_continuation: Option<AuthContinuation>,
    mail: Option<MailInProgress>,
}

fn dummy_duplex() -> BoxedDuplex {
    duplexify::Duplex::new(
        Box::pin(futures::io::empty()) as Pin<Box<dyn AsyncRead + Send>>,
        Box::pin(futures::io::sink()) as Pin<Box<dyn AsyncWrite + Send>>,
    )
}

fn box_duplex<IO>(io: IO) -> BoxedDuplex
where
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (r, w) = io.split();
    duplexify::Duplex::new(
        Box::pin(r) as Pin<Box<dyn AsyncRead + Send>>,
        Box::pin(w) as Pin<Box<dyn AsyncWrite + Send>>,
    )
}

/// Drives one accepted connection to completion: greets, then loops reading
/// and dispatching commands until `QUIT`, a protocol error, or the peer
/// hanging up (spec §4.2, the "interact" loop ported from the teacher's
/// `smtp-server::interact`, generalized to call directly into `mailstore`,
/// `mailfilter` and `addressverifier` instead of an opaque `Decision`).
pub async fn interact<IO>(
    io: IO,
    client_addr: String,
    is_encrypted: bool,
    cfg: Arc<dyn ServerConfig>,
) -> io::Result<()>
where
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let session = Session {
        cfg,
        conn: LineReader::new(box_duplex(io)),
        state: State::Idle,
        hello_seen: false,
        client_addr,
        is_encrypted,
        authenticated_id: None,
        auth_continuation: None,
        mail: None,
    };
    session.run().await
}

impl Session {
    async fn run(mut self) -> io::Result<()> {
        let banner = self.cfg.banner();
        self.send_reply(Reply::new(ReplyCode::SERVICE_READY, None, banner)).await?;

        loop {
            let max_len = self.cfg.max_line_size();
            let line = match self.conn.next_line(max_len).await {
                Ok(Some(l)) => l,
                Ok(None) => return Ok(()),
                Err(e) => return Err(e),
            };

            if self.state == State::Auth {
                self.dispatch_auth_continuation(&line).await?;
                continue;
            }

            let cmd = match Command::parse(&line) {
                Ok(c) => c,
                Err(e) => {
                    let code = match e {
                        CommandParseError::Syntax => ReplyCode::SYNTAX_ERROR,
                        CommandParseError::UnrecognizedVerb | CommandParseError::DisallowedByte => {
                            ReplyCode::COMMAND_UNRECOGNIZED
                        }
                    };
                    self.send_reply(Reply::new(code, None, e.to_string())).await?;
                    continue;
                }
            };

            if matches!(cmd, Command::Quit) {
                self.send_reply(Reply::new(ReplyCode::CLOSING_CHANNEL, None, "closing connection"))
                    .await?;
                return Ok(());
            }

            self.dispatch(cmd).await?;
        }
    }

    async fn send_reply(&mut self, reply: Reply) -> io::Result<()> {
        self.conn.write_all(&reply.to_bytes()).await?;
        self.conn.flush().await
    }

    async fn dispatch(&mut self, cmd: Command) -> io::Result<()> {
        match cmd {
            Command::Helo { hostname } => self.handle_hello(hostname, false).await,
            Command::Ehlo { hostname } => self.handle_hello(hostname, true).await,
            Command::MailFrom { from, params } => self.handle_mail_from(from, params).await,
            Command::RcptTo { to, params } => self.handle_rcpt_to(to, params).await,
            Command::Data => self.handle_data().await,
            Command::Bdat { chunk_size, last } => self.handle_bdat(chunk_size, last).await,
            Command::Rset => self.handle_rset().await,
            Command::Auth { mechanism, initial_response } => {
                self.handle_auth(mechanism, initial_response).await
            }
            Command::StartTls => self.handle_starttls().await,
            Command::Vrfy { argument } => self.handle_vrfy(argument).await,
            Command::Expn { .. } => {
                self.send_reply(Reply::new(
                    ReplyCode::CANNOT_VRFY_BUT_PLEASE_TRY,
                    None,
                    "EXPN not supported",
                ))
                .await
            }
            Command::Help { .. } => {
                self.send_reply(Reply::new(
                    ReplyCode::custom(214),
                    None,
                    "this is mailrelay; see RFC 5321",
                ))
                .await
            }
            Command::Noop => self.send_reply(Reply::new(ReplyCode::OKAY, None, "OK")).await,
            Command::Quit | Command::AuthContinuation { .. } => unreachable!(),
        }
    }

    async fn handle_hello(&mut self, hostname: String, ehlo: bool) -> io::Result<()> {
        if let Some(mail) = self.mail.take() {
            let _ = mail.message.discard().await;
        }
        self.hello_seen = true;
        self.state = State::Idle;

        if !ehlo {
            let text = format!("{} greets {}", self.cfg.hostname(), hostname);
            return self.send_reply(Reply::new(ReplyCode::OKAY, None, text)).await;
        }

        let mut lines = vec![format!("{} greets {}", self.cfg.hostname(), hostname)];
        if self.cfg.enable_pipelining() {
            lines.push("PIPELINING".to_owned());
        }
        match self.cfg.max_message_size() {
            Some(max) => lines.push(format!("SIZE {}", max)),
            None => lines.push("SIZE".to_owned()),
        }
        lines.push("8BITMIME".to_owned());
        if self.cfg.enable_smtputf8() {
            lines.push("SMTPUTF8".to_owned());
        }
        if self.cfg.enable_chunking() {
            lines.push("CHUNKING".to_owned());
        }
        if self.cfg.can_do_tls(self.is_encrypted) {
            lines.push("STARTTLS".to_owned());
        }
        let mechs = self.cfg.auth_mechanisms();
        if !mechs.is_empty() && self.authenticated_id.is_none() {
            lines.push(format!("AUTH {}", mechs.join(" ")));
        }
        self.send_reply(Reply::multiline(ReplyCode::OKAY, None, lines)).await
    }

    async fn handle_rset(&mut self) -> io::Result<()> {
        if let Some(mail) = self.mail.take() {
            let _ = mail.message.discard().await;
        }
        self.state = State::Idle;
        self.send_reply(Reply::new(ReplyCode::OKAY, None, "OK")).await
    }

    async fn handle_mail_from(
        &mut self,
        from: Option<smtp_message::Email>,
        params: Parameters,
    ) -> io::Result<()> {
        if !self.hello_seen {
            return self
                .send_reply(Reply::new(ReplyCode::BAD_SEQUENCE, None, "send HELO/EHLO first"))
                .await;
        }
        if self.mail.is_some() {
            return self
                .send_reply(Reply::new(ReplyCode::BAD_SEQUENCE, None, "MAIL already in progress"))
                .await;
        }
        if let Some(Some(size)) = params.get("size") {
            if let (Ok(claimed), Some(max)) = (size.parse::<u64>(), self.cfg.max_message_size()) {
                if claimed > max {
                    return self
                        .send_reply(Reply::new(ReplyCode::EXCEEDED_STORAGE, None, "message too large"))
                        .await;
                }
            }
        }
        if params.has("smtputf8") && !self.cfg.enable_smtputf8() {
            return self
                .send_reply(Reply::new(
                    ReplyCode::PARAMETER_UNIMPLEMENTED,
                    None,
                    "SMTPUTF8 not supported",
                ))
                .await;
        }

        let from_str = from.as_ref().map(|e| e.to_string_lossy()).unwrap_or_default();
        let mut message = match self.cfg.store().new_message() {
            Ok(m) => m,
            Err(e) => {
                return self
                    .send_reply(Reply::new(
                        ReplyCode::LOCAL_ERROR,
                        None,
                        format!("could not open spool: {}", e),
                    ))
                    .await
            }
        };
        message.set_from(from_str.clone());
        message.set_client_socket_address(self.client_addr.clone());
        if let Some(id) = &self.authenticated_id {
            message.set_authentication_id(id.clone());
            message.set_from_auth_in(Some(id.clone()));
        }
        message.set_body_type(BodyType::from_param(params.get("body").flatten()));
        message.set_utf8_mailboxes(params.has("smtputf8"));

        self.mail = Some(MailInProgress {
            message,
            from: from_str,
            accepted_recipients: 0,
            store_error: None,
        });
        self.state = State::MailFrom;
        self.send_reply(Reply::new(ReplyCode::OKAY, None, "OK")).await
    }

    async fn handle_rcpt_to(&mut self, to: smtp_message::Email, _params: Parameters) -> io::Result<()> {
        if !matches!(self.state, State::MailFrom | State::GotRecipient) {
            return self
                .send_reply(Reply::new(ReplyCode::BAD_SEQUENCE, None, "send MAIL FROM first"))
                .await;
        }
        let max_recipients = self.cfg.max_recipients();
        let mail = self.mail.as_mut().expect("MailFrom/GotRecipient implies a transaction");
        if mail.accepted_recipients >= max_recipients {
            return self
                .send_reply(Reply::new(ReplyCode::custom(452), None, "too many recipients"))
                .await;
        }

        let address = to.to_string_lossy();
        let mut request = VerifyRequest::new(VerifierCommand::Rcpt, address);
        request.mail_from = mail.from.clone();
        request.client_ip = self.client_addr.clone();
        if let Some(id) = &self.authenticated_id {
            request.authentication_id = id.clone();
        }
        let status = self.cfg.verifier().verify(&request).await;

        if status.abort {
            self.send_reply(Reply::new(ReplyCode::custom(421), None, "closing connection")).await?;
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "verifier requested session abort",
            ));
        }
        if !status.is_valid {
            let code = if status.temporary {
                ReplyCode::MAILBOX_TEMPORARILY_UNAVAILABLE
            } else {
                ReplyCode::MAILBOX_UNAVAILABLE
            };
            let text = if status.response.is_empty() {
                "recipient rejected".to_owned()
            } else {
                status.response.clone()
            };
            return self.send_reply(Reply::new(code, None, text)).await;
        }

        let mail = self.mail.as_mut().expect("MailFrom/GotRecipient implies a transaction");
        if status.is_local {
            mail.message.add_recipient_local(status.recipient.clone());
        } else {
            mail.message.add_recipient_remote(status.address.clone());
        }
        mail.accepted_recipients += 1;
        self.state = State::GotRecipient;
        self.send_reply(Reply::new(ReplyCode::OKAY, None, "OK")).await
    }

    async fn handle_data(&mut self) -> io::Result<()> {
        if self.state != State::GotRecipient {
            return self
                .send_reply(Reply::new(ReplyCode::BAD_SEQUENCE, None, "send RCPT TO first"))
                .await;
        }
        self.send_reply(Reply::new(
            ReplyCode::START_MAIL_INPUT,
            None,
            "Start mail input; end with <CRLF>.<CRLF>",
        ))
        .await?;

        let mut buf = [0u8; 8192];
        let finished;
        let leftover;
        {
            let mut reader = EscapedDataReader::new(&mut self.conn);
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                if let Some(mail) = self.mail.as_mut() {
                    if mail.store_error.is_none() {
                        if let Err(e) = mail.message.add_content(&buf[..n]).await {
                            mail.store_error = Some(e.to_string());
                        }
                    }
                }
            }
            finished = reader.is_finished();
            leftover = reader.into_unhandled();
        }
        self.conn.unread(leftover);
        if !finished {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connection closed mid-DATA",
            ));
        }
        self.finish_transaction().await
    }

    async fn handle_bdat(&mut self, chunk_size: u64, last: bool) -> io::Result<()> {
        if self.state != State::GotRecipient {
            return self
                .send_reply(Reply::new(ReplyCode::BAD_SEQUENCE, None, "send RCPT TO first"))
                .await;
        }
        if !self.cfg.enable_chunking() {
            return self
                .send_reply(Reply::new(
                    ReplyCode::COMMAND_UNIMPLEMENTED,
                    None,
                    "BDAT/CHUNKING not supported",
                ))
                .await;
        }
        let chunk = self.conn.read_exact_n(chunk_size).await?;
        if let Some(mail) = self.mail.as_mut() {
            if mail.store_error.is_none() {
                if let Err(e) = mail.message.add_content(&chunk).await {
                    mail.store_error = Some(e.to_string());
                }
            }
        }
        if !last {
            return self
                .send_reply(Reply::new(
                    ReplyCode::OKAY,
                    None,
                    format!("{} octets received", chunk_size),
                ))
                .await;
        }
        self.finish_transaction().await
    }

    /// Commits, locks and runs the filter chain over a just-finished
    /// transaction, replying to the client with the outcome (spec §4.2's
    /// "Filtering" state and §4.3's filter-chain semantics).
    async fn finish_transaction(&mut self) -> io::Result<()> {
        let mail = self.mail.take().expect("finish_transaction called outside a transaction");
        self.state = State::Idle;

        if let Some(reason) = mail.store_error {
            let _ = mail.message.discard().await;
            return self
                .send_reply(Reply::new(
                    ReplyCode::custom(552),
                    None,
                    format!("message storage failed: {}", reason),
                ))
                .await;
        }
        if mail.accepted_recipients == 0 {
            let _ = mail.message.discard().await;
            return self
                .send_reply(Reply::new(ReplyCode::custom(554), None, "no valid recipients"))
                .await;
        }

        let id = match mail.message.commit().await {
            Ok(id) => id,
            Err(e) => {
                return self
                    .send_reply(Reply::new(
                        ReplyCode::LOCAL_ERROR,
                        None,
                        format!("could not queue message: {}", e),
                    ))
                    .await
            }
        };
        let mut stored = match self.cfg.store().get(&id) {
            Ok(s) => s,
            Err(e) => {
                return self
                    .send_reply(Reply::new(
                        ReplyCode::LOCAL_ERROR,
                        None,
                        format!("could not reload queued message: {}", e),
                    ))
                    .await
            }
        };
        if let Err(e) = stored.lock().await {
            return self
                .send_reply(Reply::new(
                    ReplyCode::LOCAL_ERROR,
                    None,
                    format!("could not lock queued message: {}", e),
                ))
                .await;
        }

        let outcome = self.cfg.filter_chain().run(&id).await;
        match outcome.result {
            mailfilter::FilterResult::Ok => {
                let _ = stored.unlock().await;
                self.send_reply(Reply::new(
                    ReplyCode::OKAY,
                    None,
                    format!("message queued as {}", id),
                ))
                .await
            }
            mailfilter::FilterResult::Abandon => {
                let _ = stored.destroy().await;
                self.send_reply(Reply::new(ReplyCode::OKAY, None, "message accepted")).await
            }
            mailfilter::FilterResult::Fail => {
                // Spec §4.2: a server-side filter `fail` means the message
                // is not committed at all, not quarantined — unlike a
                // forwarding-side `fail` (Forwarder::forward_one), which
                // does keep a `.bad` record for a message already accepted.
                let reply = outcome.to_reply(550);
                let _ = stored.destroy().await;
                self.send_reply(reply).await
            }
        }
    }

    async fn handle_auth(
        &mut self,
        mechanism: String,
        initial_response: Option<String>,
    ) -> io::Result<()> {
        if self.authenticated_id.is_some() {
            return self
                .send_reply(Reply::new(ReplyCode::BAD_SEQUENCE, None, "already authenticated"))
                .await;
        }
        let mechs = self.cfg.auth_mechanisms();
        if !mechs.iter().any(|m| m.eq_ignore_ascii_case(&mechanism)) {
            return self
                .send_reply(Reply::new(
                    ReplyCode::PARAMETER_UNIMPLEMENTED,
                    None,
                    "unrecognized authentication mechanism",
                ))
                .await;
        }
        match mechanism.as_str() {
            "PLAIN" => match initial_response {
                Some(resp) => self.complete_plain_auth(&resp).await,
                None => {
                    self.state = State::Auth;
                    self.auth_continuation = Some(AuthContinuation::Plain);
                    self.send_reply(Reply::new(ReplyCode::AUTH_CONTINUE, None, "")).await
                }
            },
            "LOGIN" => match initial_response {
                Some(resp) => self.handle_login_username(&resp).await,
                None => {
                    self.state = State::Auth;
                    self.auth_continuation = Some(AuthContinuation::LoginUsername);
                    self.send_reply(Reply::new(
                        ReplyCode::AUTH_CONTINUE,
                        None,
                        encode_base64_field("Username:"),
                    ))
                    .await
                }
            },
            // CRAM-MD5 and XOAUTH2 are advertised as mechanism identifiers
            // only (spec §6): their exchanges need a server challenge or an
            // OAuth bearer token, not a plain secret, so there is nothing for
            // `AuthBackend::verify` to check here.
            "CRAM-MD5" | "XOAUTH2" => {
                self.send_reply(Reply::new(
                    ReplyCode::PARAMETER_UNIMPLEMENTED,
                    None,
                    "mechanism not implemented",
                ))
                .await
            }
            _ => {
                self.send_reply(Reply::new(
                    ReplyCode::PARAMETER_UNIMPLEMENTED,
                    None,
                    "unrecognized authentication mechanism",
                ))
                .await
            }
        }
    }

    async fn dispatch_auth_continuation(&mut self, line: &[u8]) -> io::Result<()> {
        let text = String::from_utf8_lossy(line).into_owned();
        if text == "*" {
            self.state = State::Idle;
            self.auth_continuation = None;
            return self
                .send_reply(Reply::new(ReplyCode::SYNTAX_ERROR, None, "authentication cancelled"))
                .await;
        }
        match self.auth_continuation.take() {
            Some(AuthContinuation::Plain) => self.complete_plain_auth(&text).await,
            Some(AuthContinuation::LoginUsername) => self.handle_login_username(&text).await,
            Some(AuthContinuation::LoginPassword { username }) => {
                let pass = decode_base64_field(&text).unwrap_or_default();
                self.finish_auth("LOGIN", &username, &pass).await
            }
            None => {
                self.state = State::Idle;
                self.send_reply(Reply::new(ReplyCode::BAD_SEQUENCE, None, "unexpected continuation"))
                    .await
            }
        }
    }

    async fn handle_login_username(&mut self, field: &str) -> io::Result<()> {
        let username = decode_base64_field(field).unwrap_or_default();
        self.state = State::Auth;
        self.auth_continuation = Some(AuthContinuation::LoginPassword { username });
        self.send_reply(Reply::new(ReplyCode::AUTH_CONTINUE, None, encode_base64_field("Password:")))
            .await
    }

    async fn complete_plain_auth(&mut self, field: &str) -> io::Result<()> {
        match decode_plain(field) {
            Some((user, pass)) => self.finish_auth("PLAIN", &user, &pass).await,
            None => {
                self.state = State::Idle;
                self.auth_continuation = None;
                self.send_reply(Reply::new(ReplyCode::SYNTAX_ERROR, None, "invalid base64 response"))
                    .await
            }
        }
    }

    async fn finish_auth(&mut self, mechanism: &str, user: &str, pass: &str) -> io::Result<()> {
        let ok = match self.cfg.auth_backend() {
            Some(backend) => backend.verify(mechanism, user, pass).await,
            None => false,
        };
        self.state = State::Idle;
        self.auth_continuation = None;
        if ok {
            self.authenticated_id = Some(user.to_owned());
            self.send_reply(Reply::new(ReplyCode::AUTH_SUCCESSFUL, None, "Authentication successful"))
                .await
        } else {
            self.send_reply(Reply::new(ReplyCode::AUTH_CREDENTIALS_INVALID, None, "authentication failed"))
                .await
        }
    }

    async fn handle_starttls(&mut self) -> io::Result<()> {
        if self.is_encrypted || !self.cfg.can_do_tls(self.is_encrypted) {
            return self
                .send_reply(Reply::new(
                    ReplyCode::COMMAND_UNIMPLEMENTED,
                    None,
                    "STARTTLS not available",
                ))
                .await;
        }
        self.send_reply(Reply::new(ReplyCode::SERVICE_READY, None, "Ready to start TLS")).await?;

        // Any bytes already buffered ahead of the handshake must be thrown
        // away, not fed to the TLS layer: RFC 3207 forbids acting on
        // commands pipelined before STARTTLS completes.
        let plain = std::mem::replace(&mut self.conn, LineReader::new(dummy_duplex()));
        let io = plain.into_inner();
        let tls_io = self.cfg.tls_accept(io).await?;
        self.conn = LineReader::new(tls_io);
        self.is_encrypted = true;
        self.hello_seen = false;
        self.state = State::Idle;
        if let Some(mail) = self.mail.take() {
            let _ = mail.message.discard().await;
        }
        Ok(())
    }

    async fn handle_vrfy(&mut self, argument: String) -> io::Result<()> {
        let mut request = VerifyRequest::new(VerifierCommand::Vrfy, argument);
        request.client_ip = self.client_addr.clone();
        if let Some(id) = &self.authenticated_id {
            request.authentication_id = id.clone();
        }
        let status = self.cfg.verifier().verify(&request).await;
        if status.abort {
            self.send_reply(Reply::new(ReplyCode::custom(421), None, "closing connection")).await?;
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "verifier requested session abort",
            ));
        }
        if status.is_valid && status.is_local {
            let text = format!("{} <{}>", status.full_name, status.recipient);
            self.send_reply(Reply::new(ReplyCode::OKAY, None, text)).await
        } else if status.is_valid {
            self.send_reply(Reply::new(
                ReplyCode::CANNOT_VRFY_BUT_PLEASE_TRY,
                None,
                "cannot VRFY a remote address; try RCPT instead",
            ))
            .await
        } else {
            self.send_reply(Reply::new(ReplyCode::MAILBOX_UNAVAILABLE, None, "no such user")).await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        task::{Context, Poll},
    };

    use addressverifier::{AddressVerifier, DemoVerifier};
    use async_trait::async_trait;
    use futures::io::Cursor;
    use mailfilter::{Filter, FilterChain, FilterOutcome};
    use mailstore::{MessageId, MessageStore};
    use tempfile::tempdir;

    use super::*;

    #[derive(Clone)]
    struct CollectWriter(Arc<Mutex<Vec<u8>>>);

    impl AsyncWrite for CollectWriter {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct AlwaysReject;

    #[async_trait]
    impl Filter for AlwaysReject {
        async fn run(&self, _id: &MessageId) -> FilterOutcome {
            FilterOutcome::fail("message refused", "blocked by policy", 550)
        }

        fn name(&self) -> &str {
            "always-reject"
        }
    }

    struct TestConfig {
        store: MessageStore,
        verifier: DemoVerifier,
        filters: FilterChain,
    }

    #[async_trait]
    impl ServerConfig for TestConfig {
        fn hostname(&self) -> &str {
            "relay.example"
        }

        fn store(&self) -> &MessageStore {
            &self.store
        }

        fn verifier(&self) -> &dyn AddressVerifier {
            &self.verifier
        }

        fn filter_chain(&self) -> &FilterChain {
            &self.filters
        }
    }

    fn run_session(input: &[u8], filters: FilterChain) -> (Vec<u8>, MessageStore) {
        let dir = tempdir().unwrap();
        let store = MessageStore::open(dir.path(), None).unwrap();
        let cfg = Arc::new(TestConfig {
            store: store.clone(),
            verifier: DemoVerifier::new("example.org"),
            filters,
        });
        let out = Arc::new(Mutex::new(Vec::new()));
        let io = duplexify::Duplex::new(Cursor::new(input.to_vec()), CollectWriter(out.clone()));
        smol::block_on(interact(io, "203.0.113.9:51512".to_owned(), false, cfg)).unwrap();
        let bytes = out.lock().unwrap().clone();
        (bytes, store)
    }

    #[test]
    fn basic_submission_is_queued() {
        let (resp, store) = run_session(
            b"EHLO client.example\r\n\
              MAIL FROM:<a@example.org>\r\n\
              RCPT TO:<b@example.org>\r\n\
              DATA\r\n\
              Subject: hi\r\n\
              \r\n\
              body text\r\n\
              .\r\n\
              QUIT\r\n",
            FilterChain::empty(),
        );
        let text = String::from_utf8_lossy(&resp);
        assert!(text.starts_with("220 "));
        assert!(text.contains("250-relay.example greets client.example"));
        assert!(text.contains("354 "));
        assert!(text.contains("250 message queued as"));
        assert!(text.contains("221 "));
        assert_eq!(store.ids().unwrap().len(), 1);
    }

    #[test]
    fn dot_stuffed_content_is_unstuffed_on_disk() {
        let (resp, store) = run_session(
            b"HELO client.example\r\n\
              MAIL FROM:<a@example.org>\r\n\
              RCPT TO:<b@example.org>\r\n\
              DATA\r\n\
              ..leading dot\r\n\
              .\r\n\
              QUIT\r\n",
            FilterChain::empty(),
        );
        assert!(String::from_utf8_lossy(&resp).contains("250 "));
        let ids = store.ids().unwrap();
        assert_eq!(ids.len(), 1);
        let content = std::fs::read(store.spool_dir().join(ids[0].content_filename())).unwrap();
        assert_eq!(content, b".leading dot\r\n");
    }

    #[test]
    fn bdat_chunks_are_concatenated() {
        let (resp, store) = run_session(
            b"EHLO client.example\r\n\
              MAIL FROM:<a@example.org>\r\n\
              RCPT TO:<b@example.org>\r\n\
              BDAT 5\r\n\
              helloBDAT 6 LAST\r\n\
              world!QUIT\r\n",
            FilterChain::empty(),
        );
        let text = String::from_utf8_lossy(&resp);
        assert!(text.contains("5 octets received"));
        assert!(text.contains("250 message queued as"));
        let ids = store.ids().unwrap();
        let content = std::fs::read(store.spool_dir().join(ids[0].content_filename())).unwrap();
        assert_eq!(content, b"helloworld!");
    }

    #[test]
    fn filter_rejection_leaves_nothing_in_the_spool() {
        let filters = FilterChain::new(vec![Box::new(AlwaysReject)]);
        let (resp, store) = run_session(
            b"EHLO client.example\r\n\
              MAIL FROM:<a@example.org>\r\n\
              RCPT TO:<b@example.org>\r\n\
              DATA\r\n\
              hi\r\n\
              .\r\n\
              QUIT\r\n",
            filters,
        );
        assert!(String::from_utf8_lossy(&resp).contains("550 message refused"));
        assert_eq!(store.ids().unwrap().len(), 0);
        assert_eq!(store.failures().unwrap().len(), 0);
    }

    #[test]
    fn no_recipients_is_rejected() {
        let (resp, store) = run_session(
            b"EHLO client.example\r\n\
              MAIL FROM:<a@example.org>\r\n\
              DATA\r\n",
            FilterChain::empty(),
        );
        assert!(String::from_utf8_lossy(&resp).contains("503 "));
        assert_eq!(store.ids().unwrap().len(), 0);
    }

    #[test]
    fn interrupted_data_reports_connection_aborted() {
        let dir = tempdir().unwrap();
        let store = MessageStore::open(dir.path(), None).unwrap();
        let cfg = Arc::new(TestConfig {
            store: store.clone(),
            verifier: DemoVerifier::new("example.org"),
            filters: FilterChain::empty(),
        });
        let out = Arc::new(Mutex::new(Vec::new()));
        let input = b"EHLO client.example\r\n\
                      MAIL FROM:<a@example.org>\r\n\
                      RCPT TO:<b@example.org>\r\n\
                      DATA\r\n\
                      hello"
            .to_vec();
        let io = duplexify::Duplex::new(Cursor::new(input), CollectWriter(out));
        let err = smol::block_on(interact(io, "203.0.113.9:1".to_owned(), false, cfg)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }
}
