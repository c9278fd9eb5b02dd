use std::{collections::BTreeMap, fmt, io, net::IpAddr, pin::Pin, sync::Arc};

use async_trait::async_trait;
use bitflags::bitflags;
use futures::{AsyncRead, AsyncReadExt, AsyncWrite};
use rand::prelude::SliceRandom;
use smol::net::TcpStream;
use trust_dns_resolver::{
    error::ResolveErrorKind, proto::error::ProtoError, AsyncResolver, IntoName,
};

use smtp_message::Hostname;

use crate::{
    sender::Sender,
    transport::{send_command, verify_reply, ExpectedReply, ReplyReader, TransportError},
};

const SMTP_PORT: u16 = 25;

/// A type-erased, full-duplex connection, used to hand the plaintext
/// connection off to TLS negotiation and get it back the same shape.
pub type DynAsyncReadWrite =
    duplexify::Duplex<Pin<Box<dyn Send + AsyncRead>>, Pin<Box<dyn Send + AsyncWrite>>>;

#[derive(Eq, Hash, PartialEq)]
pub struct Destination {
    host: Hostname,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.host.fmt(f)
    }
}

/// Per-destination behaviour the forwarding client defers to its caller:
/// which hostname to present, whether/when to attempt TLS, and the
/// per-phase timeouts.
#[async_trait]
pub trait Config: Send + Sync {
    fn ehlo_hostname(&self) -> String;

    fn can_do_tls(&self) -> bool {
        true
    }

    fn must_do_tls(&self) -> bool {
        false
    }

    /// Credentials to present via `AUTH`, if any. Only attempted once the
    /// remote has advertised at least one mechanism this crate can drive
    /// (`PLAIN`/`LOGIN`).
    fn credentials(&self) -> Option<crate::auth::Credentials> {
        None
    }

    /// Note: if this can only fail, make [`Self::can_do_tls`] return false.
    async fn tls_connect<IO>(&self, io: IO) -> io::Result<DynAsyncReadWrite>
    where
        IO: 'static + Unpin + Send + AsyncRead + AsyncWrite;

    fn banner_read_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(5)
    }

    fn command_write_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(5)
    }

    fn ehlo_reply_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(5)
    }

    fn starttls_reply_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(2)
    }

    fn auth_reply_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(2)
    }

    fn mail_reply_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(5)
    }

    fn rcpt_reply_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(5)
    }

    fn data_init_reply_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(2)
    }

    fn data_block_write_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(3)
    }

    fn data_end_reply_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(10)
    }

    /// Whether `BDAT`/`CHUNKING` should be used when the remote advertises
    /// it, instead of classic `DATA`.
    fn prefer_chunking(&self) -> bool {
        true
    }
}

bitflags! {
    pub(crate) struct Extensions: u16 {
        const STARTTLS  = 0b0001;
        const CHUNKING  = 0b0010;
        const AUTH_PLAIN = 0b0100;
        const AUTH_LOGIN = 0b1000;
    }
}

pub struct Client<C, P, Cfg>
where
    C: trust_dns_resolver::proto::DnsHandle<Error = trust_dns_resolver::error::ResolveError>,
    P: trust_dns_resolver::ConnectionProvider<Conn = C>,
    Cfg: Config,
{
    resolver: AsyncResolver<C, P>,
    cfg: Arc<Cfg>,
}

impl<C, P, Cfg> Client<C, P, Cfg>
where
    C: trust_dns_resolver::proto::DnsHandle<Error = trust_dns_resolver::error::ResolveError>,
    P: trust_dns_resolver::ConnectionProvider<Conn = C>,
    Cfg: Config,
{
    /// Note: passing a resolver configured for `Ipv6andIpv4` may attempt
    /// both families if the first fails, degrading performance.
    pub fn new(resolver: AsyncResolver<C, P>, cfg: Arc<Cfg>) -> Client<C, P, Cfg> {
        Client { resolver, cfg }
    }

    pub async fn get_destination(&self, host: &Hostname) -> Result<Destination, TransportError> {
        Ok(Destination { host: host.clone() })
    }

    pub async fn connect(&self, dest: &Destination) -> Result<Sender<Cfg>, TransportError> {
        match &dest.host {
            Hostname::Ipv4 { raw } => {
                let literal = raw.trim_start_matches('[').trim_end_matches(']');
                let ip: IpAddr = literal.parse().map_err(|_| {
                    TransportError::HostToTrustDns(raw.clone(), dummy_proto_error())
                })?;
                self.connect_to_ip(ip, SMTP_PORT).await
            }
            Hostname::Ipv6 { raw } => {
                let literal = raw
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .trim_start_matches("IPv6:");
                let ip: IpAddr = literal.parse().map_err(|_| {
                    TransportError::HostToTrustDns(raw.clone(), dummy_proto_error())
                })?;
                self.connect_to_ip(ip, SMTP_PORT).await
            }
            Hostname::AsciiDomain { raw } => self.connect_to_mx(raw).await,
            Hostname::Utf8Domain { punycode, .. } => self.connect_to_mx(punycode).await,
        }
    }

    pub async fn connect_to_mx(&self, host: &str) -> Result<Sender<Cfg>, TransportError> {
        let lookup = self.resolver.mx_lookup(host).await;
        let lookup = match lookup {
            Ok(l) => l,
            Err(e) => {
                if let ResolveErrorKind::NoRecordsFound { .. } = e.kind() {
                    return self
                        .connect_to_host(
                            host.into_name()
                                .map_err(|e| TransportError::HostToTrustDns(host.to_owned(), e))?,
                            SMTP_PORT,
                        )
                        .await;
                } else {
                    return Err(TransportError::DnsMx(host.to_owned(), e));
                }
            }
        };

        let mut mx_records = BTreeMap::new();
        for record in lookup.iter() {
            mx_records.entry(record.preference()).or_insert_with(|| Vec::with_capacity(1)).push(record.exchange());
        }

        if mx_records.is_empty() {
            return self
                .connect_to_host(
                    host.into_name()
                        .map_err(|e| TransportError::HostToTrustDns(host.to_owned(), e))?,
                    SMTP_PORT,
                )
                .await;
        }

        let mut first_error = None;
        for (_, mut mxes) in mx_records {
            mxes.shuffle(&mut rand::thread_rng());
            for mx in mxes {
                match self.connect_to_host(mx.clone(), SMTP_PORT).await {
                    Ok(sender) => return Ok(sender),
                    Err(e) => first_error = first_error.or(Some(e)),
                }
            }
        }

        // Reached only if there were MX records but every connection attempt
        // failed, so `first_error` must be `Some`.
        Err(first_error.unwrap())
    }

    async fn connect_to_host(
        &self,
        name: trust_dns_resolver::Name,
        port: u16,
    ) -> Result<Sender<Cfg>, TransportError> {
        let lookup = self
            .resolver
            .lookup_ip(name.clone())
            .await
            .map_err(|e| TransportError::DnsIp(name, e))?;

        let mut first_error = None;
        for ip in lookup.iter() {
            match self.connect_to_ip(ip, port).await {
                Ok(sender) => return Ok(sender),
                Err(e) => first_error = first_error.or(Some(e)),
            }
        }
        Err(first_error.unwrap())
    }

    pub async fn connect_to_ip(&self, ip: IpAddr, port: u16) -> Result<Sender<Cfg>, TransportError> {
        tracing::trace!(%ip, port, "connecting");
        let io = TcpStream::connect((ip, port))
            .await
            .map_err(|e| TransportError::Connecting(ip, port, e))?;
        let (reader, writer) = io.split();
        self.connect_to_stream(duplexify::Duplex::new(Box::pin(reader), Box::pin(writer))).await
    }

    pub async fn connect_to_stream(&self, io: DynAsyncReadWrite) -> Result<Sender<Cfg>, TransportError> {
        let mut sender = Sender {
            io,
            reply: ReplyReader::new(),
            extensions: Extensions::empty(),
            cfg: self.cfg.clone(),
        };

        let reply = sender.reply.read_reply(&mut sender.io, self.cfg.banner_read_timeout()).await?;
        verify_reply(reply, ExpectedReply::PositiveCompletion)?;

        self.send_ehlo(&mut sender).await?;

        let mut did_tls = false;
        if sender.extensions.contains(Extensions::STARTTLS) && self.cfg.can_do_tls() {
            send_command(&mut sender.io, smtp_message::Command::StartTls, self.cfg.command_write_timeout()).await?;
            let reply =
                sender.reply.read_reply(&mut sender.io, self.cfg.starttls_reply_timeout()).await?;
            if verify_reply(reply, ExpectedReply::PositiveCompletion).is_ok() {
                sender.io = self.cfg.tls_connect(sender.io).await.map_err(TransportError::NegotiatingTls)?;
                sender.reply = ReplyReader::new();
                self.send_ehlo(&mut sender).await?;
                did_tls = true;
            }
        }
        if !did_tls && self.cfg.must_do_tls() {
            return Err(TransportError::CannotDoTls);
        }

        if let Some(creds) = self.cfg.credentials() {
            self.authenticate(&mut sender, creds).await?;
        }

        Ok(sender)
    }

    async fn authenticate(
        &self,
        sender: &mut Sender<Cfg>,
        creds: crate::auth::Credentials,
    ) -> Result<(), TransportError> {
        let offered = match creds.mechanism() {
            "PLAIN" => sender.extensions.contains(Extensions::AUTH_PLAIN),
            "LOGIN" => sender.extensions.contains(Extensions::AUTH_LOGIN),
            _ => false,
        };
        if !offered {
            return Ok(());
        }

        match &creds {
            crate::auth::Credentials::Plain { .. } => {
                let initial = creds.plain_initial_response().unwrap();
                send_command(
                    &mut sender.io,
                    smtp_message::Command::Auth {
                        mechanism: "PLAIN".to_owned(),
                        initial_response: Some(initial),
                    },
                    self.cfg.command_write_timeout(),
                )
                .await?;
                let reply = sender.reply.read_reply(&mut sender.io, self.cfg.auth_reply_timeout()).await?;
                if reply.code.code() != 235 {
                    return Err(TransportError::AuthRejected(reply));
                }
            }
            crate::auth::Credentials::Login { username, password } => {
                send_command(
                    &mut sender.io,
                    smtp_message::Command::Auth {
                        mechanism: "LOGIN".to_owned(),
                        initial_response: None,
                    },
                    self.cfg.command_write_timeout(),
                )
                .await?;
                let reply = sender.reply.read_reply(&mut sender.io, self.cfg.auth_reply_timeout()).await?;
                if reply.code.code() != 334 {
                    return Err(TransportError::AuthRejected(reply));
                }
                send_command(
                    &mut sender.io,
                    smtp_message::Command::AuthContinuation { response: crate::auth::encode_field(username) },
                    self.cfg.command_write_timeout(),
                )
                .await?;
                let reply = sender.reply.read_reply(&mut sender.io, self.cfg.auth_reply_timeout()).await?;
                if reply.code.code() != 334 {
                    return Err(TransportError::AuthRejected(reply));
                }
                send_command(
                    &mut sender.io,
                    smtp_message::Command::AuthContinuation { response: crate::auth::encode_field(password) },
                    self.cfg.command_write_timeout(),
                )
                .await?;
                let reply = sender.reply.read_reply(&mut sender.io, self.cfg.auth_reply_timeout()).await?;
                if reply.code.code() != 235 {
                    return Err(TransportError::AuthRejected(reply));
                }
            }
        }
        Ok(())
    }

    async fn send_ehlo(&self, sender: &mut Sender<Cfg>) -> Result<(), TransportError> {
        send_command(
            &mut sender.io,
            smtp_message::Command::Ehlo { hostname: self.cfg.ehlo_hostname() },
            self.cfg.command_write_timeout(),
        )
        .await?;

        let reply = sender.reply.read_reply(&mut sender.io, self.cfg.ehlo_reply_timeout()).await?;
        sender.extensions = Extensions::empty();
        for line in &reply.lines {
            let upper = line.to_ascii_uppercase();
            if upper == "STARTTLS" {
                sender.extensions.insert(Extensions::STARTTLS);
            } else if upper == "CHUNKING" {
                sender.extensions.insert(Extensions::CHUNKING);
            } else if let Some(mechs) = upper.strip_prefix("AUTH") {
                for mech in mechs.split_whitespace() {
                    match mech {
                        "PLAIN" => sender.extensions.insert(Extensions::AUTH_PLAIN),
                        "LOGIN" => sender.extensions.insert(Extensions::AUTH_LOGIN),
                        _ => {}
                    }
                }
            }
        }
        verify_reply(reply, ExpectedReply::PositiveCompletion)?;

        Ok(())
    }
}

fn dummy_proto_error() -> ProtoError {
    ProtoError::from("address literal did not parse as an IP address")
}
