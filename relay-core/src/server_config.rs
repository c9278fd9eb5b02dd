use std::{io, pin::Pin};

use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use mailfilter::FilterChain;
use mailstore::MessageStore;

use addressverifier::AddressVerifier;
use smtp_server::{AuthBackend, BoxedDuplex, ServerConfig};

/// Everything one listening unit needs to drive [`smtp_server::interact`]
/// (spec §4.2, §9 "Supervisor"): the spool it writes into, the filter chain
/// it runs before committing, the verifier it asks about each recipient,
/// and the handful of capability knobs EHLO advertises.
pub struct RelayServerConfig {
    pub hostname: String,
    pub store: MessageStore,
    pub verifier: Box<dyn AddressVerifier>,
    pub filter_chain: FilterChain,
    pub max_message_size: Option<u64>,
    pub max_line_size: usize,
    pub auth_mechanisms: Vec<String>,
    pub auth_backend: Option<Box<dyn AuthBackend>>,
    pub tls_acceptor: Option<async_tls::TlsAcceptor>,
}

#[async_trait]
impl ServerConfig for RelayServerConfig {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn max_message_size(&self) -> Option<u64> {
        self.max_message_size
    }

    fn max_line_size(&self) -> usize {
        self.max_line_size
    }

    fn auth_mechanisms(&self) -> Vec<&str> {
        self.auth_mechanisms.iter().map(String::as_str).collect()
    }

    fn store(&self) -> &MessageStore {
        &self.store
    }

    fn verifier(&self) -> &dyn AddressVerifier {
        self.verifier.as_ref()
    }

    fn filter_chain(&self) -> &FilterChain {
        &self.filter_chain
    }

    fn auth_backend(&self) -> Option<&dyn AuthBackend> {
        self.auth_backend.as_deref()
    }

    fn can_do_tls(&self, is_encrypted: bool) -> bool {
        !is_encrypted && self.tls_acceptor.is_some()
    }

    async fn tls_accept(&self, io: BoxedDuplex) -> io::Result<BoxedDuplex> {
        let acceptor = self
            .tls_acceptor
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "STARTTLS not configured"))?;
        let io = acceptor.accept(io).await?;
        let (r, w) = io.split();
        Ok(duplexify::Duplex::new(
            Box::pin(r) as Pin<Box<dyn AsyncRead + Send>>,
            Box::pin(w) as Pin<Box<dyn AsyncWrite + Send>>,
        ))
    }
}
