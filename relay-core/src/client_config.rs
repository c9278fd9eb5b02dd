use std::{io, pin::Pin};

use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use smtp_client::{Credentials, DynAsyncReadWrite};

/// The forwarding side's [`smtp_client::Config`]: hostname to present on
/// `EHLO`, whether/how to negotiate STARTTLS, and optional `AUTH`
/// credentials (spec §4.4). Ported from the teacher's `kannader::
/// ClientConfig`, generalized from a hardcoded `"nodomainyet"` TLS server
/// name to the actual downstream hostname the forwarder is currently
/// talking to.
pub struct RelayClientConfig {
    ehlo_hostname: String,
    connector: async_tls::TlsConnector,
    tls_server_name: String,
    require_tls: bool,
    credentials: Option<Credentials>,
}

impl RelayClientConfig {
    pub fn new(
        ehlo_hostname: impl Into<String>,
        connector: async_tls::TlsConnector,
        tls_server_name: impl Into<String>,
        require_tls: bool,
        credentials: Option<Credentials>,
    ) -> RelayClientConfig {
        RelayClientConfig {
            ehlo_hostname: ehlo_hostname.into(),
            connector,
            tls_server_name: tls_server_name.into(),
            require_tls,
            credentials,
        }
    }
}

#[async_trait]
impl smtp_client::Config for RelayClientConfig {
    fn ehlo_hostname(&self) -> String {
        self.ehlo_hostname.clone()
    }

    fn must_do_tls(&self) -> bool {
        self.require_tls
    }

    fn credentials(&self) -> Option<Credentials> {
        self.credentials.clone()
    }

    async fn tls_connect<IO>(&self, io: IO) -> io::Result<DynAsyncReadWrite>
    where
        IO: 'static + Unpin + Send + AsyncRead + AsyncWrite,
    {
        let io = self.connector.connect(&self.tls_server_name, io).await?;
        let (r, w) = io.split();
        Ok(duplexify::Duplex::new(
            Box::pin(r) as Pin<Box<dyn Send + AsyncRead>>,
            Box::pin(w) as Pin<Box<dyn Send + AsyncWrite>>,
        ))
    }
}
