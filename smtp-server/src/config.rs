use std::{io, pin::Pin};

use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncWrite};
use mailfilter::FilterChain;
use mailstore::MessageStore;

use crate::auth::AuthBackend;
use addressverifier::AddressVerifier;

/// A TLS-wrapped stream, type-erased the way [`duplexify::Duplex`] lets a
/// split read/write pair stand in for a single full-duplex connection —
/// the same shape the teacher's `Config::tls_accept` hands back, just
/// without the generic `IO` parameter so [`ServerConfig`] stays object-safe
/// (spec §1: "the TLS library's internals are out of scope; the interface
/// that plugs it in is").
pub type BoxedDuplex = duplexify::Duplex<
    Pin<Box<dyn AsyncRead + Send>>,
    Pin<Box<dyn AsyncWrite + Send>>,
>;

/// Everything one running SMTP listener needs: the spool to write into, the
/// filter chain to run before committing, the verifier to classify
/// recipients, optional SASL backend, and the handful of capability/limit
/// knobs a connection negotiates via EHLO (spec §4.2).
#[async_trait]
pub trait ServerConfig: Send + Sync {
    fn hostname(&self) -> &str;

    fn banner(&self) -> String {
        format!("{} ESMTP ready", self.hostname())
    }

    /// `None` means unbounded.
    fn max_message_size(&self) -> Option<u64> {
        None
    }

    fn max_line_size(&self) -> usize {
        16 * 1024
    }

    fn max_recipients(&self) -> usize {
        1000
    }

    fn enable_chunking(&self) -> bool {
        true
    }

    fn enable_smtputf8(&self) -> bool {
        true
    }

    fn enable_pipelining(&self) -> bool {
        true
    }

    /// Advertised `AUTH` mechanism list, e.g. `["PLAIN", "LOGIN"]`. Empty
    /// means AUTH isn't offered at all.
    fn auth_mechanisms(&self) -> Vec<&str> {
        Vec::new()
    }

    fn require_angle_brackets(&self) -> bool {
        false
    }

    fn store(&self) -> &MessageStore;

    fn verifier(&self) -> &dyn AddressVerifier;

    fn filter_chain(&self) -> &FilterChain;

    fn auth_backend(&self) -> Option<&dyn AuthBackend> {
        None
    }

    /// Whether STARTTLS should be advertised on this connection (false once
    /// already encrypted, or if no TLS material is configured).
    fn can_do_tls(&self, is_encrypted: bool) -> bool {
        let _ = is_encrypted;
        false
    }

    /// Performs the TLS handshake on an already-accepted plaintext stream.
    /// The default errs out; a concrete config plugs in its TLS stack here
    /// (rustls/async-tls in `relay-core`, same seam as the teacher's
    /// `tls_accept`).
    async fn tls_accept(&self, _io: BoxedDuplex) -> io::Result<BoxedDuplex> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "STARTTLS not configured"))
    }
}
