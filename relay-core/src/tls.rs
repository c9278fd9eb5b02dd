use std::{io, path::Path, sync::Arc};

use anyhow::Context;

use crate::config::TlsConfig;

/// A `rustls::ServerCertVerifier` that accepts anything, used on the
/// forwarding (client) side when a downstream peer presents a certificate
/// this relay has no CA material to validate — ported verbatim from the
/// teacher's `kannader::NoCertVerifier`, which exists for exactly this
/// "local testing / self-signed downstream" case.
pub struct NoCertVerifier;

impl rustls::ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _roots: &rustls::RootCertStore,
        _presented_certs: &[rustls::Certificate],
        _dns_name: webpki::DNSNameRef<'_>,
        _ocsp_response: &[u8],
    ) -> Result<rustls::ServerCertVerified, rustls::TLSError> {
        Ok(rustls::ServerCertVerified::assertion())
    }
}

/// Builds the listening side's TLS acceptor from a PEM certificate/key pair
/// (spec §4.2: STARTTLS), following the teacher's `rustls_pemfile`-based
/// loading in `kannader::run`.
pub fn load_server_acceptor(tls: &TlsConfig) -> anyhow::Result<Option<async_tls::TlsAcceptor>> {
    let (cert_file, key_file) = match (&tls.cert_file, &tls.key_file) {
        (Some(c), Some(k)) => (c, k),
        _ => return Ok(None),
    };

    let certs = load_certs(cert_file)?;
    let key = load_private_key(key_file)?;

    let mut server_cfg = rustls::ServerConfig::new(rustls::NoClientAuth::new());
    server_cfg
        .set_single_cert(certs, key)
        .context("setting the TLS certificate and key")?;

    Ok(Some(async_tls::TlsAcceptor::from(Arc::new(server_cfg))))
}

/// Builds the forwarding side's TLS connector. Unlike the listening side,
/// there is no local key material to load; the connector's only job is to
/// negotiate TLS with whatever the downstream peer offers (spec §4.4:
/// "optional STARTTLS"), hence [`NoCertVerifier`] rather than a populated
/// root store — validating a downstream MX's certificate chain against a
/// system trust store is future work, noted in DESIGN.md.
pub fn build_client_connector() -> async_tls::TlsConnector {
    let mut client_cfg = rustls::ClientConfig::new();
    client_cfg
        .dangerous()
        .set_certificate_verifier(Arc::new(NoCertVerifier));
    async_tls::TlsConnector::from(Arc::new(client_cfg))
}

fn load_certs(path: &Path) -> anyhow::Result<Vec<rustls::Certificate>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening the certificate file '{}'", path.display()))?;
    let certs = rustls_pemfile::certs(&mut io::BufReader::new(file))
        .with_context(|| format!("parsing the TLS certificate file '{}'", path.display()))?
        .into_iter()
        .map(rustls::Certificate)
        .collect();
    Ok(certs)
}

fn load_private_key(path: &Path) -> anyhow::Result<rustls::PrivateKey> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening the key file '{}'", path.display()))?;
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut io::BufReader::new(file))
        .with_context(|| format!("parsing the TLS key file '{}'", path.display()))?;
    anyhow::ensure!(keys.len() == 1, "key file {} did not contain exactly one key", path.display());
    Ok(rustls::PrivateKey(keys.remove(0)))
}
