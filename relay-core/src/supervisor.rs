use std::sync::Arc;

use futures::StreamExt;
use smtp_server::ServerConfig;

/// Accepts connections forever, handing each one off to
/// [`smtp_server::interact`] on its own task (spec §9 "Supervisor"). Ported
/// from the teacher's `kannader::run` accept loop (`while let Some(stream) =
/// incoming.next().await { ex.spawn(...).detach() }`), generalized to take
/// the listener and executor as parameters instead of constructing them
/// inline.
pub async fn accept_loop(
    ex: Arc<smol::Executor<'static>>,
    listener: smol::net::TcpListener,
    server_cfg: Arc<dyn ServerConfig>,
) -> anyhow::Result<()> {
    let mut incoming = listener.incoming();
    tracing::info!("listening for incoming SMTP connections");
    while let Some(stream) = incoming.next().await {
        let stream = stream?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned());
        tracing::trace!(client = %peer, "accepted connection");
        let cfg = server_cfg.clone();
        ex.spawn(async move {
            if let Err(e) = smtp_server::interact(stream, peer.clone(), false, cfg).await {
                tracing::warn!(client = %peer, error = %e, "session ended with an error");
            }
        })
        .detach();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mailfilter::FilterChain;
    use mailstore::MessageStore;

    use crate::server_config::RelayServerConfig;

    use super::*;

    #[test]
    fn accept_loop_serves_one_connection_then_shuts_down() {
        smol::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let store = MessageStore::open(dir.path(), None).unwrap();
            let server_cfg: Arc<dyn ServerConfig> = Arc::new(RelayServerConfig {
                hostname: "relay.test".to_owned(),
                store,
                verifier: Box::new(addressverifier::InternalVerifier),
                filter_chain: FilterChain::empty(),
                max_message_size: None,
                max_line_size: 16 * 1024,
                auth_mechanisms: Vec::new(),
                auth_backend: None,
                tls_acceptor: None,
            });

            let listener = smol::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let ex = Arc::new(smol::Executor::new());

            let accept = ex.spawn(accept_loop(ex.clone(), listener, server_cfg));

            let client_task = ex.spawn(async move {
                let mut stream = smol::net::TcpStream::connect(addr).await.unwrap();
                let mut buf = [0u8; 256];
                use futures::{AsyncReadExt, AsyncWriteExt};
                let n = stream.read(&mut buf).await.unwrap();
                assert!(String::from_utf8_lossy(&buf[..n]).starts_with("220"));
                stream.write_all(b"QUIT\r\n").await.unwrap();
            });

            ex.run(async {
                futures::future::or(
                    async {
                        client_task.await;
                    },
                    async {
                        smol::Timer::after(Duration::from_secs(5)).await;
                    },
                )
                .await;
            })
            .await;

            accept.cancel().await;
        });
    }
}
