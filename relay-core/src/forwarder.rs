use std::{sync::Arc, time::Duration};

use mailfilter::FilterChain;
use mailstore::{MessageStore, StoredMessage};
use smtp_client::{Client, MailParams, Outcome};
use smtp_message::{Email, Hostname};
use trust_dns_resolver::{proto::DnsHandle, AsyncResolver, ConnectionProvider};

use crate::{client_config::RelayClientConfig, mailbox::DeliveryToMailbox};

/// Drains a [`MessageStore`] by forwarding every committed, unlocked message
/// to a single fixed downstream peer (spec §4.4 "Forwarding"). Generalizes
/// the teacher's `kannader::run` queue-draining loop — which forwarded via
/// `smtp-queue`'s per-destination retry scheduler — into a single-hop relay
/// that wakes on the store's update signal and otherwise polls on a fixed
/// interval, instead of maintaining its own persistent retry queue (spec §9
/// Open Question; no queue crate family is carried over, see DESIGN.md).
pub struct Forwarder<C, P>
where
    C: DnsHandle<Error = trust_dns_resolver::error::ResolveError>,
    P: ConnectionProvider<Conn = C>,
{
    store: MessageStore,
    client: Client<C, P, RelayClientConfig>,
    host: Hostname,
    poll_interval: Duration,
    mailbox: Option<DeliveryToMailbox>,
    filter_chain: FilterChain,
}

impl<C, P> Forwarder<C, P>
where
    C: DnsHandle<Error = trust_dns_resolver::error::ResolveError>,
    P: ConnectionProvider<Conn = C>,
{
    pub fn new(
        store: MessageStore,
        resolver: AsyncResolver<C, P>,
        cfg: Arc<RelayClientConfig>,
        host: &str,
        poll_interval: Duration,
        mailbox: Option<DeliveryToMailbox>,
        filter_chain: FilterChain,
    ) -> anyhow::Result<Forwarder<C, P>> {
        let host = parse_hostname(host)?;
        Ok(Forwarder {
            store,
            client: Client::new(resolver, cfg),
            host,
            poll_interval,
            mailbox,
            filter_chain,
        })
    }

    /// Runs forever, waking up whenever the store reports activity and
    /// otherwise at least every `poll_interval`, draining whatever is ready
    /// for forwarding each time.
    pub async fn run(&self) -> ! {
        loop {
            if let Err(e) = self.drain_once().await {
                tracing::warn!(error = %e, "forwarding pass failed");
            }
            futures::future::or(self.store.updated(), async {
                smol::Timer::after(self.poll_interval).await;
            })
            .await;
        }
    }

    /// Forwards every message currently sitting unlocked in the store, once.
    /// Exposed separately from [`Self::run`] so tests can drive a single
    /// pass without racing a background loop.
    pub async fn drain_once(&self) -> anyhow::Result<()> {
        let mut it = self.store.iterator()?;
        while let Some(stored) = it.next().await? {
            let id = stored.id().clone();
            if let Err(e) = self.forward_one(stored).await {
                tracing::warn!(id = %id.as_str(), error = %e, "forwarding this message failed");
            }
        }
        Ok(())
    }

    async fn forward_one(&self, mut stored: StoredMessage) -> anyhow::Result<()> {
        if !stored.envelope().to_local.is_empty() {
            if let Some(mailbox) = &self.mailbox {
                mailbox.deliver(&stored).await?;
                let delivered = stored.envelope().to_local.clone();
                stored.remove_recipients(&delivered).await?;
            }
        }
        if stored.envelope().to_remote.is_empty() {
            if stored.has_remaining_recipients() {
                stored.unlock().await?;
            } else {
                stored.destroy().await?;
            }
            return Ok(());
        }

        let outcome = self.filter_chain.run(stored.id()).await;
        match outcome.result {
            mailfilter::FilterResult::Ok => {}
            mailfilter::FilterResult::Abandon => {
                stored.destroy().await?;
                return Ok(());
            }
            mailfilter::FilterResult::Fail => {
                let code = outcome.response_code.map(u32::from);
                stored.fail(&outcome.reason, code).await?;
                return Ok(());
            }
        }

        let destination = self.client.get_destination(&self.host).await?;
        let mut sender = match self.client.connect(&destination).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "could not connect to forwarding destination");
                stored.unlock().await?;
                return Ok(());
            }
        };

        let envelope = stored.envelope().clone();
        let from = if envelope.from.is_empty() { None } else { Some(parse_email(&envelope.from)?) };
        let to: Vec<Email> =
            envelope.to_remote.iter().map(|raw| parse_email(raw)).collect::<Result<_, _>>()?;

        let content = stored.open_content().await?;
        let params = MailParams {
            body: Some(envelope.body_type),
            smtputf8: envelope.utf8_mailboxes,
            auth: None,
        };

        let outcomes = match sender.send(from.as_ref(), &to, params, content).await {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!(error = %e, "transport failure while forwarding, will retry");
                stored.unlock().await?;
                return Ok(());
            }
        };

        let mut delivered = Vec::new();
        let mut rejected = Vec::new();
        let mut any_transient = false;
        let mut last_rejection: Option<smtp_message::Reply> = None;
        for outcome in outcomes {
            match outcome.outcome {
                Outcome::Accepted => delivered.push(outcome.recipient.to_string_lossy().into_owned()),
                Outcome::PermanentlyRejected(reply) => {
                    rejected.push(outcome.recipient.to_string_lossy().into_owned());
                    last_rejection = Some(reply);
                }
                Outcome::TransientlyRejected(_) => any_transient = true,
            }
        }

        // Only the accepted recipients are dropped here: a retry must still
        // see the rejected ones (spec §4.4 step 4, scenario S6).
        if !delivered.is_empty() {
            stored.remove_recipients(&delivered).await?;
        }

        if any_transient || (!rejected.is_empty() && !delivered.is_empty()) {
            // Some recipients still need a retry (transient failure, or a
            // mix of accepted and permanently-rejected ones) — keep the
            // message around, unlocked, with only the unresolved
            // recipients left in its envelope.
            stored.unlock().await?;
        } else if !rejected.is_empty() {
            // Every remaining remote recipient was permanently rejected and
            // none are pending retry: quarantine the whole message rather
            // than silently destroying it (spec §4.4, testable property 8).
            let reply = last_rejection.expect("rejected is non-empty");
            let reason = reply.lines.join(" ");
            stored.fail(&reason, Some(reply.code.code() as u32)).await?;
        } else if stored.has_remaining_recipients() {
            stored.unlock().await?;
        } else {
            stored.destroy().await?;
        }

        Ok(())
    }
}

fn parse_hostname(host: &str) -> anyhow::Result<Hostname> {
    Hostname::parse_until(host.as_bytes(), b"")
        .map(|(h, _)| h)
        .ok_or_else(|| anyhow::anyhow!("invalid forwarding hostname '{}'", host))
}

fn parse_email(raw: &str) -> anyhow::Result<Email> {
    Email::parse_until(raw.as_bytes(), b"")
        .map(|(e, _)| e)
        .ok_or_else(|| anyhow::anyhow!("stored recipient '{}' is not a valid address", raw))
}

#[cfg(test)]
mod tests {
    use mailfilter::FilterChain;
    use tempfile::tempdir;

    use crate::config::MailboxConfig;

    use super::*;

    #[test]
    fn local_only_message_is_delivered_and_destroyed_without_any_network_use() {
        smol::block_on(async {
            let spool = tempdir().unwrap();
            let mailbox_dir = tempdir().unwrap();
            let store = MessageStore::open(spool.path(), None).unwrap();

            let mut msg = store.new_message().unwrap();
            msg.set_from("a@x");
            msg.add_recipient_local("jdoe@local");
            msg.add_content(b"Subject: hi\r\n\r\nbody\r\n").await.unwrap();
            let id = msg.commit().await.unwrap();

            let mailbox = DeliveryToMailbox::new(
                store.clone(),
                &MailboxConfig { base_dir: mailbox_dir.path().to_path_buf(), maildir: false },
            );

            let resolver = async_std_resolver::resolver_from_system_conf().await.unwrap();
            let connector = crate::tls::build_client_connector();
            let cfg = Arc::new(RelayClientConfig::new(
                "relay.test",
                connector,
                "downstream.test",
                false,
                None,
            ));
            let forwarder = Forwarder::new(
                store.clone(),
                resolver,
                cfg,
                "downstream.test",
                Duration::from_secs(60),
                Some(mailbox),
                FilterChain::empty(),
            )
            .unwrap();
            forwarder.drain_once().await.unwrap();

            assert!(store.get(&id).is_err());
            let delivered = std::fs::read_dir(mailbox_dir.path().join("jdoe")).unwrap().count();
            assert_eq!(delivered, 1);
        });
    }
}
