use async_trait::async_trait;
use mailstore::{MessageId, MessageStore};

use crate::{filter::Filter, result::FilterOutcome};

/// Copies the message's two files into one or more sibling spool
/// directories, leaving the original untouched (spec §4.3 "CopyFilter");
/// used to fan a message out to multiple independent spools, e.g. separate
/// POP3-visible accounts sharing one piece of content.
pub struct CopyFilter {
    store: MessageStore,
    targets: Vec<std::path::PathBuf>,
}

impl CopyFilter {
    pub fn new(store: MessageStore, targets: Vec<std::path::PathBuf>) -> CopyFilter {
        CopyFilter { store, targets }
    }
}

#[async_trait]
impl Filter for CopyFilter {
    async fn run(&self, id: &MessageId) -> FilterOutcome {
        let content = self.store.spool_dir().join(id.content_filename());
        let envelope = self
            .store
            .spool_dir()
            .join(id.envelope_filename(mailstore::EnvelopeFileState::Busy));
        for target in &self.targets {
            let target = target.clone();
            let content = content.clone();
            let envelope = envelope.clone();
            let id_str = id.as_str().to_owned();
            let result = smol::unblock(move || -> std::io::Result<()> {
                std::fs::create_dir_all(&target)?;
                std::fs::copy(&content, target.join(format!("{}.content", id_str)))?;
                std::fs::copy(&envelope, target.join(format!("{}.envelope", id_str)))?;
                Ok(())
            })
            .await;
            if let Err(e) = result {
                return FilterOutcome::fail(
                    "copy failed",
                    format!("could not copy message to {}: {}", target.display(), e),
                    450,
                );
            }
        }
        FilterOutcome::ok()
    }

    fn name(&self) -> &str {
        "copy"
    }
}

/// Rewrites the envelope's `forward_to`/`forward_to_address` (spec §4.3,
/// "Routing filter" in §9's glossary) so downstream delivery targets a
/// specific mailbox rather than the default route. This is the
/// general-purpose "DeliveryFilter": it edits routing metadata in place and
/// never touches content.
pub struct DeliveryFilter {
    store: MessageStore,
    forward_to: String,
    forward_to_address: String,
}

impl DeliveryFilter {
    pub fn new(store: MessageStore, forward_to: impl Into<String>, forward_to_address: impl Into<String>) -> DeliveryFilter {
        DeliveryFilter {
            store,
            forward_to: forward_to.into(),
            forward_to_address: forward_to_address.into(),
        }
    }
}

#[async_trait]
impl Filter for DeliveryFilter {
    async fn run(&self, id: &MessageId) -> FilterOutcome {
        let mut msg = match self.store.get(id) {
            Ok(m) => m,
            Err(e) => return FilterOutcome::fail("store error", e.to_string(), 450),
        };
        msg.envelope_mut().forward_to = self.forward_to.clone();
        msg.envelope_mut().forward_to_address = self.forward_to_address.clone();
        if let Err(e) = msg.save().await {
            return FilterOutcome::fail("store error", e.to_string(), 450);
        }
        FilterOutcome::ok()
    }

    fn name(&self) -> &str {
        "delivery"
    }
}

/// Splits a multi-recipient message into one sibling message per distinct
/// recipient domain, so each can be routed/forwarded independently (spec
/// §4.3 "SplitFilter"). The original message is abandoned once split;
/// `special` is not set (splitting is a one-time terminal action on this
/// message, not a request to rescan).
pub struct SplitFilter {
    store: MessageStore,
}

impl SplitFilter {
    pub fn new(store: MessageStore) -> SplitFilter {
        SplitFilter { store }
    }

    fn domain_of(addr: &str) -> &str {
        addr.rsplit_once('@').map(|(_, d)| d).unwrap_or(addr)
    }
}

#[async_trait]
impl Filter for SplitFilter {
    async fn run(&self, id: &MessageId) -> FilterOutcome {
        let msg = match self.store.get(id) {
            Ok(m) => m,
            Err(e) => return FilterOutcome::fail("store error", e.to_string(), 450),
        };
        let env = msg.envelope();
        let total_recipients = env.to_local.len() + env.to_remote.len();
        if total_recipients <= 1 {
            return FilterOutcome::ok();
        }

        let mut by_domain: std::collections::BTreeMap<String, (Vec<String>, Vec<String>)> =
            std::collections::BTreeMap::new();
        for addr in &env.to_local {
            by_domain.entry(Self::domain_of(addr).to_owned()).or_default().0.push(addr.clone());
        }
        for addr in &env.to_remote {
            by_domain.entry(Self::domain_of(addr).to_owned()).or_default().1.push(addr.clone());
        }
        if by_domain.len() <= 1 {
            return FilterOutcome::ok();
        }

        let content_path = self.store.spool_dir().join(id.content_filename());
        for (local, remote) in by_domain.values() {
            let mut new_msg = match self.store.new_message() {
                Ok(m) => m,
                Err(e) => return FilterOutcome::fail("store error", e.to_string(), 450),
            };
            new_msg.set_from(env.from.clone());
            for addr in local {
                new_msg.add_recipient_local(addr.clone());
            }
            for addr in remote {
                new_msg.add_recipient_remote(addr.clone());
            }
            new_msg.set_client_socket_address(env.client_socket_address.clone());
            new_msg.set_authentication_id(env.authentication_id.clone());
            new_msg.set_body_type(env.body_type);
            new_msg.set_utf8_mailboxes(env.utf8_mailboxes);

            let bytes = match smol::unblock({
                let p = content_path.clone();
                move || std::fs::read(&p)
            })
            .await
            {
                Ok(b) => b,
                Err(e) => return FilterOutcome::fail("store error", e.to_string(), 450),
            };
            if let Err(e) = new_msg.add_content(&bytes).await {
                return FilterOutcome::fail("store error", e.to_string(), 450);
            }
            if let Err(e) = new_msg.commit().await {
                return FilterOutcome::fail("store error", e.to_string(), 450);
            }
        }

        FilterOutcome::abandon("message split into per-domain siblings")
    }

    fn name(&self) -> &str {
        "split"
    }
}

/// Adds a `Message-ID:` header to the content if one is not already present
/// (spec §4.3 "MessageIdFilter"). The header is derived from the message's
/// own id, matching the deterministic naming the rest of the store already
/// relies on.
pub struct MessageIdFilter {
    store: MessageStore,
}

impl MessageIdFilter {
    pub fn new(store: MessageStore) -> MessageIdFilter {
        MessageIdFilter { store }
    }
}

#[async_trait]
impl Filter for MessageIdFilter {
    async fn run(&self, id: &MessageId) -> FilterOutcome {
        let content_path = self.store.spool_dir().join(id.content_filename());
        let path = content_path.clone();
        let content = match smol::unblock(move || std::fs::read(&path)).await {
            Ok(c) => c,
            Err(e) => return FilterOutcome::fail("store error", e.to_string(), 450),
        };

        let header_block_end = find_header_block_end(&content);
        let header_block = String::from_utf8_lossy(&content[..header_block_end]);
        if header_block.lines().any(|l| l.to_ascii_lowercase().starts_with("message-id:")) {
            return FilterOutcome::ok();
        }

        let mut new_content = Vec::with_capacity(content.len() + 64);
        new_content.extend_from_slice(format!("Message-ID: <{}@mailrelay>\r\n", id.as_str()).as_bytes());
        new_content.extend_from_slice(&content);

        let path = content_path.clone();
        if let Err(e) = smol::unblock(move || std::fs::write(&path, &new_content)).await {
            return FilterOutcome::fail("store error", e.to_string(), 450);
        }
        FilterOutcome::ok()
    }

    fn name(&self) -> &str {
        "messageid"
    }
}

/// Finds the end of the RFC 5322 header block: the first blank line
/// (`CRLF CRLF` or `LF LF`).
fn find_header_block_end(content: &[u8]) -> usize {
    if let Some(p) = content.windows(4).position(|w| w == b"\r\n\r\n") {
        p + 4
    } else if let Some(p) = content.windows(2).position(|w| w == b"\n\n") {
        p + 2
    } else {
        content.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_domain_of_extracts_suffix() {
        assert_eq!(SplitFilter::domain_of("a@x.com"), "x.com");
        assert_eq!(SplitFilter::domain_of("postmaster"), "postmaster");
    }

    #[test]
    fn finds_header_block_end_with_crlf() {
        assert_eq!(find_header_block_end(b"To: a\r\n\r\nbody"), 9);
    }

    #[test]
    fn finds_header_block_end_with_bare_lf() {
        assert_eq!(find_header_block_end(b"To: a\n\nbody"), 7);
    }
}
