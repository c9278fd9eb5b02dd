use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::Utc;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// An opaque, process-unique, filename-safe token identifying a message
/// pair. Never mutated once allocated; embedded in both the envelope and
/// content filenames.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct MessageId(String);

impl MessageId {
    /// Allocates a fresh id: monotonic in-process counter combined with
    /// wall-clock milliseconds and the process id, guaranteeing uniqueness
    /// within a process and extreme unlikelihood across restarts.
    pub fn allocate() -> MessageId {
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        let ms = Utc::now().timestamp_millis();
        MessageId(format!("mailrelay.{}.{}.{}", pid, ms, seq))
    }

    /// Re-derives a `MessageId` from a previously allocated token (e.g. when
    /// parsed back out of a filename during a directory scan).
    pub fn from_token(token: impl Into<String>) -> MessageId {
        MessageId(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn content_filename(&self) -> String {
        format!("{}.content", self.0)
    }

    pub fn envelope_filename(&self, state: EnvelopeFileState) -> String {
        format!("{}.envelope{}", self.0, state.suffix())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The lifecycle state encoded in an envelope filename's extension
/// (spec §3: "Message file pair").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnvelopeFileState {
    /// `.envelope.new` — prepared but not yet committed.
    New,
    /// `.envelope` — normal, eligible for forwarding.
    Committed,
    /// `.envelope.busy` — locked by an iterator currently forwarding it.
    Busy,
    /// `.envelope.bad` — quarantined after permanent failure.
    Bad,
}

impl EnvelopeFileState {
    fn suffix(self) -> &'static str {
        match self {
            EnvelopeFileState::New => ".new",
            EnvelopeFileState::Committed => "",
            EnvelopeFileState::Busy => ".busy",
            EnvelopeFileState::Bad => ".bad",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_within_process() {
        let a = MessageId::allocate();
        let b = MessageId::allocate();
        assert_ne!(a, b);
    }

    #[test]
    fn filenames_match_suffix_scheme() {
        let id = MessageId::from_token("mailrelay.1.2.3");
        assert_eq!(id.content_filename(), "mailrelay.1.2.3.content");
        assert_eq!(
            id.envelope_filename(EnvelopeFileState::New),
            "mailrelay.1.2.3.envelope.new"
        );
        assert_eq!(
            id.envelope_filename(EnvelopeFileState::Committed),
            "mailrelay.1.2.3.envelope"
        );
        assert_eq!(
            id.envelope_filename(EnvelopeFileState::Busy),
            "mailrelay.1.2.3.envelope.busy"
        );
        assert_eq!(
            id.envelope_filename(EnvelopeFileState::Bad),
            "mailrelay.1.2.3.envelope.bad"
        );
    }
}
