use std::sync::Arc;

use chrono::Utc;

use crate::{
    envelope::Envelope,
    error::StorageError,
    id::{EnvelopeFileState, MessageId},
    store::Inner,
};

/// A handle onto a message already committed to the spool, obtained from
/// [`crate::MessageStore::iterator`] or [`crate::MessageStore::get`].
///
/// Holding a `StoredMessage` does not itself lock the message; call
/// [`Self::lock`] before attempting delivery, per the rename-based mutual
/// exclusion scheme described in spec §4 (invariant 2).
pub struct StoredMessage {
    pub(crate) inner: Arc<Inner>,
    pub(crate) id: MessageId,
    pub(crate) envelope: Envelope,
    pub(crate) locked: bool,
}

impl StoredMessage {
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Mutable access for filters that rewrite routing metadata (e.g.
    /// `forward_to`) in place; call [`Self::save`] afterwards to persist.
    pub fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    /// Persists the current in-memory envelope over whichever file backs
    /// this handle right now (`.envelope` if unlocked, `.envelope.busy` if
    /// locked), without changing lock state. Used by filters that edit
    /// routing metadata rather than the lifecycle itself.
    pub async fn save(&self) -> Result<(), StorageError> {
        let path = if self.locked {
            self.envelope_path(EnvelopeFileState::Busy)
        } else {
            self.envelope_path(EnvelopeFileState::Committed)
        };
        let bytes = self.envelope.to_bytes();
        smol::unblock(move || std::fs::write(&path, &bytes)).await?;
        Ok(())
    }

    fn content_path(&self) -> std::path::PathBuf {
        self.inner.dir.join(self.id.content_filename())
    }

    /// Opens the content file for streaming read, used by the forwarder to
    /// feed a [`smtp_message::EscapingDataWriter`] without buffering the
    /// whole message in memory.
    pub async fn open_content(&self) -> Result<smol::fs::File, StorageError> {
        Ok(smol::fs::File::open(self.content_path()).await?)
    }

    fn envelope_path(&self, state: EnvelopeFileState) -> std::path::PathBuf {
        self.inner.dir.join(self.id.envelope_filename(state))
    }

    /// Renames `<id>.envelope` to `<id>.envelope.busy`, racing any other
    /// process iterating the same spool: only one rename can succeed, so
    /// exactly one caller observes `Ok` (spec §4, invariant 2).
    pub async fn lock(&mut self) -> Result<(), StorageError> {
        if self.locked {
            return Ok(());
        }
        let from = self.envelope_path(EnvelopeFileState::Committed);
        let to = self.envelope_path(EnvelopeFileState::Busy);
        let id = self.id.clone();
        smol::unblock(move || std::fs::rename(&from, &to))
            .await
            .map_err(|_| StorageError::Locked(id.to_string()))?;
        self.locked = true;
        Ok(())
    }

    /// Releases the lock without changing the message's fate: renames
    /// `.busy` back to the plain committed name so it is retried later.
    pub async fn unlock(&mut self) -> Result<(), StorageError> {
        if !self.locked {
            return Ok(());
        }
        let from = self.envelope_path(EnvelopeFileState::Busy);
        let to = self.envelope_path(EnvelopeFileState::Committed);
        smol::unblock(move || std::fs::rename(&from, &to)).await?;
        self.locked = false;
        self.inner.update_signal.notify(usize::MAX);
        Ok(())
    }

    /// Successful delivery: removes both files entirely (spec §4, invariant
    /// 3). Requires the message to be locked first.
    pub async fn destroy(self) -> Result<(), StorageError> {
        let content = self.content_path();
        let envelope = if self.locked {
            self.envelope_path(EnvelopeFileState::Busy)
        } else {
            self.envelope_path(EnvelopeFileState::Committed)
        };
        smol::unblock(move || -> std::io::Result<()> {
            std::fs::remove_file(&content)?;
            std::fs::remove_file(&envelope)?;
            Ok(())
        })
        .await?;
        self.inner.update_signal.notify(usize::MAX);
        Ok(())
    }

    /// Permanent failure: appends `Reason`/`ReasonCode` trailing headers and
    /// renames the envelope to `.bad`, out of the forwarding rotation for
    /// good (spec §4, invariant 3 and §6 "trailing headers").
    pub async fn fail(mut self, reason: &str, reason_code: Option<u32>) -> Result<(), StorageError> {
        let mut trailer = format!("Reason: {}\r\n", reason.replace(['\r', '\n'], " "));
        if let Some(code) = reason_code {
            trailer.push_str(&format!("ReasonCode: {}\r\n", code));
        }
        trailer.push_str(&format!("X-MailRelay-FailedAt: {}\r\n", Utc::now().to_rfc3339()));
        self.envelope.trailing.push_str(&trailer);

        let from = if self.locked {
            self.envelope_path(EnvelopeFileState::Busy)
        } else {
            self.envelope_path(EnvelopeFileState::Committed)
        };
        let to = self.envelope_path(EnvelopeFileState::Bad);
        let bytes = self.envelope.to_bytes();
        smol::unblock(move || -> std::io::Result<()> {
            std::fs::write(&from, &bytes)?;
            std::fs::rename(&from, &to)?;
            Ok(())
        })
        .await?;
        self.inner.update_signal.notify(usize::MAX);
        Ok(())
    }

    /// Removes delivered recipients from the envelope's address lists and
    /// rewrites the envelope in place, preserving `trailing` verbatim (spec
    /// §4, invariant 6: "partial-recipient retry"). The message must be
    /// locked.
    pub async fn remove_recipients(&mut self, delivered: &[String]) -> Result<(), StorageError> {
        self.envelope.to_local.retain(|a| !delivered.contains(a));
        self.envelope.to_remote.retain(|a| !delivered.contains(a));
        let path = if self.locked {
            self.envelope_path(EnvelopeFileState::Busy)
        } else {
            self.envelope_path(EnvelopeFileState::Committed)
        };
        let bytes = self.envelope.to_bytes();
        smol::unblock(move || std::fs::write(&path, &bytes)).await?;
        Ok(())
    }

    /// True once every recipient has been removed via
    /// [`Self::remove_recipients`] — the caller should then [`Self::destroy`]
    /// rather than retry.
    pub fn has_remaining_recipients(&self) -> bool {
        !self.envelope.to_local.is_empty() || !self.envelope.to_remote.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::store::MessageStore;

    #[test]
    fn lock_then_destroy_removes_both_files() {
        smol::block_on(async {
            let dir = tempdir().unwrap();
            let store = MessageStore::open(dir.path(), None).unwrap();
            let mut new_msg = store.new_message().unwrap();
            new_msg.set_from("a@x");
            new_msg.add_recipient_remote("b@y");
            let id = new_msg.commit().await.unwrap();

            let mut stored = store.get(&id).unwrap();
            stored.lock().await.unwrap();
            stored.destroy().await.unwrap();

            assert!(!dir.path().join(id.content_filename()).exists());
        });
    }

    #[test]
    fn fail_renames_to_bad_with_reason_trailer() {
        smol::block_on(async {
            let dir = tempdir().unwrap();
            let store = MessageStore::open(dir.path(), None).unwrap();
            let mut new_msg = store.new_message().unwrap();
            new_msg.set_from("a@x");
            new_msg.add_recipient_remote("b@y");
            let id = new_msg.commit().await.unwrap();

            let mut stored = store.get(&id).unwrap();
            stored.lock().await.unwrap();
            stored.fail("no route to host", Some(550)).await.unwrap();

            let bad_path = dir
                .path()
                .join(format!("{}.envelope.bad", id.as_str()));
            let text = std::fs::read_to_string(&bad_path).unwrap();
            assert!(text.contains("Reason: no route to host"));
            assert!(text.contains("ReasonCode: 550"));
        });
    }

    #[test]
    fn remove_recipients_leaves_trailing_untouched() {
        smol::block_on(async {
            let dir = tempdir().unwrap();
            let store = MessageStore::open(dir.path(), None).unwrap();
            let mut new_msg = store.new_message().unwrap();
            new_msg.set_from("a@x");
            new_msg.add_recipient_remote("b@y");
            new_msg.add_recipient_remote("c@z");
            let id = new_msg.commit().await.unwrap();

            let mut stored = store.get(&id).unwrap();
            stored.lock().await.unwrap();
            stored
                .remove_recipients(&["b@y".to_owned()])
                .await
                .unwrap();
            assert!(stored.has_remaining_recipients());
            assert_eq!(stored.envelope().to_remote, vec!["c@z".to_owned()]);
        });
    }
}
