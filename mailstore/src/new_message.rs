use std::{
    fs::OpenOptions,
    io::Write,
    path::PathBuf,
    sync::Arc,
};

use smtp_message::BodyType;

use crate::{
    envelope::{EightBitState, Envelope},
    error::StorageError,
    id::{EnvelopeFileState, MessageId},
    store::Inner,
};

/// A message in the process of being received: content bytes accumulate
/// directly into `<id>.content`; nothing is visible to iterators until
/// [`NewMessage::commit`] renames the envelope into place (spec §4.1,
/// invariant 1).
pub struct NewMessage {
    pub(crate) inner: Arc<Inner>,
    pub(crate) id: MessageId,
    pub(crate) envelope: Envelope,
    content_path: PathBuf,
    written: u64,
}

impl NewMessage {
    pub(crate) fn create(inner: Arc<Inner>) -> Result<NewMessage, StorageError> {
        let id = MessageId::allocate();
        let content_path = inner.dir.join(id.content_filename());
        // Opening here, rather than lazily on first `add_content`, matches
        // the teacher's eager-file-creation pattern and lets a crash right
        // after RCPT leave an empty, harmlessly-orphaned `.content` file
        // instead of a half-initialized handle.
        OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&content_path)?;
        Ok(NewMessage {
            inner,
            id,
            envelope: Envelope {
                format_id: crate::envelope::CURRENT_FORMAT,
                ..Envelope::default()
            },
            content_path,
            written: 0,
        })
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn set_from(&mut self, from: impl Into<String>) {
        self.envelope.from = from.into();
    }

    pub fn add_recipient_local(&mut self, addr: impl Into<String>) {
        self.envelope.to_local.push(addr.into());
    }

    pub fn add_recipient_remote(&mut self, addr: impl Into<String>) {
        self.envelope.to_remote.push(addr.into());
    }

    pub fn set_authentication_id(&mut self, id: impl Into<String>) {
        self.envelope.authentication_id = id.into();
    }

    pub fn set_client_socket_address(&mut self, addr: impl Into<String>) {
        self.envelope.client_socket_address = addr.into();
    }

    pub fn set_client_certificate(&mut self, cert: impl Into<String>) {
        self.envelope.client_certificate = cert.into();
    }

    pub fn set_from_auth_in(&mut self, v: Option<String>) {
        self.envelope.from_auth_in = v;
    }

    pub fn set_body_type(&mut self, body_type: BodyType) {
        self.envelope.body_type = body_type;
        self.envelope.eight_bit_content = match body_type {
            BodyType::SevenBit => EightBitState::SevenBit,
            BodyType::EightBitMime | BodyType::BinaryMime => EightBitState::EightBit,
            BodyType::Unknown => EightBitState::Unknown,
        };
    }

    pub fn set_utf8_mailboxes(&mut self, utf8: bool) {
        self.envelope.utf8_mailboxes = utf8;
    }

    /// Appends raw content bytes, enforcing the spool's configured maximum
    /// message size (spec §4.1 edge case: oversized DATA).
    pub async fn add_content(&mut self, data: &[u8]) -> Result<(), StorageError> {
        if let Some(limit) = self.inner.max_size {
            if self.written + data.len() as u64 > limit {
                return Err(StorageError::TooBig { limit });
            }
        }
        let path = self.content_path.clone();
        let buf = data.to_vec();
        let written = smol::unblock(move || -> std::io::Result<()> {
            let mut f = OpenOptions::new().append(true).open(&path)?;
            f.write_all(&buf)
        })
        .await;
        written?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Writes the envelope to `<id>.envelope.new` and renames it to
    /// `<id>.envelope`, making the message visible to iterators (spec §4.1,
    /// invariant 1: "a message only becomes visible to forwarding once both
    /// files exist under their final names").
    pub async fn commit(self) -> Result<MessageId, StorageError> {
        let dir = self.inner.dir.clone();
        let id = self.id.clone();
        let bytes = self.envelope.to_bytes();
        smol::unblock(move || -> std::io::Result<()> {
            let new_path = dir.join(id.envelope_filename(EnvelopeFileState::New));
            let final_path = dir.join(id.envelope_filename(EnvelopeFileState::Committed));
            std::fs::write(&new_path, &bytes)?;
            std::fs::rename(&new_path, &final_path)?;
            Ok(())
        })
        .await?;
        self.inner.update_signal.notify(usize::MAX);
        Ok(self.id)
    }

    /// Discards the in-progress message, removing its `.content` file. Used
    /// when a transfer is aborted (RSET, dropped connection, filter
    /// rejection before commit).
    pub async fn discard(self) -> Result<(), StorageError> {
        let path = self.content_path.clone();
        smol::unblock(move || std::fs::remove_file(&path)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::store::MessageStore;

    #[test]
    fn commit_makes_message_visible_and_discard_does_not() {
        smol::block_on(async {
            let dir = tempdir().unwrap();
            let store = MessageStore::open(dir.path(), None).unwrap();

            let mut msg = store.new_message().unwrap();
            msg.set_from("a@x");
            msg.add_recipient_remote("b@y");
            msg.add_content(b"hello").await.unwrap();
            let id = msg.commit().await.unwrap();

            assert_eq!(store.ids().unwrap(), vec![id.clone()]);
            assert!(dir.path().join(id.content_filename()).exists());

            let mut msg2 = store.new_message().unwrap();
            msg2.add_content(b"nope").await.unwrap();
            let discarded_path = dir.path().join(msg2.id().content_filename());
            msg2.discard().await.unwrap();
            assert!(!discarded_path.exists());
        });
    }

    #[test]
    fn add_content_rejects_oversized_messages() {
        smol::block_on(async {
            let dir = tempdir().unwrap();
            let store = MessageStore::open(dir.path(), Some(4)).unwrap();
            let mut msg = store.new_message().unwrap();
            let err = msg.add_content(b"way too long").await.unwrap_err();
            assert!(matches!(err, crate::error::StorageError::TooBig { limit: 4 }));
        });
    }
}
