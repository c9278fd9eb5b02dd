use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use event_listener::Event;
use walkdir::WalkDir;

use crate::{
    envelope::Envelope,
    error::StorageError,
    id::{EnvelopeFileState, MessageId},
    new_message::NewMessage,
    stored_message::StoredMessage,
};

/// Shared state behind every handle a [`MessageStore`] clone hands out.
/// Cheap to clone the outer `MessageStore` itself (an `Arc` bump) so it can
/// be held by the server, the forwarder and the admin/rescan task at once.
pub(crate) struct Inner {
    pub(crate) dir: PathBuf,
    pub(crate) max_size: Option<u64>,
    pub(crate) update_signal: Event,
    pub(crate) rescan_signal: Event,
}

/// The on-disk, two-file message spool (spec §4: "MessageStore").
///
/// Cloning a `MessageStore` is cheap and shares the same spool directory and
/// wake-up signals; this is how the server's accept loop and the forwarder's
/// background task both get their own handle onto the same spool.
#[derive(Clone)]
pub struct MessageStore(Arc<Inner>);

impl MessageStore {
    /// Opens (and creates, if missing) a spool directory. `max_size`, if
    /// set, bounds the content a single message may accumulate (spec §4.1
    /// edge case: oversized DATA).
    pub fn open(dir: impl AsRef<Path>, max_size: Option<u64>) -> Result<MessageStore, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(MessageStore(Arc::new(Inner {
            dir,
            max_size,
            update_signal: Event::new(),
            rescan_signal: Event::new(),
        })))
    }

    pub fn spool_dir(&self) -> &Path {
        &self.0.dir
    }

    /// Begins receiving a new message. Nothing under this id is visible to
    /// [`Self::ids`]/[`Self::iterator`] until [`NewMessage::commit`].
    pub fn new_message(&self) -> Result<NewMessage, StorageError> {
        NewMessage::create(self.0.clone())
    }

    /// Loads a specific committed message by id, without locking it.
    pub fn get(&self, id: &MessageId) -> Result<StoredMessage, StorageError> {
        let path = self.0.dir.join(id.envelope_filename(EnvelopeFileState::Committed));
        let bytes = fs::read(&path).map_err(|_| StorageError::NotFound(id.to_string()))?;
        let envelope = Envelope::parse(&bytes)?;
        Ok(StoredMessage {
            inner: self.0.clone(),
            id: id.clone(),
            envelope,
            locked: false,
        })
    }

    /// Lists the ids of all committed (neither `.new`, `.busy`, nor `.bad`)
    /// messages currently in the spool, in directory order.
    pub fn ids(&self) -> Result<Vec<MessageId>, StorageError> {
        let mut out = Vec::new();
        for entry in WalkDir::new(&self.0.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| StorageError::Io(e.into()))?;
            let name = entry.file_name().to_string_lossy();
            if let Some(token) = name.strip_suffix(".envelope") {
                out.push(MessageId::from_token(token.to_owned()));
            }
        }
        out.sort();
        Ok(out)
    }

    /// The ids of messages quarantined in `.envelope.bad` state (spec §4,
    /// invariant 3).
    pub fn failures(&self) -> Result<Vec<MessageId>, StorageError> {
        let mut out = Vec::new();
        for entry in WalkDir::new(&self.0.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| StorageError::Io(e.into()))?;
            let name = entry.file_name().to_string_lossy();
            if let Some(token) = name.strip_suffix(".envelope.bad") {
                out.push(MessageId::from_token(token.to_owned()));
            }
        }
        out.sort();
        Ok(out)
    }

    /// Re-queues every `.bad` message by renaming it back to committed
    /// state, for operator-triggered retry (spec §4: "unfail").
    pub async fn unfail_all(&self) -> Result<usize, StorageError> {
        let mut n = 0;
        for id in self.failures()? {
            let from = self.0.dir.join(id.envelope_filename(EnvelopeFileState::Bad));
            let to = self.0.dir.join(id.envelope_filename(EnvelopeFileState::Committed));
            let from2 = from.clone();
            let to2 = to.clone();
            smol::unblock(move || std::fs::rename(&from2, &to2)).await?;
            n += 1;
        }
        if n > 0 {
            self.0.update_signal.notify(usize::MAX);
        }
        Ok(n)
    }

    /// An iterator over all committed messages, oldest-first, that have not
    /// already been locked by a concurrent forwarding pass. Messages that
    /// lose the lock race to another process are silently skipped (spec §4,
    /// invariant 2).
    pub fn iterator(&self) -> Result<StoreIterator, StorageError> {
        Ok(StoreIterator {
            store: self.clone(),
            ids: self.ids()?.into_iter(),
        })
    }

    /// Resolves once something changes in the spool: a commit, an unlock, a
    /// failure, or a destroy. Used by the forwarder to wake from idle
    /// instead of polling (spec §4: "asynchronous notification of new
    /// mail").
    pub async fn updated(&self) {
        self.0.update_signal.listen().await;
    }

    /// Resolves once an external rescan has been requested (e.g. an admin
    /// command telling the relay to re-read the spool directory from
    /// scratch rather than trust its in-memory view).
    pub async fn rescan(&self) {
        self.0.rescan_signal.listen().await;
    }

    /// Requests a rescan; wakes every task waiting in [`Self::rescan`].
    pub fn trigger_rescan(&self) {
        self.0.rescan_signal.notify(usize::MAX);
    }
}

/// Yields committed, not-yet-locked messages oldest-first. Built fresh from
/// a directory listing snapshot at [`MessageStore::iterator`] time; does not
/// pick up messages committed after iteration started (call `iterator()`
/// again to pick up the rest, as the forwarder does on each wake-up).
pub struct StoreIterator {
    store: MessageStore,
    ids: std::vec::IntoIter<MessageId>,
}

impl StoreIterator {
    /// Returns the next message, already locked, or `None` once the
    /// snapshot is exhausted. Messages that another process locked first
    /// are skipped rather than surfaced as an error.
    pub async fn next(&mut self) -> Result<Option<StoredMessage>, StorageError> {
        for id in self.ids.by_ref() {
            let mut msg = match self.store.get(&id) {
                Ok(msg) => msg,
                Err(StorageError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            match msg.lock().await {
                Ok(()) => return Ok(Some(msg)),
                Err(StorageError::Locked(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn ids_only_lists_committed_messages() {
        smol::block_on(async {
            let dir = tempdir().unwrap();
            let store = MessageStore::open(dir.path(), None).unwrap();

            let mut uncommitted = store.new_message().unwrap();
            uncommitted.set_from("a@x");
            let _ = uncommitted; // left as `.new`-less (content only) on purpose

            let mut committed = store.new_message().unwrap();
            committed.set_from("a@x");
            committed.add_recipient_remote("b@y");
            let id = committed.commit().await.unwrap();

            assert_eq!(store.ids().unwrap(), vec![id]);
        });
    }

    #[test]
    fn iterator_skips_messages_locked_by_a_concurrent_pass() {
        smol::block_on(async {
            let dir = tempdir().unwrap();
            let store = MessageStore::open(dir.path(), None).unwrap();
            let mut msg = store.new_message().unwrap();
            msg.set_from("a@x");
            msg.add_recipient_remote("b@y");
            let id = msg.commit().await.unwrap();

            let mut already_locked = store.get(&id).unwrap();
            already_locked.lock().await.unwrap();

            let mut it = store.iterator().unwrap();
            assert!(it.next().await.unwrap().is_none());

            already_locked.unlock().await.unwrap();
            let mut it2 = store.iterator().unwrap();
            assert!(it2.next().await.unwrap().is_some());
        });
    }

    #[test]
    fn unfail_all_requeues_bad_messages() {
        smol::block_on(async {
            let dir = tempdir().unwrap();
            let store = MessageStore::open(dir.path(), None).unwrap();
            let mut msg = store.new_message().unwrap();
            msg.set_from("a@x");
            msg.add_recipient_remote("b@y");
            let id = msg.commit().await.unwrap();

            let mut stored = store.get(&id).unwrap();
            stored.lock().await.unwrap();
            stored.fail("bounced", None).await.unwrap();

            assert_eq!(store.failures().unwrap(), vec![id.clone()]);
            assert_eq!(store.unfail_all().await.unwrap(), 1);
            assert_eq!(store.ids().unwrap(), vec![id]);
        });
    }
}
