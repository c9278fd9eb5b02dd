use std::{
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use mailstore::{MessageStore, StoredMessage};

use crate::config::MailboxConfig;

/// Delivers a message's content into one directory per local recipient
/// (spec §4: "DeliveryToMailbox", §6: "Local delivery"). Each recipient's
/// directory is a sub-directory of `base_dir` named after the mailbox's
/// local-part; content is hard-linked where possible rather than copied,
/// since it is immutable once committed (spec §3 invariant 5). There is no
/// direct precedent for this in the teacher, which has no local-delivery
/// concept at all (DESIGN.md); the Maildir filename convention below is
/// grounded on the `tagliacarte` example's `MaildirFilename::generate`.
pub struct DeliveryToMailbox {
    store: MessageStore,
    base_dir: PathBuf,
    maildir: bool,
}

impl DeliveryToMailbox {
    pub fn new(store: MessageStore, cfg: &MailboxConfig) -> DeliveryToMailbox {
        DeliveryToMailbox { store, base_dir: cfg.base_dir.clone(), maildir: cfg.maildir }
    }

    /// Delivers a committed message's content into every local recipient's
    /// mailbox directory. Does not touch the spool copy; the caller decides
    /// separately whether to destroy or keep it.
    pub async fn deliver(&self, stored: &StoredMessage) -> std::io::Result<()> {
        let recipients = stored.envelope().to_local.clone();
        if recipients.is_empty() {
            return Ok(());
        }
        let content_path = stored.id().content_filename();
        let spool_dir = self.store.spool_dir().to_path_buf();
        let base_dir = self.base_dir.clone();
        let maildir = self.maildir;

        smol::unblock(move || -> std::io::Result<()> {
            for recipient in &recipients {
                let mailbox_dir = mailbox_dir_for(&base_dir, recipient);
                let drop_dir = if maildir {
                    std::fs::create_dir_all(mailbox_dir.join("cur"))?;
                    std::fs::create_dir_all(mailbox_dir.join("tmp"))?;
                    let new_dir = mailbox_dir.join("new");
                    std::fs::create_dir_all(&new_dir)?;
                    new_dir
                } else {
                    std::fs::create_dir_all(&mailbox_dir)?;
                    mailbox_dir
                };

                let size = std::fs::metadata(spool_dir.join(&content_path))?.len();
                let dst = drop_dir.join(delivery_filename(maildir, size));
                hard_link_or_copy(&spool_dir.join(&content_path), &dst)?;
            }
            Ok(())
        })
        .await
    }
}

fn mailbox_dir_for(base_dir: &Path, recipient: &str) -> PathBuf {
    let local = recipient.split('@').next().unwrap_or(recipient);
    base_dir.join(sanitize(local))
}

/// Strips path separators and null bytes from a mailbox local-part before
/// using it as a directory name, so a malicious or malformed RCPT TO cannot
/// escape `base_dir`.
fn sanitize(s: &str) -> String {
    s.chars().filter(|c| *c != '/' && *c != '\\' && *c != '\0').collect()
}

/// `<timestamp>.<pid>.<counter>,S=<size>:2,` per the Maildir filename
/// convention, or a plain `<timestamp>.<pid>.<counter>.eml` outside maildir
/// mode.
fn delivery_filename(maildir: bool, size: u64) -> String {
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
    let pid = std::process::id();
    let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    if maildir {
        format!("{}.{}.{},S={}:2,", ts, pid, n, size)
    } else {
        format!("{}.{}.{}.eml", ts, pid, n)
    }
}

fn hard_link_or_copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    match std::fs::hard_link(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(src, dst)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn sanitize_strips_path_separators() {
        assert_eq!(sanitize("a/../b"), "a..b");
        assert_eq!(sanitize("jdoe"), "jdoe");
    }

    #[test]
    fn mailbox_dir_uses_localpart_only() {
        let base = tempdir().unwrap();
        let dir = mailbox_dir_for(base.path(), "jdoe@example.org");
        assert_eq!(dir, base.path().join("jdoe"));
    }

    #[test]
    fn maildir_filenames_carry_the_size_field() {
        let name = delivery_filename(true, 42);
        assert!(name.contains(",S=42:2,"));
    }
}
