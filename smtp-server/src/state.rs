use mailstore::NewMessage;

/// In-progress envelope, carried from `MAIL FROM` through the end of the
/// transaction (spec §4.2). Lives on the [`crate::session::Session`], not on
/// [`NewMessage`] itself, since nothing is allocated in the store until at
/// least one recipient has been verified and accepted.
pub(crate) struct MailInProgress {
    pub(crate) message: NewMessage,
    pub(crate) from: String,
    pub(crate) accepted_recipients: usize,
    /// Set on the first `add_content` failure (e.g. the message grew past
    /// the configured size limit); remembered across BDAT chunks so a
    /// failure on chunk 2 of 3 isn't silently forgotten by chunk 3.
    pub(crate) store_error: Option<String>,
}

/// The connection's place in the SMTP dialogue (spec §4.2's state table).
/// `Idle` covers both "before HELO/EHLO" and "between transactions" — the
/// only thing a fresh connection can't do yet is issue `MAIL`/`RCPT`/`DATA`,
/// which is a capability check (`hello_seen`) rather than a distinct state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum State {
    Idle,
    /// Mid `AUTH <mechanism>` exchange, waiting for a continuation line.
    Auth,
    MailFrom,
    GotRecipient,
}
