mod auth;
mod client;
mod sender;
mod transport;

pub use auth::Credentials;
pub use client::{Client, Config, Destination, DynAsyncReadWrite};
pub use sender::{MailParams, Outcome, RecipientOutcome, Sender};
pub use transport::{TransportError, TransportErrorSeverity};
