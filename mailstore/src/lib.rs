//! On-disk message spool: the two-file (`.content` + `.envelope`) store
//! that sits between the SMTP server side and the forwarding client side.

mod envelope;
mod error;
mod id;
mod new_message;
mod store;
mod stored_message;

pub use envelope::{EightBitState, Envelope, EnvelopeError, CURRENT_FORMAT, PREVIOUS_FORMAT};
pub use error::StorageError;
pub use id::{EnvelopeFileState, MessageId};
pub use new_message::NewMessage;
pub use store::{MessageStore, StoreIterator};
pub use stored_message::StoredMessage;
