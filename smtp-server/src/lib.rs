//! Asynchronous SMTP server protocol state machine (spec §4.2): accepts one
//! connection at a time, drives it through HELO/EHLO, MAIL/RCPT, DATA/BDAT
//! and AUTH/STARTTLS, and hands finished messages to [`mailstore`] after
//! running them through a [`mailfilter::FilterChain`].

mod auth;
mod config;
mod linereader;
mod session;
mod state;

pub use auth::{decode_base64_field, decode_plain, encode_base64_field, AuthBackend};
pub use config::{BoxedDuplex, ServerConfig};
pub use session::interact;
