//! Pluggable per-recipient address classification (spec §4.5).

mod account;
mod demo;
mod executable;
mod internal;
mod network;
mod verifier;

pub use account::AccountDatabaseVerifier;
pub use demo::DemoVerifier;
pub use executable::ExecutableVerifier;
pub use internal::InternalVerifier;
pub use network::NetworkVerifier;
pub use verifier::{AddressVerifier, VerifierCommand, VerifyRequest, VerifyStatus};
