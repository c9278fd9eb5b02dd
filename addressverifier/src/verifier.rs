use async_trait::async_trait;

/// Which SMTP command triggered this verification (spec §4.5: the request
/// "carries the RCPT/VRFY command kind").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VerifierCommand {
    Rcpt,
    Vrfy,
}

/// Everything a [`AddressVerifier`] needs to classify one recipient.
#[derive(Clone, Debug)]
pub struct VerifyRequest {
    pub command: VerifierCommand,
    /// The address exactly as received on the wire.
    pub raw_address: String,
    /// The address after whatever local normalisation the server applied.
    pub address: String,
    /// The current MAIL FROM reverse path, empty for a bounce.
    pub mail_from: String,
    /// Textual remote peer address, e.g. `"203.0.113.9:51512"`.
    pub client_ip: String,
    /// The authenticated SMTP session identity, empty if none.
    pub authentication_id: String,
}

impl VerifyRequest {
    pub fn new(command: VerifierCommand, address: impl Into<String>) -> VerifyRequest {
        let address = address.into();
        VerifyRequest {
            command,
            raw_address: address.clone(),
            address,
            mail_from: String::new(),
            client_ip: String::new(),
            authentication_id: String::new(),
        }
    }
}

/// The verifier's decision for one recipient (spec §4.5): a tagged record
/// rather than a plain bool, so temporary/permanent rejection and the
/// session-killing `abort` flag all travel alongside the classification.
#[derive(Clone, Debug, Default)]
pub struct VerifyStatus {
    pub is_valid: bool,
    pub is_local: bool,
    /// Set when `is_valid` is false and the rejection should be reported as
    /// 4xx rather than 5xx.
    pub temporary: bool,
    /// Tells the server to terminate the session outright (network
    /// verifier's `100=abort` response).
    pub abort: bool,
    pub recipient: String,
    pub full_name: String,
    pub address: String,
    pub response: String,
    pub reason: String,
}

impl VerifyStatus {
    pub fn local(recipient: impl Into<String>, full_name: impl Into<String>) -> VerifyStatus {
        VerifyStatus {
            is_valid: true,
            is_local: true,
            recipient: recipient.into(),
            full_name: full_name.into(),
            ..Default::default()
        }
    }

    pub fn remote(address: impl Into<String>) -> VerifyStatus {
        VerifyStatus {
            is_valid: true,
            is_local: false,
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn permanent_reject(response: impl Into<String>, reason: impl Into<String>) -> VerifyStatus {
        VerifyStatus {
            is_valid: false,
            temporary: false,
            response: response.into(),
            reason: reason.into(),
            ..Default::default()
        }
    }

    pub fn temporary_reject(response: impl Into<String>, reason: impl Into<String>) -> VerifyStatus {
        VerifyStatus {
            is_valid: false,
            temporary: true,
            response: response.into(),
            reason: reason.into(),
            ..Default::default()
        }
    }

    pub fn abort(reason: impl Into<String>) -> VerifyStatus {
        VerifyStatus {
            is_valid: false,
            abort: true,
            reason: reason.into(),
            ..Default::default()
        }
    }
}

/// A pluggable per-recipient classifier (spec §4.5). Implementations settle
/// asynchronously on a [`VerifyStatus`] — the `done_signal` of spec.md folds
/// into the returned future the same way [`mailfilter::Filter::run`] does.
#[async_trait]
pub trait AddressVerifier: Send + Sync {
    async fn verify(&self, request: &VerifyRequest) -> VerifyStatus;

    fn name(&self) -> &str;
}
