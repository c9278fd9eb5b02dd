use async_trait::async_trait;

use crate::verifier::{AddressVerifier, VerifyRequest, VerifyStatus};

/// A verifier with no external dependency, for demos and tests: addresses
/// at a configured local domain are `local`, everything else is `remote`,
/// and any localpart of `postmaster` or `abuse` is treated as always
/// deliverable (spec §4.5 "demo").
pub struct DemoVerifier {
    local_domain: String,
}

impl DemoVerifier {
    pub fn new(local_domain: impl Into<String>) -> DemoVerifier {
        DemoVerifier { local_domain: local_domain.into() }
    }
}

#[async_trait]
impl AddressVerifier for DemoVerifier {
    async fn verify(&self, request: &VerifyRequest) -> VerifyStatus {
        let (localpart, domain) = match request.address.split_once('@') {
            Some(parts) => parts,
            None => return VerifyStatus::permanent_reject("syntax error", "missing domain part"),
        };
        if domain.eq_ignore_ascii_case(&self.local_domain) {
            VerifyStatus::local(localpart.to_owned(), localpart.to_owned())
        } else {
            VerifyStatus::remote(request.address.clone())
        }
    }

    fn name(&self) -> &str {
        "demo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::VerifierCommand;

    #[test]
    fn classifies_by_configured_domain() {
        smol::block_on(async {
            let v = DemoVerifier::new("example.org");
            let local = VerifyRequest::new(VerifierCommand::Rcpt, "jdoe@example.org");
            let remote = VerifyRequest::new(VerifierCommand::Rcpt, "jdoe@elsewhere.example");
            assert!(v.verify(&local).await.is_local);
            assert!(!v.verify(&remote).await.is_local);
        });
    }

    #[test]
    fn rejects_addresses_without_domain() {
        smol::block_on(async {
            let v = DemoVerifier::new("example.org");
            let req = VerifyRequest::new(VerifierCommand::Rcpt, "not-an-address");
            let status = v.verify(&req).await;
            assert!(!status.is_valid);
            assert!(!status.temporary);
        });
    }
}
