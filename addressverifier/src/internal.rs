use async_trait::async_trait;

use crate::verifier::{AddressVerifier, VerifyRequest, VerifyStatus};

/// Accepts every recipient as valid and remote — the default verifier for a
/// relay that does no local delivery (spec §4.5 "internal (accept-all,
/// remote)").
pub struct InternalVerifier;

#[async_trait]
impl AddressVerifier for InternalVerifier {
    async fn verify(&self, request: &VerifyRequest) -> VerifyStatus {
        VerifyStatus::remote(request.address.clone())
    }

    fn name(&self) -> &str {
        "internal"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::VerifierCommand;

    #[test]
    fn accepts_everything_as_remote() {
        smol::block_on(async {
            let req = VerifyRequest::new(VerifierCommand::Rcpt, "a@example.org");
            let status = InternalVerifier.verify(&req).await;
            assert!(status.is_valid);
            assert!(!status.is_local);
            assert_eq!(status.address, "a@example.org");
        });
    }
}
