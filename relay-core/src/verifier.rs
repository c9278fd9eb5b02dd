use std::time::Duration;

use addressverifier::{
    AccountDatabaseVerifier, AddressVerifier, DemoVerifier, ExecutableVerifier, InternalVerifier,
    NetworkVerifier,
};

use crate::config::VerifierSpec;

/// Instantiates the configured [`AddressVerifier`] (spec §4.5).
pub fn build_verifier(spec: &VerifierSpec) -> Box<dyn AddressVerifier> {
    match spec {
        VerifierSpec::Internal => Box::new(InternalVerifier),
        VerifierSpec::Demo { local_domain } => Box::new(DemoVerifier::new(local_domain.clone())),
        VerifierSpec::Account { min_uid, max_uid } => {
            Box::new(AccountDatabaseVerifier::new(*min_uid, *max_uid))
        }
        VerifierSpec::Executable { path, timeout_secs } => {
            Box::new(ExecutableVerifier::new(path.clone(), Duration::from_secs(*timeout_secs)))
        }
        VerifierSpec::Network { address } => Box::new(NetworkVerifier::new(address.clone())),
    }
}

#[cfg(test)]
mod tests {
    use addressverifier::{VerifierCommand, VerifyRequest};

    use super::*;

    #[test]
    fn internal_spec_builds_an_accept_all_remote_verifier() {
        let verifier = build_verifier(&VerifierSpec::Internal);
        let req = VerifyRequest::new(VerifierCommand::Rcpt, "a@example.org");
        let status = smol::block_on(verifier.verify(&req));
        assert!(status.is_valid);
        assert!(!status.is_local);
    }

    #[test]
    fn demo_spec_builds_a_domain_aware_verifier() {
        let verifier = build_verifier(&VerifierSpec::Demo { local_domain: "example.org".to_owned() });
        let req = VerifyRequest::new(VerifierCommand::Rcpt, "a@example.org");
        let status = smol::block_on(verifier.verify(&req));
        assert!(status.is_valid);
        assert!(status.is_local);
    }
}
