use async_trait::async_trait;

use crate::verifier::{AddressVerifier, VerifyRequest, VerifyStatus};

/// Checks the recipient's localpart against the system's account database,
/// restricted to a configured uid range (spec §4.5 "account-database (check
/// against system user accounts with uid range filter)"). No Rust example
/// in the pack performs system-account lookup; `nix::unistd::User` is the
/// standard ecosystem crate for it.
pub struct AccountDatabaseVerifier {
    min_uid: u32,
    max_uid: u32,
}

impl AccountDatabaseVerifier {
    pub fn new(min_uid: u32, max_uid: u32) -> AccountDatabaseVerifier {
        AccountDatabaseVerifier { min_uid, max_uid }
    }

    #[cfg(unix)]
    fn lookup(&self, localpart: &str) -> Option<String> {
        use nix::unistd::User;
        let user = User::from_name(localpart).ok().flatten()?;
        let uid = user.uid.as_raw();
        if uid >= self.min_uid && uid <= self.max_uid {
            Some(user.gecos.to_string_lossy().into_owned())
        } else {
            None
        }
    }

    #[cfg(not(unix))]
    fn lookup(&self, _localpart: &str) -> Option<String> {
        None
    }
}

#[async_trait]
impl AddressVerifier for AccountDatabaseVerifier {
    async fn verify(&self, request: &VerifyRequest) -> VerifyStatus {
        let localpart = request.address.split('@').next().unwrap_or(&request.address);
        let localpart = localpart.to_owned();
        let min_uid = self.min_uid;
        let max_uid = self.max_uid;
        let found = smol::unblock(move || {
            AccountDatabaseVerifier { min_uid, max_uid }.lookup(&localpart)
        })
        .await;
        match found {
            Some(full_name) => VerifyStatus::local(request.address.clone(), full_name),
            None => VerifyStatus::permanent_reject("no such user", "not a local account"),
        }
    }

    fn name(&self) -> &str {
        "account-database"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::VerifierCommand;

    #[test]
    fn unknown_user_is_rejected() {
        smol::block_on(async {
            let v = AccountDatabaseVerifier::new(0, 65535);
            let req = VerifyRequest::new(
                VerifierCommand::Rcpt,
                "definitely-not-a-real-user-xyz@example.org",
            );
            let status = v.verify(&req).await;
            assert!(!status.is_valid);
            assert!(!status.temporary);
        });
    }
}
