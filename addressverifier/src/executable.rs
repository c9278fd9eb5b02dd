use std::time::Duration;

use async_process::Command;
use async_trait::async_trait;

use crate::verifier::{AddressVerifier, VerifyRequest, VerifyStatus};

/// Spawns an external program with the candidate address as its sole
/// argument; the first whitespace-separated field of its stdout is a
/// numeric status matching the network-verifier convention (spec §4.5
/// "executable (spawn program, parse numeric leading field)").
pub struct ExecutableVerifier {
    path: String,
    timeout: Duration,
}

impl ExecutableVerifier {
    pub fn new(path: impl Into<String>, timeout: Duration) -> ExecutableVerifier {
        ExecutableVerifier { path: path.into(), timeout }
    }
}

#[async_trait]
impl AddressVerifier for ExecutableVerifier {
    async fn verify(&self, request: &VerifyRequest) -> VerifyStatus {
        let mut cmd = Command::new(&self.path);
        cmd.arg(&request.address).arg(&request.mail_from).arg(&request.client_ip);

        let run = cmd.output();
        let timeout = async_io::Timer::after(self.timeout);
        futures::pin_mut!(run);
        futures::pin_mut!(timeout);

        let output = match futures::future::select(run, timeout).await {
            futures::future::Either::Left((Ok(out), _)) => out,
            futures::future::Either::Left((Err(e), _)) => {
                return VerifyStatus::temporary_reject(
                    "verifier error",
                    format!("failed to run verifier {:?}: {}", self.path, e),
                )
            }
            futures::future::Either::Right((_, _)) => {
                return VerifyStatus::temporary_reject(
                    "verifier timed out",
                    format!("verifier {:?} did not respond in time", self.path),
                )
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        crate::network::parse_fields(stdout.trim())
    }

    fn name(&self) -> &str {
        "executable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::VerifierCommand;

    #[test]
    fn nonexistent_binary_is_a_temporary_failure() {
        smol::block_on(async {
            let v = ExecutableVerifier::new("/no/such/verifier-binary", Duration::from_secs(1));
            let req = VerifyRequest::new(VerifierCommand::Rcpt, "a@example.org");
            let status = v.verify(&req).await;
            assert!(!status.is_valid);
            assert!(status.temporary);
        });
    }
}
