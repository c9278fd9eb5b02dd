use std::time::Duration;

use async_process::Command;
use async_trait::async_trait;
use mailstore::MessageId;

use crate::{
    exitcode::{classify, FilterSide},
    filter::Filter,
    result::{FilterOutcome, FilterResult},
};

/// Spawns an external program with the message id as its sole argument and
/// maps its exit code to a [`crate::FilterOutcome`] (spec §4.3
/// "ExecutableFilter"). The message's envelope and content file paths are
/// passed via the `MAILRELAY_ENVELOPE`/`MAILRELAY_CONTENT` environment
/// variables, following the source's convention of handing the filter a
/// filesystem path rather than piping the message through its stdin.
pub struct ExecutableFilter {
    side: FilterSide,
    path: String,
    spool_dir: std::path::PathBuf,
    timeout: Duration,
}

impl ExecutableFilter {
    pub fn new(
        side: FilterSide,
        path: impl Into<String>,
        spool_dir: impl Into<std::path::PathBuf>,
        timeout: Duration,
    ) -> ExecutableFilter {
        ExecutableFilter { side, path: path.into(), spool_dir: spool_dir.into(), timeout }
    }
}

#[async_trait]
impl Filter for ExecutableFilter {
    async fn run(&self, id: &MessageId) -> FilterOutcome {
        let content_path = self.spool_dir.join(id.content_filename());
        let envelope_path = self.spool_dir.join(id.envelope_filename(mailstore::EnvelopeFileState::Busy));

        let mut cmd = Command::new(&self.path);
        cmd.arg(id.as_str())
            .env("MAILRELAY_ENVELOPE", &envelope_path)
            .env("MAILRELAY_CONTENT", &content_path);

        let run = cmd.output();
        let timeout = async_io::Timer::after(self.timeout);
        futures::pin_mut!(run);
        futures::pin_mut!(timeout);

        let output = match futures::future::select(run, timeout).await {
            futures::future::Either::Left((Ok(out), _)) => out,
            futures::future::Either::Left((Err(e), _)) => {
                return FilterOutcome::fail(
                    "filter error",
                    format!("failed to run filter {:?}: {}", self.path, e),
                    450,
                )
            }
            futures::future::Either::Right((_, _)) => {
                return FilterOutcome::fail(
                    "filter timed out",
                    format!("filter {:?} did not complete within {:?}", self.path, self.timeout),
                    450,
                )
            }
        };

        let code = output.status.code().unwrap_or(1);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let (response, reason) = parse_markers(&stdout);
        let mut outcome = classify(self.side, code, response, reason);
        if outcome.result == FilterResult::Fail && outcome.response.is_empty() {
            outcome.response = "rejected".to_owned();
        }
        outcome
    }

    fn name(&self) -> &str {
        "executable"
    }
}

/// Extracts the `<<text>>` markers a filter program prints on stdout (spec
/// §4.3): the first marker is the short response text, the second (if any)
/// is the longer reason text. Any other stdout content is ignored.
fn parse_markers(stdout: &str) -> (String, String) {
    let mut markers = Vec::new();
    let mut rest = stdout;
    while let Some(start) = rest.find("<<") {
        let after_start = &rest[start + 2..];
        if let Some(end) = after_start.find(">>") {
            markers.push(after_start[..end].to_owned());
            rest = &after_start[end + 2..];
        } else {
            break;
        }
    }
    let response = markers.first().cloned().unwrap_or_default();
    let reason = markers.get(1).cloned().unwrap_or_else(|| response.clone());
    (response, reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_both_markers() {
        let (response, reason) = parse_markers("some log line\n<<blocked>>\n<<spam score too high>>\n");
        assert_eq!(response, "blocked");
        assert_eq!(reason, "spam score too high");
    }

    #[test]
    fn single_marker_is_used_for_both() {
        let (response, reason) = parse_markers("<<blocked>>\n");
        assert_eq!(response, "blocked");
        assert_eq!(reason, "blocked");
    }

    #[test]
    fn no_marker_yields_empty_strings() {
        let (response, reason) = parse_markers("plain log output\n");
        assert_eq!(response, "");
        assert_eq!(reason, "");
    }
}
