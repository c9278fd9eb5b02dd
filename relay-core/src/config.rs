use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// A single entry in a configured filter chain. Mirrors the concrete
/// variants `mailfilter` offers (spec §4.3); the chain itself is just an
/// ordered list of these, built into a [`mailfilter::FilterChain`] by
/// [`crate::filters::build_chain`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterSpec {
    Null,
    Exit { code: i32, response: String, reason: String },
    Executable { path: String, timeout_secs: u64 },
    Network { address: String },
    Spam { address: String, rewrite: bool },
    MessageId,
    Copy { targets: Vec<PathBuf> },
    Delivery { forward_to: String, forward_to_address: String },
    Split,
}

/// Selects which [`addressverifier::AddressVerifier`] a listening unit uses
/// (spec §4.5).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerifierSpec {
    /// Accept-all, remote (spec §4.5 "internal").
    Internal,
    Demo { local_domain: String },
    Account { min_uid: u32, max_uid: u32 },
    Executable { path: String, timeout_secs: u64 },
    Network { address: String },
}

impl Default for VerifierSpec {
    fn default() -> VerifierSpec {
        VerifierSpec::Internal
    }
}

/// TLS material for the listening side, if STARTTLS is to be offered.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TlsConfig {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

/// Where (and whether) to forward locally-accepted mail on to a downstream
/// SMTP peer (spec §4.4).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ForwardConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub require_tls: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    60
}

/// Per-mailbox local-delivery layout (spec §6: "Local delivery").
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MailboxConfig {
    pub base_dir: PathBuf,
    #[serde(default)]
    pub maildir: bool,
}

fn default_listen() -> String {
    "0.0.0.0:2525".to_owned()
}

fn default_hostname() -> String {
    "mailrelay".to_owned()
}

fn default_max_line_size() -> usize {
    16 * 1024
}

/// The whole daemon's configuration (spec §9 ambient addition: this struct
/// and its TOML loading have no counterpart in spec.md itself, which is
/// silent on configuration format).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_hostname")]
    pub hostname: String,

    pub spool_dir: PathBuf,

    pub max_message_size: Option<u64>,

    #[serde(default = "default_max_line_size")]
    pub max_line_size: usize,

    #[serde(default)]
    pub server_filters: Vec<FilterSpec>,

    #[serde(default)]
    pub client_filters: Vec<FilterSpec>,

    #[serde(default)]
    pub verifier: VerifierSpec,

    #[serde(default)]
    pub auth_mechanisms: Vec<String>,

    pub tls: Option<TlsConfig>,

    pub forward: Option<ForwardConfig>,

    pub mailbox: Option<MailboxConfig>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Config {
    /// Loads configuration from a TOML file, used as the base that CLI
    /// flags (in [`crate::Opt`]) then override, matching the precedence
    /// order the teacher's `kannader::Opt` establishes: CLI beats file
    /// beats built-in default.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Config> {
        use anyhow::Context;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {}", path.display()))?;
        let cfg: Config = toml::from_str(&text)
            .with_context(|| format!("parsing configuration file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn executable_timeout(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let toml = r#"
            spool_dir = "/var/spool/mailrelay"

            [[server_filters]]
            kind = "message_id"

            [verifier]
            kind = "demo"
            local_domain = "example.org"
        "#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:2525");
        assert_eq!(cfg.spool_dir, PathBuf::from("/var/spool/mailrelay"));
        assert!(matches!(cfg.server_filters[0], FilterSpec::MessageId));
        assert!(matches!(cfg.verifier, VerifierSpec::Demo { .. }));
    }

    #[test]
    fn forward_config_defaults_poll_interval() {
        let toml = r#"
            host = "mx.example.org"
            port = 25
        "#;
        let cfg: ForwardConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.poll_interval_secs, 60);
        assert!(!cfg.require_tls);
    }
}
