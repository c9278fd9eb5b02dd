//! Daemon assembly for `mailrelay` (spec §9 ambient addition): wires a
//! [`config::Config`] into a running [`mailstore::MessageStore`], an
//! accept loop driving [`smtp_server::interact`], and a background
//! [`forwarder::Forwarder`] that drains the spool to a downstream peer.
//! Ported from the teacher's `kannader::run`, generalized from its
//! wasm-configuration/`smtp-queue` machinery to this crate's TOML
//! configuration and single-destination forwarding (DESIGN.md).

mod client_config;
pub mod config;
mod filters;
mod forwarder;
mod mailbox;
mod server_config;
mod supervisor;
mod tls;
mod verifier;

use std::{convert::TryFrom, path::PathBuf, sync::Arc};

use anyhow::Context;
use easy_parallel::Parallel;
use mailfilter::FilterSide;
use mailstore::MessageStore;

pub use client_config::RelayClientConfig;
pub use config::Config;
pub use forwarder::Forwarder;
pub use mailbox::DeliveryToMailbox;
pub use server_config::RelayServerConfig;

const NUM_THREADS: usize = 4;

/// Command-line options (spec §9): override individual [`Config`] fields
/// after loading the TOML file, following the precedence the teacher's
/// `kannader::Opt` establishes (CLI beats file beats built-in default).
#[derive(structopt::StructOpt)]
#[structopt(name = "mailrelay", about = "A store-and-forward SMTP relay.")]
pub struct Opt {
    /// Path to the TOML configuration file.
    #[structopt(short, long, parse(from_os_str), default_value = "/etc/mailrelay/config.toml")]
    pub config: PathBuf,

    /// Overrides `spool_dir` from the configuration file.
    #[structopt(long, parse(from_os_str))]
    pub spool_dir: Option<PathBuf>,

    /// Overrides `listen` from the configuration file.
    #[structopt(long)]
    pub listen: Option<String>,

    /// Overrides the forwarding destination's host, keeping its
    /// configured port (`host:port` from the config file otherwise).
    #[structopt(long)]
    pub forward_to: Option<String>,
}

fn apply_overrides(mut cfg: Config, opt: &Opt) -> Config {
    if let Some(spool_dir) = &opt.spool_dir {
        cfg.spool_dir = spool_dir.clone();
    }
    if let Some(listen) = &opt.listen {
        cfg.listen = listen.clone();
    }
    if let Some(host) = &opt.forward_to {
        if let Some(forward) = &mut cfg.forward {
            forward.host = host.clone();
        }
    }
    cfg
}

/// Loads configuration, builds every wired-together component, and runs
/// the daemon until `shutdown` resolves. Mirrors the teacher's `run`:
/// an `N`-thread `smol::Executor` pool with one thread doing the assembly
/// and accept loop, the others just driving the executor.
pub fn run(opt: &Opt, shutdown: smol::channel::Receiver<()>) -> anyhow::Result<()> {
    tracing::info!("mailrelay starting up");

    let cfg = Config::load(&opt.config).context("loading configuration")?;
    let cfg = apply_overrides(cfg, opt);

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cfg.log_level))
        .try_init()
        .ok();

    let listener =
        std::net::TcpListener::bind(&cfg.listen).context("binding the listening socket")?;
    listener.set_nonblocking(true).context("making the listener non-blocking")?;

    let ex = &Arc::new(smol::Executor::new());
    let (stop_signal, local_shutdown) = smol::channel::unbounded::<()>();

    let (_, res): (_, anyhow::Result<()>) = Parallel::new()
        .each(0..NUM_THREADS, |_| {
            smol::block_on(ex.run(async {
                futures::future::or(shutdown.recv(), local_shutdown.recv())
                    .await
                    .context("receiving shutdown notification")
            }))
        })
        .finish(move || smol::block_on(assemble_and_serve(ex.clone(), cfg, listener, stop_signal)));

    res
}

async fn assemble_and_serve(
    ex: Arc<smol::Executor<'static>>,
    cfg: Config,
    listener: std::net::TcpListener,
    stop_signal: smol::channel::Sender<()>,
) -> anyhow::Result<()> {
    let store = MessageStore::open(&cfg.spool_dir, cfg.max_message_size)
        .context("opening the message spool")?;

    let verifier = verifier::build_verifier(&cfg.verifier);
    let server_filter_chain = filters::build_chain(&cfg.server_filters, FilterSide::Server, &store);
    let tls_acceptor = tls::load_server_acceptor(cfg.tls.as_ref().unwrap_or(&config::TlsConfig::default()))
        .context("loading the TLS server certificate")?;

    let server_cfg: Arc<dyn smtp_server::ServerConfig> = Arc::new(server_config::RelayServerConfig {
        hostname: cfg.hostname.clone(),
        store: store.clone(),
        verifier,
        filter_chain: server_filter_chain,
        max_message_size: cfg.max_message_size,
        max_line_size: cfg.max_line_size,
        auth_mechanisms: cfg.auth_mechanisms.clone(),
        auth_backend: None,
        tls_acceptor,
    });

    let listener = smol::net::TcpListener::try_from(listener).context("making the listener async")?;
    let accept = ex.spawn(supervisor::accept_loop(ex.clone(), listener, server_cfg));

    if let Some(forward) = cfg.forward.clone() {
        let client_filter_chain = filters::build_chain(&cfg.client_filters, FilterSide::Client, &store);

        let resolver = async_std_resolver::resolver_from_system_conf()
            .await
            .context("configuring a resolver from system configuration")?;
        let connector = tls::build_client_connector();
        let client_cfg = Arc::new(RelayClientConfig::new(
            cfg.hostname.clone(),
            connector,
            forward.host.clone(),
            forward.require_tls,
            None,
        ));
        let mailbox = cfg.mailbox.as_ref().map(|m| DeliveryToMailbox::new(store.clone(), m));
        let forwarder = Forwarder::new(
            store.clone(),
            resolver,
            client_cfg,
            &forward.host,
            std::time::Duration::from_secs(forward.poll_interval_secs),
            mailbox,
            client_filter_chain,
        )
        .context("setting up the forwarder")?;
        ex.spawn(async move { forwarder.run().await }).detach();
    }

    accept.await?;
    std::mem::drop(stop_signal);
    Ok(())
}
