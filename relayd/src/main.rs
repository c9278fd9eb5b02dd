use structopt::StructOpt;

fn main() -> anyhow::Result<()> {
    // TODO: figure out a better shutdown story than brutally killing the
    // daemon (ie. drop(signal) when the operator wants to stop it).
    let (_signal, shutdown) = smol::channel::unbounded::<()>();

    relay_core::run(&relay_core::Opt::from_args(), shutdown)
}
