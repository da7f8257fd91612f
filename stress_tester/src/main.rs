use clap::Parser;
use tracing_subscriber::EnvFilter;

pub mod cfg;
mod stress;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = cfg::Cfg::parse();
    println!("Running configuration:\n{cfg:#?}");

    if let Err(e) = run(cfg) {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}

fn run(cfg: cfg::Cfg) -> anyhow::Result<()> {
    let results = stress::run_stress_test(cfg)?;
    results.print_summary()?;

    if !results.is_balanced() {
        anyhow::bail!("Pushed entries are not accounted for by drains, deletions and leftovers");
    }
    Ok(())
}
