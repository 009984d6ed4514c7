use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use xhprof_listener::config::ListenerOptions;
use xhprof_listener::error::Error;
use xhprof_listener::listener::XhprofListener;

#[derive(Parser)]
#[command(
    name = "xhprof-listener",
    about = "Inspect the configuration and stored runs of the per-test profiling listener",
    version
)]
struct Cli {
    /// Log lifecycle details to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a listener options file and print the resolved configuration.
    Check {
        /// TOML file with the listener options (an `[xhprof]` table or top-level keys).
        config: PathBuf,
    },
    /// List stored runs for the configured namespace, newest first.
    Runs {
        /// TOML file with the listener options.
        config: PathBuf,

        /// Show at most this many runs.
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let directive = if verbose {
        "xhprof_listener=debug"
    } else {
        "xhprof_listener=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Commands::Check { config } => cmd_check(config),
        Commands::Runs { config, limit } => cmd_runs(config, limit),
    }
}

fn cmd_check(path: PathBuf) -> Result<(), Error> {
    let options = ListenerOptions::load(&path)?;
    let listener = XhprofListener::from_options(&options)?;
    let config = listener.config();

    anstream::println!("namespace:   {}", config.app_namespace);
    anstream::println!("flags:       {}", config.flags);
    anstream::println!("ignore:      {}", config.ignore_list.join(","));
    anstream::println!("report url:  {}", config.report_base_url);
    anstream::println!("profiler:    {}", listener.profiler().library().display());
    anstream::println!("runs:        {}", listener.store().dir().display());
    eprintln!("configuration ok");
    Ok(())
}

fn cmd_runs(path: PathBuf, limit: Option<usize>) -> Result<(), Error> {
    let options = ListenerOptions::load(&path)?;
    let listener = XhprofListener::from_options(&options)?;
    let config = listener.config();

    let runs = listener.store().list(&config.app_namespace)?;
    if runs.is_empty() {
        eprintln!(
            "no runs stored for '{}' in {}",
            config.app_namespace,
            listener.store().dir().display()
        );
        return Ok(());
    }
    for stored in runs.iter().take(limit.unwrap_or(usize::MAX)) {
        anstream::println!(" * {}\n   {}", stored.run, config.report_reference(&stored.run));
    }
    Ok(())
}
