//! hostalias command-line interface.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hostalias::config::{load_or_default, save_config, Config, Directive};
use hostalias::{Controller, DaemonContext, Error, HostTable, HostsFile, Result};

#[derive(Parser)]
#[command(name = "hostalias", version)]
#[command(about = "Friendly local domain names, reverse-proxied to their upstreams", long_about = None)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, env = "HOSTALIAS_CONFIG", default_value = "hostalias.toml", global = true)]
    config: PathBuf,

    /// More logging (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy in the foreground
    Run {
        /// Re-apply the config file when it changes
        #[arg(long)]
        watch: bool,
    },
    /// Start the proxy as a background daemon
    Start {
        /// Append the daemon's output to this file
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Stop the background daemon
    Stop,
    /// Show whether the daemon is running and the current host bindings
    Status,
    /// Apply the config to the running daemon without restarting it
    Reload,
    /// List configured directives
    List,
    /// Add or update a directive
    Set { alias: String, upstream: String },
    /// Remove a directive
    Rm { alias: String },
    /// Remove every hostalias binding from the hosts file
    Clean,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "Command failed");
            eprintln!("error: {e}");
            if matches!(&e, Error::Hosts(hosts) if hosts.is_permission_denied()) {
                eprintln!("hint: the hosts file is usually only writable by root");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "hostalias=info,tower_http=warn",
        1 => "hostalias=debug,tower_http=debug",
        _ => "hostalias=trace,tower_http=trace",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn execute(cli: Cli) -> Result<()> {
    let config = load_or_default(&cli.config)?;

    match cli.command {
        Commands::List => {
            for directive in &config.directives {
                println!("{} -> {}", directive.alias, directive.upstream);
            }
            Ok(())
        }
        Commands::Set { alias, upstream } => set(&cli.config, config, Directive::new(alias, upstream)),
        Commands::Rm { alias } => rm(&cli.config, config, &alias),
        Commands::Clean => {
            let mut hosts = HostsFile::new(&config.hosts.path);
            hosts.clear()?;
            hosts.apply()?;
            println!("removed hostalias entries from {}", hosts.path().display());
            Ok(())
        }
        Commands::Status => {
            let ctl = controller(config, DaemonContext::default());
            match ctl.status() {
                Some(pid) => println!("running (pid {pid})"),
                None => println!("not running"),
            }
            match ctl.hosts().bindings() {
                Ok(bindings) => bindings.iter().for_each(|binding| println!("  {binding}")),
                Err(e) => tracing::warn!(error = %e, "Could not read host bindings"),
            }
            Ok(())
        }
        Commands::Start { log_file } => {
            let mut daemon = DaemonContext::default();
            if let Some(path) = log_file {
                daemon = daemon.with_log_file(absolute(path)?);
            }
            // No runtime yet: start forks.
            let pid = controller(config, daemon).start()?;
            println!("started (pid {pid})");
            Ok(())
        }
        Commands::Run { watch } => {
            let mut ctl = controller(config, DaemonContext::default());
            runtime()?.block_on(async {
                if watch {
                    ctl.run_with_watch(&cli.config).await
                } else {
                    ctl.run().await
                }
            })
        }
        Commands::Stop => {
            let ctl = controller(config, DaemonContext::default());
            runtime()?.block_on(ctl.stop())?;
            println!("stopped");
            Ok(())
        }
        Commands::Reload => {
            let mut ctl = controller(config, DaemonContext::default());
            runtime()?.block_on(ctl.reload())?;
            println!("reloaded");
            Ok(())
        }
    }
}

fn set(path: &Path, mut config: Config, directive: Directive) -> Result<()> {
    let summary = format!("{} -> {}", directive.alias, directive.upstream);
    let updated = config.upsert(directive);
    save_config(path, &config)?;
    println!("{} {summary}", if updated { "updated" } else { "added" });
    Ok(())
}

fn rm(path: &Path, mut config: Config, alias: &str) -> Result<()> {
    if !config.remove(alias) {
        return Err(Error::UnknownAlias(alias.to_string()));
    }
    save_config(path, &config)?;
    println!("removed {alias}");
    Ok(())
}

fn controller(config: Config, daemon: DaemonContext) -> Controller<HostsFile> {
    let hosts = HostsFile::new(&config.hosts.path);
    Controller::new(hosts, config, daemon)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread().enable_all().build()?)
}

/// The daemon changes directory, so relative paths are resolved up front.
fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
