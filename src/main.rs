use anyhow::{Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::{EnvFilter, fmt};

mod commands;
mod config;
mod resources;
mod tooling;
mod ui;
mod utils;

use commands::migrate;
use config::Config;
use tooling::Toolbox;
use utils::process::ProcessRunner;

pub struct AppCtx {
    pub cfg: Config,
    pub kubeconfig: PathBuf,
    pub tools: Toolbox,
}

#[derive(Parser, Debug)]
#[command(
    name = "pvmigrate",
    about = "Migrate in-tree Azure Disk persistent volumes to the CSI driver",
    arg_required_else_help = false,
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Defaults to $HOME/.kube/config.
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    #[arg(long, global = true)]
    debug: bool,

    #[arg(long, global = true)]
    check_config: bool,

    #[arg(long, global = true)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Migrate every eligible volume of a storage class.
    Run(migrate::RunArgs),
    /// Show which volumes a run would migrate.
    Plan(migrate::PlanArgs),
}

fn init_tracing(debug: bool) {
    let default = if debug { "trace" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(debug)
        .with_line_number(debug)
        .without_time()
        .try_init();
}

fn resolve_kubeconfig(flag: Option<PathBuf>) -> Result<PathBuf> {
    let path = match flag {
        Some(p) => p,
        None => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(".kube").join("config"),
            None => bail!("HOME is not set; pass --kubeconfig"),
        },
    };
    if !path.is_file() {
        bail!("kubeconfig {} does not exist", path.display());
    }
    Ok(path)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if cli.command.is_none() && !cli.check_config && !cli.print_config {
        let mut cmd = Cli::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    }
    let cfg = Config::load(cli.config.as_deref())?;

    if cli.check_config {
        tracing::info!("config OK");
        return Ok(());
    }
    if cli.print_config {
        println!("{}", cfg.to_toml()?);
        return Ok(());
    }

    let Some(cmd) = cli.command else {
        let mut cmd = Cli::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    let kubeconfig = resolve_kubeconfig(cli.kubeconfig)?;
    let tools = Toolbox::new(&cfg, &kubeconfig, Arc::new(ProcessRunner::new()))?;
    let ctx = AppCtx {
        cfg,
        kubeconfig,
        tools,
    };
    tracing::debug!("using kubeconfig {}", ctx.kubeconfig.display());

    match cmd {
        Cmd::Run(args) => args.run(&ctx),
        Cmd::Plan(args) => args.run(&ctx),
    }
}
