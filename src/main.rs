use anyhow::{Context, Result};
use clap::Parser;
use pilet_orchestrator::config::{
    AppIdentity, DEFAULT_APP_NAME, DEFAULT_APP_VERSION, DEFAULT_TARGET_FRAMEWORK, HostConfig,
};
use pilet_orchestrator::framework::TargetFramework;
use pilet_orchestrator::host::{Host, PackageDirs};
use pilet_orchestrator::runtime::RealRuntime;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// pilet-orchestrator - micro-frontend package host
///
/// Discovers component packages (pilets) from local build output and
/// component archives, loads each in its own isolated context and exposes
/// their content and a debug surface over HTTP.
///
/// Examples:
///   pilet-orchestrator serve --local ./pilets --archives ./feed
///   pilet-orchestrator inspect --archives ./feed
#[derive(Parser, Debug)]
#[command(author, version = env!("PILET_ORCHESTRATOR_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Target framework library items are resolved against
    #[arg(
        long = "target-framework",
        env = "PILET_TARGET_FRAMEWORK",
        value_name = "MONIKER",
        default_value = DEFAULT_TARGET_FRAMEWORK,
        global = true
    )]
    pub target_framework: TargetFramework,

    /// Local archive cache for dependencies of local packages
    /// (defaults to $NUGET_PACKAGES or ~/.nuget/packages)
    #[arg(
        long = "archive-cache",
        env = "PILET_ARCHIVE_CACHE",
        value_name = "PATH",
        global = true
    )]
    pub archive_cache: Option<PathBuf>,

    /// Name reported for the hosting application
    #[arg(
        long = "app-name",
        env = "PILET_APP_NAME",
        value_name = "NAME",
        default_value = DEFAULT_APP_NAME,
        global = true
    )]
    pub app_name: String,

    /// Version reported for the hosting application
    #[arg(
        long = "app-version",
        env = "PILET_APP_VERSION",
        value_name = "VERSION",
        default_value = DEFAULT_APP_VERSION,
        global = true
    )]
    pub app_version: String,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve package content and the debug surface
    Serve(ServeArgs),

    /// Print the debug snapshot of the discovered packages
    Inspect(SourceArgs),
}

#[derive(clap::Args, Debug)]
pub struct SourceArgs {
    /// Directory searched recursively for local build output
    #[arg(long = "local", value_name = "DIR")]
    pub local: Vec<PathBuf>,

    /// Directory holding component archives
    #[arg(long = "archives", value_name = "DIR")]
    pub archives: Vec<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long = "bind", value_name = "ADDR", default_value = "127.0.0.1:5000")]
    pub bind: SocketAddr,

    #[command(flatten)]
    pub sources: SourceArgs,
}

impl SourceArgs {
    fn into_dirs(self) -> PackageDirs {
        PackageDirs {
            local: self.local,
            archives: self.archives,
        }
    }
}

fn host_config(cli: &Cli, runtime: &RealRuntime) -> Result<HostConfig> {
    let archive_cache = match &cli.archive_cache {
        Some(path) => path.clone(),
        None => HostConfig::default_archive_cache(runtime)
            .context("Cannot determine the archive cache; pass --archive-cache")?,
    };
    Ok(HostConfig::new(
        AppIdentity::new(&cli.app_name, &cli.app_version),
        cli.target_framework.clone(),
        archive_cache,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = RealRuntime;
    let config = host_config(&cli, &runtime)?;

    match cli.command {
        Commands::Serve(args) => {
            let dirs = args.sources.into_dirs();
            let host = tokio::task::spawn_blocking(move || {
                Host::start(Arc::new(runtime), config, dirs)
            })
            .await?;
            let listener = pilet_orchestrator::server::bind(args.bind).await?;
            pilet_orchestrator::server::serve(listener, host.connector).await?
        }
        Commands::Inspect(args) => {
            let host = Host::start(Arc::new(runtime), config, args.into_dirs());
            let state = host.connector.snapshot();
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
    }
    Ok(())
}
