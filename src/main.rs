//! Binary entry point for the Sisyphus CLI.

use std::env;
use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing::error;
use tracing_subscriber::EnvFilter;

use sisyphus::{
    BuildController, BundleConfig, ConfigError, FeedstockPackager, Host, HostError,
    LifecycleError, ProcessCommandRunner, SessionConfig,
};

mod cli;

use cli::{
    BuildCommand, Cli, Command, DownloadCommand, LogCommand, LogLevel, PackageArgs, UploadCommand,
    WatchCommand,
};

type Controller = BuildController<Host<ProcessCommandRunner>>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("could not resolve the destination directory: {0}")]
    Destination(String),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level);
    let exit_code = match dispatch(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            1
        }
    };

    process::exit(exit_code);
}

/// Installs the global subscriber; `RUST_LOG` overrides `--log-level`.
fn init_logging(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);
    if level == LogLevel::Debug {
        builder.init();
    } else {
        builder.without_time().init();
    }
}

async fn dispatch(command: Command) -> Result<i32, CliError> {
    match command {
        Command::Prepare(args) => {
            let lifecycle = connect(&args.host)?;
            lifecycle.prepare()?;
            lifecycle.watch_prepare().await?;
        }
        Command::Build(args) => build(args).await?,
        Command::Watch(args) => watch(args).await?,
        Command::Upload(args) => upload(&args)?,
        Command::Log(args) => log(args).await?,
        Command::Download(args) => download(args).await?,
        Command::Transmute(args) => {
            connect(&args.host.host)?.transmute(&args.package)?;
        }
        Command::Status(args) => status(&args)?,
        Command::Wait(args) => {
            let mut lifecycle = connect(&args.host.host)?;
            if !lifecycle.wait(&args.package).await? {
                return Ok(1);
            }
        }
    }
    Ok(0)
}

fn connect(address: &str) -> Result<Controller, CliError> {
    let config = SessionConfig::load_without_cli_args()?;
    config.validate()?;
    let host = Host::connect(address, &config, ProcessCommandRunner)?;
    Ok(BuildController::new(host))
}

async fn build(args: BuildCommand) -> Result<(), CliError> {
    let config = BundleConfig::load_without_cli_args()?;
    config.validate()?;
    let packager = FeedstockPackager::new(config);
    let lifecycle = connect(&args.target.host.host)?;
    lifecycle
        .build(
            &args.target.package,
            args.branch.as_deref(),
            &packager,
            !args.no_watch,
        )
        .await?;
    Ok(())
}

async fn watch(args: WatchCommand) -> Result<(), CliError> {
    let lifecycle = connect(&args.host.host)?;
    match args.package {
        Some(package) => lifecycle.watch_build(&package).await?,
        None => lifecycle.watch_prepare().await?,
    }
    Ok(())
}

fn upload(args: &UploadCommand) -> Result<(), CliError> {
    let lifecycle = connect(&args.target.host.host)?;
    lifecycle.upload(&args.target.package, &args.channel, &args.token)?;
    Ok(())
}

async fn log(args: LogCommand) -> Result<(), CliError> {
    let mut lifecycle = connect(&args.target.host.host)?;
    let text = lifecycle.log(&args.target.package, !args.no_wait).await?;
    write!(io::stdout(), "{text}")?;
    Ok(())
}

async fn download(args: DownloadCommand) -> Result<(), CliError> {
    let destination = resolve_destination(args.destination)?;
    let mut lifecycle = connect(&args.target.host.host)?;
    lifecycle
        .download(&args.target.package, &destination, args.all)
        .await?;
    Ok(())
}

fn resolve_destination(destination: Option<String>) -> Result<Utf8PathBuf, CliError> {
    if let Some(dir) = destination {
        return Ok(Utf8PathBuf::from(dir));
    }
    let cwd = env::current_dir().map_err(|err| CliError::Destination(err.to_string()))?;
    Utf8PathBuf::from_path_buf(cwd).map_err(|path| CliError::Destination(path.display().to_string()))
}

fn status(args: &PackageArgs) -> Result<(), CliError> {
    let state = connect(&args.host.host)?.status(&args.package)?;
    writeln!(io::stdout(), "{state}")?;
    Ok(())
}
