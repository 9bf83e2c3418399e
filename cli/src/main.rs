//! `harness` - launch, replay, and resolve sandboxed test invocations.
//!
//! ```text
//! harness launch --build-root DIR --build-id ID --config-name NAME [...]
//! harness replay EVENT_FILE
//! harness resolve --sandbox-root DIR -- ARGS...
//! ```
//!
//! Logs go to stderr; stdout carries only command results.

mod report;
mod sandbox;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use harness_config::{
    HarnessConfig, LauncherSettings, SandboxConfigurationResolver, TomlConfigurationFactory,
};
use harness_core::{
    CollectingListener, FileMetadataCollector, InvocationContext, InvocationListener,
    LogSaverListener, ResultForwarder,
};
use harness_launcher::{LauncherOptions, SubprocessTestLauncher};
use harness_protocol::EventStreamParser;
use harness_runner::RunUtil;
use harness_types::{BuildInfo, DEFAULT_TEST_TAG};

use crate::report::{DirectoryLogSaver, LoggingListener, SavingListener, print_summary};
use crate::sandbox::DirectorySandbox;

#[derive(Debug, Parser)]
#[command(
    name = "harness",
    version,
    about = "Run test configurations in sandboxed child invocations"
)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Settings file to use instead of ~/.harness/config.toml.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a configuration in a child invocation and relay its results.
    Launch(LaunchArgs),
    /// Replay a side-channel event file and summarise it.
    Replay {
        event_file: PathBuf,
    },
    /// Resolve a configuration through a sandbox environment rooted at a directory.
    Resolve {
        #[arg(long)]
        sandbox_root: PathBuf,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Debug, Args)]
struct LaunchArgs {
    /// Root of the unpacked build the child runs from.
    #[arg(long)]
    build_root: PathBuf,
    #[arg(long)]
    build_id: String,
    #[arg(long, default_value = DEFAULT_TEST_TAG)]
    test_tag: String,
    #[arg(long)]
    branch: Option<String>,
    #[arg(long)]
    build_flavor: Option<String>,
    #[arg(long)]
    config_name: String,
    /// Wall-clock budget for the child, in minutes.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    max_run_time: Option<u64>,
    #[arg(long)]
    remote_debug: bool,
    #[arg(long)]
    interpreter: Option<String>,
    #[arg(long)]
    entry_point: Option<String>,
    #[arg(long)]
    use_virtual_device: bool,
    #[arg(long)]
    sub_branch: Option<String>,
    #[arg(long)]
    sub_build_flavor: Option<String>,
    #[arg(long)]
    sub_build_id: Option<String>,
    #[arg(long = "sub-apk-path")]
    sub_apk_paths: Vec<String>,
    /// Save forwarded logs and their metadata into this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl LaunchArgs {
    fn build_info(&self) -> BuildInfo {
        let mut build = BuildInfo::new(&self.build_id)
            .with_test_tag(&self.test_tag)
            .with_root_dir(&self.build_root);
        build.branch.clone_from(&self.branch);
        build.flavor.clone_from(&self.build_flavor);
        build
    }

    /// Flags first, then the settings file, then built-in defaults.
    fn options(&self, settings: &LauncherSettings) -> LauncherOptions {
        let defaults = LauncherOptions::default();
        let apk_paths = if self.sub_apk_paths.is_empty() {
            settings.sub_apk_paths.clone()
        } else {
            self.sub_apk_paths.clone()
        };
        LauncherOptions {
            config_name: Some(self.config_name.clone()),
            max_run_time_minutes: self
                .max_run_time
                .or(settings.max_run_time_minutes)
                .unwrap_or(defaults.max_run_time_minutes),
            remote_debug: self.remote_debug || settings.remote_debug.unwrap_or(false),
            interpreter: self
                .interpreter
                .clone()
                .or_else(|| settings.interpreter.clone())
                .unwrap_or(defaults.interpreter),
            entry_point: self
                .entry_point
                .clone()
                .or_else(|| settings.entry_point.clone())
                .unwrap_or(defaults.entry_point),
            use_virtual_device: self.use_virtual_device
                || settings.use_virtual_device.unwrap_or(false),
            sub_branch: self.sub_branch.clone().or_else(|| settings.sub_branch.clone()),
            sub_build_flavor: self
                .sub_build_flavor
                .clone()
                .or_else(|| settings.sub_build_flavor.clone()),
            sub_build_id: self
                .sub_build_id
                .clone()
                .or_else(|| settings.sub_build_id.clone()),
            sub_apk_paths: apk_paths,
        }
    }
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn load_settings(path: Option<&Path>) -> Result<HarnessConfig> {
    match path {
        Some(path) => HarnessConfig::load_from(path),
        None => HarnessConfig::load(),
    }
    .context("loading harness settings")
}

async fn launch(args: LaunchArgs, settings: &HarnessConfig) -> Result<ExitCode> {
    let options = args.options(&settings.launcher);
    let runner = Arc::new(RunUtil::new());
    let context = Arc::new(InvocationContext::new());

    let mut launcher = SubprocessTestLauncher::new(options, runner);
    launcher.set_build(args.build_info());
    launcher.set_invocation_context(context.clone());

    let collector = Arc::new(CollectingListener::new());
    let mut forwarder = ResultForwarder::new(vec![
        Arc::new(LoggingListener) as Arc<dyn InvocationListener>,
        collector.clone(),
    ]);
    if let Some(dir) = &args.log_dir {
        let saver = Arc::new(DirectoryLogSaver::create(dir)?);
        let metadata = Arc::new(FileMetadataCollector::new());
        metadata.set_log_saver(saver.clone());
        forwarder.push(Arc::new(SavingListener::new(
            saver,
            vec![metadata as Arc<dyn LogSaverListener>],
        )));
    }

    let started = Instant::now();
    forwarder.invocation_started(&context);
    let outcome = launcher.run(&forwarder).await;
    if let Err(e) = &outcome {
        forwarder.invocation_failed(&e.to_string());
    }
    context.lock_attributes();
    forwarder.invocation_ended(started.elapsed());

    print_summary(&collector, &context);
    outcome.context("subprocess invocation failed")?;
    Ok(ExitCode::SUCCESS)
}

/// Replay `event_file`; `false` when any replayed test failed.
fn replay(event_file: &Path) -> bool {
    let context = InvocationContext::new();
    let collector = Arc::new(CollectingListener::new());
    let forwarder = ResultForwarder::new(vec![
        Arc::new(LoggingListener) as Arc<dyn InvocationListener>,
        collector.clone(),
    ]);

    let summary = EventStreamParser::new(&forwarder)
        .with_context(&context)
        .parse_file(event_file);
    println!(
        "replayed {} records, skipped {}",
        summary.replayed, summary.skipped
    );
    print_summary(&collector, &context);
    collector.total_failed() == 0
}

async fn resolve(sandbox_root: PathBuf, args: &[String], settings: &HarnessConfig) -> Result<()> {
    let resolver = SandboxConfigurationResolver::new(
        Arc::new(TomlConfigurationFactory::new()),
        Arc::new(settings.sandbox.dumper()),
    );
    let sandbox = Arc::new(DirectorySandbox::new(sandbox_root));
    let runner = RunUtil::new();

    let config = resolver
        .resolve(args, None, sandbox, &runner)
        .await
        .context("resolving sandbox configuration")?;

    println!("{}", config.name());
    println!("command line: {}", config.command_line().join(" "));
    for (key, values) in config.options() {
        println!("  {key} = {}", values.join(","));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let settings = load_settings(cli.settings.as_deref())?;

    match cli.command {
        Commands::Launch(args) => launch(args, &settings).await,
        Commands::Replay { event_file } => Ok(if replay(&event_file) {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }),
        Commands::Resolve { sandbox_root, args } => {
            resolve(sandbox_root, &args, &settings).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
