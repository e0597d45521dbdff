mod cli;
mod console;
mod log;

use aish_core::{Assistant, Config, DiskPromptLibrary, SessionContext, Shutdown, StdoutSink};
use aish_shell::{Link, WrapSession};
use clap::Parser;
use cli::{Cli, Commands, GlobalOptions};
use log::{Level, LogTarget};
use miette::{IntoDiagnostic, Result, WrapErr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

fn load_config(options: &GlobalOptions) -> Result<Config> {
    let path = options.config.clone().or_else(Config::default_path);
    match path {
        Some(path) => Config::load(&path)
            .into_diagnostic()
            .wrap_err("Failed to load configuration"),
        None => Ok(Config::default()),
    }
}

fn socket_path(options: &GlobalOptions, config: &Config) -> PathBuf {
    options
        .socket
        .clone()
        .unwrap_or_else(|| config.socket_path())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let options = &cli.global_options;
    let config = load_config(options)?;

    let level = Level::from_flags(options.verbose || config.verbose, options.quiet);
    let target = match (&cli.command, &options.log_file) {
        (_, Some(path)) => LogTarget::File(path.clone()),
        (Commands::Wrap { .. }, None) => LogTarget::File(log::default_log_file()),
        (Commands::Console, None) => LogTarget::Stderr,
    };
    log::init_tracing(level, options.log_format, &target)?;

    let shutdown = Shutdown::new();
    shutdown.install_signals();

    match cli.command {
        Commands::Wrap { command } => {
            let code = wrap(options, &config, command, &shutdown).await?;
            std::process::exit(code as i32);
        }
        Commands::Console => {
            let ctx = console_context(options, &config, &shutdown)?;
            console::run(ctx, &socket_path(options, &config)).await
        }
    }
}

async fn wrap(
    options: &GlobalOptions,
    config: &Config,
    command: Vec<String>,
    shutdown: &Arc<Shutdown>,
) -> Result<u32> {
    let command = if command.is_empty() {
        vec![config.shell()]
    } else {
        command
    };

    let socket = socket_path(options, config);
    let mut session = WrapSession::new(command).shutdown(Arc::clone(shutdown));
    match Link::connect(&socket).await {
        Ok(link) => session = session.link(link),
        Err(e) => warn!("running without a console: {}", e),
    }

    let token = shutdown.cancellation_token();
    session
        .run(&token)
        .await
        .into_diagnostic()
        .wrap_err("Failed to run wrapped session")
}

fn console_context(
    options: &GlobalOptions,
    config: &Config,
    shutdown: &Arc<Shutdown>,
) -> Result<Arc<SessionContext>> {
    let token = options.api_token.clone().or_else(|| config.api_token.clone());
    let assistant = Assistant::select(token, None)
        .into_diagnostic()
        .wrap_err("Failed to configure the assistant")?;

    let prompts = DiskPromptLibrary::open(config.prompt_library_path(), &StdoutSink)
        .into_diagnostic()
        .wrap_err("Failed to load the prompt library")?;
    info!("loaded prompt library from {}", prompts.path().display());

    let ctx = SessionContext::builder(assistant, Arc::new(prompts))
        .shutdown(Arc::clone(shutdown))
        .output(Arc::new(StdoutSink))
        .verbose(options.verbose || config.verbose)
        .console_mode()
        .build();
    Ok(Arc::new(ctx))
}
