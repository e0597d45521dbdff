use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LogFormat {
    /// A verbose structured log format used for debugging (default).
    #[default]
    Full,
    /// A JSON log format used for machine consumption.
    Json,
}

#[derive(Clone, Debug, clap::Args)]
pub struct GlobalOptions {
    #[arg(short, long, global = true, help = "Enable additional debug logs.")]
    pub verbose: bool,

    #[arg(
        short,
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Silence all logs"
    )]
    pub quiet: bool,

    #[arg(
        long,
        global = true,
        env = "AISH_CONFIG",
        help = "Path to aish.yaml. Defaults to $XDG_CONFIG_HOME/aish/aish.yaml."
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "AISH_SOCKET",
        help = "Console socket shared by wrapped sessions and the console."
    )]
    pub socket: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "AISH_API_TOKEN",
        hide_env_values = true,
        help = "API token for the hosted assistant."
    )]
    pub api_token: Option<String>,

    #[arg(
        long,
        global = true,
        env = "AISH_LOG_FORMAT",
        help = "Configure the output format of logs.",
        default_value_t,
        value_enum
    )]
    pub log_format: LogFormat,

    #[arg(
        long,
        global = true,
        help = "Write logs to this file. Wrapped sessions log to $XDG_STATE_HOME/aish/aish.log by default."
    )]
    pub log_file: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(
    name = "aish",
    version,
    about = "Wrap an interactive shell and share it with an assistant console.",
    dont_delimit_trailing_values = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global_options: GlobalOptions,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    #[command(about = "Run a command under a pty and link it to the console. Defaults to $SHELL.")]
    Wrap {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    #[command(about = "Host the console that wrapped sessions connect to.")]
    Console,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wrap_takes_trailing_command() {
        let cli = Cli::try_parse_from(["aish", "wrap", "--", "bash", "-l"]).unwrap();
        match cli.command {
            Commands::Wrap { command } => assert_eq!(command, vec!["bash", "-l"]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_wrap_without_command() {
        let cli = Cli::try_parse_from(["aish", "wrap"]).unwrap();
        assert!(matches!(cli.command, Commands::Wrap { command } if command.is_empty()));
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli =
            Cli::try_parse_from(["aish", "console", "--socket", "/tmp/a.sock", "-v"]).unwrap();
        assert!(cli.global_options.verbose);
        assert_eq!(
            cli.global_options.socket,
            Some(PathBuf::from("/tmp/a.sock"))
        );
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["aish", "-v", "-q", "console"]).is_err());
    }

    #[test]
    fn test_json_log_format() {
        let cli = Cli::try_parse_from(["aish", "--log-format", "json", "console"]).unwrap();
        assert_eq!(cli.global_options.log_format, LogFormat::Json);
    }
}
