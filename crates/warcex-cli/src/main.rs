//! WARCex CLI entry point.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use warcex::CancelToken;
use warcex_cli::commands::{run_extract, run_info, run_list, CliError, ExitStatus, ExtractOptions};
use warcex_cli::config::{resolve_extractor_dir, resolve_output_root};

#[derive(Parser)]
#[command(
    name = "warcex",
    about = "Extract structured records from WACZ and WARC web archives",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay one or more archives through extractors.
    Extract {
        /// WACZ, WARC or WARC.GZ files to process.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Extractor to run: a built-in name, a manifest name or a manifest path.
        /// Repeat to run several. Defaults to every built-in extractor.
        #[arg(short = 'e', long = "extractor")]
        extractors: Vec<String>,

        /// Output directory. Also reads from WARCEX_OUTPUT.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List available extractors.
    List,

    /// Show details of one extractor, by name or list number.
    Info {
        /// Extractor name, part of a name, or number from `warcex list`.
        name: String,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   warcex completions bash > ~/.local/share/bash-completion/completions/warcex
    ///   warcex completions zsh > ~/.zfunc/_warcex
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Exit code 2 means "nothing to do", so argument errors exit with 1.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                ExitStatus::Fatal.code()
            } else {
                ExitStatus::Success.code()
            };
            e.print()?;
            std::process::exit(code);
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let status = match cli.command {
        Commands::Extract {
            inputs,
            extractors,
            output,
        } => {
            let options = ExtractOptions {
                inputs,
                extractors,
                output_root: resolve_output_root(output.as_deref()),
                extractor_dir: resolve_extractor_dir(),
                json: cli.json,
            };

            let cancel = CancelToken::new();
            let signal_token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, finishing extractors with the pairs read so far");
                    signal_token.cancel();
                }
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(ExitStatus::Cancelled.code());
                }
            });

            tokio::task::spawn_blocking(move || run_extract(&options, cancel)).await??
        }

        Commands::List => run_list(&resolve_extractor_dir(), cli.json)?,

        Commands::Info { name } => match run_info(&resolve_extractor_dir(), &name, cli.json) {
            Ok(status) => status,
            Err(e @ CliError::UnknownExtractor { .. }) => {
                eprintln!("{e}");
                ExitStatus::Fatal
            }
            Err(e) => return Err(e.into()),
        },

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "warcex", &mut std::io::stdout());
            ExitStatus::Success
        }
    };

    if status != ExitStatus::Success {
        std::process::exit(status.code());
    }
    Ok(())
}
