use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "sandpool")]
#[command(
    author,
    version,
    about = "Run untrusted code snippets in pools of pre-started container sandboxes"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file (defaults to ./sandpool.toml, then the user config dir)
    #[arg(short, long, global = true, env = "SANDPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Sandboxes to start per language (overrides config)
    #[arg(long, global = true)]
    count: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull every configured language image
    Pull,

    /// Run one snippet and print its output
    Exec {
        /// Language to run the code as
        #[arg(short, long)]
        language: String,

        /// Code to run
        #[arg(long, required_unless_present = "file", conflicts_with = "file")]
        code: Option<String>,

        /// File containing the code to run
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Run a JSON-lines file of {"language", "code"} jobs concurrently
    Batch {
        /// Job file
        file: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("sandpool=debug")
        } else {
            EnvFilter::new("sandpool=info")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let config = commands::load_config(cli.config.as_deref(), cli.count)?;

    let success = match cli.command {
        Commands::Pull => {
            commands::pull::run(&config).await?;
            true
        }
        Commands::Exec {
            language,
            code,
            file,
        } => {
            let source = match (code, file) {
                (Some(code), _) => commands::exec::Source::Inline(code),
                (None, Some(file)) => commands::exec::Source::File(file),
                (None, None) => anyhow::bail!("one of --code or --file is required"),
            };
            commands::exec::run(&config, &language, source).await?
        }
        Commands::Batch { file } => commands::batch::run(&config, &file).await?,
        Commands::Config => {
            commands::config::run(&config)?;
            true
        }
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
