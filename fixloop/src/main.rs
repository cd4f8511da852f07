//! Bounded test/auto-fix loop with repair escalation.
//!
//! Runs the project's tests; on failure runs the formatter and linter and
//! tries again. When those stop changing anything, writes a repair prompt to
//! `.fixloop/prompt.md` (and, in agent mode, applies the diff an LLM returns).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use fixloop::exit_codes;
use fixloop::io::init::{InitOptions, init_fixloop};
use fixloop::logging;
use fixloop::run::{RunOptions, run_fixloop};

#[derive(Parser, Debug)]
#[command(
    name = "fixloop",
    version,
    about = "Run tests, auto-fix, retry, then escalate to a repair agent"
)]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Config file (defaults to `<root>/.fixloop/config.toml`).
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write `.fixloop/config.toml` with defaults and `.fixloop/.gitignore`.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    match cli.command {
        Some(Command::Init { force }) => {
            let paths = init_fixloop(&root, &InitOptions { force })?;
            println!("wrote {}", paths.config_path.display());
            Ok(exit_codes::OK)
        }
        None => run_fixloop(&RunOptions {
            root,
            config_path: cli.config,
        }),
    }
}
