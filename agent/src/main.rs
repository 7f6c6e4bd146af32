//! LLM-powered CAD automation agent.
//!
//! Turns a natural-language design requirement into a working CAD script
//! through repeated generate, execute, render, analyze cycles. The final
//! report is serialized as JSON to stdout; run artifacts land under the
//! configured workspace directory.

use std::fs;
use std::path::{Path, PathBuf};

use agent::cancel::CancelToken;
use agent::config::{AppConfig, load_config, write_config};
use agent::exit_codes;
use agent::pipeline::Pipeline;
use agent::report::RunStatus;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "agent", version, about = "LLM-powered CAD automation agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the generation loop for a requirement and print the report JSON.
    Run {
        /// The design requirement, or a path to a text file containing it.
        requirement: String,
        /// Interpret the requirement argument as a file path.
        #[arg(long)]
        file: bool,
        /// Path to the TOML configuration file.
        #[arg(long, default_value = "agent.toml")]
        config: PathBuf,
    },
    /// Write a default configuration file.
    InitConfig {
        /// Destination path.
        #[arg(default_value = "agent.toml")]
        path: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    agent::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::ERROR);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            requirement,
            file,
            config,
        } => cmd_run(&requirement, file, &config),
        Command::InitConfig { path, force } => cmd_init_config(&path, force),
    }
}

fn cmd_run(requirement_arg: &str, is_file: bool, config_path: &Path) -> Result<i32> {
    let requirement = load_requirement(requirement_arg, is_file)?;
    let config = load_config(config_path)?;
    let pipeline = Pipeline::new(config)?;

    let cancel = CancelToken::new();
    let report = pipeline.run(&requirement, &cancel, |record| {
        info!(
            index = record.index,
            outcome = ?record.outcome,
            "iteration finished"
        );
    })?;

    let json = serde_json::to_string_pretty(&report).context("serialize report")?;
    println!("{json}");

    Ok(match report.status {
        RunStatus::Succeeded => exit_codes::OK,
        RunStatus::Exhausted => exit_codes::EXHAUSTED,
        RunStatus::Cancelled => exit_codes::CANCELLED,
        RunStatus::FatalError => exit_codes::ERROR,
    })
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    write_config(path, &AppConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

/// Treat the argument as a file path when asked to, or when it names an
/// existing file; otherwise it is the requirement text itself.
fn load_requirement(arg: &str, is_file: bool) -> Result<String> {
    let path = Path::new(arg);
    if is_file || path.is_file() {
        return fs::read_to_string(path)
            .with_context(|| format!("read requirement file {}", path.display()));
    }
    Ok(arg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run() {
        let cli = Cli::parse_from(["agent", "run", "box 10x10x10"]);
        match cli.command {
            Command::Run {
                requirement, file, ..
            } => {
                assert_eq!(requirement, "box 10x10x10");
                assert!(!file);
            }
            Command::InitConfig { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn parse_init_config_force() {
        let cli = Cli::parse_from(["agent", "init-config", "--force"]);
        assert!(matches!(
            cli.command,
            Command::InitConfig { force: true, .. }
        ));
    }

    #[test]
    fn requirement_argument_passes_through() {
        let text = load_requirement("box 10x10x10", false).expect("requirement");
        assert_eq!(text, "box 10x10x10");
    }

    #[test]
    fn requirement_file_is_read() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("brief.txt");
        fs::write(&path, "a bracket with two holes").expect("write");
        let text = load_requirement(path.to_str().expect("utf8"), true).expect("requirement");
        assert_eq!(text, "a bracket with two holes");
    }
}
