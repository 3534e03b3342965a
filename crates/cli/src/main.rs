mod config;
mod error;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use runtime::Decision;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{Error, Result};

#[derive(Parser)]
#[command(name = "governess")]
#[command(about = "Inspect and query declarative sandbox rules", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide whether an action is allowed on a perimeter
    Check {
        /// Sandbox description (TOML)
        config: PathBuf,
        /// Perimeter name
        perimeter: String,
        /// Action name
        action: String,
        /// Call arguments; each is parsed as JSON, falling back to a string
        args: Vec<String>,
    },
    /// List the rules each perimeter declares
    Rules {
        /// Sandbox description (TOML)
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            config,
            perimeter,
            action,
            args,
        } => cmd_check(&config, &perimeter, &action, &args),
        Commands::Rules { config } => cmd_rules(&config),
    }
}

fn cmd_check(path: &Path, perimeter: &str, action: &str, raw_args: &[String]) -> Result<ExitCode> {
    let sandbox = Config::load(path)?.build()?;
    if !sandbox.has_perimeter(perimeter) {
        return Err(Error::UnknownPerimeter(perimeter.to_string()));
    }

    let args: Vec<Value> = raw_args.iter().map(String::as_str).map(parse_arg).collect();
    tracing::debug!(perimeter, action, ?args, "checking action");

    let decision = sandbox.purpose(perimeter)?.decide(action, &args)?;
    println!("{}", decision.explain());
    Ok(exit_code(&decision))
}

fn cmd_rules(path: &Path) -> Result<ExitCode> {
    let sandbox = Config::load(path)?.build()?;
    let perimeters = sandbox.perimeters();

    if perimeters.is_empty() {
        println!("No perimeters declared.");
        return Ok(ExitCode::SUCCESS);
    }

    println!("main governess: {}", sandbox.governess().strategy_name());
    for perimeter in perimeters {
        let governess = perimeter
            .own_governess()
            .map(|g| g.strategy_name())
            .unwrap_or("inherited");
        println!("\n{} ({governess})", perimeter.name());
        println!("{}", "-".repeat(60));
        for rule in perimeter.rules() {
            println!(
                "  {:<32} {:<10} {}",
                rule.text(),
                rule.kind().to_string(),
                if rule.is_strict() { "strict" } else { "" }
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn exit_code(decision: &Decision) -> ExitCode {
    if decision.is_allowed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}

/// JSON if it parses, otherwise the raw string.
fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
