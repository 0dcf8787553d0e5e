//! caproute CLI.
//!
//! Exit codes: 0 success, 1 resolution error (no match / max depth),
//! 2 dispatch error, 3 registry/startup error.

use anyhow::{anyhow, Context as _, Result};
use caproute::{
    load_tree, Config, RouteError, Router, TaskRequest,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

const EXIT_RESOLVE: u8 = 1;
const EXIT_DISPATCH: u8 = 2;
const EXIT_REGISTRY: u8 = 3;

#[derive(Parser)]
#[command(name = "caproute", about = "Hierarchical capability router", version)]
struct Cli {
    /// Directory scanned for SKILL.md definitions
    #[arg(long, global = true, env = "CAPROUTE_SKILLS_DIR")]
    skills_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a task description and invoke the matched handler
    Route {
        /// The task description to route
        text: String,
        /// Pre-classified hints, e.g. --hint domain=devops
        #[arg(long = "hint", value_name = "KEY=VALUE")]
        hints: Vec<String>,
        /// Dispatch timeout override in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Print the full report as JSON instead of human-readable output
        #[arg(long)]
        json: bool,
    },
    /// Check the skill tree for structural errors without routing
    Validate,
    /// List registered skills
    Skills,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(EXIT_REGISTRY)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::load()?;
    if cli.skills_dir.is_some() {
        config.skills_dir = cli.skills_dir;
    }
    let skills_dir = config
        .skills_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("skills"));

    let loaded = load_tree(&skills_dir)?;
    for (path, err) in &loaded.parse_errors {
        eprintln!("warning: skipped {}: {}", path.display(), err);
    }

    match cli.command {
        Command::Validate => {
            match loaded.registry.validate() {
                Ok(()) => {
                    println!(
                        "ok: {} skills, {} parse warnings",
                        loaded.registry.len(),
                        loaded.parse_errors.len()
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Err(errors) => {
                    for e in &errors {
                        eprintln!("invalid: {}", e);
                    }
                    Ok(ExitCode::from(EXIT_REGISTRY))
                }
            }
        }
        Command::Skills => {
            for (node, depth) in loaded.registry.walk() {
                println!(
                    "{}{}: {}",
                    "  ".repeat(depth),
                    node.id,
                    node.description
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Route {
            text,
            hints,
            timeout_ms,
            json,
        } => {
            if let Err(errors) = loaded.registry.validate() {
                for e in &errors {
                    eprintln!("invalid: {}", e);
                }
                return Ok(ExitCode::from(EXIT_REGISTRY));
            }
            if let Some(ms) = timeout_ms {
                config.dispatch.timeout_ms = ms;
            }

            let mut request = TaskRequest::new(&text);
            for hint in &hints {
                let (key, value) = parse_hint(hint)?;
                request = request.with_hint(key, value);
            }

            let router = Router::new(loaded.registry, Arc::new(loaded.handlers), &config)?;
            match router.route_and_dispatch(&request) {
                Ok(report) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    } else {
                        println!("path: {}", report.path.join(" -> "));
                        println!("confidence: {:.3}", report.confidence);
                        for alt in &report.alternatives {
                            println!("alternative: {} ({:.3})", alt.id, alt.score);
                        }
                        if let Some(instructions) =
                            report.payload.get("instructions").and_then(|v| v.as_str())
                        {
                            println!("\n{}", instructions);
                        } else {
                            println!("{}", report.payload);
                        }
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(RouteError::Resolve(e)) => {
                    eprintln!("{} (path: {})", e, e.path().join(" -> "));
                    Ok(ExitCode::from(EXIT_RESOLVE))
                }
                Err(RouteError::Dispatch { source, resolution }) => {
                    eprintln!("{} (path: {})", source, resolution.path.join(" -> "));
                    Ok(ExitCode::from(EXIT_DISPATCH))
                }
            }
        }
    }
}

fn parse_hint(s: &str) -> Result<(&str, &str)> {
    s.split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .ok_or_else(|| anyhow!("hint must be KEY=VALUE, got `{}`", s))
        .context("parsing --hint")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hint() {
        assert_eq!(parse_hint("domain=devops").unwrap(), ("domain", "devops"));
        assert_eq!(parse_hint(" lang = rust ").unwrap(), ("lang", "rust"));
        assert!(parse_hint("no-equals").is_err());
        assert!(parse_hint("=value").is_err());
    }
}
