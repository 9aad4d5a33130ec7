//! strata command-line front end.
//!
//! Loads a stack manifest, runs a build and renders the outputs. Results go
//! to the given writer (stdout in the binary); logs go to stderr.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{eyre, Result, WrapErr};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use strata_core::{EdgeKind, ResourceId};
use strata_plan::{ProvisioningPlan, Stack, StackManifest};
use strata_policy::{DestinationPolicy, NetworkPolicy};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

/// Command line
#[derive(Debug, Parser)]
#[command(name = "strata")]
#[command(about = "strata - resource graph planner and network policy compiler", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "STRATA_LOG", default_value = "info")]
    pub log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true, env = "STRATA_LOG_JSON")]
    pub log_json: bool,

    /// Result format
    #[arg(long, global = true, value_enum, env = "STRATA_FORMAT", default_value = "text")]
    pub format: OutputFormat,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build the provisioning plan
    Plan {
        /// Stack manifest (.yaml, .yml or .json)
        manifest: PathBuf,
    },
    /// Show the compiled network policy
    Policy {
        /// Stack manifest
        manifest: PathBuf,
        /// Only show one destination
        #[arg(short, long)]
        destination: Option<String>,
    },
    /// Validate a manifest without printing the plan
    Check {
        /// Stack manifest
        manifest: PathBuf,
    },
    /// List cycles among edges of one kind
    Cycles {
        /// Stack manifest
        manifest: PathBuf,
        /// Edge kind: structural or network
        #[arg(short, long, default_value = "structural")]
        edges: EdgeKind,
    },
}

/// Install the tracing subscriber, writing to stderr
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed
pub fn init_logging(cli: &Cli) -> Result<()> {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if cli.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|e| eyre!("cannot install log subscriber: {e}"))
}

/// Run a parsed command line, writing results to `out`
///
/// # Errors
///
/// Returns the manifest, build or I/O error with context
pub fn run(cli: &Cli, out: &mut impl Write) -> Result<()> {
    match &cli.command {
        Command::Plan { manifest } => {
            let stack = load(manifest)?;
            let output = stack.build()?;
            match cli.format {
                OutputFormat::Json => write_json(out, &output)?,
                OutputFormat::Text => render_plan(out, &output.plan)?,
            }
        }
        Command::Policy {
            manifest,
            destination,
        } => {
            let stack = load(manifest)?;
            let policy = stack.compile_policy()?;
            match destination {
                Some(destination) => {
                    let entry = policy.for_destination(destination)?;
                    match cli.format {
                        OutputFormat::Json => write_json(out, entry)?,
                        OutputFormat::Text => render_destination(out, entry)?,
                    }
                }
                None => match cli.format {
                    OutputFormat::Json => write_json(out, &policy)?,
                    OutputFormat::Text => render_policy(out, &policy)?,
                },
            }
        }
        Command::Check { manifest } => {
            let stack = load(manifest)?;
            let output = stack.build()?;
            let plan = &output.plan;
            match cli.format {
                OutputFormat::Json => write_json(
                    out,
                    &serde_json::json!({
                        "resources": plan.resource_count(),
                        "stages": plan.stages.len(),
                        "bindings": plan.bindings.len(),
                        "rules": output.policy.rule_count(),
                        "fingerprint": plan.fingerprint,
                    }),
                )?,
                OutputFormat::Text => writeln!(
                    out,
                    "ok: {} resources in {} stages, {} bindings, {} rules (fingerprint {})",
                    plan.resource_count(),
                    plan.stages.len(),
                    plan.bindings.len(),
                    output.policy.rule_count(),
                    plan.fingerprint.short()
                )?,
            }
        }
        Command::Cycles { manifest, edges } => {
            let stack = load(manifest)?;
            let cycles = stack.detect_cycles(*edges);
            match cli.format {
                OutputFormat::Json => write_json(out, &cycles)?,
                OutputFormat::Text => render_cycles(out, *edges, &cycles)?,
            }
        }
    }
    Ok(())
}

fn load(path: &Path) -> Result<Stack> {
    let manifest = StackManifest::from_path(path)?;
    let stack = manifest
        .into_stack()
        .wrap_err_with(|| format!("invalid stack in {}", path.display()))?;
    info!(manifest = %path.display(), resources = stack.registry().len(), "loaded stack");
    Ok(stack)
}

fn write_json<T: Serialize + ?Sized>(out: &mut impl Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).wrap_err("cannot encode JSON")?;
    writeln!(out)?;
    Ok(())
}

fn render_plan(out: &mut impl Write, plan: &ProvisioningPlan) -> Result<()> {
    writeln!(out, "plan {}", plan.fingerprint)?;
    for stage in &plan.stages {
        writeln!(out, "stage {}:", stage.index)?;
        for resource in &stage.resources {
            writeln!(out, "  {} ({})", resource.id, resource.kind)?;
            for (name, value) in &resource.attributes {
                writeln!(out, "    {name} = {value}")?;
            }
            for rule in &resource.ingress {
                writeln!(out, "    allow :{} from {}", rule.port, join_ids(rule.sources.iter()))?;
            }
        }
    }
    if !plan.bindings.is_empty() {
        writeln!(out, "bindings:")?;
        for binding in &plan.bindings {
            writeln!(
                out,
                "  {} <- {} (stage {})",
                binding.consumer, binding.producer, binding.available_at_stage
            )?;
        }
    }
    Ok(())
}

fn render_policy(out: &mut impl Write, policy: &NetworkPolicy) -> Result<()> {
    for destination in policy.iter() {
        render_destination(out, destination)?;
    }
    Ok(())
}

fn render_destination(out: &mut impl Write, policy: &DestinationPolicy) -> Result<()> {
    if policy.is_deny_all() {
        writeln!(out, "{}: deny all", policy.destination)?;
        return Ok(());
    }
    writeln!(out, "{}:", policy.destination)?;
    for rule in &policy.rules {
        write!(out, "  :{} from {}", rule.port, join_ids(rule.sources.iter()))?;
        if !rule.labels.is_empty() {
            write!(out, " [{}]", rule.labels.join(", "))?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn render_cycles(out: &mut impl Write, kind: EdgeKind, cycles: &[Vec<ResourceId>]) -> Result<()> {
    if cycles.is_empty() {
        writeln!(out, "no {kind} cycles")?;
        return Ok(());
    }
    for cycle in cycles {
        let first = cycle.first().map(ResourceId::as_str).unwrap_or_default();
        writeln!(out, "{} -> {first}", join_with(cycle.iter(), " -> "))?;
    }
    Ok(())
}

fn join_ids<'a>(ids: impl Iterator<Item = &'a ResourceId>) -> String {
    join_with(ids, ", ")
}

fn join_with<'a>(ids: impl Iterator<Item = &'a ResourceId>, sep: &str) -> String {
    ids.map(ResourceId::as_str).collect::<Vec<_>>().join(sep)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::try_parse_from(["strata", "plan", "stack.yaml"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Text);
        assert!(!cli.log_json);
        assert!(matches!(cli.command, Command::Plan { ref manifest } if manifest == Path::new("stack.yaml")));
    }

    #[test]
    fn test_parse_cycles_edge_kind() {
        let cli = Cli::try_parse_from(["strata", "--format", "json", "cycles", "s.yaml", "--edges", "network"])
            .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Command::Cycles { edges: EdgeKind::NetworkAllow, .. }));

        assert!(Cli::try_parse_from(["strata", "cycles", "s.yaml", "--edges", "sideways"]).is_err());
    }

    #[test]
    fn test_parse_policy_destination() {
        let cli = Cli::try_parse_from(["strata", "policy", "s.yaml", "-d", "db"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Policy { destination: Some(ref d), .. } if d == "db"
        ));
    }
}
