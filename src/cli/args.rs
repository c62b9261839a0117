// ABOUTME: Command line argument definitions and parsing using Clap
// ABOUTME: Defines the main CLI structure and subcommands for automaton

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "automaton")]
#[command(about = "Run saga workflows that unwind themselves when a step fails")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a workflow to its goal with the built-in actions
    Run {
        #[arg(help = "Path to workflow YAML file")]
        workflow: PathBuf,

        #[arg(long, help = "Write the final worker checkpoint to this file")]
        checkpoint: Option<PathBuf>,

        #[arg(long, help = "Seed for the timeout oracle")]
        seed: Option<u64>,

        #[arg(
            long,
            help = "Hold at the goal, then fail TASK with MESSAGE (TASK=MESSAGE)"
        )]
        fail: Option<String>,
    },

    /// Validate a workflow file against the built-in actions
    Validate {
        #[arg(help = "Path to workflow YAML file")]
        workflow: PathBuf,
    },

    /// Show the state recorded in a worker checkpoint
    Inspect {
        #[arg(help = "Path to checkpoint JSON file")]
        checkpoint: PathBuf,
    },

    /// Ask the timeout oracle whether an overdue action has timed out
    Oracle {
        #[arg(long, value_parser = parse_duration, help = "Configured timeout (e.g. 100ms)")]
        timeout: Duration,

        #[arg(long, value_parser = parse_duration, help = "Time elapsed since dispatch")]
        elapsed: Duration,

        #[arg(long, default_value = "hard")]
        confidence: String,

        #[arg(long, default_value = "hard")]
        transit: String,

        #[arg(long, default_value_t = 1000)]
        trials: u32,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Write the provisioning workflow as a starter file
    Init {
        #[arg(help = "Name of the workflow to create")]
        name: String,

        #[arg(short, long, help = "Output directory", default_value = ".")]
        output_dir: PathBuf,
    },
}

pub fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Split a `TASK=MESSAGE` failure injection.
    pub fn parse_fail(value: &str) -> anyhow::Result<(String, String)> {
        match value.split_once('=') {
            Some((task, message)) if !task.trim().is_empty() => {
                Ok((task.trim().to_string(), message.to_string()))
            }
            _ => Err(anyhow::anyhow!(
                "Invalid failure format '{}'. Expected 'TASK=MESSAGE'",
                value
            )),
        }
    }
}
