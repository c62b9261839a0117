// ABOUTME: Main application orchestration for the automaton CLI
// ABOUTME: Coordinates between CLI arguments, configuration, and command execution

use anyhow::Result;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use super::commands;
use super::{Args, Commands, Config};

pub struct App {
    config: Config,
}

impl App {
    /// Create a new application instance
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self, verbose: bool, no_color: bool) -> Result<()> {
        let log_level = if verbose {
            "debug"
        } else {
            &self.config.logging.level
        };

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        match self.config.logging.format.as_str() {
            "compact" => {
                tracing_subscriber::fmt()
                    .compact()
                    .with_env_filter(env_filter)
                    .with_ansi(!no_color)
                    .with_target(false)
                    .init();
            }
            _ => {
                tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .with_ansi(!no_color)
                    .with_target(false)
                    .init();
            }
        }

        debug!("Logging initialized with level: {}", log_level);
        Ok(())
    }

    /// Run the application with parsed arguments
    pub async fn run(&mut self, args: Args) -> Result<()> {
        self.init_logging(args.verbose, args.no_color)?;

        info!("Starting automaton v{}", env!("CARGO_PKG_VERSION"));
        debug!("Configuration loaded from: {:?}", args.config);

        match args.command {
            Commands::Run {
                workflow,
                checkpoint,
                seed,
                fail,
            } => {
                let fail = fail.as_deref().map(Args::parse_fail).transpose()?;
                commands::run_workflow(workflow, checkpoint, seed, fail, &self.config).await
            }

            Commands::Validate { workflow } => {
                commands::validate_workflow(workflow, &self.config).await
            }

            Commands::Inspect { checkpoint } => {
                commands::inspect_checkpoint(checkpoint, &self.config).await
            }

            Commands::Oracle {
                timeout,
                elapsed,
                confidence,
                transit,
                trials,
                seed,
            } => commands::run_oracle(timeout, elapsed, &confidence, &transit, trials, seed),

            Commands::Init { name, output_dir } => {
                commands::init_workflow(name, output_dir, &self.config).await
            }
        }
    }

    /// Create application from command line arguments
    pub async fn from_args(args: &Args) -> Result<Self> {
        let config = Config::load(args.config.clone())?;
        Ok(Self::new(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_app_creation() {
        let app = App::new(Config::default());
        assert_eq!(app.config().logging.format, "pretty");
    }

    #[tokio::test]
    async fn test_app_from_args_with_config_file() {
        use clap::Parser;

        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("automaton.yaml");
        fs::write(
            &config_path,
            "logging:\n  level: debug\n  format: compact\nengine:\n  auto_save: true\n",
        )
        .unwrap();

        let args = Args::try_parse_from([
            "automaton",
            "--config",
            config_path.to_str().unwrap(),
            "validate",
            "flow.yaml",
        ])
        .unwrap();
        let app = App::from_args(&args).await.unwrap();
        assert_eq!(app.config().logging.level, "debug");
        assert!(app.config().engine.auto_save);
    }
}
