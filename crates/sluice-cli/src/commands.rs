//! CLI command definitions and handlers

use crate::functions::builtin_registry;
use anyhow::Result;
use clap::{Parser, Subcommand};
use sluice_core::{
    CommitCadence, ConsumeOperator, ConsumeReport, FunctionRegistry, MemorySource, Message,
    MessageSource, Settings,
};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Main CLI structure
#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Bounded batch consumption from message topics")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Consume messages and apply a function to them
    Consume {
        /// Settings file (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Replay messages from a JSON-lines file instead of Kafka
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Total message budget
        #[arg(long)]
        max_messages: Option<usize>,

        /// Consume until the source runs dry, ignoring any budget in the settings file
        #[arg(long, conflicts_with = "max_messages")]
        read_to_end: bool,

        /// Messages requested per poll
        #[arg(long)]
        max_batch_size: Option<usize>,

        /// Per-poll timeout in seconds
        #[arg(long)]
        poll_timeout: Option<f64>,

        /// Registered function applied to each message
        #[arg(long, conflicts_with = "apply_function_batch")]
        apply_function: Option<String>,

        /// Registered function applied to each batch
        #[arg(long)]
        apply_function_batch: Option<String>,

        /// Offset commit cadence (never, end_of_batch, end_of_operator)
        #[arg(long, value_parser = parse_commit_cadence)]
        commit_cadence: Option<CommitCadence>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Validate a settings file and show the effective plan
    Validate {
        /// Settings file (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "json-pretty")]
        format: OutputFormat,
    },

    /// List built-in apply functions
    Functions,

    /// Show system information
    Info,
}

fn parse_commit_cadence(value: &str) -> Result<CommitCadence, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("unknown commit cadence `{}`", value))
}

/// Output format options
#[derive(Clone, Debug, PartialEq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    JsonPretty,
}

/// Command execution result
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// Command errors
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(
        "Reading from Kafka requires the `kafka` feature; \
         pass --input to replay messages from a file"
    )]
    KafkaDisabled,
}

/// Execute CLI commands
pub struct CommandExecutor {
    registry: FunctionRegistry<Message>,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self { registry: builtin_registry() }
    }

    /// Executor with a caller-supplied registry
    pub fn with_registry(registry: FunctionRegistry<Message>) -> Self {
        Self { registry }
    }

    /// Execute a CLI command
    pub fn execute(&mut self, command: Commands) -> Result<CommandResult> {
        match command {
            Commands::Consume {
                config,
                input,
                max_messages,
                read_to_end,
                max_batch_size,
                poll_timeout,
                apply_function,
                apply_function_batch,
                commit_cadence,
                format,
            } => {
                // Overrides are applied before validation, which happens in
                // `ConsumeOperator::from_config`
                let mut settings = load_settings_unvalidated(&config)?;
                let consume = &mut settings.consume;
                if read_to_end {
                    consume.max_messages = None;
                } else if max_messages.is_some() {
                    consume.max_messages = max_messages;
                }
                if let Some(size) = max_batch_size {
                    consume.max_batch_size = size;
                }
                if let Some(timeout) = poll_timeout {
                    consume.poll_timeout_secs = timeout;
                }
                if apply_function.is_some() || apply_function_batch.is_some() {
                    consume.apply_function = apply_function;
                    consume.apply_function_batch = apply_function_batch;
                }
                if let Some(cadence) = commit_cadence {
                    consume.commit_cadence = cadence;
                }
                self.execute_consume(settings, input, format)
            }
            Commands::Validate { config, format } => self.execute_validate(config, format),
            Commands::Functions => self.execute_functions(),
            Commands::Info => self.execute_info(),
        }
    }

    fn execute_consume(
        &self,
        settings: Settings,
        input: Option<PathBuf>,
        format: OutputFormat,
    ) -> Result<CommandResult> {
        let mut operator = ConsumeOperator::from_config(&settings.consume, &self.registry)?;

        let report = match input {
            Some(path) => {
                let mut source = MemorySource::from_json_lines(BufReader::new(File::open(path)?))?;
                run_operator(&mut operator, &mut source)?
            }
            None => self.consume_from_kafka(&settings, &mut operator)?,
        };

        let result = match format {
            OutputFormat::Text => format!(
                "Consumed {} messages in {} batches ({} commits, {} ms)",
                report.total_consumed,
                report.batches,
                report.commits,
                report.elapsed().num_milliseconds()
            ),
            OutputFormat::Json => serde_json::to_string(&report)?,
            OutputFormat::JsonPretty => serde_json::to_string_pretty(&report)?,
        };
        println!("{}", result);

        Ok(CommandResult {
            success: true,
            message: format!("Consumed {} messages", report.total_consumed),
            data: Some(serde_json::to_value(&report)?),
        })
    }

    #[cfg(feature = "kafka")]
    fn consume_from_kafka(
        &self,
        settings: &Settings,
        operator: &mut ConsumeOperator<Message>,
    ) -> Result<ConsumeReport> {
        let mut source = sluice_core::kafka::KafkaSource::new(&settings.kafka, &settings.consume)?;
        run_operator(operator, &mut source)
    }

    #[cfg(not(feature = "kafka"))]
    fn consume_from_kafka(
        &self,
        _settings: &Settings,
        _operator: &mut ConsumeOperator<Message>,
    ) -> Result<ConsumeReport> {
        Err(CommandError::KafkaDisabled.into())
    }

    fn execute_validate(&self, config: PathBuf, format: OutputFormat) -> Result<CommandResult> {
        let settings = load_settings(&config)?;
        let operator = ConsumeOperator::from_config(&settings.consume, &self.registry)?;
        let plan = operator.plan();

        let summary = serde_json::json!({
            "topics": operator.topics(),
            "bootstrap_servers": settings.kafka.bootstrap_servers,
            "group_id": settings.kafka.group_id,
            "apply_function": settings.consume.apply_function,
            "apply_function_batch": settings.consume.apply_function_batch,
            "commit_cadence": operator.commit_cadence(),
            "max_messages": plan.max_messages(),
            "max_batch_size": plan.max_batch_size(),
            "poll_timeout_secs": plan.poll_timeout().as_secs_f64(),
            "reads_to_end": plan.reads_to_end(),
        });

        let result = match format {
            OutputFormat::Text => format!(
                "Settings valid: {} topic(s), max_messages {}, max_batch_size {}, commit at {}",
                operator.topics().len(),
                plan.max_messages().map_or_else(|| "unbounded".to_string(), |m| m.to_string()),
                plan.max_batch_size(),
                operator.commit_cadence()
            ),
            OutputFormat::Json => serde_json::to_string(&summary)?,
            OutputFormat::JsonPretty => serde_json::to_string_pretty(&summary)?,
        };
        println!("{}", result);

        Ok(CommandResult {
            success: true,
            message: "Settings valid".to_string(),
            data: Some(summary),
        })
    }

    fn execute_functions(&self) -> Result<CommandResult> {
        let functions: Vec<_> = self
            .registry
            .names()
            .map(|(name, kind)| serde_json::json!({ "name": name, "kind": kind }))
            .collect();

        for (name, kind) in self.registry.names() {
            println!("{:<28} {}", name, kind);
        }

        Ok(CommandResult {
            success: true,
            message: format!("{} functions registered", functions.len()),
            data: Some(serde_json::json!({ "functions": functions })),
        })
    }

    fn execute_info(&self) -> Result<CommandResult> {
        let info = serde_json::json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "description": env!("CARGO_PKG_DESCRIPTION"),
            "authors": env!("CARGO_PKG_AUTHORS"),
            "repository": env!("CARGO_PKG_REPOSITORY"),
            "kafka": cfg!(feature = "kafka"),
            "default_max_batch_size": sluice_core::DEFAULT_MAX_BATCH_SIZE,
        });

        let result = serde_json::to_string_pretty(&info)?;
        println!("{}", result);

        Ok(CommandResult {
            success: true,
            message: "System information".to_string(),
            data: Some(info),
        })
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn load_settings(path: &Path) -> Result<Settings> {
    Settings::from_file(path).map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))
}

fn load_settings_unvalidated(path: &Path) -> Result<Settings> {
    Settings::from_file_unvalidated(path)
        .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))
}

fn run_operator<S>(
    operator: &mut ConsumeOperator<Message>,
    source: &mut S,
) -> Result<ConsumeReport>
where
    S: MessageSource<Message = Message>,
{
    Ok(operator.execute(source)?)
}
