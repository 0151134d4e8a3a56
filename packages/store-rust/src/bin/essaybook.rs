//! `essaybook`: inspect and edit the local essay-evaluation store.
//!
//! Records are printed to stdout as JSON lines; logs go to stderr.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use essaybook_core::{NewApiKey, NewEvaluation};
use essaybook_store::{Backend, OnUnavailable, RecordStore, StoreConfig};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "essaybook", version, about = "Local store for essay evaluations and API keys")]
struct Cli {
    /// Directory holding the database file.
    #[arg(long, env = "ESSAYBOOK_DATA_DIR", default_value = ".essaybook", global = true)]
    data_dir: PathBuf,

    /// Keep everything in memory for this run. Overrides `--data-dir`.
    #[arg(long, global = true)]
    memory: bool,

    /// What to do when the database cannot be opened.
    #[arg(long, value_enum, default_value_t = FailurePolicy::Fail, global = true)]
    on_unavailable: FailurePolicy,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FailurePolicy {
    Fail,
    Noop,
}

impl From<FailurePolicy> for OnUnavailable {
    fn from(policy: FailurePolicy) -> Self {
        match policy {
            FailurePolicy::Fail => Self::Fail,
            FailurePolicy::Noop => Self::Noop,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scored essays.
    #[command(subcommand)]
    Evaluations(EvaluationCommand),
    /// Grading-model API keys.
    #[command(subcommand)]
    Keys(KeyCommand),
    /// Print the database layout.
    Schema,
}

#[derive(Debug, Subcommand)]
enum EvaluationCommand {
    /// Store a new evaluation and print its id.
    Add(AddEvaluation),
    /// Print every evaluation.
    List {
        /// Index to order by. Defaults to creation time.
        #[arg(long, default_value = "created_at")]
        order_by: String,
    },
    /// Delete one evaluation.
    Delete { id: u64 },
    /// Delete every evaluation.
    Clear,
}

#[derive(Debug, Args)]
struct AddEvaluation {
    #[arg(long)]
    student_name: String,
    #[arg(long)]
    student_class: String,
    #[arg(long)]
    statement: String,
    #[arg(long)]
    essay_text: String,
    #[arg(long)]
    score: f64,
    #[arg(long)]
    review: String,
}

#[derive(Debug, Subcommand)]
enum KeyCommand {
    /// Store an API key, replacing any key with the same id.
    Set {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        key: String,
    },
    /// Print every API key.
    List,
    /// Delete one API key.
    Delete { id: String },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn print_line<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let backend = if cli.memory {
        Backend::Memory
    } else {
        Backend::Disk { dir: cli.data_dir }
    };
    let store = RecordStore::new(StoreConfig {
        backend,
        on_unavailable: cli.on_unavailable.into(),
        ..StoreConfig::default()
    });

    match cli.command {
        Command::Evaluations(command) => run_evaluations(&store, command).await,
        Command::Keys(command) => run_keys(&store, command).await,
        Command::Schema => {
            let schema = store.schema();
            let collections = store
                .collections()
                .await
                .context("failed to read database layout")?;
            print_line(&serde_json::json!({
                "name": schema.name,
                "version": schema.version,
                "collections": collections,
            }))
        }
    }
}

async fn run_evaluations(store: &RecordStore, command: EvaluationCommand) -> anyhow::Result<()> {
    match command {
        EvaluationCommand::Add(args) => {
            let draft = NewEvaluation {
                student_name: args.student_name,
                student_class: args.student_class,
                statement: args.statement,
                essay_text: args.essay_text,
                score: args.score,
                review: args.review,
            };
            let id = store
                .save_evaluation(&draft)
                .await
                .context("failed to save evaluation")?;
            print_line(&serde_json::json!({ "id": id }))
        }
        EvaluationCommand::List { order_by } => {
            let all = store
                .get_all::<essaybook_core::Evaluations>(Some(order_by.as_str()))
                .await
                .context("failed to list evaluations")?;
            for evaluation in &all {
                print_line(evaluation)?;
            }
            Ok(())
        }
        EvaluationCommand::Delete { id } => store
            .delete_evaluation(id)
            .await
            .with_context(|| format!("failed to delete evaluation {id}")),
        EvaluationCommand::Clear => store
            .clear_evaluations()
            .await
            .context("failed to clear evaluations"),
    }
}

async fn run_keys(store: &RecordStore, command: KeyCommand) -> anyhow::Result<()> {
    match command {
        KeyCommand::Set { id, name, key } => store
            .save_api_key(&NewApiKey { id, name, key })
            .await
            .context("failed to save API key"),
        KeyCommand::List => {
            for key in &store.api_keys().await.context("failed to list API keys")? {
                print_line(key)?;
            }
            Ok(())
        }
        KeyCommand::Delete { id } => store
            .delete_api_key(&id)
            .await
            .with_context(|| format!("failed to delete API key {id}")),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_evaluation_add() {
        let cli = Cli::try_parse_from([
            "essaybook",
            "--memory",
            "evaluations",
            "add",
            "--student-name",
            "Ana",
            "--student-class",
            "5A",
            "--statement",
            "s",
            "--essay-text",
            "e",
            "--score",
            "8",
            "--review",
            "r",
        ])
        .unwrap();
        assert!(cli.memory);
        let Command::Evaluations(EvaluationCommand::Add(args)) = cli.command else {
            panic!("expected evaluations add");
        };
        assert_eq!(args.student_name, "Ana");
        assert!((args.score - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parses_policy_and_format() {
        let cli = Cli::try_parse_from([
            "essaybook",
            "--on-unavailable",
            "noop",
            "--log-format",
            "json",
            "keys",
            "list",
        ])
        .unwrap();
        assert!(matches!(cli.on_unavailable, FailurePolicy::Noop));
        assert!(matches!(cli.log_format, LogFormat::Json));
        assert_eq!(OnUnavailable::from(cli.on_unavailable), OnUnavailable::Noop);
    }
}
