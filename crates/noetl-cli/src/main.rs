// noetl CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: Use reqwest for HTTP client (already in workspace).

mod client;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use client::Client;
use noetl_core::{Event, EventType, Status, Value};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "noetl")]
#[command(about = "Client for the NoETL orchestration server")]
#[command(version)]
pub struct Cli {
    /// noetl-server base URL
    #[arg(long, env = "NOETL_API_URL", default_value = "http://localhost:9000")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an execution of a playbook
    Execute {
        /// Playbook path, as resolved by the server's playbook catalog
        path: String,

        /// Playbook version (default: "latest")
        #[arg(long, default_value = "latest")]
        version: String,

        /// Workload as a JSON object, e.g. '{"n": 5}'
        #[arg(long)]
        workload: Option<String>,

        /// Read the workload JSON object from a file instead of --workload
        #[arg(long)]
        workload_file: Option<PathBuf>,
    },

    /// List the event log for an execution
    Events {
        /// Execution id
        execution_id: String,
    },

    /// Inspect executions
    Executions {
        #[command(subcommand)]
        command: ExecutionsCommand,
    },

    /// Inspect the work queue
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },
}

#[derive(Subcommand)]
pub enum ExecutionsCommand {
    /// List known executions
    List,
    /// Show a single execution's status and computed progress
    Show {
        /// Execution id
        execution_id: String,
    },
}

#[derive(Subcommand)]
pub enum QueueCommand {
    /// List queue rows, optionally filtered by status
    List {
        #[arg(long, value_parser = ["queued", "leased", "done", "dead"])]
        status: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new(&cli.api_url);
    let output = OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Execute {
            path,
            version,
            workload,
            workload_file,
        } => execute(&client, output, path, version, workload, workload_file).await,
        Commands::Events { execution_id } => events(&client, output, &execution_id).await,
        Commands::Executions { command } => match command {
            ExecutionsCommand::List => executions_list(&client, output).await,
            ExecutionsCommand::Show { execution_id } => {
                executions_show(&client, output, &execution_id).await
            }
        },
        Commands::Queue { command } => match command {
            QueueCommand::List { status } => queue_list(&client, output, status).await,
        },
    }
}

fn load_workload(workload: Option<String>, workload_file: Option<PathBuf>) -> anyhow::Result<Value> {
    let raw = match (workload, workload_file) {
        (Some(_), Some(_)) => anyhow::bail!("pass either --workload or --workload-file, not both"),
        (Some(json), None) => json,
        (None, Some(path)) => std::fs::read_to_string(&path)?,
        (None, None) => return Ok(Value::map()),
    };
    let json: serde_json::Value = serde_json::from_str(&raw)?;
    Ok(serde_json::from_value(json)?)
}

/// `noetl execute` emits an `execution_start` event, the same record the
/// server's `POST /events` handler re-triggers the broker for (§4.A).
async fn execute(
    client: &Client,
    output: OutputFormat,
    path: String,
    version: String,
    workload: Option<String>,
    workload_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let workload = load_workload(workload, workload_file)?;
    let execution_id = noetl_core::new_execution_id();

    let mut input_context = Value::map();
    input_context.insert("path", Value::String(path.clone()));
    input_context.insert("version", Value::String(version.clone()));
    input_context.insert("workload", workload);

    let event = Event {
        event_id: noetl_core::new_event_id(),
        parent_event_id: None,
        execution_id: execution_id.clone(),
        parent_execution_id: None,
        timestamp: chrono::Utc::now(),
        insertion_rank: 0,
        event_type: EventType::new(EventType::EXECUTION_START),
        status: Status::Pending,
        node_id: None,
        node_name: None,
        node_type: None,
        input_context: Some(input_context),
        output_result: None,
        metadata: None,
        loop_fields: Default::default(),
        error: None,
    };

    let _: Event = client.post("/events", &event).await?;

    if output.is_text() {
        println!("started execution {execution_id}");
    } else {
        #[derive(serde::Serialize)]
        struct Started {
            execution_id: String,
        }
        output.print_value(&Started { execution_id });
    }
    Ok(())
}

async fn events(client: &Client, output: OutputFormat, execution_id: &str) -> anyhow::Result<()> {
    #[derive(serde::Deserialize, serde::Serialize)]
    struct EventsResponse {
        events: Vec<Event>,
    }

    let resp: EventsResponse = client
        .get(&format!("/events/by-execution/{execution_id}"))
        .await?;

    if output.is_text() {
        output::print_table_header(&[("TIMESTAMP", 24), ("TYPE", 18), ("STEP", 20), ("STATUS", 10)]);
        for event in &resp.events {
            output::print_table_row(&[
                (&event.timestamp.to_rfc3339(), 24),
                (event.event_type.as_str(), 18),
                (event.node_name.as_deref().unwrap_or("-"), 20),
                (event.status.as_str(), 10),
            ]);
        }
    } else {
        output.print_value(&resp);
    }
    Ok(())
}

async fn executions_list(client: &Client, output: OutputFormat) -> anyhow::Result<()> {
    #[derive(serde::Deserialize, serde::Serialize)]
    struct Row {
        execution_id: String,
        path: Option<String>,
        version: Option<String>,
        created_at: chrono::DateTime<chrono::Utc>,
    }

    let rows: Vec<Row> = client.get("/executions").await?;

    if output.is_text() {
        output::print_table_header(&[("EXECUTION_ID", 38), ("PATH", 30), ("CREATED", 24)]);
        for row in &rows {
            output::print_table_row(&[
                (&row.execution_id, 38),
                (row.path.as_deref().unwrap_or("-"), 30),
                (&row.created_at.to_rfc3339(), 24),
            ]);
        }
    } else {
        output.print_value(&rows);
    }
    Ok(())
}

async fn executions_show(client: &Client, output: OutputFormat, execution_id: &str) -> anyhow::Result<()> {
    #[derive(serde::Deserialize, serde::Serialize)]
    struct Detail {
        execution_id: String,
        path: Option<String>,
        version: Option<String>,
        status: String,
        progress: f64,
        events_count: usize,
        context: serde_json::Value,
    }

    let detail: Detail = client.get(&format!("/executions/{execution_id}")).await?;

    if output.is_text() {
        output::print_field("execution_id", &detail.execution_id);
        output::print_field("path", detail.path.as_deref().unwrap_or("-"));
        output::print_field("version", detail.version.as_deref().unwrap_or("-"));
        output::print_field("status", &detail.status);
        output::print_field("progress", &format!("{:.1}%", detail.progress));
        output::print_field("events", &detail.events_count.to_string());
    } else {
        output.print_value(&detail);
    }
    Ok(())
}

async fn queue_list(client: &Client, output: OutputFormat, status: Option<String>) -> anyhow::Result<()> {
    let path = match status {
        Some(status) => format!("/queue?status={status}"),
        None => "/queue".to_string(),
    };
    let jobs: Vec<noetl_core::QueueJob> = client.get(&path).await?;

    if output.is_text() {
        output::print_table_header(&[
            ("ID", 8),
            ("EXECUTION_ID", 38),
            ("NODE_ID", 24),
            ("STATUS", 10),
            ("ATTEMPTS", 10),
        ]);
        for job in &jobs {
            output::print_table_row(&[
                (&job.queue_id.to_string(), 8),
                (&job.execution_id, 38),
                (&job.node_id, 24),
                (job.status.as_str(), 10),
                (&format!("{}/{}", job.attempts, job.max_attempts), 10),
            ]);
        }
    } else {
        output.print_value(&jobs);
    }
    Ok(())
}
