//! ticketq CLI: run the service, or submit and inspect submissions.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use ticketq::config::Config;
use ticketq::config::secrets::{ExposeSecret, redacted_database_url};
use ticketq::db::submission::PgSubmissionStore;
use ticketq::db::ticket::PgTicketStore;
use ticketq::db::{Db, PgmqQueue};
use ticketq::engine::{
    Engine, Reaper, Shutdown, SubmissionRequest, SubmitResult, Worker, WorkerConfig,
    spawn_workers,
};
use ticketq::http::{self, SubmissionView};
use ticketq::model::SubmissionId;
use ticketq::telemetry::{TelemetryConfig, init_telemetry};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "ticketq", about = "Asynchronous ticket submission queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API, the worker pool and the reaper
    Serve {
        /// Concurrent workers (defaults to WORKER_CONCURRENCY)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Submit a ticket-creation request
    Submit {
        /// JSON request body
        json: String,
        /// Idempotency key
        #[arg(long)]
        client_reference: Option<String>,
    },
    /// Show a submission
    Show {
        /// Submission ID
        id: String,
    },
    /// Print queue metrics
    Metrics,
}

/// Postgres-backed handles shared by every command.
struct Backend {
    submissions: Arc<PgSubmissionStore>,
    tickets: Arc<PgTicketStore>,
    queue: Arc<PgmqQueue>,
}

impl Backend {
    async fn connect(config: &Config) -> anyhow::Result<Self> {
        info!(database = %redacted_database_url(&config.database_url), "connecting to Postgres");
        let db = Db::connect(config.database_url.expose_secret())
            .await
            .context("connecting to Postgres")?;
        db.migrate().await?;
        let queue = PgmqQueue::connect(db.clone(), config.queue_name.clone()).await?;
        Ok(Self {
            submissions: Arc::new(PgSubmissionStore::new(db.clone())),
            tickets: Arc::new(PgTicketStore::new(db)),
            queue: Arc::new(queue),
        })
    }

    fn engine(&self) -> Engine {
        Engine::new(
            self.submissions.clone(),
            self.tickets.clone(),
            self.queue.clone(),
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve { workers } => cmd_serve(config, workers).await,
        Command::Submit {
            json,
            client_reference,
        } => cmd_submit(&config, json, client_reference).await,
        Command::Show { id } => cmd_show(&config, id).await,
        Command::Metrics => cmd_metrics(&config).await,
    }
}

async fn cmd_serve(config: Config, workers: Option<usize>) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "ticketq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let backend = Backend::connect(&config).await?;
    let shutdown = Shutdown::new();

    let worker = Worker::new(
        backend.submissions.clone(),
        backend.tickets.clone(),
        backend.queue.clone(),
        WorkerConfig {
            visibility_timeout: config.visibility_timeout,
            poll_interval: config.poll_interval,
            retry: config.retry,
        },
        &shutdown,
    );
    let count = workers.unwrap_or(config.worker_concurrency);
    let mut pool = spawn_workers(&worker, count);
    info!(workers = count, queue = backend.queue.queue_name(), "worker pool started");

    let reaper = Reaper::new(
        backend.submissions.clone(),
        backend.queue.clone(),
        config.processing_timeout,
        &shutdown,
    );
    let reaper = tokio::spawn(async move { reaper.run().await });

    let signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown requested");
        signal.signal();
    });

    let listener = TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("binding {}", config.http_bind))?;
    let served = http::serve(listener, backend.engine(), shutdown.clone()).await;
    shutdown.signal();

    while let Some(joined) = pool.join_next().await {
        joined??;
    }
    reaper.await??;
    served?;
    Ok(())
}

async fn cmd_submit(
    config: &Config,
    json: String,
    client_reference: Option<String>,
) -> anyhow::Result<()> {
    let body: serde_json::Value = serde_json::from_str(&json).context("parsing request JSON")?;
    let mut request = SubmissionRequest::from_json(body)?;
    if let Some(reference) = client_reference {
        request = request.client_reference(reference);
    }

    let backend = Backend::connect(config).await?;
    let result = backend.engine().submit(request).await?;
    let label = match &result {
        SubmitResult::Created(_) => "Created",
        SubmitResult::Accepted(_) => "Accepted",
        SubmitResult::AlreadyCompleted(_) => "Already completed",
    };
    let submission = result.into_submission();
    println!(
        "{label}: {} (reference: {}, status: {})",
        submission.id, submission.client_reference, submission.status
    );
    Ok(())
}

async fn cmd_show(config: &Config, id: String) -> anyhow::Result<()> {
    let id: SubmissionId = id.parse()?;
    let backend = Backend::connect(config).await?;
    let (submission, ticket) = backend.engine().get_with_ticket(id).await?;

    println!("ID:         {}", submission.id);
    println!("Reference:  {}", submission.client_reference);
    println!("Status:     {}", submission.status);
    println!("Attempts:   {}", submission.attempts);
    println!("Created:    {}", submission.created_at);
    println!("Updated:    {}", submission.updated_at);
    if let Some(completed) = submission.completed_at {
        println!("Completed:  {completed}");
    }
    if !submission.error_message.is_empty() {
        println!("Error:      {}", submission.error_message);
    }
    if let Some(ref ticket) = ticket {
        println!("---");
        println!("Ticket:     {}", ticket.id);
        println!("Title:      {}", ticket.title);
        println!("Priority:   {}", ticket.priority);
        println!("Status:     {}", ticket.status);
    }
    println!("---");
    println!(
        "{}",
        serde_json::to_string_pretty(&SubmissionView::new(submission, ticket))?
    );
    Ok(())
}

async fn cmd_metrics(config: &Config) -> anyhow::Result<()> {
    let backend = Backend::connect(config).await?;
    let metrics = backend.engine().queue_metrics().await?;
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}
