use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crewline::backend::RestBackend;
use crewline::config::{AppConfig, AuthPolicy, BackendConfig, CoordinatorConfig, QueueConfig};
use crewline::coordinator::{AssignmentCoordinator, CurrentJob};
use crewline::fanout::actions::ReminderDirectory;
use crewline::fanout::{BulkAction, FanOut, JobActions};
use crewline::messaging::{
    FileCursorStore, MessageQueueCursor, MessageTemplate, QueueState, SmsLinkDispatcher,
    TemplateMessageQueue,
};
use crewline::model::TeamRoster;
use crewline::notify;
use crewline::CrewError;
use crewline::session::BulkSession;
use crewline::shutdown::install_cancel_handler;
use crewline::store::JobStore;

#[derive(Parser, Debug)]
#[command(name = "crewline")]
#[command(version)]
#[command(about = "Assign crews, run bulk job updates and walk customer reminders")]
#[command(propagate_version = true)]
struct Args {
    #[command(flatten)]
    client: ClientArgs,

    #[command(subcommand)]
    command: Commands,
}

// =============================================================================
// Shared Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Backend project URL
    #[arg(long, env = "CREWLINE_URL", global = true, default_value = "http://127.0.0.1:54321")]
    url: String,

    /// Backend API key
    #[arg(long, env = "CREWLINE_KEY", global = true, default_value = "")]
    key: String,

    /// Signed-in user's access token
    #[arg(long, env = "CREWLINE_TOKEN", global = true)]
    token: Option<String>,

    /// Request timeout in milliseconds
    #[arg(long, global = true, default_value = "15000")]
    timeout_ms: u64,

    /// Treat "expired" answers as generic failures for this many minutes after
    /// the account was connected. Off unless set.
    #[arg(long, global = true, requires = "connected_at")]
    reconnect_grace_mins: Option<u64>,

    /// When the account was last connected (RFC 3339), used by the grace window
    #[arg(long, env = "CREWLINE_CONNECTED_AT", global = true)]
    connected_at: Option<DateTime<Utc>>,

    /// Directory holding the message queue cursor
    #[arg(long, global = true, default_value = ".crewline")]
    state_dir: PathBuf,

    /// Business name used in message templates
    #[arg(long, global = true, default_value = "")]
    business_name: String,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// List jobs
    Jobs,

    /// Assign helpers to one job
    Assign {
        #[arg(long)]
        job: Uuid,
        #[arg(long = "helper", required = true)]
        helpers: Vec<Uuid>,
    },

    /// Remove one helper, or every helper, from a job
    Unassign {
        #[arg(long)]
        job: Uuid,
        #[arg(long)]
        helper: Option<Uuid>,
    },

    /// Apply one action to many jobs (Ctrl-C stops after the current job)
    Bulk {
        #[command(subcommand)]
        action: BulkCommands,
    },

    /// Compose reminders for jobs and confirm each one before it is sent
    Remind {
        #[arg(long, value_delimiter = ',', required = true)]
        jobs: Vec<Uuid>,
        /// Message body; supports {{first_name}}, {{customer_name}}, {{date}},
        /// {{business_name}}, {{amount_due}}
        #[arg(long)]
        template: String,
    },

    /// Inspect or continue an interrupted reminder walk
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
}

#[derive(clap::Subcommand, Debug)]
enum BulkCommands {
    Assign {
        #[arg(long, value_delimiter = ',', required = true)]
        jobs: Vec<Uuid>,
        #[arg(long = "helper", required = true)]
        helpers: Vec<Uuid>,
    },
    Reschedule {
        #[arg(long, value_delimiter = ',', required = true)]
        jobs: Vec<Uuid>,
        /// New date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,
    },
    MarkPaid {
        #[arg(long, value_delimiter = ',', required = true)]
        jobs: Vec<Uuid>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum QueueCommands {
    /// Show the persisted cursor
    Status,
    /// Continue from the persisted cursor
    Resume,
    /// Drop the persisted cursor
    Cancel,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobListItem {
    job_id: String,
    customer: String,
    date: String,
    status: String,
    helpers: usize,
    paid: bool,
}

#[derive(Serialize)]
struct AssignmentOutput {
    job_id: String,
    assigned: Vec<String>,
    skipped_placeholders: Vec<String>,
}

#[derive(Serialize)]
struct BulkOutput {
    action: String,
    succeeded: Vec<String>,
    failed: Vec<String>,
    ineligible: Vec<String>,
    not_started: Vec<String>,
    message: String,
}

// =============================================================================
// Helpers
// =============================================================================

fn app_config(args: &ClientArgs) -> AppConfig {
    let mut backend = BackendConfig::new(&args.url, &args.key).with_timeout_ms(args.timeout_ms);
    if let Some(token) = &args.token {
        backend = backend.with_access_token(token);
    }
    AppConfig {
        backend,
        coordinator: CoordinatorConfig {
            auth: AuthPolicy {
                reconnect_grace: args
                    .reconnect_grace_mins
                    .map(|m| Duration::from_secs(m * 60)),
                connected_at: args.connected_at,
            },
            ..CoordinatorConfig::default()
        },
        queue: QueueConfig::default()
            .with_state_dir(&args.state_dir)
            .with_business_name(&args.business_name),
    }
}

async fn mount_session(config: &AppConfig) -> Result<BulkSession, Box<dyn std::error::Error>> {
    let backend = RestBackend::new(config.backend.clone())?;
    let store = JobStore::new(Arc::new(backend));
    let coordinator = Arc::new(AssignmentCoordinator::with_config(
        store,
        TeamRoster::default(),
        CurrentJob::new(),
        config.coordinator.clone(),
    ));
    let actions = JobActions::new(coordinator.clone(), config.queue.business_name.clone());
    let mut session = BulkSession::with_config(
        coordinator,
        FanOut::new(Arc::new(actions)),
        config.coordinator.clone(),
    );
    session.mount().await?;
    Ok(session)
}

fn message_queue(config: &AppConfig) -> TemplateMessageQueue {
    TemplateMessageQueue::new(
        Arc::new(FileCursorStore::new(&config.queue.state_dir)),
        Arc::new(SmsLinkDispatcher::new(|link| println!("Open: {}", link))),
        config.queue.cursor_key.clone(),
    )
}

fn fail(err: &CrewError) -> ! {
    match notify::for_error(err) {
        Some(n) => eprintln!("Error: {}", n),
        None => eprintln!("Error: {}", err),
    }
    std::process::exit(1);
}

fn ids(ids: &[Uuid]) -> Vec<String> {
    ids.iter().map(Uuid::to_string).collect()
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_jobs(config: &AppConfig, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let session = mount_session(config).await?;
    let jobs: Vec<JobListItem> = session
        .board()
        .jobs()
        .into_iter()
        .map(|j| JobListItem {
            job_id: j.id.to_string(),
            customer: j.customer_name.clone(),
            date: j.scheduled_date.to_string(),
            status: j.status.to_string(),
            helpers: j.assigned_helper_ids.len(),
            paid: j.payment_status == crewline::model::PaymentStatus::Paid,
        })
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&jobs)?),
        OutputFormat::Table => {
            println!(
                "{:<36}  {:<24}  {:<10}  {:<9}  {:>7}  {:<4}",
                "JOB ID", "CUSTOMER", "DATE", "STATUS", "HELPERS", "PAID"
            );
            for j in &jobs {
                println!(
                    "{:<36}  {:<24}  {:<10}  {:<9}  {:>7}  {:<4}",
                    j.job_id,
                    j.customer,
                    j.date,
                    j.status,
                    j.helpers,
                    if j.paid { "yes" } else { "no" }
                );
            }
        }
    }
    Ok(())
}

async fn handle_assign(
    config: &AppConfig,
    job: Uuid,
    helpers: Option<Vec<Uuid>>,
    unassign: Option<Option<Uuid>>,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = mount_session(config).await?;
    session.focus(Some(job));

    let result = match (helpers, unassign) {
        (Some(helpers), _) => session.assign(job, &helpers).await,
        (None, Some(helper)) => session.unassign(job, helper).await,
        (None, None) => return Ok(()),
    };
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => fail(&e),
    };

    match format {
        OutputFormat::Json => {
            let output = AssignmentOutput {
                job_id: job.to_string(),
                assigned: ids(outcome.assigned().ids()),
                skipped_placeholders: ids(&outcome.skipped_placeholders),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job {} now has {} helper(s).", job, outcome.assigned().len());
            for id in &outcome.skipped_placeholders {
                println!("Skipped {}: still finishing signup.", id);
            }
        }
    }
    Ok(())
}

async fn handle_bulk(
    config: &AppConfig,
    command: BulkCommands,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let (jobs, action) = match command {
        BulkCommands::Assign { jobs, helpers } => (jobs, BulkAction::Assign { helper_ids: helpers }),
        BulkCommands::Reschedule { jobs, date } => (jobs, BulkAction::Reschedule { date }),
        BulkCommands::MarkPaid { jobs } => (jobs, BulkAction::MarkPaid),
    };

    let mut session = mount_session(config).await?;
    session.enter_bulk_mode();
    for id in &jobs {
        if !session.toggle(*id) {
            eprintln!("Warning: job {} is not on the board, ignoring", id);
        }
    }

    let cancel = install_cancel_handler();
    let prerequisite = Some(action.default_prerequisite());
    let outcome = session.run_bulk(action, prerequisite, &cancel).await;
    print_bulk(&outcome.report, &outcome.notification, format)?;
    Ok(())
}

fn print_bulk(
    report: &crewline::fanout::FanOutReport,
    notification: &notify::Notification,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            let output = BulkOutput {
                action: report.action.to_string(),
                succeeded: ids(&report.succeeded_ids()),
                failed: ids(&report.failed_ids()),
                ineligible: ids(&report.ineligible),
                not_started: ids(&report.not_started),
                message: notification.text.clone(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("{}", notification);
            for r in &report.results {
                if let Some(e) = r.error() {
                    println!("  {} ({}): {}", r.label, r.target_id, e);
                }
            }
        }
    }
    Ok(())
}

async fn handle_remind(
    config: &AppConfig,
    jobs: Vec<Uuid>,
    template: String,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileCursorStore::new(&config.queue.state_dir);
    if MessageQueueCursor::load(&store, &config.queue.cursor_key).await?.is_some() {
        eprintln!("Error: {}", CrewError::QueueInProgress);
        eprintln!("Run `crewline queue resume` to continue it or `crewline queue cancel` to drop it.");
        std::process::exit(1);
    }

    let mut queue = message_queue(config);
    let mut session = mount_session(config).await?;
    session.enter_bulk_mode();
    for id in &jobs {
        session.toggle(*id);
    }

    let action = BulkAction::Remind {
        template: MessageTemplate::new(template.clone()),
    };
    let prerequisite = Some(action.default_prerequisite());
    let outcome = session
        .run_bulk(action, prerequisite, &CancellationToken::new())
        .await;
    print_bulk(&outcome.report, &outcome.notification, format)?;

    if let Err(e) = queue.start(outcome.outbound, Some(template)).await {
        fail(&e);
    }
    walk_queue(&mut queue).await
}

async fn handle_queue(config: &AppConfig, command: QueueCommands) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileCursorStore::new(&config.queue.state_dir);
    match command {
        QueueCommands::Status => {
            match MessageQueueCursor::load(&store, &config.queue.cursor_key).await? {
                Some(cursor) => println!(
                    "Message queue at {} of {} recipients.",
                    cursor.index,
                    cursor.recipient_ids.len()
                ),
                None => println!("No message queue in progress."),
            }
        }
        QueueCommands::Cancel => {
            let mut queue = message_queue(config);
            queue.cancel().await?;
            println!("Message queue cancelled.");
        }
        QueueCommands::Resume => {
            let backend = RestBackend::new(config.backend.clone())?;
            let directory = ReminderDirectory::new(
                JobStore::new(Arc::new(backend)).with_auth_policy(config.coordinator.auth.clone()),
                config.queue.business_name.clone(),
            );
            let mut queue = TemplateMessageQueue::restore(
                Arc::new(FileCursorStore::new(&config.queue.state_dir)),
                Arc::new(SmsLinkDispatcher::new(|link| println!("Open: {}", link))),
                config.queue.cursor_key.clone(),
                &directory,
            )
            .await?;
            if queue.state() == QueueState::Idle {
                println!("No message queue in progress.");
                return Ok(());
            }
            walk_queue(&mut queue).await?;
        }
    }
    Ok(())
}

/// One answer at the confirmation prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Choice {
    Send,
    Edit,
    Skip,
    Quit,
    Cancel,
    Unknown(String),
}

/// Interpret a prompt line. End of input quits; sending needs an explicit `s`.
fn parse_choice(line: Option<&str>) -> Choice {
    let Some(line) = line else {
        return Choice::Quit;
    };
    match line.trim() {
        "s" => Choice::Send,
        "e" => Choice::Edit,
        "k" => Choice::Skip,
        "q" => Choice::Quit,
        "c" => Choice::Cancel,
        other => Choice::Unknown(other.to_string()),
    }
}

/// Read one line; `None` once stdin is closed.
async fn prompt(
    lines: &mut Lines<BufReader<Stdin>>,
    text: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    println!("{}", text);
    Ok(lines.next_line().await?.map(|l| l.trim().to_string()))
}

fn stopped() {
    println!("Stopped. Run `crewline queue resume` to continue.");
}

async fn walk_queue(queue: &mut TemplateMessageQueue) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let total = queue.recipients().len();

    loop {
        match queue.state() {
            QueueState::AwaitingConfirmation { index } => {
                let Some(current) = queue.current().cloned() else {
                    break;
                };
                println!();
                println!("[{}/{}] To: {} ({})", index + 1, total, current.name, current.handle);
                for line in current.message.lines() {
                    println!("  {}", line);
                }
                let answer = prompt(&mut lines, "[s]end, [e]dit, s[k]ip, [q]uit for now, [c]ancel").await?;
                match parse_choice(answer.as_deref()) {
                    Choice::Send => {
                        queue.confirm().await?;
                    }
                    Choice::Edit => match prompt(&mut lines, "New message:").await? {
                        Some(text) if !text.is_empty() => {
                            queue.edit_current(text);
                        }
                        Some(_) => {}
                        None => {
                            stopped();
                            return Ok(());
                        }
                    },
                    Choice::Skip => {
                        queue.skip().await?;
                    }
                    Choice::Quit => {
                        stopped();
                        return Ok(());
                    }
                    Choice::Cancel => {
                        queue.cancel().await?;
                    }
                    Choice::Unknown(other) => println!("Unknown choice: {}", other),
                }
            }
            QueueState::Dispatched { .. } => {
                if prompt(&mut lines, "Press Enter once the message is sent.").await?.is_none() {
                    stopped();
                    return Ok(());
                }
                queue.on_foreground().await?;
            }
            QueueState::Idle | QueueState::Complete | QueueState::Cancelled => break,
        }
    }

    println!("{}", notify::for_queue(&queue.summary()));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("crewline=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = app_config(&args.client);
    let format = args.client.output.clone();

    match args.command {
        Commands::Jobs => handle_jobs(&config, &format).await,
        Commands::Assign { job, helpers } => {
            handle_assign(&config, job, Some(helpers), None, &format).await
        }
        Commands::Unassign { job, helper } => {
            handle_assign(&config, job, None, Some(helper), &format).await
        }
        Commands::Bulk { action } => handle_bulk(&config, action, &format).await,
        Commands::Remind { jobs, template } => handle_remind(&config, jobs, template, &format).await,
        Commands::Queue { command } => handle_queue(&config, command).await,
    }
}
