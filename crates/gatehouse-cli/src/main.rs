//! Gatehouse CLI - Front-desk check-in scanning from the terminal
//!
//! Scans reservation codes against the remote check-in authority, captures
//! them into the offline queue when connectivity is down, and manages the
//! queued items (sync, override reasons, retries, removal).

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::aot::Generator;
use clap_complete::{generate, shells};
use gatehouse_core::config::AuthorityConfig;
use gatehouse_core::connectivity::Connectivity;
use gatehouse_core::queue::{CheckinQueue, EnqueueOutcome, QueuePatch};
use gatehouse_core::scan::{ScanOutcome, ScanSurface};
use gatehouse_core::store::FileBlobStore;
use gatehouse_core::sync::{
    AuthorityError, DrainOutcome, DrainSummary, HttpCheckinAuthority, SyncEngine,
    AUTO_DRAIN_INTERVAL, MAX_SYNC_ATTEMPTS,
};
use gatehouse_core::{ItemId, QueueItem, QueueStatus};
use serde::Serialize;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(about = "Front-desk check-in scanning with an offline-capable queue")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to the local queue data directory
    #[arg(long, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Treat the device as offline (no remote calls)
    #[arg(long)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan or type a reservation code
    Scan {
        /// Reservation code
        code: String,
        /// Operator justification for forcing a blocked check-in
        #[arg(long)]
        reason: Option<String>,
    },
    /// List the check-in queue
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync now: drain the queue against the remote authority
    Sync,
    /// Attach an override reason to a queued item, then sync
    Reason {
        /// Item ID or unique ID prefix
        id: String,
        /// Justification text
        text: String,
    },
    /// Reset a failed item and retry it immediately
    Retry {
        /// Item ID or unique ID prefix
        id: String,
    },
    /// Remove an item from the queue
    Remove {
        /// Item ID or unique ID prefix
        id: String,
    },
    /// Drain the queue automatically every 10 seconds while online
    Watch,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] gatehouse_core::Error),
    #[error(transparent)]
    Authority(#[from] AuthorityError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Reservation code cannot be empty")]
    EmptyCode,
    #[error("Override reason cannot be empty")]
    EmptyReason,
    #[error("Queue item not found for id/prefix: {0}")]
    ItemNotFound(String),
    #[error("{0}")]
    AmbiguousItemId(String),
    #[error(
        "Check-in authority is not configured. Set GATEHOUSE_API_URL (and optionally GATEHOUSE_SCANNER_ID, GATEHOUSE_API_TOKEN)."
    )]
    MissingConfiguration,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

/// Everything a command needs: the store, the connectivity flag fed by the
/// shell, and the authority configuration when one is present.
struct AppContext {
    store: FileBlobStore,
    connectivity: Connectivity,
    config: Option<AuthorityConfig>,
}

impl AppContext {
    fn queue(&self) -> CheckinQueue<FileBlobStore> {
        CheckinQueue::new(self.store.clone())
    }

    fn authority(&self) -> Result<HttpCheckinAuthority, CliError> {
        let config = self.config.clone().ok_or(CliError::MissingConfiguration)?;
        Ok(HttpCheckinAuthority::new(&config)?)
    }

    fn surface(&self) -> Result<ScanSurface<FileBlobStore, HttpCheckinAuthority>, CliError> {
        Ok(ScanSurface::new(
            self.store.clone(),
            self.authority()?,
            self.connectivity.clone(),
        ))
    }

    fn engine(&self) -> Result<SyncEngine<FileBlobStore, HttpCheckinAuthority>, CliError> {
        Ok(SyncEngine::new(
            self.store.clone(),
            self.authority()?,
            self.connectivity.clone(),
        ))
    }
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gatehouse=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir);
    tracing::debug!(path = %data_dir.display(), "using queue data directory");

    let context = AppContext {
        store: FileBlobStore::new(data_dir),
        connectivity: Connectivity::new(!(cli.offline || offline_from_env())),
        config: authority_config_from_env(),
    };

    match cli.command {
        Commands::Scan { code, reason } => run_scan(&code, reason.as_deref(), &context).await?,
        Commands::Queue { json } => run_queue(json, &context)?,
        Commands::Sync => run_sync(&context).await?,
        Commands::Reason { id, text } => run_reason(&id, &text, &context).await?,
        Commands::Retry { id } => run_retry(&id, &context).await?,
        Commands::Remove { id } => run_remove(&id, &context)?,
        Commands::Watch => run_watch(&context).await?,
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref())?,
    }

    Ok(())
}

async fn run_scan(code: &str, reason: Option<&str>, context: &AppContext) -> Result<(), CliError> {
    let code = normalize_code(code)?;

    if !context.connectivity.is_online() {
        let outcome = context.queue().enqueue(&code, reason)?;
        print_enqueue_notices(&outcome);
        return Ok(());
    }

    let surface = context.surface()?;
    match surface.submit(&code, reason).await? {
        ScanOutcome::CheckedIn {
            reservation_code,
            guest_name,
            overridden,
        } => {
            let guest = guest_name.map(|name| format!(" — {name}")).unwrap_or_default();
            if overridden {
                println!("Checked in with override: {reservation_code}{guest}");
            } else {
                println!("Checked in: {reservation_code}{guest}");
            }
        }
        ScanOutcome::Queued(outcome) => print_enqueue_notices(&outcome),
        ScanOutcome::Deferred { outcome, error } => {
            println!("Could not reach the check-in service ({error})");
            print_enqueue_notices(&outcome);
        }
        ScanOutcome::OverrideRequired { reason, guest_name } => {
            let guest = guest_name.map(|name| format!(" ({name})")).unwrap_or_default();
            println!("Override required{guest}: {reason}");
            println!("Re-run with --reason \"...\" to force the check-in.");
        }
        ScanOutcome::Blocked { reason } => println!("Check-in blocked: {reason}"),
        ScanOutcome::NotFound => println!("Reservation not found"),
    }

    Ok(())
}

fn run_queue(as_json: bool, context: &AppContext) -> Result<(), CliError> {
    let items = context.queue().items()?;

    if as_json {
        let json_items = items
            .iter()
            .map(item_to_list_item)
            .collect::<Vec<QueueListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("Check-in queue is empty.");
        return Ok(());
    }

    for line in format_queue_lines(&items) {
        println!("{line}");
    }
    Ok(())
}

async fn run_sync(context: &AppContext) -> Result<(), CliError> {
    if !context.connectivity.is_online() {
        println!("offline — will sync when online");
        return Ok(());
    }

    let engine = context.engine()?;
    print_drain_outcome(engine.drain_once().await?);
    Ok(())
}

async fn run_reason(id: &str, text: &str, context: &AppContext) -> Result<(), CliError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(CliError::EmptyReason);
    }

    let queue = context.queue();
    let id = resolve_item_id(id, &queue.items()?)?;

    if context.connectivity.is_online() {
        let surface = context.surface()?;
        print_drain_outcome(surface.supply_reason(id, text).await?);
    } else {
        queue.patch(id, &QueuePatch::new().override_reason(text))?;
        println!("Reason saved — will sync when online");
    }
    Ok(())
}

async fn run_retry(id: &str, context: &AppContext) -> Result<(), CliError> {
    let queue = context.queue();
    let id = resolve_item_id(id, &queue.items()?)?;

    if context.connectivity.is_online() {
        let surface = context.surface()?;
        print_drain_outcome(surface.retry(id).await?);
    } else {
        queue.patch(
            id,
            &QueuePatch::new()
                .status(QueueStatus::Queued)
                .attempts(0)
                .clear_last_error(),
        )?;
        println!("Item reset — will sync when online");
    }
    Ok(())
}

fn run_remove(id: &str, context: &AppContext) -> Result<(), CliError> {
    let queue = context.queue();
    let items = queue.items()?;
    let id = resolve_item_id(id, &items)?;

    queue.remove(id)?;
    println!("Removed {id}");
    Ok(())
}

async fn run_watch(context: &AppContext) -> Result<(), CliError> {
    let engine = context.engine()?;
    let mut transitions = context.connectivity.subscribe();
    let mut ticker = tokio::time::interval(AUTO_DRAIN_INTERVAL);

    println!("Watching the check-in queue (Ctrl-C to stop)");
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = transitions.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                if !context.connectivity.is_online() {
                    continue;
                }
                println!("Back online — syncing queued check-ins");
            }
        }

        if let DrainOutcome::Drained(summary) = engine.drain_once().await? {
            if summary.processed() > 0 {
                println!("{}", format_drain_summary(&summary));
            }
        }
    }
}

fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let mut command = Cli::command();
    let mut buffer = Vec::new();

    match shell {
        CompletionShell::Bash => generate_for_shell(shells::Bash, &mut command, &mut buffer),
        CompletionShell::Zsh => generate_for_shell(shells::Zsh, &mut command, &mut buffer),
        CompletionShell::Fish => generate_for_shell(shells::Fish, &mut command, &mut buffer),
    }

    if let Some(path) = output_path {
        std::fs::write(path, &buffer)?;
        println!("{}", path.display());
    } else {
        io::stdout().write_all(&buffer)?;
    }

    Ok(())
}

fn generate_for_shell<G: Generator>(
    generator: G,
    command: &mut clap::Command,
    buffer: &mut Vec<u8>,
) {
    generate(generator, command, "gatehouse", buffer);
}

fn print_enqueue_notices(outcome: &EnqueueOutcome) {
    if outcome.deduped {
        println!(
            "Already queued — updated timestamp: {}",
            outcome.item.reservation_code
        );
    } else {
        println!("Queued for sync: {}", outcome.item.reservation_code);
    }
    if outcome.evicted > 0 {
        println!(
            "Queue limit reached, removed {} oldest item(s)",
            outcome.evicted
        );
    }
}

fn print_drain_outcome(outcome: DrainOutcome) {
    match outcome {
        DrainOutcome::Drained(summary) => println!("{}", format_drain_summary(&summary)),
        DrainOutcome::Busy => println!("Sync already in progress"),
        DrainOutcome::Offline => println!("offline — will sync when online"),
    }
}

fn format_drain_summary(summary: &DrainSummary) -> String {
    format!(
        "Synced: {} checked in, {} failed, {} awaiting a reason ({} skipped)",
        summary.succeeded, summary.failed, summary.needs_reason, summary.skipped
    )
}

#[derive(Debug, Serialize)]
struct QueueListItem {
    id: String,
    reservation_code: String,
    guest_name: Option<String>,
    status: String,
    scanned_at: i64,
    relative_time: String,
    attempts: u32,
    last_error: Option<String>,
    override_reason: Option<String>,
}

fn item_to_list_item(item: &QueueItem) -> QueueListItem {
    let now_ms = Utc::now().timestamp_millis();
    QueueListItem {
        id: item.id.to_string(),
        reservation_code: item.reservation_code.clone(),
        guest_name: item.guest_name.clone(),
        status: item.status.to_string(),
        scanned_at: item.scanned_at,
        relative_time: format_relative_time(item.scanned_at, now_ms),
        attempts: item.attempts,
        last_error: item.last_error.clone(),
        override_reason: item.override_reason.clone(),
    }
}

fn format_queue_lines(items: &[QueueItem]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    items
        .iter()
        .map(|item| {
            let id = item.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let status = format!("{}", item.status);
            let attempts = format!("{}/{MAX_SYNC_ATTEMPTS}", item.attempts);
            let relative_time = format_relative_time(item.scanned_at, now_ms);
            let detail = item.last_error.as_deref().unwrap_or("");

            if detail.is_empty() {
                format!(
                    "{short_id:<13}  {:<20}  {status:<12}  {attempts:<4}  {relative_time}",
                    item.reservation_code
                )
            } else {
                format!(
                    "{short_id:<13}  {:<20}  {status:<12}  {attempts:<4}  {relative_time:<10}  {detail}",
                    item.reservation_code
                )
            }
        })
        .collect()
}

fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

fn normalize_code(code: &str) -> Result<String, CliError> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyCode)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Resolve an item by exact ID or unique ID prefix.
fn resolve_item_id(query: &str, items: &[QueueItem]) -> Result<ItemId, CliError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::ItemNotFound(query.to_string()));
    }

    if let Ok(id) = query.parse::<ItemId>() {
        if items.iter().any(|item| item.id == id) {
            return Ok(id);
        }
    }

    let matches: Vec<&QueueItem> = items
        .iter()
        .filter(|item| item.id.to_string().starts_with(query))
        .collect();

    match matches.len() {
        0 => Err(CliError::ItemNotFound(query.to_string())),
        1 => Ok(matches[0].id),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|item| item.id.to_string().chars().take(13).collect::<String>())
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousItemId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

fn offline_from_env() -> bool {
    env::var("GATEHOUSE_OFFLINE").is_ok_and(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn authority_config_from_env() -> Option<AuthorityConfig> {
    let base_url = env::var("GATEHOUSE_API_URL").ok()?;
    if base_url.trim().is_empty() {
        return None;
    }

    let scanner_id =
        env::var("GATEHOUSE_SCANNER_ID").unwrap_or_else(|_| default_scanner_id());
    let mut config = AuthorityConfig::new(base_url, scanner_id);
    if let Ok(token) = env::var("GATEHOUSE_API_TOKEN") {
        if !token.trim().is_empty() {
            config = config.with_bearer_token(token);
        }
    }
    Some(config)
}

fn default_scanner_id() -> String {
    "front-desk".to_string()
}

fn resolve_data_dir(cli_data_dir: Option<PathBuf>) -> PathBuf {
    cli_data_dir
        .or_else(|| env::var_os("GATEHOUSE_DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(default_data_dir)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gatehouse")
}

#[cfg(test)]
mod tests {
    use gatehouse_core::models::dedup_key;
    use gatehouse_core::store::FileBlobStore;

    use super::{
        format_drain_summary, format_queue_lines, format_relative_time, normalize_code,
        print_enqueue_notices, resolve_item_id, run_remove, run_scan, AppContext, CliError,
        Connectivity, DrainSummary, QueueItem, QueueStatus,
    };

    fn offline_context(dir: &std::path::Path) -> AppContext {
        AppContext {
            store: FileBlobStore::new(dir),
            connectivity: Connectivity::new(false),
            config: None,
        }
    }

    #[test]
    fn normalize_code_trims_and_rejects_empty() {
        assert_eq!(normalize_code("  HR-1  ").unwrap(), "HR-1");
        assert!(matches!(normalize_code(" \n\t "), Err(CliError::EmptyCode)));
    }

    #[test]
    fn format_relative_time_units() {
        let now = 10_000_000_000;
        assert_eq!(format_relative_time(now - 30_000, now), "just now");
        assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
        assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
        assert_eq!(format_relative_time(now - 50 * 60 * 60_000, now), "2d ago");
    }

    #[test]
    fn format_drain_summary_reports_counts() {
        let summary = DrainSummary {
            succeeded: 2,
            failed: 1,
            needs_reason: 1,
            skipped: 3,
        };
        assert_eq!(
            format_drain_summary(&summary),
            "Synced: 2 checked in, 1 failed, 1 awaiting a reason (3 skipped)"
        );
    }

    #[test]
    fn format_queue_lines_includes_code_status_and_error() {
        let mut item = QueueItem::new("HR-20260208-AAAA", None);
        item.status = QueueStatus::Failed;
        item.last_error = Some("Reservation not found".to_string());
        item.attempts = 2;

        let lines = format_queue_lines(&[item]);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("HR-20260208-AAAA"));
        assert!(lines[0].contains("failed"));
        assert!(lines[0].contains("2/5"));
        assert!(lines[0].contains("Reservation not found"));
    }

    #[test]
    fn resolve_item_id_supports_exact_and_prefix() {
        let item_a = QueueItem::new("HR-A", None);
        let item_b = QueueItem::new("HR-B", None);
        let items = vec![item_a.clone(), item_b.clone()];

        let exact = resolve_item_id(&item_a.id.to_string(), &items).unwrap();
        assert_eq!(exact, item_a.id);

        let prefix: String = item_b.id.to_string().chars().take(20).collect();
        let by_prefix = resolve_item_id(&prefix, &items).unwrap();
        assert_eq!(by_prefix, item_b.id);
    }

    #[test]
    fn resolve_item_id_rejects_missing_and_ambiguous() {
        let items = vec![QueueItem::new("HR-A", None), QueueItem::new("HR-B", None)];

        assert!(matches!(
            resolve_item_id("does-not-exist", &items),
            Err(CliError::ItemNotFound(_))
        ));

        // UUID v7 ids created in the same process share a timestamp prefix.
        let shared: String = items[0].id.to_string().chars().take(4).collect();
        assert!(matches!(
            resolve_item_id(&shared, &items),
            Err(CliError::AmbiguousItemId(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_scan_lands_in_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let context = offline_context(dir.path());

        run_scan("HR-20260208-AAAA", None, &context).await.unwrap();

        let items = context.queue().items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, dedup_key("HR-20260208-AAAA"));
        assert_eq!(items[0].status, QueueStatus::Queued);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_rescan_merges_instead_of_duplicating() {
        let dir = tempfile::tempdir().unwrap();
        let context = offline_context(dir.path());

        run_scan("HR-1", None, &context).await.unwrap();
        run_scan("HR-1", None, &context).await.unwrap();

        assert_eq!(context.queue().items().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_by_prefix_deletes_the_item() {
        let dir = tempfile::tempdir().unwrap();
        let context = offline_context(dir.path());

        run_scan("HR-DROP", None, &context).await.unwrap();
        let items = context.queue().items().unwrap();
        let prefix: String = items[0].id.to_string().chars().take(20).collect();

        run_remove(&prefix, &context).unwrap();
        assert!(context.queue().items().unwrap().is_empty());
    }

    #[test]
    fn enqueue_notices_do_not_panic() {
        let outcome = gatehouse_core::queue::EnqueueOutcome {
            item: QueueItem::new("HR-N", None),
            deduped: true,
            evicted: 2,
        };
        print_enqueue_notices(&outcome);
    }
}
