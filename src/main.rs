use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

use dq_admin::admin::hooks::{DEFAULT_LOG_LEVEL, DEFAULT_LOG_LIMIT, DEFAULT_METRICS_HOURS};
use dq_admin::admin::{AdminQueries, DashboardStats, Session};
use dq_admin::api::types::{
  AnalysisRequest, NewQuote, Quote, QuoteListParams, QuotePatch, SentimentJob, SystemHealth,
};
use dq_admin::api::ApiClient;
use dq_admin::config::Config;
use dq_admin::logging;
use dq_admin::query::QueryClient;
use dq_admin::worker::{
  CacheStorage, FetchOutcome, FetchRequest, HttpNetwork, Notification, Notifier, OfflineWorker,
  SqliteCacheStorage, SyncOutcome, WorkerSettings, WorkerState,
};

#[derive(Parser, Debug)]
#[command(name = "dq-admin")]
#[command(about = "Admin client for the Daily Quote service")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/dq-admin/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Log in; the password is read from DQ_ADMIN_PASSWORD
  Login {
    #[arg(short, long)]
    username: Option<String>,
  },
  Logout,
  /// Show the logged-in user
  Whoami,
  /// Summary of quotes, sentiment, files and system health
  Dashboard {
    /// Keep running and print the summary whenever it changes
    #[arg(long)]
    watch: bool,
  },
  Quotes {
    #[command(subcommand)]
    command: QuotesCommand,
  },
  Files {
    #[command(subcommand)]
    command: FilesCommand,
  },
  Sentiment {
    #[command(subcommand)]
    command: SentimentCommand,
  },
  System {
    #[command(subcommand)]
    command: SystemCommand,
  },
  /// Drive the offline cache worker
  Offline {
    #[command(subcommand)]
    command: OfflineCommand,
  },
}

#[derive(Subcommand, Debug)]
enum QuotesCommand {
  List {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 50)]
    limit: u32,
    #[arg(short, long)]
    search: Option<String>,
    #[arg(short, long)]
    language: Option<String>,
    #[arg(short, long)]
    category: Option<String>,
  },
  Get {
    id: i64,
  },
  Add {
    text: String,
    #[arg(short, long)]
    author: String,
    #[arg(short, long, default_value = "en")]
    language: String,
    #[arg(short, long)]
    category: Option<String>,
  },
  Update {
    id: i64,
    #[arg(long)]
    text: Option<String>,
    #[arg(short, long)]
    author: Option<String>,
    #[arg(short, long)]
    language: Option<String>,
    #[arg(short, long)]
    category: Option<String>,
  },
  Delete {
    id: i64,
  },
  /// Import a quotes file
  Import {
    path: PathBuf,
    #[arg(short, long, default_value = "en")]
    language: String,
  },
}

#[derive(Subcommand, Debug)]
enum FilesCommand {
  List,
  Show { filename: String },
  Backup { filename: String },
}

#[derive(Subcommand, Debug)]
enum SentimentCommand {
  Stats,
  Distribution {
    #[arg(short, long)]
    language: Option<String>,
    #[arg(short, long)]
    author: Option<String>,
  },
  /// Start an analysis job
  Analyze {
    #[arg(short, long, default_value = "en")]
    language: String,
    #[arg(long)]
    force: bool,
    /// Poll the job until it finishes
    #[arg(long)]
    follow: bool,
  },
  Job {
    job_id: String,
  },
}

#[derive(Subcommand, Debug)]
enum SystemCommand {
  Health {
    #[arg(long)]
    watch: bool,
  },
  Processes,
  Logs {
    #[arg(short, long, default_value = DEFAULT_LOG_LEVEL)]
    level: String,
    #[arg(short = 'n', long, default_value_t = DEFAULT_LOG_LIMIT)]
    limit: u32,
  },
  Metrics {
    #[arg(long, default_value_t = DEFAULT_METRICS_HOURS)]
    hours: u32,
  },
}

#[derive(Subcommand, Debug)]
enum OfflineCommand {
  /// Prime this version's cache store
  Install,
  /// Delete every other version's store
  Activate,
  /// Answer a request the way the worker would
  Fetch {
    url: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// List cache stores and their entries
  Stores,
  /// Run a background sync tag
  Sync {
    #[arg(default_value = "quote-sync")]
    tag: String,
  },
  /// Deliver a push payload such as '{"title": "...", "body": "..."}'
  Push {
    payload: String,
    /// Also click the shown notification
    #[arg(long)]
    click: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let data_dir = Config::data_dir()?;
  let _log_guard = logging::init(&data_dir)?;

  let api = ApiClient::new(&config.api)?;
  let client = QueryClient::new(config.queries.client_config());
  let session = Session::new(
    AdminQueries::new(client, api),
    data_dir.join("token"),
    config.dev_mock_auth,
  );
  session.restore(Config::get_token())?;

  match args.command {
    Command::Login { username } => {
      let username = username
        .or_else(|| config.api.username.clone())
        .ok_or_else(|| eyre!("No username given. Pass --username or set api.username."))?;
      let password = Config::get_password()?;
      let user = session.login(&username, &password).await?;
      println!("Logged in as {} ({:?})", user.username, user.role);
    }
    Command::Logout => {
      session.logout().await?;
      println!("Logged out");
    }
    Command::Whoami => {
      let user = session.current_user().await?;
      println!("{} <{}> {:?}", user.username, user.email, user.role);
    }
    Command::Dashboard { watch } => {
      require_login(&session)?;
      dashboard(session.queries(), watch).await?;
    }
    Command::Quotes { command } => {
      require_login(&session)?;
      quotes(session.queries(), command).await?;
    }
    Command::Files { command } => {
      require_login(&session)?;
      files(session.queries(), command).await?;
    }
    Command::Sentiment { command } => {
      require_login(&session)?;
      sentiment(session.queries(), command).await?;
    }
    Command::System { command } => {
      require_login(&session)?;
      system(session.queries(), command).await?;
    }
    Command::Offline { command } => {
      offline(&config, &data_dir, session.queries().api().clone(), command).await?;
    }
  }

  Ok(())
}

fn require_login(session: &Session) -> Result<()> {
  if session.is_authenticated() {
    Ok(())
  } else {
    Err(eyre!("Not logged in. Run `dq-admin login` first."))
  }
}

// ============================================================================
// Dashboard
// ============================================================================

async fn dashboard(queries: &AdminQueries, watch: bool) -> Result<()> {
  let mut watcher = queries.watch_dashboard();
  let mut last = watcher.settled().await;
  print_dashboard(&last);
  for (key, error) in watcher.errors() {
    eprintln!("warning: {} unavailable: {}", key, error);
  }

  if !watch {
    return Ok(());
  }

  loop {
    tokio::select! {
      stats = watcher.changed() => {
        if stats != last {
          println!();
          print_dashboard(&stats);
          last = stats;
        }
      }
      _ = tokio::signal::ctrl_c() => return Ok(()),
    }
  }
}

fn print_dashboard(stats: &DashboardStats) {
  println!("Quotes       {}", stats.total_quotes);
  println!("Files        {}", stats.total_files);
  println!("Languages    {}", stats.languages);
  println!("Authors      {}", stats.authors);
  println!("Categories   {}", stats.categories);
  println!("Analyzed     {}", stats.sentiment_analyzed);
  println!("System       {}", stats.system_status);
  println!(
    "CPU {:.1}%  Memory {:.1}%  Disk {:.1}%",
    stats.cpu_usage, stats.memory_usage, stats.disk_usage
  );
}

// ============================================================================
// Quotes and files
// ============================================================================

async fn quotes(queries: &AdminQueries, command: QuotesCommand) -> Result<()> {
  let client = queries.client();
  match command {
    QuotesCommand::List {
      page,
      limit,
      search,
      language,
      category,
    } => {
      let params = QuoteListParams {
        search,
        language,
        category,
        ..QuoteListParams::page(page, limit)
      };
      let list = client.fetch_query(&queries.quotes(params)).await?;
      for quote in &list.quotes {
        print_quote(quote);
      }
      println!("{} quote(s) on page {}", list.total, page);
    }
    QuotesCommand::Get { id } => {
      let quote = client.fetch_query(&queries.quote(id)).await?;
      print_quote(&quote);
    }
    QuotesCommand::Add {
      text,
      author,
      language,
      category,
    } => {
      let quote = queries
        .create_quote()
        .mutate(NewQuote {
          text,
          author,
          language,
          category,
        })
        .await?;
      println!("Created quote {}", quote.id);
    }
    QuotesCommand::Update {
      id,
      text,
      author,
      language,
      category,
    } => {
      let patch = QuotePatch {
        text,
        author,
        language,
        category,
      };
      let quote = queries.update_quote().mutate((id, patch)).await?;
      print_quote(&quote);
    }
    QuotesCommand::Delete { id } => {
      queries.delete_quote().mutate(id).await?;
      println!("Deleted quote {}", id);
    }
    QuotesCommand::Import { path, language } => {
      let result = queries.import_quotes().mutate((path, language)).await?;
      println!(
        "Imported {} quote(s), skipped {} duplicate(s)",
        result.imported, result.duplicates
      );
    }
  }
  Ok(())
}

fn print_quote(quote: &Quote) {
  println!(
    "#{:<5} [{}] \"{}\" - {}{}",
    quote.id,
    quote.language,
    quote.text,
    quote.author,
    quote
      .category
      .as_deref()
      .map(|c| format!(" ({})", c))
      .unwrap_or_default()
  );
}

async fn files(queries: &AdminQueries, command: FilesCommand) -> Result<()> {
  let client = queries.client();
  match command {
    FilesCommand::List => {
      let list = client.fetch_query(&queries.quote_files()).await?;
      for file in &list.files {
        println!(
          "{:<30} {:>8} bytes {:>6} lines  {}",
          file.filename, file.size, file.lines, file.modified
        );
      }
    }
    FilesCommand::Show { filename } => {
      let content = client.fetch_query(&queries.file_content(&filename)).await?;
      for line in &content.quotes {
        println!("{}", line);
      }
      println!(
        "{}: {} quote(s), {} line(s)",
        content.filename, content.quote_count, content.total_lines
      );
    }
    FilesCommand::Backup { filename } => {
      let result = queries.backup_file().mutate(filename).await?;
      println!("{}", result.message);
    }
  }
  Ok(())
}

// ============================================================================
// Sentiment
// ============================================================================

async fn sentiment(queries: &AdminQueries, command: SentimentCommand) -> Result<()> {
  let client = queries.client();
  match command {
    SentimentCommand::Stats => {
      let stats = client.fetch_query(&queries.sentiment_stats()).await?;
      println!("Analyzed   {}", stats.total_analyzed);
      println!(
        "Positive   {} ({:.1}%)",
        stats.positive_count, stats.distribution.positive
      );
      println!(
        "Negative   {} ({:.1}%)",
        stats.negative_count, stats.distribution.negative
      );
      println!(
        "Neutral    {} ({:.1}%)",
        stats.neutral_count, stats.distribution.neutral
      );
      println!("Compound   {:.3}", stats.average_compound);
    }
    SentimentCommand::Distribution { language, author } => {
      let distribution = client
        .fetch_query(&queries.sentiment_distribution(language, author))
        .await?;
      for (label, share) in &distribution.distribution {
        let count = distribution.counts.get(label).copied().unwrap_or(0);
        println!("{:<10} {:>6} {:>6.1}%", label, count, share);
      }
      println!("{} total", distribution.total);
    }
    SentimentCommand::Analyze {
      language,
      force,
      follow,
    } => {
      let job = queries
        .start_analysis()
        .mutate(AnalysisRequest {
          language,
          force_reanalyze: force,
        })
        .await?;
      print_job(&job);
      if follow && !job.is_finished() {
        follow_job(queries, &job.job_id).await?;
      }
    }
    SentimentCommand::Job { job_id } => {
      let job = client.fetch_query(&queries.sentiment_job(&job_id)).await?;
      print_job(&job);
    }
  }
  Ok(())
}

async fn follow_job(queries: &AdminQueries, job_id: &str) -> Result<()> {
  let mut observer = queries.client().observe(queries.sentiment_job(job_id));
  let mut last: Option<SentimentJob> = None;

  loop {
    let result = observer.changed().await;
    if result.is_error() && !result.is_fetching {
      let error = result.error.unwrap_or_default();
      return Err(eyre!("Failed to poll job {}: {}", job_id, error));
    }
    let Some(job) = result.data() else {
      continue;
    };
    if last.as_ref() != Some(job) {
      print_job(job);
      last = Some(job.clone());
    }
    if job.is_finished() {
      return Ok(());
    }
  }
}

fn print_job(job: &SentimentJob) {
  println!(
    "job {} {} {:.0}% {}",
    job.job_id, job.status, job.progress, job.message
  );
}

// ============================================================================
// System
// ============================================================================

async fn system(queries: &AdminQueries, command: SystemCommand) -> Result<()> {
  let client = queries.client();
  match command {
    SystemCommand::Health { watch } => {
      let mut observer = client.observe(queries.system_health());
      let result = observer.settled().await;
      if let Some(error) = &result.error {
        return Err(eyre!("Failed to load system health: {}", error));
      }
      if let Some(health) = result.data() {
        print_health(health);
      }
      if !watch {
        return Ok(());
      }

      let mut last = result.data;
      loop {
        tokio::select! {
          result = observer.changed() => {
            if result.data != last {
              if let Some(health) = result.data() {
                println!();
                print_health(health);
              }
              last = result.data;
            }
          }
          _ = tokio::signal::ctrl_c() => return Ok(()),
        }
      }
    }
    SystemCommand::Processes => {
      let processes = client.fetch_query(&queries.system_processes()).await?;
      for process in processes.iter() {
        println!(
          "{:<24} {:<10} last {}  next {}  {:.1}% ok",
          process.name, process.status, process.last_run, process.next_run, process.success_rate
        );
      }
    }
    SystemCommand::Logs { level, limit } => {
      let logs = client.fetch_query(&queries.system_logs(&level, limit)).await?;
      for entry in &logs.logs {
        println!(
          "{} {:<7} {:<16} {}",
          entry.timestamp, entry.level, entry.module, entry.message
        );
      }
      println!("{} of {} entries ({})", logs.logs.len(), logs.total, logs.level_filter);
    }
    SystemCommand::Metrics { hours } => {
      let metrics = client.fetch_query(&queries.system_metrics(hours)).await?;
      for (name, value) in &metrics.summary {
        println!("{:<24} {:.2}", name, value);
      }
      println!(
        "{} sample(s) from {} to {}",
        metrics.metrics.len(),
        metrics.time_range.start,
        metrics.time_range.end
      );
    }
  }
  Ok(())
}

fn print_health(health: &SystemHealth) {
  println!("Status     {}", health.status);
  println!("Uptime     {}", health.uptime);
  println!("Database   {}", health.database_status);
  println!(
    "CPU {:.1}%  Memory {:.1}%  Disk {:.1}%",
    health.cpu_usage, health.memory_usage, health.disk_usage
  );
}

// ============================================================================
// Offline worker
// ============================================================================

/// Prints notifications instead of showing them.
struct TerminalNotifier;

impl Notifier for TerminalNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    println!("[notification] {}: {}", notification.title, notification.body);
    Ok(())
  }

  fn close(&self, notification: &Notification) -> Result<()> {
    println!("[notification closed] {}", notification.title);
    Ok(())
  }

  fn open_window(&self, url: &Url) -> Result<()> {
    println!("[open] {}", url);
    Ok(())
  }
}

async fn offline(
  config: &Config,
  data_dir: &std::path::Path,
  api: ApiClient,
  command: OfflineCommand,
) -> Result<()> {
  let settings = WorkerSettings::from_config(&config.worker)?;
  let storage = SqliteCacheStorage::open_path(&data_dir.join("offline-cache.db"))?;
  let network = HttpNetwork::new(
    &settings.scope,
    Duration::from_secs(config.api.timeout_secs),
  )?;

  let mut worker = OfflineWorker::new(
    settings,
    Arc::new(storage),
    Arc::new(network),
    Arc::new(TerminalNotifier),
  );
  for tag in &config.worker.sync_tags {
    let api = api.clone();
    worker = worker.with_sync_task(tag.clone(), move || {
      let api = api.clone();
      async move {
        let list = api.list_quotes(&QuoteListParams::page(1, 50)).await?;
        info!(count = list.total, "quotes synced");
        Ok::<_, color_eyre::Report>(())
      }
    });
  }

  let state = worker.resume()?;
  let cache_name = worker.settings().cache_name.clone();

  match command {
    OfflineCommand::Install => {
      if state != WorkerState::Parsed {
        println!("{} is already {}", cache_name, state);
        return Ok(());
      }
      worker.install().await?;
      println!(
        "Installed {} ({} resources)",
        cache_name,
        worker.settings().precache.len()
      );
    }
    OfflineCommand::Activate => match state {
      WorkerState::Activated => println!("{} is already active", cache_name),
      WorkerState::Installed => {
        let deleted = worker.activate()?;
        for name in &deleted {
          println!("Deleted {}", name);
        }
        println!("Activated {}", cache_name);
      }
      _ => {
        return Err(eyre!(
          "{} is not installed. Run `dq-admin offline install` first.",
          cache_name
        ))
      }
    },
    OfflineCommand::Fetch { url, navigate } => {
      let url = Url::parse(&url)
        .or_else(|_| worker.settings().scope.join(&url))
        .map_err(|e| eyre!("Invalid url {}: {}", url, e))?;
      let request = if navigate {
        FetchRequest::navigate(url)
      } else {
        FetchRequest::get(url)
      };

      let outcome = worker.handle_fetch(&request).await?;
      let source = match &outcome {
        FetchOutcome::Passthrough => "passthrough",
        FetchOutcome::Cache(_) => "cache",
        FetchOutcome::Network(_) => "network",
        FetchOutcome::Offline(_) => "offline page",
      };
      match outcome.response() {
        Some(response) => println!(
          "{} {} from {} ({} bytes)",
          response.status,
          request.url,
          source,
          response.body.len()
        ),
        None => println!("{} not intercepted ({})", request.url, state),
      }
    }
    OfflineCommand::Stores => {
      let storage = worker.storage();
      for name in storage.keys()? {
        let marker = if name == cache_name { "*" } else { " " };
        let entries = storage.entries(&name)?;
        println!("{} {} ({} entries)", marker, name, entries.len());
        for entry in entries {
          println!("    {} {} ({} bytes)", entry.status, entry.url, entry.size);
        }
      }
    }
    OfflineCommand::Sync { tag } => match worker.handle_sync(&tag).await {
      SyncOutcome::Completed => println!("Sync {} completed", tag),
      SyncOutcome::Failed => println!("Sync {} failed (see log)", tag),
      SyncOutcome::Ignored => println!("No sync task for {}", tag),
    },
    OfflineCommand::Push { payload, click } => {
      match worker.handle_push(Some(payload.as_bytes()))? {
        Some(notification) if click => worker.handle_notification_click(&notification)?,
        _ => {}
      }
    }
  }

  Ok(())
}
