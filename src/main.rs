//! tome - personal EPUB library that keeps web stories up to date

mod error;

use crate::error::{ErrorKind, Result};
use clap::{Args, Parser, Subcommand};
use exn::ResultExt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tome_config::Config;
use tome_fetch::CommandFetcher;
use tome_library::{EditRequest, Library, UpdateScheduler};
use tome_records::{Book, BookPatch, Database, NewCleaningConfig, Repository};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tome")]
#[command(version, about = "Personal EPUB library with incremental web-source updates", long_about = None)]
#[command(after_help = "EXAMPLES:
    tome add https://example.com/s/1234     Download a story into the library
    tome edit 3 --remove Text/ch2.xhtml     Remove a chapter from book 3
    tome serve                              Refresh web stories periodically")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the update scheduler until interrupted
    Serve,
    /// Run one update cycle now (resuming an interrupted one)
    Update,
    /// Download a story that isn't in the library yet
    Add { url: String },
    /// Add a local EPUB file
    Upload { path: PathBuf },
    /// Download a web-sourced book again and log whether it grew
    Refresh { id: i64 },
    /// Change a book's title, author or series
    Set(SetArgs),
    /// Delete a book and its files
    Remove { id: i64 },
    /// List books
    List,
    /// Search books by author or series (case-insensitive substring)
    Search(SearchArgs),
    /// Show a book's refresh history
    Log { id: i64 },
    /// List the chapter identifiers of a book's master
    Chapters { id: i64 },
    /// Change the edits applied to a book
    Edit(EditArgs),
    /// Count the words and chapters of an EPUB file
    Count { path: PathBuf },
    /// Manage cleaning policies
    #[command(subcommand)]
    Policy(PolicyCommand),
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SearchArgs {
    #[arg(long)]
    author: Option<String>,
    #[arg(long)]
    series: Option<String>,
}

#[derive(Args)]
struct SetArgs {
    id: i64,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    author: Option<String>,
    #[arg(long)]
    series: Option<String>,
}
impl SetArgs {
    fn patch(self) -> BookPatch {
        BookPatch { title: self.title, author: self.author, series: self.series, cover_path: None }
    }
}

#[derive(Args)]
struct EditArgs {
    id: i64,
    /// Chapter to remove; replaces the current list (repeatable)
    #[arg(long = "remove", value_name = "CHAPTER")]
    remove: Vec<String>,
    /// CSS selector to strip from every chapter; replaces the current list
    /// (repeatable)
    #[arg(long = "selector", value_name = "SELECTOR")]
    selectors: Vec<String>,
    /// Undo every edit
    #[arg(long, conflicts_with_all = ["remove", "selectors"])]
    reset: bool,
}
impl EditArgs {
    fn request(&self) -> EditRequest {
        if self.reset {
            return EditRequest::reset();
        }
        let replace = |values: &Vec<String>| (!values.is_empty()).then(|| values.clone());
        EditRequest { removed_chapters: replace(&self.remove), selectors: replace(&self.selectors) }
    }
}

#[derive(Subcommand)]
enum PolicyCommand {
    /// Add a policy; it applies to books added or refreshed from now on
    Add {
        #[arg(long)]
        name: String,
        /// Regular expression searched in source URLs
        #[arg(long, value_name = "REGEX")]
        pattern: String,
        /// Remove chapters containing a match (repeatable)
        #[arg(long = "chapter-selector", value_name = "SELECTOR")]
        chapter_selectors: Vec<String>,
        /// Strip matching elements from every chapter (repeatable)
        #[arg(long = "content-selector", value_name = "SELECTOR")]
        content_selectors: Vec<String>,
    },
    /// List policies in the order they are tried
    List,
    /// Delete a policy
    Remove { id: i64 },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: could not start runtime: {e}");
            return ExitCode::FAILURE;
        },
    };
    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Command::Count { path } = &cli.command {
        let stats = tome_epub::count(path);
        println!("{} words in {} chapters", stats.words, stats.chapters);
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Configuration)?;
    let (library, db) = open(&config).await?;
    let result = execute(cli.command, &library, &config).await;
    db.close().await;
    result
}

async fn open(config: &Config) -> Result<(Library, Database)> {
    tokio::fs::create_dir_all(&config.library.root).await.or_raise(|| ErrorKind::Io)?;
    let db = Database::connect(config.library.database_path()).await.or_raise(|| ErrorKind::Database)?;
    let fetcher =
        CommandFetcher::new(config.fetch.program.clone(), config.fetch.credentials.clone(), config.fetch.args.clone());
    let library = Library::new(&config.library.root, Repository::from(&db), Arc::new(fetcher));
    Ok((library, db))
}

async fn execute(command: Command, library: &Library, config: &Config) -> Result<()> {
    let records = library.records();
    match command {
        Command::Serve => {
            if !config.schedule.enabled {
                tracing::warn!("Scheduled updates are disabled; nothing to serve");
                return Ok(());
            }
            let handle = UpdateScheduler::new(library.clone(), config.schedule.interval()).spawn();
            tracing::info!(interval = ?config.schedule.interval(), "Update scheduler started");
            _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
            handle.abort();
        },
        Command::Update => {
            let scheduler = UpdateScheduler::new(library.clone(), config.schedule.interval());
            let report = scheduler.run_cycle().await.or_raise(|| ErrorKind::Library)?;
            println!(
                "task {}: {} refreshed, {} already done, {} failed",
                report.task_id, report.processed, report.skipped, report.failed
            );
        },
        Command::Add { url } => print_book(&library.add_web(&url).await.or_raise(|| ErrorKind::Library)?),
        Command::Upload { path } => print_book(&library.upload(&path).await.or_raise(|| ErrorKind::Library)?),
        Command::Refresh { id } => {
            let log = library.refresh(id).await.or_raise(|| ErrorKind::Library)?;
            println!(
                "{}: {} -> {} chapters, {:+} words",
                log.kind,
                log.previous_chapters.unwrap_or_default(),
                log.new_chapters.unwrap_or_default(),
                log.words_added
            );
        },
        Command::Set(args) => {
            let id = args.id;
            let patch = args.patch();
            if patch.is_empty() {
                tracing::warn!("Nothing to change");
                return Ok(());
            }
            print_book(&records.update_book(id, &patch).await.or_raise(|| ErrorKind::Library)?);
        },
        Command::Remove { id } => library.remove(id).await.or_raise(|| ErrorKind::Library)?,
        Command::List => {
            for book in records.list_books().await.or_raise(|| ErrorKind::Library)? {
                print_book(&book);
            }
        },
        Command::Search(args) => {
            let books = match (args.author, args.series) {
                (Some(author), _) => records.search_by_author(author).await,
                (None, Some(series)) => records.search_by_series(series).await,
                (None, None) => Ok(Vec::new()),
            };
            for book in books.or_raise(|| ErrorKind::Library)? {
                print_book(&book);
            }
        },
        Command::Log { id } => {
            if records.get_book(id).await.or_raise(|| ErrorKind::Library)?.is_none() {
                exn::bail!(ErrorKind::NotFound(id));
            }
            for log in records.list_logs(id).await.or_raise(|| ErrorKind::Library)? {
                println!(
                    "{}  {:<8} {:>4} -> {:<4} {:+}",
                    log.timestamp,
                    log.kind.to_string(),
                    log.previous_chapters.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
                    log.new_chapters.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
                    log.words_added
                );
            }
        },
        Command::Chapters { id } => {
            let book = library.book(id).await.or_raise(|| ErrorKind::Library)?;
            for chapter in library.chapters(id).await.or_raise(|| ErrorKind::Library)? {
                let marker = if book.removed_chapters.contains(&chapter) { "-" } else { " " };
                println!("{marker} {chapter}");
            }
        },
        Command::Edit(args) => {
            let book = library.edit(args.id, &args.request()).await.or_raise(|| ErrorKind::Library)?;
            print_book(&book);
        },
        Command::Count { .. } => {},
        Command::Policy(command) => policy(command, library).await?,
    }
    Ok(())
}

async fn policy(command: PolicyCommand, library: &Library) -> Result<()> {
    match command {
        PolicyCommand::Add { name, pattern, chapter_selectors, content_selectors } => {
            let policy = NewCleaningConfig { name, url_pattern: pattern, chapter_selectors, content_selectors };
            let created = library.create_policy(&policy).await.or_raise(|| ErrorKind::Library)?;
            println!("created policy {}", created.id);
        },
        PolicyCommand::List => {
            for policy in library.records().list_policies().await.or_raise(|| ErrorKind::Library)? {
                println!("{:>4}  {}  /{}/", policy.id, policy.name, policy.url_pattern);
                for selector in &policy.chapter_selectors {
                    println!("        remove chapters with: {selector}");
                }
                for selector in &policy.content_selectors {
                    println!("        strip: {selector}");
                }
            }
        },
        PolicyCommand::Remove { id } => {
            if !library.records().delete_policy(id).await.or_raise(|| ErrorKind::Library)? {
                println!("no policy {id}");
            }
        },
    }
    Ok(())
}

fn print_book(book: &Book) {
    let source = book.source.url().unwrap_or("upload");
    println!(
        "{:>4}  {} by {}  [{} / {} words]  {}",
        book.id, book.title, book.author, book.current_words, book.master_words, source
    );
}
