//! Command-line interface for driving 7-Zip.
//!
//! Each subcommand runs one archiver job, draws its progress and asks on the
//! terminal whenever the archiver wants a password or an overwrite decision.
//! Ctrl-C cancels the running job.

use archive_shell::{settings_path, ExtractMode, Settings, Shell, ShellEvent, ShellEventKind};
use archiver::{
    format_size, test_report, ArchiveListing, ArchiveType, CompressionLevel, ConflictDecision,
    ConflictPrompt, OperationKind,
};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;
use tokio::sync::mpsc;
use tracing::debug;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "archiver")]
#[command(version, about = "Extract, create and edit archives with 7-Zip", long_about = None)]
struct Cli {
    /// Path to the 7-Zip executable (overrides settings and PATH lookup)
    #[arg(long, global = true)]
    bin: Option<PathBuf>,

    /// Directory holding settings.json
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract an archive
    Extract {
        /// Archive to extract
        archive: PathBuf,

        /// Entries to extract (everything when omitted)
        items: Vec<String>,

        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        /// Drop directory structure
        #[arg(long, requires = "items")]
        flat: bool,

        /// Password for encrypted archives
        #[arg(long)]
        password: Option<String>,
    },

    /// Create a new archive
    Archive {
        /// Files and directories to pack
        #[arg(required = true)]
        sources: Vec<String>,

        /// Archive to create
        #[arg(short, long)]
        out: PathBuf,

        /// Archive type: 7z, zip, tar, gzip, bzip2, xz, wim
        #[arg(long = "type")]
        archive_type: Option<ArchiveType>,

        /// Compression level, 0 (store) to 9 (ultra)
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=9))]
        level: Option<u8>,

        /// Encrypt with this password
        #[arg(long)]
        password: Option<String>,

        /// Pick "name (1).ext" instead of updating an existing archive
        #[arg(long)]
        keep_existing: bool,
    },

    /// Add files to an existing 7z or zip archive
    Add {
        archive: PathBuf,

        #[arg(required = true)]
        files: Vec<String>,

        /// Directory inside the archive to place the files under
        #[arg(long)]
        subdir: Option<String>,
    },

    /// Delete an entry from a 7z or zip archive
    Delete { archive: PathBuf, item: String },

    /// Rename an entry inside a 7z or zip archive
    Rename {
        archive: PathBuf,
        old: String,
        new: String,
    },

    /// Test archive integrity
    Test {
        archive: PathBuf,

        #[arg(long)]
        password: Option<String>,
    },

    /// List archive contents
    List {
        archive: PathBuf,

        #[arg(long)]
        password: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };

    // Exit without waiting on a prompt thread still blocked on stdin
    process::exit(code);
}

async fn run(cli: Cli) -> CliResult<()> {
    let mut settings = Settings::load(&settings_path(cli.config_dir.as_deref())?).await?;
    if let Some(bin) = cli.bin {
        settings.binary_path = Some(bin);
    }
    // Flags are one-off overrides, so the settings are never written back
    let (shell, events) = Shell::new(settings, None)?;

    let (interrupt_tx, interrupts) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    })?;

    let mut session = Session {
        shell,
        events,
        interrupts,
    };

    let result = session.dispatch(cli.command).await;
    session.shell.shutdown().await?;
    result
}

struct Session {
    shell: Shell,
    events: mpsc::UnboundedReceiver<ShellEvent>,
    interrupts: mpsc::UnboundedReceiver<()>,
}

enum Next {
    Event(ShellEvent),
    Interrupt,
    Closed,
}

impl Session {
    async fn dispatch(&mut self, command: Commands) -> CliResult<()> {
        match command {
            Commands::Extract {
                archive,
                items,
                out,
                flat,
                password,
            } => {
                let mode = if flat { ExtractMode::One } else { ExtractMode::All };
                let job_id = self
                    .shell
                    .start_extract(archive, items, out.clone(), mode, password)?;
                self.run_job(&job_id, OperationKind::Extract).await?;
                println!("Extracted to {}", out.display());
            }
            Commands::Archive {
                sources,
                out,
                archive_type,
                level,
                password,
                keep_existing,
            } => {
                let out = if keep_existing {
                    Shell::unique_archive_path(&out)?
                } else {
                    out
                };
                let level = level.map(CompressionLevel::new).transpose()?;
                let job_id =
                    self.shell
                        .start_archive(sources, out.clone(), archive_type, password, level)?;
                self.run_job(&job_id, OperationKind::Archive).await?;
                println!("Created {}", out.display());
            }
            Commands::Add {
                archive,
                files,
                subdir,
            } => {
                let job_id = self.shell.start_add(archive, files, subdir)?;
                self.run_job(&job_id, OperationKind::Add).await?;
            }
            Commands::Delete { archive, item } => {
                let job_id = self.shell.start_delete(archive, item)?;
                self.run_job(&job_id, OperationKind::Delete).await?;
            }
            Commands::Rename { archive, old, new } => {
                let job_id = self.shell.start_rename(archive, old, new)?;
                self.run_job(&job_id, OperationKind::Rename).await?;
            }
            Commands::Test { archive, password } => {
                let job_id = self.shell.start_test(archive, password)?;
                let lines = self.run_job(&job_id, OperationKind::Test).await?;
                println!("{}", test_report(&lines.join("\n")));
            }
            Commands::List {
                archive,
                password,
                json,
            } => {
                let listing = self.shell.list(&archive, password.as_deref()).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&listing)?);
                } else {
                    print_listing(&listing);
                }
            }
        }
        Ok(())
    }

    /// Follow `job_id` to its terminal event, returning its diagnostic lines.
    async fn run_job(&mut self, job_id: &str, kind: OperationKind) -> CliResult<Vec<String>> {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix} [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
                .progress_chars("=> "),
        );
        pb.set_prefix(kind.progress_label());

        let mut lines = Vec::new();
        loop {
            let next = tokio::select! {
                event = self.events.recv() => event.map(Next::Event).unwrap_or(Next::Closed),
                Some(()) = self.interrupts.recv() => Next::Interrupt,
            };

            let event = match next {
                Next::Event(event) if event.job_id == job_id => event,
                Next::Event(_) => continue,
                Next::Interrupt => {
                    self.cancel(job_id, &pb);
                    continue;
                }
                Next::Closed => return Err("event channel closed".into()),
            };

            match event.kind {
                ShellEventKind::Progress { percent, message } => {
                    pb.set_position(percent.into());
                    pb.set_message(message);
                }
                ShellEventKind::Message { line } => {
                    debug!(%line, "archiver");
                    lines.push(line);
                }
                ShellEventKind::PasswordRequired => {
                    let bar = pb.clone();
                    let answer = self
                        .prompt(job_id, &pb, move || bar.suspend(read_password))
                        .await?;
                    if let Some(password) = answer {
                        if let Err(e) = self.shell.resolve_password(job_id, password) {
                            debug!(error = %e, "password no longer wanted");
                        }
                    }
                }
                ShellEventKind::Conflict { prompt } => {
                    let bar = pb.clone();
                    let answer = self
                        .prompt(job_id, &pb, move || bar.suspend(|| ask_conflict(&prompt)))
                        .await?;
                    if let Some(decision) = answer {
                        if let Err(e) = self.shell.resolve_conflict(job_id, decision) {
                            debug!(error = %e, "decision no longer wanted");
                        }
                    }
                }
                ShellEventKind::Finished => {
                    pb.finish_and_clear();
                    return Ok(lines);
                }
                ShellEventKind::Aborted => {
                    pb.abandon_with_message("aborted");
                    return Err("Operation aborted".into());
                }
                ShellEventKind::Failed { error } => {
                    pb.abandon();
                    return Err(error.into());
                }
            }
        }
    }

    /// Ask on the terminal, giving up when Ctrl-C cancels the job first.
    async fn prompt<T: Send + 'static>(
        &mut self,
        job_id: &str,
        pb: &ProgressBar,
        ask: impl FnOnce() -> io::Result<T> + Send + 'static,
    ) -> CliResult<Option<T>> {
        let task = tokio::task::spawn_blocking(ask);
        tokio::select! {
            answer = task => Ok(Some(answer??)),
            Some(()) = self.interrupts.recv() => {
                self.cancel(job_id, pb);
                Ok(None)
            }
        }
    }

    fn cancel(&self, job_id: &str, pb: &ProgressBar) {
        pb.set_message("cancelling...");
        if let Err(e) = self.shell.cancel(job_id) {
            debug!(error = %e, "job already finished");
        }
    }
}

fn read_password() -> io::Result<String> {
    let mut out = io::stdout().lock();
    write!(out, "Enter password: ")?;
    out.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn ask_conflict(prompt: &ConflictPrompt) -> io::Result<ConflictDecision> {
    let mut out = io::stdout().lock();
    writeln!(out, "Would you like to replace the existing file:")?;
    for line in &prompt.existing {
        writeln!(out, "  {}", line)?;
    }
    writeln!(out, "with the file from archive:")?;
    for line in &prompt.incoming {
        writeln!(out, "  {}", line)?;
    }

    loop {
        write!(
            out,
            "(Y)es / (N)o / (A)lways / (S)kip all / A(u)to rename all / (Q)uit? "
        )?;
        out.flush()?;

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer)? == 0 {
            return Ok(ConflictDecision::Quit);
        }
        if let Some(decision) = answer
            .trim()
            .chars()
            .next()
            .and_then(ConflictDecision::from_token)
        {
            return Ok(decision);
        }
    }
}

fn print_listing(listing: &ArchiveListing) {
    for entry in &listing.entries {
        let size = entry.size.map(format_size).unwrap_or_default();
        println!(
            "{:<19} {:<5} {:>14}  {}",
            entry.modified, entry.attributes, size, entry.path
        );
    }
    println!(
        "{} files, {}",
        listing.files().count(),
        format_size(listing.total_size())
    );
}
