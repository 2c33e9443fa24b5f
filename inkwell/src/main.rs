use std::io::Write as _;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use inkwell::actors::SaveNowOutcome;
use inkwell::app_state::AppState;
use inkwell::config::Config;
use shared_types::{StoryDraft, SyncStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "inkwell", version, about = "AI-assisted story writing")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate an opening premise.
    Plot {
        #[arg(long)]
        genre: Option<String>,
    },
    /// Continue a saved draft.
    Continue {
        draft_id: String,
        #[arg(long)]
        direction: Option<String>,
        /// Append the continuation to the draft.
        #[arg(long, default_value_t = false)]
        append: bool,
    },
    /// Describe a character.
    Character {
        name: String,
        #[arg(long = "trait")]
        traits: Vec<String>,
    },
    /// Outline a story from a premise.
    Outline {
        premise: String,
        #[arg(long, default_value_t = 5)]
        chapters: u32,
    },
    /// Ask the writing assistant anything.
    Assist { question: String },
    /// Write into a draft from stdin with auto-save.
    Write {
        draft_id: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// List local drafts.
    Drafts {
        #[arg(long, default_value_t = false)]
        pending: bool,
        #[arg(long, default_value_t = false)]
        conflicts: bool,
    },
    /// Mark a draft as synced, pending, or conflicting.
    MarkSync { draft_id: String, status: String },
    /// Show local storage availability.
    Storage,
}

/// Load the nearest `.env` walking up from the working directory. Runs before
/// logging is set up so `RUST_LOG` from the file applies; the outcome is
/// returned for logging afterwards.
fn load_env_file() -> Option<(PathBuf, Result<(), dotenvy::Error>)> {
    let cwd = std::env::current_dir().ok()?;
    let candidate = cwd
        .ancestors()
        .map(|dir| dir.join(".env"))
        .find(|candidate| candidate.exists())?;
    let result = dotenvy::from_path(&candidate);
    Some((candidate, result))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = load_env_file();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match env_file {
        Some((path, Ok(()))) => tracing::debug!(path = %path.display(), "Loaded environment from .env"),
        Some((path, Err(e))) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Failed to load .env file"
        ),
        None => {}
    }

    let cli = Cli::parse();

    if inkwell::runtime_env::ensure_tls_cert_env().is_none() {
        tracing::warn!("No TLS cert bundle found; HTTPS generation calls may fail");
    }

    let config = Config::from_env()?;
    tracing::debug!(model = %config.model, drafts_db = %config.drafts_db, "Configuration loaded");
    let app = AppState::from_config(config)?;

    match cli.command {
        Command::Plot { genre } => {
            println!("{}", app.assistant().plot_prompt(genre.as_deref()).await.text);
        }
        Command::Continue {
            draft_id,
            direction,
            append,
        } => continue_draft(&app, &draft_id, direction.as_deref(), append).await?,
        Command::Character { name, traits } => {
            println!(
                "{}",
                app.assistant().character_description(&name, &traits).await.text
            );
        }
        Command::Outline { premise, chapters } => {
            println!("{}", app.assistant().outline(&premise, chapters).await.text);
        }
        Command::Assist { question } => {
            println!("{}", app.assistant().assist(&question).await.text);
        }
        Command::Write { draft_id, title } => write_draft(&app, &draft_id, title).await?,
        Command::Drafts { pending, conflicts } => list_drafts(&app, pending, conflicts),
        Command::MarkSync { draft_id, status } => {
            let status = parse_sync_status(&status)?;
            let key = shared_types::draft_key(&draft_id);
            if !app.drafts().update_sync_status(&key, status) {
                anyhow::bail!("no draft named {draft_id}");
            }
            println!("{key}: {status}");
        }
        Command::Storage => {
            let availability = app.drafts().check_storage_availability();
            println!("{}", serde_json::to_string_pretty(&availability)?);
        }
    }

    Ok(())
}

async fn continue_draft(
    app: &AppState,
    draft_id: &str,
    direction: Option<&str>,
    append: bool,
) -> anyhow::Result<()> {
    let drafts = app.drafts();
    let Some(item) = drafts.get_draft::<StoryDraft>(draft_id) else {
        anyhow::bail!("no draft named {draft_id}");
    };

    let continuation = app
        .assistant()
        .continue_story(&item.data.content, direction)
        .await;
    println!("{}", continuation.text);

    if append {
        let mut draft = item.data;
        if !draft.content.is_empty() && !draft.content.ends_with(char::is_whitespace) {
            draft.content.push(' ');
        }
        draft.content.push_str(&continuation.text);
        if !drafts.update_item(&item.key, &draft, Some(SyncStatus::Pending)) {
            anyhow::bail!("failed to append continuation to {draft_id}");
        }
        eprintln!("appended to {} ({} words)", item.key, draft.word_count());
    }
    Ok(())
}

async fn write_draft(app: &AppState, draft_id: &str, title: Option<String>) -> anyhow::Result<()> {
    let stored = app
        .drafts()
        .get_draft::<StoryDraft>(draft_id)
        .map(|item| item.data);
    let mut draft = stored
        .clone()
        .unwrap_or_else(|| StoryDraft::new(draft_id, title.clone().unwrap_or_default()));
    if let Some(title) = title {
        draft.title = title;
    }

    let autosave = app.spawn_draft_autosave(stored.clone()).await?;
    if stored.as_ref() != Some(&draft) {
        autosave.notify_change(draft.clone())?;
    }
    eprintln!("Writing to draft {draft_id}. End input with Ctrl-D.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !draft.content.is_empty() {
            draft.content.push('\n');
        }
        draft.content.push_str(&line);
        autosave.notify_change(draft.clone())?;
    }

    let outcome = if autosave.status().await?.has_unsaved_changes {
        autosave.save_now().await?
    } else {
        SaveNowOutcome::NothingToSave
    };
    let status = autosave.status().await?;
    autosave.stop();

    match outcome {
        SaveNowOutcome::Saved | SaveNowOutcome::NothingToSave => {}
        SaveNowOutcome::Skipped => eprintln!("a save was still in progress"),
        SaveNowOutcome::Vetoed => eprintln!(
            "draft is shorter than {} characters and was not saved",
            app.config().autosave_min_length
        ),
        SaveNowOutcome::Failed(error) => anyhow::bail!("final save failed: {error}"),
    }
    eprintln!(
        "{} words, {} saves, unsaved changes: {}",
        draft.word_count(),
        status.save_count,
        status.has_unsaved_changes
    );
    Ok(())
}

fn list_drafts(app: &AppState, pending: bool, conflicts: bool) {
    let drafts = app.drafts();
    let items = if pending {
        drafts.get_pending_items::<StoryDraft>()
    } else if conflicts {
        drafts.get_conflict_items::<StoryDraft>()
    } else {
        drafts.get_all_drafts::<StoryDraft>()
    };

    let mut out = std::io::stdout().lock();
    for item in items {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{} words\t{}",
            item.key,
            item.sync_status,
            item.timestamp.to_rfc3339(),
            item.data.word_count(),
            item.data.title
        );
    }
}

fn parse_sync_status(raw: &str) -> anyhow::Result<SyncStatus> {
    match raw {
        "synced" => Ok(SyncStatus::Synced),
        "pending" => Ok(SyncStatus::Pending),
        "conflict" => Ok(SyncStatus::Conflict),
        other => Err(anyhow::anyhow!(
            "Invalid sync status '{other}'. Expected synced, pending or conflict"
        )),
    }
}
