use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    Collaborators, EditorPhase, HttpTransport, MediaFile, MediaLibrary, MediaUpload,
    SequenceBrowser, SequenceEditor, SessionAuth,
};
use shared::domain::{CatalogItem, MediaKind, SequenceEntryRef, SequenceId};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server_url: String,
    #[arg(long)]
    username: String,
    /// Print listings as JSON.
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List uploaded models and videos.
    Catalog,
    /// List saved sequences.
    Sequences,
    /// Print one sequence with its resolved entries.
    Show { id: String },
    /// Create a sequence from `model:ID` / `video:ID` items.
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        items: Vec<ItemArg>,
    },
    /// Edit a sequence. Removals apply first, then moves, then additions.
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "add")]
        add: Vec<ItemArg>,
        #[arg(long = "remove")]
        remove: Vec<usize>,
        #[arg(long = "move-left")]
        move_left: Vec<usize>,
        #[arg(long = "move-right")]
        move_right: Vec<usize>,
    },
    Delete { id: String },
    /// Upload a model or video file.
    Upload {
        kind: MediaKind,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Debug, Clone)]
struct ItemArg(SequenceEntryRef);

impl FromStr for ItemArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("expected KIND:ID, got '{s}'"))?;
        let kind = kind.parse::<MediaKind>().map_err(|e| e.to_string())?;
        if id.trim().is_empty() {
            return Err(format!("missing item id in '{s}'"));
        }
        Ok(Self(SequenceEntryRef::new(kind, id.trim())))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();
    let args = Args::parse();

    let transport = HttpTransport::new(&args.server_url)?;
    let auth = Arc::new(SessionAuth::new(transport.clone()));
    let user_id = auth.login(&args.username).await?;
    info!(user_id = user_id.0, "signed in");
    let collaborators = Collaborators::http(transport, auth);
    let mut browser = SequenceBrowser::new(collaborators.clone());

    match args.command {
        Command::Catalog => {
            let catalog = browser.load_catalog().await?;
            if args.json {
                let all: Vec<&CatalogItem> =
                    catalog.models().iter().chain(catalog.videos()).collect();
                println!("{}", serde_json::to_string_pretty(&all)?);
            } else {
                for item in catalog.models().iter().chain(catalog.videos()) {
                    println!("{}:{}\t{}", item.kind, item.id, item.display_name);
                }
            }
        }
        Command::Sequences => {
            let sequences = browser.refresh().await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(sequences)?);
            } else {
                for sequence in sequences {
                    println!(
                        "{}\t{}\t{} entries",
                        sequence.id,
                        sequence.document.name,
                        sequence.entries().len()
                    );
                }
            }
        }
        Command::Show { id } => {
            let mut editor = browser.open_existing(SequenceId::from(id)).await?;
            require_editing(&editor)?;
            println!("{} ({})", editor.name(), editor.sequence_id());
            if !editor.description().is_empty() {
                println!("{}", editor.description());
            }
            for (index, entry) in editor.entries().iter().enumerate() {
                println!("{index}\t{}:{}\t{}", entry.kind(), entry.item_id(), entry.label());
            }
            editor.cancel()?;
        }
        Command::Create {
            name,
            description,
            items,
        } => {
            let mut editor = browser.open_new().await?;
            for ItemArg(entry) in items {
                editor.add_entry(catalog_item(&editor, &entry)?)?;
            }
            editor.set_name(name)?;
            editor.set_description(description)?;
            let outcome = editor.save().await?;
            println!("created sequence {}", outcome.sequence.id);
        }
        Command::Edit {
            id,
            name,
            description,
            add,
            remove,
            move_left,
            move_right,
        } => {
            let mut editor = browser.open_existing(SequenceId::from(id)).await?;
            require_editing(&editor)?;
            for index in remove {
                editor.remove_entry(index)?;
            }
            for index in move_left {
                editor.move_left(index)?;
            }
            for index in move_right {
                editor.move_right(index)?;
            }
            for ItemArg(entry) in add {
                editor.add_entry(catalog_item(&editor, &entry)?)?;
            }
            if let Some(name) = name {
                editor.set_name(name)?;
            }
            if let Some(description) = description {
                editor.set_description(description)?;
            }
            let outcome = editor.save().await?;
            println!(
                "saved sequence {} with {} entries",
                outcome.sequence.id,
                outcome.sequence.entries().len()
            );
        }
        Command::Delete { id } => {
            let mut editor = browser.open_existing(SequenceId::from(id)).await?;
            // Deleting does not need resolved entries.
            editor.provide_catalog(Default::default());
            editor.delete().await?;
            println!("deleted sequence {}", editor.sequence_id());
        }
        Command::Upload {
            kind,
            name,
            description,
            file,
        } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read '{}'", file.display()))?;
            let library = MediaLibrary::new(collaborators);
            let record = library
                .upload(
                    kind,
                    MediaUpload {
                        display_name: name,
                        description,
                        file: media_file(&file, bytes),
                    },
                )
                .await?;
            println!(
                "uploaded {}:{} -> {}",
                record.item.kind, record.item.id, record.item.preview_url
            );
        }
    }

    Ok(())
}

fn require_editing(editor: &SequenceEditor) -> Result<()> {
    if editor.phase() != EditorPhase::Editing {
        bail!("catalog unavailable; cannot resolve entries (editor is {})", editor.phase());
    }
    Ok(())
}

fn catalog_item(editor: &SequenceEditor, entry: &SequenceEntryRef) -> Result<CatalogItem> {
    let catalog = editor
        .catalog()
        .ok_or_else(|| anyhow!("catalog unavailable"))?;
    catalog
        .find(entry.kind, &entry.item_id)
        .cloned()
        .ok_or_else(|| anyhow!("{} '{}' is not in the catalog", entry.kind, entry.item_id))
}

fn media_file(path: &Path, bytes: Vec<u8>) -> MediaFile {
    MediaFile {
        filename: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        mime_type: mime_guess::from_path(path).first_raw().map(str::to_string),
        bytes,
    }
}
