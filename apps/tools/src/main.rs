use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use shared::domain::{CatalogItem, ItemId, MediaKind, UserId};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/media.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        username: String,
    },
    /// Register a catalog item that points at an externally hosted file.
    AddItem {
        user_id: i64,
        kind: MediaKind,
        name: String,
        preview_url: String,
    },
    ListSequences {
        user_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateUser { username } => {
            let user_id = storage.create_user(username.trim()).await?;
            println!("created user_id={}", user_id.0);
        }
        Command::AddItem {
            user_id,
            kind,
            name,
            preview_url,
        } => {
            let user_id = UserId(user_id);
            if !storage.user_exists(user_id).await? {
                bail!("user {} does not exist", user_id.0);
            }
            let item = CatalogItem {
                id: ItemId::generate(),
                kind,
                display_name: name,
                description: String::new(),
                preview_url,
            };
            let record = storage
                .upsert_media_item(user_id, &item, Utc::now())
                .await?;
            println!("created {}:{}", record.item.kind, record.item.id);
        }
        Command::ListSequences { user_id } => {
            for sequence in storage.list_sequences(UserId(user_id)).await? {
                let entries: Vec<String> = sequence
                    .entries()
                    .iter()
                    .map(|e| format!("{}:{}", e.kind, e.item_id))
                    .collect();
                println!(
                    "{}\t{}\t[{}]",
                    sequence.id,
                    sequence.document.name,
                    entries.join(", ")
                );
            }
        }
    }

    Ok(())
}
