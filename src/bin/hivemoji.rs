//! Hivemoji CLI
//!
//! Inspects images, builds upload payloads and resolves owner registries
//! from local account-history dumps.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use hivemoji::cache::{FileLogTransport, FsSnapshotStore, SystemClock};
use hivemoji::error::TransportError;
use hivemoji::upload::{self, broadcast_all, Broadcaster, Upload, UploadRequest};
use hivemoji::{marker_names, sniff, HivemojiConfig, RegistryCache};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hivemoji")]
#[command(about = "Ledger-backed custom emoji registry")]
struct Cli {
    /// Config file layered over the default locations
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what an image file would be registered as
    Inspect {
        image: PathBuf,
    },

    /// Build register payloads for an image
    Upload {
        name: String,
        image: PathBuf,
        /// Still image shown where animation is unwanted
        #[arg(long)]
        fallback: Option<PathBuf>,
        #[arg(long)]
        animated: bool,
        #[arg(long = "loop")]
        loop_: bool,
        /// Append the payloads to this owner's history dump instead of printing them
        #[arg(long)]
        owner: Option<String>,
    },

    /// Build a delete payload
    Delete {
        name: String,
        #[arg(long)]
        owner: Option<String>,
    },

    /// Resolve an owner's registry
    Registry {
        owner: String,
        /// Only resolve the emoji referenced by this text
        #[arg(long)]
        text: Option<String>,
        /// Pick still images where available
        #[arg(long)]
        no_animation: bool,
    },

    /// Show the effective configuration
    Config {
        /// Write it to this file
        #[arg(long)]
        init: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = HivemojiConfig::load_from(cli.config.as_deref())?;

    match cli.command {
        Commands::Inspect { image } => {
            let bytes = read(&image).await?;
            let info = sniff(&bytes)?;
            println!("{}", image.display());
            println!("  mime:     {}", info.mime);
            println!("  size:     {}x{}", info.width, info.height);
            println!("  animated: {}", info.animated);
            println!("  loop:     {}", info.loop_hint);
            println!("  bytes:    {}", bytes.len());
            Ok(())
        }

        Commands::Upload {
            name,
            image,
            fallback,
            animated,
            loop_,
            owner,
        } => {
            let fallback = match fallback {
                Some(path) => Some(read(&path).await?),
                None => None,
            };
            let request = UploadRequest {
                name,
                image: read(&image).await?,
                fallback,
                animated,
                loop_,
            };
            let upload = upload::build_upload(&request, &config.limits)?;
            publish(&config, owner.as_deref(), &upload).await
        }

        Commands::Delete { name, owner } => {
            let upload = upload::delete_payload(&name)?;
            publish(&config, owner.as_deref(), &upload).await
        }

        Commands::Registry {
            owner,
            text,
            no_animation,
        } => {
            let cache = RegistryCache::new(
                Arc::new(FileLogTransport::new(&config.transport.log_dir)),
                Arc::new(FsSnapshotStore::new(&config.cache.store_path)),
                Arc::new(SystemClock),
                config.cache_settings(),
            );
            let needed: Vec<String> = text
                .as_deref()
                .map(|t| marker_names(t).into_iter().collect())
                .unwrap_or_default();
            let registry = cache.get(&owner, &needed).await?;

            if needed.is_empty() {
                println!("{} ({} emoji)", owner, registry.live().count());
                for def in registry.live() {
                    let image = def.select_image(!no_animation);
                    println!(
                        "  :{}: {} {}x{} {} bytes{}",
                        def.name,
                        image.mime,
                        def.width,
                        def.height,
                        image.data.len(),
                        if image.is_fallback { " (fallback)" } else { "" }
                    );
                }
            } else {
                for name in &needed {
                    match registry.get(name) {
                        Some(def) => {
                            let image = def.select_image(!no_animation);
                            println!("  :{}: {} {} bytes", name, image.mime, image.data.len());
                        }
                        None => println!("  :{}: not registered", name),
                    }
                }
            }
            Ok(())
        }

        Commands::Config { init } => {
            if let Some(path) = init {
                if path.exists() {
                    bail!("{} already exists", path.display());
                }
                config.save(&path)?;
                println!("Wrote {}", path.display());
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
            Ok(())
        }
    }
}

async fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

async fn publish(config: &HivemojiConfig, owner: Option<&str>, upload: &Upload) -> anyhow::Result<()> {
    match owner {
        Some(owner) => {
            let broadcaster = HistoryFileBroadcaster {
                dir: config.transport.log_dir.clone(),
            };
            let sent = broadcast_all(&broadcaster, owner, upload).await?;
            println!("Appended {} operation(s) for {}", sent, owner);
        }
        None => {
            for json in &upload.json {
                println!("{}", json);
            }
        }
    }
    Ok(())
}

/// Appends operations to the account-history dumps read by [`FileLogTransport`]
struct HistoryFileBroadcaster {
    dir: PathBuf,
}

#[async_trait]
impl Broadcaster for HistoryFileBroadcaster {
    async fn broadcast(
        &self,
        owner: &str,
        protocol_id: &str,
        json: &str,
        title: &str,
    ) -> Result<(), TransportError> {
        let unavailable = |e: std::io::Error| TransportError::Unavailable(e.to_string());
        let path = self.dir.join(format!("{}.json", owner));

        let mut history = match tokio::fs::read(&path).await {
            Ok(content) => match serde_json::from_slice::<Value>(&content) {
                Ok(Value::Array(entries)) => entries,
                Ok(_) => return Err(TransportError::Malformed("history is not an array".to_string())),
                Err(e) => return Err(TransportError::Malformed(e.to_string())),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(unavailable(e)),
        };

        let next = history
            .iter()
            .filter_map(|entry| entry.get(0).and_then(Value::as_u64))
            .max()
            .map_or(0, |last| last + 1);
        history.push(json!([
            next,
            {
                "op": ["custom_json", {
                    "id": protocol_id,
                    "required_posting_auths": [owner],
                    "json": json,
                }],
                "memo": title,
            }
        ]));

        tokio::fs::create_dir_all(&self.dir).await.map_err(unavailable)?;
        let content = serde_json::to_vec_pretty(&history)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        tokio::fs::write(&path, content).await.map_err(unavailable)?;
        Ok(())
    }
}
