//! galleria - command-line front end for the image collection
//!
//! Resolves the root folder, opens `<root>/galleria.db`, runs one command
//! against the collection and prints the notifications it produced.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use galleria_common::config::{
    default_config_path, write_toml_config, RootFolderInitializer, RootFolderResolver, TomlConfig,
};
use galleria_common::events::{GalleryEvent, Severity};
use galleria_core::codec::{retain_images, UploadFile};
use galleria_core::filter::facet_values;
use galleria_core::models::{ImageRecord, MetadataField, SearchFilters, TagInfo};
use galleria_core::services::{mask_key, AnalysisSummary};
use galleria_core::{Gallery, GalleryError};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

/// Command-line arguments for galleria
#[derive(Parser, Debug)]
#[command(name = "galleria")]
#[command(about = "Manage a local image collection with AI-generated descriptions")]
#[command(version)]
struct Cli {
    /// Root folder holding the collection database
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add image files to the collection
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List images, optionally filtered
    List(ListArgs),
    /// Show one image in detail
    Show { id: Uuid },
    /// Delete an image
    Remove { id: Uuid },
    /// Manage custom tags
    #[command(subcommand)]
    Tag(TagCommand),
    /// Analyze every image not yet analyzed
    Analyze,
    /// Show the values available for structured filters
    Facets,
    /// Manage the Gemini API key
    #[command(subcommand)]
    Key(KeyCommand),
    /// Write a configuration file with default settings
    InitConfig {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Free-text search (structured filters are ignored when set)
    #[arg(short, long)]
    query: Option<String>,
    #[arg(long)]
    medium: Option<String>,
    #[arg(long)]
    environment: Option<String>,
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    mood: Option<String>,
    /// Required tag substring (repeatable, any one matches)
    #[arg(long = "tag")]
    tags: Vec<String>,
}

impl From<ListArgs> for SearchFilters {
    fn from(args: ListArgs) -> Self {
        SearchFilters {
            query: args.query.unwrap_or_default(),
            medium: args.medium,
            environment: args.environment,
            style: args.style,
            mood: args.mood,
            tags: (!args.tags.is_empty()).then_some(args.tags),
        }
    }
}

#[derive(Subcommand, Debug)]
enum TagCommand {
    /// Attach a tag
    Add {
        id: Uuid,
        text: String,
        #[arg(long, default_value = TagInfo::DEFAULT_COLOR)]
        color: String,
    },
    /// Detach a tag
    Remove { id: Uuid, text: String },
    /// Change a tag's color
    Recolor { id: Uuid, text: String, color: String },
}

#[derive(Subcommand, Debug)]
enum KeyCommand {
    /// Store the API key
    Set { key: String },
    /// Remove the stored API key
    Clear,
    /// Show the masked key and where it comes from
    Show,
}

fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = TomlConfig::load_or_default(cli.config.as_deref());
    init_tracing(&config)?;

    info!(
        "galleria {} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GALLERIA_GIT_COMMIT"),
        env!("GALLERIA_BUILT_AT")
    );

    if let Command::InitConfig { force } = cli.command {
        return init_config(cli.config, force);
    }

    // Step 1: Resolve root folder
    let root_folder = RootFolderResolver::new(cli.root_folder.clone(), &config).resolve();

    // Step 2: Create root folder directory if missing
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    info!("Root folder: {}", initializer.root().display());

    // Step 3: Open or create database
    let db_path = initializer.database_path();
    if initializer.database_exists() {
        info!("Database: {}", db_path.display());
    } else {
        info!("Creating new database: {}", db_path.display());
    }

    let gallery = Gallery::open(&db_path, &config)
        .await
        .context("Failed to open image collection")?;
    let mut events = gallery.event_bus.subscribe();

    let outcome = run_command(&gallery, &config, cli.command).await;

    print_notifications(&mut events);
    gallery.repository.teardown().await;

    match outcome {
        // Already reported through a notification
        Err(e) if is_notified(&e) => std::process::exit(1),
        other => other,
    }
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let Some(path) = path.or_else(default_config_path) else {
        bail!("Could not determine config directory; pass --config");
    };
    if path.exists() && !force {
        bail!("{} already exists (use --force to replace it)", path.display());
    }

    write_toml_config(&TomlConfig::default(), &path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn is_notified(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<GalleryError>(),
        Some(
            GalleryError::Upload { .. }
                | GalleryError::AlreadyAnalyzing
                | GalleryError::MissingCredential
        )
    )
}

async fn run_command(gallery: &Gallery, config: &TomlConfig, command: Command) -> Result<()> {
    let repository = &gallery.repository;

    match command {
        Command::Add { paths } => {
            let files = paths.into_iter().map(UploadFile::from_path).collect();
            let (images, rejected) = retain_images(files);
            for file in &rejected {
                warn!(filename = %file.name(), "Skipping non-image file");
            }
            if images.is_empty() {
                bail!("No image files to add");
            }

            for record in repository.add_many(images).await? {
                println!("{}  {}", record.id, record.filename);
            }
        }

        Command::List(args) => {
            let criteria = SearchFilters::from(args);
            let records = repository.filtered(&criteria).await;
            for record in &records {
                print_summary_line(record);
            }
            println!("{} of {} images", records.len(), repository.len().await);
        }

        Command::Show { id } => match repository.get(id).await {
            Some(record) => print_details(&record)?,
            None => bail!("No image with id {}", id),
        },

        Command::Remove { id } => {
            if !repository.remove(id).await? {
                bail!("No image with id {}", id);
            }
        }

        Command::Tag(TagCommand::Add { id, text, color }) => {
            let text = text.trim();
            if text.is_empty() {
                bail!("Tag text must not be blank");
            }
            if !repository.add_tag(id, TagInfo::new(text, color)).await? {
                println!("Tag not added (unknown image or tag already present)");
            }
        }

        Command::Tag(TagCommand::Remove { id, text }) => {
            if !repository.remove_tag(id, &text).await? {
                println!("Tag not found");
            }
        }

        Command::Tag(TagCommand::Recolor { id, text, color }) => {
            if !repository.recolor_tag(id, &text, color).await? {
                println!("Tag not found");
            }
        }

        Command::Analyze => {
            let AnalysisSummary {
                requested,
                analyzed,
                failed,
                vanished,
            } = gallery.coordinator.run().await?;
            if requested > 0 {
                println!(
                    "Analyzed {} of {} images ({} failed, {} removed during the run)",
                    analyzed, requested, failed, vanished
                );
            }
        }

        Command::Facets => {
            let records = repository.snapshot().await;
            for field in MetadataField::ALL {
                let values = facet_values(&records, field);
                println!("{}: {}", field, values.join(", "));
            }
        }

        Command::Key(KeyCommand::Set { key }) => {
            gallery.credentials.set(&key).await?;
            println!("API key saved: {}", mask_key(key.trim()));
        }

        Command::Key(KeyCommand::Clear) => {
            gallery.credentials.clear().await?;
            println!("API key removed");
        }

        Command::Key(KeyCommand::Show) => match gallery.credentials.resolve(config).await {
            Some((key, source)) => println!("{} (from {})", mask_key(&key), source),
            None => println!("No API key configured"),
        },

        // Handled before the database is opened
        Command::InitConfig { .. } => {}
    }

    Ok(())
}

fn print_summary_line(record: &ImageRecord) {
    let tags: Vec<&str> = record.custom_tags.iter().map(|t| t.text.as_str()).collect();
    println!(
        "{}  {:<32} {:<10} {}",
        record.id,
        record.filename,
        if record.analyzed { "analyzed" } else { "pending" },
        tags.join(", ")
    );
}

fn print_details(record: &ImageRecord) -> Result<()> {
    println!("id:        {}", record.id);
    println!("filename:  {}", record.filename);
    println!("uploaded:  {}", record.uploaded_at.to_rfc3339());
    println!("size:      {} bytes encoded", record.encoded_bytes.len());
    for tag in &record.custom_tags {
        println!("tag:       {} ({})", tag.text, tag.color);
    }
    match &record.metadata {
        Some(metadata) => println!("{}", serde_json::to_string_pretty(metadata)?),
        None => println!("not analyzed"),
    }
    Ok(())
}

fn print_notifications(events: &mut broadcast::Receiver<GalleryEvent>) {
    loop {
        match events.try_recv() {
            Ok(event) => {
                if let Some(notification) = event.notification() {
                    match notification.severity {
                        Severity::Error => eprintln!("{}", notification),
                        _ => println!("{}", notification),
                    }
                }
            }
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "Missed notifications");
            }
            Err(_) => break,
        }
    }
}
