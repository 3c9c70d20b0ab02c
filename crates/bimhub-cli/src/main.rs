//! bimhub - browse the BIMHub family catalog and load families into a project

mod config;
mod error;
mod project;

use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::project::{LinePrompt, ProjectDocument, ProjectHost};
use asset_blob_cache::BlobCache;
use bimhub_loader::{AcquisitionOrchestrator, ApplyGateway, AssetRef};
use catalog_api::{CatalogClient, FilterOptions, ReferenceItem};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

/// BIMHub family catalog client
#[derive(Parser)]
#[command(name = "bimhub")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config.json
    #[arg(long, env = "BIMHUB_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the catalog
    Search {
        #[arg(short, long)]
        query: Option<String>,

        #[arg(long, value_name = "ID")]
        category: Option<String>,

        #[arg(long, value_name = "ID")]
        manufacturer: Option<String>,

        #[arg(long, value_name = "ID")]
        revit_version: Option<String>,

        #[arg(long, value_name = "ID")]
        section: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Defaults to the configured page size
        #[arg(long)]
        page_size: Option<u32>,
    },

    /// List family categories
    Categories,
    /// List catalog sections
    Sections,
    /// List manufacturers
    Manufacturers,
    /// List Revit versions
    Versions,

    /// Download a family and load it into a project
    Load {
        #[arg(value_name = "FAMILY_ID")]
        family_id: String,

        /// Project directory
        #[arg(short, long, value_name = "DIR")]
        project: PathBuf,

        /// Overwrite an existing family without asking
        #[arg(long)]
        silent: bool,
    },

    /// List the families loaded into a project
    Families {
        #[arg(short, long, value_name = "DIR")]
        project: PathBuf,
    },

    /// Inspect or empty the download cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    Stats,
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);
    info!(
        config = ?config_path,
        api = %config.api_base_url,
        cache_dir = ?config.cache_dir(),
        "Configuration loaded"
    );

    match cli.command {
        Commands::Search {
            query,
            category,
            manufacturer,
            revit_version,
            section,
            page,
            page_size,
        } => {
            let filter = FilterOptions {
                search: query,
                category_id: category,
                manufacturer_id: manufacturer,
                revit_version_id: revit_version,
                section_id: section,
                page: page.max(1),
                page_size: page_size.unwrap_or_else(|| config.page_size()).clamp(1, 100),
                ..FilterOptions::default()
            };
            search(&catalog_client(&config)?, &filter).await
        }
        Commands::Categories => print_references(catalog_client(&config)?.categories().await?),
        Commands::Sections => print_references(catalog_client(&config)?.sections().await?),
        Commands::Manufacturers => {
            print_references(catalog_client(&config)?.manufacturers().await?)
        }
        Commands::Versions => print_references(catalog_client(&config)?.revit_versions().await?),
        Commands::Load {
            family_id,
            project,
            silent,
        } => load(&config, &family_id, &project, silent).await,
        Commands::Families { project } => {
            for name in ProjectDocument::open(&project)?.family_names()? {
                println!("{}", name);
            }
            Ok(())
        }
        Commands::Cache { command } => {
            let cache = open_cache(&config).await?;
            match command {
                CacheCommands::Stats => {
                    let stats = cache.stats().await;
                    println!("Directory: {}", cache.cache_dir().display());
                    println!("Entries:   {}", stats.entries);
                    println!(
                        "Size:      {:.1} / {} MB",
                        stats.total_size as f64 / (1024.0 * 1024.0),
                        stats.capacity / (1024 * 1024)
                    );
                }
                CacheCommands::Clear => {
                    let removed = cache.clear().await;
                    println!("Removed {} cached files", removed);
                }
            }
            Ok(())
        }
    }
}

fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive("bimhub=info".parse()?)
        .add_directive("asset_blob_cache=info".parse()?)
        .add_directive("catalog_api=info".parse()?);

    // Logs go to stderr so command output stays clean
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    };
    Ok(())
}

fn catalog_client(config: &AppConfig) -> Result<CatalogClient> {
    Ok(CatalogClient::new(
        &config.api_base_url,
        config.api_token(),
        config.request_timeout(),
    )?)
}

async fn open_cache(config: &AppConfig) -> Result<BlobCache> {
    Ok(BlobCache::open(
        config.cache_dir(),
        config.cache_capacity_bytes(),
        Some(config.cache_ttl()),
    )
    .await?)
}

async fn search(client: &CatalogClient, filter: &FilterOptions) -> Result<()> {
    let page = client.families(filter).await?;

    for family in &page.families {
        let category = family.category_name.as_deref().unwrap_or("-");
        let version = family.revit_version_name.as_deref().unwrap_or("-");
        println!("{}\t{}\t[{}]\t{}", family.id, family.display_name(), category, version);
    }
    println!(
        "Page {}/{} ({} families)",
        page.current_page, page.total_pages, page.total_count
    );
    Ok(())
}

fn print_references(items: Arc<Vec<ReferenceItem>>) -> Result<()> {
    for item in items.iter() {
        println!("{}\t{}", item.id, item.name);
    }
    Ok(())
}

async fn load(config: &AppConfig, family_id: &str, project: &Path, silent: bool) -> Result<()> {
    let client = catalog_client(config)?;
    let family = client.family(family_id).await?;
    let asset = AssetRef::from(&family);
    let cache = open_cache(config).await?;
    let document = ProjectDocument::open(project)?;

    let (gateway, runner) = ApplyGateway::new();

    // The project is only ever touched from this thread
    let host_thread = std::thread::Builder::new()
        .name("bimhub-host".to_string())
        .spawn(move || {
            let mut host = ProjectHost::new(Some(document), LinePrompt::stdio());
            runner.run_blocking(&mut host);
        })?;

    let orchestrator = AcquisitionOrchestrator::new(Arc::new(client), Arc::new(cache), gateway);
    let (done_tx, done_rx) = oneshot::channel();
    let name = asset.display_name.clone();

    orchestrator
        .acquire(
            &asset,
            move |stage| eprintln!("{}: {}", name, stage),
            move |success, message| {
                let _ = done_tx.send((success, message));
            },
            !silent,
        )
        .await;

    let (success, message) = done_rx
        .await
        .unwrap_or_else(|_| (false, "Load was abandoned".to_string()));

    // Dropping the last gateway handle stops the runner
    drop(orchestrator);
    if host_thread.join().is_err() {
        warn!("Host thread panicked");
    }

    println!("{}", message);
    if success {
        Ok(())
    } else {
        Err(CliError::Load(message))
    }
}
