//! Command-line interface for shelf.
//!
//! Provides commands for updating catalogs, installing and uninstalling
//! item packages, inspecting local state, and searching installed content.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{resolve_root, Layout};
use crate::controller::{ContentController, InstallOutcome};
use crate::domain::{InstallPriority, Item, SecureSource};
use crate::transport::ProgressFn;

/// shelf - Local content synchronization and caching engine
#[derive(Parser, Debug)]
#[command(name = "shelf")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Content root directory (defaults to $SHELF_ROOT, then ~/.shelf)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Origin base URL
    #[arg(long, global = true, env = "SHELF_ORIGIN")]
    pub origin: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch the latest catalogs and rebuild the merged catalog
    Update {
        /// Licensed source in name=url form (repeatable); previously added
        /// sources are kept and refreshed when none are given
        #[arg(long = "source")]
        sources: Vec<String>,

        /// Drop every previously added licensed source
        #[arg(long, conflicts_with = "sources")]
        clear_sources: bool,
    },

    /// Download and install an item package
    Install {
        /// Item external id
        external_id: String,

        /// Jump ahead of queued transfers
        #[arg(long)]
        high_priority: bool,
    },

    /// Remove an installed item package
    Uninstall {
        /// Item external id
        external_id: String,
    },

    /// Show installed catalogs and item state
    Status,

    /// Search installed content
    Search {
        /// Search query; wrap in quotes inside quotes for a phrase match
        query: String,

        /// Restrict the search to one installed item
        #[arg(long)]
        item: Option<String>,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let controller = open_controller(self.root, &self.origin)?;
        match self.command {
            Commands::Update {
                sources,
                clear_sources,
            } => update(&controller, &sources, clear_sources).await,
            Commands::Install {
                external_id,
                high_priority,
            } => install(&controller, &external_id, high_priority).await,
            Commands::Uninstall { external_id } => uninstall(&controller, &external_id),
            Commands::Status => status(&controller),
            Commands::Search { query, item } => search(&controller, &query, item.as_deref()),
        }
    }
}

fn open_controller(root: Option<PathBuf>, origin: &str) -> Result<ContentController> {
    let root = resolve_root(root)?;
    let controller = ContentController::new(Layout::new(root), origin)
        .context("Failed to open content root")?;
    Ok(controller)
}

/// Resolve an item by external id against the merged catalog
fn find_item(controller: &ContentController, external_id: &str) -> Result<Item> {
    let catalog = controller
        .catalog()
        .context("No catalog installed; run `shelf update` first")?;
    catalog
        .item_with_external_id(external_id)?
        .with_context(|| format!("No item with external id {}", external_id))
}

async fn update(
    controller: &ContentController,
    sources: &[String],
    clear_sources: bool,
) -> Result<()> {
    let parsed = sources
        .iter()
        .map(|raw| parse_source(raw))
        .collect::<Result<Vec<_>>>()?;
    // Without an explicit source list, installed sources are kept as they are
    let secure_sources = if clear_sources || !parsed.is_empty() {
        Some(parsed.as_slice())
    } else {
        None
    };

    let update = controller.update_catalog(secure_sources).await?;
    println!(
        "Default catalog at version {} ({})",
        update.default_outcome.version(),
        if update.rebuilt {
            "merged catalog rebuilt"
        } else {
            "already current"
        }
    );
    for failed in &update.failed_sources {
        eprintln!("Source {} failed: {}", failed.name, failed.error);
    }
    Ok(())
}

async fn install(
    controller: &ContentController,
    external_id: &str,
    high_priority: bool,
) -> Result<()> {
    let item = find_item(controller, external_id)?;
    let priority = if high_priority {
        InstallPriority::High
    } else {
        InstallPriority::Default
    };
    let progress: ProgressFn = Box::new(|fraction| {
        tracing::debug!(percent = (fraction * 100.0) as u32, "downloading");
    });

    match controller.install_item(&item, priority, progress).await? {
        InstallOutcome::Installed { version } => {
            println!(
                "Installed {} (package version {})",
                item.title, version.item_package_version
            );
        }
        InstallOutcome::AlreadyInstalled { version } => {
            println!(
                "{} already installed (package version {})",
                item.title, version.item_package_version
            );
        }
    }
    Ok(())
}

fn uninstall(controller: &ContentController, external_id: &str) -> Result<()> {
    let item = find_item(controller, external_id)?;
    controller.uninstall_item(&item)?;
    println!("Uninstalled {}", item.title);
    Ok(())
}

fn status(controller: &ContentController) -> Result<()> {
    let catalogs = controller.installed_catalogs()?;
    if catalogs.is_empty() {
        println!("No catalogs installed; run `shelf update` first");
        return Ok(());
    }
    println!("Catalogs:");
    for catalog in &catalogs {
        println!("  {} (version {})", catalog.name, catalog.version);
    }

    let installed = controller.installed_item_ids()?;
    println!("Installed items: {}", installed.len());
    let catalog = controller.catalog()?;
    for item_id in installed {
        match (catalog.item_with_id(item_id)?, controller.installed_version(item_id)?) {
            (Some(item), Some(version)) => println!(
                "  {} {} (package version {})",
                item.external_id, item.title, version.item_package_version
            ),
            _ => println!("  item {} (not in catalog)", item_id),
        }
    }

    let errored = controller.errored_item_ids()?;
    if !errored.is_empty() {
        println!("Errored installs: {:?}", errored);
    }
    Ok(())
}

fn search(controller: &ContentController, query: &str, item: Option<&str>) -> Result<()> {
    let item_ids = match item {
        Some(external_id) => vec![find_item(controller, external_id)?.id],
        None => controller.installed_item_ids()?,
    };
    if item_ids.is_empty() {
        println!("No installed items to search");
        return Ok(());
    }

    let mut total = 0;
    for item_id in item_ids {
        let Some(package) = controller.item_package(item_id)? else {
            continue;
        };
        for result in package.search_results(query, None)? {
            println!("{}\n  {}\n", result.title, result.snippet);
            total += 1;
        }
    }
    println!("{} result(s)", total);
    Ok(())
}

fn parse_source(raw: &str) -> Result<SecureSource> {
    let (name, base_url) = raw
        .split_once('=')
        .with_context(|| format!("Invalid source {:?}; expected name=url", raw))?;
    Ok(SecureSource {
        name: name.to_string(),
        base_url: base_url.to_string(),
    })
}
