//! Top-level orchestration: catalog updates, item installs and uninstalls,
//! and access to the merged catalog and installed packages.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::config::{Layout, DEFAULT_SOURCE_NAME, PACKAGE_DATABASE};
use crate::domain::{
    CatalogMetadata, InstallPriority, InstalledVersion, Item, SecureSource, SCHEMA_VERSION,
};
use crate::error::{ContentError, Result};
use crate::events::{ContentEvent, EventBus};
use crate::merge;
use crate::store::{Catalog, InventoryStore, ItemPackage};
use crate::transport::{CatalogFetchOutcome, ProgressFn, Session};

/// Result of a full catalog update pass
#[derive(Debug)]
pub struct CatalogUpdate {
    /// What happened for the default source
    pub default_outcome: CatalogFetchOutcome,
    /// Fingerprint of the merged catalog now current
    pub fingerprint: String,
    /// True when the merged catalog was rebuilt this pass
    pub rebuilt: bool,
    /// Secure sources that failed; the update proceeded without them
    pub failed_sources: Vec<FailedSource>,
}

#[derive(Debug)]
pub struct FailedSource {
    pub name: String,
    pub error: ContentError,
}

/// Result of an item install request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed { version: InstalledVersion },
    /// An equal-or-newer version was already on disk; nothing was downloaded
    AlreadyInstalled { version: InstalledVersion },
}

/// The engine's front door.
///
/// Owns the content root, the inventory database, and the transfer session.
/// Must be created inside a tokio runtime.
pub struct ContentController {
    layout: Layout,
    inventory: InventoryStore,
    session: Arc<Session>,
    bus: EventBus,
    base_url: String,
}

impl ContentController {
    pub fn new(layout: Layout, base_url: impl Into<String>) -> Result<Self> {
        layout.ensure()?;
        let inventory = InventoryStore::open(&layout.inventory_database())?;
        let bus = EventBus::default();
        let session = Session::new(bus.clone());

        // Installs interrupted by a previous shutdown surface as errored
        for item_id in inventory.queued_item_ids()? {
            warn!(item_id, "marking interrupted install as errored");
            inventory.set_errored(item_id, true)?;
            inventory.dequeue(item_id)?;
        }

        Ok(Self {
            layout,
            inventory,
            session,
            bus,
            base_url: base_url.into(),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// True when no transfers are queued or running
    pub fn is_idle(&self) -> bool {
        self.session.is_idle()
    }

    /// Wait for every transfer started before this call to finish
    pub async fn wait_for_transfers(&self) {
        self.session.wait_for_all().await;
    }

    /// Bring every source's catalog up to date and rebuild the merged
    /// catalog.
    ///
    /// `Some(list)` is authoritative: previously-installed secure sources
    /// absent from it are dropped first (so `Some(&[])` revokes them all).
    /// `None` leaves the installed secure sources as they are and refreshes
    /// each from its recorded origin URL. A failing secure source is reported
    /// but does not block the others; a failing default source fails the
    /// whole update.
    #[instrument(skip_all)]
    pub async fn update_catalog(
        &self,
        secure_sources: Option<&[SecureSource]>,
    ) -> Result<CatalogUpdate> {
        let installed_secure: Vec<CatalogMetadata> = self
            .inventory
            .installed_catalogs()?
            .into_iter()
            .filter(|c| !c.is_default())
            .collect();

        if let Some(supplied) = secure_sources {
            let revoked: Vec<String> = installed_secure
                .iter()
                .filter(|c| !supplied.iter().any(|s| s.name == c.name))
                .map(|c| c.name.clone())
                .collect();
            self.inventory.delete_catalogs(&revoked)?;
            for name in &revoked {
                let directory = self.layout.catalog_directory(name);
                if directory.is_dir() {
                    std::fs::remove_dir_all(&directory)?;
                }
            }
        }

        let sources: Vec<SecureSource> = match secure_sources {
            Some(supplied) => supplied.to_vec(),
            // Refresh what is already installed from its recorded origin
            None => installed_secure
                .iter()
                .filter_map(|c| {
                    c.url.as_ref().map(|url| SecureSource {
                        name: c.name.clone(),
                        base_url: url.clone(),
                    })
                })
                .collect(),
        };

        let default_outcome = self
            .session
            .download_catalog(&self.base_url, DEFAULT_SOURCE_NAME, &self.layout, Box::new(|_| {}))
            .await?;
        self.inventory
            .upsert_catalog(DEFAULT_SOURCE_NAME, None, default_outcome.version())?;

        let mut failed_sources = Vec::new();
        for source in &sources {
            if source.name == DEFAULT_SOURCE_NAME {
                warn!("ignoring secure source shadowing the default source");
                continue;
            }
            match self
                .session
                .download_catalog(&source.base_url, &source.name, &self.layout, Box::new(|_| {}))
                .await
            {
                Ok(outcome) => {
                    self.inventory
                        .upsert_catalog(&source.name, Some(&source.base_url), outcome.version())?;
                }
                Err(error) => {
                    warn!(source = %source.name, %error, "secure source update failed");
                    failed_sources.push(FailedSource {
                        name: source.name.clone(),
                        error,
                    });
                }
            }
        }

        let installed = self.inventory.installed_catalogs()?;
        let merged = merge::merge(&self.layout, &installed)?;
        if merged.rebuilt {
            self.bus.publish(ContentEvent::CatalogUpdated {
                fingerprint: merged.fingerprint.clone(),
            });
        }
        merge::collect_garbage(&self.layout, &installed, &merged.fingerprint)?;

        info!(
            fingerprint = %merged.fingerprint,
            rebuilt = merged.rebuilt,
            failed = failed_sources.len(),
            "catalog update complete"
        );
        Ok(CatalogUpdate {
            default_outcome,
            fingerprint: merged.fingerprint,
            rebuilt: merged.rebuilt,
            failed_sources,
        })
    }

    /// Open the current merged catalog, building it first if needed
    pub fn catalog(&self) -> Result<Catalog> {
        let installed = self.inventory.installed_catalogs()?;
        let merged = merge::merge(&self.layout, &installed)?;
        Catalog::open(&merged.database)
    }

    /// Download and install the package for `item`.
    ///
    /// Installs are monotonic: if an equal-or-newer package at the current
    /// schema is already recorded, nothing is downloaded. Success replaces
    /// any older version on disk and commits the new record atomically with
    /// the queue bookkeeping.
    #[instrument(skip_all, fields(item_id = item.id))]
    pub async fn install_item(
        &self,
        item: &Item,
        priority: InstallPriority,
        progress: ProgressFn,
    ) -> Result<InstallOutcome> {
        if let Some(installed) = self.inventory.installed_version(item.id)? {
            if is_current(installed, item) {
                // Stale queue or error flags from earlier attempts are cleared
                self.inventory.in_transaction(|tx| {
                    tx.dequeue(item.id)?;
                    tx.set_errored(item.id, false)
                })?;
                return Ok(InstallOutcome::AlreadyInstalled { version: installed });
            }
        }

        self.inventory.in_transaction(|tx| {
            tx.enqueue(item.id)?;
            tx.set_errored(item.id, false)
        })?;
        match self.install_item_inner(item, priority, progress).await {
            Ok(outcome) => {
                if matches!(outcome, InstallOutcome::Installed { .. }) {
                    info!("item installed");
                    self.bus
                        .publish(ContentEvent::ItemInstalled { item_id: item.id });
                }
                Ok(outcome)
            }
            Err(err) => {
                if let Err(bookkeeping) = self.inventory.in_transaction(|tx| {
                    tx.set_errored(item.id, true)?;
                    tx.dequeue(item.id)
                }) {
                    warn!(error = %bookkeeping, "failed to record install error");
                }
                Err(err)
            }
        }
    }

    async fn install_item_inner(
        &self,
        item: &Item,
        priority: InstallPriority,
        progress: ProgressFn,
    ) -> Result<InstallOutcome> {
        let staged = self
            .session
            .download_item_package(
                &self.base_url,
                &item.external_id,
                item.version,
                priority,
                &self.layout,
                progress,
            )
            .await?;

        let package = ItemPackage::open(&staged.directory().join(PACKAGE_DATABASE))?;
        let schema_version = package.schema_version();
        if schema_version != SCHEMA_VERSION {
            return Err(ContentError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: schema_version,
            });
        }
        let package_version = package.item_package_version();
        // The connection must be closed before the directory moves
        drop(package);

        let destination =
            self.layout
                .item_version_directory(item.id, schema_version, package_version);
        let layout = self.layout.clone();

        self.inventory.in_transaction(|tx| {
            // A concurrent install may have finished while we downloaded
            if let Some(existing) = tx.installed_version(item.id)? {
                if existing.schema_version == SCHEMA_VERSION
                    && existing.item_package_version >= package_version
                {
                    tx.dequeue(item.id)?;
                    return Ok(InstallOutcome::AlreadyInstalled { version: existing });
                }
            }

            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if !destination.exists() {
                std::fs::rename(staged.directory(), &destination).map_err(|err| {
                    if err.kind() == std::io::ErrorKind::NotFound {
                        ContentError::StaleWrite(destination.clone())
                    } else {
                        ContentError::Io(err)
                    }
                })?;
            }
            // Older versions of the item are superseded
            remove_sibling_versions(&layout, item.id, &destination)?;

            tx.record_installed(item.id, schema_version, package_version)?;
            tx.dequeue(item.id)?;
            tx.set_errored(item.id, false)?;
            Ok(InstallOutcome::Installed {
                version: InstalledVersion {
                    schema_version,
                    item_package_version: package_version,
                },
            })
        })
    }

    /// Remove `item`'s installed package.
    ///
    /// Only the exact recorded version for this item release is removed;
    /// if a different version is installed (or none), nothing happens.
    #[instrument(skip_all, fields(item_id = item.id))]
    pub fn uninstall_item(&self, item: &Item) -> Result<()> {
        // The record goes first: a rolled-back delete must never leave a
        // recorded install without its directory
        let removed = self.inventory.in_transaction(|tx| {
            let Some(installed) = tx.installed_version(item.id)? else {
                return Ok(None);
            };
            if installed.schema_version != SCHEMA_VERSION
                || installed.item_package_version != item.version
            {
                return Ok(None);
            }
            tx.remove_installed(item.id)?;
            Ok(Some(installed))
        })?;

        if let Some(installed) = removed {
            let directory = self.layout.item_version_directory(
                item.id,
                installed.schema_version,
                installed.item_package_version,
            );
            if directory.is_dir() {
                std::fs::remove_dir_all(&directory)?;
            }
            // Drop the item directory too once it is empty
            let _ = std::fs::remove_dir(self.layout.item_directory(item.id));

            info!("item uninstalled");
            self.bus
                .publish(ContentEvent::ItemUninstalled { item_id: item.id });
        }
        Ok(())
    }

    /// Open the installed package for an item, if one is recorded
    pub fn item_package(&self, item_id: i64) -> Result<Option<ItemPackage>> {
        let Some(installed) = self.inventory.installed_version(item_id)? else {
            return Ok(None);
        };
        let path = self.layout.item_package_database(
            item_id,
            installed.schema_version,
            installed.item_package_version,
        );
        Ok(Some(ItemPackage::open(&path)?))
    }

    pub fn installed_version(&self, item_id: i64) -> Result<Option<InstalledVersion>> {
        self.inventory.installed_version(item_id)
    }

    pub fn is_installed(&self, item_id: i64) -> Result<bool> {
        self.inventory.is_installed(item_id)
    }

    pub fn installed_item_ids(&self) -> Result<Vec<i64>> {
        self.inventory.installed_item_ids()
    }

    pub fn queued_item_ids(&self) -> Result<BTreeSet<i64>> {
        self.inventory.queued_item_ids()
    }

    pub fn errored_item_ids(&self) -> Result<BTreeSet<i64>> {
        self.inventory.errored_item_ids()
    }

    pub fn installed_catalogs(&self) -> Result<Vec<CatalogMetadata>> {
        self.inventory.installed_catalogs()
    }
}

fn is_current(installed: InstalledVersion, item: &Item) -> bool {
    installed.schema_version == SCHEMA_VERSION && installed.item_package_version >= item.version
}

fn remove_sibling_versions(layout: &Layout, item_id: i64, keep: &Path) -> Result<()> {
    let parent = layout.item_directory(item_id);
    if !parent.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(&parent)? {
        let path = entry?.path();
        if path != keep && path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        }
    }
    Ok(())
}
