//! Local relational storage: the inventory state database and read-only
//! catalog/package accessors.

pub mod catalog;
pub mod db;
pub mod inventory;
pub mod package;

pub use catalog::Catalog;
pub use inventory::InventoryStore;
pub use package::ItemPackage;
