//! Remote origin access: the transfer pool, download streaming, and archive
//! extraction.

mod extract;
mod session;

pub use extract::{unpack_archive, unpack_archive_expecting};
pub use session::{
    CatalogFetchOutcome, ProgressFn, Session, StagedPackage, MAX_CONCURRENT_TRANSFERS,
};
