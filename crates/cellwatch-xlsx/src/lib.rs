//! Formula-preserving snapshot extraction from XLSX/XLSM packages.
//!
//! A workbook package is a ZIP of XML parts (the Open Packaging Convention).
//! This crate opens the package ([`WorkbookArchive`]), streams each
//! worksheet's `<sheetData>` and reduces the document to a
//! [`cellwatch_model::CellModel`]: formula text for formula cells, a coerced
//! scalar for everything else, empty cells omitted.
//!
//! The extraction is deliberately value-free for formula cells — the cached
//! `<v>` payload of a formula is a calculation artifact, not content — and
//! array/shared formulas are reduced to their shared text so that two reads of
//! an unchanged file always produce identical models.

mod cache;
mod error;
mod external_refs;
mod package;
mod properties;
mod shared_strings;
mod snapshot;

pub use cache::SnapshotCache;
pub use error::{ErrorKind, SnapshotError};
pub use external_refs::external_ref_map;
pub use package::WorkbookArchive;
pub use properties::last_author;
pub use snapshot::{DocumentSnapshot, SnapshotEngine};

/// File extensions of the archived-workbook family (lowercase, without dot).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["xlsx", "xlsm"];

/// Prefix of the host application's lock files (`~$Report.xlsx`).
pub const LOCK_FILE_PREFIX: &str = "~$";
