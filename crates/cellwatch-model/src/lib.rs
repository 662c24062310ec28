//! Cell-level data model for watched workbooks.
//!
//! The model is deliberately narrow: a workbook snapshot is a mapping from
//! worksheet name to coordinate-keyed [`CellEntry`] records, where each entry
//! carries the formula text and/or the stored scalar value. Everything a
//! monitor needs — fingerprinting, diffing, persistence — is defined over this
//! shape; no host-library objects (and in particular no object identity) ever
//! participate in equality.

mod coord;
mod fingerprint;
mod model;
mod value;

pub use coord::{col_to_name, parse_a1, CoordKey};
pub use fingerprint::fingerprint;
pub use model::{Baseline, CellChange, CellEntry, CellModel, ExternalRefMap, Sheet, Worksheet};
pub use value::CellScalar;
