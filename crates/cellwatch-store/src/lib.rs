//! Durable state for the monitor: per-document baseline snapshots, the
//! append-only audit log, and the resumable-build progress record.
//!
//! Baselines are gzip-compressed JSON updated only by atomic replacement; a
//! reader never observes a partially written file. The audit log is a daily
//! gzip CSV opened in append mode (each append is its own gzip member, which
//! concatenates into a valid stream).

mod audit;
mod baseline;
mod progress;

pub use audit::{AuditError, AuditLog, AUDIT_HEADER};
pub use baseline::{BaselineStore, StoreError, BASELINE_SUFFIX};
pub use progress::{BuildProgress, ProgressLog};
