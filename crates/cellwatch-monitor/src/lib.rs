//! Monitoring control plane for watched workbook directories.
//!
//! The moving parts, bottom up: [`checker::ChangeChecker`] runs one
//! snapshot-compare-persist cycle for a document; [`poller::SettlingPoller`]
//! re-checks recently changed documents until they go quiet;
//! [`builder::BaselineBuilder`] batch-builds baselines at startup with
//! resume, timeout and memory supervision; [`watch::Monitor`] wires
//! filesystem events, per-path admission and event numbering together.

pub mod builder;
pub mod checker;
pub mod config;
pub mod memory;
pub mod poller;
pub mod stop;
pub mod watch;
