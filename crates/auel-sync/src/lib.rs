//! Orchestration for AUEL: live dual-sink dispatch and the one-shot
//! backfill migrator from Home Assistant's event store.

mod backfill;
mod config;
mod dispatch;
mod source;

pub use backfill::{MigrationSummary, MigrationTally, Migrator, NoopProgress, ProgressHook};
pub use config::RelayConfig;
pub use dispatch::Dispatcher;
pub use source::{HaEventStore, HistoricalEvent};

pub const CRATE_NAME: &str = "auel-sync";
