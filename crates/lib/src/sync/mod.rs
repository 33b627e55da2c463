//! Reconciliation of loadouts with game folders.
//!
//! The pipeline runs leaves first: [`differ`] classifies paths across the
//! initial, last-synced, current and target states; [`plan`] turns the
//! classifications into ordered steps (with [`ingest`] contributing loadout
//! edits); [`execute`] performs the disk steps; [`synchronizer`] drives the
//! whole cycle and commits the result.

pub mod differ;
pub mod execute;
pub mod ingest;
pub mod plan;
pub mod prune;
pub mod synchronizer;

pub use differ::{Classification, DiffInput, DiskFile, PathDiff, TargetEntry, TargetState, classify, diff_states};
pub use execute::{ExecuteConfig, ExecuteError, ExecutionReport, WrittenFile, execute_plan};
pub use ingest::{IngestContext, IngestResolver, OVERRIDES_MOD_NAME, OwnerResolver, apply_loadout_steps, make_ingestion_plan};
pub use plan::{ApplyPlan, ApplyStep, CopySource, Diagnostic, PlanError, PlanInput, PlanMode, PlanSummary, build_plan};
pub use prune::prune_empty_dirs;
pub use synchronizer::{
  GAME_FILES_MOD_NAME, InstallationState, SyncError, SyncOutcome, Synchronizer, SynchronizerOptions,
};
