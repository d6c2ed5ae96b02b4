//! Backup lifecycle for a managed PostgreSQL cluster: continuous WAL
//! archiving with round-robin base backup retention, and the ordered
//! restore-from-backup workflow.

pub mod archive;
pub mod restore;

pub use archive::{ArchiveError, ArchiveSettings, ArchivalController, BackupDescriptor};
pub use restore::{RestoreEngine, RestoreError};
