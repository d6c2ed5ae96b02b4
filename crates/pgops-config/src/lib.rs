#![warn(missing_docs)]

//! Configuration store for a managed PostgreSQL cluster: ordered key/value
//! documents (`postgresql.conf`), tabular client-authentication rules
//! (`pg_hba.conf`), lenient sysconfig service files, and
//! backup-before-overwrite persistence.

pub mod auth;
pub mod document;
pub mod error;
pub mod store;
pub mod sysconfig;

pub use auth::{AuthRule, AuthTable};
pub use document::ConfigDocument;
pub use error::{ConfigError, ConfigResult};
pub use sysconfig::Sysconfig;
