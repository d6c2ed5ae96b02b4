//! Host-level services for managing a PostgreSQL cluster: typed external
//! process invocation, server process control, disk space queries, and the
//! one-shot memory-based tuning estimator.

pub mod cluster;
pub mod process;
pub mod space;
pub mod testing;
pub mod tune;

pub use cluster::{ClusterControl, ClusterError, ClusterSettings};
pub use process::{CommandSpec, ExecError, ExecOutput, Runner, SystemRunner};
pub use space::{size_pretty, OracleError, PartitionStats, SpaceOracle};
pub use tune::{TuneError, TuningProfile};
