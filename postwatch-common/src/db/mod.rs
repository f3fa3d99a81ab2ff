//! Embedded database access
//!
//! Each logical database is a single SQLite file opened twice: one
//! exclusive read-write connection (all writes are serialized by the
//! owning task) and a small pool of read-only connections for queries.

pub mod migrator;
pub mod pair;

pub use migrator::{run_migrations, run_migrations_down_to, Migration};
pub use pair::ConnPair;
