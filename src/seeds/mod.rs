//! Database seeding
//!
//! The platform catalog is fixed in code and written to the `sources` table
//! on startup.

pub mod sources;

pub use sources::seed_sources;
