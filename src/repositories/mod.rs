//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM operations
//! for database entities, providing a clean API for data access with owner-aware methods.

pub mod business;
pub mod enabled_source;
pub mod generated_response;
pub mod oauth_state;
pub mod review;
pub mod source;
pub mod source_connection;

pub use business::BusinessRepository;
pub use enabled_source::EnabledSourceRepository;
pub use generated_response::GeneratedResponseRepository;
pub use oauth_state::OAuthStateRepository;
pub use review::ReviewRepository;
pub use source::SourceRepository;
pub use source_connection::SourceConnectionRepository;
