//! Connectors module
//!
//! This module provides the review platform integrations:
//! - The `ReviewConnector` trait every platform implements
//! - Static source kinds and their capabilities
//! - The registry used to look connectors up by kind

pub mod google_business;
pub mod metadata;
pub mod registry;
pub mod trait_;

pub use google_business::{GoogleBusinessConnector, GoogleBusinessSettings};
pub use metadata::{AuthType, SourceKind, UnknownSource};
pub use registry::{Registry, RegistryError};
pub use trait_::{
    AuthorizeParams, ConnectorError, ListingRef, ProviderReview, ReviewConnector, TokenGrant,
};
