//! # Data Models
//!
//! SeaORM entities for businesses, the source catalog, connections, OAuth
//! states, reviews and their generated responses.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod business;
pub mod enabled_source;
pub mod generated_response;
pub mod oauth_state;
pub mod review;
pub mod source;
pub mod source_connection;

pub use business::Entity as Business;
pub use enabled_source::Entity as EnabledSource;
pub use generated_response::Entity as GeneratedResponse;
pub use oauth_state::Entity as OAuthState;
pub use review::Entity as Review;
pub use source::Entity as Source;
pub use source_connection::Entity as SourceConnection;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "reviewdesk".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
