//! Source kinds and their static capabilities.
//!
//! Every review platform the product knows about is a [`SourceKind`]. Display
//! labels, icons, connection method and reply support are resolved here at
//! compile time instead of by matching on free-form names at runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// How a business connects a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// OAuth 2.0 authorization code flow through a popup
    #[serde(rename = "oauth2")]
    OAuth2,
    /// API key (and optional secret) pasted by the user
    ApiKey,
    /// Public listing URL only
    Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    GoogleBusiness,
    Facebook,
    Yelp,
    Trustpilot,
    TripAdvisor,
    Amazon,
    AppStore,
}

impl SourceKind {
    pub const ALL: [SourceKind; 7] = [
        SourceKind::GoogleBusiness,
        SourceKind::Facebook,
        SourceKind::Yelp,
        SourceKind::Trustpilot,
        SourceKind::TripAdvisor,
        SourceKind::Amazon,
        SourceKind::AppStore,
    ];

    /// Catalog slug stored in `sources.name`.
    pub fn slug(&self) -> &'static str {
        match self {
            SourceKind::GoogleBusiness => "google_business",
            SourceKind::Facebook => "facebook",
            SourceKind::Yelp => "yelp",
            SourceKind::Trustpilot => "trustpilot",
            SourceKind::TripAdvisor => "tripadvisor",
            SourceKind::Amazon => "amazon",
            SourceKind::AppStore => "app_store",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SourceKind::GoogleBusiness => "Google Business",
            SourceKind::Facebook => "Facebook",
            SourceKind::Yelp => "Yelp",
            SourceKind::Trustpilot => "Trustpilot",
            SourceKind::TripAdvisor => "TripAdvisor",
            SourceKind::Amazon => "Amazon",
            SourceKind::AppStore => "App Store",
        }
    }

    /// Icon identifier understood by the UI icon set.
    pub fn icon(&self) -> &'static str {
        match self {
            SourceKind::GoogleBusiness => "store",
            SourceKind::Facebook => "facebook",
            SourceKind::Yelp => "utensils",
            SourceKind::Trustpilot => "star",
            SourceKind::TripAdvisor => "plane",
            SourceKind::Amazon => "shopping-cart",
            SourceKind::AppStore => "smartphone",
        }
    }

    pub fn auth_type(&self) -> AuthType {
        match self {
            SourceKind::GoogleBusiness | SourceKind::Facebook => AuthType::OAuth2,
            SourceKind::Yelp | SourceKind::Trustpilot | SourceKind::TripAdvisor => {
                AuthType::ApiKey
            }
            SourceKind::Amazon | SourceKind::AppStore => AuthType::Url,
        }
    }

    /// Whether approved replies can be published back to the platform.
    pub fn supports_reply_posting(&self) -> bool {
        matches!(self, SourceKind::GoogleBusiness)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source '{0}'")]
pub struct UnknownSource(pub String);

impl FromStr for SourceKind {
    type Err = UnknownSource;

    /// Accepts the slug or the display name, case-insensitively.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        SourceKind::ALL
            .into_iter()
            .find(|kind| {
                kind.slug() == normalized
                    || kind.display_name().to_ascii_lowercase().replace(' ', "_") == normalized
            })
            .ok_or_else(|| UnknownSource(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_slug_and_display_name() {
        assert_eq!(
            "google_business".parse::<SourceKind>().unwrap(),
            SourceKind::GoogleBusiness
        );
        assert_eq!(
            "Google Business".parse::<SourceKind>().unwrap(),
            SourceKind::GoogleBusiness
        );
        assert_eq!("App Store".parse::<SourceKind>().unwrap(), SourceKind::AppStore);
        assert!("myspace".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_slugs_roundtrip_and_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for kind in SourceKind::ALL {
            assert!(seen.insert(kind.slug()));
            assert_eq!(kind.slug().parse::<SourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_connection_methods() {
        assert_eq!(SourceKind::GoogleBusiness.auth_type(), AuthType::OAuth2);
        assert_eq!(SourceKind::Yelp.auth_type(), AuthType::ApiKey);
        assert_eq!(SourceKind::Amazon.auth_type(), AuthType::Url);
        assert!(SourceKind::GoogleBusiness.supports_reply_posting());
        assert!(!SourceKind::Trustpilot.supports_reply_posting());
    }
}
