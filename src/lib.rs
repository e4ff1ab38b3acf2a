//! # ReviewDesk
//!
//! Review management backend: connects businesses to review platforms,
//! ingests their reviews, drafts replies with a language model and posts
//! approved replies back upstream.

pub mod ai;
pub mod auth;
pub mod config;
pub mod connectors;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ingestion;
pub mod models;
pub mod oauth_flow;
pub mod posting;
pub mod repositories;
pub mod responses;
pub mod seeds;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod token_refresh;
pub use migration;
