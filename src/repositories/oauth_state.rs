//! # OAuth State Repository
//!
//! Server-side ledger of authorization attempts. A state token is issued when
//! a connect flow starts and can be consumed at most once, before it expires.

use chrono::{Duration, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    Set,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::oauth_state::{self, ActiveModel, ConsumedState, Entity as OAuthState};

/// Generates a 43 character URL-safe token from 32 random bytes.
pub fn generate_state_token() -> String {
    use rand::Rng;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    base64_url::encode(&bytes)
}

/// Why a state token could not be consumed. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateRejection {
    Unknown,
    AlreadyUsed,
    Expired,
}

#[derive(Debug, Clone)]
pub struct OAuthStateRepository {
    db: Arc<DatabaseConnection>,
    ttl: Duration,
}

impl OAuthStateRepository {
    pub fn new(db: Arc<DatabaseConnection>, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    /// Records a new authorization attempt and returns its state token.
    pub async fn issue(
        &self,
        user_id: Uuid,
        business_id: Uuid,
        source_id: Uuid,
    ) -> Result<String, DbErr> {
        let now = Utc::now();
        let state_token = generate_state_token();

        ActiveModel {
            id: Set(Uuid::new_v4()),
            state_token: Set(state_token.clone()),
            user_id: Set(user_id),
            business_id: Set(business_id),
            source_id: Set(source_id),
            used: Set(false),
            expires_at: Set((now + self.ttl).into()),
            created_at: Set(now.into()),
        }
        .insert(&*self.db)
        .await?;

        Ok(state_token)
    }

    /// Marks the token used and returns who started the flow.
    ///
    /// The flip is a single conditional update, so two callbacks racing on the
    /// same token cannot both succeed.
    pub async fn consume(&self, state_token: &str) -> Result<ConsumedState, ServiceError> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let result = OAuthState::update_many()
            .col_expr(oauth_state::Column::Used, Expr::value(true))
            .filter(oauth_state::Column::StateToken.eq(state_token))
            .filter(oauth_state::Column::Used.eq(false))
            .filter(oauth_state::Column::ExpiresAt.gt(now))
            .exec(&*self.db)
            .await?;

        let row = self.find(state_token).await?;

        if result.rows_affected == 1 {
            if let Some(row) = row {
                return Ok(row.into());
            }
        }

        let rejection = match row {
            None => StateRejection::Unknown,
            Some(row) if row.expires_at <= now => StateRejection::Expired,
            Some(_) => StateRejection::AlreadyUsed,
        };
        warn!(?rejection, "Rejected OAuth state token");
        metrics::counter!("oauth_state_rejected_total").increment(1);
        Err(ServiceError::InvalidOrExpiredState)
    }

    /// Deletes states that expired, and used states older than the TTL.
    pub async fn purge_expired(&self) -> Result<u64, DbErr> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let used_cutoff = now - self.ttl;
        let result = OAuthState::delete_many()
            .filter(
                Condition::any()
                    .add(oauth_state::Column::ExpiresAt.lt(now))
                    .add(
                        Condition::all()
                            .add(oauth_state::Column::Used.eq(true))
                            .add(oauth_state::Column::CreatedAt.lt(used_cutoff)),
                    ),
            )
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            info!(purged = result.rows_affected, "Purged stale OAuth states");
        }
        Ok(result.rows_affected)
    }

    /// Looks a state up without consuming it.
    pub async fn find(&self, state_token: &str) -> Result<Option<oauth_state::Model>, DbErr> {
        OAuthState::find()
            .filter(oauth_state::Column::StateToken.eq(state_token))
            .one(&*self.db)
            .await
    }
}
