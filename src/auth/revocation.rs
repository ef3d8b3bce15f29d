//! Ledger of rejected token ids.
//!
//! A row invalidates every token that carries the id itself or as its
//! `parent_token`; the cascade is a single hop.

use crate::{
    store::{Datastore, StoreResult, models::RejectedToken},
    token::Claims,
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct RevocationLedger {
    store: Arc<dyn Datastore>,
    parent_ttl: Duration,
}

impl RevocationLedger {
    /// `parent_ttl` bounds how long a parent row must outlive the child's
    /// issue time; it should be the longest refresh token lifetime.
    #[must_use]
    pub fn new(store: Arc<dyn Datastore>, parent_ttl: Duration) -> Self {
        Self { store, parent_ttl }
    }

    /// True when the token id or its parent id has been rejected.
    ///
    /// # Errors
    ///
    /// Any store failure other than a missing row is returned so callers fail closed.
    pub async fn is_rejected(&self, claims: &Claims) -> StoreResult<bool> {
        if self.store.is_token_rejected(&claims.id).await? {
            return Ok(true);
        }
        match claims.parent_token_id() {
            Some(parent) => self.store.is_token_rejected(parent).await,
            None => Ok(false),
        }
    }

    /// Reject this token only. A rejected access token leaves its refresh
    /// token and siblings valid; a rejected refresh token takes its children
    /// with it.
    ///
    /// # Errors
    ///
    /// Returns the store error when the row cannot be written.
    pub async fn reject_token(&self, claims: &Claims) -> StoreResult<()> {
        self.store
            .reject_token(RejectedToken {
                token_id: claims.id.clone(),
                user_id: claims.subject.clone(),
                issued_at: claims.issued_at,
                expires_at: claims.expires_at,
            })
            .await
    }

    /// End the session behind `claims`: reject the token and, when present,
    /// the refresh token it came from.
    ///
    /// # Errors
    ///
    /// Returns the store error when a row cannot be written.
    pub async fn end_session(&self, claims: &Claims) -> StoreResult<()> {
        self.reject_token(claims).await?;

        if let Some(parent) = claims.parent_token_id() {
            let parent_ttl = i64::try_from(self.parent_ttl.as_secs()).unwrap_or(i64::MAX);
            self.store
                .reject_token(RejectedToken {
                    token_id: parent.to_string(),
                    user_id: claims.subject.clone(),
                    issued_at: claims.issued_at,
                    expires_at: claims.issued_at.saturating_add(parent_ttl),
                })
                .await?;
        }
        Ok(())
    }

    /// Delete rows whose tokens expired before `now`.
    ///
    /// # Errors
    ///
    /// Returns the store error when the delete fails.
    pub async fn cleanup(&self, now: i64) -> StoreResult<u64> {
        self.store.delete_expired_rejections(now).await
    }

    /// Run [`Self::cleanup`] every `interval` until the runtime shuts down.
    #[must_use]
    pub fn spawn_cleanup(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match self.cleanup(Utc::now().timestamp()).await {
                    Ok(0) => debug!("No expired rejected tokens"),
                    Ok(removed) => info!("Removed {removed} expired rejected tokens"),
                    Err(err) => error!("Failed to clean up rejected tokens: {err}"),
                }
            }
        })
    }
}
