//! Local policy overrides
//!
//! The store holds per-user limits set through the API on top of a base policy (the
//! on-chain one when a VaultRouter is configured, the configured defaults otherwise).
//! Trade history is never written here: `lastTradeTimestamp` comes from the base.
//!
//! Stored policies are shared as `Arc<UserPolicy>`. An update builds the next value
//! off to the side and swaps the whole `Arc` in, so a concurrent reader holds either
//! the old policy or the new one.

use super::types::{PolicyUpdate, UserPolicy};
use super::PolicyError;
use crate::config::PolicyDefaults;
use alloy::primitives::Address;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Override set for `user`, if any
    async fn get(&self, user: Address) -> Option<Arc<UserPolicy>>;

    /// Policy for users without an on-chain record or an override
    fn defaults(&self) -> Arc<UserPolicy>;

    /// Apply `update` to the user's override, seeding it from `base` the first time
    async fn apply_update(
        &self,
        user: Address,
        base: Arc<UserPolicy>,
        update: &PolicyUpdate,
    ) -> Result<Arc<UserPolicy>, PolicyError>;
}

pub struct InMemoryPolicyStore {
    defaults: Arc<UserPolicy>,
    overrides: RwLock<HashMap<Address, Arc<UserPolicy>>>,
}

impl InMemoryPolicyStore {
    pub fn new(defaults: &PolicyDefaults) -> Self {
        Self {
            defaults: Arc::new(UserPolicy::from(defaults)),
            overrides: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get(&self, user: Address) -> Option<Arc<UserPolicy>> {
        self.overrides.read().await.get(&user).cloned()
    }

    fn defaults(&self) -> Arc<UserPolicy> {
        self.defaults.clone()
    }

    async fn apply_update(
        &self,
        user: Address,
        base: Arc<UserPolicy>,
        update: &PolicyUpdate,
    ) -> Result<Arc<UserPolicy>, PolicyError> {
        let mut overrides = self.overrides.write().await;
        let current = overrides.get(&user).cloned().unwrap_or(base);

        let next = Arc::new(current.apply(update)?);
        overrides.insert(user, next.clone());

        tracing::info!(
            user = %user,
            max_slippage_bps = next.max_slippage_bps,
            max_trade_size = %next.max_trade_size,
            cooldown_seconds = next.cooldown_seconds,
            allowlist_len = next.token_allowlist.len(),
            "Updated user policy"
        );
        Ok(next)
    }
}
