//! Admin alerts for failed worker accounts.
//!
//! One alert per incident: an account is alerted at most once until it is
//! cleared (re-authorized and seen healthy again). An incident nobody heard
//! about stays pending and is retried on every worker activation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use chanwatch_db::{Database, ReviewerRepo};
use chanwatch_types::events::ReviewAction;
use chanwatch_types::models::{Account, AccountId, Reviewer};

/// What an admin needs to see about a broken worker.
#[derive(Debug, Clone)]
pub struct AccountAlert {
    pub account_id: AccountId,
    pub name: String,
    pub phone: String,
    pub description: Option<String>,
    pub reason: String,
    pub repair: ReviewAction,
}

impl AccountAlert {
    pub fn new(account: &Account, reason: &str) -> Self {
        Self {
            account_id: account.id,
            name: account.name.clone(),
            phone: account.phone.clone(),
            description: account.description.clone(),
            reason: reason.to_string(),
            repair: ReviewAction::RepairAccount(account.id),
        }
    }
}

#[async_trait]
pub trait AdminAlertSink: Send + Sync {
    async fn send_account_alert(&self, admin: &Reviewer, alert: &AccountAlert) -> anyhow::Result<()>;
}

pub struct Alerting {
    db: Arc<Database>,
    sink: Arc<dyn AdminAlertSink>,
    alerted: Mutex<HashSet<AccountId>>,
    /// Incidents whose alert reached no admin yet, with the failure reason.
    pending: Mutex<HashMap<AccountId, (Account, String)>>,
}

impl Alerting {
    pub fn new(db: Arc<Database>, sink: Arc<dyn AdminAlertSink>) -> Self {
        Self {
            db,
            sink,
            alerted: Mutex::new(HashSet::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Alert every admin about `account`, unless this incident was already
    /// reported. Returns whether at least one admin received the alert.
    pub async fn account_failed(&self, account: &Account, reason: &str) -> bool {
        let mut alerted = self.alerted.lock().await;
        if alerted.contains(&account.id) {
            return false;
        }

        let delivered = self.deliver(account, reason).await;
        let mut pending = self.pending.lock().await;
        if delivered {
            alerted.insert(account.id);
            pending.remove(&account.id);
            info!("Admins alerted about account {} ({})", account.id, account.phone);
        } else {
            pending.insert(account.id, (account.clone(), reason.to_string()));
        }
        delivered
    }

    /// Try again every incident whose alert reached no admin. Returns how
    /// many were delivered this time.
    pub async fn retry_pending(&self) -> usize {
        let pending: Vec<(Account, String)> = self.pending.lock().await.values().cloned().collect();
        let mut delivered = 0;
        for (account, reason) in pending {
            if !self.is_pending(account.id).await {
                continue;
            }
            if self.account_failed(&account, &reason).await {
                delivered += 1;
            }
        }
        delivered
    }

    async fn deliver(&self, account: &Account, reason: &str) -> bool {
        let admins = match self.db.unit_of_work(|store| store.list_admins()) {
            Ok(admins) => admins,
            Err(e) => {
                error!("Could not load admins for account {} alert: {}", account.id, e);
                return false;
            }
        };
        if admins.is_empty() {
            warn!("Account {} failed but no admin is configured to hear about it", account.id);
            return false;
        }

        let alert = AccountAlert::new(account, reason);
        let mut delivered = false;
        for admin in &admins {
            match self.sink.send_account_alert(admin, &alert).await {
                Ok(()) => delivered = true,
                Err(e) => error!("Account alert to admin {} failed: {}", admin.telegram_id, e),
            }
        }
        delivered
    }

    /// Forget the incident for `account_id` so a future failure alerts again.
    pub async fn clear(&self, account_id: AccountId) {
        self.alerted.lock().await.remove(&account_id);
        self.pending.lock().await.remove(&account_id);
    }

    pub async fn is_alerted(&self, account_id: AccountId) -> bool {
        self.alerted.lock().await.contains(&account_id)
    }

    pub async fn is_pending(&self, account_id: AccountId) -> bool {
        self.pending.lock().await.contains_key(&account_id)
    }
}
