use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use chanwatch_db::{AccountRepo, Database};
use chanwatch_types::api::WorkerSnapshot;
use chanwatch_types::models::{Account, AccountId};

use crate::alerting::Alerting;
use crate::error::SessionError;
use crate::session::{ProtocolSession, SessionConnector};

/// Stand-in for a pause too long to represent as an instant.
const FOREVER: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Unauthenticated,
    Connecting,
    Active,
    /// Out of rotation until the account is re-authorized.
    Failed { reason: String },
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Worker {
    account: Account,
    state: WorkerState,
    session: Option<Arc<dyn ProtocolSession>>,
    paused_until: Option<Instant>,
}

impl Worker {
    fn new(account: Account) -> Self {
        Self {
            account,
            state: WorkerState::Unauthenticated,
            session: None,
            paused_until: None,
        }
    }

    fn paused_for(&self, now: Instant) -> Option<Duration> {
        self.paused_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

/// Owns one live protocol session per usable account.
///
/// The map lives for the process only; who is usable is re-derived from the
/// store on every [`WorkerPool::refresh`].
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    db: Arc<Database>,
    connector: Arc<dyn SessionConnector>,
    alerting: Arc<Alerting>,
    workers: RwLock<HashMap<AccountId, Worker>>,
}

impl WorkerPool {
    pub fn new(db: Arc<Database>, connector: Arc<dyn SessionConnector>, alerting: Arc<Alerting>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                db,
                connector,
                alerting,
                workers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Sync the worker map with the usable accounts in the store.
    ///
    /// Newly usable accounts join as `Unauthenticated`. A failed worker whose
    /// account was re-authorized starts over and its alert incident is closed.
    /// Workers whose account is no longer usable are dropped, except failed
    /// ones, which stay visible in snapshots.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let usable = self.inner.db.unit_of_work(|store| store.list_usable_accounts())?;

        let mut recovered = Vec::new();
        let mut dropped = Vec::new();
        {
            let mut workers = self.inner.workers.write().await;

            for account in &usable {
                match workers.get_mut(&account.id) {
                    Some(worker) if matches!(worker.state, WorkerState::Failed { .. }) => {
                        info!("Account {} is authorized again, returning it to the pool", account.id);
                        *worker = Worker::new(account.clone());
                        recovered.push(account.id);
                    }
                    Some(worker) => worker.account = account.clone(),
                    None => {
                        debug!("Account {} joins the worker pool", account.id);
                        workers.insert(account.id, Worker::new(account.clone()));
                    }
                }
            }

            workers.retain(|id, worker| {
                let keep = usable.iter().any(|a| a.id == *id)
                    || matches!(worker.state, WorkerState::Failed { .. });
                if !keep {
                    if let Some(session) = worker.session.take() {
                        dropped.push(session);
                    }
                    info!("Account {} left the worker pool", id);
                }
                keep
            });
        }

        for id in recovered {
            self.inner.alerting.clear(id).await;
        }
        for session in dropped {
            session.disconnect().await;
        }
        Ok(())
    }

    /// Return the live session for `account_id`, connecting if needed.
    ///
    /// Failure leaves the worker `Unauthenticated`; deciding whether that is
    /// an incident is up to the caller.
    pub async fn acquire(&self, account_id: AccountId) -> Result<Arc<dyn ProtocolSession>, SessionError> {
        let account = {
            let mut workers = self.inner.workers.write().await;
            let worker = workers
                .get_mut(&account_id)
                .ok_or_else(|| SessionError::Connect(format!("account {} is not in the pool", account_id)))?;

            match (&worker.state, &worker.session) {
                (WorkerState::Active, Some(session)) => return Ok(session.clone()),
                (WorkerState::Failed { reason }, _) => return Err(SessionError::Auth(reason.clone())),
                _ => {}
            }
            worker.state = WorkerState::Connecting;
            worker.account.clone()
        };

        let result = self.inner.connector.connect(&account).await;

        let mut workers = self.inner.workers.write().await;
        let Some(worker) = workers.get_mut(&account_id) else {
            drop(workers);
            if let Ok(session) = &result {
                session.disconnect().await;
            }
            return Err(SessionError::Connect(format!("account {} left the pool while connecting", account_id)));
        };

        match result {
            Ok(session) => {
                if let WorkerState::Failed { reason } = &worker.state {
                    let reason = reason.clone();
                    drop(workers);
                    session.disconnect().await;
                    return Err(SessionError::Auth(reason));
                }
                worker.state = WorkerState::Active;
                worker.session = Some(session.clone());
                drop(workers);

                if let Err(e) = self.inner.db.unit_of_work(|store| store.touch_account_used(account_id, Utc::now())) {
                    warn!("Could not record last use of account {}: {}", account_id, e);
                }
                info!("Worker {} is active", account_id);
                Ok(session)
            }
            Err(e) => {
                // A concurrent mark_failed wins over the reset.
                if worker.state == WorkerState::Connecting {
                    worker.state = WorkerState::Unauthenticated;
                }
                Err(e)
            }
        }
    }

    /// Bring up every worker that is not failed or paused. Account failures
    /// are marked on the way; rate limits pause the worker. Sorted by id.
    pub async fn activate_all(&self) -> Vec<(AccountId, Arc<dyn ProtocolSession>)> {
        if let Err(e) = self.refresh().await {
            error!("Worker pool refresh failed: {}", e);
        }
        let retried = self.inner.alerting.retry_pending().await;
        if retried > 0 {
            info!("Delivered {} account alerts that were held back", retried);
        }

        let now = Instant::now();
        let mut candidates: Vec<AccountId> = {
            let workers = self.inner.workers.read().await;
            workers
                .iter()
                .filter(|(_, w)| !matches!(w.state, WorkerState::Failed { .. }))
                .filter(|(_, w)| w.paused_for(now).is_none())
                .map(|(id, _)| *id)
                .collect()
        };
        candidates.sort_unstable();

        let mut active = Vec::with_capacity(candidates.len());
        for account_id in candidates {
            match self.acquire(account_id).await {
                Ok(session) => active.push((account_id, session)),
                Err(e) => {
                    self.handle_error(account_id, &e).await;
                }
            }
        }
        active
    }

    /// Route a session error to the right reaction. Returns whether the
    /// worker is out for the rest of the run.
    pub async fn handle_error(&self, account_id: AccountId, err: &SessionError) -> bool {
        match err {
            SessionError::Auth(_) | SessionError::Connect(_) => {
                self.mark_failed(account_id, &err.to_string()).await;
                true
            }
            SessionError::RateLimited(wait) => {
                self.pause(account_id, *wait).await;
                true
            }
            SessionError::Network(msg) => {
                warn!("Worker {} hit a network error, reconnecting next run: {}", account_id, msg);
                self.reset(account_id).await;
                true
            }
            SessionError::Resolve(_) => false,
        }
    }

    /// Take the worker out of rotation, persist the failure and alert the
    /// admins. Only the first call per incident does anything; returns
    /// whether this call was it.
    pub async fn mark_failed(&self, account_id: AccountId, reason: &str) -> bool {
        let (account, session) = {
            let mut workers = self.inner.workers.write().await;
            match workers.get_mut(&account_id) {
                Some(worker) => {
                    if matches!(worker.state, WorkerState::Failed { .. }) {
                        return false;
                    }
                    worker.state = WorkerState::Failed {
                        reason: reason.to_string(),
                    };
                    worker.paused_until = None;
                    (worker.account.clone(), worker.session.take())
                }
                None => {
                    let account = match self.inner.db.unit_of_work(|store| store.get_account(account_id)) {
                        Ok(Some(account)) => account,
                        Ok(None) => {
                            warn!("Asked to fail unknown account {}", account_id);
                            return false;
                        }
                        Err(e) => {
                            error!("Could not load account {}: {}", account_id, e);
                            return false;
                        }
                    };
                    let mut worker = Worker::new(account.clone());
                    worker.state = WorkerState::Failed {
                        reason: reason.to_string(),
                    };
                    workers.insert(account_id, worker);
                    (account, None)
                }
            }
        };

        warn!("Worker {} failed: {}", account_id, reason);

        if let Err(e) = self.inner.db.unit_of_work(|store| store.set_authorized(account_id, false)) {
            error!("Could not persist failure of account {}: {}", account_id, e);
        }
        if let Some(session) = session {
            session.disconnect().await;
        }
        self.inner.alerting.account_failed(&account, reason).await;
        true
    }

    /// Keep the worker out of runs for `wait`. Not a failure.
    pub async fn pause(&self, account_id: AccountId, wait: Duration) {
        let mut workers = self.inner.workers.write().await;
        if let Some(worker) = workers.get_mut(&account_id) {
            let now = Instant::now();
            let until = now.checked_add(wait).unwrap_or_else(|| now + FOREVER);
            if worker.paused_until.is_none_or(|current| current < until) {
                worker.paused_until = Some(until);
            }
            info!("Worker {} rate limited, pausing for {}s", account_id, wait.as_secs());
        }
    }

    /// Drop the live session so the next run reconnects.
    pub async fn reset(&self, account_id: AccountId) {
        let session = {
            let mut workers = self.inner.workers.write().await;
            match workers.get_mut(&account_id) {
                Some(worker) if !matches!(worker.state, WorkerState::Failed { .. }) => {
                    worker.state = WorkerState::Unauthenticated;
                    worker.session.take()
                }
                _ => None,
            }
        };
        if let Some(session) = session {
            session.disconnect().await;
        }
    }

    pub async fn state(&self, account_id: AccountId) -> Option<WorkerState> {
        self.inner.workers.read().await.get(&account_id).map(|w| w.state.clone())
    }

    pub async fn snapshot(&self) -> Vec<WorkerSnapshot> {
        let now = Instant::now();
        let workers = self.inner.workers.read().await;
        let mut out: Vec<WorkerSnapshot> = workers
            .values()
            .map(|w| WorkerSnapshot {
                account_id: w.account.id,
                name: w.account.name.clone(),
                state: w.state.to_string(),
                paused_for_secs: w.paused_for(now).map(|d| d.as_secs().max(1)),
            })
            .collect();
        out.sort_by_key(|s| s.account_id);
        out
    }

    /// Disconnect every live session.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = {
            let mut workers = self.inner.workers.write().await;
            workers
                .values_mut()
                .filter_map(|w| {
                    if w.state == WorkerState::Active {
                        w.state = WorkerState::Unauthenticated;
                    }
                    w.session.take()
                })
                .collect()
        };
        for session in sessions {
            session.disconnect().await;
        }
        info!("Worker pool shut down");
    }
}
