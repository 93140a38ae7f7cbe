#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tokio::sync::Notify;

use chanwatch_core::alerting::{AccountAlert, AdminAlertSink, Alerting};
use chanwatch_core::notifier::{NotificationDispatcher, ReviewNotice, ReviewerNotifier};
use chanwatch_core::pool::WorkerPool;
use chanwatch_core::processing::ProcessingMachine;
use chanwatch_core::session::{EntityRef, FetchedMessage, ProtocolSession, ResolvedChannel, SessionConnector};
use chanwatch_core::{Monitor, MonitorConfig, SessionError};
use chanwatch_db::{AccountRepo, ChannelRepo, Database, KeywordRepo, ProcessingRepo, ReviewerRepo};
use chanwatch_types::models::{
    Account, AccountId, ChannelId, DeliveryHandle, KeywordKind, NewAccount, NewChannel, NewReviewer,
    ProcessingStatus, ReviewerId, ReviewerRole,
};

// -- Protocol session fake --

#[derive(Default)]
pub struct FakeSession {
    /// Reference value (handle, link name or invite hash) to peer id.
    pub peers: Mutex<HashMap<String, i64>>,
    pub history: Mutex<HashMap<i64, Vec<FetchedMessage>>>,
    pub fetch_error: Mutex<Option<SessionError>>,
    /// Peers whose history this account may not read.
    pub denied: Mutex<Vec<i64>>,
    /// When set, every fetch waits for a notification first.
    pub gate: Option<Arc<Notify>>,
    pub fetches: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl FakeSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Self::default()
        })
    }

    pub fn with_channel(self: &Arc<Self>, reference: &str, peer_id: i64, messages: Vec<FetchedMessage>) {
        self.peers.lock().unwrap().insert(reference.to_string(), peer_id);
        self.history.lock().unwrap().insert(peer_id, messages);
    }

    pub fn fail_fetches_with(&self, err: SessionError) {
        *self.fetch_error.lock().unwrap() = Some(err);
    }

    pub fn deny(&self, peer_id: i64) {
        self.denied.lock().unwrap().push(peer_id);
    }
}

#[async_trait]
impl ProtocolSession for FakeSession {
    async fn resolve(&self, target: &EntityRef) -> Result<ResolvedChannel, SessionError> {
        match self.peers.lock().unwrap().get(target.value()) {
            Some(peer_id) => Ok(ResolvedChannel {
                peer_id: *peer_id,
                title: None,
            }),
            None => Err(SessionError::Resolve(format!("{} not found", target.value()))),
        }
    }

    async fn fetch_after(
        &self,
        channel: &ResolvedChannel,
        min_id: i64,
        limit: usize,
    ) -> Result<Vec<FetchedMessage>, SessionError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fetch_error.lock().unwrap().clone() {
            return Err(err);
        }
        if self.denied.lock().unwrap().contains(&channel.peer_id) {
            return Err(SessionError::Resolve("CHANNEL_PRIVATE".into()));
        }

        let mut messages: Vec<FetchedMessage> = self
            .history
            .lock()
            .unwrap()
            .get(&channel.peer_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m.id > min_id)
            .collect();
        // The oldest page past the watermark, handed back newest first.
        messages.sort_by_key(|m| m.id);
        messages.truncate(limit);
        messages.reverse();
        Ok(messages)
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub sessions: Mutex<HashMap<AccountId, Result<Arc<FakeSession>, SessionError>>>,
    pub connects: AtomicUsize,
}

impl FakeConnector {
    pub fn serve(&self, account_id: AccountId, session: Arc<FakeSession>) {
        self.sessions.lock().unwrap().insert(account_id, Ok(session));
    }

    pub fn refuse(&self, account_id: AccountId, err: SessionError) {
        self.sessions.lock().unwrap().insert(account_id, Err(err));
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self, account: &Account) -> Result<Arc<dyn ProtocolSession>, SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.sessions.lock().unwrap().get(&account.id) {
            Some(Ok(session)) => Ok(session.clone() as Arc<dyn ProtocolSession>),
            Some(Err(e)) => Err(e.clone()),
            None => Err(SessionError::Connect(format!("no session for account {}", account.id))),
        }
    }
}

// -- Outbound fakes --

#[derive(Default)]
pub struct FakeAlerts {
    pub sent: Mutex<Vec<(i64, AccountAlert)>>,
    /// While set, every alert fails to send.
    pub down: AtomicBool,
}

impl FakeAlerts {
    pub fn count_for(&self, account_id: AccountId) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, alert)| alert.account_id == account_id)
            .count()
    }
}

#[async_trait]
impl AdminAlertSink for FakeAlerts {
    async fn send_account_alert(
        &self,
        admin: &chanwatch_types::models::Reviewer,
        alert: &AccountAlert,
    ) -> anyhow::Result<()> {
        if self.down.load(Ordering::SeqCst) {
            anyhow::bail!("bot api unavailable");
        }
        self.sent.lock().unwrap().push((admin.telegram_id, alert.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    next_message_id: AtomicI64,
    pub delivered: Mutex<Vec<(i64, ReviewNotice, DeliveryHandle)>>,
    pub retracted: Mutex<Vec<DeliveryHandle>>,
    pub acknowledged: Mutex<Vec<(DeliveryHandle, ProcessingStatus)>>,
    pub texts: Mutex<Vec<(i64, String)>>,
    /// Chats whose deliveries fail.
    pub failing_chats: Mutex<Vec<i64>>,
    /// When set, the work item is resolved by someone else during delivery.
    pub race_with: Mutex<Option<Arc<Database>>>,
}

impl FakeNotifier {
    pub fn delivered_to(&self, chat_id: i64) -> Vec<DeliveryHandle> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(chat, _, _)| *chat == chat_id)
            .map(|(_, _, handle)| *handle)
            .collect()
    }
}

#[async_trait]
impl ReviewerNotifier for FakeNotifier {
    async fn deliver(&self, chat_id: i64, notice: &ReviewNotice) -> anyhow::Result<DeliveryHandle> {
        if self.failing_chats.lock().unwrap().contains(&chat_id) {
            anyhow::bail!("chat {} unreachable", chat_id);
        }
        if let Some(db) = self.race_with.lock().unwrap().as_ref() {
            db.unit_of_work(|store| {
                store.cas_resolve(notice.processing_id, ProcessingStatus::Ignored, None, Utc::now())
            })?;
        }
        let handle = DeliveryHandle {
            chat_id,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1,
        };
        self.delivered.lock().unwrap().push((chat_id, notice.clone(), handle));
        Ok(handle)
    }

    async fn retract(&self, handle: &DeliveryHandle) -> anyhow::Result<()> {
        self.retracted.lock().unwrap().push(*handle);
        Ok(())
    }

    async fn acknowledge(&self, handle: &DeliveryHandle, status: ProcessingStatus) -> anyhow::Result<()> {
        self.acknowledged.lock().unwrap().push((*handle, status));
        Ok(())
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        self.texts.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

// -- Seeding --

pub fn message(id: i64, text: &str) -> FetchedMessage {
    FetchedMessage {
        id,
        text: text.to_string(),
        date: Utc::now(),
        media_type: None,
    }
}

pub fn add_account(db: &Database, name: &str) -> AccountId {
    db.unit_of_work(|store| {
        store.insert_account(&NewAccount {
            name: name.to_string(),
            api_id: "1".into(),
            api_hash: "hash".into(),
            phone: format!("+1555{}", name.len()),
            description: None,
            session_blob: Some("blob".into()),
            is_authorized: true,
        })
    })
    .unwrap()
}

pub fn add_channel(db: &Database, handle: &str, watermark: Option<i64>) -> ChannelId {
    db.unit_of_work(|store| {
        let id = store.insert_channel(&NewChannel {
            title: format!("Channel {handle}"),
            username: Some(handle.to_string()),
            invite_link: None,
        })?;
        if let Some(watermark) = watermark {
            store.advance_watermark(id, watermark, Utc::now())?;
        }
        Ok(id)
    })
    .unwrap()
}

pub fn add_keyword(db: &Database, text: &str, kind: KeywordKind) {
    db.unit_of_work(|store| store.insert_keyword(text, kind)).unwrap();
}

pub fn add_reviewer(db: &Database, telegram_id: i64, role: ReviewerRole) -> ReviewerId {
    db.unit_of_work(|store| {
        store.insert_reviewer(&NewReviewer {
            telegram_id,
            username: None,
            role,
            language: None,
            utc_offset_minutes: 0,
        })
    })
    .unwrap()
}

pub fn watermark(db: &Database, channel_id: ChannelId) -> Option<i64> {
    db.unit_of_work(|store| store.get_channel(channel_id))
        .unwrap()
        .and_then(|c| c.last_parsed_message_id)
}

pub fn is_authorized(db: &Database, account_id: AccountId) -> bool {
    db.unit_of_work(|store| store.get_account(account_id))
        .unwrap()
        .map(|a| a.is_authorized)
        .unwrap_or(false)
}

// -- Wiring --

pub struct Harness {
    pub db: Arc<Database>,
    pub connector: Arc<FakeConnector>,
    pub alerts: Arc<FakeAlerts>,
    pub notifier: Arc<FakeNotifier>,
    pub pool: WorkerPool,
    pub monitor: Arc<Monitor>,
    pub machine: ProcessingMachine,
    pub dispatcher: NotificationDispatcher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(MonitorConfig::default())
    }

    pub fn with_config(config: MonitorConfig) -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let connector = Arc::new(FakeConnector::default());
        let alerts = Arc::new(FakeAlerts::default());
        let notifier = Arc::new(FakeNotifier::default());

        let alerting = Arc::new(Alerting::new(db.clone(), alerts.clone()));
        let pool = WorkerPool::new(db.clone(), connector.clone(), alerting);
        let monitor = Arc::new(Monitor::new(db.clone(), pool.clone(), config));
        let machine = ProcessingMachine::new(db.clone(), notifier.clone());
        let dispatcher = NotificationDispatcher::new(db.clone(), notifier.clone(), TimeDelta::hours(24));

        Self {
            db,
            connector,
            alerts,
            notifier,
            pool,
            monitor,
            machine,
            dispatcher,
        }
    }

    /// One admin reviewer so alerts have somewhere to go.
    pub fn with_admin(self, telegram_id: i64) -> Self {
        add_reviewer(&self.db, telegram_id, ReviewerRole::Admin);
        self
    }
}
