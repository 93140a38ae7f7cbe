use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use chanwatch_db::{ChannelRepo, Database, KeywordRepo};
use chanwatch_types::api::{RunReport, RunStatus, WorkerSnapshot};
use chanwatch_types::models::AccountId;

use crate::config::MonitorConfig;
use crate::distributor::{Assignment, Distribution};
use crate::error::{FetchError, SessionError};
use crate::fetcher::{self, FetchReport};
use crate::keywords::RuleSet;
use crate::pool::WorkerPool;
use crate::session::ProtocolSession;

/// Runs ingestion cycles. At most one cycle runs at a time per process.
pub struct Monitor {
    db: Arc<Database>,
    pool: WorkerPool,
    config: MonitorConfig,
    run_lock: Mutex<()>,
}

impl Monitor {
    pub fn new(db: Arc<Database>, pool: WorkerPool, config: MonitorConfig) -> Self {
        Self {
            db,
            pool,
            config: config.clamped(),
            run_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub async fn workers(&self) -> Vec<WorkerSnapshot> {
        self.pool.snapshot().await
    }

    /// One full distribution and ingestion cycle. A call that finds another
    /// cycle in flight returns immediately with [`RunStatus::AlreadyRunning`].
    pub async fn run_once(&self) -> anyhow::Result<RunReport> {
        let run_id = Uuid::new_v4();
        let Ok(_guard) = self.run_lock.try_lock() else {
            info!("Ingestion run {} skipped, another run is in progress", run_id);
            return Ok(RunReport::empty(run_id, RunStatus::AlreadyRunning));
        };

        let span = info_span!("ingest_run", run_id = %run_id);
        self.run(run_id).instrument(span).await
    }

    async fn run(&self, run_id: Uuid) -> anyhow::Result<RunReport> {
        let (keywords, channels) = self
            .db
            .unit_of_work(|store| Ok((store.list_active_keywords()?, store.list_active_channels()?)))?;

        if channels.is_empty() {
            info!("No active channels to monitor");
            return Ok(RunReport::empty(run_id, RunStatus::NothingToDo));
        }

        // An empty rule set would let every watermark run past unseen posts.
        let rules = RuleSet::compile(&keywords);
        if rules.is_empty() {
            warn!("No usable keyword rules, skipping run");
            return Ok(RunReport::empty(run_id, RunStatus::NothingToDo));
        }

        let mut sessions: HashMap<AccountId, Arc<dyn ProtocolSession>> =
            self.pool.activate_all().await.into_iter().collect();
        let mut report = RunReport::empty(run_id, RunStatus::Completed);

        if sessions.is_empty() {
            warn!("No active workers, {} channels wait for the next run", channels.len());
            report.status = RunStatus::NoWorkers;
            report.channels_deferred = channels.iter().map(|c| c.id).collect();
            return Ok(report);
        }

        let workers: Vec<AccountId> = sessions.keys().copied().collect();
        info!(
            "Distributing {} channels over {} workers with {} rules",
            channels.len(),
            workers.len(),
            rules.len()
        );
        let mut distribution = Distribution::round_robin(&workers, channels);

        loop {
            let batch = distribution.next_batch(self.config.max_concurrent_fetches);
            if batch.is_empty() {
                break;
            }

            let fetches = batch.into_iter().map(|assignment| {
                let session = sessions.get(&assignment.account_id).cloned();
                let rules = &rules;
                async move {
                    let result = match session {
                        Some(session) => {
                            fetcher::fetch_channel(
                                session.as_ref(),
                                &self.db,
                                &assignment.channel,
                                rules,
                                self.config.page_size,
                            )
                            .await
                        }
                        None => Err(FetchError::Session(SessionError::Connect(format!(
                            "no session for worker {}",
                            assignment.account_id
                        )))),
                    };
                    (assignment, result)
                }
            });

            for (assignment, result) in join_all(fetches).await {
                self.settle(assignment, result, &mut distribution, &mut sessions, &mut report)
                    .await;
            }
        }

        report.channels_deferred = distribution.into_unfetched();
        report.channels_skipped.sort_unstable();
        report.failed_workers.sort_unstable();

        info!(
            "Ingestion run done: {} channels fetched, {} skipped, {} deferred, {} messages, {} new posts",
            report.channels_fetched,
            report.channels_skipped.len(),
            report.channels_deferred.len(),
            report.messages_seen,
            report.new_posts
        );
        Ok(report)
    }

    /// Fold one fetch result into the run. A worker-level failure retires
    /// the worker for this run and hands its channels to the others.
    async fn settle(
        &self,
        assignment: Assignment,
        result: Result<FetchReport, FetchError>,
        distribution: &mut Distribution,
        sessions: &mut HashMap<AccountId, Arc<dyn ProtocolSession>>,
        report: &mut RunReport,
    ) {
        let Assignment { account_id, channel } = assignment;

        match result {
            Ok(fetched) => {
                report.channels_fetched += 1;
                report.messages_seen += fetched.messages_seen;
                report.new_posts += fetched.new_posts;
            }
            Err(FetchError::Unresolvable(channel_id)) => {
                warn!("Channel {} could not be resolved, retrying next run", channel_id);
                report.channels_skipped.push(channel_id);
            }
            Err(FetchError::Session(SessionError::Resolve(reason))) => {
                warn!("Channel {} is not readable, retrying next run: {}", channel.id, reason);
                report.channels_skipped.push(channel.id);
            }
            Err(FetchError::Store(e)) => {
                error!("Channel {} stopped on a store error: {}", channel.id, e);
                report.channels_skipped.push(channel.id);
            }
            Err(FetchError::Session(e)) => {
                warn!("Worker {} dropped out on channel {}: {}", account_id, channel.id, e);
                self.pool.handle_error(account_id, &e).await;
                if e.is_account_failure() && !report.failed_workers.contains(&account_id) {
                    report.failed_workers.push(account_id);
                }

                sessions.remove(&account_id);
                let mut orphaned = vec![channel];
                orphaned.extend(distribution.retire(account_id));
                distribution.reassign(orphaned);
            }
        }
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

/// Background loop driving [`Monitor::run_once`] on the ingestion interval.
pub async fn run_ingest_loop(monitor: Arc<Monitor>) {
    let mut interval = tokio::time::interval(monitor.config().ingest_interval);

    loop {
        interval.tick().await;

        match monitor.run_once().await {
            Ok(report) => {
                if report.status != RunStatus::Completed {
                    info!("Ingestion run {} ended: {:?}", report.run_id, report.status);
                }
            }
            Err(e) => {
                warn!("Ingestion run error: {}", e);
            }
        }
    }
}
