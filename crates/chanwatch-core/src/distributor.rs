//! Splits the active channels of one run across the active workers.

use std::collections::{BTreeMap, VecDeque};

use chanwatch_types::models::{AccountId, Channel, ChannelId};

/// One fetch to perform: `channel` on the session of `account_id`.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub account_id: AccountId,
    pub channel: Channel,
}

/// Per-run channel queues, one per worker.
#[derive(Debug, Default)]
pub struct Distribution {
    queues: BTreeMap<AccountId, VecDeque<Channel>>,
    deferred: Vec<Channel>,
}

impl Distribution {
    /// Deterministic round-robin: channels ordered by id, workers by account
    /// id, channel `i` goes to worker `i % n`. Without workers every channel
    /// is deferred.
    pub fn round_robin(workers: &[AccountId], mut channels: Vec<Channel>) -> Self {
        let mut workers = workers.to_vec();
        workers.sort_unstable();
        workers.dedup();
        channels.sort_by_key(|c| c.id);

        if workers.is_empty() {
            return Self {
                queues: BTreeMap::new(),
                deferred: channels,
            };
        }

        let mut queues: BTreeMap<AccountId, VecDeque<Channel>> =
            workers.iter().map(|id| (*id, VecDeque::new())).collect();
        for (i, channel) in channels.into_iter().enumerate() {
            if let Some(queue) = queues.get_mut(&workers[i % workers.len()]) {
                queue.push_back(channel);
            }
        }

        Self {
            queues,
            deferred: Vec::new(),
        }
    }

    /// Up to `cap` assignments, taking one channel per worker in turn.
    pub fn next_batch(&mut self, cap: usize) -> Vec<Assignment> {
        let mut batch = Vec::with_capacity(cap);
        while batch.len() < cap {
            let before = batch.len();
            for (account_id, queue) in self.queues.iter_mut() {
                if batch.len() == cap {
                    break;
                }
                if let Some(channel) = queue.pop_front() {
                    batch.push(Assignment {
                        account_id: *account_id,
                        channel,
                    });
                }
            }
            if batch.len() == before {
                break;
            }
        }
        batch
    }

    /// Drop a worker from this run and hand back its unfinished channels.
    pub fn retire(&mut self, account_id: AccountId) -> Vec<Channel> {
        self.queues
            .remove(&account_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Give orphaned channels to the least loaded remaining workers, lowest
    /// account id first on ties. With no worker left they are deferred to
    /// the next run.
    pub fn reassign(&mut self, orphaned: Vec<Channel>) {
        for channel in orphaned {
            let target = self
                .queues
                .iter()
                .min_by_key(|(id, queue)| (queue.len(), **id))
                .map(|(id, _)| *id);

            match target.and_then(|id| self.queues.get_mut(&id)) {
                Some(queue) => queue.push_back(channel),
                None => self.deferred.push(channel),
            }
        }
    }

    pub fn workers(&self) -> Vec<AccountId> {
        self.queues.keys().copied().collect()
    }

    pub fn has_workers(&self) -> bool {
        !self.queues.is_empty()
    }

    pub fn is_drained(&self) -> bool {
        self.queues.values().all(VecDeque::is_empty)
    }

    /// Channels still queued for `account_id`.
    pub fn queued_for(&self, account_id: AccountId) -> Vec<ChannelId> {
        self.queues
            .get(&account_id)
            .map(|q| q.iter().map(|c| c.id).collect())
            .unwrap_or_default()
    }

    /// Everything that will not be fetched this run: the deferred channels
    /// plus whatever is still queued.
    pub fn into_unfetched(self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self
            .deferred
            .iter()
            .chain(self.queues.values().flatten())
            .map(|c| c.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use chanwatch_types::models::ChannelStatus;

    use super::*;

    fn channels(ids: &[ChannelId]) -> Vec<Channel> {
        ids.iter()
            .map(|id| Channel {
                id: *id,
                title: format!("channel {id}"),
                username: Some(format!("c{id}")),
                invite_link: None,
                status: ChannelStatus::Active,
                last_parsed_message_id: None,
                last_checked: None,
            })
            .collect()
    }

    #[test]
    fn round_robin_is_deterministic() {
        let d = Distribution::round_robin(&[20, 10], channels(&[5, 1, 3, 2, 4]));
        assert_eq!(d.queued_for(10), vec![1, 3, 5]);
        assert_eq!(d.queued_for(20), vec![2, 4]);
    }

    #[test]
    fn batches_interleave_workers_and_respect_cap() {
        let mut d = Distribution::round_robin(&[1, 2], channels(&[1, 2, 3, 4, 5]));
        let batch: Vec<_> = d.next_batch(3).iter().map(|a| (a.account_id, a.channel.id)).collect();
        assert_eq!(batch, vec![(1, 1), (2, 2), (1, 3)]);

        let batch: Vec<_> = d.next_batch(3).iter().map(|a| (a.account_id, a.channel.id)).collect();
        assert_eq!(batch, vec![(2, 4), (1, 5)]);
        assert!(d.is_drained());
        assert!(d.next_batch(3).is_empty());
    }

    #[test]
    fn retired_worker_channels_move_to_survivors() {
        let mut d = Distribution::round_robin(&[1, 2, 3], channels(&[1, 2, 3, 4, 5, 6]));
        let orphaned = d.retire(2);
        assert_eq!(orphaned.iter().map(|c| c.id).collect::<Vec<_>>(), vec![2, 5]);

        d.reassign(orphaned);
        assert_eq!(d.workers(), vec![1, 3]);
        assert_eq!(d.queued_for(1), vec![1, 4, 2]);
        assert_eq!(d.queued_for(3), vec![3, 6, 5]);
        assert_eq!(d.into_unfetched().len(), 6);
    }

    #[test]
    fn channels_are_deferred_when_no_worker_remains() {
        let mut d = Distribution::round_robin(&[1], channels(&[1, 2]));
        let first = d.next_batch(1);
        assert_eq!(first[0].channel.id, 1);

        let orphaned = d.retire(1);
        d.reassign(orphaned);
        assert!(!d.has_workers());
        assert_eq!(d.into_unfetched(), vec![2]);

        let empty = Distribution::round_robin(&[], channels(&[7]));
        assert_eq!(empty.into_unfetched(), vec![7]);
    }
}
