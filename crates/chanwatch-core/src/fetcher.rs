use chrono::Utc;
use tracing::{debug, info, warn};

use chanwatch_db::{ChannelRepo, Database};
use chanwatch_types::models::{Channel, ChannelId, NewPost};

use crate::error::{FetchError, SessionError};
use crate::ingest;
use crate::keywords::RuleSet;
use crate::session::{resolution_order, FetchedMessage, ProtocolSession, ResolvedChannel};

/// Internal id prefix Telegram puts in front of channel peer ids.
const CHANNEL_PEER_OFFSET: i64 = 1_000_000_000_000;

#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub channel_id: ChannelId,
    pub messages_seen: usize,
    pub matched: usize,
    pub new_posts: usize,
    /// The watermark after this fetch, if it moved.
    pub watermark: Option<i64>,
}

/// Try the channel's references in order until one resolves. A reference
/// that does not resolve falls through to the next; any other session
/// error ends the attempt.
pub async fn resolve_channel(
    session: &dyn ProtocolSession,
    channel: &Channel,
) -> Result<ResolvedChannel, FetchError> {
    for target in resolution_order(channel) {
        match session.resolve(&target).await {
            Ok(resolved) => return Ok(resolved),
            Err(SessionError::Resolve(reason)) => {
                debug!(
                    "Channel {} did not resolve as {} {:?}: {}",
                    channel.id,
                    target.kind().as_str(),
                    target.value(),
                    reason
                );
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(FetchError::Unresolvable(channel.id))
}

/// Public link when the channel has a handle, private `t.me/c/` form otherwise.
pub fn post_url(channel: &Channel, peer_id: i64, message_id: i64) -> String {
    match channel.username.as_deref().map(|u| u.trim_start_matches('@')) {
        Some(handle) if !handle.trim().is_empty() => format!("https://t.me/{}/{}", handle.trim(), message_id),
        _ => {
            let bare = if peer_id <= -CHANNEL_PEER_OFFSET {
                peer_id.unsigned_abs() - CHANNEL_PEER_OFFSET.unsigned_abs()
            } else {
                peer_id.unsigned_abs()
            };
            format!("https://t.me/c/{}/{}", bare, message_id)
        }
    }
}

/// Pull everything past the channel's watermark, ingest the matches and move
/// the watermark up to the newest message handled.
///
/// Messages are handled oldest first. If storing one fails, the watermark is
/// still advanced over the messages before it, so a retry resumes exactly
/// there.
pub async fn fetch_channel(
    session: &dyn ProtocolSession,
    db: &Database,
    channel: &Channel,
    rules: &RuleSet,
    page_size: usize,
) -> Result<FetchReport, FetchError> {
    let resolved = resolve_channel(session, channel).await?;
    let watermark = channel.watermark();

    let mut messages = session.fetch_after(&resolved, watermark, page_size).await?;
    messages.retain(|m| m.id > watermark);
    messages.sort_by_key(|m| m.id);
    messages.dedup_by_key(|m| m.id);

    let mut report = FetchReport {
        channel_id: channel.id,
        messages_seen: messages.len(),
        ..FetchReport::default()
    };

    let mut handled_up_to: Option<i64> = None;
    for message in &messages {
        if let Err(e) = ingest_message(db, channel, &resolved, rules, message, &mut report) {
            warn!(
                "Storing message {} of channel {} failed, stopping this channel: {}",
                message.id, channel.id, e
            );
            commit_progress(db, channel, handled_up_to)?;
            return Err(FetchError::Store(e));
        }
        handled_up_to = Some(message.id);
    }

    report.watermark = commit_progress(db, channel, handled_up_to)?;

    if report.matched > 0 {
        info!(
            "Channel {}: {} new messages, {} matched, {} new posts",
            channel.id, report.messages_seen, report.matched, report.new_posts
        );
    } else {
        debug!("Channel {}: {} new messages, none matched", channel.id, report.messages_seen);
    }
    Ok(report)
}

fn ingest_message(
    db: &Database,
    channel: &Channel,
    resolved: &ResolvedChannel,
    rules: &RuleSet,
    message: &FetchedMessage,
    report: &mut FetchReport,
) -> anyhow::Result<()> {
    let matched = rules.matches(&message.text);
    if matched.is_empty() {
        return Ok(());
    }
    report.matched += 1;

    let post = NewPost {
        channel_id: channel.id,
        message_id: message.id,
        text: message.text.clone(),
        media_type: message.media_type.clone(),
        published_at: message.date,
        url: Some(post_url(channel, resolved.peer_id, message.id)),
    };
    let outcome = db.unit_of_work(|store| ingest::ingest_matched(store, &post, &matched))?;
    if outcome.created {
        report.new_posts += 1;
    }
    Ok(())
}

/// Advance the watermark to `up_to` (never lowers it) and stamp
/// `last_checked`. Returns the new watermark if it moved.
fn commit_progress(db: &Database, channel: &Channel, up_to: Option<i64>) -> anyhow::Result<Option<i64>> {
    let now = Utc::now();
    db.unit_of_work(|store| match up_to {
        Some(message_id) => {
            let moved = store.advance_watermark(channel.id, message_id, now)?;
            Ok(moved.then_some(message_id))
        }
        None => {
            store.touch_checked(channel.id, now)?;
            Ok(None)
        }
    })
}

#[cfg(test)]
mod tests {
    use chanwatch_types::models::ChannelStatus;

    use super::*;

    fn channel(username: Option<&str>) -> Channel {
        Channel {
            id: 1,
            title: "t".into(),
            username: username.map(Into::into),
            invite_link: Some("https://t.me/+hash".into()),
            status: ChannelStatus::Active,
            last_parsed_message_id: Some(100),
            last_checked: None,
        }
    }

    #[test]
    fn public_channels_link_by_handle() {
        assert_eq!(post_url(&channel(Some("@leaks")), -1001234, 103), "https://t.me/leaks/103");
    }

    #[test]
    fn private_channels_use_bare_peer_id() {
        assert_eq!(
            post_url(&channel(None), -1_001_234_567_890, 5),
            "https://t.me/c/1234567890/5"
        );
        assert_eq!(post_url(&channel(Some("")), 42, 5), "https://t.me/c/42/5");
    }

    #[test]
    fn extreme_peer_ids_still_format() {
        assert_eq!(
            post_url(&channel(None), i64::MIN, 1),
            "https://t.me/c/9223371036854775808/1"
        );
        assert_eq!(post_url(&channel(None), -7, 1), "https://t.me/c/7/1");
    }
}
