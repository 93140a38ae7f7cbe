//! Persisting matched messages and fanning them out to reviewers.
//!
//! Everything here runs inside the caller's unit of work and is safe to
//! repeat: a re-fetched message reuses its post, and reviewers who already
//! hold a work item are left alone.

use anyhow::Result;

use chanwatch_db::{PostRepo, ProcessingRepo, ReviewerRepo};
use chanwatch_types::models::{KeywordId, NewPost, Post, PostId};

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub post: Post,
    /// `false` when the post already existed.
    pub created: bool,
    pub work_items_created: usize,
}

/// Store one matched message with its keyword matches and fan it out.
pub fn ingest_matched<S>(store: &S, post: &NewPost, keyword_ids: &[KeywordId]) -> Result<IngestOutcome>
where
    S: PostRepo + ProcessingRepo + ReviewerRepo,
{
    let (post, created) = store.insert_post_or_get(post)?;

    for keyword_id in keyword_ids {
        store.add_keyword_match(post.id, *keyword_id)?;
    }

    let work_items_created = fan_out(store, post.id)?;

    Ok(IngestOutcome {
        post,
        created,
        work_items_created,
    })
}

/// Give every current reviewer a pending work item for `post_id`, unless
/// they already have one. Returns how many were created.
pub fn fan_out<S>(store: &S, post_id: PostId) -> Result<usize>
where
    S: ProcessingRepo + ReviewerRepo,
{
    let mut created = 0;
    for reviewer in store.list_reviewers()? {
        if !reviewer.is_active || !reviewer.role.reviews_posts() {
            continue;
        }
        if store.ensure_processing(post_id, reviewer.id)? {
            created += 1;
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use chanwatch_db::{ChannelRepo, Database, KeywordRepo};
    use chanwatch_types::models::{KeywordKind, NewChannel, NewReviewer, ReviewerRole};

    use super::*;

    fn reviewer(telegram_id: i64, role: ReviewerRole) -> NewReviewer {
        NewReviewer {
            telegram_id,
            username: None,
            role,
            language: None,
            utc_offset_minutes: 0,
        }
    }

    #[test]
    fn reingesting_reuses_post_and_does_not_duplicate_work_items() {
        let db = Database::open_in_memory().unwrap();
        let (post, keyword) = db
            .unit_of_work(|store| {
                let channel_id = store.insert_channel(&NewChannel {
                    title: "Leaks".into(),
                    username: Some("leaks".into()),
                    invite_link: None,
                })?;
                let keyword = store.insert_keyword("breach", KeywordKind::Word)?;
                store.insert_reviewer(&reviewer(1, ReviewerRole::Admin))?;
                store.insert_reviewer(&reviewer(2, ReviewerRole::Operator))?;
                store.insert_reviewer(&reviewer(3, ReviewerRole::User))?;
                let post = NewPost {
                    channel_id,
                    message_id: 103,
                    text: "breach".into(),
                    media_type: None,
                    published_at: Utc::now(),
                    url: Some("https://t.me/leaks/103".into()),
                };
                Ok((post, keyword))
            })
            .unwrap();

        let first = db.unit_of_work(|store| ingest_matched(store, &post, &[keyword])).unwrap();
        assert!(first.created);
        assert_eq!(first.work_items_created, 2);

        let again = db.unit_of_work(|store| ingest_matched(store, &post, &[keyword])).unwrap();
        assert!(!again.created);
        assert_eq!(again.post.id, first.post.id);
        assert_eq!(again.work_items_created, 0);

        let rows = db.unit_of_work(|store| store.list_for_post(first.post.id)).unwrap();
        assert_eq!(rows.len(), 2);
        let keywords = db.unit_of_work(|store| store.matched_keywords(first.post.id)).unwrap();
        assert_eq!(keywords, vec!["breach".to_string()]);
    }

    #[test]
    fn fan_out_covers_reviewers_added_later() {
        let db = Database::open_in_memory().unwrap();
        let post_id = db
            .unit_of_work(|store| {
                let channel_id = store.insert_channel(&NewChannel {
                    title: "News".into(),
                    username: Some("news".into()),
                    invite_link: None,
                })?;
                store.insert_reviewer(&reviewer(1, ReviewerRole::Admin))?;
                let (post, _) = store.insert_post_or_get(&NewPost {
                    channel_id,
                    message_id: 7,
                    text: "x".into(),
                    media_type: None,
                    published_at: Utc::now(),
                    url: None,
                })?;
                Ok(post.id)
            })
            .unwrap();

        assert_eq!(db.unit_of_work(|store| fan_out(store, post_id)).unwrap(), 1);
        db.unit_of_work(|store| store.insert_reviewer(&reviewer(2, ReviewerRole::Operator)))
            .unwrap();
        assert_eq!(db.unit_of_work(|store| fan_out(store, post_id)).unwrap(), 1);
        assert_eq!(db.unit_of_work(|store| fan_out(store, post_id)).unwrap(), 0);
    }
}
