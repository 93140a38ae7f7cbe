//! The seam between the engine and the messaging network.
//!
//! A [`SessionConnector`] turns an [`Account`] into a live [`ProtocolSession`].
//! The engine never speaks the wire protocol itself.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chanwatch_types::models::{Account, Channel};

use crate::error::SessionError;

/// A way of naming a channel to the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    /// Public `@handle`, stored without the `@`.
    Handle(String),
    /// Name taken from a public `t.me/<name>` link.
    PublicLink(String),
    /// Hash of a private `t.me/+<hash>` or `t.me/joinchat/<hash>` invite.
    InviteHash(String),
}

impl EntityRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Handle(_) => EntityKind::Handle,
            Self::PublicLink(_) => EntityKind::Link,
            Self::InviteHash(_) => EntityKind::Invite,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Handle(v) | Self::PublicLink(v) | Self::InviteHash(v) => v,
        }
    }

    /// Parse a `t.me` link (or bare `@handle`) into a reference.
    pub fn parse_link(link: &str) -> Option<Self> {
        let link = link.trim();
        if let Some(handle) = link.strip_prefix('@') {
            return non_empty(handle).map(Self::Handle);
        }

        let rest = link
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("www.");
        let path = rest
            .strip_prefix("t.me/")
            .or_else(|| rest.strip_prefix("telegram.me/"))?;
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let first = segments.next()?;

        if let Some(hash) = first.strip_prefix('+') {
            return non_empty(hash).map(Self::InviteHash);
        }
        if first == "joinchat" {
            return segments.next().and_then(non_empty).map(Self::InviteHash);
        }
        non_empty(first).map(Self::PublicLink)
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Candidate references for a channel in resolution order:
/// public handle, then public link, then private invite.
pub fn resolution_order(channel: &Channel) -> Vec<EntityRef> {
    let mut refs = Vec::new();

    if let Some(handle) = channel.username.as_deref().map(|u| u.trim_start_matches('@')) {
        if let Some(handle) = non_empty(handle) {
            refs.push(EntityRef::Handle(handle));
        }
    }
    if let Some(parsed) = channel.invite_link.as_deref().and_then(EntityRef::parse_link) {
        if !refs.contains(&parsed) {
            refs.push(parsed);
        }
    }

    refs.sort_by_key(|r| match r {
        EntityRef::Handle(_) => 0,
        EntityRef::PublicLink(_) => 1,
        EntityRef::InviteHash(_) => 2,
    });
    refs
}

/// Wire-level tag for an [`EntityRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Handle,
    Link,
    Invite,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Handle => "handle",
            Self::Link => "link",
            Self::Invite => "invite",
        }
    }
}

/// A channel as the network knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub peer_id: i64,
    pub title: Option<String>,
}

/// One message returned by a history fetch.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub id: i64,
    pub text: String,
    pub date: DateTime<Utc>,
    pub media_type: Option<String>,
}

#[async_trait]
pub trait ProtocolSession: Send + Sync {
    async fn resolve(&self, target: &EntityRef) -> Result<ResolvedChannel, SessionError>;

    /// Up to `limit` messages with id strictly greater than `min_id`,
    /// oldest first where the upstream allows it.
    async fn fetch_after(
        &self,
        channel: &ResolvedChannel,
        min_id: i64,
        limit: usize,
    ) -> Result<Vec<FetchedMessage>, SessionError>;

    async fn disconnect(&self);
}

#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Open and verify a session for `account`. An unauthorized session is
    /// reported as [`SessionError::Auth`].
    async fn connect(&self, account: &Account) -> Result<Arc<dyn ProtocolSession>, SessionError>;
}

#[cfg(test)]
mod tests {
    use chanwatch_types::models::ChannelStatus;

    use super::*;

    fn channel(username: Option<&str>, invite: Option<&str>) -> Channel {
        Channel {
            id: 1,
            title: "t".into(),
            username: username.map(Into::into),
            invite_link: invite.map(Into::into),
            status: ChannelStatus::Active,
            last_parsed_message_id: None,
            last_checked: None,
        }
    }

    #[test]
    fn parses_link_shapes() {
        assert_eq!(
            EntityRef::parse_link("https://t.me/durov/12"),
            Some(EntityRef::PublicLink("durov".into()))
        );
        assert_eq!(
            EntityRef::parse_link("t.me/+AbCdEf"),
            Some(EntityRef::InviteHash("AbCdEf".into()))
        );
        assert_eq!(
            EntityRef::parse_link("https://t.me/joinchat/XyZ?x=1"),
            Some(EntityRef::InviteHash("XyZ".into()))
        );
        assert_eq!(EntityRef::parse_link("@news"), Some(EntityRef::Handle("news".into())));
        assert_eq!(EntityRef::parse_link("https://example.com/x"), None);
        assert_eq!(EntityRef::parse_link("https://t.me/+"), None);
    }

    #[test]
    fn handle_beats_link_beats_invite() {
        let refs = resolution_order(&channel(Some("@news"), Some("https://t.me/+hash")));
        assert_eq!(
            refs,
            vec![EntityRef::Handle("news".into()), EntityRef::InviteHash("hash".into())]
        );

        let refs = resolution_order(&channel(None, Some("https://t.me/other")));
        assert_eq!(refs, vec![EntityRef::PublicLink("other".into())]);

        assert!(resolution_order(&channel(Some("  "), None)).is_empty());
    }
}
