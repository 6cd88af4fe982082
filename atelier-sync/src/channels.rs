//! Channel subscription registry and the admin-facing occupancy counter.
//!
//! The registry decides which subscribe/unsubscribe commands to issue. It
//! performs no I/O: callers send the returned [`ChannelCommand`]s through the
//! channel collaborator in issue order, never wait on an acknowledgment
//! before the local state counts as subscribed, and report each outcome back
//! through [`ChannelRegistry::settle`].
//!
//! Channels are either sticky (wanted for as long as the user is signed in,
//! re-issued on every new session) or transient (owned by a feature, which
//! must request them again after a reconnect).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, warn};

use crate::protocol::{Channel, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Re-subscribed automatically whenever a new session is issued.
    Sticky,
    /// Dropped on session loss; the owning feature re-requests it.
    Transient,
}

/// A request to send to the channel collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCommand {
    Subscribe { channel: Channel, session: SessionId },
    Unsubscribe { channel: Channel, session: SessionId },
}

impl ChannelCommand {
    pub fn channel(&self) -> Channel {
        match self {
            ChannelCommand::Subscribe { channel, .. } | ChannelCommand::Unsubscribe { channel, .. } => *channel,
        }
    }

    pub fn session(&self) -> &SessionId {
        match self {
            ChannelCommand::Subscribe { session, .. } | ChannelCommand::Unsubscribe { session, .. } => session,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Issued(ChannelCommand),
    AlreadySubscribed,
    /// No session yet; issued once one arrives.
    Deferred,
}

#[derive(Debug, Default)]
pub struct ChannelRegistry {
    session: Option<SessionId>,
    /// Channels believed subscribed under the current session.
    subscribed: BTreeSet<Channel>,
    sticky: BTreeSet<Channel>,
    /// Transient channels requested while no session existed.
    deferred: BTreeSet<Channel>,
    /// Issued commands not yet settled, per channel.
    in_flight: HashMap<Channel, usize>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, channel: Channel, retention: Retention) -> SubscribeOutcome {
        if retention == Retention::Sticky {
            self.sticky.insert(channel);
        }

        let Some(session) = self.session.clone() else {
            if retention == Retention::Transient {
                self.deferred.insert(channel);
            }
            warn!("Subscribe to {channel} without a session, deferring");
            return SubscribeOutcome::Deferred;
        };

        if !self.subscribed.insert(channel) {
            return SubscribeOutcome::AlreadySubscribed;
        }
        debug!("Subscribing to {channel} on session {session}");
        SubscribeOutcome::Issued(self.issue(ChannelCommand::Subscribe { channel, session }))
    }

    /// Forget a channel. Returns the command to send, if any: nothing is sent
    /// when the channel was not subscribed or the session already dropped.
    pub fn unsubscribe(&mut self, channel: Channel) -> Option<ChannelCommand> {
        self.sticky.remove(&channel);
        self.deferred.remove(&channel);

        let session = self.session.clone()?;
        if !self.subscribed.remove(&channel) {
            return None;
        }
        debug!("Unsubscribing from {channel} on session {session}");
        Some(self.issue(ChannelCommand::Unsubscribe { channel, session }))
    }

    /// A session identifier arrived. Returns the subscriptions to issue:
    /// every sticky channel plus the transient ones deferred meanwhile.
    pub fn session_issued(&mut self, session: SessionId) -> Vec<ChannelCommand> {
        if self.session.as_ref() == Some(&session) {
            return Vec::new();
        }
        self.session = Some(session.clone());
        self.subscribed.clear();

        let wanted: BTreeSet<Channel> = self.sticky.union(&self.deferred).copied().collect();
        self.deferred.clear();
        wanted
            .into_iter()
            .map(|channel| {
                self.subscribed.insert(channel);
                self.issue(ChannelCommand::Subscribe {
                    channel,
                    session: session.clone(),
                })
            })
            .collect()
    }

    /// Transport closed: the session and every subscription made under it
    /// are stale. Sticky and deferred intent survives.
    pub fn session_lost(&mut self) -> Option<SessionId> {
        self.subscribed.clear();
        self.session.take()
    }

    /// Record the collaborator's answer to an issued command. A refused
    /// subscribe is rolled back so a later request issues it again, unless
    /// the session moved on or a newer command for the channel is still in
    /// flight. Returns `true` when a rollback happened.
    pub fn settle(&mut self, command: &ChannelCommand, accepted: bool) -> bool {
        let channel = command.channel();
        let newer = match self.in_flight.get_mut(&channel) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if newer == 0 {
            self.in_flight.remove(&channel);
        }

        match command {
            ChannelCommand::Subscribe { session, .. }
                if !accepted && newer == 0 && self.session.as_ref() == Some(session) =>
            {
                self.subscribed.remove(&channel)
            }
            _ => false,
        }
    }

    /// Commands issued but not yet settled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.values().sum()
    }

    fn issue(&mut self, command: ChannelCommand) -> ChannelCommand {
        *self.in_flight.entry(command.channel()).or_insert(0) += 1;
        command
    }

    /// Drop all sticky and deferred intent. Sticky channels stop counting as
    /// subscribed so a later sign-in issues them again.
    pub fn sign_out(&mut self) {
        for channel in std::mem::take(&mut self.sticky) {
            self.subscribed.remove(&channel);
        }
        self.deferred.clear();
    }

    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    pub fn is_subscribed(&self, channel: Channel) -> bool {
        self.subscribed.contains(&channel)
    }

    pub fn is_sticky(&self, channel: Channel) -> bool {
        self.sticky.contains(&channel)
    }

    pub fn subscribed(&self) -> Vec<Channel> {
        self.subscribed.iter().copied().collect()
    }
}

/// Running subscriber count per channel URN, fed by server `ChannelUpdate`
/// diffs. Independent of the registry.
#[derive(Debug, Default)]
pub struct ChannelOccupancy {
    counts: HashMap<String, i64>,
}

impl ChannelOccupancy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a diff. Returns the new count, or `None` once the entry is gone.
    pub fn apply(&mut self, channel: &str, diff: i64) -> Option<i64> {
        let count = self.counts.entry(channel.to_string()).or_insert(0);
        *count = count.saturating_add(diff);
        if *count <= 0 {
            self.counts.remove(channel);
            return None;
        }
        Some(*count)
    }

    pub fn get(&self, channel: &str) -> Option<i64> {
        self.counts.get(channel).copied()
    }

    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.counts.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
