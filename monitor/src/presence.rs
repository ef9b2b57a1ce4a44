//! Player presence tracking
//!
//! Keeps one [`PlayerRecord`] per player name ever seen in a `/players` reply.
//! Records are never removed: a player who stops playing stays on the roster
//! as offline, with the time of their last change and the length of their last
//! session preserved for the dashboard.
//!
//! The roster survives restarts. At startup the persisted roster is merged in
//! with [`PresenceTracker::merge_persisted`], and the session writes the full
//! roster back whenever [`PresenceTracker::apply`] reports a change.

use crate::parsers::PlayerEntry;
use crate::utils::{hours_between, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Roster keyed by player name
pub type PlayerMap = BTreeMap<String, PlayerRecord>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub online: bool,
    /// When `online` last flipped. `None` for players who were already
    /// offline when tracking began.
    pub last_change: Option<Timestamp>,
    /// Length in hours of the most recent completed session.
    #[serde(default)]
    pub last_online_duration: Option<f64>,
}

/// Outcome of applying one players reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceUpdate {
    /// A record was created or modified and the roster should be persisted.
    pub changed: bool,
    /// Names that came online, in reply order.
    pub joined: Vec<String>,
    pub left: Vec<String>,
    /// Nobody in the reply was online.
    pub polling_paused: bool,
}

#[derive(Debug, Default)]
pub struct PresenceTracker {
    players: PlayerMap,
    /// Set once the first players reply has been applied.
    observed: bool,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn players(&self) -> &PlayerMap {
        &self.players
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn online_count(&self) -> usize {
        self.players.values().filter(|record| record.online).count()
    }

    /// Merges a roster loaded from storage.
    ///
    /// Stored history wins: unknown names are adopted as-is, and for known
    /// names the stored `online` and `last_change` replace the in-memory ones.
    pub fn merge_persisted(&mut self, stored: PlayerMap) {
        for (name, stored_record) in stored {
            match self.players.entry(name) {
                Entry::Vacant(slot) => {
                    slot.insert(stored_record);
                }
                Entry::Occupied(mut slot) => {
                    let record = slot.get_mut();
                    record.online = stored_record.online;
                    record.last_change = stored_record.last_change;
                    if record.last_online_duration.is_none() {
                        record.last_online_duration = stored_record.last_online_duration;
                    }
                }
            }
        }
    }

    /// Applies one parsed players reply observed at `now`.
    pub fn apply(&mut self, entries: &[PlayerEntry], now: Timestamp) -> PresenceUpdate {
        let first_observation = !self.observed;
        self.observed = true;

        let mut update = PresenceUpdate {
            polling_paused: !entries.iter().any(|entry| entry.online),
            ..PresenceUpdate::default()
        };

        for entry in entries {
            match self.players.entry(entry.name.clone()) {
                Entry::Vacant(slot) => {
                    // Offline at first sight tells us nothing about when they left.
                    let last_change = if first_observation && !entry.online {
                        None
                    } else {
                        Some(now)
                    };

                    slot.insert(PlayerRecord {
                        online: entry.online,
                        last_change,
                        last_online_duration: None,
                    });

                    if entry.online {
                        update.joined.push(entry.name.clone());
                    }
                    update.changed = true;
                }

                Entry::Occupied(mut slot) => {
                    let record = slot.get_mut();
                    if record.online == entry.online {
                        continue;
                    }

                    if entry.online {
                        update.joined.push(entry.name.clone());
                    } else {
                        if let Some(started) = record.last_change {
                            record.last_online_duration = Some(hours_between(started, now));
                        }
                        update.left.push(entry.name.clone());
                    }

                    record.online = entry.online;
                    record.last_change = Some(now);
                    update.changed = true;
                }
            }
        }

        update
    }
}
