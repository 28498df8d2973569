/*
[INPUT]:  Caller subscription commands (subscribe, set-mode, unsubscribe)
[OUTPUT]: Token-to-mode map and per-mode replay snapshots
[POS]:    WebSocket layer - subscription state that outlives sessions
[UPDATE]: When subscription semantics or replay grouping change
*/

use std::collections::{BTreeMap, HashMap};

use crate::types::enums::Mode;

/// Desired subscriptions, independent of any live connection.
///
/// Owned by the reconnection controller and mutated only through caller
/// commands; the read loop never touches it. Contents survive reconnects and
/// are replayed onto every new session from `snapshot_by_mode`.
#[derive(Debug, Clone)]
pub struct SubscriptionRegistry {
    entries: HashMap<u32, Mode>,
    default_mode: Mode,
}

impl SubscriptionRegistry {
    pub fn new(default_mode: Mode) -> Self {
        Self {
            entries: HashMap::new(),
            default_mode,
        }
    }

    /// Record tokens at the default mode; already-subscribed tokens keep theirs
    pub fn subscribe(&mut self, tokens: &[u32]) {
        for &token in tokens {
            self.entries.entry(token).or_insert(self.default_mode);
        }
    }

    /// Upsert the mode for tokens, subscribing new ones implicitly
    pub fn set_mode(&mut self, mode: Mode, tokens: &[u32]) {
        for &token in tokens {
            self.entries.insert(token, mode);
        }
    }

    /// Drop tokens entirely
    pub fn unsubscribe(&mut self, tokens: &[u32]) {
        for token in tokens {
            self.entries.remove(token);
        }
    }

    pub fn mode_of(&self, token: u32) -> Option<Mode> {
        self.entries.get(&token).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Active subscriptions grouped for replay: one entry per mode, tokens
    /// sorted so replay traffic is deterministic
    pub fn snapshot_by_mode(&self) -> BTreeMap<Mode, Vec<u32>> {
        let mut snapshot: BTreeMap<Mode, Vec<u32>> = BTreeMap::new();
        for (&token, &mode) in &self.entries {
            snapshot.entry(mode).or_default().push(token);
        }
        for tokens in snapshot.values_mut() {
            tokens.sort_unstable();
        }
        snapshot
    }
}
