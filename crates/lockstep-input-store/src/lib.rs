/*!
# lockstep-input-store

Authoritative and hint input maps keyed by [`Tick`], the client's local copy
of per-tick per-player input (spec component C2).

Authoritative entries are final once inserted (insertion is checked,
duplicates are rejected rather than silently overwritten — the caller is
expected to log and drop them, see [`InputStoreError`]). Hint entries are
speculative and are allowed to be replaced, with the local player's own
hint always taking precedence over anything the network offers for that
same cell (see [`InputStore::merge_hint`]).
*/

use err_rs::{ErrorLevel, ErrorLevelProvider};
use lockstep_tick::{PlayerId, Tick};
use std::collections::BTreeMap;
use std::fmt;

/// A single tick's input, one entry per known player. `BTreeMap` keeps
/// iteration ordered by [`PlayerId`], which the prediction engine relies on
/// for deterministic `step` application order.
pub type TickInputs<I> = BTreeMap<PlayerId, I>;

#[derive(Debug)]
pub enum InputStoreError {
    DuplicateAuth { tick: Tick },
}

impl fmt::Display for InputStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateAuth { tick } => {
                write!(f, "duplicate authoritative input at {tick}")
            }
        }
    }
}

impl std::error::Error for InputStoreError {}

impl ErrorLevelProvider for InputStoreError {
    fn error_level(&self) -> ErrorLevel {
        match self {
            // Authoritative data is idempotent; a duplicate is expected
            // under reordering/retransmission and never fatal.
            Self::DuplicateAuth { .. } => ErrorLevel::Info,
        }
    }
}

/// Authoritative and hint inputs for every tick the client knows about.
#[derive(Debug, Default)]
pub struct InputStore<I: Clone> {
    auth: BTreeMap<Tick, TickInputs<I>>,
    hint: BTreeMap<Tick, TickInputs<I>>,
}

impl<I: Clone> InputStore<I> {
    /// Creates a store seeded with the empty authoritative map at tick 0,
    /// per the `AuthInputs` invariant in the data model.
    #[must_use]
    pub fn new() -> Self {
        let mut auth = BTreeMap::new();
        auth.insert(Tick::new(0), TickInputs::new());
        Self {
            auth,
            hint: BTreeMap::new(),
        }
    }

    /// Inserts a complete authoritative input map for `tick`. Authoritative
    /// maps are monotonic: re-inserting at an already-present tick is
    /// rejected rather than silently accepted.
    ///
    /// # Errors
    ///
    /// Returns [`InputStoreError::DuplicateAuth`] if `tick` is already
    /// present; the caller should log and continue (spec §4.2, §4.5).
    pub fn insert_auth(
        &mut self,
        tick: Tick,
        inner: TickInputs<I>,
    ) -> Result<(), InputStoreError> {
        if self.auth.contains_key(&tick) {
            return Err(InputStoreError::DuplicateAuth { tick });
        }
        self.auth.insert(tick, inner);
        Ok(())
    }

    /// Merges `new_hints` into the hint map at `tick`.
    ///
    /// The local player's existing hint at `tick` (if any) always wins,
    /// then the incoming hints, then anything else that was already
    /// recorded — a set union where earlier listed sources win on key
    /// collision (spec §4.2).
    pub fn merge_hint(
        &mut self,
        tick: Tick,
        new_hints: TickInputs<I>,
        self_player: Option<PlayerId>,
    ) {
        let old_hints = self.hint.remove(&tick).unwrap_or_default();

        let mut merged = TickInputs::new();
        if let Some(self_id) = self_player {
            if let Some(mine) = old_hints.get(&self_id) {
                merged.insert(self_id, mine.clone());
            }
        }
        for (player, input) in new_hints {
            merged.entry(player).or_insert(input);
        }
        for (player, input) in old_hints {
            merged.entry(player).or_insert(input);
        }

        self.hint.insert(tick, merged);
    }

    /// Upserts a single player's hint cell at `tick`, leaving the rest of
    /// the tick's hint map untouched.
    pub fn insert_hint_one(&mut self, tick: Tick, player: PlayerId, input: I) {
        self.hint.entry(tick).or_default().insert(player, input);
    }

    #[must_use]
    pub fn lookup_auth(&self, tick: Tick) -> Option<&TickInputs<I>> {
        self.auth.get(&tick)
    }

    #[must_use]
    pub fn lookup_hint(&self, tick: Tick) -> Option<&TickInputs<I>> {
        self.hint.get(&tick)
    }

    /// The highest tick key present in `AuthInputs` (not necessarily part
    /// of an unbroken prefix — see `MaxAuthTick` in the engine for that).
    #[must_use]
    pub fn max_auth_key(&self) -> Tick {
        *self.auth.keys().next_back().expect("tick 0 is always present")
    }

    /// Ticks strictly between `from` (exclusive) and `max_auth_key()`
    /// (exclusive) for which no authoritative input has arrived yet.
    #[must_use]
    pub fn missing_auth_ticks(&self, from: Tick) -> Vec<Tick> {
        let max_key = self.max_auth_key();
        let mut missing = Vec::new();
        let mut t = from + 1;
        while t < max_key {
            if !self.auth.contains_key(&t) {
                missing.push(t);
            }
            t = t + 1;
        }
        missing
    }
}
