/*!
# lockstep-world-cache

Tick-indexed authoritative world snapshot cache (spec component C3). Grows
monotonically: entries are never mutated or removed once inserted, and
`0` is always present so [`WorldCache::floor_entry`] can never fail.
*/

use lockstep_tick::Tick;
use log::trace;
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct WorldCache<W: Clone> {
    worlds: BTreeMap<Tick, W>,
}

impl<W: Clone> WorldCache<W> {
    #[must_use]
    pub fn new(world0: W) -> Self {
        let mut worlds = BTreeMap::new();
        worlds.insert(Tick::new(0), world0);
        Self { worlds }
    }

    #[must_use]
    pub fn get(&self, tick: Tick) -> Option<&W> {
        self.worlds.get(&tick)
    }

    /// The entry at the largest key `<= tick`. Always succeeds because
    /// tick `0` is seeded at construction and worlds are never removed.
    #[must_use]
    pub fn floor_entry(&self, tick: Tick) -> (Tick, &W) {
        self.worlds
            .range(..=tick)
            .next_back()
            .map(|(t, w)| (*t, w))
            .expect("tick 0 world is always present")
    }

    /// The highest tick present in the cache.
    #[must_use]
    pub fn max_key(&self) -> Tick {
        *self.worlds.keys().next_back().expect("tick 0 is always present")
    }

    /// Inserts a derived world at `tick`. Idempotent: re-inserting at an
    /// existing tick is a no-op (determinism guarantees it would be the
    /// same world anyway).
    pub fn insert_derived(&mut self, tick: Tick, world: W) {
        if self.worlds.contains_key(&tick) {
            trace!("world at {tick} already cached, skipping re-insert");
            return;
        }
        self.worlds.insert(tick, world);
    }

    /// Worlds for every tick strictly greater than `since`, in increasing
    /// tick order, used to report newly-derived authoritative worlds to a
    /// sampling caller.
    #[must_use]
    pub fn worlds_after(&self, since: Tick) -> Vec<(Tick, W)> {
        self.worlds
            .range((
                std::ops::Bound::Excluded(since),
                std::ops::Bound::Unbounded,
            ))
            .map(|(t, w)| (*t, w.clone()))
            .collect()
    }
}
