/*!
# lockstep-engine

The message-driven receive loop (C5), prediction/rollback engine (C7) and
input submission (C8) of the client. Pure logic: no transport, no threads,
no clock reads beyond what the caller hands in as a `Millis` — matching
`nimble_rectify::Rectify`, which coordinates `nimble_assent`/`nimble_seer`
without owning a socket or a thread itself. Outbound protocol effects
(`Ack`, `RequestAuthInput`, `SubmitInput`) are returned as values rather than
sent directly, so the caller (`lockstep-client`) owns the transport.
*/

use lockstep_clock::ClockSync;
use lockstep_input_store::{InputStore, TickInputs};
use lockstep_protocol::Message;
use lockstep_tick::{PlayerId, Tick};
use lockstep_world_cache::WorldCache;
use log::{debug, trace, warn};
use monotonic_time_rs::Millis;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Bundles the application's `World`/`Input` types and the deterministic
/// step function, the way Design Notes §9 asks ("an interface that bundles
/// the serializer, input0, world0, and step") rather than threading four
/// separate generic parameters through every type in this crate.
pub trait Stepper {
    type Input: Clone + Debug + flood_rs::Serialize + flood_rs::Deserialize;
    type World: Clone;

    /// The default input assumed for a player with no recorded input yet.
    fn input0(&self) -> Self::Input;

    /// Advances `prev_world` by one tick given the paired `(prev, next)`
    /// input for every known player, iterated in `PlayerId` order (the
    /// `BTreeMap` iteration order) to satisfy the determinism requirement.
    fn step(
        &self,
        paired_inputs: &BTreeMap<PlayerId, (Self::Input, Self::Input)>,
        tick: Tick,
        prev_world: &Self::World,
    ) -> Self::World;
}

/// Recognized configuration options (spec.md §6).
#[derive(Debug, Copy, Clone)]
pub struct EngineConfig {
    pub tick_rate: u32,
    pub fixed_input_latency_seconds: f64,
    pub max_prediction_ticks: u32,
    pub resync_threshold_ticks: u32,
}

/// Upper bound on a single `RequestAuthInput` message (spec.md §5
/// "Backpressure").
pub const MAX_REQUEST_AUTH_INPUTS: usize = 32;

impl EngineConfig {
    #[must_use]
    pub fn new(tick_rate: u32, fixed_input_latency_seconds: f64) -> Self {
        Self {
            tick_rate,
            fixed_input_latency_seconds,
            max_prediction_ticks: tick_rate / 2,
            resync_threshold_ticks: tick_rate * 3,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(60, 0.0)
    }
}

/// Owns every shared store named in the data model (spec.md §3): the
/// authoritative/hint input store, the authoritative world cache, the
/// clock-sync consumer, and the small scalar bookkeeping fields. A single
/// mutable struct, meant to live behind one mutex in the embedding client
/// (spec.md §9's "reasonable default").
#[derive(Debug)]
pub struct Engine<S: Stepper> {
    stepper: S,
    config: EngineConfig,
    clock: ClockSync,
    input_store: InputStore<S::Input>,
    world_cache: WorldCache<S::World>,
    my_player_id: Option<PlayerId>,
    current_input: S::Input,
    max_auth_tick: Tick,
    last_submitted_tick: Tick,
    last_sampled_auth_world_tick: Tick,
}

impl<S: Stepper> Engine<S> {
    #[must_use]
    pub fn new(stepper: S, world0: S::World, config: EngineConfig) -> Self {
        let current_input = stepper.input0();
        Self {
            clock: ClockSync::new(config.tick_rate),
            input_store: InputStore::new(),
            world_cache: WorldCache::new(world0),
            my_player_id: None,
            current_input,
            max_auth_tick: Tick::new(0),
            last_submitted_tick: Tick::new(0),
            last_sampled_auth_world_tick: Tick::new(0),
            stepper,
            config,
        }
    }

    #[must_use]
    pub fn player_id(&self) -> Option<PlayerId> {
        self.my_player_id
    }

    #[must_use]
    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }

    /// Dispatches a single inbound message (C5, spec.md §4.5), mutating the
    /// stores and returning any protocol messages the caller should send in
    /// response. `now` is the client's monotonic clock reading at receipt.
    pub fn handle_message(&mut self, now: Millis, message: Message<S::Input>) -> Vec<Message<S::Input>> {
        match message {
            Message::Connected(player_id) => {
                self.on_connected(player_id);
                Vec::new()
            }
            Message::HeartbeatResponse(client_send, server_recv) => {
                self.clock.record(
                    Millis::new(client_send.0),
                    Millis::new(server_recv.0),
                    now,
                );
                Vec::new()
            }
            Message::AuthInput {
                head_tick,
                auth,
                hints,
            } => self.on_auth_input(head_tick, auth, hints),
            Message::HintInput(tick, player_id, input) => {
                self.input_store.insert_hint_one(tick, player_id, input);
                Vec::new()
            }
            other @ (Message::Connect(_)
            | Message::SubmitInput(_, _)
            | Message::Ack(_)
            | Message::RequestAuthInput(_)
            | Message::Heartbeat(_)) => {
                warn!("dropping client-illegal inbound message {other:?}");
                Vec::new()
            }
        }
    }

    fn on_connected(&mut self, player_id: PlayerId) {
        if self.my_player_id.is_some() {
            warn!("ignoring duplicate Connected({player_id})");
            return;
        }
        debug!("connected as {player_id}");
        self.my_player_id = Some(player_id);
    }

    fn on_auth_input(
        &mut self,
        head_tick: Tick,
        auth: Vec<TickInputs<S::Input>>,
        hints: Vec<TickInputs<S::Input>>,
    ) -> Vec<Message<S::Input>> {
        let mut outbound = Vec::new();
        if auth.is_empty() {
            return outbound;
        }
        let newest_tick = head_tick + (auth.len() as i64 - 1);

        if head_tick <= self.max_auth_tick + 1 && self.max_auth_tick < newest_tick {
            self.max_auth_tick = newest_tick;
            outbound.push(Message::Ack(self.max_auth_tick));
        }

        for (offset, inner) in auth.into_iter().enumerate() {
            let tick = head_tick + offset as i64;
            if let Err(err) = self.input_store.insert_auth(tick, inner) {
                warn!("{err}");
            }
        }

        let hint_start = newest_tick + 1;
        for (offset, inner) in hints.into_iter().enumerate() {
            let tick = hint_start + offset as i64;
            self.input_store.merge_hint(tick, inner, self.my_player_id);
        }

        let mut missing = self
            .input_store
            .missing_auth_ticks(self.world_cache.max_key());
        missing.truncate(MAX_REQUEST_AUTH_INPUTS);
        if !missing.is_empty() {
            outbound.push(Message::RequestAuthInput(missing));
        }

        outbound
    }

    /// `sample'`: new authoritative worlds since the last call, plus the
    /// predicted world at the current target tick (spec.md §4.7, §6).
    pub fn sample_detailed(&mut self, now: Millis) -> (Vec<S::World>, S::World) {
        let target = self.clock.estimate_target_tick(now, 0.0);
        let (start_tick, start_world) = self.world_cache.floor_entry(target);

        if target <= start_tick {
            return (Vec::new(), start_world.clone());
        }

        let start_inputs = self
            .input_store
            .lookup_auth(start_tick)
            .expect("world cache floor tick always has matching auth inputs")
            .clone();

        let prediction_allowance: u32 =
            if (target - self.max_auth_tick) > self.config.resync_threshold_ticks as i64 {
                0
            } else {
                self.config.max_prediction_ticks
            };

        let mut tick = start_tick;
        let mut current_inputs = start_inputs;
        let mut world = start_world.clone();
        let mut is_auth_path = true;
        let mut allowance = prediction_allowance;

        while tick < target {
            let next_tick = tick + 1;
            let auth_next = self.input_store.lookup_auth(next_tick).cloned();
            is_auth_path = is_auth_path && auth_next.is_some();

            if !is_auth_path && allowance == 0 {
                trace!("prediction allowance exhausted at {tick}, stopping");
                break;
            }

            let next_inputs = match &auth_next {
                Some(auth) => auth.clone(),
                None => {
                    let hints = self
                        .input_store
                        .lookup_hint(next_tick)
                        .cloned()
                        .unwrap_or_default();
                    carry_forward(&current_inputs, &hints, &self.stepper)
                }
            };

            let paired = pair_inputs(&current_inputs, &next_inputs, &self.stepper);
            world = self.stepper.step(&paired, next_tick, &world);

            if is_auth_path {
                self.world_cache.insert_derived(next_tick, world.clone());
            } else {
                allowance -= 1;
            }

            tick = next_tick;
            current_inputs = next_inputs;
        }

        let new_worlds: Vec<S::World> = self
            .world_cache
            .worlds_after(self.last_sampled_auth_world_tick)
            .into_iter()
            .map(|(_, w)| w)
            .collect();
        self.last_sampled_auth_world_tick = self.world_cache.max_key();

        (new_worlds, world)
    }

    /// Convenience form returning only the predicted world (spec.md §6
    /// `sample()`).
    pub fn sample(&mut self, now: Millis) -> S::World {
        self.sample_detailed(now).1
    }

    /// Accepts local input (C8, spec.md §4.8). Returns the `SubmitInput`
    /// message to transmit, if this call produced a new submission.
    pub fn set_input(&mut self, now: Millis, new_input: S::Input) -> Option<Message<S::Input>> {
        let target = self
            .clock
            .estimate_target_tick(now, self.config.fixed_input_latency_seconds);
        self.current_input = new_input.clone();

        if target > self.last_submitted_tick {
            self.last_submitted_tick = target;
            if let Some(player_id) = self.my_player_id {
                self.input_store
                    .insert_hint_one(target, player_id, new_input.clone());
            }
            return Some(Message::SubmitInput(target, new_input));
        }
        None
    }
}

/// Builds the next tick's input map: authoritative/hint entries win where
/// present, everyone else carries forward their previous input, falling
/// back to `input0` only for a player who has truly never had an input
/// (Design Notes §9 "Carry-forward for absent players").
fn carry_forward<S: Stepper>(
    prev_inputs: &TickInputs<S::Input>,
    hints: &TickInputs<S::Input>,
    stepper: &S,
) -> TickInputs<S::Input> {
    let mut next = TickInputs::new();
    for player in prev_inputs.keys().chain(hints.keys()) {
        if next.contains_key(player) {
            continue;
        }
        let value = hints
            .get(player)
            .or_else(|| prev_inputs.get(player))
            .cloned()
            .unwrap_or_else(|| stepper.input0());
        next.insert(*player, value);
    }
    next
}

fn pair_inputs<S: Stepper>(
    prev_inputs: &TickInputs<S::Input>,
    next_inputs: &TickInputs<S::Input>,
    stepper: &S,
) -> BTreeMap<PlayerId, (S::Input, S::Input)> {
    let mut paired = BTreeMap::new();
    for player in prev_inputs.keys().chain(next_inputs.keys()) {
        if paired.contains_key(player) {
            continue;
        }
        let prev = prev_inputs
            .get(player)
            .cloned()
            .unwrap_or_else(|| stepper.input0());
        let next = next_inputs
            .get(player)
            .cloned()
            .unwrap_or_else(|| stepper.input0());
        paired.insert(*player, (prev, next));
    }
    paired
}
