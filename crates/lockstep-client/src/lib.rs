/*!
# lockstep-client 🕹

**lockstep-client** wires the generic [`lockstep_engine::Engine`] to a
transport and a clock, and exposes the application-facing [`Client`]
handle: connect, spawn the receive loop and heartbeat loop as background
threads, block until the server assigns a player id, then hand back a
handle that can sample predicted worlds and submit local input (spec.md
§4.9, §5, §9).

Unlike `nimble_client::Client`, which is polled synchronously by an
embedding game loop (`update(now)` called once per frame), this crate owns
its own OS threads: the spec calls for a background receive loop and
heartbeat loop running concurrently with foreground `sample`/`set_input`
calls (spec.md §5 "Background tasks... ensure clean shutdown on `Client`
drop"), so the threads are spawned here rather than left to the caller.
*/

pub mod prelude;

use flood_rs::{Deserialize, Serialize};
use lockstep_engine::{Engine, EngineConfig, Stepper};
use lockstep_protocol::{Message, WireTimestamp};
use lockstep_tick::PlayerId;
use log::{info, warn};
use monotonic_time_rs::MonotonicClock;
use std::env;
use std::fmt::Debug;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// The transport is an external collaborator (spec.md §1): opaque,
/// non-blocking, best-effort send/receive of byte payloads. No concrete
/// network implementation ships here; tests use an in-memory fake, the
/// role `hazy-transport` plays for `nimble-client`'s tests.
pub trait Transport: Send {
    fn send(&mut self, payload: &[u8]);
    fn try_recv(&mut self) -> Option<Vec<u8>>;
}

const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(5);
const HEARTBEAT_INTERVAL_CONNECTING: Duration = Duration::from_millis(50);
const HEARTBEAT_INTERVAL_CONNECTED: Duration = Duration::from_millis(500);
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(1);

fn encode<I>(message: &Message<I>) -> Vec<u8>
where
    I: Clone + Debug + flood_rs::Serialize + flood_rs::Deserialize,
{
    let mut out = flood_rs::prelude::OutOctetStream::new();
    message
        .serialize(&mut out)
        .expect("serializing to an in-memory buffer never fails");
    out.octets_ref().to_vec()
}

fn decode<I>(payload: &[u8]) -> io::Result<Message<I>>
where
    I: Clone + Debug + flood_rs::Serialize + flood_rs::Deserialize,
{
    let mut in_stream = flood_rs::prelude::InOctetStream::new(payload);
    Message::<I>::deserialize(&mut in_stream)
}

fn send_all<I>(transport: &Mutex<dyn Transport>, messages: Vec<Message<I>>)
where
    I: Clone + Debug + flood_rs::Serialize + flood_rs::Deserialize,
{
    if messages.is_empty() {
        return;
    }
    let mut transport = transport.lock().expect("transport mutex poisoned");
    for message in messages {
        transport.send(&encode(&message));
    }
}

/// The application-facing handle (C9, spec.md §6 "Client API"). Background
/// threads run for as long as this handle is alive; dropping it signals
/// shutdown and joins them.
pub struct Client<S>
where
    S: Stepper + Send + 'static,
    S::Input: Send,
    S::World: Send,
{
    engine: Arc<Mutex<Engine<S>>>,
    transport: Arc<Mutex<dyn Transport>>,
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    clock: Arc<dyn MonotonicClock + Send + Sync>,
}

impl<S> Client<S>
where
    S: Stepper + Send + 'static,
    S::Input: Send,
    S::World: Send,
{
    /// Creates the stores, spawns the receive loop and heartbeat loop, and
    /// blocks the calling thread until the server has assigned a player id
    /// (spec.md §4.9 "Start order... block until connected").
    pub fn connect<T, C>(stepper: S, world0: S::World, config: EngineConfig, transport: T, clock: C) -> Self
    where
        T: Transport + 'static,
        C: MonotonicClock + Send + Sync + 'static,
    {
        let engine = Arc::new(Mutex::new(Engine::new(stepper, world0, config)));
        let transport: Arc<Mutex<dyn Transport>> = Arc::new(Mutex::new(transport));
        let clock: Arc<dyn MonotonicClock + Send + Sync> = Arc::new(clock);
        let shutdown = Arc::new(AtomicBool::new(false));

        let receive_handle = spawn_receive_loop(
            Arc::clone(&engine),
            Arc::clone(&transport),
            Arc::clone(&clock),
            Arc::clone(&shutdown),
        );
        let heartbeat_handle = spawn_heartbeat_loop(
            Arc::clone(&engine),
            Arc::clone(&transport),
            Arc::clone(&clock),
            Arc::clone(&shutdown),
        );

        let mut threads = vec![receive_handle, heartbeat_handle];
        if let Some(telemetry_handle) =
            spawn_telemetry_loop(Arc::clone(&engine), Arc::clone(&shutdown))
        {
            threads.push(telemetry_handle);
        }

        while engine
            .lock()
            .expect("engine mutex poisoned")
            .player_id()
            .is_none()
        {
            thread::sleep(CONNECT_POLL_INTERVAL);
        }

        Self {
            engine,
            transport,
            shutdown,
            threads,
            clock,
        }
    }

    #[must_use]
    pub fn player_id(&self) -> PlayerId {
        self.engine
            .lock()
            .expect("engine mutex poisoned")
            .player_id()
            .expect("Client is only constructed after a player id is assigned")
    }

    /// `sample'`: new authoritative worlds since the last call, plus the
    /// predicted world at the current target tick (spec.md §6).
    pub fn sample_detailed(&self) -> (Vec<S::World>, S::World) {
        let now = self.clock.now();
        self.engine
            .lock()
            .expect("engine mutex poisoned")
            .sample_detailed(now)
    }

    /// Convenience form returning only the predicted world.
    pub fn sample(&self) -> S::World {
        self.sample_detailed().1
    }

    /// Accepts local input and immediately makes it visible to the next
    /// `sample` call as a hint for the self player (spec.md §4.8, §8 S6).
    pub fn set_input(&self, new_input: S::Input) {
        let now = self.clock.now();
        let outbound = self
            .engine
            .lock()
            .expect("engine mutex poisoned")
            .set_input(now, new_input);
        if let Some(message) = outbound {
            send_all(&self.transport, vec![message]);
        }
    }
}

impl<S> Drop for Client<S>
where
    S: Stepper + Send + 'static,
    S::Input: Send,
    S::World: Send,
{
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

fn spawn_receive_loop<S>(
    engine: Arc<Mutex<Engine<S>>>,
    transport: Arc<Mutex<dyn Transport>>,
    clock: Arc<dyn MonotonicClock + Send + Sync>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    S: Stepper + Send + 'static,
    S::Input: Send,
    S::World: Send,
{
    thread::spawn(move || {
        while !shutdown.load(Ordering::Relaxed) {
            let payload = transport
                .lock()
                .expect("transport mutex poisoned")
                .try_recv();
            match payload {
                Some(bytes) => match decode::<S::Input>(&bytes) {
                    Ok(message) => {
                        let outbound = engine
                            .lock()
                            .expect("engine mutex poisoned")
                            .handle_message(clock.now(), message);
                        send_all(&transport, outbound);
                    }
                    Err(err) => warn!("dropping malformed datagram: {err}"),
                },
                None => thread::sleep(RECEIVE_POLL_INTERVAL),
            }
        }
    })
}

fn spawn_heartbeat_loop<S>(
    engine: Arc<Mutex<Engine<S>>>,
    transport: Arc<Mutex<dyn Transport>>,
    clock: Arc<dyn MonotonicClock + Send + Sync>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    S: Stepper + Send + 'static,
    S::Input: Send,
    S::World: Send,
{
    thread::spawn(move || {
        while !shutdown.load(Ordering::Relaxed) {
            let now = clock.now();
            let (connected, has_analytics) = {
                let guard = engine.lock().expect("engine mutex poisoned");
                (guard.player_id().is_some(), guard.clock().analytics().is_some())
            };

            let message = if connected {
                Message::Heartbeat(WireTimestamp(now.absolute_milliseconds()))
            } else {
                Message::Connect(WireTimestamp(now.absolute_milliseconds()))
            };
            send_all::<S::Input>(&transport, vec![message]);

            let interval = if has_analytics {
                HEARTBEAT_INTERVAL_CONNECTED
            } else {
                HEARTBEAT_INTERVAL_CONNECTING
            };
            thread::sleep(interval);
        }
    })
}

/// Optional telemetry loop (spec.md §6 "an optional telemetry endpoint...
/// may be read from an environment variable"). `LOCKSTEP_TELEMETRY_ADDR`
/// is read once at connect time; its value only gates whether telemetry
/// logging runs, since no wire protocol to a collector is specified.
fn spawn_telemetry_loop<S>(
    engine: Arc<Mutex<Engine<S>>>,
    shutdown: Arc<AtomicBool>,
) -> Option<JoinHandle<()>>
where
    S: Stepper + Send + 'static,
    S::Input: Send,
    S::World: Send,
{
    let addr = env::var("LOCKSTEP_TELEMETRY_ADDR").ok()?;
    info!("telemetry enabled, reporting analytics for {addr}");
    Some(thread::spawn(move || {
        while !shutdown.load(Ordering::Relaxed) {
            if let Some((ping_seconds, clock_error_seconds)) =
                engine.lock().expect("engine mutex poisoned").clock().analytics()
            {
                info!("telemetry: ping={ping_seconds:.3}s clock_error={clock_error_seconds:.3}s");
            }
            thread::sleep(HEARTBEAT_INTERVAL_CONNECTED);
        }
    }))
}
