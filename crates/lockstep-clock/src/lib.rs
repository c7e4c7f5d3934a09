/*!
# lockstep-clock

Client-side consumer of round-trip clock samples (spec component C4). Keeps
a rolling estimate of one-way latency and clock offset from `Heartbeat` /
`HeartbeatResponse` round trips, and turns that estimate into the tick the
client should currently be targeting.

The exact estimator formula and jitter-buffer sizing are a specification of
their own (spec.md §9, Open Question); this is a straightforward, honest
implementation of the documented contract (`record`, `estimate_target_tick`,
`analytics`) rather than a guess at an unspecified external formula.
*/

use lockstep_tick::Tick;
use metricator::AggregateMetric;
use monotonic_time_rs::Millis;
use std::collections::VecDeque;

/// Minimum number of round-trip samples before `analytics()` reports
/// anything; matches spec.md §4.4 ("absent until enough samples collected").
const MIN_SAMPLES_FOR_ANALYTICS: usize = 3;

/// Extra milliseconds of safety margin added on top of the measured
/// one-way latency, to absorb jitter between samples.
const JITTER_BUFFER_MILLIS: i64 = 20;

const LATENCY_WINDOW: u8 = 16;
const CLOCK_ERROR_WINDOW: usize = 16;

/// A rolling average of signed millisecond offsets. `metricator`'s
/// `AggregateMetric` is used for the (always non-negative) one-way latency
/// samples below; clock offset can be negative (the server clock can run
/// either ahead or behind), so it is tracked with this small ring buffer
/// instead of being forced through an unsigned aggregate.
#[derive(Debug)]
struct SignedRollingAverage {
    samples: VecDeque<i64>,
    capacity: usize,
}

impl SignedRollingAverage {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn add(&mut self, value: i64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: i64 = self.samples.iter().sum();
        Some(sum as f64 / self.samples.len() as f64)
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Consumes round-trip timing samples and estimates the tick the client
/// should currently be targeting.
#[derive(Debug)]
pub struct ClockSync {
    tick_rate: u32,
    one_way_latency_millis: AggregateMetric<u16>,
    clock_offset_millis: SignedRollingAverage,
    last_server_recv: Option<Millis>,
    last_client_recv: Option<Millis>,
}

impl ClockSync {
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick_rate,
            one_way_latency_millis: AggregateMetric::<u16>::new(LATENCY_WINDOW)
                .expect("window size is a valid threshold"),
            clock_offset_millis: SignedRollingAverage::new(CLOCK_ERROR_WINDOW),
            last_server_recv: None,
            last_client_recv: None,
        }
    }

    /// Records a heartbeat round trip: `client_send` is when we sent the
    /// `Heartbeat`, `server_recv` is the server's clock when it received
    /// it, `client_recv` is our clock now, upon receiving the
    /// `HeartbeatResponse`.
    pub fn record(&mut self, client_send: Millis, server_recv: Millis, client_recv: Millis) {
        let rtt_millis = client_recv
            .checked_duration_since_ms(client_send)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
            .max(0);
        let one_way_millis = rtt_millis / 2;

        self.one_way_latency_millis.add(one_way_millis as u16);

        // Assumes the server's processing time is negligible, so its
        // "send" time is approximated by its receive time.
        let offset_millis = server_recv.absolute_milliseconds() as i64
            - client_send.absolute_milliseconds() as i64
            - one_way_millis;
        self.clock_offset_millis.add(offset_millis);

        self.last_server_recv = Some(server_recv);
        self.last_client_recv = Some(client_recv);
    }

    /// The tick the client should be targeting right now: the server's
    /// estimated current tick, advanced by the estimated one-way latency
    /// plus a jitter buffer, plus `extra_latency_seconds` of additional
    /// slack (used by input submission to schedule local input slightly
    /// ahead, spec.md §4.4).
    #[must_use]
    pub fn estimate_target_tick(&self, now: Millis, extra_latency_seconds: f64) -> Tick {
        let (Some(last_server_recv), Some(last_client_recv)) =
            (self.last_server_recv, self.last_client_recv)
        else {
            return Tick::new(0);
        };

        let offset_millis = self.clock_offset_millis.average().unwrap_or(0.0);
        let elapsed_since_sample = now
            .checked_duration_since_ms(last_client_recv)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let estimated_server_now_millis = last_server_recv.absolute_milliseconds() as i64
            + offset_millis as i64
            + elapsed_since_sample;

        let one_way_millis = self
            .one_way_latency_millis
            .values()
            .map(|mma| mma.avg as i64)
            .unwrap_or(0);

        let extra_millis = (extra_latency_seconds * 1000.0) as i64;

        let target_millis =
            estimated_server_now_millis + one_way_millis + JITTER_BUFFER_MILLIS + extra_millis;

        let target_tick_count = (target_millis * self.tick_rate as i64) / 1000;
        Tick::new(target_tick_count.max(0))
    }

    /// `(ping_seconds, clock_error_seconds)`, or `None` until enough
    /// samples have been collected (spec.md §4.4).
    #[must_use]
    pub fn analytics(&self) -> Option<(f64, f64)> {
        if self.one_way_latency_millis.values().is_none()
            || self.clock_offset_millis.len() < MIN_SAMPLES_FOR_ANALYTICS
        {
            return None;
        }
        let ping_seconds = self
            .one_way_latency_millis
            .values()
            .map(|mma| mma.avg as f64 / 1000.0)?;
        let clock_error_seconds = self.clock_offset_millis.average()? / 1000.0;
        Some((ping_seconds, clock_error_seconds))
    }

    #[must_use]
    pub fn has_samples(&self) -> bool {
        self.last_server_recv.is_some()
    }
}
