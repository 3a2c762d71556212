//! In-process transport for tests and the simulator: a session context that
//! collects outgoing payloads, and a seeded link that delivers them with
//! configurable loss and latency measured in ticks.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::envelope::{Envelope, EnvelopeError};
use crate::host::{ClientId, Delivery, NetworkContext, ObjectId, Target};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub object: ObjectId,
    pub tick: i32,
    pub payload: Vec<u8>,
    pub delivery: Delivery,
    pub target: Target,
}

/// A [`NetworkContext`] backed by local state.
#[derive(Debug, Clone)]
pub struct LocalSession {
    tick: i32,
    tick_rate: u32,
    time: f64,
    owned: HashSet<ObjectId>,
    outbox: Vec<Outgoing>,
}

impl LocalSession {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick: 0,
            tick_rate: tick_rate.max(1),
            time: 0.0,
            owned: HashSet::new(),
            outbox: Vec::new(),
        }
    }

    /// Moves to `tick` and puts the clock exactly on it.
    pub fn set_tick(&mut self, tick: i32) {
        self.tick = tick;
        self.time = tick as f64 / self.tick_rate as f64;
    }

    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    pub fn grant_authority(&mut self, object: ObjectId) {
        self.owned.insert(object);
    }

    pub fn revoke_authority(&mut self, object: ObjectId) {
        self.owned.remove(&object);
    }

    pub fn take_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }
}

impl NetworkContext for LocalSession {
    fn current_tick(&self) -> i32 {
        self.tick
    }

    fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    fn server_time(&self) -> f64 {
        self.time
    }

    fn is_authority_for(&self, object: ObjectId) -> bool {
        self.owned.contains(&object)
    }

    fn send(&mut self, object: ObjectId, payload: &[u8], delivery: Delivery, target: Target) {
        self.outbox.push(Outgoing {
            object,
            tick: self.tick,
            payload: payload.to_vec(),
            delivery,
            target,
        });
    }
}

/// Deterministic splitmix64 generator.
#[derive(Debug, Clone)]
pub struct LinkRng(u64);

impl LinkRng {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform in `[0, 1)`.
    pub fn next_unit(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConditions {
    pub enabled: bool,
    /// Applies to unreliable frames only.
    pub loss_percent: f32,
    pub min_latency_ticks: u32,
    pub max_latency_ticks: u32,
    pub jitter_ticks: u32,
}

impl LinkConditions {
    pub fn should_drop(&self, rng: &mut LinkRng) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rng.next_unit() * 100.0 < self.loss_percent
    }

    pub fn delay_ticks(&self, rng: &mut LinkRng) -> u32 {
        if !self.enabled || self.max_latency_ticks == 0 {
            return 0;
        }
        let base = self.min_latency_ticks;
        let range = self.max_latency_ticks.saturating_sub(self.min_latency_ticks);
        let jitter = if self.jitter_ticks > 0 {
            (rng.next_unit() * (self.jitter_ticks + 1) as f32) as u32
        } else {
            0
        };
        base + (rng.next_unit() * (range + 1) as f32) as u32 + jitter
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub frames_delivered: u64,
    pub bytes_sent: u64,
    pub corrupt_frames: u64,
}

#[derive(Debug)]
struct InFlight {
    release_tick: i32,
    sequence: u64,
    bytes: Vec<u8>,
}

impl PartialEq for InFlight {
    fn eq(&self, other: &Self) -> bool {
        (self.release_tick, self.sequence) == (other.release_tick, other.sequence)
    }
}

impl Eq for InFlight {}

impl PartialOrd for InFlight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InFlight {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        (other.release_tick, other.sequence).cmp(&(self.release_tick, self.sequence))
    }
}

/// One authority fanning out to any number of observers. Reliable frames
/// are never dropped and arrive in send order; unreliable frames can be
/// lost, delayed and reordered.
#[derive(Debug)]
pub struct LoopbackLink {
    conditions: LinkConditions,
    rng: LinkRng,
    queues: HashMap<ClientId, BinaryHeap<InFlight>>,
    reliable_horizon: HashMap<ClientId, i32>,
    next_sequence: u64,
    stats: LinkStats,
}

impl LoopbackLink {
    pub fn new(conditions: LinkConditions, seed: u64) -> Self {
        Self {
            conditions,
            rng: LinkRng::new(seed),
            queues: HashMap::new(),
            reliable_horizon: HashMap::new(),
            next_sequence: 0,
            stats: LinkStats::default(),
        }
    }

    pub fn conditions(&self) -> &LinkConditions {
        &self.conditions
    }

    pub fn set_conditions(&mut self, conditions: LinkConditions) {
        self.conditions = conditions;
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn connect(&mut self, client: ClientId) {
        self.queues.entry(client).or_default();
    }

    pub fn disconnect(&mut self, client: ClientId) {
        self.queues.remove(&client);
        self.reliable_horizon.remove(&client);
    }

    pub fn clients(&self) -> Vec<ClientId> {
        let mut clients: Vec<_> = self.queues.keys().copied().collect();
        clients.sort_unstable();
        clients
    }

    pub fn in_flight(&self, client: ClientId) -> usize {
        self.queues.get(&client).map_or(0, BinaryHeap::len)
    }

    /// Frames `outgoing` and queues a copy for every addressed client.
    /// Returns how many copies survived loss.
    pub fn transmit(&mut self, outgoing: &Outgoing, now: i32) -> Result<usize, EnvelopeError> {
        let envelope = Envelope::new(
            outgoing.object,
            outgoing.tick,
            outgoing.delivery,
            outgoing.payload.clone(),
        );
        let bytes = envelope.serialize()?;

        let targets = match outgoing.target {
            Target::AllObservers => self.clients(),
            Target::Client(client) if self.queues.contains_key(&client) => vec![client],
            Target::Client(client) => {
                log::debug!("dropping frame for unknown client {client}");
                Vec::new()
            }
        };

        let mut queued = 0;
        for client in targets {
            self.stats.frames_sent += 1;
            self.stats.bytes_sent += bytes.len() as u64;

            let reliable = outgoing.delivery == Delivery::Reliable;
            if !reliable && self.conditions.should_drop(&mut self.rng) {
                self.stats.frames_dropped += 1;
                continue;
            }

            let mut release_tick = now.saturating_add(self.conditions.delay_ticks(&mut self.rng) as i32);
            if reliable {
                let horizon = self.reliable_horizon.entry(client).or_insert(release_tick);
                release_tick = release_tick.max(*horizon);
                *horizon = release_tick;
            }

            let sequence = self.next_sequence;
            self.next_sequence += 1;
            if let Some(queue) = self.queues.get_mut(&client) {
                queue.push(InFlight {
                    release_tick,
                    sequence,
                    bytes: bytes.clone(),
                });
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Frames for `client` whose release tick has been reached.
    pub fn deliver(&mut self, client: ClientId, now: i32) -> Vec<Envelope> {
        let Some(queue) = self.queues.get_mut(&client) else {
            return Vec::new();
        };

        let mut ready = Vec::new();
        while queue.peek().is_some_and(|frame| frame.release_tick <= now) {
            let Some(frame) = queue.pop() else {
                break;
            };
            match Envelope::deserialize(&frame.bytes) {
                Ok(envelope) => {
                    self.stats.frames_delivered += 1;
                    ready.push(envelope);
                }
                Err(err) => {
                    self.stats.corrupt_frames += 1;
                    log::warn!("discarding frame for client {client}: {err}");
                }
            }
        }
        ready
    }
}
