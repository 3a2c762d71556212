use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::ReplicationConfig;
use crate::engine::{ApplyOutcome, ReplicationEngine, Role, hashed_frame_sync_slot};
use crate::error::ReplicationError;
use crate::host::{NetworkContext, ObjectId, TransformHost};

pub const DEFAULT_TICK_RATE: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SlotStrategy {
    /// Slot derived from the object id; stable across sessions.
    #[default]
    Hashed,
    /// Slots handed out in registration order.
    Sequential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub tick_rate: u32,
    pub slot_strategy: SlotStrategy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            slot_strategy: SlotStrategy::default(),
        }
    }
}

/// Handed to entries during dispatch so they can deregister objects,
/// themselves included, without invalidating the loop.
#[derive(Debug, Default)]
pub struct DispatchControl {
    removals: Vec<ObjectId>,
}

impl DispatchControl {
    pub fn deregister(&mut self, object: ObjectId) {
        if !self.removals.contains(&object) {
            self.removals.push(object);
        }
    }

    pub fn is_removed(&self, object: ObjectId) -> bool {
        self.removals.contains(&object)
    }
}

/// Something the dispatcher can drive. `World` is whatever the entries need
/// borrowed while they run, such as a physics scene.
pub trait Replicated {
    type World: ?Sized;

    fn object_id(&self) -> ObjectId;

    /// Entries with a tick parent run immediately after it.
    fn tick_parent(&self) -> Option<ObjectId> {
        None
    }

    fn is_authority(&self) -> bool;

    fn assign_frame_sync_slot(&mut self, slot: i32);

    /// Reconciles the entry's role with the session; called every network
    /// tick before dispatch.
    fn refresh_role(&mut self, _world: &mut Self::World, _net: &dyn NetworkContext) {}

    fn on_network_tick(
        &mut self,
        world: &mut Self::World,
        net: &mut dyn NetworkContext,
        control: &mut DispatchControl,
    );

    fn on_render_step(&mut self, world: &mut Self::World, net: &dyn NetworkContext);

    fn on_receive(
        &mut self,
        world: &mut Self::World,
        payload: &[u8],
        net: &dyn NetworkContext,
    ) -> Result<ApplyOutcome, ReplicationError>;
}

pub struct TickDispatcher<R> {
    config: DispatcherConfig,
    entries: HashMap<ObjectId, R>,
    order: Vec<ObjectId>,
    last_tick: Option<i32>,
    next_sequential_slot: u32,
}

impl<R: Replicated> TickDispatcher<R> {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            order: Vec::new(),
            last_tick: None,
            next_sequential_slot: 0,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, object: ObjectId) -> Option<&R> {
        self.entries.get(&object)
    }

    pub fn get_mut(&mut self, object: ObjectId) -> Option<&mut R> {
        self.entries.get_mut(&object)
    }

    pub fn last_tick(&self) -> Option<i32> {
        self.last_tick
    }

    /// Adds `entry` and assigns its frame-sync slot. An entry already
    /// registered under the same id is replaced and returned.
    pub fn register(&mut self, mut entry: R) -> Option<R> {
        let id = entry.object_id();
        let rate = self.config.tick_rate.max(1);
        let slot = match self.config.slot_strategy {
            SlotStrategy::Hashed => hashed_frame_sync_slot(id, rate),
            SlotStrategy::Sequential => {
                let slot = (self.next_sequential_slot % rate) as i32;
                self.next_sequential_slot = self.next_sequential_slot.wrapping_add(1);
                slot
            }
        };
        entry.assign_frame_sync_slot(slot);
        log::debug!("registered {id:?} with frame-sync slot {slot}");

        let previous = self.entries.insert(id, entry);
        if previous.is_none() {
            self.order.push(id);
        }
        previous
    }

    pub fn deregister(&mut self, object: ObjectId) -> Option<R> {
        let removed = self.entries.remove(&object)?;
        self.order.retain(|id| *id != object);
        log::debug!("deregistered {object:?}");
        Some(removed)
    }

    /// Registration order, with every entry that has a registered tick
    /// parent moved to directly after that parent.
    pub fn dispatch_order(&self) -> Vec<ObjectId> {
        let mut children: HashMap<ObjectId, Vec<ObjectId>> = HashMap::new();
        let mut roots = Vec::new();
        for id in &self.order {
            let parent = self
                .entries
                .get(id)
                .and_then(|entry| entry.tick_parent())
                .filter(|parent| *parent != *id && self.entries.contains_key(parent));
            match parent {
                Some(parent) => children.entry(parent).or_default().push(*id),
                None => roots.push(*id),
            }
        }

        let mut order = Vec::with_capacity(self.order.len());
        let mut stack: Vec<ObjectId> = roots.into_iter().rev().collect();
        visit(&mut stack, &children, &mut order);

        // Entries whose parents form a cycle are never reached from a root.
        for id in &self.order {
            if !order.contains(id) {
                log::warn!("{id:?} is part of a tick parent cycle, running it as a root");
                stack.push(*id);
                visit(&mut stack, &children, &mut order);
            }
        }
        order
    }

    /// Runs every authority entry once. Ticks that are not newer than the
    /// last dispatched tick are skipped. Returns how many entries ran.
    pub fn dispatch_network_tick(
        &mut self,
        world: &mut R::World,
        net: &mut dyn NetworkContext,
    ) -> usize {
        let tick = net.current_tick();
        if self.last_tick.is_some_and(|last| tick <= last) {
            log::trace!("tick {tick} already dispatched, skipping");
            return 0;
        }
        self.last_tick = Some(tick);

        let order = self.dispatch_order();
        let mut control = DispatchControl::default();
        let mut ran = 0;
        for id in order {
            if control.is_removed(id) {
                continue;
            }
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            entry.refresh_role(world, net);
            if entry.is_authority() {
                entry.on_network_tick(world, net, &mut control);
                ran += 1;
            }
        }

        for id in control.removals {
            self.deregister(id);
        }
        ran
    }

    /// Runs every observer entry once per rendered frame.
    pub fn dispatch_render_step(&mut self, world: &mut R::World, net: &dyn NetworkContext) {
        for id in self.dispatch_order() {
            if let Some(entry) = self.entries.get_mut(&id) {
                if !entry.is_authority() {
                    entry.on_render_step(world, net);
                }
            }
        }
    }

    /// Routes a received payload to its entry. Unknown objects are ignored.
    pub fn dispatch_incoming(
        &mut self,
        world: &mut R::World,
        object: ObjectId,
        payload: &[u8],
        net: &dyn NetworkContext,
    ) -> Result<ApplyOutcome, ReplicationError> {
        match self.entries.get_mut(&object) {
            Some(entry) => entry.on_receive(world, payload, net),
            None => {
                log::debug!("update for unregistered {object:?} ignored");
                Ok(ApplyOutcome::Ignored)
            }
        }
    }
}

fn visit(
    stack: &mut Vec<ObjectId>,
    children: &HashMap<ObjectId, Vec<ObjectId>>,
    order: &mut Vec<ObjectId>,
) {
    while let Some(id) = stack.pop() {
        if order.contains(&id) {
            continue;
        }
        order.push(id);
        if let Some(kids) = children.get(&id) {
            stack.extend(kids.iter().rev());
        }
    }
}

/// A [`ReplicationEngine`] bound to the transform it replicates.
#[derive(Debug)]
pub struct ReplicatedTransform<H> {
    pub engine: ReplicationEngine,
    pub host: H,
    tick_parent: Option<ObjectId>,
}

impl<H: TransformHost> ReplicatedTransform<H> {
    pub fn new(
        object_id: ObjectId,
        config: ReplicationConfig,
        host: H,
        net: &dyn NetworkContext,
    ) -> Self {
        let role = if net.is_authority_for(object_id) {
            Role::Authority
        } else {
            Role::Observer
        };
        let engine = ReplicationEngine::new(object_id, role, config, &host, net);
        Self {
            engine,
            host,
            tick_parent: None,
        }
    }

    pub fn with_tick_parent(mut self, parent: ObjectId) -> Self {
        self.tick_parent = Some(parent);
        self
    }
}

impl<H: TransformHost> Replicated for ReplicatedTransform<H> {
    type World = ();

    fn object_id(&self) -> ObjectId {
        self.engine.object_id()
    }

    fn tick_parent(&self) -> Option<ObjectId> {
        self.tick_parent
    }

    fn is_authority(&self) -> bool {
        self.engine.is_authority()
    }

    fn assign_frame_sync_slot(&mut self, slot: i32) {
        self.engine.set_frame_sync_slot(slot);
    }

    fn refresh_role(&mut self, _world: &mut (), net: &dyn NetworkContext) {
        let owns = net.is_authority_for(self.engine.object_id());
        if owns != self.engine.is_authority() {
            let role = if owns { Role::Authority } else { Role::Observer };
            log::debug!("{:?}: ownership changed, now {role:?}", self.engine.object_id());
            self.engine.reinitialize(role, &self.host, net);
        }
    }

    fn on_network_tick(
        &mut self,
        _world: &mut (),
        net: &mut dyn NetworkContext,
        _control: &mut DispatchControl,
    ) {
        self.engine.on_network_tick(&self.host, net);
    }

    fn on_render_step(&mut self, _world: &mut (), net: &dyn NetworkContext) {
        self.engine.on_render_step(&mut self.host, net);
    }

    fn on_receive(
        &mut self,
        _world: &mut (),
        payload: &[u8],
        net: &dyn NetworkContext,
    ) -> Result<ApplyOutcome, ReplicationError> {
        self.engine.apply_incoming(payload, &mut self.host, net)
    }
}
