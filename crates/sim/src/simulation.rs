use anyhow::{Context, Result};
use glam::Vec3;
use transync::link::LinkRng;
use transync::{
    ClientId, DispatcherConfig, FixedTimestep, LinkStats, LocalSession, LoopbackLink, ObjectId,
    PhysicsReplica, PhysicsScene, ReplicationStats, TickDispatcher,
};

use crate::config::SimConfig;

const AUTHORITY: ClientId = 0;

struct Observer {
    client: ClientId,
    net: LocalSession,
    scene: PhysicsScene,
    dispatcher: TickDispatcher<PhysicsReplica>,
    rejected: u64,
}

#[derive(Debug, Default)]
pub struct Report {
    pub ticks: i32,
    pub frames: u64,
    pub authority: ReplicationStats,
    pub link: LinkStats,
    pub rejected_updates: u64,
    /// Mean distance between authority and observer bodies at the end.
    pub mean_error: f32,
    pub max_error: f32,
}

pub struct Simulation {
    config: SimConfig,
    timestep: FixedTimestep,
    net: LocalSession,
    scene: PhysicsScene,
    dispatcher: TickDispatcher<PhysicsReplica>,
    objects: Vec<ObjectId>,
    link: LoopbackLink,
    observers: Vec<Observer>,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Result<Self> {
        let mut net = LocalSession::new(config.tick_rate);
        let mut scene = PhysicsScene::new(config.tick_rate);
        scene.add_ground(0.0, 100.0);

        let mut dispatcher = TickDispatcher::new(dispatcher_config(&config));
        let mut rng = LinkRng::new(config.seed);
        let mut objects = Vec::new();
        for i in 0..config.objects {
            let id = ObjectId(u64::from(i) + 1);
            let position = Vec3::new(i as f32 * 2.0 - config.objects as f32, 3.0 + (i % 3) as f32, 0.0);
            let handle = if i % 2 == 0 {
                scene.add_dynamic_sphere(position, 0.5, 1.0)
            } else {
                scene.add_dynamic_box(position, Vec3::splat(0.5), 2.0)
            };
            let velocity = Vec3::new(
                rng.next_unit() * 8.0 - 4.0,
                rng.next_unit() * 6.0,
                rng.next_unit() * 8.0 - 4.0,
            );
            scene.set_body_velocity(handle, velocity);
            scene.set_body_angular_velocity(handle, Vec3::new(0.0, rng.next_unit() * 6.0, 0.0));

            net.grant_authority(id);
            let replica = PhysicsReplica::new(id, config.replication.clone(), &mut scene, handle, &net)
                .context("authority body missing right after spawn")?;
            dispatcher.register(replica);
            objects.push(id);
        }

        let link = LoopbackLink::new(config.link.clone(), config.seed);
        let mut sim = Self {
            timestep: FixedTimestep::new(config.tick_rate),
            config,
            net,
            scene,
            dispatcher,
            objects,
            link,
            observers: Vec::new(),
        };
        for client in 1..=sim.config.observers {
            sim.add_observer(client)?;
        }
        Ok(sim)
    }

    fn add_observer(&mut self, client: ClientId) -> Result<()> {
        let mut net = LocalSession::new(self.config.tick_rate);
        net.set_tick(self.timestep.tick());
        let mut scene = PhysicsScene::new(self.config.tick_rate);
        let mut dispatcher = TickDispatcher::new(dispatcher_config(&self.config));
        for &id in &self.objects {
            let handle = scene.add_dynamic_sphere(Vec3::ZERO, 0.5, 1.0);
            let replica =
                PhysicsReplica::new(id, self.config.replication.clone(), &mut scene, handle, &net)
                    .context("observer body missing right after spawn")?;
            dispatcher.register(replica);
        }
        self.link.connect(client);
        self.observers.push(Observer {
            client,
            net,
            scene,
            dispatcher,
            rejected: 0,
        });
        log::info!("observer {client} joined at tick {}", self.timestep.tick());
        Ok(())
    }

    fn join_late(&mut self) -> Result<()> {
        let client = self.observers.len() as ClientId + 1;
        self.add_observer(client)?;
        for &id in &self.objects {
            if let Some(replica) = self.dispatcher.get_mut(id) {
                replica.synchronize_observer(&mut self.scene, &mut self.net, client);
            }
        }
        Ok(())
    }

    fn network_tick(&mut self, tick: i32) -> Result<()> {
        self.net.set_tick(tick);
        self.scene.step();
        self.dispatcher
            .dispatch_network_tick(&mut self.scene, &mut self.net);
        if self.config.late_join_tick == Some(tick) {
            self.join_late()?;
        }

        for out in self.net.take_outbox() {
            self.link.transmit(&out, tick)?;
        }

        for observer in &mut self.observers {
            observer.net.set_tick(tick);
            observer.scene.step();
            observer
                .dispatcher
                .dispatch_network_tick(&mut observer.scene, &mut observer.net);
            for envelope in self.link.deliver(observer.client, tick) {
                if let Err(err) = observer.dispatcher.dispatch_incoming(
                    &mut observer.scene,
                    envelope.object(),
                    &envelope.payload,
                    &observer.net,
                ) {
                    observer.rejected += 1;
                    log::warn!("observer {}: {err}", observer.client);
                }
            }
        }
        Ok(())
    }

    fn render(&mut self) {
        let time = self.timestep.server_time();
        for observer in &mut self.observers {
            observer.net.set_time(time);
            observer
                .dispatcher
                .dispatch_render_step(&mut observer.scene, &observer.net);
        }
    }

    pub fn run(&mut self) -> Result<Report> {
        let frame_dt = 1.0 / self.config.frame_rate.max(1) as f64;
        let mut report = Report::default();

        while self.timestep.tick() < self.config.duration_ticks {
            self.timestep.accumulate(frame_dt);
            while self.timestep.consume_tick() {
                let tick = self.timestep.tick();
                self.network_tick(tick)?;
                if tick % self.config.tick_rate as i32 == 0 {
                    log::debug!("tick {tick}: {} bytes sent so far", self.link.stats().bytes_sent);
                }
            }
            self.render();
            report.frames += 1;
        }

        report.ticks = self.timestep.tick();
        report.link = self.link.stats().clone();
        report.rejected_updates = self.observers.iter().map(|o| o.rejected).sum();
        for &id in &self.objects {
            if let Some(replica) = self.dispatcher.get(id) {
                accumulate(&mut report.authority, replica.engine().stats());
            }
        }
        self.measure_error(&mut report);
        Ok(report)
    }

    fn measure_error(&self, report: &mut Report) {
        let mut total = 0.0;
        let mut samples = 0;
        for &id in &self.objects {
            let Some(expected) = self
                .dispatcher
                .get(id)
                .and_then(|r| self.scene.body_position(r.handle()))
            else {
                continue;
            };
            for observer in &self.observers {
                let Some(observed) = observer
                    .dispatcher
                    .get(id)
                    .and_then(|r| observer.scene.body_position(r.handle()))
                else {
                    continue;
                };
                let error = expected.distance(observed);
                total += error;
                samples += 1;
                report.max_error = report.max_error.max(error);
            }
        }
        if samples > 0 {
            report.mean_error = total / samples as f32;
        }
    }
}

fn dispatcher_config(config: &SimConfig) -> DispatcherConfig {
    DispatcherConfig {
        tick_rate: config.tick_rate,
        slot_strategy: config.slot_strategy,
    }
}

fn accumulate(total: &mut ReplicationStats, stats: &ReplicationStats) {
    total.reliable_sent += stats.reliable_sent;
    total.unreliable_sent += stats.unreliable_sent;
    total.bytes_sent += stats.bytes_sent;
    total.teleports_sent += stats.teleports_sent;
    total.frame_syncs_sent += stats.frame_syncs_sent;
    total.synchronizations_sent += stats.synchronizations_sent;
    total.base_collapses += stats.base_collapses;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_run_replicates_every_object() {
        let config = SimConfig {
            objects: 3,
            observers: 1,
            duration_ticks: 120,
            ..Default::default()
        };
        let mut sim = Simulation::new(config).unwrap();
        let report = sim.run().unwrap();

        assert_eq!(report.ticks, 120);
        assert!(report.frames >= 280);
        assert_eq!(report.authority.teleports_sent, 3);
        assert_eq!(report.rejected_updates, 0);
        assert!(report.max_error < 1.0, "{report:?}");
    }

    #[test]
    fn late_joiner_gets_synchronized() {
        let config = SimConfig {
            objects: 2,
            observers: 1,
            duration_ticks: 90,
            late_join_tick: Some(30),
            ..Default::default()
        };
        let mut sim = Simulation::new(config).unwrap();
        let report = sim.run().unwrap();

        assert_eq!(sim.observers.len(), 2);
        assert_eq!(report.authority.synchronizations_sent, 2);
    }
}
