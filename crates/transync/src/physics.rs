//! Rapier-backed hosts: a scene that steps the simulation and a borrowed
//! view of one body that the replication engine can read and drive.

use glam::{Quat, Vec3};
use rapier3d::prelude::*;

use crate::config::ReplicationConfig;
use crate::dispatch::{DispatchControl, Replicated};
use crate::engine::{ApplyOutcome, ReplicationEngine, Role};
use crate::error::ReplicationError;
use crate::host::{ClientId, MotionBody, NetworkContext, ObjectId, Space, TransformHost};

fn to_vector(v: Vec3) -> Vector {
    Vector::new(v.x, v.y, v.z)
}

fn to_rotation(q: Quat) -> Rotation {
    Rotation::from_xyzw(q.x, q.y, q.z, q.w).normalize()
}

pub struct PhysicsScene {
    pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    gravity: Vector,
}

impl PhysicsScene {
    pub fn new(tick_rate: u32) -> Self {
        let dt = 1.0 / tick_rate.max(1) as Real;
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = dt;
        integration_parameters.min_ccd_dt = dt / 100.0;

        Self {
            pipeline: PhysicsPipeline::new(),
            integration_parameters,
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            gravity: Vector::new(0.0, -9.81, 0.0),
        }
    }

    pub fn step(&mut self) {
        self.pipeline.step(
            self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            &(),
            &(),
        );
    }

    pub fn add_ground(&mut self, y: Real, half_size: Real) -> ColliderHandle {
        let collider = ColliderBuilder::cuboid(half_size, 0.1, half_size)
            .translation(Vector::new(0.0, y, 0.0))
            .build();
        self.colliders.insert(collider)
    }

    pub fn add_dynamic_box(
        &mut self,
        position: Vec3,
        half_extents: Vec3,
        mass: Real,
    ) -> RigidBodyHandle {
        let body = RigidBodyBuilder::dynamic()
            .translation(to_vector(position))
            .ccd_enabled(true)
            .build();
        let handle = self.bodies.insert(body);

        let collider = ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
            .mass(mass)
            .friction(0.5)
            .restitution(0.3)
            .build();
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);
        handle
    }

    pub fn add_dynamic_sphere(
        &mut self,
        position: Vec3,
        radius: Real,
        mass: Real,
    ) -> RigidBodyHandle {
        let body = RigidBodyBuilder::dynamic()
            .translation(to_vector(position))
            .ccd_enabled(true)
            .build();
        let handle = self.bodies.insert(body);
        let collider = ColliderBuilder::ball(radius)
            .mass(mass)
            .friction(0.5)
            .restitution(0.3)
            .build();
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);
        handle
    }

    pub fn set_body_velocity(&mut self, handle: RigidBodyHandle, velocity: Vec3) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_linvel(to_vector(velocity), true);
        }
    }

    pub fn set_body_angular_velocity(&mut self, handle: RigidBodyHandle, velocity: Vec3) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_angvel(to_vector(velocity), true);
        }
    }

    pub fn body_position(&self, handle: RigidBodyHandle) -> Option<Vec3> {
        self.bodies.get(handle).map(|b| {
            let t = b.translation();
            Vec3::new(t.x, t.y, t.z)
        })
    }

    pub fn set_body_type(&mut self, handle: RigidBodyHandle, body_type: RigidBodyType) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_body_type(body_type, true);
        }
    }

    /// Borrows `handle` as a [`TransformHost`]. Rapier bodies carry no
    /// scale, so the caller supplies where it lives.
    pub fn host<'a>(
        &'a mut self,
        handle: RigidBodyHandle,
        scale: &'a mut Vec3,
    ) -> Option<BodyHost<'a>> {
        self.bodies
            .get_mut(handle)
            .map(|body| BodyHost { body, scale })
    }
}

pub struct BodyHost<'a> {
    body: &'a mut RigidBody,
    scale: &'a mut Vec3,
}

impl BodyHost<'_> {
    fn position_based(&self) -> bool {
        self.body.body_type() == RigidBodyType::KinematicPositionBased
    }

    /// Kinematic bodies are read at their target so that separate position
    /// and rotation writes within one step compose.
    fn pose(&self) -> &Pose {
        if self.position_based() {
            self.body.next_position()
        } else {
            self.body.position()
        }
    }

    fn translation(&self) -> Vec3 {
        let t = self.pose().translation;
        Vec3::new(t.x, t.y, t.z)
    }

    fn orientation(&self) -> Quat {
        let r = self.pose().rotation;
        Quat::from_xyzw(r.x, r.y, r.z, r.w)
    }

    /// Kinematic bodies move on the next step, so contacts see their velocity.
    fn set_pose(&mut self, position: Vec3, rotation: Quat) {
        let pose = Pose::from_parts(to_vector(position), to_rotation(rotation));
        if self.position_based() {
            self.body.set_next_kinematic_position(pose);
        } else {
            self.body.set_position(pose, true);
        }
    }
}

impl TransformHost for BodyHost<'_> {
    fn position(&self, _space: Space) -> Vec3 {
        self.translation()
    }

    fn set_position(&mut self, _space: Space, position: Vec3) {
        let rotation = self.orientation();
        self.set_pose(position, rotation);
    }

    fn rotation(&self, _space: Space) -> Quat {
        self.orientation()
    }

    fn set_rotation(&mut self, _space: Space, rotation: Quat) {
        let position = self.translation();
        self.set_pose(position, rotation);
    }

    fn local_scale(&self) -> Vec3 {
        *self.scale
    }

    fn set_local_scale(&mut self, scale: Vec3) {
        *self.scale = scale;
    }

    fn motion_body(&self) -> Option<&dyn MotionBody> {
        Some(self)
    }

    fn motion_body_mut(&mut self) -> Option<&mut dyn MotionBody> {
        Some(self)
    }
}

impl MotionBody for BodyHost<'_> {
    fn position(&self) -> Vec3 {
        self.translation()
    }

    fn set_position(&mut self, position: Vec3) {
        let rotation = self.orientation();
        self.set_pose(position, rotation);
    }

    fn rotation(&self) -> Quat {
        self.orientation()
    }

    fn set_rotation(&mut self, rotation: Quat) {
        let position = self.translation();
        self.set_pose(position, rotation);
    }

    fn linear_velocity(&self) -> Vec3 {
        let v = self.body.linvel();
        Vec3::new(v.x, v.y, v.z)
    }

    fn angular_velocity(&self) -> Vec3 {
        let w = self.body.angvel();
        Vec3::new(w.x, w.y, w.z)
    }

    fn is_kinematic(&self) -> bool {
        self.body.is_kinematic()
    }
}

/// Replicates one rigid body of a [`PhysicsScene`]. While observing, the
/// body is switched to kinematic so the solver does not fight the stream.
pub struct PhysicsReplica {
    engine: ReplicationEngine,
    handle: RigidBodyHandle,
    scale: Vec3,
    simulated_type: RigidBodyType,
    tick_parent: Option<ObjectId>,
}

impl PhysicsReplica {
    pub fn new(
        object_id: ObjectId,
        config: ReplicationConfig,
        scene: &mut PhysicsScene,
        handle: RigidBodyHandle,
        net: &dyn NetworkContext,
    ) -> Option<Self> {
        let simulated_type = scene.bodies.get(handle)?.body_type();
        let role = if net.is_authority_for(object_id) {
            Role::Authority
        } else {
            Role::Observer
        };
        let mut scale = Vec3::ONE;
        let host = scene.host(handle, &mut scale)?;
        let engine = ReplicationEngine::new(object_id, role, config, &host, net);

        let replica = Self {
            engine,
            handle,
            scale,
            simulated_type,
            tick_parent: None,
        };
        replica.apply_body_type(scene);
        Some(replica)
    }

    pub fn with_tick_parent(mut self, parent: ObjectId) -> Self {
        self.tick_parent = Some(parent);
        self
    }

    pub fn engine(&self) -> &ReplicationEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ReplicationEngine {
        &mut self.engine
    }

    pub fn handle(&self) -> RigidBodyHandle {
        self.handle
    }

    pub fn synchronize_observer(
        &mut self,
        scene: &mut PhysicsScene,
        net: &mut dyn NetworkContext,
        client: ClientId,
    ) {
        match scene.host(self.handle, &mut self.scale) {
            Some(host) => self.engine.synchronize_observer(&host, net, client),
            None => self.missing_body(),
        }
    }

    fn apply_body_type(&self, scene: &mut PhysicsScene) {
        let body_type = if self.engine.is_authority() {
            self.simulated_type
        } else {
            RigidBodyType::KinematicPositionBased
        };
        scene.set_body_type(self.handle, body_type);
    }

    fn missing_body(&self) {
        log::warn!(
            "{:?}: rigid body {:?} no longer exists",
            self.engine.object_id(),
            self.handle
        );
    }
}

impl Replicated for PhysicsReplica {
    type World = PhysicsScene;

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

    fn refresh_role(&mut self, scene: &mut PhysicsScene, net: &dyn NetworkContext) {
        let owns = net.is_authority_for(self.engine.object_id());
        if owns == self.engine.is_authority() {
            return;
        }
        let role = if owns { Role::Authority } else { Role::Observer };
        match scene.host(self.handle, &mut self.scale) {
            Some(host) => self.engine.reinitialize(role, &host, net),
            None => return self.missing_body(),
        }
        self.apply_body_type(scene);
    }

    fn on_network_tick(
        &mut self,
        scene: &mut PhysicsScene,
        net: &mut dyn NetworkContext,
        control: &mut DispatchControl,
    ) {
        match scene.host(self.handle, &mut self.scale) {
            Some(host) => self.engine.on_network_tick(&host, net),
            None => {
                self.missing_body();
                control.deregister(self.engine.object_id());
            }
        }
    }

    fn on_render_step(&mut self, scene: &mut PhysicsScene, net: &dyn NetworkContext) {
        match scene.host(self.handle, &mut self.scale) {
            Some(mut host) => self.engine.on_render_step(&mut host, net),
            None => self.missing_body(),
        }
    }

    fn on_receive(
        &mut self,
        scene: &mut PhysicsScene,
        payload: &[u8],
        net: &dyn NetworkContext,
    ) -> Result<ApplyOutcome, ReplicationError> {
        match scene.host(self.handle, &mut self.scale) {
            Some(mut host) => self.engine.apply_incoming(payload, &mut host, net),
            None => {
                self.missing_body();
                Ok(ApplyOutcome::Ignored)
            }
        }
    }
}
