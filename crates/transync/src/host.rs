//! Seams to the host application: scene graph, physics body and session.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

pub type ClientId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    World,
    Local,
}

pub trait TransformHost {
    fn position(&self, space: Space) -> Vec3;
    fn set_position(&mut self, space: Space, position: Vec3);
    fn rotation(&self, space: Space) -> Quat;
    fn set_rotation(&mut self, space: Space, rotation: Quat);
    fn local_scale(&self) -> Vec3;
    fn set_local_scale(&mut self, scale: Vec3);

    fn has_parent(&self) -> bool {
        false
    }

    /// Physics body driving this transform, if any. When present the engine
    /// reads and writes motion through it instead of the transform.
    fn motion_body(&self) -> Option<&dyn MotionBody> {
        None
    }

    fn motion_body_mut(&mut self) -> Option<&mut dyn MotionBody> {
        None
    }
}

pub trait MotionBody {
    fn position(&self) -> Vec3;
    fn set_position(&mut self, position: Vec3);
    fn rotation(&self) -> Quat;
    fn set_rotation(&mut self, rotation: Quat);
    fn linear_velocity(&self) -> Vec3;
    /// Radians per second.
    fn angular_velocity(&self) -> Vec3;
    fn is_kinematic(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Reliable,
    Unreliable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    AllObservers,
    Client(ClientId),
}

pub trait NetworkContext {
    fn current_tick(&self) -> i32;
    fn tick_rate(&self) -> u32;
    /// Seconds.
    fn server_time(&self) -> f64;
    fn is_authority_for(&self, object: ObjectId) -> bool;
    fn send(&mut self, object: ObjectId, payload: &[u8], delivery: Delivery, target: Target);
}

/// Transform with an optional fixed parent frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasicTransform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub parent: Option<(Vec3, Quat)>,
}

impl Default for BasicTransform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            parent: None,
        }
    }
}

impl BasicTransform {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }
}

impl TransformHost for BasicTransform {
    fn position(&self, space: Space) -> Vec3 {
        match (space, self.parent) {
            (Space::World, Some((origin, orientation))) => origin + orientation * self.position,
            _ => self.position,
        }
    }

    fn set_position(&mut self, space: Space, position: Vec3) {
        self.position = match (space, self.parent) {
            (Space::World, Some((origin, orientation))) => {
                orientation.inverse() * (position - origin)
            }
            _ => position,
        };
    }

    fn rotation(&self, space: Space) -> Quat {
        match (space, self.parent) {
            (Space::World, Some((_, orientation))) => orientation * self.rotation,
            _ => self.rotation,
        }
    }

    fn set_rotation(&mut self, space: Space, rotation: Quat) {
        self.rotation = match (space, self.parent) {
            (Space::World, Some((_, orientation))) => orientation.inverse() * rotation,
            _ => rotation,
        };
    }

    fn local_scale(&self) -> Vec3 {
        self.scale
    }

    fn set_local_scale(&mut self, scale: Vec3) {
        self.scale = scale;
    }

    fn has_parent(&self) -> bool {
        self.parent.is_some()
    }
}
