//! Authority-to-observer transform replication: dirty checking, compact
//! wire encoding, half-precision position deltas and buffered
//! interpolation on the receiving side.

pub mod codec;
pub mod config;
pub mod delta;
pub mod dispatch;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod host;
pub mod interpolation;
pub mod link;
pub mod physics;
pub mod state;
pub mod time;

pub use codec::{DecodeError, EncodeError, NetReader, NetWriter};
pub use config::{ReplicationConfig, SyncAxes};
pub use delta::DeltaPositionTracker;
pub use dispatch::{
    DEFAULT_TICK_RATE, DispatchControl, DispatcherConfig, Replicated, ReplicatedTransform,
    SlotStrategy, TickDispatcher,
};
pub use engine::{ApplyOutcome, ReplicationEngine, ReplicationStats, Role};
pub use envelope::{Envelope, EnvelopeError};
pub use error::ReplicationError;
pub use host::{
    BasicTransform, ClientId, Delivery, MotionBody, NetworkContext, ObjectId, Space, Target,
    TransformHost,
};
pub use interpolation::{Interpolate, InterpolationBuffer, InterpolationMode};
pub use link::{LinkConditions, LinkStats, LocalSession, LoopbackLink, Outgoing};
pub use physics::{BodyHost, PhysicsReplica, PhysicsScene};
pub use state::{Channel, StateFlags, TransformState};
pub use time::FixedTimestep;
