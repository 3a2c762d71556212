use bitflags::bitflags;
use glam::BVec3;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StateFlags: u32 {
        const IN_LOCAL_SPACE = 0x1;
        const POSITION_X = 0x2;
        const POSITION_Y = 0x4;
        const POSITION_Z = 0x8;
        const ROTATION_X = 0x10;
        const ROTATION_Y = 0x20;
        const ROTATION_Z = 0x40;
        const SCALE_X = 0x80;
        const SCALE_Y = 0x100;
        const SCALE_Z = 0x200;
        const TELEPORTING = 0x400;
        const INTERPOLATE = 0x800;
        const QUATERNION_SYNC = 0x1000;
        const QUATERNION_COMPRESSION = 0x2000;
        const HALF_PRECISION = 0x4000;
        const SYNCHRONIZING = 0x8000;
        const POSITION_SLERP = 0x10000;
        const SYNCHRONIZE_BASE = 0x40000;
        const RELIABLE = 0x80000;
        const UNRELIABLE_DELTAS = 0x100000;
        const FRAME_SYNC = 0x200000;

        const POSITION_AXES = Self::POSITION_X.bits() | Self::POSITION_Y.bits() | Self::POSITION_Z.bits();
        const ROTATION_AXES = Self::ROTATION_X.bits() | Self::ROTATION_Y.bits() | Self::ROTATION_Z.bits();
        const SCALE_AXES = Self::SCALE_X.bits() | Self::SCALE_Y.bits() | Self::SCALE_Z.bits();

        /// Configuration bits carried across ticks.
        const PERSISTENT = Self::IN_LOCAL_SPACE.bits()
            | Self::INTERPOLATE.bits()
            | Self::QUATERNION_SYNC.bits()
            | Self::QUATERNION_COMPRESSION.bits()
            | Self::HALF_PRECISION.bits()
            | Self::POSITION_SLERP.bits()
            | Self::UNRELIABLE_DELTAS.bits();

        /// Per-update bits cleared after every send.
        const TRANSIENT = Self::POSITION_AXES.bits()
            | Self::ROTATION_AXES.bits()
            | Self::SCALE_AXES.bits()
            | Self::TELEPORTING.bits()
            | Self::SYNCHRONIZING.bits()
            | Self::SYNCHRONIZE_BASE.bits()
            | Self::RELIABLE.bits()
            | Self::FRAME_SYNC.bits();
    }
}

const POSITION: [StateFlags; 3] = [StateFlags::POSITION_X, StateFlags::POSITION_Y, StateFlags::POSITION_Z];
const ROTATION: [StateFlags; 3] = [StateFlags::ROTATION_X, StateFlags::ROTATION_Y, StateFlags::ROTATION_Z];
const SCALE: [StateFlags; 3] = [StateFlags::SCALE_X, StateFlags::SCALE_Y, StateFlags::SCALE_Z];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Position,
    Rotation,
    Scale,
}

impl Channel {
    pub fn axis_flags(self) -> &'static [StateFlags; 3] {
        match self {
            Channel::Position => &POSITION,
            Channel::Rotation => &ROTATION,
            Channel::Scale => &SCALE,
        }
    }

    pub fn all_axes(self) -> StateFlags {
        match self {
            Channel::Position => StateFlags::POSITION_AXES,
            Channel::Rotation => StateFlags::ROTATION_AXES,
            Channel::Scale => StateFlags::SCALE_AXES,
        }
    }
}

impl StateFlags {
    pub fn axis(self, channel: Channel, axis: usize) -> bool {
        self.contains(channel.axis_flags()[axis])
    }

    pub fn set_axis(&mut self, channel: Channel, axis: usize, value: bool) {
        self.set(channel.axis_flags()[axis], value);
    }

    pub fn axes(self, channel: Channel) -> BVec3 {
        let flags = channel.axis_flags();
        BVec3::new(
            self.contains(flags[0]),
            self.contains(flags[1]),
            self.contains(flags[2]),
        )
    }

    pub fn set_axes(&mut self, channel: Channel, mask: BVec3) {
        for axis in 0..3 {
            self.set_axis(channel, axis, mask.test(axis));
        }
    }

    pub fn has_changes(self, channel: Channel) -> bool {
        self.intersects(channel.all_axes())
    }

    pub fn persistent(self) -> StateFlags {
        self & StateFlags::PERSISTENT
    }

    pub fn is_teleporting(self) -> bool {
        self.contains(StateFlags::TELEPORTING)
    }

    pub fn is_half_precision(self) -> bool {
        self.contains(StateFlags::HALF_PRECISION)
    }

    pub fn is_quaternion_sync(self) -> bool {
        self.contains(StateFlags::QUATERNION_SYNC)
    }

    pub fn is_quaternion_compressed(self) -> bool {
        self.contains(StateFlags::QUATERNION_COMPRESSION)
    }

    pub fn is_in_local_space(self) -> bool {
        self.contains(StateFlags::IN_LOCAL_SPACE)
    }

    pub fn is_interpolating(self) -> bool {
        self.contains(StateFlags::INTERPOLATE)
    }

    pub fn is_frame_sync(self) -> bool {
        self.contains(StateFlags::FRAME_SYNC)
    }

    pub fn is_synchronizing(self) -> bool {
        self.contains(StateFlags::SYNCHRONIZING)
    }

    pub fn requires_reliable(self) -> bool {
        !self.contains(StateFlags::UNRELIABLE_DELTAS)
            || self.intersects(
                StateFlags::TELEPORTING
                    | StateFlags::SYNCHRONIZING
                    | StateFlags::FRAME_SYNC
                    | StateFlags::SYNCHRONIZE_BASE,
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_partition_known_bits() {
        assert!(StateFlags::PERSISTENT.intersection(StateFlags::TRANSIENT).is_empty());
        assert_eq!(StateFlags::PERSISTENT | StateFlags::TRANSIENT, StateFlags::all());
    }

    #[test]
    fn axis_accessors() {
        let mut flags = StateFlags::empty();
        flags.set_axis(Channel::Rotation, 1, true);
        assert_eq!(flags, StateFlags::ROTATION_Y);
        assert_eq!(flags.axes(Channel::Rotation), BVec3::new(false, true, false));
        assert!(!flags.has_changes(Channel::Position));
        flags.set_axes(Channel::Scale, BVec3::TRUE);
        assert!(flags.contains(StateFlags::SCALE_AXES));
    }

    #[test]
    fn reliability_selection() {
        assert!(StateFlags::POSITION_X.requires_reliable());
        let unreliable = StateFlags::UNRELIABLE_DELTAS | StateFlags::POSITION_X;
        assert!(!unreliable.requires_reliable());
        assert!((unreliable | StateFlags::FRAME_SYNC).requires_reliable());
        assert!((unreliable | StateFlags::SYNCHRONIZE_BASE).requires_reliable());
        assert!((unreliable | StateFlags::TELEPORTING).requires_reliable());
    }
}
