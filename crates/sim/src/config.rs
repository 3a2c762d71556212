use transync::{LinkConditions, ReplicationConfig, SlotStrategy};

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub tick_rate: u32,
    pub frame_rate: u32,
    pub objects: u32,
    pub observers: u32,
    pub duration_ticks: i32,
    pub late_join_tick: Option<i32>,
    pub seed: u64,
    pub link: LinkConditions,
    pub slot_strategy: SlotStrategy,
    pub replication: ReplicationConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate: transync::DEFAULT_TICK_RATE,
            frame_rate: 144,
            objects: 8,
            observers: 2,
            duration_ticks: 600,
            late_join_tick: None,
            seed: 1,
            link: LinkConditions::default(),
            slot_strategy: SlotStrategy::Hashed,
            replication: ReplicationConfig::default(),
        }
    }
}
