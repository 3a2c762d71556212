/// Turns variable frame deltas into whole network ticks and tracks the
/// session clock derived from them.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    tick_rate: u32,
    dt: f64,
    accumulator: f64,
    tick: i32,
}

impl FixedTimestep {
    /// Longest frame delta honoured in one call; anything beyond is dropped.
    pub const MAX_FRAME_DELTA: f64 = 0.25;

    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick_rate,
            dt: 1.0 / tick_rate as f64,
            accumulator: 0.0,
            tick: 0,
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn tick(&self) -> i32 {
        self.tick
    }

    pub fn accumulate(&mut self, delta: f64) {
        self.accumulator += delta.clamp(0.0, Self::MAX_FRAME_DELTA);
    }

    pub fn should_tick(&self) -> bool {
        self.accumulator >= self.dt
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            self.tick = self.tick.wrapping_add(1);
            true
        } else {
            false
        }
    }

    /// Fraction of the way to the next tick.
    pub fn alpha(&self) -> f64 {
        self.accumulator / self.dt
    }

    /// Seconds since tick zero, including the partial tick in flight.
    pub fn server_time(&self) -> f64 {
        (self.tick as f64 + self.alpha()) * self.dt
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}
