mod config;
mod simulation;

use anyhow::Result;
use clap::Parser;

use config::SimConfig;
use simulation::Simulation;
use transync::{LinkConditions, ReplicationConfig, SlotStrategy};

#[derive(Parser)]
#[command(name = "transync-sim")]
#[command(about = "Replicates a physics scene to simulated observers over a lossy loopback link")]
struct Args {
    #[arg(short, long, default_value_t = transync::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 144)]
    frame_rate: u32,

    #[arg(short, long, default_value_t = 8)]
    objects: u32,

    #[arg(long, default_value_t = 2)]
    observers: u32,

    #[arg(long, default_value_t = 600, help = "Number of network ticks to run")]
    ticks: i32,

    #[arg(long, help = "Add one more observer at this tick and synchronize it")]
    late_join: Option<i32>,

    #[arg(long, default_value_t = 1)]
    seed: u64,

    #[arg(long, help = "Enable link loss and latency simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0, help = "Minimum latency in ticks")]
    min_latency: u32,

    #[arg(long, default_value_t = 0, help = "Maximum latency in ticks")]
    max_latency: u32,

    #[arg(long, default_value_t = 0, help = "Jitter in ticks")]
    jitter: u32,

    #[arg(long, help = "Send positions as half-precision deltas")]
    half_precision: bool,

    #[arg(long, help = "Replicate rotation as a quaternion instead of Euler angles")]
    quaternion_sync: bool,

    #[arg(long, help = "Pack quaternions into 32 bits (implies --quaternion-sync)")]
    compress_quaternions: bool,

    #[arg(long, help = "Send deltas unreliably with periodic reliable frame syncs")]
    unreliable: bool,

    #[arg(long, help = "Assign frame-sync slots in registration order")]
    sequential_slots: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let link = LinkConditions {
        enabled: args.simulate_packet_loss,
        loss_percent: args.loss_percent,
        min_latency_ticks: args.min_latency,
        max_latency_ticks: args.max_latency,
        jitter_ticks: args.jitter,
    };

    let replication = ReplicationConfig {
        use_half_precision: args.half_precision,
        use_quaternion_sync: args.quaternion_sync || args.compress_quaternions,
        use_quaternion_compression: args.compress_quaternions,
        use_unreliable_deltas: args.unreliable,
        ..Default::default()
    };

    let config = SimConfig {
        tick_rate: args.tick_rate,
        frame_rate: args.frame_rate,
        objects: args.objects,
        observers: args.observers,
        duration_ticks: args.ticks,
        late_join_tick: args.late_join,
        seed: args.seed,
        link,
        slot_strategy: if args.sequential_slots {
            SlotStrategy::Sequential
        } else {
            SlotStrategy::Hashed
        },
        replication,
    };

    log::info!(
        "replicating {} objects to {} observers for {} ticks at {} Hz",
        config.objects,
        config.observers,
        config.duration_ticks,
        config.tick_rate
    );

    let mut sim = Simulation::new(config)?;
    let report = sim.run()?;

    log::info!("ran {} ticks, {} frames", report.ticks, report.frames);
    log::info!(
        "authority sent {} reliable / {} unreliable updates, {} bytes",
        report.authority.reliable_sent,
        report.authority.unreliable_sent,
        report.authority.bytes_sent
    );
    log::info!(
        "teleports {}, frame syncs {}, synchronizations {}, base collapses {}",
        report.authority.teleports_sent,
        report.authority.frame_syncs_sent,
        report.authority.synchronizations_sent,
        report.authority.base_collapses
    );
    log::info!(
        "link: {} frames sent, {} dropped, {} delivered, {} corrupt",
        report.link.frames_sent,
        report.link.frames_dropped,
        report.link.frames_delivered,
        report.link.corrupt_frames
    );
    if report.rejected_updates > 0 {
        log::warn!("{} updates were rejected by observers", report.rejected_updates);
    }
    log::info!(
        "tracking error: mean {:.4}, max {:.4}",
        report.mean_error,
        report.max_error
    );

    Ok(())
}
