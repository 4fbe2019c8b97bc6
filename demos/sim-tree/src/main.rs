// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Simulate synthetic traffic on a hierarchical tree network-on-chip.
//!
//! The network is described by an optional TOML file (`--conf-file`) and
//! `ARBOR_` environment variables. Any network option given on the command
//! line takes priority over both.
use std::path::PathBuf;
use std::rc::Rc;

use arbor_engine::engine::Engine;
use arbor_engine::sim_error;
use arbor_engine::time::clock::Clock;
use arbor_engine::types::{SimError, SimResult};
use arbor_noc::config::NocConfig;
use arbor_noc::endpoint::Endpoint;
use arbor_noc::network::TreeNetwork;
use arbor_noc::traffic::{PacketGen, TrafficPattern};
use arbor_track::builder::{TrackerConfig, TrackersConfig, setup_trackers};
use arbor_track::entity::Entity;
use arbor_track::{Tracker, error, info};
use clap::Parser;
use indicatif::ProgressBar;

/// Command-line arguments.
#[derive(Parser)]
#[command(about = "Tree network-on-chip evaluation application")]
struct Cli {
    /// Enable logging to the console.
    #[arg(long, default_value = "false")]
    stdout: bool,

    /// Level of log message to display.
    #[arg(long, default_value = "Info")]
    stdout_level: log::Level,

    /// Set a regular expression for which entites should have logging level set
    /// to `--stdout-level`. Others will have level set to `Error`.
    #[arg(long, default_value = "")]
    stdout_filter_regex: String,

    /// Enable logging to a text file.
    #[arg(long, default_value = "false")]
    log_file: bool,

    /// Level of log message to write to the log file.
    #[arg(long, default_value = "Trace")]
    log_file_level: log::Level,

    /// Set a regular expression for which entites should have log file level
    /// set to `--log-file-level`. Others will have level set to `Error`.
    #[arg(long, default_value = "")]
    log_file_filter_regex: String,

    /// The filename log output is written to.
    #[arg(long, default_value = "arbor.log")]
    log_file_name: String,

    /// TOML file describing the network.
    #[arg(long)]
    conf_file: Option<PathBuf>,

    /// Virtual channels per port.
    #[arg(long)]
    num_vcs: Option<usize>,

    /// Flits buffered per virtual channel.
    #[arg(long)]
    buffer_depth: Option<usize>,

    /// Children per node at each level, e.g. `2,4,0`.
    #[arg(long, value_delimiter = ',')]
    fanout: Option<Vec<usize>>,

    /// Router names for each level, e.g. `dram,glb,buffer`.
    #[arg(long, value_delimiter = ',')]
    level_names: Option<Vec<String>>,

    /// Seed for the random number generators.
    #[arg(long)]
    seed: Option<u64>,

    /// Stop once this many flits have been delivered.
    #[arg(long)]
    drain_threshold: Option<u64>,

    /// Frequency of the network clock.
    #[arg(long)]
    clock_mhz: Option<f64>,

    /// What traffic pattern to use.
    #[arg(long, default_value_t, value_enum)]
    traffic_pattern: TrafficPattern,

    /// Number of packets each source sends.
    #[arg(long, default_value = "16")]
    packets_per_source: usize,

    /// Number of flits in each packet.
    #[arg(long, default_value = "4")]
    packet_size: usize,

    /// Show a progress bar for the delivered flit count (updated at the rate
    /// defined by `progress_ticks`).
    #[arg(long)]
    progress: bool,

    /// Number of ticks between updates to the progress bar. Only used when
    /// `progress` is enabled.
    #[arg(long, default_value = "1000")]
    progress_ticks: u64,

    /// Configure a clock tick on which to terminate the simulation. Use 0 to
    /// run until completion.
    #[arg(long, default_value = "0")]
    finish_tick: u64,
}

const FINISH: &str = "Finish";

/// Install an event to terminate the simulation at the clock tick defined.
fn finish_at(engine: &Engine, clock: Clock, run_ticks: u64) {
    engine.spawn(async move {
        clock.wait_ticks(run_ticks).await;
        sim_error!(FINISH)
    });
}

/// Spawn a background task to display regular updates of the total number of
/// flits delivered so far.
fn start_flit_dump(
    engine: &Engine,
    clock: Clock,
    progress_ticks: u64,
    expected_flits: u64,
    endpoints: Vec<Rc<Endpoint>>,
    progress_bar: ProgressBar,
) {
    engine.spawn(async move {
        let mut seen_flits = 0;
        loop {
            // Never keeps the simulation alive on its own
            clock.wait_ticks_or_exit(progress_ticks.max(1)).await;
            let num_flits: usize = endpoints.iter().map(|e| e.num_flits_received()).sum();
            progress_bar.inc((num_flits - seen_flits) as u64);
            seen_flits = num_flits;
            if num_flits as u64 >= expected_flits {
                break;
            }
        }
        Ok(())
    });
}

fn setup_all_trackers(args: &Cli) -> Result<Tracker, SimError> {
    let config = TrackersConfig {
        stdout: TrackerConfig {
            enable: args.stdout,
            level: args.stdout_level,
            filter_regex: &args.stdout_filter_regex,
            file: None,
        },
        log_file: TrackerConfig {
            enable: args.log_file,
            level: args.log_file_level,
            filter_regex: &args.log_file_filter_regex,
            file: Some(&args.log_file_name),
        },
    };
    match setup_trackers(&config) {
        Ok(tracker) => Ok(tracker),
        Err(e) => sim_error!(e),
    }
}

fn create_config(args: &Cli) -> Result<NocConfig, SimError> {
    let mut config = match NocConfig::load(args.conf_file.as_deref()) {
        Ok(config) => config,
        Err(e) => return sim_error!(e),
    };

    if let Some(num_vcs) = args.num_vcs {
        config.num_vcs = num_vcs;
    }
    if let Some(buffer_depth) = args.buffer_depth {
        config.buffer_depth = buffer_depth;
    }
    if let Some(fanout) = &args.fanout {
        config.fanout = fanout.clone();
    }
    if let Some(level_names) = &args.level_names {
        config.level_names = level_names.clone();
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.drain_threshold.is_some() {
        config.drain_threshold = args.drain_threshold;
    }
    if let Some(clock_mhz) = args.clock_mhz {
        config.clock_mhz = clock_mhz;
    }

    if let Err(e) = config.validate() {
        return sim_error!(e);
    }
    Ok(config)
}

fn main() -> SimResult {
    let args = Cli::parse();
    let tracker = setup_all_trackers(&args)?;
    let config = create_config(&args)?;

    let mut engine = Engine::new(&tracker);
    let clock = engine.clock_mhz(config.clock_mhz);
    let top = engine.top().clone();

    let network = TreeNetwork::new_and_register(&engine, &clock, &top, &config)?;
    let topology = network.topology().clone();
    info!(top ;
        "Tree of {} nodes with fanout {:?}, {} VCs of {} flits.",
        topology.num_nodes(),
        config.fanout,
        config.num_vcs,
        config.buffer_depth,
    );
    info!(top ;
        "Using traffic pattern {:?} with {} packets of {} flits per source. Random seed {}",
        args.traffic_pattern,
        args.packets_per_source,
        args.packet_size,
        config.seed,
    );

    for node in 0..topology.num_nodes() {
        let packets = PacketGen::new(
            topology.clone(),
            node,
            args.traffic_pattern,
            config.num_vcs,
            args.packet_size,
            args.packets_per_source,
            config.seed,
        );
        network.set_generator(node, Box::new(packets))?;
    }
    let expected_flits = args.traffic_pattern.expected_flit_deliveries(
        &topology,
        args.packets_per_source,
        args.packet_size,
    );

    info!(top ; "Platform built and connected");

    let progress_bar = ProgressBar::new(expected_flits);
    if args.progress {
        start_flit_dump(
            &engine,
            clock.clone(),
            args.progress_ticks,
            expected_flits,
            network.endpoints().to_vec(),
            progress_bar.clone(),
        );
    }

    if args.finish_tick != 0 {
        finish_at(&engine, clock.clone(), args.finish_tick);
    }

    let result = if config.drain_threshold.is_some() {
        engine.run_until(network.drain().stop_event())
    } else {
        engine.run()
    };

    let finished = match result {
        Ok(()) => false,
        Err(SimError(msg)) if msg == FINISH => true,
        Err(e) => return Err(e),
    };

    if args.progress {
        progress_bar.finish();
    }

    let drained = network.drain().has_stopped();
    let in_flight = network.flits_in_flight(expected_flits);
    if in_flight != 0 && !drained && !finished {
        error!(top ; "{} of {} flits still in flight", in_flight, expected_flits);
        error!(top ; "Deadlock detected at {:.2}ns", clock.time_now_ns());
        return sim_error!("Deadlock");
    }

    print_summary(&top, &network, clock.time_now_ns(), drained, finished);
    Ok(())
}

fn print_summary(
    top: &Rc<Entity>,
    network: &TreeNetwork,
    time_now_ns: f64,
    drained: bool,
    finished: bool,
) {
    let reason = if drained {
        "drain threshold reached"
    } else if finished {
        "finish tick reached"
    } else {
        "all traffic delivered"
    };
    info!(top ; "Stopped at {time_now_ns:.2}ns: {reason}.");
    println!("{}", network.stats());
}
