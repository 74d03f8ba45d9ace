use pktgen_compiler::config::{self, CaptureFilter, Configuration};
use pktgen_compiler::stage0;
use pktgen_compiler::stage1::FlowStore;
use pktgen_compiler::stage4::{ContainerImage, ScheduleImage};
use pktgen_compiler::ui::Stats;
use pktgen_compiler::*;
mod cmd;

use std::path::Path;
use std::process;
use std::sync::Arc;

use clap::Parser;

const CHANNEL_SIZE: usize = 50;

/// The entry point of the application.
///
/// Every failure is logged and ends the process with status 1
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = cmd::Args::parse();

    let result = match args.command {
        cmd::Command::Compile {
            input,
            outfile,
            config,
            strict,
            port,
            host,
            tcp_only,
            udp_only,
        } => load_config(config.as_deref()).and_then(|mut config| {
            if strict {
                config.placement.strict = true;
            }
            if !port.is_empty() {
                config.filter.ports = port;
            }
            if !host.is_empty() {
                config.filter.hosts = host;
            }
            if tcp_only {
                config.filter.udp = false;
            }
            if udp_only {
                config.filter.tcp = false;
            }
            run_compile(Path::new(&input), Path::new(&outfile), config)
        }),
        cmd::Command::Inspect { input } => run_inspect(Path::new(&input)),
        cmd::Command::Flows { input, config } => load_config(config.as_deref())
            .and_then(|config| run_flows(Path::new(&input), &config)),
    };

    if let Err(e) = result {
        log::error!("{e}");
        process::exit(1);
    }
}

fn load_config(path: Option<&str>) -> Result<Configuration> {
    match path {
        Some(p) => config::import_config_file(Path::new(p)),
        None => Ok(Configuration::default()),
    }
}

/// Read the capture into a flow store
fn read_flows(input: &Path, filter: CaptureFilter, stats: &Arc<Stats>) -> Result<FlowStore> {
    let reader = stage0::CaptureReader::open(input, filter, Arc::clone(stats))?;
    let store = compiler::read_threaded(reader, CHANNEL_SIZE)?;
    stats.set_flows(store.len());
    log::info!(
        "{} packets grouped into {} flows",
        store.packet_count(),
        store.len()
    );
    Ok(store)
}

fn run_compile(input: &Path, outfile: &Path, config: Configuration) -> Result<()> {
    let stats = Arc::new(Stats::default());
    let store = read_flows(input, config.filter.clone(), &stats)?;
    let compilation = compile_store(store, &config)?;
    compilation.schedule.display(&compilation.store);
    compilation.batches.display();
    stats.set_placements(&compilation.placements);
    stats.set_batches(&compilation.batches);
    compilation.write(outfile)?;
    stats.report();
    Ok(())
}

fn run_inspect(input: &Path) -> Result<()> {
    let image = ContainerImage::read(input)?;
    let schedule = ScheduleImage::decode(&image.sched)?;
    log::info!(
        "{} packets in {} batches, {} bytes of packet data",
        schedule.total_packets,
        schedule.total_batches,
        image.pkt_data.len()
    );
    for (j, batch) in schedule.batches.iter().enumerate() {
        log::info!("Batch {j}");
        for (i, slot) in batch.iter().enumerate() {
            match slot {
                Some(r) => log::info!(
                    "   {i}:{:20.9} {:5} {:08x}",
                    r.relative_time_ns as f64 / 1e9,
                    r.length,
                    r.block_offset()
                ),
                None => log::info!("   {i}:"),
            }
        }
    }
    Ok(())
}

fn run_flows(input: &Path, config: &Configuration) -> Result<()> {
    let stats = Arc::new(Stats::default());
    let mut store = read_flows(input, config.filter.clone(), &stats)?;
    compiler::apply_scripts(&mut store, config);
    store.display();
    Ok(())
}
