use crate::config::Configuration;
use crate::error::{CompileError, Result};
use crate::stage0;
use crate::stage1::{self, FlowStore};
use crate::stage2::{self, GlobalSchedule};
use crate::stage3::{self, Placements};
use crate::stage4::{self, Batches, ContainerImage};
use crate::structs::*;

use crossbeam_channel::bounded;
use std::path::Path;
use std::thread;

/// Everything produced by a compilation, kept for inspection
#[derive(Debug)]
pub struct Compilation {
    pub store: FlowStore,
    pub schedule: GlobalSchedule,
    pub placements: Placements,
    pub batches: Batches,
    pub image: ContainerImage,
}

impl Compilation {
    /// Write the container. The file is either complete or absent.
    pub fn write(&self, path: &Path) -> Result<()> {
        self.image.write(path)
    }
}

/// Give the script tag of the configuration to every matching flow
pub fn apply_scripts(store: &mut FlowStore, config: &Configuration) {
    let tagged: Vec<(FlowKey, u32)> = store
        .flows()
        .filter_map(|f| config.script_for(&f.key).map(|tag| (f.key, tag)))
        .collect();
    for (key, tag) in tagged {
        log::debug!("Flow {key} uses script {tag}");
        store.set_script(&key, tag);
    }
}

/// Stage 0 runs in its own thread and feeds stage 1 through a bounded channel. A panic of the
/// capture thread is an error, the store would be incomplete.
pub fn read_threaded<I>(reader: I, channel_size: usize) -> Result<FlowStore>
where
    I: Iterator<Item = Result<CapturedPacket>> + Send + 'static,
{
    let (tx_s0, rx_s1) = bounded::<Result<CapturedPacket>>(channel_size);

    let builder = thread::Builder::new().name("Stage0".into());
    let thread = builder
        .spawn(move || stage0::run_channel(reader, tx_s0))
        .map_err(|e| CompileError::Capture(pcap_file::PcapError::IoError(e)))?;

    let store = stage1::run_channel(rx_s1);
    if thread.join().is_err() {
        return Err(CompileError::CapturePanicked);
    }
    store
}

/// Run stages 2 to 4 on a complete flow store
pub fn compile_store(mut store: FlowStore, config: &Configuration) -> Result<Compilation> {
    apply_scripts(&mut store, config);
    let schedule = stage2::build(&store);
    log::debug!("{} entries scheduled", schedule.len());
    let placements = stage3::place(&schedule, &store, config.placement_mode())?;
    log::debug!(
        "{} packets placed, image of {} bytes",
        placements.len(),
        placements.image_len()
    );
    let batches = stage4::build(&schedule, &store, &placements)?;
    let image = ContainerImage::new(&batches, &store, &placements);
    Ok(Compilation {
        store,
        schedule,
        placements,
        batches,
        image,
    })
}

/// Compile already captured packets
pub fn compile(
    packets: impl IntoIterator<Item = CapturedPacket>,
    config: &Configuration,
) -> Result<Compilation> {
    compile_store(stage1::run_vec(packets)?, config)
}
