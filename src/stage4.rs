use crate::error::{CompileError, Result};
use crate::stage1::FlowStore;
use crate::stage2::GlobalSchedule;
use crate::stage3::Placements;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Number of slots of a hardware descriptor batch
pub const BATCH_SIZE: usize = 8;
/// Size of a slot record
pub const RECORD_LEN: usize = 16;
/// Size of a batch in the schedule blob
pub const BATCH_LEN: usize = BATCH_SIZE * RECORD_LEN;
/// Meaningful part of the schedule header
pub const HEADER_LEN: usize = 8;
/// Offset of the first batch. Bytes HEADER_LEN..RECORDS_OFFSET are reserved.
pub const RECORDS_OFFSET: usize = 64;
/// Relative timestamps are 40-bit wide
pub const MAX_RELATIVE_TIME: u64 = (1 << 40) - 1;

pub const SCHED_MEMBER: &str = "sched";
pub const PKT_DATA_MEMBER: &str = "pkt_data";

/// An occupied slot of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry {
    pub relative_time_ns: u64,
    pub memory_offset: u64,
    pub length: u16,
    /// Kept for the listing, not serialized
    pub script_tag: Option<u32>,
}

impl BatchEntry {
    /// Little-endian record: time_low u32, time_high u8, 3 reserved bytes, block index u32
    /// (offset in 256-byte units), length u16, reserved u16
    fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&((self.relative_time_ns & 0xffff_ffff) as u32).to_le_bytes());
        out[4] = ((self.relative_time_ns >> 32) & 0xff) as u8;
        out[5..8].fill(0);
        out[8..12].copy_from_slice(&((self.memory_offset >> 8) as u32).to_le_bytes());
        out[12..14].copy_from_slice(&self.length.to_le_bytes());
        out[14..16].fill(0);
    }
}

/// Eight slots, the last batch of a schedule being padded with empty slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Batch {
    pub slots: [Option<BatchEntry>; BATCH_SIZE],
}

impl Batch {
    fn new(batch_index: usize, entries: &[BatchEntry]) -> Result<Batch> {
        if entries.len() > BATCH_SIZE {
            return Err(CompileError::BatchOverflow {
                batch: batch_index,
                count: entries.len(),
            });
        }
        let mut batch = Batch::default();
        for (slot, entry) in batch.slots.iter_mut().zip(entries) {
            *slot = Some(*entry);
        }
        Ok(batch)
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn encode(&self, out: &mut [u8]) {
        for (slot, record) in self.slots.iter().zip(out.chunks_exact_mut(RECORD_LEN)) {
            match slot {
                Some(entry) => entry.encode(record),
                None => record.fill(0),
            }
        }
    }
}

/// The schedule split into batches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batches {
    batches: Vec<Batch>,
    total_packets: usize,
}

impl Batches {
    pub fn iter(&self) -> impl Iterator<Item = &Batch> + '_ {
        self.batches.iter()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn total_packets(&self) -> usize {
        self.total_packets
    }

    /// The schedule blob: header, reserved bytes and one 128-byte block per batch
    pub fn schedule_blob(&self) -> Vec<u8> {
        let len = if self.batches.is_empty() {
            HEADER_LEN
        } else {
            RECORDS_OFFSET + BATCH_LEN * self.batches.len()
        };
        let mut blob = vec![0u8; len];
        blob[0..4].copy_from_slice(&(self.total_packets as u32).to_le_bytes());
        blob[4..8].copy_from_slice(&(self.batches.len() as u32).to_le_bytes());
        for (i, batch) in self.batches.iter().enumerate() {
            let start = RECORDS_OFFSET + i * BATCH_LEN;
            batch.encode(&mut blob[start..start + BATCH_LEN]);
        }
        blob
    }

    /// Log the batches, one slot per line: time in seconds, length, offset and script
    pub fn display(&self) {
        for (j, b) in self.batches.iter().enumerate() {
            log::debug!("Batch {j}");
            for (i, slot) in b.slots.iter().enumerate() {
                match slot {
                    Some(e) => log::debug!(
                        "   {i}:{:20.9} {:5} {:08x} {:?}",
                        e.relative_time_ns as f64 / 1e9,
                        e.length,
                        e.memory_offset,
                        e.script_tag
                    ),
                    None => log::debug!("   {i}:"),
                }
            }
        }
    }
}

/// Stage 4: split the schedule into batches of eight entries, with times relative to the first
/// entry and the memory offsets resolved by stage 3
pub fn build(schedule: &GlobalSchedule, store: &FlowStore, placements: &Placements) -> Result<Batches> {
    log::trace!("Start S4");
    let origin = schedule.origin().unwrap_or(0);
    let mut entries = Vec::with_capacity(schedule.len());
    for (index, e) in schedule.iter().enumerate() {
        let flow = store.flow(e.flow);
        let missing = || CompileError::MissingPacket {
            index,
            flow: e.flow,
            packet_index: e.packet_index,
        };
        let id = schedule.packet_id(store, e).ok_or_else(missing)?;
        let packet = store.packet(id).ok_or_else(missing)?;
        let placement = placements
            .get(id)
            .ok_or(CompileError::MissingPlacement { index, packet: id })?;
        let length = packet.len();
        let relative_time_ns = (e.timestamp_ns - origin) as u64;
        if relative_time_ns > MAX_RELATIVE_TIME {
            return Err(CompileError::TimestampOverflow {
                index,
                relative_ns: relative_time_ns,
            });
        }
        entries.push(BatchEntry {
            relative_time_ns,
            memory_offset: placement.offset,
            length: length as u16,
            script_tag: flow.and_then(|f| f.script),
        });
    }

    let batches = entries
        .chunks(BATCH_SIZE)
        .enumerate()
        .map(|(i, chunk)| Batch::new(i, chunk))
        .collect::<Result<Vec<Batch>>>()?;
    log::trace!("S4 stops");
    Ok(Batches {
        batches,
        total_packets: entries.len(),
    })
}

/// The packet-data image: zero everywhere except at the placed packets
pub fn packet_image(store: &FlowStore, placements: &Placements) -> Vec<u8> {
    let mut image = vec![0u8; placements.image_len() as usize];
    for (id, placement) in placements.iter() {
        if let Some(packet) = store.packet(id) {
            let start = placement.offset as usize;
            image[start..start + packet.len()].copy_from_slice(packet.data());
        }
    }
    image
}

/// The two blobs of the container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerImage {
    pub sched: Vec<u8>,
    pub pkt_data: Vec<u8>,
}

impl ContainerImage {
    pub fn new(batches: &Batches, store: &FlowStore, placements: &Placements) -> Self {
        ContainerImage {
            sched: batches.schedule_blob(),
            pkt_data: packet_image(store, placements),
        }
    }

    /// Write a gzip-compressed tar archive. Metadata is zeroed so the output only depends on
    /// the blobs.
    pub fn write_archive<W: Write>(&self, writer: W) -> io::Result<W> {
        let mut builder = tar::Builder::new(GzEncoder::new(writer, Compression::default()));
        builder.mode(tar::HeaderMode::Deterministic);
        for (name, blob) in [(SCHED_MEMBER, &self.sched), (PKT_DATA_MEMBER, &self.pkt_data)] {
            let mut header = tar::Header::new_gnu();
            header.set_size(blob.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            builder.append_data(&mut header, name, blob.as_slice())?;
        }
        builder.into_inner()?.finish()
    }

    /// Write the container atomically: into a temporary file of the same directory, renamed
    /// once complete. Nothing is left behind on error.
    pub fn write(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(dir)?;
        let tmp = self.write_archive(tmp)?;
        // temporary files are created owner-only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o644))?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        log::info!("Container written into {}", path.display());
        Ok(())
    }

    pub fn read_archive<R: Read>(reader: R) -> Result<ContainerImage> {
        let malformed = |e: io::Error| CompileError::MalformedContainer(e.to_string());
        let mut archive = tar::Archive::new(GzDecoder::new(reader));
        let mut sched = None;
        let mut pkt_data = None;
        for entry in archive.entries().map_err(malformed)? {
            let mut entry = entry.map_err(malformed)?;
            let name = entry.path().map_err(malformed)?.to_string_lossy().into_owned();
            let mut blob = vec![];
            entry.read_to_end(&mut blob).map_err(malformed)?;
            match name.as_str() {
                SCHED_MEMBER => sched = Some(blob),
                PKT_DATA_MEMBER => pkt_data = Some(blob),
                other => log::warn!("Ignoring unexpected member {other}"),
            }
        }
        match (sched, pkt_data) {
            (Some(sched), Some(pkt_data)) => Ok(ContainerImage { sched, pkt_data }),
            (None, _) => Err(CompileError::MalformedContainer(format!("no {SCHED_MEMBER} member"))),
            (_, None) => Err(CompileError::MalformedContainer(format!(
                "no {PKT_DATA_MEMBER} member"
            ))),
        }
    }

    pub fn read(path: &Path) -> Result<ContainerImage> {
        let file = File::open(path)
            .map_err(|e| CompileError::MalformedContainer(format!("{}: {e}", path.display())))?;
        ContainerImage::read_archive(BufReader::new(file))
    }
}

/// A record read back from a schedule blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedRecord {
    pub relative_time_ns: u64,
    pub block_index: u32,
    pub length: u16,
}

impl DecodedRecord {
    fn decode(record: &[u8]) -> DecodedRecord {
        let time_low = u32::from_le_bytes([record[0], record[1], record[2], record[3]]) as u64;
        let time_high = record[4] as u64;
        DecodedRecord {
            relative_time_ns: (time_high << 32) | time_low,
            block_index: u32::from_le_bytes([record[8], record[9], record[10], record[11]]),
            length: u16::from_le_bytes([record[12], record[13]]),
        }
    }

    /// Byte offset of the packet in the packet-data image, up to the 256-byte granularity
    pub fn block_offset(&self) -> u64 {
        (self.block_index as u64) << 8
    }
}

/// A schedule blob read back. Occupied slots are the first `total_packets` ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleImage {
    pub total_packets: u32,
    pub total_batches: u32,
    pub batches: Vec<[Option<DecodedRecord>; BATCH_SIZE]>,
}

impl ScheduleImage {
    pub fn decode(blob: &[u8]) -> Result<ScheduleImage> {
        if blob.len() < HEADER_LEN {
            return Err(CompileError::MalformedContainer(format!(
                "schedule of {} bytes has no header",
                blob.len()
            )));
        }
        let total_packets = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]);
        let total_batches = u32::from_le_bytes([blob[4], blob[5], blob[6], blob[7]]);
        if total_batches as u64 != (total_packets as u64).div_ceil(BATCH_SIZE as u64) {
            return Err(CompileError::MalformedContainer(format!(
                "{total_packets} packets cannot fill {total_batches} batches"
            )));
        }
        let needed = if total_batches == 0 {
            HEADER_LEN
        } else {
            RECORDS_OFFSET + BATCH_LEN * total_batches as usize
        };
        if blob.len() < needed {
            return Err(CompileError::MalformedContainer(format!(
                "schedule truncated: {} bytes instead of {needed}",
                blob.len()
            )));
        }

        let mut batches = Vec::with_capacity(total_batches as usize);
        for b in 0..total_batches as usize {
            let start = RECORDS_OFFSET + b * BATCH_LEN;
            let mut slots = [None; BATCH_SIZE];
            for (i, record) in blob[start..start + BATCH_LEN]
                .chunks_exact(RECORD_LEN)
                .enumerate()
            {
                if b * BATCH_SIZE + i < total_packets as usize {
                    slots[i] = Some(DecodedRecord::decode(record));
                } else if record.iter().any(|&x| x != 0) {
                    return Err(CompileError::MalformedContainer(format!(
                        "padding slot {i} of batch {b} is not empty"
                    )));
                }
            }
            batches.push(slots);
        }
        Ok(ScheduleImage {
            total_packets,
            total_batches,
            batches,
        })
    }

    pub fn occupied(&self) -> usize {
        self.batches
            .iter()
            .map(|b| b.iter().filter(|s| s.is_some()).count())
            .sum()
    }
}
