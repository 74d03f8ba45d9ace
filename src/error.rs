use crate::structs::{FlowIndex, FlowKey, PacketId};
use thiserror::Error;

/// Errors aborting a compilation. No container is left behind when one of them is returned.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Negative timestamp, or a timestamp going backward inside a flow
    #[error("Invalid timestamp {timestamp_ns} ns for flow {key}: {reason}")]
    InvalidTimestamp {
        key: FlowKey,
        timestamp_ns: i64,
        reason: &'static str,
    },

    #[error("Packet {packet:?} of {len} bytes does not fit (limit: {limit} bytes)")]
    PacketTooLarge {
        packet: PacketId,
        len: usize,
        limit: u64,
    },

    #[error("Schedule entry {index} references packet {packet:?} that has no placement")]
    MissingPlacement { index: usize, packet: PacketId },

    #[error("Schedule entry {index} references packet {packet_index} of flow {flow:?} that is not stored")]
    MissingPacket {
        index: usize,
        flow: FlowIndex,
        packet_index: usize,
    },

    /// Internal invariant violation, never caused by the input
    #[error("Batch {batch} received {count} entries (at most 8)")]
    BatchOverflow { batch: usize, count: usize },

    #[error("Relative timestamp {relative_ns} ns of schedule entry {index} does not fit in 40 bits")]
    TimestampOverflow { index: usize, relative_ns: u64 },

    #[error("Cannot write the container: {0}")]
    ContainerWrite(#[from] std::io::Error),

    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    #[error("The capture thread panicked")]
    CapturePanicked,

    #[error("Cannot read the capture: {0}")]
    Capture(#[from] pcap_file::PcapError),

    #[error("Cannot read the configuration file {path}: {source}")]
    ConfigRead {
        path: String,
        source: std::io::Error,
    },

    #[error("Ill-formed configuration file: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, CompileError>;
