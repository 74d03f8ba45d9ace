use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;

// Stage 0 structures

/// Transport protocol of a captured packet. Only used by the capture filter:
/// flow keys do not carry it.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum L4Proto {
    TCP,
    UDP,
}

impl Display for L4Proto {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            L4Proto::TCP => write!(f, "TCP"),
            L4Proto::UDP => write!(f, "UDP"),
        }
    }
}

/// The transport 4-tuple as it appears on the wire, before canonicalisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawFlowKey {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl RawFlowKey {
    pub fn new(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, src_port: u16, dst_port: u16) -> Self {
        RawFlowKey {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
        }
    }

    /// The same 4-tuple seen from the other endpoint
    pub fn reversed(&self) -> Self {
        RawFlowKey {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }
}

/// A packet delivered by the capture capability, already filtered.
/// `timestamp_ns` is relative to the first packet of the capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPacket {
    pub timestamp_ns: i64,
    pub key: RawFlowKey,
    pub data: Vec<u8>,
}

// Stage 1 structures

/// Canonical flow identifier: `ip_low <= ip_high`, each port stays attached to its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    pub ip_low: Ipv4Addr,
    pub ip_high: Ipv4Addr,
    pub port_low: u16,
    pub port_high: u16,
}

impl From<RawFlowKey> for FlowKey {
    /// Swap the (ip, port) pairs when the source address is numerically greater, or when both
    /// addresses are equal and the source port is greater.
    /// Ipv4Addr ordering is the big-endian numerical ordering of the octets.
    fn from(k: RawFlowKey) -> FlowKey {
        if k.src_ip > k.dst_ip || (k.src_ip == k.dst_ip && k.src_port > k.dst_port) {
            FlowKey {
                ip_low: k.dst_ip,
                ip_high: k.src_ip,
                port_low: k.dst_port,
                port_high: k.src_port,
            }
        } else {
            FlowKey {
                ip_low: k.src_ip,
                ip_high: k.dst_ip,
                port_low: k.src_port,
                port_high: k.dst_port,
            }
        }
    }
}

impl FlowKey {
    /// Whether one of the endpoints uses this port
    pub fn has_port(&self, port: u16) -> bool {
        self.port_low == port || self.port_high == port
    }
}

impl Display for FlowKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} <-> {}:{}",
            self.ip_low, self.port_low, self.ip_high, self.port_high
        )
    }
}

/// Identity of a packet. Two packets with the same bytes have different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketId(pub usize);

/// Creation order of a flow inside its store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowIndex(pub usize);

/// Immutable captured frame, replayed verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
}

impl Packet {
    pub fn new(data: Vec<u8>) -> Self {
        Packet { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// Stage 2 structures

/// One transmission event of the global schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub timestamp_ns: i64,
    pub flow: FlowIndex,
    pub packet_index: usize,
}

impl ScheduleEntry {
    fn sort_key(&self) -> (i64, FlowIndex, usize) {
        (self.timestamp_ns, self.flow, self.packet_index)
    }
}

/// Used to sort the global schedule: timestamp first, then flow creation order, then position
/// inside the flow
impl Ord for ScheduleEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for ScheduleEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Stage 3 structures

/// The two memory pools of the packet generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Small,
    Large,
}

impl Region {
    /// Largest packet stored in the Small region
    pub const SMALL_MAX_LEN: usize = 192;
    /// Gap left before each packet
    pub const LEADING_GAP: u64 = 64;

    pub fn for_len(len: usize) -> Region {
        if len <= Region::SMALL_MAX_LEN {
            Region::Small
        } else {
            Region::Large
        }
    }

    pub fn block_size(&self) -> u64 {
        match self {
            Region::Small => 256,
            Region::Large => 2048,
        }
    }

    /// Largest packet that fits in a single block
    pub fn max_single_block_len(&self) -> u64 {
        self.block_size() - Region::LEADING_GAP
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Region::Small => write!(f, "small"),
            Region::Large => write!(f, "large"),
        }
    }
}

/// Where the bytes of a packet live in the packet-data image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Placement {
    pub region: Region,
    pub offset: u64,
}

impl Placement {
    /// Offset in 256-byte units, as expected by the descriptors
    pub fn block_index(&self) -> u64 {
        self.offset >> 8
    }
}
