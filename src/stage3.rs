use crate::error::{CompileError, Result};
use crate::stage1::FlowStore;
use crate::stage2::GlobalSchedule;
use crate::structs::*;

use std::collections::HashMap;
use std::collections::HashSet;

/// How Large packets longer than one block are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementMode {
    /// A Large packet consumes as many 2048-byte blocks as needed
    #[default]
    Lenient,
    /// A Large packet must fit in a single block
    Strict,
}

/// The result of the memory placement: one placement per distinct packet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placements {
    by_packet: HashMap<PacketId, Placement>,
    /// (packet, placement, length) in allocation order
    allocations: Vec<(PacketId, Placement, usize)>,
    large_end: u64,
    small_end: u64,
}

impl Placements {
    pub fn get(&self, id: PacketId) -> Option<Placement> {
        self.by_packet.get(&id).copied()
    }

    /// The [start, end) addresses of a region. Large comes first.
    pub fn region_bounds(&self, region: Region) -> (u64, u64) {
        match region {
            Region::Large => (0, self.large_end),
            Region::Small => (self.large_end, self.small_end),
        }
    }

    /// Length of the packet-data image: end of the last byte of packet data
    pub fn image_len(&self) -> u64 {
        self.allocations
            .iter()
            .map(|(_, p, len)| p.offset + *len as u64)
            .max()
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PacketId, Placement)> + '_ {
        self.allocations.iter().map(|(id, p, _)| (*id, *p))
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn large_count(&self) -> usize {
        self.count(Region::Large)
    }

    pub fn small_count(&self) -> usize {
        self.count(Region::Small)
    }

    fn count(&self, region: Region) -> usize {
        self.allocations
            .iter()
            .filter(|(_, p, _)| p.region == region)
            .count()
    }
}

fn round_up(size: u64, block_size: u64) -> u64 {
    size.div_ceil(block_size) * block_size
}

/// Check that a packet can be described and, in strict mode, that it fits in one block
fn check_len(id: PacketId, len: usize, region: Region, mode: PlacementMode) -> Result<()> {
    if len > u16::MAX as usize {
        return Err(CompileError::PacketTooLarge {
            packet: id,
            len,
            limit: u16::MAX as u64,
        });
    }
    if mode == PlacementMode::Strict && len as u64 > region.max_single_block_len() {
        return Err(CompileError::PacketTooLarge {
            packet: id,
            len,
            limit: region.max_single_block_len(),
        });
    }
    Ok(())
}

/// Stage 3: give a region and an offset to each packet.
///
/// `ordered_packets` lists (packet, length) in visitation order; repeated packets are placed
/// once. All Large packets are placed first, in that order, starting at address 0, then all
/// Small packets right after the last Large block. Each packet gets `cursor + 64` and the cursor
/// moves by `len + 64` rounded up to the block size of its region.
pub fn resolve(ordered_packets: &[(PacketId, usize)], mode: PlacementMode) -> Result<Placements> {
    log::trace!("Start S3");
    // first pass: regions
    let mut seen = HashSet::new();
    let mut large = vec![];
    let mut small = vec![];
    for &(id, len) in ordered_packets {
        if !seen.insert(id) {
            continue;
        }
        let region = Region::for_len(len);
        check_len(id, len, region, mode)?;
        match region {
            Region::Large => large.push((id, len)),
            Region::Small => small.push((id, len)),
        }
    }

    // second pass: addresses
    let mut placements = Placements::default();
    let mut cursor = 0;
    for (region, packets) in [(Region::Large, large), (Region::Small, small)] {
        for (id, len) in packets {
            let placement = Placement {
                region,
                offset: cursor + Region::LEADING_GAP,
            };
            cursor += round_up(len as u64 + Region::LEADING_GAP, region.block_size());
            log::trace!("{id:?} in {region} region at {:#x}", placement.offset);
            placements.by_packet.insert(id, placement);
            placements.allocations.push((id, placement, len));
        }
        match region {
            Region::Large => placements.large_end = cursor,
            Region::Small => placements.small_end = cursor,
        }
    }
    log::trace!("S3 stops");
    Ok(placements)
}

/// Place every packet of the schedule, visiting them in order of first appearance
pub fn place(schedule: &GlobalSchedule, store: &FlowStore, mode: PlacementMode) -> Result<Placements> {
    let ordered: Vec<(PacketId, usize)> = schedule
        .distinct_packets(store)
        .into_iter()
        .filter_map(|id| store.packet(id).map(|p| (id, p.len())))
        .collect();
    resolve(&ordered, mode)
}
