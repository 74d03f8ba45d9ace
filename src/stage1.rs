use crate::error::{CompileError, Result};
use crate::structs::*;

use crossbeam_channel::Receiver;
use std::collections::HashMap;

/// A bidirectional flow and its packets, in capture order
#[derive(Debug, Clone)]
pub struct Flow {
    pub key: FlowKey,
    pub index: FlowIndex,
    /// Script tag copied into every batch entry of this flow
    pub script: Option<u32>,
    packets: Vec<(i64, PacketId)>,
}

impl Flow {
    fn new(key: FlowKey, index: FlowIndex) -> Self {
        Flow {
            key,
            index,
            script: None,
            packets: vec![],
        }
    }

    /// (relative timestamp in ns, packet) pairs
    pub fn packets(&self) -> &[(i64, PacketId)] {
        &self.packets
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// Stage 1: groups the captured packets into flows.
///
/// Flows are kept in creation order, which is used as a tie-breaker when scheduling. Packets
/// are stored once in an arena and referenced by their `PacketId`.
#[derive(Debug, Default)]
pub struct FlowStore {
    flows: Vec<Flow>,
    index: HashMap<FlowKey, FlowIndex>,
    packets: Vec<Packet>,
}

impl FlowStore {
    pub fn new() -> Self {
        FlowStore::default()
    }

    /// Add a packet to the flow of `raw_key`, creating the flow if needed
    pub fn ingest(&mut self, timestamp_ns: i64, raw_key: RawFlowKey, packet: Packet) -> Result<PacketId> {
        let key = FlowKey::from(raw_key);
        if timestamp_ns < 0 {
            return Err(CompileError::InvalidTimestamp {
                key,
                timestamp_ns,
                reason: "negative timestamp",
            });
        }
        if let Some(flow) = self.index.get(&key).map(|i| &self.flows[i.0]) {
            if let Some((last_ts, _)) = flow.packets.last() {
                if *last_ts > timestamp_ns {
                    return Err(CompileError::InvalidTimestamp {
                        key,
                        timestamp_ns,
                        reason: "timestamp going backward inside the flow",
                    });
                }
            }
        }

        let id = PacketId(self.packets.len());
        self.packets.push(packet);
        let flow_index = match self.index.get(&key) {
            Some(i) => *i,
            None => {
                let i = FlowIndex(self.flows.len());
                log::trace!("New flow {key}");
                self.flows.push(Flow::new(key, i));
                self.index.insert(key, i);
                i
            }
        };
        self.flows[flow_index.0].packets.push((timestamp_ns, id));
        Ok(id)
    }

    /// All the flows, in creation order
    pub fn flows(&self) -> impl Iterator<Item = &Flow> + '_ {
        self.flows.iter()
    }

    pub fn get(&self, key: &FlowKey) -> Option<&Flow> {
        self.index.get(key).map(|i| &self.flows[i.0])
    }

    pub fn flow(&self, index: FlowIndex) -> Option<&Flow> {
        self.flows.get(index.0)
    }

    pub fn packet(&self, id: PacketId) -> Option<&Packet> {
        self.packets.get(id.0)
    }

    /// Attach a script tag to a flow. Returns false if the flow does not exist.
    pub fn set_script(&mut self, key: &FlowKey, tag: u32) -> bool {
        match self.index.get(key) {
            Some(i) => {
                self.flows[i.0].script = Some(tag);
                true
            }
            None => false,
        }
    }

    /// Number of flows
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    /// Log every flow with its packet count
    pub fn display(&self) {
        for f in self.flows.iter() {
            match f.script {
                Some(tag) => log::info!("flow {} {} (script {tag})", f.key, f.len()),
                None => log::info!("flow {} {}", f.key, f.len()),
            }
        }
    }
}

/// Build a flow store from an iterator of captured packets
pub fn run_vec(packets: impl IntoIterator<Item = CapturedPacket>) -> Result<FlowStore> {
    log::trace!("Start S1");
    let mut store = FlowStore::new();
    for p in packets {
        store.ingest(p.timestamp_ns, p.key, Packet::new(p.data))?;
    }
    log::trace!("S1 stops");
    Ok(store)
}

/// Build a flow store from the packets received on a channel. The store is complete when the
/// channel is closed.
pub fn run_channel(rx_s1: Receiver<Result<CapturedPacket>>) -> Result<FlowStore> {
    log::trace!("Start S1");
    let mut store = FlowStore::new();
    for p in rx_s1 {
        let p = p?;
        store.ingest(p.timestamp_ns, p.key, Packet::new(p.data))?;
    }
    log::trace!("S1 stops");
    Ok(store)
}
