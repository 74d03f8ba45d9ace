use crate::stage1::FlowStore;
use crate::structs::*;

use std::collections::HashSet;

/// All the packets of all the flows, in transmission order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalSchedule {
    entries: Vec<ScheduleEntry>,
}

impl GlobalSchedule {
    /// Timestamp of the first entry, i.e. the time origin of the replay
    pub fn origin(&self) -> Option<i64> {
        self.entries.first().map(|e| e.timestamp_ns)
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScheduleEntry> + '_ {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The packet referenced by an entry
    pub fn packet_id(&self, store: &FlowStore, entry: &ScheduleEntry) -> Option<PacketId> {
        store
            .flow(entry.flow)
            .and_then(|f| f.packets().get(entry.packet_index))
            .map(|(_, id)| *id)
    }

    /// Distinct packets in order of first appearance in the schedule.
    /// This is the visitation order used by the memory placement.
    pub fn distinct_packets(&self, store: &FlowStore) -> Vec<PacketId> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter_map(|e| self.packet_id(store, e))
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Log the schedule, one entry per line
    pub fn display(&self, store: &FlowStore) {
        for e in self.entries.iter() {
            if let Some(flow) = store.flow(e.flow) {
                log::debug!("{} flow {} #{}", e.timestamp_ns, flow.key, e.packet_index);
            }
        }
    }
}

/// Stage 2: merge every flow into one schedule sorted by (timestamp, flow creation order,
/// packet index). The key is unique per entry so the order is total.
pub fn build(store: &FlowStore) -> GlobalSchedule {
    log::trace!("Start S2");
    let mut entries: Vec<ScheduleEntry> = store
        .flows()
        .flat_map(|flow| {
            flow.packets()
                .iter()
                .enumerate()
                .map(move |(packet_index, (ts, _))| ScheduleEntry {
                    timestamp_ns: *ts,
                    flow: flow.index,
                    packet_index,
                })
        })
        .collect();
    entries.sort_unstable();
    log::trace!("S2 stops");
    GlobalSchedule { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn key(a: u8, b: u8) -> RawFlowKey {
        RawFlowKey::new(Ipv4Addr::new(10, 0, 0, a), Ipv4Addr::new(10, 0, 0, b), 1000, 80)
    }

    #[test]
    fn test_interleaved_flows() {
        let mut store = FlowStore::new();
        for ts in [5, 15, 25] {
            store.ingest(ts, key(3, 4), Packet::new(vec![0; 10])).unwrap();
        }
        for ts in [0, 10, 20] {
            store.ingest(ts, key(1, 2), Packet::new(vec![0; 10])).unwrap();
        }
        let schedule = build(&store);
        let ts: Vec<i64> = schedule.iter().map(|e| e.timestamp_ns).collect();
        assert_eq!(ts, vec![0, 5, 10, 15, 20, 25]);
        assert_eq!(schedule.origin(), Some(0));
        let flows: Vec<usize> = schedule.iter().map(|e| e.flow.0).collect();
        assert_eq!(flows, vec![1, 0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_ties() {
        let mut store = FlowStore::new();
        store.ingest(7, key(3, 4), Packet::new(vec![])).unwrap();
        store.ingest(7, key(1, 2), Packet::new(vec![])).unwrap();
        store.ingest(7, key(3, 4), Packet::new(vec![])).unwrap();
        let schedule = build(&store);
        let order: Vec<(usize, usize)> = schedule
            .iter()
            .map(|e| (e.flow.0, e.packet_index))
            .collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0)]);
        assert_eq!(build(&store), schedule);
    }

    #[test]
    fn test_empty() {
        let schedule = build(&FlowStore::new());
        assert!(schedule.is_empty());
        assert_eq!(schedule.origin(), None);
    }

    #[test]
    fn test_distinct_packets() {
        let mut store = FlowStore::new();
        let late = store.ingest(9, key(3, 4), Packet::new(vec![])).unwrap();
        let early = store.ingest(1, key(1, 2), Packet::new(vec![])).unwrap();
        let schedule = build(&store);
        assert_eq!(schedule.distinct_packets(&store), vec![early, late]);
    }
}
