use crate::config::CaptureFilter;
use crate::error::Result;
use crate::structs::*;
use crate::ui::Stats;

use crossbeam_channel::Sender;
use pcap_file::pcap::PcapReader;
use pcap_file::PcapError;
use pnet_packet::ethernet::{EtherTypes, EthernetPacket};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::tcp::TcpPacket;
use pnet_packet::udp::UdpPacket;
use pnet_packet::Packet as PnetPacket;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Stage 0: read a pcap file and produce the packets of interest with their raw 4-tuple.
///
/// Timestamps are made relative to the first frame of the file, whether that frame is
/// admitted or not.
pub struct CaptureReader<R: Read> {
    reader: PcapReader<R>,
    filter: CaptureFilter,
    first_ts: Option<Duration>,
    stats: Arc<Stats>,
}

impl CaptureReader<BufReader<File>> {
    pub fn open(path: &Path, filter: CaptureFilter, stats: Arc<Stats>) -> Result<Self> {
        let file_in = BufReader::new(File::open(path).map_err(PcapError::IoError)?);
        log::trace!("Reading {}", path.display());
        CaptureReader::new(file_in, filter, stats)
    }
}

impl<R: Read> CaptureReader<R> {
    pub fn new(reader: R, filter: CaptureFilter, stats: Arc<Stats>) -> Result<Self> {
        Ok(CaptureReader {
            reader: PcapReader::new(reader)?,
            filter,
            first_ts: None,
            stats,
        })
    }
}

impl<R: Read> Iterator for CaptureReader<R> {
    type Item = Result<CapturedPacket>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let packet = match self.reader.next_packet()? {
                Ok(packet) => packet,
                Err(e) => return Some(Err(e.into())),
            };
            self.stats.frame_read();
            let first_ts = *self.first_ts.get_or_insert(packet.timestamp);
            match flow_key_from_frame(&packet.data) {
                Some((proto, key)) if self.filter.admits(proto, &key) => {
                    let timestamp_ns = relative_ns(packet.timestamp, first_ts);
                    self.stats.packet_admitted(packet.data.len());
                    return Some(Ok(CapturedPacket {
                        timestamp_ns,
                        key,
                        data: packet.data.into_owned(),
                    }));
                }
                _ => self.stats.frame_skipped(),
            }
        }
    }
}

/// Signed difference in nanoseconds. Frames older than the first one get a negative value and
/// are refused later by the flow store.
fn relative_ns(ts: Duration, origin: Duration) -> i64 {
    if ts >= origin {
        (ts - origin).as_nanos() as i64
    } else {
        -((origin - ts).as_nanos() as i64)
    }
}

/// Extract the transport 4-tuple of an Ethernet/IPv4/{TCP,UDP} frame. Anything else is ignored.
pub fn flow_key_from_frame(data: &[u8]) -> Option<(L4Proto, RawFlowKey)> {
    let eth_packet = EthernetPacket::new(data)?;
    if eth_packet.get_ethertype() != EtherTypes::Ipv4 {
        return None;
    }
    let ip_packet = Ipv4Packet::new(eth_packet.payload())?;
    let src_ip = ip_packet.get_source();
    let dst_ip = ip_packet.get_destination();

    match ip_packet.get_next_level_protocol() {
        IpNextHeaderProtocols::Tcp => {
            let tcp_packet = TcpPacket::new(ip_packet.payload())?;
            Some((
                L4Proto::TCP,
                RawFlowKey::new(
                    src_ip,
                    dst_ip,
                    tcp_packet.get_source(),
                    tcp_packet.get_destination(),
                ),
            ))
        }
        IpNextHeaderProtocols::Udp => {
            let udp_packet = UdpPacket::new(ip_packet.payload())?;
            Some((
                L4Proto::UDP,
                RawFlowKey::new(
                    src_ip,
                    dst_ip,
                    udp_packet.get_source(),
                    udp_packet.get_destination(),
                ),
            ))
        }
        _ => None,
    }
}

/// Read the capture and send the packets progressively to a channel.
/// Reading stops at the first error, which is sent along so the receiver can abort.
pub fn run_channel(
    reader: impl Iterator<Item = Result<CapturedPacket>>,
    tx_s0: Sender<Result<CapturedPacket>>,
) {
    log::trace!("Start S0");
    for packet in reader {
        let failed = packet.is_err();
        if tx_s0.send(packet).is_err() || failed {
            break;
        }
    }
    log::trace!("S0 stops");
}
