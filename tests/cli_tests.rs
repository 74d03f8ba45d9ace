use assert_cmd::prelude::*;
use pcap_file::pcap::{PcapPacket, PcapWriter};
use pnet_packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::MutableIpv4Packet;
use pnet_packet::tcp::MutableTcpPacket;
use predicates::str::contains;
use sha2::Digest;
use sha2::Sha256;
use std::fs::File;
use std::io;
use std::net::Ipv4Addr;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tempfile::tempdir;

fn tcp_frame(src: Ipv4Addr, dst: Ipv4Addr, sport: u16, dport: u16, payload: usize) -> Vec<u8> {
    let mut data = vec![0u8; 14 + 20 + 20 + payload];
    {
        let mut eth = MutableEthernetPacket::new(&mut data).unwrap();
        eth.set_ethertype(EtherTypes::Ipv4);
    }
    {
        let mut ip = MutableIpv4Packet::new(&mut data[14..]).unwrap();
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length((20 + 20 + payload) as u16);
        ip.set_ttl(64);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
        ip.set_source(src);
        ip.set_destination(dst);
    }
    {
        let mut tcp = MutableTcpPacket::new(&mut data[34..]).unwrap();
        tcp.set_source(sport);
        tcp.set_destination(dport);
        tcp.set_data_offset(5);
    }
    data
}

/// An HTTP exchange and a second connection, with packets of both regions
fn write_capture(path: &Path) {
    let client = Ipv4Addr::new(192, 168, 1, 10);
    let server = Ipv4Addr::new(10, 0, 0, 80);
    let frames = [
        (0, tcp_frame(client, server, 40000, 80, 0)),
        (100, tcp_frame(server, client, 80, 40000, 0)),
        (200, tcp_frame(client, server, 40000, 80, 100)),
        (250, tcp_frame(client, server, 40001, 443, 0)),
        (300, tcp_frame(server, client, 80, 40000, 1400)),
        (400, tcp_frame(server, client, 80, 40000, 1400)),
        (500, tcp_frame(client, server, 40000, 80, 0)),
        (600, tcp_frame(server, client, 443, 40001, 500)),
        (700, tcp_frame(client, server, 40001, 443, 0)),
    ];
    let file = File::create(path).unwrap();
    let mut writer = PcapWriter::new(file).unwrap();
    for (us, data) in frames.iter() {
        let ts = Duration::from_secs(1_700_000_000) + Duration::from_micros(*us);
        writer
            .write_packet(&PcapPacket::new(ts, data.len() as u32, data))
            .unwrap();
    }
}

fn sha256(path: &Path) -> Vec<u8> {
    let mut file = File::open(path).unwrap();
    let mut sha256 = Sha256::new();
    io::copy(&mut file, &mut sha256).unwrap();
    sha256.finalize().to_vec()
}

#[test]
fn deterministic_compilation() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let capture = dir.path().join("capture.pcap");
    write_capture(&capture);

    let mut hashes = vec![];
    for name in ["a.tgz", "b.tgz"] {
        let out = dir.path().join(name);
        let mut cmd = Command::cargo_bin("pktgen-compiler")?;
        cmd.arg("compile").arg("-i").arg(&capture).arg("-o").arg(&out);
        cmd.assert().success();
        hashes.push(sha256(&out));
    }
    assert_eq!(hashes[0], hashes[1]);
    Ok(())
}

#[test]
fn inspect_container() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let capture = dir.path().join("capture.pcap");
    let out = dir.path().join("pktgen.tgz");
    write_capture(&capture);

    Command::cargo_bin("pktgen-compiler")?
        .arg("compile")
        .arg("-i")
        .arg(&capture)
        .arg("-o")
        .arg(&out)
        .arg("--port")
        .arg("80")
        .assert()
        .success();
    // 6 packets on port 80: 2 Large (2 blocks) then 4 Small, the last at 4096 + 3 * 256 + 64
    Command::cargo_bin("pktgen-compiler")?
        .env("RUST_LOG", "info")
        .arg("inspect")
        .arg("-i")
        .arg(&out)
        .assert()
        .success()
        .stderr(contains("6 packets in 1 batches, 4982 bytes of packet data"))
        .stderr(contains("Batch 0"));
    Ok(())
}

#[test]
fn list_flows() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let capture = dir.path().join("capture.pcap");
    write_capture(&capture);

    Command::cargo_bin("pktgen-compiler")?
        .env("RUST_LOG", "info")
        .arg("flows")
        .arg("-i")
        .arg(&capture)
        .assert()
        .success()
        .stderr(contains("9 packets grouped into 2 flows"))
        .stderr(contains("flow 10.0.0.80:80 <-> 192.168.1.10:40000 6"))
        .stderr(contains("flow 10.0.0.80:443 <-> 192.168.1.10:40001 3"));
    Ok(())
}

#[test]
fn strict_mode_refuses_multi_block_packets() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let capture = dir.path().join("capture.pcap");
    let out = dir.path().join("pktgen.tgz");
    let client = Ipv4Addr::new(192, 168, 1, 10);
    let server = Ipv4Addr::new(10, 0, 0, 80);
    let jumbo = tcp_frame(server, client, 80, 40000, 3000);
    let mut writer = PcapWriter::new(File::create(&capture)?)?;
    writer.write_packet(&PcapPacket::new(Duration::from_secs(1), jumbo.len() as u32, &jumbo))?;
    drop(writer);

    Command::cargo_bin("pktgen-compiler")?
        .arg("compile")
        .arg("-i")
        .arg(&capture)
        .arg("-o")
        .arg(&out)
        .arg("--strict")
        .assert()
        .failure()
        .code(1);
    assert!(!out.exists());

    Command::cargo_bin("pktgen-compiler")?
        .arg("compile")
        .arg("-i")
        .arg(&capture)
        .arg("-o")
        .arg(&out)
        .assert()
        .success();
    assert!(out.exists());
    Ok(())
}

#[test]
fn missing_input() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    Command::cargo_bin("pktgen-compiler")?
        .arg("compile")
        .arg("-i")
        .arg(dir.path().join("nope.pcap"))
        .arg("-o")
        .arg(dir.path().join("out.tgz"))
        .assert()
        .failure()
        .code(1);
    Ok(())
}
