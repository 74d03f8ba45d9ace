use clap::{Parser, Subcommand};
use std::net::Ipv4Addr;

#[derive(Debug, Parser, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Compile a pcap file into a schedule and a packet-data image for the hardware generator
    Compile {
        #[arg(short, long, help = "Input pcap file")]
        input: String,
        #[arg(
            short,
            long,
            default_value = "pktgen.tgz",
            help = "Output container (gzip-compressed tar)"
        )]
        outfile: String,
        #[arg(short, long, default_value = None, help = "Path to the TOML configuration file")]
        config: Option<String>,
        #[arg(
            long,
            default_value_t = false,
            help = "Refuse Large packets that do not fit in a single 2048-byte block"
        )]
        strict: bool,
        #[arg(long, help = "Only keep the packets using this port (can be repeated)")]
        port: Vec<u16>,
        #[arg(long, help = "Only keep the packets from or to this host (can be repeated)")]
        host: Vec<Ipv4Addr>,
        #[arg(
            long,
            default_value_t = false,
            conflicts_with = "udp_only",
            help = "Only keep TCP packets"
        )]
        tcp_only: bool,
        #[arg(long, default_value_t = false, help = "Only keep UDP packets")]
        udp_only: bool,
    },
    /// Show the content of a container
    Inspect {
        #[arg(short, long, help = "Container to read")]
        input: String,
    },
    /// List the flows of a pcap file
    Flows {
        #[arg(short, long, help = "Input pcap file")]
        input: String,
        #[arg(short, long, default_value = None, help = "Path to the TOML configuration file")]
        config: Option<String>,
    },
}
