//! Capture outputs: a local file sink and a remote-encapsulation forwarder.
//! Both observe an accepted [`sipgrep_core::Packet`] without owning it.

use std::fs::File;
use std::io::BufWriter;
use std::net::UdpSocket;
use std::path::PathBuf;
use std::time::Duration;

use pcap_file::pcap::{PcapPacket, PcapWriter};
use sipgrep_core::{Error, Packet, Result};
use tracing::{debug, warn};

/// Encapsulation envelope version written on output. HEPv3's chunked form
/// is the one sensors in the wild expect a forwarder to emit; HEPv2 is
/// decode-only on the input side.
const HEP_OUTPUT_VENDOR: u16 = 0;

pub trait CaptureOutput: Send {
    fn write(&mut self, packet: &Packet) -> Result<()>;
    fn name(&self) -> &str;
}

/// Writes accepted packets to a pcap file, bit-identical to what a capture
/// tool reading the same interface would have recorded.
pub struct FileOutput {
    path: PathBuf,
    writer: PcapWriter<BufWriter<File>>,
}

impl FileOutput {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| Error::InitFailure(e.to_string()))?;
        let writer = PcapWriter::new(BufWriter::new(file)).map_err(|e| Error::CaptureFile(e.to_string()))?;
        Ok(FileOutput { path, writer })
    }
}

impl CaptureOutput for FileOutput {
    fn write(&mut self, packet: &Packet) -> Result<()> {
        let pcap_packet = PcapPacket::new(
            Duration::from_micros(packet.timestamp_us),
            packet.raw.len() as u32,
            &packet.raw,
        );
        self.writer
            .write_packet(&pcap_packet)
            .map_err(|e| Error::CaptureFile(e.to_string()))?;
        Ok(())
    }

    fn name(&self) -> &str {
        self.path.to_str().unwrap_or("<file output>")
    }
}

fn encode_hep_chunk(type_id: u16, value: &[u8]) -> Vec<u8> {
    let mut chunk = Vec::with_capacity(6 + value.len());
    chunk.extend_from_slice(&HEP_OUTPUT_VENDOR.to_be_bytes());
    chunk.extend_from_slice(&type_id.to_be_bytes());
    chunk.extend_from_slice(&((6 + value.len()) as u16).to_be_bytes());
    chunk.extend_from_slice(value);
    chunk
}

/// Encodes `packet` as a HEPv3 envelope: the newer of the two generations
/// the input side accepts, per the convention that a forwarder always
/// writes the envelope version it would itself prefer to receive.
fn encode_hep_v3(packet: &Packet) -> Option<Vec<u8>> {
    let src = packet.src()?;
    let dst = packet.dst()?;
    let proto: u8 = match src.transport() {
        sipgrep_core::Transport::Tcp | sipgrep_core::Transport::Tls => 6,
        _ => 17,
    };

    let mut chunks = Vec::new();
    chunks.extend(encode_hep_chunk(0x0002, &[proto]));
    match src.ip() {
        std::net::IpAddr::V4(ip) => {
            chunks.extend(encode_hep_chunk(0x0003, &ip.octets()));
            if let std::net::IpAddr::V4(dst_ip) = dst.ip() {
                chunks.extend(encode_hep_chunk(0x0004, &dst_ip.octets()));
            }
        }
        std::net::IpAddr::V6(ip) => {
            chunks.extend(encode_hep_chunk(0x0005, &ip.octets()));
            if let std::net::IpAddr::V6(dst_ip) = dst.ip() {
                chunks.extend(encode_hep_chunk(0x0006, &dst_ip.octets()));
            }
        }
    }
    chunks.extend(encode_hep_chunk(0x0007, &src.port().to_be_bytes()));
    chunks.extend(encode_hep_chunk(0x0008, &dst.port().to_be_bytes()));
    chunks.extend(encode_hep_chunk(0x000f, &packet.payload));

    let mut envelope = Vec::with_capacity(6 + chunks.len());
    envelope.extend_from_slice(b"HEP3");
    envelope.extend_from_slice(&((6 + chunks.len()) as u16).to_be_bytes());
    envelope.extend(chunks);
    Some(envelope)
}

/// Forwards accepted packets to a remote Homer-compatible collector.
pub struct RemoteOutput {
    socket: UdpSocket,
    target: std::net::SocketAddr,
}

impl RemoteOutput {
    pub fn connect(target: std::net::SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| Error::InitFailure(e.to_string()))?;
        Ok(RemoteOutput { socket, target })
    }
}

impl CaptureOutput for RemoteOutput {
    fn write(&mut self, packet: &Packet) -> Result<()> {
        let Some(envelope) = encode_hep_v3(packet) else {
            debug!("packet has no resolved addresses, skipping remote forward");
            return Ok(());
        };
        if let Err(e) = self.socket.send_to(&envelope, self.target) {
            warn!(target = %self.target, error = %e, "remote forward failed");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "remote"
    }
}
