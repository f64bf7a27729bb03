//! Capture inputs: a live interface, an offline capture file, or a remote
//! encapsulation listener. Each owns a reader thread once started and feeds
//! [`CapturedFrame`]s into the manager's channel; the manager never touches
//! a socket or file handle directly.

use std::fs::File;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pcap_file::pcap::PcapReader;
use sipgrep_core::{Error, Result};
use sipgrep_dissect::LinkType;
use tracing::{debug, info, warn};

/// A frame handed from a capture input to the manager's run loop. Link
/// frames still need the full link/IP/transport walk; encapsulated frames
/// already carry their own addressing and skip straight to the SIP/RTP
/// branch point (see [`sipgrep_dissect::chain::DissectorChain::process_hep`]).
pub enum CapturedFrame {
    Link {
        link_type: LinkType,
        timestamp_us: u64,
        bytes: Vec<u8>,
    },
    Encapsulated {
        timestamp_us: u64,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    Offline,
}

/// A source of [`CapturedFrame`]s (live interface, offline file, or remote
/// listener). `start` spawns the reader thread and returns immediately;
/// `stop` asks it to exit at the next read and does not block for it to do
/// so, mirroring the fire-and-forget shutdown the worker thread performs on
/// every input when the manager itself stops.
pub trait CaptureInput: Send {
    fn start(&mut self, tx: Sender<CapturedFrame>) -> Result<()>;
    fn stop(&mut self);
    fn filter(&mut self, expr: &str) -> Result<()>;
    fn mode(&self) -> Mode;
    fn total_size(&self) -> u64;
    fn loaded_size(&self) -> u64;
    fn is_active(&self) -> bool;
    fn name(&self) -> &str;
}

fn link_type_from_dlt(dlt: i32) -> LinkType {
    match dlt {
        1 => LinkType::Ethernet,
        113 => LinkType::LinuxSll,
        0 => LinkType::Loopback,
        _ => LinkType::Raw,
    }
}

fn link_type_from_datalink(dl: pcap_file::DataLink) -> LinkType {
    match dl {
        pcap_file::DataLink::ETHERNET => LinkType::Ethernet,
        pcap_file::DataLink::LINUX_SLL => LinkType::LinuxSll,
        pcap_file::DataLink::NULL => LinkType::Loopback,
        _ => LinkType::Raw,
    }
}

/// Promiscuous capture on a network interface via libpcap, with an
/// installable BPF filter. The open `pcap::Capture` is shared with the
/// reader thread behind a mutex so `filter` can be re-applied while the
/// capture is running.
pub struct LiveInput {
    device: String,
    capture: Option<Arc<Mutex<pcap::Capture<pcap::Active>>>>,
    pending_filter: Option<String>,
    running: Arc<AtomicBool>,
    loaded: Arc<AtomicU64>,
}

impl LiveInput {
    pub fn new(device: impl Into<String>) -> Self {
        LiveInput {
            device: device.into(),
            capture: None,
            pending_filter: None,
            running: Arc::new(AtomicBool::new(false)),
            loaded: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl CaptureInput for LiveInput {
    fn start(&mut self, tx: Sender<CapturedFrame>) -> Result<()> {
        let mut cap = pcap::Capture::from_device(self.device.as_str())
            .and_then(|c| c.promisc(true).immediate_mode(true).open())
            .map_err(|e| Error::InitFailure(e.to_string()))?;
        if let Some(expr) = &self.pending_filter {
            cap.filter(expr, true).map_err(|e| Error::InvalidFilter(e.to_string()))?;
        }
        let link_type = link_type_from_dlt(cap.get_datalink().0);
        let capture = Arc::new(Mutex::new(cap));
        self.capture = Some(capture.clone());

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let loaded = self.loaded.clone();
        let device = self.device.clone();

        thread::spawn(move || {
            info!(device = %device, "live capture started");
            while running.load(Ordering::SeqCst) {
                let next = capture.lock().unwrap().next_packet().map(|p| {
                    let ts_us = p.header.ts.tv_sec as u64 * 1_000_000 + p.header.ts.tv_usec as u64;
                    (ts_us, p.data.to_vec())
                });
                match next {
                    Ok((ts_us, bytes)) => {
                        loaded.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                        let frame = CapturedFrame::Link { link_type, timestamp_us: ts_us, bytes };
                        if tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(pcap::Error::TimeoutExpired) => continue,
                    Err(e) => {
                        warn!(device = %device, error = %e, "live capture read error, stopping");
                        break;
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
            info!(device = %device, "live capture stopped");
        });
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn filter(&mut self, expr: &str) -> Result<()> {
        self.pending_filter = Some(expr.to_string());
        if let Some(capture) = &self.capture {
            capture
                .lock()
                .unwrap()
                .filter(expr, true)
                .map_err(|e| Error::InvalidFilter(e.to_string()))?;
        }
        Ok(())
    }

    fn mode(&self) -> Mode {
        Mode::Live
    }

    fn total_size(&self) -> u64 {
        0
    }

    fn loaded_size(&self) -> u64 {
        self.loaded.load(Ordering::Relaxed)
    }

    fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.device
    }
}

/// A pcap/pcap-ng file replayed at its recorded timestamps' arrival order
/// (not wall-clock throttled — storage only cares about relative ordering).
/// Self-destroys at EOF: `is_active` goes false and the manager drops it
/// from its active set on the next poll.
pub struct OfflineInput {
    path: PathBuf,
    total_size: u64,
    running: Arc<AtomicBool>,
    started: AtomicBool,
    loaded: Arc<AtomicU64>,
}

impl OfflineInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        OfflineInput {
            path: path.into(),
            total_size: 0,
            running: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            loaded: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl CaptureInput for OfflineInput {
    fn start(&mut self, tx: Sender<CapturedFrame>) -> Result<()> {
        let file = File::open(&self.path).map_err(|e| Error::InitFailure(e.to_string()))?;
        self.total_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        let mut reader = PcapReader::new(file).map_err(|e| Error::CaptureFile(e.to_string()))?;
        let link_type = link_type_from_datalink(reader.header().datalink);

        self.running.store(true, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let loaded = self.loaded.clone();
        let path = self.path.clone();

        thread::spawn(move || {
            info!(path = %path.display(), "offline capture reading file");
            while running.load(Ordering::SeqCst) {
                match reader.next_packet() {
                    Some(Ok(pkt)) => {
                        loaded.fetch_add(pkt.data.len() as u64, Ordering::Relaxed);
                        let ts_us = pkt.timestamp.as_micros() as u64;
                        let frame = CapturedFrame::Link {
                            link_type,
                            timestamp_us: ts_us,
                            bytes: pkt.data.into_owned(),
                        };
                        if tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => debug!(path = %path.display(), error = %e, "malformed packet in capture file, skipping"),
                    None => {
                        info!(path = %path.display(), "offline capture reached end of file");
                        break;
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        });
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn filter(&mut self, _expr: &str) -> Result<()> {
        // Offline files have no attach-time filter hook; the manager's
        // display filter is what narrows an already-loaded file.
        Ok(())
    }

    fn mode(&self) -> Mode {
        Mode::Offline
    }

    fn total_size(&self) -> u64 {
        self.total_size
    }

    fn loaded_size(&self) -> u64 {
        self.loaded.load(Ordering::Relaxed)
    }

    fn is_active(&self) -> bool {
        !self.started.load(Ordering::SeqCst) || self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        self.path.to_str().unwrap_or("<offline>")
    }
}

/// Remote encapsulation input (§4.2): a UDP listener accepting HEP-wrapped
/// frames, forwarded as [`CapturedFrame::Encapsulated`] for
/// `DissectorChain::process_hep` to decapsulate.
pub struct RemoteInput {
    listen_addr: SocketAddr,
    running: Arc<AtomicBool>,
    loaded: Arc<AtomicU64>,
    address_filter: Arc<Mutex<Option<String>>>,
}

impl RemoteInput {
    pub fn new(listen_addr: SocketAddr) -> Self {
        RemoteInput {
            listen_addr,
            running: Arc::new(AtomicBool::new(false)),
            loaded: Arc::new(AtomicU64::new(0)),
            address_filter: Arc::new(Mutex::new(None)),
        }
    }
}

/// Not a BPF-capable input (the frame is already decapsulated by the time
/// any filter could apply), so the capture-side filter becomes a
/// case-insensitive substring match against the decoded source/destination
/// address text — the same predicate grammar's simplest clause, applied
/// post-hoc instead of compiled into a kernel filter.
fn passes_address_filter(filter: &Option<String>, bytes: &[u8]) -> bool {
    let Some(needle) = filter else { return true };
    let Some(hep) = sipgrep_dissect::hep::decode(bytes) else { return true };
    let haystack = format!("{} {}", hep.src, hep.dst);
    haystack.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
}

impl CaptureInput for RemoteInput {
    fn start(&mut self, tx: Sender<CapturedFrame>) -> Result<()> {
        let socket = UdpSocket::bind(self.listen_addr).map_err(|e| Error::InitFailure(e.to_string()))?;
        socket
            .set_read_timeout(Some(Duration::from_millis(200)))
            .map_err(|e| Error::InitFailure(e.to_string()))?;

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let loaded = self.loaded.clone();
        let listen_addr = self.listen_addr;
        let address_filter = self.address_filter.clone();

        thread::spawn(move || {
            info!(addr = %listen_addr, "remote encapsulation listener started");
            let mut buf = vec![0u8; 65_535];
            while running.load(Ordering::SeqCst) {
                match socket.recv(&mut buf) {
                    Ok(n) => {
                        loaded.fetch_add(n as u64, Ordering::Relaxed);
                        let bytes = &buf[..n];
                        if !passes_address_filter(&address_filter.lock().unwrap(), bytes) {
                            continue;
                        }
                        let ts_us = SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .map(|d| d.as_micros() as u64)
                            .unwrap_or(0);
                        let frame = CapturedFrame::Encapsulated {
                            timestamp_us: ts_us,
                            bytes: bytes.to_vec(),
                        };
                        if tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => continue,
                    Err(e) => {
                        warn!(addr = %listen_addr, error = %e, "remote listener read error, stopping");
                        break;
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
            info!(addr = %listen_addr, "remote encapsulation listener stopped");
        });
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn filter(&mut self, expr: &str) -> Result<()> {
        *self.address_filter.lock().unwrap() = Some(expr.to_string());
        Ok(())
    }

    fn mode(&self) -> Mode {
        Mode::Live
    }

    fn total_size(&self) -> u64 {
        0
    }

    fn loaded_size(&self) -> u64 {
        self.loaded.load(Ordering::Relaxed)
    }

    fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hep_chunk(type_id: u16, value: &[u8]) -> Vec<u8> {
        let mut c = Vec::new();
        c.extend_from_slice(&0u16.to_be_bytes());
        c.extend_from_slice(&type_id.to_be_bytes());
        c.extend_from_slice(&((6 + value.len()) as u16).to_be_bytes());
        c.extend_from_slice(value);
        c
    }

    fn hep_envelope(src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let mut chunks = Vec::new();
        chunks.extend(hep_chunk(0x0002, &[17]));
        chunks.extend(hep_chunk(0x0003, &src));
        chunks.extend(hep_chunk(0x0004, &dst));
        chunks.extend(hep_chunk(0x0007, &5060u16.to_be_bytes()));
        chunks.extend(hep_chunk(0x0008, &5060u16.to_be_bytes()));
        chunks.extend(hep_chunk(0x000f, b"INVITE sip:bob@x SIP/2.0\r\n\r\n"));

        let mut envelope = Vec::new();
        envelope.extend_from_slice(b"HEP3");
        envelope.extend_from_slice(&((6 + chunks.len()) as u16).to_be_bytes());
        envelope.extend(chunks);
        envelope
    }

    #[test]
    fn address_filter_matches_on_decoded_source_address() {
        let envelope = hep_envelope([10, 0, 0, 5], [10, 0, 0, 9]);
        assert!(passes_address_filter(&Some("10.0.0.5".into()), &envelope));
        assert!(!passes_address_filter(&Some("192.168.1.1".into()), &envelope));
    }

    #[test]
    fn no_filter_passes_everything() {
        let envelope = hep_envelope([10, 0, 0, 5], [10, 0, 0, 9]);
        assert!(passes_address_filter(&None, &envelope));
    }
}
