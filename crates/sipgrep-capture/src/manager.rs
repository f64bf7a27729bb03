//! Owns every attached input and output and runs the single serializer
//! loop that turns raw frames into stored calls: one reader thread per
//! input feeds a shared channel, and one worker thread drains it, decodes
//! each frame through the dissector chain, and appends the result to
//! storage. Keeping dissection and storage on one thread means `Storage`
//! never has to reason about concurrent writers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use sipgrep_core::Result;
use sipgrep_dissect::chain::DissectorChain;
use sipgrep_storage::Storage;
use tracing::{info, warn};

use crate::input::{CaptureInput, CapturedFrame, Mode};
use crate::output::CaptureOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Online,
    Offline,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Loading,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub source_kind: SourceKind,
    pub run_state: RunState,
}

struct ManagerState {
    inputs: Vec<Box<dyn CaptureInput>>,
    outputs: Vec<Box<dyn CaptureOutput>>,
}

pub struct CaptureManager {
    state: Mutex<ManagerState>,
    chain: DissectorChain,
    storage: Arc<Storage>,
    paused: Arc<AtomicBool>,
    tx: Mutex<Option<Sender<CapturedFrame>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureManager {
    pub fn new(storage: Arc<Storage>) -> Self {
        CaptureManager {
            state: Mutex::new(ManagerState {
                inputs: Vec::new(),
                outputs: Vec::new(),
            }),
            chain: DissectorChain::new(),
            storage,
            paused: Arc::new(AtomicBool::new(false)),
            tx: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn add_input(&self, mut input: Box<dyn CaptureInput>) -> Result<()> {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            input.start(tx.clone())?;
        }
        self.state.lock().unwrap().inputs.push(input);
        Ok(())
    }

    pub fn add_output(&self, output: Box<dyn CaptureOutput>) {
        self.state.lock().unwrap().outputs.push(output);
    }

    /// Starts every attached input and the worker thread that drains them.
    /// Inputs added after `start` are started immediately by `add_input`.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let (tx, rx) = channel::<CapturedFrame>();
        {
            let mut state = self.state.lock().unwrap();
            for input in state.inputs.iter_mut() {
                input.start(tx.clone())?;
            }
        }
        *self.tx.lock().unwrap() = Some(tx);

        let manager = self.clone();
        let handle = thread::spawn(move || {
            info!("capture worker loop started");
            while let Ok(frame) = rx.recv() {
                if manager.paused.load(Ordering::SeqCst) {
                    continue;
                }
                let packet = match frame {
                    CapturedFrame::Link { link_type, timestamp_us, bytes } => {
                        manager.chain.process(link_type, timestamp_us, bytes)
                    }
                    CapturedFrame::Encapsulated { timestamp_us, bytes } => {
                        manager.chain.process_hep(timestamp_us, &bytes)
                    }
                };
                if packet.message.is_none() {
                    continue;
                }
                manager.storage.append(&packet);
                let mut state = manager.state.lock().unwrap();
                for output in state.outputs.iter_mut() {
                    if let Err(e) = output.write(&packet) {
                        warn!(output = output.name(), error = %e, "capture output write failed");
                    }
                }
            }
            info!("capture worker loop stopped");
        });
        *self.worker.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stops every input's reader thread. The worker thread exits on its
    /// own once every input's sender clone has been dropped; this does not
    /// block waiting for that.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        for input in state.inputs.iter_mut() {
            input.stop();
        }
        *self.tx.lock().unwrap() = None;
    }

    pub fn set_filter(&self, expr: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for input in state.inputs.iter_mut() {
            input.filter(expr)?;
        }
        Ok(())
    }

    /// Hands a packet straight to the output stage, bypassing the input
    /// side entirely. Used by the CLI's `--replay` convenience path and by
    /// tests that want to exercise outputs without a live or file input.
    pub fn output_packet(&self, packet: &sipgrep_core::Packet) {
        let mut state = self.state.lock().unwrap();
        for output in state.outputs.iter_mut() {
            if let Err(e) = output.write(packet) {
                warn!(output = output.name(), error = %e, "capture output write failed");
            }
        }
    }

    pub fn pause(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn toggle_pause(&self) -> bool {
        let was = self.paused.fetch_xor(true, Ordering::SeqCst);
        !was
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Whether any attached input (live or offline) is still producing
    /// frames. The CLI's run loop uses this to know when an offline-only
    /// run has drained its file and it can exit without user intervention.
    pub fn any_active(&self) -> bool {
        self.state.lock().unwrap().inputs.iter().any(|i| i.is_active())
    }

    pub fn is_online(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .inputs
            .iter()
            .any(|i| i.mode() == Mode::Live && i.is_active())
    }

    /// 0..=100, averaged across offline inputs still loading. Live-only
    /// setups report 100 (there is no fixed amount of live input to load).
    pub fn load_progress(&self) -> u8 {
        let state = self.state.lock().unwrap();
        let offline: Vec<_> = state.inputs.iter().filter(|i| i.mode() == Mode::Offline).collect();
        if offline.is_empty() {
            return 100;
        }
        let total: u64 = offline.iter().map(|i| i.total_size()).sum();
        if total == 0 {
            return 100;
        }
        let loaded: u64 = offline.iter().map(|i| i.loaded_size()).sum();
        (((loaded.min(total) as f64 / total as f64) * 100.0).round()) as u8
    }

    pub fn status(&self) -> Status {
        let state = self.state.lock().unwrap();
        let has_live = state.inputs.iter().any(|i| i.mode() == Mode::Live);
        let has_offline = state.inputs.iter().any(|i| i.mode() == Mode::Offline);
        let source_kind = match (has_live, has_offline) {
            (true, true) => SourceKind::Mixed,
            (true, false) => SourceKind::Online,
            _ => SourceKind::Offline,
        };
        let still_loading = state
            .inputs
            .iter()
            .any(|i| i.mode() == Mode::Offline && i.is_active() && i.loaded_size() < i.total_size());
        drop(state);

        let run_state = if self.is_paused() {
            RunState::Paused
        } else if still_loading {
            RunState::Loading
        } else {
            RunState::Running
        };
        Status { source_kind, run_state }
    }

    /// `(accepted, skipped)` frame counts from the dissector chain, for a
    /// decode-summary view.
    pub fn dissect_stats(&self) -> (u64, u64) {
        (self.chain.stats().accepted(), self.chain.stats().skipped())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::CaptureOutput;
    use sipgrep_core::address::Transport;
    use sipgrep_core::{Address, Packet};
    use sipgrep_storage::StorageConfig;
    use std::sync::Mutex as StdMutex;

    struct RecordingOutput {
        seen: Arc<StdMutex<Vec<Vec<u8>>>>,
    }

    impl CaptureOutput for RecordingOutput {
        fn write(&mut self, packet: &Packet) -> Result<()> {
            self.seen.lock().unwrap().push(packet.raw.clone());
            Ok(())
        }
        fn name(&self) -> &str {
            "recording"
        }
    }

    #[test]
    fn output_packet_reaches_every_attached_output() {
        let storage = Arc::new(Storage::new(StorageConfig::default()));
        let manager = CaptureManager::new(storage);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        manager.add_output(Box::new(RecordingOutput { seen: seen.clone() }));

        let mut packet = Packet::new(0, b"hello".to_vec());
        packet.push_address(Address::new("10.0.0.1".parse().unwrap(), 5060, Transport::Udp));
        packet.push_address(Address::new("10.0.0.2".parse().unwrap(), 5060, Transport::Udp));
        manager.output_packet(&packet);

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn status_reports_offline_when_only_file_inputs_attached() {
        let storage = Arc::new(Storage::new(StorageConfig::default()));
        let manager = Arc::new(CaptureManager::new(storage));
        manager.add_input(Box::new(crate::input::OfflineInput::new("/nonexistent.pcap"))).ok();
        let status = manager.status();
        assert_eq!(status.source_kind, SourceKind::Offline);
    }
}
