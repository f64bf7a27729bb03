//! Capture inputs and outputs, and the manager that wires them into the
//! dissector chain and storage through a single worker thread. See
//! [`manager::CaptureManager`] for the entry point.

pub mod input;
pub mod manager;
pub mod output;

pub use input::{CaptureInput, CapturedFrame, LiveInput, Mode, OfflineInput, RemoteInput};
pub use manager::{CaptureManager, RunState, SourceKind, Status};
pub use output::{CaptureOutput, FileOutput, RemoteOutput};
