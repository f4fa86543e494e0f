//! Timeshift buffering primitives
//!
//! A timeshift session writes one live stream into a local file while a
//! second pipeline plays the same file back. This module holds the pieces
//! that do not touch media pipelines:
//! - `TimeshiftBuffer`: lifecycle of the backing file
//! - `ReadinessPoller`: detects when the file holds enough data for playback
//! - `TimeshiftStateMachine`: authoritative state and legal transitions
//! - `Session`: the value tying a stream URL to its buffer
//! - `ScratchLease`: an engine's locked directory below the shared scratch root

pub mod buffer;
pub mod poller;
pub mod scratch;
pub mod session;
pub mod state;

pub use buffer::{BufferError, TimeshiftBuffer};
pub use poller::{PollRequest, ReadinessPoller, ReadinessSignal};
pub use scratch::{ScratchLease, sweep_stale_buffers};
pub use session::{Session, SessionId};
pub use state::{TimeshiftEvent, TimeshiftState, TimeshiftStateMachine};
