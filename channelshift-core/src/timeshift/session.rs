//! One playback attempt for one channel

use chrono::{DateTime, Utc};
use url::Url;

use super::buffer::TimeshiftBuffer;

/// Engine-local identifier of a session.
///
/// Asynchronous signals carry the id of the session that produced them so
/// signals from a finished session can be recognised and dropped.
pub type SessionId = u64;

/// Live session state shared by both pipelines.
///
/// The buffer path is the only coupling between ingest and playback; both
/// configuration calls receive it from here.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    stream_url: Url,
    buffer: TimeshiftBuffer,
    started_at: DateTime<Utc>,
    playback_started_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Creates a session around an already created buffer
    pub fn new(id: SessionId, stream_url: Url, buffer: TimeshiftBuffer) -> Self {
        Self {
            id,
            stream_url,
            buffer,
            started_at: Utc::now(),
            playback_started_at: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn stream_url(&self) -> &Url {
        &self.stream_url
    }

    pub fn buffer(&self) -> &TimeshiftBuffer {
        &self.buffer
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn playback_started_at(&self) -> Option<DateTime<Utc>> {
        self.playback_started_at
    }

    /// Records the moment playback attached
    pub fn mark_playback_started(&mut self) {
        self.playback_started_at.get_or_insert_with(Utc::now);
    }

    /// Consumes the session and returns its buffer for deletion
    pub fn into_buffer(self) -> TimeshiftBuffer {
        self.buffer
    }
}
