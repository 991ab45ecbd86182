//! Exclusive control of the single audio sink. At most one of the two
//! playback sources may be audible at a time, and switching sources requires
//! an explicit stop first.

use anyhow::{Context, Result};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::{
    fmt,
    fs::File,
    io::{BufReader, Cursor},
    path::Path,
};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackSource {
    /// The audio the user selected or recorded.
    Original,
    /// The rendered audio of the generated MIDI, streamed from the worker.
    Generated,
}

impl fmt::Display for PlaybackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Original => write!(f, "original audio"),
            Self::Generated => write!(f, "generated MIDI"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlayerError {
    #[error("{0} is not available yet")]
    NotAvailable(PlaybackSource),
    #[error("already playing {0}; stop it first")]
    AlreadyPlaying(PlaybackSource),
    #[error("audio output error: {0}")]
    Output(String),
}

/// The guard that keeps the sink exclusive. Kept separate from the sink so
/// the rejection rules can be exercised without an audio device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackState {
    active: Option<PlaybackSource>,
    playing: bool,
}

impl PlaybackState {
    /// Claims the sink for `source`. Rejected while anything is playing;
    /// the caller must stop explicitly before switching.
    pub fn begin(&mut self, source: PlaybackSource) -> Result<(), PlayerError> {
        if self.playing {
            // active is always set while playing
            let active = self.active.unwrap_or(source);
            return Err(PlayerError::AlreadyPlaying(active));
        }
        self.active = Some(source);
        self.playing = true;
        Ok(())
    }

    /// Idempotent: stopping an idle sink is a no-op.
    pub fn stop(&mut self) {
        self.playing = false;
        self.active = None;
    }

    /// Natural end of stream; clears the playing flag whatever was active.
    pub fn ended(&mut self) {
        self.stop();
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn active(&self) -> Option<PlaybackSource> {
        self.active
    }
}

pub struct Player {
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sink: Option<Sink>,
    state: PlaybackState,
}

// OutputStream pins a platform handle that is never moved across threads
// after construction; the player lives behind a single controller mutex.
unsafe impl Send for Player {}
unsafe impl Sync for Player {}

impl Player {
    pub fn new() -> Result<Self> {
        let (stream, handle) =
            OutputStream::try_default().context("failed to open audio output")?;
        Ok(Self { _stream: stream, handle, sink: None, state: PlaybackState::default() })
    }

    pub fn play_file(&mut self, source: PlaybackSource, path: &Path) -> Result<(), PlayerError> {
        let mut next = self.state;
        next.begin(source)?;
        let file = File::open(path)
            .map_err(|err| PlayerError::Output(format!("failed to open {}: {err}", path.display())))?;
        let decoder = Decoder::new(BufReader::new(file))
            .map_err(|err| PlayerError::Output(format!("failed to decode audio: {err}")))?;
        let sink = self.new_sink()?;
        sink.append(decoder);
        sink.play();
        self.sink = Some(sink);
        self.state = next;
        Ok(())
    }

    pub fn play_bytes(&mut self, source: PlaybackSource, bytes: Vec<u8>) -> Result<(), PlayerError> {
        let mut next = self.state;
        next.begin(source)?;
        let decoder = Decoder::new(Cursor::new(bytes))
            .map_err(|err| PlayerError::Output(format!("failed to decode audio: {err}")))?;
        let sink = self.new_sink()?;
        sink.append(decoder);
        sink.play();
        self.sink = Some(sink);
        self.state = next;
        Ok(())
    }

    fn new_sink(&self) -> Result<Sink, PlayerError> {
        Sink::try_new(&self.handle)
            .map_err(|err| PlayerError::Output(format!("failed to create audio sink: {err}")))
    }

    pub fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.state.stop();
    }

    /// True while the sink still has queued audio.
    pub fn is_playing(&self) -> bool {
        self.state.is_playing() && self.sink.as_ref().map(|sink| !sink.empty()).unwrap_or(false)
    }

    /// Called by the playback monitor when the sink drains naturally.
    pub fn playback_finished(&mut self) {
        self.sink = None;
        self.state.ended();
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_while_other_source_active_is_rejected_not_overridden() {
        let mut state = PlaybackState::default();
        state.begin(PlaybackSource::Original).unwrap();

        let err = state.begin(PlaybackSource::Generated).unwrap_err();
        assert_eq!(err, PlayerError::AlreadyPlaying(PlaybackSource::Original));

        // Unchanged: the original source keeps the sink.
        assert!(state.is_playing());
        assert_eq!(state.active(), Some(PlaybackSource::Original));
    }

    #[test]
    fn switching_sources_requires_explicit_stop() {
        let mut state = PlaybackState::default();
        state.begin(PlaybackSource::Original).unwrap();
        state.stop();
        state.begin(PlaybackSource::Generated).unwrap();
        assert_eq!(state.active(), Some(PlaybackSource::Generated));
    }

    #[test]
    fn stop_is_idempotent() {
        let mut state = PlaybackState::default();
        state.stop();
        state.stop();
        assert!(!state.is_playing());
        assert!(state.active().is_none());
    }

    #[test]
    fn ended_clears_playing_for_any_source() {
        for source in [PlaybackSource::Original, PlaybackSource::Generated] {
            let mut state = PlaybackState::default();
            state.begin(source).unwrap();
            state.ended();
            assert!(!state.is_playing());
            assert!(state.active().is_none());
        }
    }

    #[test]
    fn playing_implies_an_active_source() {
        let mut state = PlaybackState::default();
        assert!(state.active().is_none());
        state.begin(PlaybackSource::Generated).unwrap();
        assert!(state.is_playing());
        assert!(state.active().is_some());
    }
}
