//! The four-stage pipeline tracker. Owns the canonical pipeline state,
//! enforces stage-dependency ordering and the one-outstanding-request rule,
//! and discards late responses from requests that already timed out or were
//! reset away.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

use crate::player::{PlaybackSource, PlayerError};
use crate::source::{format_size, AudioArtifact, PlaybackHandle};

/// Ordered pipeline stages. Ordering follows declaration order, so `max`
/// can be used for monotonic advancement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Stage {
    #[default]
    Idle,
    SourceReady,
    SequenceReady,
    MelodyReady,
    MidiReady,
}

impl Stage {
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::SourceReady => "Source ready",
            Self::SequenceReady => "Sequence ready",
            Self::MelodyReady => "Melody ready",
            Self::MidiReady => "MIDI ready",
        }
    }
}

/// The remote operations a ticket can be issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOp {
    Extract,
    Generate,
    Render,
    FullWorkflow,
    Record,
    Demo,
}

impl PipelineOp {
    pub fn label(self) -> &'static str {
        match self {
            Self::Extract => "extract sequence",
            Self::Generate => "generate melody",
            Self::Render => "convert to MIDI",
            Self::FullWorkflow => "full workflow",
            Self::Record => "record audio",
            Self::Demo => "create demo",
        }
    }
}

/// Identifies one outstanding request. Completions carrying a ticket that is
/// no longer current are discarded, which is what makes timed-out calls and
/// resets safe against late responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    id: u64,
    pub op: PipelineOp,
}

/// A successful remote result, shaped by which operation produced it.
#[derive(Debug, Clone)]
pub enum Outcome {
    Sequence(Vec<String>),
    Melody(String),
    MidiRendered,
    Workflow { sequence: Option<Vec<String>>, melody: Option<String> },
    Demo { sequence: Vec<String>, melody: String },
    Recorded { sequence: Vec<String> },
}

/// Marker that the worker's MIDI endpoints (`play-midi`, `download-midi`)
/// currently serve a rendered file. No bytes are held client-side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiHandle {
    pub rendered_at: DateTime<Utc>,
}

impl MidiHandle {
    fn new() -> Self {
        Self { rendered_at: Utc::now() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub kind: StatusKind,
    pub message: String,
}

impl StatusMessage {
    fn info(message: impl Into<String>) -> Self {
        Self { kind: StatusKind::Info, message: message.into() }
    }

    fn success(message: impl Into<String>) -> Self {
        Self { kind: StatusKind::Success, message: message.into() }
    }

    fn error(message: impl Into<String>) -> Self {
        Self { kind: StatusKind::Error, message: message.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub stage: Stage,
    pub audio: Option<AudioArtifact>,
    pub sequence: Option<Vec<String>>,
    pub melody: Option<String>,
    pub midi: Option<MidiHandle>,
    pub status: Option<StatusMessage>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("another pipeline request is still running")]
    Busy,
    #[error("{0}")]
    Precondition(&'static str),
}

/// Where the playable media for a playback source currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRef {
    LocalFile(PathBuf),
    /// Server-side recording, streamed via `get-recorded-audio`.
    RecordedStream,
    /// Rendered MIDI audio, streamed via `play-midi`.
    MidiStream,
}

#[derive(Debug, Default)]
pub struct Workflow {
    state: PipelineState,
    outstanding: Option<Ticket>,
    next_ticket: u64,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn is_busy(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Installs a freshly validated source. A new source always resets
    /// progress to `SourceReady` and invalidates every downstream artifact,
    /// whatever stage was reached before.
    pub fn select_source(&mut self, artifact: AudioArtifact) -> Result<(), WorkflowError> {
        if self.is_busy() {
            return Err(WorkflowError::Busy);
        }
        if let Some(previous) = self.state.audio.take() {
            previous.handle.release();
        }
        self.state.sequence = None;
        self.state.melody = None;
        self.state.midi = None;
        self.state.stage = Stage::SourceReady;
        self.state.status = Some(StatusMessage::info(format!(
            "Selected: {} ({})",
            artifact.file_name,
            format_size(artifact.size_bytes)
        )));
        self.state.audio = Some(artifact);
        Ok(())
    }

    /// Claims the single in-flight slot for `op`. Fails fast, before any
    /// network call, when a predecessor artifact is missing or another
    /// request is outstanding.
    pub fn begin(&mut self, op: PipelineOp) -> Result<Ticket, WorkflowError> {
        if self.is_busy() {
            return Err(WorkflowError::Busy);
        }
        self.check_precondition(op)?;

        self.next_ticket += 1;
        let ticket = Ticket { id: self.next_ticket, op };
        self.outstanding = Some(ticket);
        self.state.status = Some(StatusMessage::info(start_message(op)));
        debug!(ticket = ticket.id, op = op.label(), "pipeline request started");
        Ok(ticket)
    }

    fn check_precondition(&self, op: PipelineOp) -> Result<(), WorkflowError> {
        match op {
            PipelineOp::Extract | PipelineOp::FullWorkflow => {
                let uploadable =
                    self.state.audio.as_ref().is_some_and(AudioArtifact::is_uploadable);
                if !uploadable {
                    return Err(WorkflowError::Precondition(
                        "Please select an audio file first",
                    ));
                }
            }
            PipelineOp::Generate => {
                if self.state.sequence.is_none() {
                    return Err(WorkflowError::Precondition(
                        "Please extract start sequence first",
                    ));
                }
            }
            PipelineOp::Render => {
                if self.state.melody.is_none() {
                    return Err(WorkflowError::Precondition("Please generate melody first"));
                }
            }
            PipelineOp::Record | PipelineOp::Demo => {}
        }
        Ok(())
    }

    /// Applies a successful result. Returns false when the ticket is stale
    /// (timed out, failed, or reset away); stale results leave the state
    /// untouched.
    pub fn complete(&mut self, ticket: Ticket, outcome: Outcome) -> bool {
        if !self.settle(ticket) {
            return false;
        }
        match outcome {
            Outcome::Sequence(sequence) => {
                self.state.sequence = Some(sequence);
                self.advance_to(Stage::SequenceReady);
                self.state.status =
                    Some(StatusMessage::success("Start sequence extracted successfully!"));
            }
            Outcome::Melody(melody) => {
                self.state.melody = Some(melody);
                self.advance_to(Stage::MelodyReady);
                self.state.status = Some(StatusMessage::success("Melody generated successfully!"));
            }
            Outcome::MidiRendered => {
                self.state.midi = Some(MidiHandle::new());
                self.advance_to(Stage::MidiReady);
                self.state.status = Some(StatusMessage::success("MIDI file created successfully!"));
            }
            Outcome::Workflow { sequence, melody } => {
                let has_sequence = sequence.is_some();
                let has_melody = melody.is_some();
                if let Some(sequence) = sequence {
                    self.state.sequence = Some(sequence);
                }
                if let Some(melody) = melody {
                    self.state.melody = Some(melody);
                    // The workflow endpoint renders the MIDI as soon as a
                    // melody exists, so the handle is valid immediately.
                    self.state.midi = Some(MidiHandle::new());
                }
                self.advance_to(stage_for_artifacts(has_sequence, has_melody));
                self.state.status = Some(workflow_status(has_sequence, has_melody));
            }
            Outcome::Demo { sequence, melody } => {
                self.state.sequence = Some(sequence);
                self.state.melody = Some(melody);
                self.state.midi = Some(MidiHandle::new());
                self.advance_to(Stage::MidiReady);
                self.state.status = Some(StatusMessage::success(
                    "Demo created successfully! You can now play and download the sample melody.",
                ));
            }
            Outcome::Recorded { sequence } => {
                if let Some(previous) = self.state.audio.take() {
                    previous.handle.release();
                }
                self.state.audio = Some(AudioArtifact::recorded());
                self.state.sequence = Some(sequence);
                self.state.melody = None;
                self.state.midi = None;
                self.advance_to(Stage::SequenceReady);
                self.state.status =
                    Some(StatusMessage::success("Audio recorded and processed successfully!"));
            }
        }
        true
    }

    /// Records a failed or timed-out request. The stage does not move and
    /// the in-flight slot is freed so the user can retry manually. Returns
    /// false for stale tickets.
    pub fn fail(&mut self, ticket: Ticket, message: &str) -> bool {
        if !self.settle(ticket) {
            return false;
        }
        self.state.status = Some(StatusMessage::error(message));
        true
    }

    /// Returns unconditionally to `Idle`, discarding all artifacts,
    /// releasing the playback handle and invalidating any outstanding ticket.
    pub fn reset(&mut self) {
        if let Some(audio) = self.state.audio.take() {
            audio.handle.release();
        }
        self.state = PipelineState::default();
        self.outstanding = None;
    }

    /// Resolves a playback source against the current artifacts without
    /// touching any state.
    pub fn playback_media(&self, source: PlaybackSource) -> Result<MediaRef, PlayerError> {
        match source {
            PlaybackSource::Original => match self.state.audio.as_ref().map(|a| &a.handle) {
                Some(PlaybackHandle::Borrowed(path)) | Some(PlaybackHandle::Owned(path)) => {
                    Ok(MediaRef::LocalFile(path.clone()))
                }
                Some(PlaybackHandle::RemoteRecording) => Ok(MediaRef::RecordedStream),
                None => Err(PlayerError::NotAvailable(source)),
            },
            PlaybackSource::Generated => {
                if self.state.midi.is_some() {
                    Ok(MediaRef::MidiStream)
                } else {
                    Err(PlayerError::NotAvailable(source))
                }
            }
        }
    }

    /// Consumes the outstanding slot if `ticket` is still the current one.
    fn settle(&mut self, ticket: Ticket) -> bool {
        if self.outstanding != Some(ticket) {
            debug!(ticket = ticket.id, "discarding stale pipeline response");
            return false;
        }
        self.outstanding = None;
        true
    }

    fn advance_to(&mut self, target: Stage) {
        self.state.stage = self.state.stage.max(target);
    }
}

/// Pure partial-success policy for the combined workflow response: advance
/// exactly as far as the returned artifacts justify.
fn stage_for_artifacts(has_sequence: bool, has_melody: bool) -> Stage {
    if has_melody {
        Stage::MidiReady
    } else if has_sequence {
        Stage::SequenceReady
    } else {
        Stage::SourceReady
    }
}

fn workflow_status(has_sequence: bool, has_melody: bool) -> StatusMessage {
    if has_melody {
        StatusMessage::success("Workflow completed successfully!")
    } else if has_sequence {
        // Informational, not an error: extraction worked, generation did not
        // run; the user can trigger it manually.
        StatusMessage::info("Start sequence extracted; melody was not generated.")
    } else {
        StatusMessage::info("Workflow finished without returning artifacts.")
    }
}

fn start_message(op: PipelineOp) -> &'static str {
    match op {
        PipelineOp::Extract => "Extracting start sequence from audio...",
        PipelineOp::Generate => "Generating melody... This may take a few minutes.",
        PipelineOp::Render => "Converting to MIDI...",
        PipelineOp::FullWorkflow => "Processing audio and extracting start sequence...",
        PipelineOp::Record => "Recording audio... Please hum into your microphone for 5 seconds.",
        PipelineOp::Demo => "Creating demo melody...",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn wav_artifact() -> AudioArtifact {
        AudioArtifact {
            file_name: "song.wav".to_owned(),
            mime: Some("audio/wav".to_owned()),
            size_bytes: 2 * 1024 * 1024,
            handle: PlaybackHandle::Borrowed(PathBuf::from("/music/song.wav")),
        }
    }

    fn sequence() -> Vec<String> {
        vec!["C4".to_owned(), "E4".to_owned(), "G4".to_owned()]
    }

    #[test]
    fn manual_happy_path_walks_every_stage() {
        let mut workflow = Workflow::new();
        assert_eq!(workflow.state().stage, Stage::Idle);

        workflow.select_source(wav_artifact()).unwrap();
        assert_eq!(workflow.state().stage, Stage::SourceReady);
        let status = workflow.state().status.clone().unwrap();
        assert_eq!(status.kind, StatusKind::Info);
        assert_eq!(status.message, "Selected: song.wav (2.00 MB)");

        let ticket = workflow.begin(PipelineOp::Extract).unwrap();
        assert!(workflow.complete(ticket, Outcome::Sequence(sequence())));
        assert_eq!(workflow.state().stage, Stage::SequenceReady);

        let ticket = workflow.begin(PipelineOp::Generate).unwrap();
        assert!(workflow.complete(ticket, Outcome::Melody("C4 E4 G4 C5".to_owned())));
        assert_eq!(workflow.state().stage, Stage::MelodyReady);
        assert_eq!(workflow.state().melody.as_deref(), Some("C4 E4 G4 C5"));

        let ticket = workflow.begin(PipelineOp::Render).unwrap();
        assert!(workflow.complete(ticket, Outcome::MidiRendered));
        assert_eq!(workflow.state().stage, Stage::MidiReady);
        assert!(workflow.state().midi.is_some());
        assert_eq!(workflow.playback_media(PlaybackSource::Generated), Ok(MediaRef::MidiStream));
    }

    #[test]
    fn stage_never_decreases_through_pipeline_results() {
        let mut workflow = Workflow::new();
        workflow.select_source(wav_artifact()).unwrap();

        let ticket = workflow.begin(PipelineOp::FullWorkflow).unwrap();
        workflow.complete(
            ticket,
            Outcome::Workflow { sequence: Some(sequence()), melody: Some("C4 E4".to_owned()) },
        );
        assert_eq!(workflow.state().stage, Stage::MidiReady);

        // Re-running an earlier stage must not move the stage backwards.
        let ticket = workflow.begin(PipelineOp::Extract).unwrap();
        workflow.complete(ticket, Outcome::Sequence(sequence()));
        assert_eq!(workflow.state().stage, Stage::MidiReady);
    }

    #[test]
    fn generate_without_sequence_fails_fast() {
        let mut workflow = Workflow::new();
        let err = workflow.begin(PipelineOp::Generate).unwrap_err();
        assert_eq!(err, WorkflowError::Precondition("Please extract start sequence first"));
        // No ticket was issued, so nothing is in flight.
        assert!(!workflow.is_busy());
        assert_eq!(workflow.state().stage, Stage::Idle);
    }

    #[test]
    fn render_without_melody_fails_fast() {
        let mut workflow = Workflow::new();
        workflow.select_source(wav_artifact()).unwrap();
        let err = workflow.begin(PipelineOp::Render).unwrap_err();
        assert_eq!(err, WorkflowError::Precondition("Please generate melody first"));
    }

    #[test]
    fn extract_requires_a_local_audio_file() {
        let mut workflow = Workflow::new();
        assert_eq!(
            workflow.begin(PipelineOp::Extract).unwrap_err(),
            WorkflowError::Precondition("Please select an audio file first"),
        );

        // A server-side recording has no local bytes to upload either.
        let ticket = workflow.begin(PipelineOp::Record).unwrap();
        workflow.complete(ticket, Outcome::Recorded { sequence: sequence() });
        assert_eq!(
            workflow.begin(PipelineOp::Extract).unwrap_err(),
            WorkflowError::Precondition("Please select an audio file first"),
        );
    }

    #[test]
    fn single_flight_rejects_everything_while_outstanding() {
        let mut workflow = Workflow::new();
        workflow.select_source(wav_artifact()).unwrap();
        let ticket = workflow.begin(PipelineOp::Extract).unwrap();

        let stage_before = workflow.state().stage;
        assert_eq!(workflow.begin(PipelineOp::Extract).unwrap_err(), WorkflowError::Busy);
        assert_eq!(workflow.begin(PipelineOp::Demo).unwrap_err(), WorkflowError::Busy);
        assert_eq!(workflow.select_source(wav_artifact()).unwrap_err(), WorkflowError::Busy);
        assert_eq!(workflow.state().stage, stage_before);

        // The outstanding request itself still lands.
        assert!(workflow.complete(ticket, Outcome::Sequence(sequence())));
    }

    #[test]
    fn late_response_after_timeout_is_discarded() {
        let mut workflow = Workflow::new();
        workflow.select_source(wav_artifact()).unwrap();

        let ticket = workflow.begin(PipelineOp::Extract).unwrap();
        assert!(workflow.fail(ticket, "request timed out"));
        assert_eq!(workflow.state().status.as_ref().unwrap().kind, StatusKind::Error);
        assert!(!workflow.is_busy());

        // The transport delivers the answer anyway; it must not resurrect
        // stale state.
        assert!(!workflow.complete(ticket, Outcome::Sequence(sequence())));
        assert!(workflow.state().sequence.is_none());
        assert_eq!(workflow.state().stage, Stage::SourceReady);

        // And a duplicate failure report is ignored too.
        assert!(!workflow.fail(ticket, "late network error"));
    }

    #[test]
    fn reset_invalidates_outstanding_ticket() {
        let mut workflow = Workflow::new();
        workflow.select_source(wav_artifact()).unwrap();
        let ticket = workflow.begin(PipelineOp::Extract).unwrap();

        workflow.reset();
        assert_eq!(workflow.state().stage, Stage::Idle);
        assert!(workflow.state().audio.is_none());

        assert!(!workflow.complete(ticket, Outcome::Sequence(sequence())));
        assert_eq!(workflow.state().stage, Stage::Idle);
        assert!(workflow.state().sequence.is_none());
    }

    #[test]
    fn failure_frees_the_slot_for_a_manual_retry() {
        let mut workflow = Workflow::new();
        workflow.select_source(wav_artifact()).unwrap();
        let ticket = workflow.begin(PipelineOp::Extract).unwrap();
        workflow.fail(ticket, "network error: connection refused");

        let retry = workflow.begin(PipelineOp::Extract).unwrap();
        assert_ne!(retry, ticket);
        assert!(workflow.complete(retry, Outcome::Sequence(sequence())));
        assert_eq!(workflow.state().stage, Stage::SequenceReady);
    }

    #[test]
    fn new_source_clears_all_downstream_artifacts() {
        let mut workflow = Workflow::new();
        let ticket = workflow.begin(PipelineOp::Demo).unwrap();
        workflow.complete(
            ticket,
            Outcome::Demo { sequence: sequence(), melody: "A4 B4 A4".to_owned() },
        );
        assert_eq!(workflow.state().stage, Stage::MidiReady);

        workflow.select_source(wav_artifact()).unwrap();
        assert_eq!(workflow.state().stage, Stage::SourceReady);
        assert!(workflow.state().sequence.is_none());
        assert!(workflow.state().melody.is_none());
        assert!(workflow.state().midi.is_none());
        assert_eq!(
            workflow.playback_media(PlaybackSource::Generated),
            Err(PlayerError::NotAvailable(PlaybackSource::Generated)),
        );
    }

    #[test]
    fn demo_jumps_from_idle_to_midi_ready() {
        let mut workflow = Workflow::new();
        let ticket = workflow.begin(PipelineOp::Demo).unwrap();
        assert!(workflow.complete(
            ticket,
            Outcome::Demo {
                sequence: vec!["A4".to_owned(), "B4".to_owned()],
                melody: "A4 B4 A4".to_owned(),
            },
        ));

        assert_eq!(workflow.state().stage, Stage::MidiReady);
        assert!(workflow.state().audio.is_none());
        assert_eq!(workflow.playback_media(PlaybackSource::Generated), Ok(MediaRef::MidiStream));
        assert_eq!(
            workflow.playback_media(PlaybackSource::Original),
            Err(PlayerError::NotAvailable(PlaybackSource::Original)),
        );
    }

    #[test]
    fn partial_workflow_response_advances_to_sequence_only() {
        let mut workflow = Workflow::new();
        workflow.select_source(wav_artifact()).unwrap();
        let ticket = workflow.begin(PipelineOp::FullWorkflow).unwrap();

        workflow.complete(ticket, Outcome::Workflow { sequence: Some(sequence()), melody: None });

        assert_eq!(workflow.state().stage, Stage::SequenceReady);
        assert!(workflow.state().melody.is_none());
        assert!(workflow.state().midi.is_none());
        let status = workflow.state().status.clone().unwrap();
        assert_eq!(status.kind, StatusKind::Info);
        assert_eq!(status.message, "Start sequence extracted; melody was not generated.");
    }

    #[test]
    fn empty_workflow_response_does_not_advance() {
        let mut workflow = Workflow::new();
        workflow.select_source(wav_artifact()).unwrap();
        let ticket = workflow.begin(PipelineOp::FullWorkflow).unwrap();
        workflow.complete(ticket, Outcome::Workflow { sequence: None, melody: None });
        assert_eq!(workflow.state().stage, Stage::SourceReady);
        assert_eq!(workflow.state().status.as_ref().unwrap().kind, StatusKind::Info);
    }

    #[test]
    fn recording_skips_straight_to_sequence_ready() {
        let mut workflow = Workflow::new();
        let ticket = workflow.begin(PipelineOp::Record).unwrap();
        workflow.complete(ticket, Outcome::Recorded { sequence: sequence() });

        assert_eq!(workflow.state().stage, Stage::SequenceReady);
        assert!(workflow.state().audio.as_ref().is_some_and(|a| !a.is_uploadable()));
        assert_eq!(workflow.playback_media(PlaybackSource::Original), Ok(MediaRef::RecordedStream));
    }

    #[test]
    fn generate_start_status_mentions_the_wait() {
        let mut workflow = Workflow::new();
        let ticket = workflow.begin(PipelineOp::Record).unwrap();
        workflow.complete(ticket, Outcome::Recorded { sequence: sequence() });

        workflow.begin(PipelineOp::Generate).unwrap();
        assert_eq!(
            workflow.state().status.as_ref().unwrap().message,
            "Generating melody... This may take a few minutes.",
        );
    }
}
