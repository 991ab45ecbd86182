use std::path::PathBuf;

use crate::player::{PlaybackSource, PlaybackState};
use crate::types::Profile;
use crate::workflow::{Stage, StatusKind, StatusMessage};

const MAX_STATUS_LINES: usize = 8;

/// Labels of the four pipeline steps as shown in the stage indicator.
pub const STEP_LABELS: [&str; 4] =
    ["Upload Audio", "Extract Sequence", "Generate Melody", "Create MIDI"];

/// Read-only view of the orchestrator state, pushed to the presenter after
/// every mutation. The presenter never writes anything back except user
/// intents.
#[derive(Debug, Clone, Default)]
pub struct PipelineSnapshot {
    pub stage: Stage,
    pub busy: bool,
    pub file_name: Option<String>,
    pub file_size: Option<String>,
    pub sequence: Option<Vec<String>>,
    pub melody: Option<String>,
    pub midi_ready: bool,
    pub status: Option<StatusMessage>,
    pub playback: PlaybackState,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    Info(String),
    Error(String),
    Snapshot(PipelineSnapshot),
    ProfileLoaded(Profile),
}

/// User intents, emitted by the presenter and consumed by the controller.
#[derive(Debug, Clone)]
pub enum AppCommand {
    SelectFile { path: PathBuf },
    RecordAudio,
    ExtractSequence,
    GenerateMelody,
    ConvertToMidi,
    RunFullWorkflow,
    CreateDemo,
    DownloadMidi,
    Play(PlaybackSource),
    StopPlayback,
    Reset,
}

#[derive(Debug, Default)]
pub struct AppState {
    pub input: String,
    pub entering_path: bool,
    pub snapshot: PipelineSnapshot,
    pub profile: Option<Profile>,
    pub status_lines: Vec<String>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Info(message) => self.push_status_line(message),
            AppEvent::Error(message) => {
                self.push_status_line(format!("Error: {message}"));
            }
            AppEvent::Snapshot(snapshot) => {
                if let Some(status) = &snapshot.status {
                    if self.snapshot.status.as_ref() != Some(status) {
                        let line = match status.kind {
                            StatusKind::Error => format!("Error: {}", status.message),
                            _ => status.message.clone(),
                        };
                        self.push_status_line(line);
                    }
                }
                self.snapshot = snapshot;
            }
            AppEvent::ProfileLoaded(profile) => {
                self.push_status_line(format!("Signed in as {}", profile.name));
                self.profile = Some(profile);
            }
        }
    }

    pub fn push_status_line(&mut self, line: String) {
        self.status_lines.push(line);
        if self.status_lines.len() > MAX_STATUS_LINES {
            let overflow = self.status_lines.len() - MAX_STATUS_LINES;
            self.status_lines.drain(0..overflow);
        }
    }

    /// Which of the four step markers are completed, given the stage.
    pub fn completed_steps(&self) -> usize {
        self.snapshot.stage.index() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Stage;

    #[test]
    fn status_lines_are_bounded() {
        let mut app = AppState::new();
        for i in 0..(MAX_STATUS_LINES + 5) {
            app.push_status_line(format!("line {i}"));
        }
        assert_eq!(app.status_lines.len(), MAX_STATUS_LINES);
        assert_eq!(app.status_lines.first().unwrap(), "line 5");
    }

    #[test]
    fn snapshot_status_changes_are_logged_once() {
        let mut app = AppState::new();
        let mut snapshot = PipelineSnapshot {
            stage: Stage::SequenceReady,
            ..PipelineSnapshot::default()
        };
        snapshot.status = Some(StatusMessage {
            kind: StatusKind::Success,
            message: "Start sequence extracted successfully!".to_owned(),
        });

        app.handle_event(AppEvent::Snapshot(snapshot.clone()));
        app.handle_event(AppEvent::Snapshot(snapshot));

        assert_eq!(app.status_lines.len(), 1);
        assert_eq!(app.completed_steps(), 2);
    }

    #[test]
    fn error_events_are_prefixed() {
        let mut app = AppState::new();
        app.handle_event(AppEvent::Error("network error: refused".to_owned()));
        assert_eq!(app.status_lines.last().unwrap(), "Error: network error: refused");
    }
}
