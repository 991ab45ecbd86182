use anyhow::{anyhow, Context, Result};
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{io, path::PathBuf, sync::Arc};
use tokio::{
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        Mutex,
    },
    time::{sleep, Duration as TokioDuration},
};
use tracing::{error, info};

mod api;
mod app;
mod config;
mod player;
mod source;
mod types;
mod ui;
mod workflow;

use app::{AppCommand, AppEvent, AppState, PipelineSnapshot};
use config::AppConfig;
use player::{PlaybackSource, Player};
use source::{format_size, SourceCandidate};
use workflow::{MediaRef, Outcome, PipelineOp, Ticket, Workflow};

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing()?;
    info!("starting melodist CLI");

    let config = AppConfig::load()?;
    let client = api::Client::new(config.api_url(), config.auth_token())?;

    let (event_tx, mut event_rx) = unbounded_channel();
    let (command_tx, command_rx) = unbounded_channel();

    let controller = Controller::new(client.clone(), event_tx.clone(), config.clone())?;
    controller.spawn(command_rx);

    let mut app_state = AppState::new();
    seed_health_status(&client, &mut app_state).await;
    seed_profile(&client, &config, &mut app_state).await;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    enable_raw_mode()?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    terminal.hide_cursor()?;

    let ui_result = ui::run(&mut terminal, &mut app_state, &mut event_rx, command_tx.clone());

    terminal.show_cursor()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;

    ui_result
}

async fn seed_health_status(client: &api::Client, app: &mut AppState) {
    match client.health().await {
        Ok(body) => {
            let detail = body.message.unwrap_or_default();
            let base_url = client.base_url().to_string();
            app.handle_event(AppEvent::Info(format!(
                "Worker health: {} {detail} @ {base_url}",
                body.status
            )));
        }
        Err(err) => {
            app.handle_event(AppEvent::Error(format!("Worker health check failed: {err}")));
        }
    }
}

/// The session context is decided once here and handed to the app as an
/// input; nothing else queries the token. A missing token or a failed fetch
/// both mean an anonymous session.
async fn seed_profile(client: &api::Client, config: &AppConfig, app: &mut AppState) {
    if config.auth_token().is_none() {
        app.handle_event(AppEvent::Info("Not signed in".to_owned()));
        return;
    }
    match client.fetch_profile().await {
        Ok(profile) => app.handle_event(AppEvent::ProfileLoaded(profile)),
        Err(err) => {
            info!("profile fetch failed, continuing anonymously: {err}");
            app.handle_event(AppEvent::Info("Not signed in".to_owned()));
        }
    }
}

fn setup_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err: Box<dyn std::error::Error + Send + Sync>| {
            anyhow!("failed to initialise tracing: {err}")
        })?;
    Ok(())
}

struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    client: api::Client,
    event_tx: UnboundedSender<AppEvent>,
    config: AppConfig,
    workflow: Mutex<Workflow>,
    player: Mutex<Player>,
}

impl Controller {
    fn new(
        client: api::Client,
        event_tx: UnboundedSender<AppEvent>,
        config: AppConfig,
    ) -> Result<Self> {
        let player = Player::new()?;
        let inner = ControllerInner {
            client,
            event_tx,
            config,
            workflow: Mutex::new(Workflow::new()),
            player: Mutex::new(player),
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    fn spawn(self, mut command_rx: UnboundedReceiver<AppCommand>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                if let Err(err) = Controller::handle_command(inner.clone(), command).await {
                    error!("command error: {err}");
                    let _ = inner.event_tx.send(AppEvent::Error(format!("{err}")));
                }
            }
        });
    }

    async fn handle_command(inner: Arc<ControllerInner>, command: AppCommand) -> Result<()> {
        match command {
            AppCommand::SelectFile { path } => Controller::select_file(inner, path).await,
            AppCommand::ExtractSequence => Controller::start_upload_op(inner, PipelineOp::Extract).await,
            AppCommand::RunFullWorkflow => {
                Controller::start_upload_op(inner, PipelineOp::FullWorkflow).await
            }
            AppCommand::GenerateMelody => Controller::generate_melody(inner).await,
            AppCommand::ConvertToMidi => Controller::convert_to_midi(inner).await,
            AppCommand::RecordAudio => Controller::record_audio(inner).await,
            AppCommand::CreateDemo => Controller::create_demo(inner).await,
            AppCommand::DownloadMidi => Controller::download_midi(inner).await,
            AppCommand::Play(source) => Controller::play(inner, source).await,
            AppCommand::StopPlayback => Controller::stop_playback(inner).await,
            AppCommand::Reset => Controller::reset(inner).await,
        }
    }

    async fn select_file(inner: Arc<ControllerInner>, path: PathBuf) -> Result<()> {
        let spool_dir = inner.config.artifact_dir().join("spool");
        let candidate = SourceCandidate::Picked { path };
        let selected = source::select_source(candidate, &spool_dir);

        let outcome = {
            let mut workflow = inner.workflow.lock().await;
            selected.map_err(|err| err.to_string()).and_then(|artifact| {
                workflow.select_source(artifact).map_err(|err| err.to_string())
            })
        };
        if let Err(message) = outcome {
            let _ = inner.event_tx.send(AppEvent::Error(message));
            return Ok(());
        }
        Controller::emit_snapshot(&inner).await;
        Ok(())
    }

    /// Extract and full-workflow both upload the selected file; they differ
    /// only in endpoint and in how the response advances the stage.
    async fn start_upload_op(inner: Arc<ControllerInner>, op: PipelineOp) -> Result<()> {
        let started = {
            let mut workflow = inner.workflow.lock().await;
            workflow.begin(op).map(|ticket| {
                let audio = workflow.state().audio.as_ref();
                let file_name = audio.map(|a| a.file_name.clone()).unwrap_or_default();
                let mime = audio.and_then(|a| a.mime.clone());
                let path = audio.and_then(|a| a.handle.local_path().map(|p| p.to_path_buf()));
                (ticket, file_name, mime, path)
            })
        };
        let (ticket, file_name, mime, path) = match started {
            Ok(parts) => parts,
            Err(err) => {
                let _ = inner.event_tx.send(AppEvent::Error(err.to_string()));
                return Ok(());
            }
        };
        Controller::emit_snapshot(&inner).await;

        tokio::spawn(async move {
            let result = match path {
                // begin() guarantees an uploadable source, but the file can
                // still vanish between selection and upload.
                None => Err("Please select an audio file first".to_owned()),
                Some(path) => match tokio::fs::read(&path).await {
                    Err(err) => Err(format!("failed to read {}: {err}", path.display())),
                    Ok(bytes) => match op {
                        PipelineOp::Extract => inner
                            .client
                            .extract_sequence(&file_name, mime.as_deref(), bytes)
                            .await
                            .map(Outcome::Sequence)
                            .map_err(|err| err.to_string()),
                        _ => inner
                            .client
                            .run_full_workflow(&file_name, mime.as_deref(), bytes)
                            .await
                            .map(|response| Outcome::Workflow {
                                sequence: response.start_sequence,
                                melody: response.melody,
                            })
                            .map_err(|err| err.to_string()),
                    },
                },
            };
            Controller::finish(inner, ticket, result).await;
        });
        Ok(())
    }

    async fn generate_melody(inner: Arc<ControllerInner>) -> Result<()> {
        let started = {
            let mut workflow = inner.workflow.lock().await;
            workflow
                .begin(PipelineOp::Generate)
                .map(|ticket| (ticket, workflow.state().sequence.clone().unwrap_or_default()))
        };
        let (ticket, sequence) = match started {
            Ok(parts) => parts,
            Err(err) => {
                let _ = inner.event_tx.send(AppEvent::Error(err.to_string()));
                return Ok(());
            }
        };
        Controller::emit_snapshot(&inner).await;

        tokio::spawn(async move {
            let result = inner
                .client
                .generate_melody(&sequence)
                .await
                .map(Outcome::Melody)
                .map_err(|err| err.to_string());
            Controller::finish(inner, ticket, result).await;
        });
        Ok(())
    }

    async fn convert_to_midi(inner: Arc<ControllerInner>) -> Result<()> {
        let started = {
            let mut workflow = inner.workflow.lock().await;
            workflow
                .begin(PipelineOp::Render)
                .map(|ticket| (ticket, workflow.state().melody.clone().unwrap_or_default()))
        };
        let (ticket, melody) = match started {
            Ok(parts) => parts,
            Err(err) => {
                let _ = inner.event_tx.send(AppEvent::Error(err.to_string()));
                return Ok(());
            }
        };
        Controller::emit_snapshot(&inner).await;

        tokio::spawn(async move {
            let result = inner
                .client
                .render_midi(&melody)
                .await
                .map(|()| Outcome::MidiRendered)
                .map_err(|err| err.to_string());
            Controller::finish(inner, ticket, result).await;
        });
        Ok(())
    }

    async fn record_audio(inner: Arc<ControllerInner>) -> Result<()> {
        let started = inner.workflow.lock().await.begin(PipelineOp::Record);
        let ticket = match started {
            Ok(ticket) => ticket,
            Err(err) => {
                let _ = inner.event_tx.send(AppEvent::Error(err.to_string()));
                return Ok(());
            }
        };
        Controller::emit_snapshot(&inner).await;

        tokio::spawn(async move {
            let result = inner
                .client
                .record_audio()
                .await
                .map(|sequence| Outcome::Recorded { sequence })
                .map_err(|err| err.to_string());
            Controller::finish(inner, ticket, result).await;
        });
        Ok(())
    }

    async fn create_demo(inner: Arc<ControllerInner>) -> Result<()> {
        let started = inner.workflow.lock().await.begin(PipelineOp::Demo);
        let ticket = match started {
            Ok(ticket) => ticket,
            Err(err) => {
                let _ = inner.event_tx.send(AppEvent::Error(err.to_string()));
                return Ok(());
            }
        };
        Controller::emit_snapshot(&inner).await;

        tokio::spawn(async move {
            let result = inner
                .client
                .create_demo()
                .await
                .map(|demo| Outcome::Demo { sequence: demo.start_sequence, melody: demo.melody })
                .map_err(|err| err.to_string());
            Controller::finish(inner, ticket, result).await;
        });
        Ok(())
    }

    /// Settles a spawned pipeline call against the state machine. Stale
    /// tickets are dropped silently; the machine already moved on.
    async fn finish(inner: Arc<ControllerInner>, ticket: Ticket, result: Result<Outcome, String>) {
        let applied = {
            let mut workflow = inner.workflow.lock().await;
            match result {
                Ok(outcome) => workflow.complete(ticket, outcome),
                Err(message) => workflow.fail(ticket, &message),
            }
        };
        if applied {
            Controller::emit_snapshot(&inner).await;
        }
    }

    /// Download is a plain fetch outside the single-flight slot; it never
    /// advances the stage and always re-fetches from the worker.
    async fn download_midi(inner: Arc<ControllerInner>) -> Result<()> {
        let midi_ready = inner.workflow.lock().await.state().midi.is_some();
        if !midi_ready {
            let _ = inner.event_tx.send(AppEvent::Error("Please create the MIDI file first".to_owned()));
            return Ok(());
        }

        let bytes = inner.client.fetch_midi_bytes().await.context("failed to download MIDI")?;
        let target = inner.config.artifact_dir().join("generated_melody.mid");
        let written = target.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = written.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create artifact dir {}", parent.display())
                })?;
            }
            std::fs::write(&written, &bytes)
                .with_context(|| format!("failed to write {}", written.display()))
        })
        .await
        .context("MIDI save task panicked")??;

        let _ = inner.event_tx.send(AppEvent::Info(format!("Saved MIDI to {}", target.display())));
        Ok(())
    }

    async fn play(inner: Arc<ControllerInner>, source: PlaybackSource) -> Result<()> {
        let media = inner.workflow.lock().await.playback_media(source);
        let media = match media {
            Ok(media) => media,
            Err(err) => {
                let _ = inner.event_tx.send(AppEvent::Error(err.to_string()));
                return Ok(());
            }
        };

        let played = match media {
            MediaRef::LocalFile(path) => {
                let mut player = inner.player.lock().await;
                player.play_file(source, &path)
            }
            MediaRef::RecordedStream => match inner.client.fetch_recorded_audio().await {
                Ok(bytes) => inner.player.lock().await.play_bytes(source, bytes),
                Err(err) => {
                    let _ = inner.event_tx.send(AppEvent::Error(err.to_string()));
                    return Ok(());
                }
            },
            MediaRef::MidiStream => match inner.client.fetch_midi_audio().await {
                Ok(bytes) => inner.player.lock().await.play_bytes(source, bytes),
                Err(err) => {
                    let _ = inner.event_tx.send(AppEvent::Error(err.to_string()));
                    return Ok(());
                }
            },
        };

        match played {
            Ok(()) => {
                Controller::spawn_playback_monitor(inner.clone());
                Controller::emit_snapshot(&inner).await;
            }
            Err(err) => {
                let _ = inner.event_tx.send(AppEvent::Error(err.to_string()));
            }
        }
        Ok(())
    }

    async fn stop_playback(inner: Arc<ControllerInner>) -> Result<()> {
        inner.player.lock().await.stop();
        Controller::emit_snapshot(&inner).await;
        Ok(())
    }

    async fn reset(inner: Arc<ControllerInner>) -> Result<()> {
        {
            let mut workflow = inner.workflow.lock().await;
            workflow.reset();
        }
        inner.player.lock().await.stop();
        let _ = inner.event_tx.send(AppEvent::Info("Session reset".to_owned()));
        Controller::emit_snapshot(&inner).await;
        Ok(())
    }

    fn spawn_playback_monitor(inner: Arc<ControllerInner>) {
        tokio::spawn(async move {
            loop {
                sleep(TokioDuration::from_millis(500)).await;
                let playing = {
                    let player = inner.player.lock().await;
                    player.is_playing()
                };
                if !playing {
                    inner.player.lock().await.playback_finished();
                    Controller::emit_snapshot(&inner).await;
                    break;
                }
            }
        });
    }

    async fn emit_snapshot(inner: &Arc<ControllerInner>) {
        let snapshot = {
            let workflow = inner.workflow.lock().await;
            let player = inner.player.lock().await;
            let state = workflow.state();
            PipelineSnapshot {
                stage: state.stage,
                busy: workflow.is_busy(),
                file_name: state.audio.as_ref().map(|a| a.file_name.clone()),
                file_size: state.audio.as_ref().map(|a| format_size(a.size_bytes)),
                sequence: state.sequence.clone(),
                melody: state.melody.clone(),
                midi_ready: state.midi.is_some(),
                status: state.status.clone(),
                playback: player.state(),
            }
        };
        let _ = inner.event_tx.send(AppEvent::Snapshot(snapshot));
    }
}
