//! Thin ratatui presenter. Renders snapshots pushed by the controller and
//! translates key presses into `AppCommand`s; it owns no pipeline state.

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Terminal,
};
use std::{path::PathBuf, time::Duration};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::app::{AppCommand, AppEvent, AppState, STEP_LABELS};
use crate::player::PlaybackSource;
use crate::workflow::StatusKind;

const HELP: &str = "o open file  w full workflow  e extract  g generate  m midi  r record  d demo\np play original  i play midi  s stop  S save midi  x reset  q quit";

pub fn run<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut AppState,
    event_rx: &mut UnboundedReceiver<AppEvent>,
    command_tx: UnboundedSender<AppCommand>,
) -> Result<()> {
    loop {
        while let Ok(event) = event_rx.try_recv() {
            app.handle_event(event);
        }

        terminal.draw(|frame| draw(frame, app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if app.entering_path {
                    match key.code {
                        KeyCode::Esc => {
                            app.entering_path = false;
                            app.input.clear();
                        }
                        KeyCode::Enter => {
                            let path = app.input.trim().to_owned();
                            app.entering_path = false;
                            app.input.clear();
                            if !path.is_empty() {
                                let _ = command_tx
                                    .send(AppCommand::SelectFile { path: PathBuf::from(path) });
                            }
                        }
                        KeyCode::Backspace => {
                            app.input.pop();
                        }
                        KeyCode::Char(c) => app.input.push(c),
                        _ => {}
                    }
                    continue;
                }
                match key.code {
                    KeyCode::Char('q') => break,
                    KeyCode::Char('o') => app.entering_path = true,
                    KeyCode::Char('w') => send(&command_tx, AppCommand::RunFullWorkflow),
                    KeyCode::Char('e') => send(&command_tx, AppCommand::ExtractSequence),
                    KeyCode::Char('g') => send(&command_tx, AppCommand::GenerateMelody),
                    KeyCode::Char('m') => send(&command_tx, AppCommand::ConvertToMidi),
                    KeyCode::Char('r') => send(&command_tx, AppCommand::RecordAudio),
                    KeyCode::Char('d') => send(&command_tx, AppCommand::CreateDemo),
                    KeyCode::Char('p') => send(&command_tx, AppCommand::Play(PlaybackSource::Original)),
                    KeyCode::Char('i') => send(&command_tx, AppCommand::Play(PlaybackSource::Generated)),
                    KeyCode::Char('s') => send(&command_tx, AppCommand::StopPlayback),
                    KeyCode::Char('S') => send(&command_tx, AppCommand::DownloadMidi),
                    KeyCode::Char('x') => send(&command_tx, AppCommand::Reset),
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

fn send(command_tx: &UnboundedSender<AppCommand>, command: AppCommand) {
    let _ = command_tx.send(command);
}

fn draw(frame: &mut ratatui::Frame, app: &AppState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(8), Constraint::Length(3)].as_ref())
        .split(frame.size());

    frame.render_widget(steps_bar(app), rows[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)].as_ref())
        .split(rows[1]);

    let results = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(4)].as_ref())
        .split(columns[0]);

    frame.render_widget(source_card(app), results[0]);
    frame.render_widget(results_card(app), results[1]);
    frame.render_widget(status_pane(app), columns[1]);

    if app.entering_path {
        let input = Paragraph::new(app.input.as_str()).block(
            Block::default()
                .title("Audio file path (Enter to select, Esc to cancel)")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        );
        frame.render_widget(input, rows[2]);
    } else {
        frame.render_widget(
            Paragraph::new(HELP).block(Block::default().title("Keys").borders(Borders::ALL)),
            rows[2],
        );
    }
}

fn steps_bar(app: &AppState) -> Paragraph<'static> {
    let completed = app.completed_steps();
    let mut spans = Vec::new();
    for (index, label) in STEP_LABELS.iter().enumerate() {
        let style = if index < completed {
            Style::default().fg(Color::Green)
        } else if index == completed {
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let marker = if index < completed { "[x]" } else { "[ ]" };
        spans.push(Span::styled(format!(" {marker} {}. {label} ", index + 1), style));
    }
    let busy = if app.snapshot.busy { " (working...)" } else { "" };
    Paragraph::new(Line::from(spans))
        .block(Block::default().title(format!("Pipeline{busy}")).borders(Borders::ALL))
}

fn source_card(app: &AppState) -> Paragraph<'static> {
    let snapshot = &app.snapshot;
    let mut lines = Vec::new();
    match (&snapshot.file_name, &snapshot.file_size) {
        (Some(name), Some(size)) => lines.push(Line::from(format!("{name} ({size})"))),
        _ => lines.push(Line::from("No audio selected — press 'o' or 'r'")),
    }
    if let Some(active) = snapshot.playback.active() {
        lines.push(Line::from(Span::styled(
            format!("Playing: {active}"),
            Style::default().fg(Color::Green),
        )));
    }
    Paragraph::new(lines).block(Block::default().title("Source").borders(Borders::ALL))
}

fn results_card(app: &AppState) -> Paragraph<'static> {
    let snapshot = &app.snapshot;
    let mut lines = Vec::new();
    if let Some(sequence) = &snapshot.sequence {
        lines.push(Line::from(Span::styled(
            "Start sequence",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(sequence.join(" ")));
    }
    if let Some(melody) = &snapshot.melody {
        lines.push(Line::from(Span::styled(
            "Generated melody",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(melody.clone()));
    }
    if snapshot.midi_ready {
        lines.push(Line::from(Span::styled(
            "MIDI file is ready for download and playback!",
            Style::default().fg(Color::Green),
        )));
    }
    if lines.is_empty() {
        lines.push(Line::from("Results will appear here."));
    }
    Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().title("Results").borders(Borders::ALL))
}

fn status_pane(app: &AppState) -> Paragraph<'static> {
    let mut lines: Vec<Line> = Vec::new();
    if let Some(profile) = &app.profile {
        lines.push(Line::from(format!("{} <{}>", profile.name, profile.email)));
    }
    if let Some(status) = &app.snapshot.status {
        let style = match status.kind {
            StatusKind::Info => Style::default().fg(Color::Cyan),
            StatusKind::Success => Style::default().fg(Color::Green),
            StatusKind::Error => Style::default().fg(Color::Red),
        };
        lines.push(Line::from(Span::styled(status.message.clone(), style)));
    }
    for line in &app.status_lines {
        lines.push(Line::from(line.clone()));
    }
    Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().title("Status").borders(Borders::ALL))
}
