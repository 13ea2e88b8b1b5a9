use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use std::collections::BTreeMap;
use std::io::{self, stdout};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use super::canvas;
use super::ViewState;
use crate::app::Simulator;
use crate::color::Rgb;
use crate::config::Config;
use crate::ipc::{self, IpcCommand};
use crate::scene::SceneController;

pub async fn run(config: Config, sim: Simulator, ipc_rx: mpsc::Receiver<IpcCommand>) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut sim = sim;
    let result = run_app(&mut terminal, &config, &mut sim, ipc_rx).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    sim.shutdown().await;
    result
}

/// Outcome of a key press.
#[derive(Debug, PartialEq, Eq)]
enum KeyAction {
    Quit,
    Continue,
}

fn handle_key(key: KeyEvent, view: &mut ViewState, scene: &mut SceneController) -> KeyAction {
    match key {
        KeyEvent {
            code: KeyCode::Char('q'),
            ..
        }
        | KeyEvent {
            code: KeyCode::Char('c'),
            modifiers: KeyModifiers::CONTROL,
            ..
        } => return KeyAction::Quit,
        KeyEvent {
            code: KeyCode::Char('l'),
            ..
        } => {
            view.show_labels = !view.show_labels;
        }
        KeyEvent {
            code: KeyCode::Char('s'),
            ..
        } => {
            view.show_stats = !view.show_stats;
        }
        KeyEvent {
            code: KeyCode::Char('c'),
            modifiers: KeyModifiers::NONE,
            ..
        } => {
            view.show_center = !view.show_center;
        }
        KeyEvent {
            code: KeyCode::Char('k'),
            ..
        } => {
            scene.toggle_locked();
        }
        _ => {}
    }
    KeyAction::Continue
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    config: &Config,
    sim: &mut Simulator,
    mut ipc_rx: mpsc::Receiver<IpcCommand>,
) -> Result<()> {
    let mut view = ViewState::new(&config.display);
    let frame_period = Duration::from_secs_f64(1.0 / config.display.fps.max(1) as f64);
    let mut ticker = tokio::time::interval(frame_period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        // Input never blocks the runtime, everything queued since the last frame is handled
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && handle_key(key, &mut view, &mut sim.scene) == KeyAction::Quit {
                    info!("Quit requested");
                    return Ok(());
                }
            }
        }

        while let Ok(cmd) = ipc_rx.try_recv() {
            ipc::process_ipc_command(cmd, sim, &mut view);
        }
        while let Ok(event) = sim.events.try_recv() {
            view.track(event);
        }

        // One snapshot per strand, shared by every fixture on it
        let strands: BTreeMap<u8, Vec<Rgb>> = sim
            .scene
            .address_map()
            .strands()
            .map(|(strand, _)| (strand, sim.store.snapshot(strand)))
            .collect();

        let status = view.show_stats.then(|| status_line(sim, &view));

        terminal.draw(|frame| {
            let area = frame.area();

            // Clear with reset background for terminal transparency support
            let block = ratatui::widgets::Block::default().style(Style::default().bg(Color::Reset));
            frame.render_widget(block, area);

            let scene_area = if status.is_some() {
                Rect::new(area.x, area.y + 1, area.width, area.height.saturating_sub(1))
            } else {
                area
            };
            canvas::draw_scene(
                frame.buffer_mut(),
                scene_area,
                sim.scene.scene(),
                &strands,
                &view,
            );

            if let Some(status) = &status {
                render_status(frame, area, status);
            }
        })?;
    }
}

fn status_line(sim: &Simulator, view: &ViewState) -> String {
    let stats = sim.stats();
    format!(
        " {}{} | {} ups | frames {} | rejected {} | fixtures {} | clients {} | [l]abels [s]tats [c]enter loc[k] [q]uit ",
        sim.scene.scene().name(),
        if sim.scene.is_locked() { " (locked)" } else { "" },
        sim.updates_per_second(),
        stats.frames(),
        stats.rejected(),
        sim.scene.fixtures().len(),
        view.clients,
    )
}

fn render_status(frame: &mut Frame, area: Rect, status: &str) {
    for (i, ch) in status.chars().enumerate() {
        if i < area.width as usize {
            let cell = frame.buffer_mut().cell_mut((area.x + i as u16, area.y));
            if let Some(cell) = cell {
                cell.set_char(ch);
                cell.set_fg(Color::DarkGray);
            }
        }
    }
}
