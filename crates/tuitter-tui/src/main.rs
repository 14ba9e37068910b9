//! tuitter - a keyboard-driven terminal client for the tuitter social network.
//!
//! The binary owns the terminal and the `SessionClient`. It restores the
//! previous session in the background at startup and falls back to the
//! sign-in screen when no session can be restored.

mod app;
mod auth_command;
mod ui;
mod utils;

use std::io;
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tuitter_core::Config;

use app::{App, AppState};
use ui::input::handle_input;
use ui::render::render;

// ============================================================================
// Constants
// ============================================================================

/// Timeout for polling terminal events (in milliseconds)
const EVENT_POLL_TIMEOUT_MS: u64 = 100;

/// Log file written when `TUITTER_DEBUG` is set
const LOG_FILE: &str = "tuitter.log";

/// Initialize the tracing subscriber for logging.
///
/// The terminal belongs to the UI, so logs go to a file when `TUITTER_DEBUG`
/// is set and nowhere otherwise. `RUST_LOG` controls the level.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let log_dir = std::env::var_os("TUITTER_DEBUG")
        .and_then(|_| Config::data_dir().ok())
        .filter(|dir| std::fs::create_dir_all(dir).is_ok());

    match log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, LOG_FILE));
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::sink))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();
    info!("tuitter starting");

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            let mut config = Config::default();
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config
        }
    };
    let mut app = App::new(config)?;

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    app.start_restore();

    // Main loop
    let result = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
    }

    info!("tuitter shutting down");
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    loop {
        // Draw UI
        terminal.draw(|f| render(f, app))?;

        // Poll for events with timeout to allow background updates
        if event::poll(Duration::from_millis(EVENT_POLL_TIMEOUT_MS))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    // Ctrl+C to quit
                    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
                        return Ok(());
                    }

                    if handle_input(app, key) {
                        return Ok(());
                    }
                }
            }
        }

        // Check for completed background tasks
        app.check_background_tasks();

        // Check if we should quit
        if matches!(app.state, AppState::Quitting) {
            return Ok(());
        }
    }
}
