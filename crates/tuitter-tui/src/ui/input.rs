//! Keyboard input handling for the TUI.
//!
//! This module handles all keyboard events and translates them into
//! application state changes.

use crossterm::event::{KeyCode, KeyEvent};

use crate::app::{can_add_post_char, App, AppState, Feed, PAGE_SCROLL_SIZE};

/// Handle keyboard input. Returns true if the app should quit.
pub fn handle_input(app: &mut App, key: KeyEvent) -> bool {
    match app.state {
        AppState::Restoring => matches!(key.code, KeyCode::Char('q')),
        AppState::SigningIn => handle_sign_in_input(app, key),
        AppState::Composing => {
            handle_compose_input(app, key);
            false
        }
        AppState::ShowingHelp => {
            if matches!(key.code, KeyCode::Esc | KeyCode::Char('?') | KeyCode::Char('q')) {
                app.state = AppState::Normal;
            }
            false
        }
        AppState::ConfirmingQuit => match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                app.state = AppState::Quitting;
                true
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                app.state = AppState::Normal;
                false
            }
            _ => false,
        },
        AppState::Normal => {
            handle_normal_input(app, key);
            false
        }
        AppState::Quitting => true,
    }
}

fn handle_sign_in_input(app: &mut App, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Enter => {
            app.start_login();
            false
        }
        KeyCode::Char('q') | KeyCode::Esc => {
            app.state = AppState::Quitting;
            true
        }
        _ => false,
    }
}

fn handle_compose_input(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.compose_text.clear();
            app.state = AppState::Normal;
        }
        KeyCode::Enter => app.submit_post(),
        KeyCode::Backspace => {
            app.compose_text.pop();
        }
        KeyCode::Char(c) => {
            if can_add_post_char(app.compose_text.chars().count(), c) {
                app.compose_text.push(c);
            }
        }
        _ => {}
    }
}

fn handle_normal_input(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.state = AppState::ConfirmingQuit,
        KeyCode::Char('?') => app.state = AppState::ShowingHelp,

        // Feeds
        KeyCode::Char('1') => app.switch_feed(Feed::Timeline),
        KeyCode::Char('2') => app.switch_feed(Feed::Discover),
        KeyCode::Tab => app.switch_feed(app.feed.next()),

        // Navigation
        KeyCode::Down | KeyCode::Char('j') => app.select_next(1),
        KeyCode::Up | KeyCode::Char('k') => app.select_prev(1),
        KeyCode::PageDown => app.select_next(PAGE_SCROLL_SIZE),
        KeyCode::PageUp => app.select_prev(PAGE_SCROLL_SIZE),
        KeyCode::Home => app.selection = 0,

        // Actions
        KeyCode::Char('r') | KeyCode::Char('u') => {
            app.status_message = Some("Refreshing...".to_string());
            app.refresh_feed();
        }
        KeyCode::Char('n') => app.start_compose(),
        KeyCode::Char('l') => app.like_selected(),
        KeyCode::Char('s') => app.sign_out(),
        _ => {}
    }
}
