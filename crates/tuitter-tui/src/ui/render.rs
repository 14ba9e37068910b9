use chrono::Utc;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, AppState, Feed, MAX_POST_LENGTH};
use crate::utils::{format_age, truncate_string};

use super::styles;

const LOGO: [&str; 3] = [
    "   ╔╦╗╦ ╦╦╔╦╗╔╦╗╔═╗╦═╗",
    "    ║ ║ ║║ ║  ║ ║╣ ╠╦╝",
    "    ╩ ╚═╝╩ ╩  ╩ ╚═╝╩╚═",
];

pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2), // Title bar
            Constraint::Length(2), // Feed tabs
            Constraint::Min(5),    // Posts
            Constraint::Length(1), // Status bar
        ])
        .split(frame.area());

    render_title_bar(frame, app, chunks[0]);
    render_tabs(frame, app, chunks[1]);
    render_feed(frame, app, chunks[2]);
    render_status_bar(frame, app, chunks[3]);

    // Render overlays
    match app.state {
        AppState::Restoring | AppState::SigningIn => render_sign_in_overlay(frame, app),
        AppState::Composing => render_compose_overlay(frame, app),
        AppState::ShowingHelp => render_help_overlay(frame),
        AppState::ConfirmingQuit => render_quit_overlay(frame),
        AppState::Normal | AppState::Quitting => {}
    }
}

fn render_title_bar(frame: &mut Frame, app: &App, area: Rect) {
    let title = "  tuitter";
    let right = if app.is_authenticated() {
        format!("@{}  [?] Help", app.handle())
    } else {
        "[?] Help".to_string()
    };

    let title_line = Line::from(vec![
        Span::styled(title, styles::title_style()),
        Span::raw(" ".repeat(
            (area.width as usize).saturating_sub(title.len() + right.chars().count() + 2),
        )),
        Span::styled(right, styles::muted_style()),
    ]);

    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(styles::muted_style());

    frame.render_widget(Paragraph::new(title_line).block(block), area);
}

fn render_tabs(frame: &mut Frame, app: &App, area: Rect) {
    let tabs = [
        ("[1] Timeline", app.feed == Feed::Timeline),
        ("[2] Discover", app.feed == Feed::Discover),
    ];

    let mut spans = vec![Span::raw(" ")];
    for (i, (label, selected)) in tabs.iter().enumerate() {
        if i > 0 {
            spans.push(Span::styled(" | ", styles::muted_style()));
        }
        spans.push(Span::styled(*label, styles::tab_style(*selected)));
    }
    if app.loading {
        spans.push(Span::styled("   loading...", styles::highlight_style()));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_feed(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(styles::border_style(app.state == AppState::Normal));

    if app.posts.is_empty() {
        let message = if app.loading {
            "Loading posts..."
        } else if app.is_authenticated() {
            "No posts yet. Press [n] to write one."
        } else {
            "Not signed in."
        };
        let paragraph = Paragraph::new(Span::styled(message, styles::muted_style())).block(block);
        frame.render_widget(paragraph, area);
        return;
    }

    let now = Utc::now();
    let width = area.width.saturating_sub(4) as usize;
    let items: Vec<ListItem> = app
        .posts
        .iter()
        .map(|post| {
            let liked = if post.liked_by_user {
                Span::styled(format!("♥ {}", post.likes), styles::liked_style())
            } else {
                Span::styled(format!("♡ {}", post.likes), styles::muted_style())
            };
            let header = Line::from(vec![
                Span::styled(format!("@{}", post.author), styles::author_style()),
                Span::styled(
                    format!("  {}", format_age(post.timestamp, now)),
                    styles::muted_style(),
                ),
            ]);
            let body = Line::from(Span::styled(
                truncate_string(&post.content.replace('\n', " "), width),
                styles::list_item_style(),
            ));
            let footer = Line::from(vec![
                liked,
                Span::styled(
                    format!("   ↻ {}   ✎ {}", post.reposts, post.comments),
                    styles::muted_style(),
                ),
            ]);
            ListItem::new(vec![header, body, footer, Line::from("")])
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(styles::selected_style());
    let mut state = ListState::default().with_selected(Some(app.selection));
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let shortcuts = match app.state {
        AppState::Normal => "[n]ew | [l]ike | [r]efresh | [s]ign out | [q]uit",
        _ => "[q]uit",
    };

    let left_text = match app.status_message {
        Some(ref msg) => format!(" {} ", msg),
        None => String::new(),
    };
    let right_text = format!(" {} ", shortcuts);

    let padding_len = (area.width as usize)
        .saturating_sub(left_text.chars().count())
        .saturating_sub(right_text.len());
    let left_style = if left_text.contains("Error") {
        styles::error_style()
    } else {
        styles::muted_style()
    };
    let status_line = Line::from(vec![
        Span::styled(left_text, left_style),
        Span::raw(" ".repeat(padding_len)),
        Span::styled(right_text, styles::muted_style()),
    ]);
    frame.render_widget(
        Paragraph::new(status_line).style(styles::status_bar_style()),
        area,
    );
}

fn logo_lines() -> Vec<Line<'static>> {
    LOGO.iter()
        .map(|l| Line::from(Span::styled(*l, styles::title_style())))
        .collect()
}

fn render_sign_in_overlay(frame: &mut Frame, app: &App) {
    let height = if app.login_error.is_some() { 11 } else { 9 };
    let area = centered_rect_fixed(46, height, frame.area());
    frame.render_widget(Clear, area);

    let mut lines = logo_lines();
    lines.push(Line::from(""));

    if app.state == AppState::Restoring {
        lines.push(Line::from(Span::styled(
            "        Restoring your session...",
            styles::muted_style(),
        )));
    } else if app.login_in_progress() {
        lines.push(Line::from(Span::styled(
            "    Complete sign-in in your browser...",
            styles::highlight_style(),
        )));
    } else {
        lines.push(Line::from(vec![
            Span::raw("            ["),
            Span::styled(" ▶ Sign in ◀ ", styles::selected_style()),
            Span::raw("]"),
        ]));
        lines.push(Line::from(vec![
            Span::styled("        Press ", styles::muted_style()),
            Span::styled("Enter", styles::help_key_style()),
            Span::styled(" to continue", styles::muted_style()),
        ]));
    }

    if let Some(ref error) = app.login_error {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!(" {}", truncate_string(error, 42)),
            styles::error_style(),
        )));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(styles::border_style(true))
        .style(Style::default());
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_compose_overlay(frame: &mut Frame, app: &App) {
    let area = centered_rect_fixed(60, 10, frame.area());
    frame.render_widget(Clear, area);

    let remaining = MAX_POST_LENGTH.saturating_sub(app.compose_text.chars().count());
    let block = Block::default()
        .title(Span::styled(" New post ", styles::title_style()))
        .title_bottom(Line::from(vec![
            Span::styled(format!(" {} left ", remaining), styles::muted_style()),
            Span::styled(" Enter", styles::help_key_style()),
            Span::styled(" post ", styles::help_desc_style()),
            Span::styled(" Esc", styles::help_key_style()),
            Span::styled(" cancel ", styles::help_desc_style()),
        ]))
        .borders(Borders::ALL)
        .border_style(styles::border_style(true));

    let text = Line::from(vec![
        Span::styled(app.compose_text.as_str(), styles::list_item_style()),
        Span::styled("▌", styles::highlight_style()),
    ]);
    let paragraph = Paragraph::new(text).block(block).wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

fn render_help_overlay(frame: &mut Frame) {
    let area = centered_rect_fixed(46, 19, frame.area());
    frame.render_widget(Clear, area);

    let key = |k: &'static str, desc: &'static str| {
        Line::from(vec![
            Span::styled(format!("  {:<10}", k), styles::help_key_style()),
            Span::styled(desc, styles::help_desc_style()),
        ])
    };

    let mut lines = logo_lines();
    lines.push(Line::from(Span::styled(
        format!("          version {}", env!("CARGO_PKG_VERSION")),
        styles::muted_style(),
    )));
    lines.push(Line::from(""));
    lines.extend([
        key("1/2 Tab", "Timeline / Discover"),
        key("↑/↓ j/k", "Move selection"),
        key("PgUp/PgDn", "Scroll a page"),
        key("n", "New post"),
        key("l", "Like selected post"),
        key("r", "Refresh feed"),
        key("s", "Sign out"),
        key("q", "Quit"),
    ]);
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::styled("      Press ", styles::muted_style()),
        Span::styled("?", styles::help_key_style()),
        Span::styled(" or ", styles::muted_style()),
        Span::styled("Esc", styles::help_key_style()),
        Span::styled(" to close", styles::muted_style()),
    ]));

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(styles::border_style(true));
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_quit_overlay(frame: &mut Frame) {
    let area = centered_rect_fixed(46, 9, frame.area());
    frame.render_widget(Clear, area);

    let mut lines = logo_lines();
    lines.extend([
        Line::from(""),
        Line::from(Span::styled(
            "   Are you sure you want to quit?",
            styles::highlight_style(),
        )),
        Line::from(""),
        Line::from(vec![
            Span::styled("   Press ", styles::muted_style()),
            Span::styled("[Y]", styles::help_key_style()),
            Span::styled(" to quit, ", styles::muted_style()),
            Span::styled("[N]", styles::help_key_style()),
            Span::styled(" to cancel", styles::muted_style()),
        ]),
    ]);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(styles::border_style(true));
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

/// Create a centered rectangle with fixed dimensions
fn centered_rect_fixed(width: u16, height: u16, r: Rect) -> Rect {
    let x = r.x + (r.width.saturating_sub(width)) / 2;
    let y = r.y + (r.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width.min(r.width), height.min(r.height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_rect_fits_small_terminals() {
        let outer = Rect::new(0, 0, 30, 8);
        let rect = centered_rect_fixed(46, 10, outer);
        assert_eq!(rect, Rect::new(0, 0, 30, 8));

        let outer = Rect::new(0, 0, 100, 40);
        let rect = centered_rect_fixed(46, 10, outer);
        assert_eq!(rect, Rect::new(27, 15, 46, 10));
    }
}
