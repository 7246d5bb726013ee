use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::io::stdout;

use crate::db::Database;
use crate::models::{ApplicationRecord, ApplicationStatus};

const TITLE_WIDTH: usize = 35;
const WRAP_WIDTH: usize = 70;

struct AppState {
    records: Vec<ApplicationRecord>,
    selected: usize,
    scroll_offset: u16,
    message: Option<String>,
}

impl AppState {
    fn new(records: Vec<ApplicationRecord>) -> Self {
        Self {
            records,
            selected: 0,
            scroll_offset: 0,
            message: None,
        }
    }

    fn current(&self) -> Option<&ApplicationRecord> {
        self.records.get(self.selected)
    }

    fn next(&mut self) {
        if !self.records.is_empty() && self.selected < self.records.len() - 1 {
            self.selected += 1;
            self.scroll_offset = 0;
        }
    }

    fn prev(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.scroll_offset = 0;
        }
    }

    fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(3);
    }

    fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(3);
    }

    /// Persist the new status, then reload the record so timestamps show.
    fn set_status(&mut self, db: &Database, status: ApplicationStatus) {
        let Some(id) = self.current().map(|r| r.id) else { return };
        self.message = match db.set_status(id, status).and_then(|_| db.get_record(id)) {
            Ok(Some(updated)) => {
                self.records[self.selected] = updated;
                Some(format!("#{} marked {}", id, status))
            }
            Ok(None) => Some(format!("#{} no longer exists", id)),
            Err(e) => Some(format!("#{}: {:#}", id, e)),
        };
    }
}

pub fn run_browse(db: &Database, status: Option<ApplicationStatus>) -> Result<()> {
    let records = db.list_records(status)?;
    if records.is_empty() {
        println!("No applications found.");
        return Ok(());
    }

    let mut state = AppState::new(records);

    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut state, db);

    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &mut AppState,
    db: &Database,
) -> Result<()> {
    let mut list_state = ListState::default();
    list_state.select(Some(0));

    loop {
        terminal.draw(|frame| draw(frame, state, &mut list_state))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Down | KeyCode::Char('j') => state.next(),
                KeyCode::Up | KeyCode::Char('k') => state.prev(),
                KeyCode::Char('J') | KeyCode::PageDown => state.scroll_down(),
                KeyCode::Char('K') | KeyCode::PageUp => state.scroll_up(),
                KeyCode::Char('a') => state.set_status(db, ApplicationStatus::Applied),
                KeyCode::Char('p') => state.set_status(db, ApplicationStatus::Pending),
                KeyCode::Char('f') => state.set_status(db, ApplicationStatus::Failed),
                _ => {}
            }
            list_state.select(Some(state.selected));
        }
    }
    Ok(())
}

fn status_marker(status: ApplicationStatus) -> &'static str {
    match status {
        ApplicationStatus::Found => " ",
        ApplicationStatus::Pending => "!",
        ApplicationStatus::Applied => "+",
        ApplicationStatus::Failed => "x",
    }
}

fn status_style(status: ApplicationStatus) -> Style {
    match status {
        ApplicationStatus::Found => Style::default().fg(Color::Green),
        ApplicationStatus::Pending => Style::default().fg(Color::Yellow),
        ApplicationStatus::Applied => Style::default().fg(Color::Cyan),
        ApplicationStatus::Failed => Style::default().fg(Color::Red),
    }
}

pub(crate) fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let head: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn draw(frame: &mut Frame, state: &AppState, list_state: &mut ListState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(frame.area());

    let items: Vec<ListItem> = state
        .records
        .iter()
        .map(|r| {
            ListItem::new(format!(
                "{} #{:<4} {} | {}",
                status_marker(r.status),
                r.id,
                truncate(&r.title, TITLE_WIDTH),
                r.company
            ))
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Applications ({}) ", state.records.len())),
        )
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, chunks[0], list_state);

    let detail = Paragraph::new(build_detail(state))
        .block(Block::default().borders(Borders::ALL).title(" Detail "))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));
    frame.render_widget(detail, chunks[1]);

    let help_area = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(frame.area());

    let footer = match &state.message {
        Some(message) => format!(" {}", message),
        None => " j/k:navigate  J/K:scroll  a:applied p:pending f:failed  q:quit".to_string(),
    };
    let help = Paragraph::new(footer).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, help_area[1]);
}

fn build_detail(state: &AppState) -> Text<'_> {
    let Some(record) = state.current() else {
        return Text::raw("No application selected");
    };

    let mut lines: Vec<Line> = Vec::new();
    let bold = Style::default().add_modifier(Modifier::BOLD);

    lines.push(Line::from(Span::styled(record.title.as_str(), bold)));
    lines.push(Line::from(format!("at {}", record.company)));
    lines.push(Line::from(Span::styled(
        format!("Status: {}", record.status),
        status_style(record.status),
    )));
    lines.push(Line::from(format!("URL: {}", record.url)));
    if let Some(location) = &record.location {
        lines.push(Line::from(format!("Location: {}", location)));
    }
    if let Some(source) = &record.source {
        lines.push(Line::from(format!("Source: {}", source)));
    }
    lines.push(Line::from(format!("Found: {}", record.created_at)));
    if let Some(at) = &record.applied_at {
        lines.push(Line::from(format!("Applied: {}", at)));
    }
    lines.push(Line::from(""));

    for (heading, items) in [
        ("MISSING INFORMATION", &record.missing_info),
        ("REQUIREMENTS", &record.requirements),
    ] {
        if items.is_empty() {
            continue;
        }
        lines.push(Line::from(Span::styled(heading, bold)));
        for line in textwrap::fill(&items.join(", "), WRAP_WIDTH).lines() {
            lines.push(Line::from(format!("  {}", line)));
        }
        lines.push(Line::from(""));
    }

    if record.status == ApplicationStatus::Pending && !record.missing_info.is_empty() {
        lines.push(Line::from(Span::styled(
            "Add the missing answers to personal_info and run again, or apply by hand.",
            Style::default().fg(Color::DarkGray),
        )));
    }

    Text::from(lines)
}
