use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::io::stdout;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::controller::{Confirmation, ControllerSnapshot, FormMode, RecordListController};
use crate::error::{TrackerError, TrackerResult};
use crate::models::{ApplicationFields, ApplicationRecord, ApplicationStatus, RecordId};
use crate::service::ApplicationService;
use crate::stats::{DashboardState, StatsDeriver};

const BAR_WIDTH: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormField {
    Company,
    JobTitle,
    Description,
    Status,
    Notes,
}

impl FormField {
    const ALL: [FormField; 5] = [
        FormField::Company,
        FormField::JobTitle,
        FormField::Description,
        FormField::Status,
        FormField::Notes,
    ];

    fn label(self) -> &'static str {
        match self {
            FormField::Company => "Company",
            FormField::JobTitle => "Job title",
            FormField::Description => "Description",
            FormField::Status => "Status",
            FormField::Notes => "Stage notes",
        }
    }

    fn text_mut(self, fields: &mut ApplicationFields) -> Option<&mut String> {
        match self {
            FormField::Company => Some(&mut fields.company),
            FormField::JobTitle => Some(&mut fields.job_title),
            FormField::Description => Some(&mut fields.job_description),
            FormField::Notes => Some(&mut fields.stage_notes),
            FormField::Status => None,
        }
    }

    fn value(self, fields: &ApplicationFields) -> &str {
        match self {
            FormField::Company => &fields.company,
            FormField::JobTitle => &fields.job_title,
            FormField::Description => &fields.job_description,
            FormField::Status => fields.status.as_str(),
            FormField::Notes => &fields.stage_notes,
        }
    }
}

/// What a finished background operation reports back to the loop.
type Completion = (&'static str, TrackerResult<()>);

struct AppState {
    view: ControllerSnapshot,
    selected: usize,
    scroll_offset: u16,
    focus: usize,
    pending_delete: Option<RecordId>,
    message: Option<String>,
    refreshed_at: Option<String>,
    stats_in_flight: bool,
    stats_stale: bool,
}

impl AppState {
    fn new() -> Self {
        Self {
            view: ControllerSnapshot::default(),
            selected: 0,
            scroll_offset: 0,
            focus: 0,
            pending_delete: None,
            message: None,
            refreshed_at: None,
            stats_in_flight: false,
            stats_stale: false,
        }
    }

    fn current(&self) -> Option<&ApplicationRecord> {
        self.view.list.get(self.selected)
    }

    fn focused_field(&self) -> FormField {
        FormField::ALL[self.focus % FormField::ALL.len()]
    }

    fn clamp_selection(&mut self) {
        if self.view.list.is_empty() {
            self.selected = 0;
        } else if self.selected >= self.view.list.len() {
            self.selected = self.view.list.len() - 1;
        }
    }

    fn next(&mut self) {
        if !self.view.list.is_empty() && self.selected < self.view.list.len() - 1 {
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
}

pub async fn run_browse<S: ApplicationService + 'static>(
    controller: RecordListController<S>,
    mut dashboard: StatsDeriver<S>,
) -> Result<()> {
    let mut state = AppState::new();
    if let Err(e) = controller.initialize().await {
        state.message = Some(format!("Failed to load applications: {}", e));
    }
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut state, &controller, &mut dashboard).await;

    controller.teardown();

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

async fn run_loop<S: ApplicationService + 'static>(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &mut AppState,
    controller: &RecordListController<S>,
    dashboard: &mut StatsDeriver<S>,
) -> Result<()> {
    let (tx, mut rx) = unbounded_channel::<Completion>();
    let (stats_tx, mut stats_rx) = unbounded_channel::<DashboardState>();
    let mut list_state = ListState::default();
    request_stats(state, dashboard, &stats_tx);

    loop {
        if drain_completions(&mut rx, state) {
            request_stats(state, dashboard, &stats_tx);
        }
        while let Ok(stats) = stats_rx.try_recv() {
            dashboard.apply(stats);
            state.refreshed_at = Some(chrono::Local::now().format("%H:%M:%S").to_string());
            state.stats_in_flight = false;
            if std::mem::take(&mut state.stats_stale) {
                request_stats(state, dashboard, &stats_tx);
            }
        }

        state.view = controller.snapshot().await;
        state.clamp_selection();
        list_state.select((!state.view.list.is_empty()).then_some(state.selected));

        terminal.draw(|frame| draw(frame, state, dashboard.state(), &mut list_state))?;

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if let Some(id) = state.pending_delete.take() {
            if let Some(id) = answer_delete(state, id, key.code) {
                spawn_op(controller, &tx, "delete", move |c| async move {
                    c.delete_record(&id, Confirmation::Affirmed).await
                });
            }
            continue;
        }

        if state.view.form.mode == FormMode::Idle {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Down | KeyCode::Char('j') => state.next(),
                KeyCode::Up | KeyCode::Char('k') => state.prev(),
                KeyCode::Char('J') | KeyCode::PageDown => {
                    state.scroll_offset = state.scroll_offset.saturating_add(3)
                }
                KeyCode::Char('K') | KeyCode::PageUp => {
                    state.scroll_offset = state.scroll_offset.saturating_sub(3)
                }
                KeyCode::Char('r') => {
                    spawn_op(controller, &tx, "load", |c| async move { c.load().await });
                }
                KeyCode::Char('n') => {
                    state.focus = 0;
                    report(state, "new", controller.begin_create().await);
                }
                KeyCode::Char('e') => {
                    if let Some(id) = state.current().map(|r| r.id.clone()) {
                        state.focus = 0;
                        spawn_op(controller, &tx, "edit", move |c| async move {
                            c.begin_edit(&id).await
                        });
                    }
                }
                KeyCode::Char('d') => {
                    let target = state.current().map(|record| {
                        let company = record.company.clone().unwrap_or_default();
                        (record.id.clone(), company)
                    });
                    if let Some((id, company)) = target {
                        state.message = Some(format!(
                            "Are you sure deleting this record? ({}) [y/N]",
                            company
                        ));
                        state.pending_delete = Some(id);
                    }
                }
                _ => {}
            }
        } else {
            handle_form_key(key, state, controller, &tx).await;
        }
    }
    Ok(())
}

async fn handle_form_key<S: ApplicationService + 'static>(
    key: KeyEvent,
    state: &mut AppState,
    controller: &RecordListController<S>,
    tx: &UnboundedSender<Completion>,
) {
    let mut fields = state.view.form.fields.clone();
    let field = state.focused_field();

    match key.code {
        KeyCode::Esc => {
            report(state, "cancel", controller.cancel().await);
            return;
        }
        KeyCode::Tab | KeyCode::Down => {
            state.focus = (state.focus + 1) % FormField::ALL.len();
            return;
        }
        KeyCode::BackTab | KeyCode::Up => {
            state.focus = (state.focus + FormField::ALL.len() - 1) % FormField::ALL.len();
            return;
        }
        KeyCode::Enter => {
            match state.view.form.mode {
                FormMode::Creating => spawn_op(controller, tx, "create", move |c| async move {
                    c.submit_create(fields).await
                }),
                FormMode::Editing(_) => spawn_op(controller, tx, "update", move |c| async move {
                    c.submit_update(fields).await
                }),
                FormMode::Idle => {}
            }
            return;
        }
        KeyCode::Right if field == FormField::Status => fields.status = fields.status.next(),
        KeyCode::Left if field == FormField::Status => fields.status = fields.status.prev(),
        KeyCode::Backspace => {
            if let Some(text) = field.text_mut(&mut fields) {
                text.pop();
            }
        }
        KeyCode::Char(c) => {
            if let Some(text) = field.text_mut(&mut fields) {
                text.push(c);
            }
        }
        _ => return,
    }

    if let Err(e) = controller.update_form(fields).await {
        state.message = Some(e.to_string());
    }
}

/// Resolve a pending delete prompt. Only 'y' yields the id to delete; any
/// other key cancels without touching the service.
fn answer_delete(state: &mut AppState, id: RecordId, code: KeyCode) -> Option<RecordId> {
    if code == KeyCode::Char('y') {
        state.message = None;
        Some(id)
    } else {
        state.message = Some("Delete cancelled".to_string());
        None
    }
}

/// Start a stats fetch on its own task. At most one runs at a time; a request
/// made while one is running is queued as a single follow-up.
fn request_stats<S: ApplicationService + 'static>(
    state: &mut AppState,
    dashboard: &StatsDeriver<S>,
    tx: &UnboundedSender<DashboardState>,
) {
    if state.stats_in_flight {
        state.stats_stale = true;
        return;
    }
    state.stats_in_flight = true;
    let fetch = dashboard.fetch();
    let tx = tx.clone();
    tokio::spawn(async move {
        let _ = tx.send(fetch.await);
    });
}

fn spawn_op<S, F, Fut>(
    controller: &RecordListController<S>,
    tx: &UnboundedSender<Completion>,
    label: &'static str,
    op: F,
) where
    S: ApplicationService + 'static,
    F: FnOnce(RecordListController<S>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = TrackerResult<()>> + Send + 'static,
{
    let controller = controller.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let result = op(controller).await;
        // the loop may already be gone
        let _ = tx.send((label, result));
    });
}

fn report(state: &mut AppState, label: &str, result: TrackerResult<()>) {
    if let Err(e) = result {
        state.message = Some(format!("{} failed: {}", label, e));
    }
}

/// Returns true when a finished operation changed the records and the
/// stats should be fetched again.
fn drain_completions(rx: &mut UnboundedReceiver<Completion>, state: &mut AppState) -> bool {
    let mut changed = false;
    while let Ok((label, result)) = rx.try_recv() {
        match result {
            Ok(()) => {
                if matches!(label, "create" | "update" | "delete" | "load") {
                    changed = true;
                }
                state.message = None;
            }
            Err(e) => {
                // the change itself went through
                if matches!(e, TrackerError::ReloadFailed(_)) {
                    changed = true;
                }
                report(state, label, Err(e));
            }
        }
    }
    changed
}

fn draw(
    frame: &mut Frame,
    state: &AppState,
    dashboard: &DashboardState,
    list_state: &mut ListState,
) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(8),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(frame.area());

    let funnel = Paragraph::new(build_funnel(dashboard, state.refreshed_at.as_deref()))
        .block(Block::default().borders(Borders::ALL).title(" Dashboard "));
    frame.render_widget(funnel, rows[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(rows[1]);

    // Left panel: application list
    let items: Vec<ListItem> = state
        .view
        .list
        .iter()
        .map(|record| {
            let title = record.job_title.as_deref().unwrap_or("?");
            let title = if title.chars().count() > 30 {
                format!("{}...", title.chars().take(27).collect::<String>())
            } else {
                title.to_string()
            };
            ListItem::new(format!(
                "{} {} | {}",
                status_icon(&record.status),
                title,
                record.company.as_deref().unwrap_or("?")
            ))
        })
        .collect();

    let list_title = if state.view.busy {
        format!(" Applications ({}) loading... ", state.view.list.len())
    } else {
        format!(" Applications ({}) ", state.view.list.len())
    };
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(list_title))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");
    frame.render_stateful_widget(list, columns[0], list_state);

    // Right panel: form or detail
    let (title, body) = match &state.view.form.mode {
        FormMode::Idle => (" Detail ".to_string(), build_detail(state)),
        FormMode::Creating => (" New application ".to_string(), build_form(state)),
        FormMode::Editing(id) => (format!(" Editing #{} ", id), build_form(state)),
    };
    let right = Paragraph::new(body)
        .block(Block::default().borders(Borders::ALL).title(title))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));
    frame.render_widget(right, columns[1]);

    // Footer: message or help
    let footer = match &state.message {
        Some(msg) => Paragraph::new(format!(" {}", msg)).style(Style::default().fg(Color::Yellow)),
        None if state.view.form.mode != FormMode::Idle => Paragraph::new(
            " Tab:next field  \u{2190}/\u{2192}:status  Enter:save  Esc:cancel",
        )
        .style(Style::default().fg(Color::DarkGray)),
        None => Paragraph::new(
            " j/k:navigate  J/K:scroll  n:new  e:edit  d:delete  r:reload  q:quit",
        )
        .style(Style::default().fg(Color::DarkGray)),
    };
    frame.render_widget(footer, rows[2]);
}

fn status_icon(status: &ApplicationStatus) -> &'static str {
    match status {
        ApplicationStatus::Applied => "+",
        ApplicationStatus::Interviewed => "*",
        ApplicationStatus::Offered => "$",
        ApplicationStatus::Rejected => "x",
        ApplicationStatus::Other(_) => "?",
    }
}

fn status_style(status: &ApplicationStatus) -> Style {
    match status {
        ApplicationStatus::Applied => Style::default().fg(Color::Cyan),
        ApplicationStatus::Interviewed => Style::default().fg(Color::Yellow),
        ApplicationStatus::Offered => Style::default().fg(Color::Green),
        ApplicationStatus::Rejected => Style::default().fg(Color::Red),
        ApplicationStatus::Other(_) => Style::default(),
    }
}

fn build_funnel<'a>(dashboard: &'a DashboardState, refreshed_at: Option<&str>) -> Text<'a> {
    let (snapshot, funnel) = match dashboard {
        DashboardState::Loading => return Text::raw("Loading dashboard..."),
        DashboardState::Failed(msg) => {
            return Text::from(vec![
                Line::from(Span::styled(
                    "Error loading dashboard",
                    Style::default().fg(Color::Red),
                )),
                Line::from(msg.as_str()),
            ]);
        }
        DashboardState::Ready { snapshot, funnel } => (snapshot, funnel),
    };

    let mut lines: Vec<Line> = Vec::new();
    lines.push(Line::from(format!(
        "Total {}   Applied {}   Interviewed {}   Offered {}   Rejected {}",
        snapshot.total, snapshot.applied, snapshot.interviewed, snapshot.offered, snapshot.rejected
    )));

    for stage in &funnel.stages {
        let filled = ((stage.percentage_of_applied.min(100.0) / 100.0) * BAR_WIDTH as f64).round() as usize;
        lines.push(Line::from(vec![
            Span::raw(format!("{:<12}", stage.label.to_string())),
            Span::styled("\u{2588}".repeat(filled), Style::default().fg(Color::Cyan)),
            Span::raw(" ".repeat(BAR_WIDTH - filled)),
            Span::raw(format!(
                " {} ({:.1}%)",
                stage.raw_count, stage.percentage_of_applied
            )),
        ]));
    }

    let mut summary = format!(
        "Overall conversion rate: {:.1}%  (offered / applied x 100)",
        funnel.overall_conversion_pct
    );
    if let Some(at) = refreshed_at {
        summary.push_str(&format!("   refreshed {}", at));
    }
    lines.push(Line::from(Span::styled(
        summary,
        Style::default().add_modifier(Modifier::BOLD),
    )));

    Text::from(lines)
}

fn build_detail(state: &AppState) -> Text<'_> {
    let Some(record) = state.current() else {
        return Text::from(vec![
            Line::from("No applications yet"),
            Line::from(Span::styled(
                "Press n to create your first application",
                Style::default().fg(Color::DarkGray),
            )),
        ]);
    };

    let mut lines: Vec<Line> = Vec::new();

    lines.push(Line::from(Span::styled(
        record.job_title.clone().unwrap_or_default(),
        Style::default().add_modifier(Modifier::BOLD),
    )));
    if let Some(company) = &record.company {
        lines.push(Line::from(format!("at {}", company)));
    }
    lines.push(Line::from(Span::styled(
        format!("Status: {}", record.status),
        status_style(&record.status),
    )));
    lines.push(Line::from(""));

    if let Some(notes) = record.stage_notes.as_deref().filter(|n| !n.is_empty()) {
        lines.push(Line::from(Span::styled(
            "Stage notes",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        for line in textwrap::fill(notes, 70).lines() {
            lines.push(Line::from(format!("  {}", line)));
        }
        lines.push(Line::from(""));
    }

    let description = record.description_text();
    if description.is_empty() {
        lines.push(Line::from(Span::styled(
            "(Description loads when editing: press e)",
            Style::default().fg(Color::DarkGray),
        )));
    } else {
        lines.push(Line::from(Span::styled(
            "Description",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        for line in description.lines() {
            lines.push(Line::from(line.to_string()));
        }
    }

    Text::from(lines)
}

fn build_form(state: &AppState) -> Text<'_> {
    let fields = &state.view.form.fields;
    let focused = state.focused_field();
    let mut lines: Vec<Line> = Vec::new();

    for field in FormField::ALL {
        let marker = if field == focused { "> " } else { "  " };
        let label_style = if field == focused {
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
        } else {
            Style::default().add_modifier(Modifier::BOLD)
        };
        lines.push(Line::from(Span::styled(
            format!("{}{}", marker, field.label()),
            label_style,
        )));

        let value = field.value(fields);
        if field == FormField::Status {
            lines.push(Line::from(Span::styled(
                format!("    < {} >", value),
                status_style(&fields.status),
            )));
        } else if value.is_empty() {
            lines.push(Line::from(Span::styled(
                "    (empty)",
                Style::default().fg(Color::DarkGray),
            )));
        } else {
            for line in textwrap::fill(value, 60).lines() {
                lines.push(Line::from(format!("    {}", line)));
            }
        }
        lines.push(Line::from(""));
    }

    if state.view.busy {
        lines.push(Line::from(Span::styled(
            "Saving...",
            Style::default().fg(Color::Yellow),
        )));
    }

    Text::from(lines)
}
