//! Terminal demo for the alert queue, retry engine and error tracker.
//!
//! Keys push alerts of each kind, `r` runs a flaky fetch through an
//! [`AsyncOperation`] and `Esc` dismisses the newest alert.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_alert::{AlertKind, AlertQueue, AlertRequest, AlertStack, Priority};
use beacon_core::BeaconConfig;
use beacon_report::{ErrorTracker, TrackerOptions};
use beacon_retry::{AsyncOperation, AsyncOptions, ExecuteError, RetryError};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph},
    Frame, Terminal,
};
use tokio::runtime::Handle;
use tracing::{debug, info};

/// Result type for the demo loop.
pub type AppResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

const TICK: Duration = Duration::from_millis(100);

/// Simulated backend call: fails twice with a refused connection, then
/// succeeds.
fn flaky_fetch(calls: &AtomicU32) -> anyhow::Result<String> {
    let n = calls.fetch_add(1, Ordering::SeqCst);
    if n % 3 < 2 {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        return Err(anyhow::Error::new(refused).context("GET /rest/v1/links"));
    }
    Ok(format!("Loaded 12 links (request #{})", n + 1))
}

/// Demo application state.
pub struct App {
    queue: AlertQueue,
    tracker: ErrorTracker,
    fetch: AsyncOperation<String, anyhow::Error>,
    runtime: Handle,
    undo_count: Arc<AtomicU32>,
    should_quit: bool,
}

impl App {
    pub fn new(config: &BeaconConfig, runtime: Handle) -> Self {
        let queue = AlertQueue::from_config(&config.alerts);
        let tracker = ErrorTracker::new(
            TrackerOptions::from_config("LinkList", &config.reporting).with_module("demo"),
        );

        let calls = Arc::new(AtomicU32::new(0));
        let fetch = AsyncOperation::bound(
            move || {
                let result = flaky_fetch(&calls);
                async move {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    result
                }
            },
            tracker.clone(),
            AsyncOptions::default()
                .with_max_retries(config.retry.max_attempts.saturating_sub(1))
                .with_retry_delay(Duration::from_millis(config.retry.base_delay_ms))
                .with_context("endpoint", "/rest/v1/links"),
        );

        Self {
            queue,
            tracker,
            fetch,
            runtime,
            undo_count: Arc::new(AtomicU32::new(0)),
            should_quit: false,
        }
    }

    pub fn queue(&self) -> &AlertQueue {
        &self.queue
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    /// Run the main application loop.
    pub fn run(&mut self) -> AppResult<()> {
        crossterm::terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_loop(&mut terminal);

        crossterm::terminal::disable_raw_mode()?;
        crossterm::execute!(
            terminal.backend_mut(),
            crossterm::terminal::LeaveAlternateScreen
        )?;
        terminal.show_cursor()?;
        self.queue.shutdown();

        result
    }

    fn run_loop<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> AppResult<()> {
        while !self.should_quit {
            terminal.draw(|frame| self.draw(frame))?;
            if event::poll(TICK)?
                && let Event::Key(key) = event::read()?
            {
                self.handle_key_event(key);
            }
        }
        Ok(())
    }

    /// Handle a key press.
    pub fn handle_key_event(&mut self, key: KeyEvent) {
        if key.kind == KeyEventKind::Release {
            return;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }

        match key.code {
            KeyCode::Esc => {
                if let Some(id) = self.queue.handle_key(&key) {
                    debug!(alert = %id, "dismissed from keyboard");
                }
            }
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('s') => {
                self.queue.show_success(("Saved", "Profile changes published"));
            }
            KeyCode::Char('e') => {
                self.queue.show_error("Could not update link: slug already taken");
            }
            KeyCode::Char('w') => {
                let undo = Arc::clone(&self.undo_count);
                self.queue.show(
                    AlertRequest::new(AlertKind::Warning, "Link archived")
                        .with_priority(Priority::High)
                        .with_action("Undo", move || {
                            undo.fetch_add(1, Ordering::SeqCst);
                        }),
                );
            }
            KeyCode::Char('i') => {
                self.queue.show_info("Analytics refresh every 5 minutes");
            }
            KeyCode::Char('!') => {
                self.queue.show(
                    AlertRequest::new(AlertKind::Error, "Database unreachable")
                        .with_priority(Priority::Critical)
                        .not_dismissible(),
                );
            }
            KeyCode::Char('a') => {
                let newest = self.queue.snapshot().into_iter().max_by_key(|a| a.sequence());
                if let Some(alert) = newest {
                    self.queue.trigger_action(alert.id);
                }
            }
            KeyCode::Char('c') => {
                let cleared = self.queue.clear_all();
                info!(cleared, "alerts cleared");
            }
            KeyCode::Char('x') => {
                self.tracker.clear_error_stats();
                self.queue.show_info("Error history cleared");
            }
            KeyCode::Char('r') => self.start_fetch(),
            _ => {}
        }
    }

    /// Run the flaky fetch in the background and surface the outcome as an
    /// alert.
    fn start_fetch(&self) {
        let fetch = self.fetch.clone();
        let queue = self.queue.clone();
        self.runtime.spawn(async move {
            match fetch.execute().await {
                Ok(summary) => {
                    queue.show_success(("Links loaded", summary));
                }
                Err(ExecuteError::Failed(RetryError::InProgress)) => {
                    queue.show_info("A fetch is already running");
                }
                Err(_) => {
                    let message = fetch
                        .state()
                        .error
                        .map(|e| e.user_message)
                        .unwrap_or_else(|| "Fetch failed".to_string());
                    queue.show_error(("Fetch failed", message));
                }
            }
        });
    }

    /// Draw the UI.
    pub fn draw(&mut self, frame: &mut Frame) {
        let area = frame.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(8),
                Constraint::Length(2),
            ])
            .split(area);

        self.draw_header(frame, chunks[0]);
        self.draw_status(frame, chunks[1]);
        self.draw_footer(frame, chunks[2]);

        let alerts = self.queue.snapshot();
        frame.render_widget(AlertStack::new(&alerts), chunks[1]);
    }

    fn draw_header(&self, frame: &mut Frame, area: Rect) {
        let header = Paragraph::new(Line::from(vec![
            Span::styled(
                "Beacon",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::raw("  alerts · retries · error reports"),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded),
        );
        frame.render_widget(header, area);
    }

    fn draw_status(&self, frame: &mut Frame, area: Rect) {
        let state = self.fetch.state();
        let stats = self.tracker.get_error_stats();
        let settings = self.queue.settings();

        let label = Style::default().fg(Color::DarkGray);
        let mut lines = vec![
            Line::from(vec![
                Span::styled("alerts    ", label),
                Span::raw(format!(
                    "{}/{} live, {} timers",
                    self.queue.len(),
                    settings.capacity,
                    self.queue.pending_timers()
                )),
            ]),
            Line::from(vec![
                Span::styled("fetch     ", label),
                Span::raw(if state.loading {
                    format!("loading (retry {})", state.retry_count)
                } else if let Some(data) = &state.data {
                    data.clone()
                } else {
                    "idle".to_string()
                }),
            ]),
            Line::from(vec![
                Span::styled("errors    ", label),
                Span::raw(format!(
                    "{} total, {} in last 24h",
                    stats.total_errors, stats.errors_last_24h
                )),
            ]),
        ];
        for (kind, count) in &stats.by_kind {
            lines.push(Line::from(vec![
                Span::styled(format!("  {kind:<10}"), label),
                Span::raw(count.to_string()),
            ]));
        }
        if let Some(error) = &state.error {
            lines.push(Line::from(Span::styled(
                format!("last error: {}", error.user_message),
                Style::default().fg(Color::Red),
            )));
        }
        lines.push(Line::from(vec![
            Span::styled("undo      ", label),
            Span::raw(self.undo_count.load(Ordering::SeqCst).to_string()),
        ]));

        let status = Paragraph::new(lines).block(
            Block::default()
                .title(" Status ")
                .borders(Borders::ALL)
                .border_type(BorderType::Plain),
        );
        frame.render_widget(status, area);
    }

    fn draw_footer(&self, frame: &mut Frame, area: Rect) {
        let keys = [
            ("s", "success"),
            ("e", "error"),
            ("w", "warning"),
            ("i", "info"),
            ("!", "critical"),
            ("a", "action"),
            ("r", "fetch"),
            ("esc", "dismiss"),
            ("c", "clear"),
            ("x", "reset stats"),
            ("q", "quit"),
        ];
        let mut spans = Vec::new();
        for (key, desc) in keys {
            spans.push(Span::styled(
                format!("[{key}]"),
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            ));
            spans.push(Span::raw(format!(" {desc}  ")));
        }
        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }
}
