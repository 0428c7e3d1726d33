//! Alert presentation widget.
//!
//! [`AlertStack`] draws a queue snapshot as a column of bordered toasts.
//! It only reads the alerts; dismissal stays with the queue.

use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget, Wrap},
};

use crate::alert::{Alert, AlertKind, Position, Priority};

/// Default toast width in columns.
pub const DEFAULT_TOAST_WIDTH: u16 = 44;

impl AlertKind {
    /// Accent color for this kind.
    pub fn color(&self) -> Color {
        match self {
            AlertKind::Success => Color::Green,
            AlertKind::Error => Color::Red,
            AlertKind::Warning => Color::Yellow,
            AlertKind::Info => Color::Cyan,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            AlertKind::Success => "Success",
            AlertKind::Error => "Error",
            AlertKind::Warning => "Warning",
            AlertKind::Info => "Info",
        }
    }
}

/// Stack of toasts for the alerts in a snapshot.
///
/// Alerts whose position is on the bottom edge stack upward from the bottom
/// of the area; the rest stack downward from the top. Toasts that do not fit
/// are skipped.
#[derive(Debug)]
pub struct AlertStack<'a> {
    alerts: &'a [Alert],
    width: u16,
}

impl<'a> AlertStack<'a> {
    pub fn new(alerts: &'a [Alert]) -> Self {
        Self {
            alerts,
            width: DEFAULT_TOAST_WIDTH,
        }
    }

    /// Set the toast width.
    pub fn width(mut self, width: u16) -> Self {
        self.width = width.max(8);
        self
    }

    fn toast_height(alert: &Alert) -> u16 {
        // borders + message + optional action line
        3 + u16::from(alert.action.is_some())
    }

    fn horizontal(&self, area: Rect, position: Position, width: u16) -> u16 {
        match position {
            Position::TopLeft | Position::BottomLeft => area.x,
            Position::TopCenter | Position::BottomCenter => area.x + (area.width - width) / 2,
            Position::TopRight | Position::BottomRight => area.x + area.width - width,
        }
    }

    fn render_toast(alert: &Alert, rect: Rect, buf: &mut Buffer) {
        let accent = alert.kind.color();
        let border_style = if alert.priority == Priority::Critical {
            Style::default().fg(accent).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(accent)
        };

        let heading = alert.title.as_deref().unwrap_or(alert.kind.label());
        let mut title = vec![
            Span::styled(format!(" {} ", alert.kind.icon()), Style::default().fg(accent)),
            Span::styled(
                heading.to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
        ];
        let marker = alert.priority.marker();
        if !marker.is_empty() {
            title.push(Span::styled(
                format!(" {marker}"),
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            ));
        }
        title.push(Span::raw(" "));

        let mut block = Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(border_style)
            .title(Line::from(title));
        if alert.dismissible {
            block = block.title_bottom(
                Line::from(Span::styled(" esc ", Style::default().fg(Color::DarkGray)))
                    .alignment(Alignment::Right),
            );
        }

        let mut lines = vec![Line::from(Span::styled(
            alert.message.clone(),
            Style::default().fg(Color::White),
        ))];
        if let Some(action) = &alert.action {
            lines.push(Line::from(Span::styled(
                format!("▸ {}", action.label),
                Style::default().fg(accent).add_modifier(Modifier::UNDERLINED),
            )));
        }

        Paragraph::new(lines)
            .block(block)
            .wrap(Wrap { trim: true })
            .render(rect, buf);
    }
}

impl Widget for AlertStack<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.width < 8 || area.height < 3 {
            return;
        }
        let width = self.width.min(area.width);
        let mut top = area.y;
        let mut bottom = area.y + area.height;

        for alert in self.alerts {
            let height = Self::toast_height(alert);
            if bottom.saturating_sub(top) < height {
                break;
            }
            let x = self.horizontal(area, alert.position, width);
            let y = match alert.position {
                Position::BottomLeft | Position::BottomCenter | Position::BottomRight => {
                    bottom -= height;
                    bottom
                }
                _ => {
                    let y = top;
                    top += height;
                    y
                }
            };
            Self::render_toast(alert, Rect::new(x, y, width, height), buf);
        }
    }
}
