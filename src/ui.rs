use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{
        Block, Borders, Cell, Clear, Paragraph, Row, Scrollbar, ScrollbarOrientation,
        ScrollbarState, Table, Wrap,
    },
};

use crate::model::{ColumnView, EMPTY_PROMPT, Model, UIData};
use crate::session::Notice;

pub const CMDLINE_HEIGH: usize = 2; // Status line and command line
pub const TABLE_HEADER_HEIGHT: usize = 1;
pub const SCROLLBAR_WIDTH: usize = 1;
pub const COLUMN_WIDTH_MARGIN: usize = 1;
pub const COLUMN_WIDTH_COLLAPSED_COLUMN: usize = 3;
pub const MIN_COLUMN_WIDTH: usize = 3;
pub const SELECTION_MARK_WIDTH: usize = 4; // "[x] "

#[derive(Debug, Default)]
pub struct TableUI {}

impl TableUI {
    pub fn new() -> Self {
        Self {}
    }

    pub fn draw(&self, model: &Model, frame: &mut Frame) {
        let uidata = model.get_uidata();
        let [table_area, status_area, cmd_area] = Layout::vertical([
            Constraint::Min(0),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .areas(frame.area());

        if uidata.empty {
            self.draw_empty(frame, table_area);
        } else {
            self.draw_table(uidata, frame, table_area);
        }
        self.draw_statusline(uidata, frame, status_area);
        self.draw_cmdline(uidata, frame, cmd_area);

        if uidata.show_popup {
            self.draw_popup(&uidata.popup_message, frame);
        }
    }

    fn draw_empty(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(Line::from(" tabedit ".bold()).centered());
        let text = Text::from(vec![
            Line::from(""),
            Line::from(EMPTY_PROMPT.yellow()),
            Line::from(""),
            Line::from("Press ? for help, q to quit.".dark_gray()),
        ]);
        frame.render_widget(Paragraph::new(text).centered().block(block), area);
    }

    fn draw_table(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let layout = &uidata.layout;
        let [index_area, data_area, scrollbar_area] = Layout::horizontal([
            Constraint::Length(layout.index_width as u16),
            Constraint::Min(0),
            Constraint::Length(SCROLLBAR_WIDTH as u16),
        ])
        .areas(area);

        frame.render_widget(self.index_table(uidata), index_area);
        frame.render_widget(self.data_table(uidata), data_area);

        let mut scrollbar_state = ScrollbarState::new(uidata.nrows).position(uidata.abs_selected_row);
        frame.render_stateful_widget(
            Scrollbar::new(ScrollbarOrientation::VerticalRight)
                .begin_symbol(None)
                .end_symbol(None),
            scrollbar_area,
            &mut scrollbar_state,
        );
    }

    fn index_table<'a>(&self, uidata: &'a UIData) -> Table<'a> {
        let rows = uidata.index.data.iter().enumerate().map(|(ridx, label)| {
            let style = if uidata.marked.get(ridx).copied().unwrap_or(false) {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            Row::new(vec![Cell::from(label.as_str()).style(style)])
        });
        Table::new(rows, [Constraint::Length(uidata.index.width as u16)])
            .header(Row::new(vec![Cell::from("")]))
            .column_spacing(0)
    }

    fn data_table<'a>(&self, uidata: &'a UIData) -> Table<'a> {
        let header = Row::new(uidata.table.iter().enumerate().map(|(cidx, column)| {
            let style = if cidx == uidata.selected_column {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
            } else {
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
            };
            Cell::from(column.name.as_str()).style(style)
        }));

        let nrows = uidata.table.first().map(|c| c.data.len()).unwrap_or(0);
        let rows = (0..nrows).map(|ridx| {
            let marked = uidata.marked.get(ridx).copied().unwrap_or(false);
            Row::new(uidata.table.iter().enumerate().map(|(cidx, column)| {
                Self::styled_cell(column, ridx, cidx, uidata, marked)
            }))
        });

        let widths: Vec<Constraint> = uidata
            .table
            .iter()
            .map(|c| Constraint::Length(c.width as u16))
            .collect();

        Table::new(rows, widths).header(header).column_spacing(1)
    }

    fn styled_cell<'a>(
        column: &'a ColumnView,
        ridx: usize,
        cidx: usize,
        uidata: &UIData,
        marked: bool,
    ) -> Cell<'a> {
        let value = column.data.get(ridx).map(|s| s.as_str()).unwrap_or("");
        let is_current_row = ridx == uidata.selected_row;
        let style = if is_current_row && cidx == uidata.selected_column {
            Style::default()
                .bg(Color::Yellow)
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD)
        } else if is_current_row {
            Style::default().bg(Color::Rgb(60, 60, 60))
        } else if marked {
            Style::default().bg(Color::Rgb(20, 60, 20))
        } else {
            Style::default()
        };
        if column.numeric {
            Cell::from(Line::from(value).right_aligned()).style(style)
        } else {
            Cell::from(value).style(style)
        }
    }

    fn draw_statusline(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let mut spans = Vec::new();
        if !uidata.empty {
            spans.push(Span::from(format!(" {} ", uidata.name)).bold().reversed());
            spans.push(Span::from(format!(
                " {}/{} rows",
                uidata.nrows, uidata.total_rows
            )));
            if uidata.nselected > 0 {
                spans.push(Span::from(format!(" | {} selected", uidata.nselected)).green());
            }
            if !uidata.query.is_empty() {
                spans.push(Span::from(format!(" | search \"{}\"", uidata.query)).cyan());
            }
            if uidata.nfilters > 0 {
                spans.push(Span::from(format!(" | {} filters", uidata.nfilters)).cyan());
            }
            spans.push(Span::from(" | "));
        }
        let style = match uidata.notice {
            Notice::Info(_) => Style::default(),
            Notice::Success(_) => Style::default().fg(Color::Green),
            Notice::Warning(_) => Style::default().fg(Color::Yellow),
            Notice::Error(_) => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        };
        spans.push(Span::styled(uidata.notice.message().to_string(), style));
        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_cmdline(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        if uidata.active_cmdinput {
            let prompt = uidata.cmd_mode.map(|m| m.prompt()).unwrap_or("> ");
            let line = Line::from(vec![
                Span::from(prompt).bold().yellow(),
                Span::from(uidata.cmdinput.input.as_str()),
            ]);
            frame.render_widget(Paragraph::new(line), area);
            let x = area.x as usize + prompt.chars().count() + uidata.cmdinput.cursor_pos;
            frame.set_cursor_position((x.min(u16::MAX as usize) as u16, area.y));
        } else {
            let hint = Line::from(vec![
                " ? ".bold().blue(),
                "help ".into(),
                " / ".bold().blue(),
                "search ".into(),
                " e ".bold().blue(),
                "edit ".into(),
                " o ".bold().blue(),
                "add row ".into(),
                " d ".bold().blue(),
                "delete ".into(),
                " s ".bold().blue(),
                "export ".into(),
                " q ".bold().blue(),
                "quit".into(),
            ]);
            frame.render_widget(Paragraph::new(hint).dark_gray(), area);
        }
    }

    fn draw_popup(&self, message: &str, frame: &mut Frame) {
        let area = Self::centered_rect(frame.area(), 60, 80);
        let block = Block::default()
            .borders(Borders::ALL)
            .title(Line::from(" Help ".bold()).centered())
            .title_bottom(Line::from(" <Esc> close ").centered());
        frame.render_widget(Clear, area);
        frame.render_widget(
            Paragraph::new(message).block(block).wrap(Wrap { trim: false }),
            area,
        );
    }

    fn centered_rect(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
        let width = area.width * percent_x / 100;
        let height = area.height * percent_y / 100;
        Rect {
            x: area.x + (area.width - width) / 2,
            y: area.y + (area.height - height) / 2,
            width,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Message, TEConfig};
    use crate::loader::Source;
    use ratatui::{Terminal, backend::TestBackend};

    const PEOPLE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/people.csv");

    fn render(model: &Model, width: u16, height: u16) -> String {
        let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
        let ui = TableUI::new();
        terminal.draw(|f| ui.draw(model, f)).unwrap();
        let buffer = terminal.backend().buffer();
        (0..height)
            .map(|y| {
                (0..width)
                    .map(|x| buffer[(x, y)].symbol().to_string())
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn empty_state_shows_prompt() {
        let model = Model::init(&TEConfig::default(), 80, 24);
        let screen = render(&model, 80, 24);
        assert!(screen.contains(EMPTY_PROMPT));
    }

    #[test]
    fn table_shows_header_rows_and_status() {
        let mut model = Model::init(&TEConfig::default(), 80, 24);
        model.load(&Source::File(PEOPLE.into())).unwrap();
        let screen = render(&model, 80, 24);
        let lines: Vec<&str> = screen.lines().collect();
        assert!(lines[0].contains("id"));
        assert!(lines[0].contains("score"));
        assert!(lines[1].starts_with("[ ] 1"));
        assert!(lines[1].contains("Alice"));
        assert!(lines[3].contains("∅"));
        assert!(lines[22].contains("people.csv"));
        assert!(lines[22].contains("5/5 rows"));
    }

    #[test]
    fn selection_and_popup_are_rendered() {
        let mut model = Model::init(&TEConfig::default(), 80, 24);
        model.load(&Source::File(PEOPLE.into())).unwrap();
        model.update(Some(Message::ToggleSelection)).unwrap();
        let screen = render(&model, 80, 24);
        assert!(screen.lines().nth(1).unwrap().starts_with("[x] 1"));
        assert!(screen.contains("1 selected"));

        model.update(Some(Message::Help)).unwrap();
        let screen = render(&model, 80, 24);
        assert!(screen.contains("Help"));
        assert!(screen.contains("global search"));
    }

    #[test]
    fn centered_rect_stays_inside() {
        let area = Rect::new(0, 0, 100, 50);
        let popup = TableUI::centered_rect(area, 60, 80);
        assert_eq!(popup, Rect::new(20, 5, 60, 40));
    }
}
