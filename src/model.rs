use arboard::Clipboard;
use ratatui::crossterm::event::KeyEvent;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::domain::{CMDMode, HELP_TEXT, Message, TEConfig, TEError};
use crate::inputter::{InputResult, Inputter};
use crate::loader::Source;
use crate::session::{Action, Notice, Session};
use crate::table::Value;
use crate::ui::{
    CMDLINE_HEIGH, COLUMN_WIDTH_COLLAPSED_COLUMN, COLUMN_WIDTH_MARGIN, MIN_COLUMN_WIDTH,
    SCROLLBAR_WIDTH, SELECTION_MARK_WIDTH, TABLE_HEADER_HEIGHT,
};

pub const EMPTY_PROMPT: &str = "Open a CSV file <O> or load the demo <D> to start.";
const NULL_GLYPH: &str = "∅";

#[derive(Debug, PartialEq)]
pub enum Status {
    EMPTY,
    READY,
    QUITTING,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Modus {
    TABLE,
    POPUP,
    CMDINPUT,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnStatus {
    NORMAL,
    EXPANDED,
    COLLAPSED,
}

#[derive(Debug, Clone)]
struct ColumnState {
    status: ColumnStatus,
    width_delta: isize, // Manual resize on top of the computed width
}

impl ColumnState {
    fn new() -> Self {
        Self {
            status: ColumnStatus::NORMAL,
            width_delta: 0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnView {
    pub name: String,
    pub width: usize,
    pub data: Vec<String>,
    pub numeric: bool,
}

// Cursor and scroll state of the grid
struct TableView {
    visible_columns: Vec<usize>, // Idx of visible columns that are send to the UI for rendering.
    visible_width: usize,
    cursor_row: usize,
    cursor_column: usize,
    offset_row: usize,
    offset_column: usize,
    data: Vec<ColumnView>,
    index: ColumnView,
    marked: Vec<bool>,
}

impl TableView {
    fn empty() -> Self {
        TableView {
            visible_columns: Vec::new(),
            visible_width: 0,
            cursor_row: 0,
            cursor_column: 0,
            offset_row: 0,
            offset_column: 0,
            data: Vec::new(),
            index: ColumnView::default(),
            marked: Vec::new(),
        }
    }
}

pub struct UIData {
    pub name: String,
    pub table: Vec<ColumnView>,
    pub index: ColumnView,
    pub marked: Vec<bool>, // Visible rows that are selected
    pub nrows: usize, // Rows in the current view
    pub total_rows: usize,
    pub nselected: usize,
    pub selected_row: usize,
    pub selected_column: usize,
    pub abs_selected_row: usize,
    pub query: String,
    pub nfilters: usize,
    pub show_popup: bool,
    pub popup_message: String,
    pub layout: UILayout,
    pub cmdinput: InputResult,
    pub cmd_mode: Option<CMDMode>,
    pub active_cmdinput: bool,
    pub notice: Notice,
    pub empty: bool,
}

impl UIData {
    pub fn empty() -> Self {
        UIData {
            name: String::new(),
            table: Vec::new(),
            index: ColumnView::default(),
            marked: Vec::new(),
            nrows: 0,
            total_rows: 0,
            nselected: 0,
            selected_row: 0,
            selected_column: 0,
            abs_selected_row: 0,
            query: String::new(),
            nfilters: 0,
            show_popup: false,
            popup_message: String::new(),
            layout: UILayout::default(),
            cmdinput: InputResult::default(),
            cmd_mode: None,
            active_cmdinput: false,
            notice: Notice::Info(EMPTY_PROMPT.to_string()),
            empty: true,
        }
    }
}

#[derive(Default, Clone, Debug, PartialEq)]
pub struct UILayout {
    pub width: usize,
    pub height: usize,
    pub table_width: usize,
    pub table_height: usize,
    pub index_width: usize,
}

impl UILayout {
    pub fn from_values(index_width: usize, ui_width: usize, ui_height: usize) -> Self {
        let table_width = ui_width.saturating_sub(SCROLLBAR_WIDTH + index_width);
        let table_height = ui_height.saturating_sub(CMDLINE_HEIGH + TABLE_HEADER_HEIGHT);

        let layout = UILayout {
            width: ui_width,
            height: ui_height,
            table_width,
            table_height,
            index_width,
        };
        trace!("Build UILayout: {:?}", layout);
        layout
    }
}

pub struct Model {
    config: TEConfig,
    pub status: Status,
    modus: Modus,
    previous_modus: Modus,
    session: Option<Session>,
    columns: Vec<ColumnState>,
    table: TableView,
    uilayout: UILayout,
    uidata: UIData,
    clipboard: Option<Clipboard>,
    input: Inputter,
    cmd_mode: Option<CMDMode>,
    last_input: InputResult,
    active_cmdinput: bool,
    notice: Notice,
}

impl Model {
    pub fn init(config: &TEConfig, ui_width: usize, ui_height: usize) -> Self {
        let mut model = Self {
            config: config.clone(),
            status: Status::EMPTY,
            modus: Modus::TABLE,
            previous_modus: Modus::TABLE,
            session: None,
            columns: Vec::new(),
            table: TableView::empty(),
            uilayout: UILayout::from_values(0, ui_width, ui_height),
            uidata: UIData::empty(),
            clipboard: None,
            input: Inputter::default(),
            cmd_mode: None,
            last_input: InputResult::default(),
            active_cmdinput: false,
            notice: Notice::Info(EMPTY_PROMPT.to_string()),
        };
        model.update_table_data();
        model
    }

    /// Replace the current session with a freshly loaded one.
    pub fn load(&mut self, source: &Source) -> Result<(), TEError> {
        let start_time = Instant::now();
        let session = Session::load(source)?;
        info!(
            "Loaded {} in {}ms",
            session.name(),
            start_time.elapsed().as_millis()
        );
        self.set_session(session);
        Ok(())
    }

    pub fn set_session(&mut self, session: Session) {
        let message = format!(
            "Loaded {} rows from {}",
            session.table().nrows(),
            session.name()
        );
        self.set_notice(Notice::Success(message));
        self.columns = vec![ColumnState::new(); session.table().ncols()];
        self.session = Some(session);
        self.table = TableView::empty();
        self.status = Status::READY;
        self.modus = Modus::TABLE;
        self.relayout(self.uilayout.width, self.uilayout.height);
    }

    #[cfg(test)]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn get_uidata(&self) -> &UIData {
        &self.uidata
    }

    pub fn raw_keyevents(&self) -> bool {
        self.active_cmdinput
    }

    pub fn quit(&mut self) {
        self.status = Status::QUITTING;
    }

    fn set_notice(&mut self, notice: Notice) {
        match &notice {
            Notice::Warning(m) => warn!("{m}"),
            Notice::Error(m) => error!("{m}"),
            _ => trace!("Notice: {:?}", notice),
        }
        self.notice = notice.clone();
        self.uidata.notice = notice;
    }

    fn view_len(&self) -> usize {
        self.session.as_ref().map(|s| s.view_len()).unwrap_or(0)
    }

    fn ncols(&self) -> usize {
        self.session.as_ref().map(|s| s.table().ncols()).unwrap_or(0)
    }

    fn current_row(&self) -> usize {
        self.table.offset_row + self.table.cursor_row
    }

    fn current_column(&self) -> usize {
        self.table
            .visible_columns
            .get(self.table.cursor_column)
            .copied()
            .unwrap_or(self.table.offset_column)
    }

    fn current_value(&self) -> Option<&Value> {
        let session = self.session.as_ref()?;
        let row = session.table_row(self.current_row())?;
        session.table().cell(row, self.current_column())
    }

    fn index_width(&self) -> usize {
        match &self.session {
            Some(session) => SELECTION_MARK_WIDTH + session.table().nrows().max(1).to_string().len(),
            None => 0,
        }
    }

    fn relayout(&mut self, width: usize, height: usize) {
        self.uilayout = UILayout::from_values(self.index_width(), width, height);
        self.update_table_data();
    }

    fn ui_resize(&mut self, width: usize, height: usize) {
        trace!(
            "UI was resized! w:{}->{}, h:{}->{}",
            self.uilayout.width, width, self.uilayout.height, height
        );
        self.relayout(width, height);
    }

    pub fn update(&mut self, message: Option<Message>) -> Result<(), TEError> {
        let Some(msg) = message else {
            return Ok(());
        };
        trace!("Update: Modus {:?}, Message {:?}", self.modus, msg);

        match self.modus {
            Modus::TABLE if self.session.is_none() => match msg {
                Message::Quit => self.quit(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                Message::Help => self.show_help(),
                Message::LoadDemo => self.load_demo(),
                Message::OpenFile => self.enter_cmd_mode(CMDMode::OpenFile),
                _ => self.set_notice(Notice::Info(EMPTY_PROMPT.to_string())),
            },
            Modus::TABLE => match msg {
                Message::Quit => self.quit(),
                Message::MoveDown => self.move_table_selection_down(1),
                Message::MoveUp => self.move_table_selection_up(1),
                Message::MoveLeft => self.move_table_selection_left(),
                Message::MoveRight => self.move_table_selection_right(),
                Message::MovePageUp => self.move_table_selection_up(self.uilayout.table_height),
                Message::MovePageDown => {
                    self.move_table_selection_down(self.uilayout.table_height)
                }
                Message::MoveBeginning => self.select_row(0),
                Message::MoveEnd => self.select_row(self.view_len().saturating_sub(1)),
                Message::MoveToFirstColumn => self.select_column(0),
                Message::MoveToLastColumn => self.select_column(self.ncols().saturating_sub(1)),
                Message::Resize(width, height) => self.ui_resize(width, height),
                Message::Help => self.show_help(),
                Message::Exit => self.apply(Action::PopFilter),
                Message::Search => self.enter_cmd_mode(CMDMode::GlobalSearch),
                Message::Filter => self.enter_cmd_mode(CMDMode::FilterByColumn),
                Message::EditCell => self.enter_cmd_mode(CMDMode::EditCell),
                Message::OpenFile => self.enter_cmd_mode(CMDMode::OpenFile),
                Message::ToggleSelection => {
                    self.apply(Action::ToggleSelection(self.current_row()));
                    self.move_table_selection_down(1);
                }
                Message::SelectAll => self.apply(Action::SelectAll),
                Message::ClearSelection => self.apply(Action::ClearSelection),
                Message::AddRow => self.add_blank_row(),
                Message::DeleteSelected => self.apply(Action::DeleteSelected),
                Message::Export => self.apply(Action::Export(self.config.export_dir.clone())),
                Message::SortAscending => self.apply(Action::Sort(self.current_column(), true)),
                Message::SortDescending => {
                    self.apply(Action::Sort(self.current_column(), false))
                }
                Message::WidenColumn => self.resize_column(1),
                Message::NarrowColumn => self.resize_column(-1),
                Message::ToggleColumnState => self.toggle_column_status(false),
                Message::ToggleExpandColumnState => self.toggle_column_status(true),
                Message::CopyCell => self.copy_table_cell(),
                Message::CopyRows => self.copy_selected_rows(),
                Message::LoadDemo => self.load_demo(),
                Message::RawKey(_) => (),
            },
            Modus::POPUP => match msg {
                Message::Quit => self.quit(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                Message::Exit | Message::Help => self.exit_popup(),
                _ => (),
            },
            Modus::CMDINPUT => match msg {
                Message::RawKey(key) => self.raw_input(key),
                Message::Resize(width, height) => self.ui_resize(width, height),
                _ => (),
            },
        }
        Ok(())
    }

    // -------------------- Control handling functions ---------------------- //

    fn apply(&mut self, action: Action) {
        let Some(session) = self.session.as_mut() else {
            self.set_notice(Notice::Info(EMPTY_PROMPT.to_string()));
            return;
        };
        let notice = match session.apply(action) {
            Ok(notice) => notice,
            Err(e) => Notice::Error(e.to_string()),
        };
        self.set_notice(notice);
        self.update_table_data();
    }

    fn load_source(&mut self, source: Source) {
        info!("Loading {:?}", source);
        if let Err(e) = self.load(&source) {
            error!("Loading {:?} failed: {:?}", source, e);
            self.set_notice(Notice::Error(format!("Could not load {}: {e}", source.name())));
            self.update_table_data();
        }
    }

    fn load_demo(&mut self) {
        self.load_source(Source::Demo(self.config.demo_rows));
    }

    fn add_blank_row(&mut self) {
        self.apply(Action::AddBlankRow);
        let position = self.session.as_ref().and_then(|s| {
            let new_row = s.table().nrows().checked_sub(1)?;
            s.view().iter().position(|&r| r == new_row)
        });
        if let Some(position) = position {
            self.select_row(position);
        }
    }

    fn show_help(&mut self) {
        self.previous_modus = self.modus;
        self.modus = Modus::POPUP;
        self.uidata.popup_message = HELP_TEXT.to_string();
        self.uidata.show_popup = true;
    }

    fn exit_popup(&mut self) {
        trace!("Close popup ...");
        self.modus = self.previous_modus;
        self.previous_modus = Modus::POPUP;
        self.uidata.show_popup = false;
    }

    fn raw_input(&mut self, key: KeyEvent) {
        if self.active_cmdinput {
            self.last_input = self.input.read(key);
            if self.last_input.finished {
                self.handle_cmd_input();
            }
            self.uidata.cmdinput = self.last_input.clone();
            self.uidata.cmd_mode = self.cmd_mode;
            self.uidata.active_cmdinput = self.active_cmdinput;
        }
    }

    fn enter_cmd_mode(&mut self, mode: CMDMode) {
        trace!("Entering command mode {:?} ...", mode);
        let prefill = match mode {
            CMDMode::GlobalSearch => self
                .session
                .as_ref()
                .map(|s| s.query().to_string())
                .unwrap_or_default(),
            CMDMode::EditCell => match self.current_value().map(|v| v.to_string()) {
                Some(value) => value,
                None => {
                    self.set_notice(Notice::Warning("No cell to edit".to_string()));
                    return;
                }
            },
            CMDMode::FilterByColumn | CMDMode::OpenFile => String::new(),
        };

        self.previous_modus = self.modus;
        self.modus = Modus::CMDINPUT;
        self.cmd_mode = Some(mode);

        self.active_cmdinput = true;
        self.input.clear();
        self.input.set(&prefill);
        self.last_input = self.input.get();

        self.uidata.cmdinput = self.last_input.clone();
        self.uidata.active_cmdinput = self.active_cmdinput;
        self.uidata.cmd_mode = self.cmd_mode;
    }

    fn handle_cmd_input(&mut self) {
        trace!("Handle cmd input {:?}", self.last_input);

        self.active_cmdinput = false;
        self.modus = self.previous_modus;
        self.previous_modus = Modus::CMDINPUT;

        let mode = self.cmd_mode.take();
        if self.last_input.canceled {
            debug!("Command {:?} canceled", mode);
            return;
        }

        let cmd_input = self.last_input.input.clone();
        match mode {
            Some(CMDMode::GlobalSearch) => {
                self.apply(Action::Search(cmd_input));
                self.select_row(0);
            }
            Some(CMDMode::FilterByColumn) => {
                self.apply(Action::FilterColumn(self.current_column(), cmd_input));
                self.select_row(0);
            }
            Some(CMDMode::EditCell) => self.apply(Action::EditCell {
                row: self.current_row(),
                col: self.current_column(),
                input: cmd_input,
            }),
            Some(CMDMode::OpenFile) => {
                if cmd_input.trim().is_empty() {
                    return;
                }
                match shellexpand::full(cmd_input.trim()) {
                    Ok(path) => self.load_source(Source::File(PathBuf::from(path.as_ref()))),
                    Err(e) => self.set_notice(Notice::Error(format!("Invalid path: {e}"))),
                }
            }
            None => {
                info!("Cmd mode is none!")
            }
        }
    }

    fn resize_column(&mut self, delta: isize) {
        let column = self.current_column();
        let max_width = self
            .session
            .as_ref()
            .and_then(|s| s.column_widths().get(column).copied())
            .unwrap_or(0);
        let max_column_width = self.config.max_column_width;
        if let Some(state) = self.columns.get_mut(column) {
            if state.status == ColumnStatus::COLLAPSED {
                state.status = ColumnStatus::NORMAL;
            }
            let unadjusted = ColumnState {
                status: state.status,
                width_delta: 0,
            };
            let base = Self::calculate_column_width(&unadjusted, max_width, max_column_width);
            // Never shrink past the rendered minimum
            state.width_delta = (state.width_delta + delta).max(MIN_COLUMN_WIDTH as isize - base as isize);
        }
        self.update_table_data();
    }

    fn toggle_column_status(&mut self, toggle_to_expand: bool) {
        let column = self.current_column();
        let Some(state) = self.columns.get_mut(column) else {
            return;
        };
        state.status = if toggle_to_expand {
            match state.status {
                ColumnStatus::COLLAPSED => ColumnStatus::EXPANDED,
                ColumnStatus::NORMAL => ColumnStatus::EXPANDED,
                ColumnStatus::EXPANDED => ColumnStatus::COLLAPSED,
            }
        } else {
            match state.status {
                ColumnStatus::COLLAPSED => ColumnStatus::NORMAL,
                ColumnStatus::NORMAL => ColumnStatus::COLLAPSED,
                ColumnStatus::EXPANDED => ColumnStatus::COLLAPSED,
            }
        };
        state.width_delta = 0;
        self.update_table_data();
    }

    fn copy_table_cell(&mut self) {
        let Some(cell) = self.current_value().map(|v| v.to_string()) else {
            return;
        };
        trace!("Cell content: {}", cell);
        self.copy_to_clipboard(cell, "cell");
    }

    fn copy_selected_rows(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.selection_count() == 0 {
            self.set_notice(Notice::Warning("No rows selected".to_string()));
            return;
        }
        let count = session.selection_count();
        match session.selection_csv() {
            Ok(content) => self.copy_to_clipboard(content, &format!("{count} rows")),
            Err(e) => self.set_notice(Notice::Error(e.to_string())),
        }
    }

    fn copy_to_clipboard(&mut self, content: String, what: &str) {
        if self.clipboard.is_none() {
            match Clipboard::new() {
                Ok(clipboard) => self.clipboard = Some(clipboard),
                Err(e) => {
                    self.set_notice(Notice::Error(format!("Clipboard not available: {e}")));
                    return;
                }
            }
        }
        let result = match self.clipboard.as_mut() {
            Some(clipboard) => clipboard.set_text(content),
            None => return,
        };
        match result {
            Ok(_) => self.set_notice(Notice::Success(format!("Copied {what} to clipboard"))),
            Err(e) => self.set_notice(Notice::Error(format!("Error copying to clipboard: {e}"))),
        }
    }

    fn select_row(&mut self, row: usize) {
        let height = self.uilayout.table_height.max(1);
        let table = &mut self.table;
        if row < table.offset_row {
            table.offset_row = row;
            table.cursor_row = 0;
        } else if row >= table.offset_row + height {
            table.offset_row = row + 1 - height;
            table.cursor_row = height - 1;
        } else {
            table.cursor_row = row - table.offset_row;
        }
        self.update_table_data();
    }

    fn select_column(&mut self, column: usize) {
        let table = &mut self.table;
        // If relevant column is already visible, only move the cursor, otherwise move the view.
        if let Some(pos) = table.visible_columns.iter().position(|&c| c == column) {
            table.cursor_column = pos;
        } else {
            table.offset_column = column;
            table.cursor_column = 0;
        }
        self.update_table_data();
    }

    fn move_table_selection_up(&mut self, size: usize) {
        self.select_row(self.current_row().saturating_sub(size.max(1)));
    }

    fn move_table_selection_down(&mut self, size: usize) {
        let nrows = self.view_len();
        if nrows > 0 {
            self.select_row(std::cmp::min(self.current_row() + size.max(1), nrows - 1));
        }
    }

    fn move_table_selection_left(&mut self) {
        let table = &mut self.table;
        if table.cursor_column > 0 {
            table.cursor_column -= 1;
        } else if table.offset_column > 0 {
            table.offset_column -= 1;
        }
        self.update_table_data();
    }

    fn move_table_selection_right(&mut self) {
        let ncols = self.ncols();
        let current = self.current_column();
        let table_width = self.uilayout.table_width;
        let table = &mut self.table;
        if current + 1 < ncols {
            // Somewhere before the last column
            if table.cursor_column + 1 < table.visible_columns.len() {
                table.cursor_column += 1;
            } else {
                table.offset_column += 1;
            }
        } else if table.visible_width > table_width && table.offset_column + 1 < ncols {
            // Last column is only partially visible, scroll it into view
            table.offset_column += 1;
        } else {
            return;
        }
        self.update_table_data();
    }

    fn clamp_cursor(&mut self) {
        let nrows = self.view_len();
        let ncols = self.ncols();
        let height = self.uilayout.table_height.max(1);
        let table = &mut self.table;

        if nrows == 0 {
            table.offset_row = 0;
            table.cursor_row = 0;
        } else if table.offset_row + table.cursor_row >= nrows {
            let last = nrows - 1;
            table.offset_row = std::cmp::min(table.offset_row, last.saturating_sub(height - 1));
            table.cursor_row = last - table.offset_row;
        }
        if table.cursor_row >= height {
            table.offset_row += table.cursor_row + 1 - height;
            table.cursor_row = height - 1;
        }
        if table.offset_column >= ncols {
            table.offset_column = ncols.saturating_sub(1);
            table.cursor_column = 0;
        }
    }

    fn calculate_column_width(state: &ColumnState, max_width: usize, max_column_width: usize) -> usize {
        let width = max_width + COLUMN_WIDTH_MARGIN;
        let base = match state.status {
            ColumnStatus::COLLAPSED => return COLUMN_WIDTH_COLLAPSED_COLUMN,
            ColumnStatus::NORMAL => std::cmp::min(width, max_column_width),
            ColumnStatus::EXPANDED => width,
        };
        (base as isize + state.width_delta).max(MIN_COLUMN_WIDTH as isize) as usize
    }

    fn get_visible_name(name: &str, width: usize) -> String {
        if width < 3 {
            return String::new();
        }
        if name.chars().count() > width {
            let mut reduced: String = name.chars().take(width - 3).collect();
            reduced.push_str("...");
            reduced
        } else {
            name.to_string()
        }
    }

    fn display_value(value: &Value) -> String {
        match value {
            Value::Null => NULL_GLYPH.to_string(),
            Value::Text(s) => s.replace("\r\n", " ↵ ").replace('\n', " ↵ "),
            other => other.to_string(),
        }
    }

    fn get_collapsed_column(nrows: usize) -> ColumnView {
        ColumnView {
            name: "...".to_string(),
            width: COLUMN_WIDTH_COLLAPSED_COLUMN,
            data: vec!["⋮".to_string(); nrows],
            numeric: false,
        }
    }

    fn update_table_data(&mut self) {
        // Adding or deleting rows can change the digits of the row numbers
        let index_width = self.index_width();
        if index_width != self.uilayout.index_width {
            self.uilayout =
                UILayout::from_values(index_width, self.uilayout.width, self.uilayout.height);
        }
        self.clamp_cursor();
        if let Some(session) = self.session.as_ref() {
            let table = &mut self.table;
            let height = self.uilayout.table_height;
            let table_width = self.uilayout.table_width;

            let rbegin = std::cmp::min(table.offset_row, session.view_len());
            let rend = std::cmp::min(rbegin + height, session.view_len());
            let rows = &session.view()[rbegin..rend];

            trace!(
                "Table: Cr {}, Cc {}, Or {}, Oc {}, Rb {}, Re {}, tw: {}, th:{}",
                table.cursor_row,
                table.cursor_column,
                table.offset_row,
                table.offset_column,
                rbegin,
                rend,
                table_width,
                height
            );

            // Calculate current render width for each column
            let widths: Vec<usize> = session
                .column_widths()
                .iter()
                .zip(self.columns.iter())
                .map(|(&w, state)| Self::calculate_column_width(state, w, self.config.max_column_width))
                .collect();

            // Create a list of columns that fit in the table
            table.visible_columns = Vec::new();
            let mut render_widths = Vec::new();
            let mut visible_width = 0;
            for (cidx, &width) in widths.iter().enumerate().skip(table.offset_column) {
                if visible_width + width + 1 <= table_width {
                    table.visible_columns.push(cidx);
                    render_widths.push(width);
                    visible_width += width + 1;
                } else {
                    // Add the last partial visible column
                    if visible_width < table_width {
                        let remaining_width = table_width - visible_width;
                        table.visible_columns.push(cidx);
                        render_widths.push(remaining_width);
                        visible_width += width + 1;
                    }
                    break;
                }
            }
            table.visible_width = visible_width;
            table.cursor_column = std::cmp::min(
                table.cursor_column,
                table.visible_columns.len().saturating_sub(1),
            );

            table.data = Vec::with_capacity(table.visible_columns.len());
            for (&cidx, &width) in table.visible_columns.iter().zip(render_widths.iter()) {
                let Some(column) = session.table().column(cidx) else {
                    error!("Trying to access column with unknown idx {cidx}!");
                    continue;
                };
                if self.columns[cidx].status == ColumnStatus::COLLAPSED {
                    table.data.push(Self::get_collapsed_column(rows.len()));
                } else {
                    let name = match session.sort() {
                        Some((sorted, true)) if sorted == cidx => format!("{} ▲", column.name),
                        Some((sorted, false)) if sorted == cidx => format!("{} ▼", column.name),
                        _ => column.name.clone(),
                    };
                    table.data.push(ColumnView {
                        name: Self::get_visible_name(&name, width),
                        width,
                        numeric: column.kind.is_numeric(),
                        data: rows
                            .iter()
                            .map(|&ridx| Self::display_value(&column.values[ridx]))
                            .collect(),
                    });
                }
            }

            // Selection checkbox and row number
            table.marked = rows.iter().map(|&ridx| session.is_selected(ridx)).collect();
            table.index = ColumnView {
                name: String::new(),
                width: self.uilayout.index_width,
                numeric: false,
                data: rows
                    .iter()
                    .zip(table.marked.iter())
                    .map(|(&ridx, &marked)| {
                        let mark = if marked { "[x]" } else { "[ ]" };
                        format!("{mark} {}", ridx + 1)
                    })
                    .collect(),
            };
        }
        self.update_uidata_for_table();
    }

    fn update_uidata_for_table(&mut self) {
        let show_popup = self.uidata.show_popup;
        let popup_message = std::mem::take(&mut self.uidata.popup_message);
        match &self.session {
            None => {
                self.uidata = UIData::empty();
                self.uidata.layout = self.uilayout.clone();
            }
            Some(session) => {
                let table = &self.table;
                self.uidata = UIData {
                    name: session.name().to_string(),
                    table: table.data.clone(),
                    index: table.index.clone(),
                    marked: table.marked.clone(),
                    nrows: session.view_len(),
                    total_rows: session.table().nrows(),
                    nselected: session.selection_count(),
                    selected_row: table.cursor_row,
                    selected_column: table.cursor_column,
                    abs_selected_row: table.offset_row + table.cursor_row,
                    query: session.query().to_string(),
                    nfilters: session.filter_count(),
                    show_popup: false,
                    popup_message: String::new(),
                    layout: self.uilayout.clone(),
                    cmdinput: self.last_input.clone(),
                    cmd_mode: self.cmd_mode,
                    active_cmdinput: self.active_cmdinput,
                    notice: self.notice.clone(),
                    empty: false,
                };
            }
        }
        self.uidata.show_popup = show_popup;
        self.uidata.popup_message = popup_message;
        self.uidata.notice = self.notice.clone();
        self.uidata.cmdinput = self.last_input.clone();
        self.uidata.cmd_mode = self.cmd_mode;
        self.uidata.active_cmdinput = self.active_cmdinput;
    }
}
