use std::fmt;
use std::io::Error;
use std::path::PathBuf;

use derive_setters::Setters;
use polars::error::PolarsError;
use ratatui::crossterm::event::KeyEvent;

pub const DEMO_ROWS: usize = 200_000;
pub const EXPORT_FILE_NAME: &str = "edited_table.csv";

pub const HELP_TEXT: &str = "\
Navigation
  arrows / hjkl   move cursor
  PgUp / PgDn     page up / down
  g / G           first / last row
  0 / $           first / last column

View
  /               global search (text columns)
  f               filter current column
  Esc             drop last filter, then sort / close popup
  [ / ]           sort column ascending / descending
  < / >           narrow / widen column
  c / C           collapse / expand column

Editing
  Enter / e       edit cell (empty input sets null)
  Space           toggle row selection
  a / A           select all visible / clear selection
  o               add blank row
  d               delete selected rows (needs an 'id' column)
  s               export view to edited_table.csv
  y / Y           copy cell / selected rows

Session
  D               load demo table
  O               open file
  ?               this help
  q               quit";

#[derive(Debug)]
pub enum TEError {
    IoError(Error),
    PolarsError(PolarsError),
    LoadingFailed(String),
    FileNotFound,
    PermissionDenied,
    UnknownFileType,
    InvalidCell(usize, usize),
}

impl fmt::Display for TEError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TEError::IoError(e) => write!(f, "I/O error: {e}"),
            TEError::PolarsError(e) => write!(f, "Could not process data: {e}"),
            TEError::LoadingFailed(reason) => write!(f, "Loading failed: {reason}"),
            TEError::FileNotFound => write!(f, "File not found"),
            TEError::PermissionDenied => write!(f, "Permission denied"),
            TEError::UnknownFileType => write!(f, "Unknown file type"),
            TEError::InvalidCell(row, col) => write!(f, "No cell at row {row}, column {col}"),
        }
    }
}

impl std::error::Error for TEError {}

impl From<Error> for TEError {
    fn from(err: Error) -> Self {
        TEError::IoError(err)
    }
}

impl From<PolarsError> for TEError {
    fn from(err: PolarsError) -> Self {
        TEError::PolarsError(err)
    }
}

#[derive(Debug, Clone, Setters)]
#[setters(prefix = "with_")]
pub struct TEConfig {
    pub event_poll_time: u64,
    pub max_column_width: usize,
    pub demo_rows: usize,
    pub export_dir: PathBuf,
}

impl Default for TEConfig {
    fn default() -> Self {
        Self {
            event_poll_time: 100,
            max_column_width: 40,
            demo_rows: DEMO_ROWS,
            export_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CMDMode {
    GlobalSearch,
    FilterByColumn,
    EditCell,
    OpenFile,
}

impl CMDMode {
    pub fn prompt(&self) -> &'static str {
        match self {
            CMDMode::GlobalSearch => "Search: ",
            CMDMode::FilterByColumn => "Filter: ",
            CMDMode::EditCell => "Edit: ",
            CMDMode::OpenFile => "Open: ",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Quit,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    MovePageUp,
    MovePageDown,
    MoveBeginning,
    MoveEnd,
    MoveToFirstColumn,
    MoveToLastColumn,
    Resize(usize, usize),
    Help,
    Exit,
    Search,
    Filter,
    EditCell,
    ToggleSelection,
    SelectAll,
    ClearSelection,
    AddRow,
    DeleteSelected,
    Export,
    SortAscending,
    SortDescending,
    WidenColumn,
    NarrowColumn,
    ToggleColumnState,
    ToggleExpandColumnState,
    CopyCell,
    CopyRows,
    LoadDemo,
    OpenFile,
    RawKey(KeyEvent),
}
