use polars::prelude::*;
use rayon::prelude::*;
use std::fs;
use std::io::{Cursor, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use crate::domain::{EXPORT_FILE_NAME, TEError};
use crate::table::{Column, ColumnKind, Table, Value};

type FrameColumn = polars::prelude::Column;

#[derive(Debug)]
enum FileType {
    CSV,
    PARQUET,
    ARROW,
}

#[derive(Debug)]
struct FileInfo {
    path: PathBuf,
    file_size: u64,
    file_type: FileType,
}

/// Where the table of a session comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    File(PathBuf),
    Stdin,
    Demo(usize),
}

impl Source {
    pub fn name(&self) -> String {
        match self {
            Source::File(path) => path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("???")
                .to_string(),
            Source::Stdin => "stdin".to_string(),
            Source::Demo(nrows) => format!("demo ({nrows} rows)"),
        }
    }
}

pub fn load(source: &Source) -> Result<Table, TEError> {
    let start_time = Instant::now();
    let table = match source {
        Source::File(path) => load_data_file(path)?,
        Source::Stdin => {
            let mut bytes = Vec::new();
            std::io::stdin().read_to_end(&mut bytes)?;
            load_csv_bytes(bytes)?
        }
        Source::Demo(nrows) => load_demo(*nrows)?,
    };
    info!(
        "Loaded {} with {} rows x {} columns in {}ms",
        source.name(),
        table.nrows(),
        table.ncols(),
        start_time.elapsed().as_millis()
    );
    debug!("Columns: {:?}", table.column_names());
    Ok(table)
}

pub fn load_data_file(path: &Path) -> Result<Table, TEError> {
    let file_info = get_file_info(path)?;
    debug!(
        "Loading {:?} file {:?} ({} bytes)",
        file_info.file_type, file_info.path, file_info.file_size
    );
    let frame = match file_info.file_type {
        FileType::CSV => load_csv(&file_info.path)?,
        FileType::PARQUET => load_parquet(&file_info.path)?,
        FileType::ARROW => load_arrow(&file_info.path)?,
    };
    table_from_frame(&frame.collect()?)
}

/// Parse an uploaded csv. The first line is the header.
pub fn load_csv_bytes(bytes: Vec<u8>) -> Result<Table, TEError> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()?;
    table_from_frame(&df)
}

/// Synthetic table with columns `id` (1..=nrows), `name` ("name_<id>") and `value` (id mod 100).
pub fn load_demo(nrows: usize) -> Result<Table, TEError> {
    let ids: Vec<i64> = (1..=nrows as i64).collect();
    let names: Vec<String> = ids.iter().map(|i| format!("name_{i}")).collect();
    let values: Vec<i64> = ids.iter().map(|i| i % 100).collect();
    let df = df!(
        "id" => ids,
        "name" => names,
        "value" => values,
    )?;
    table_from_frame(&df)
}

fn detect_file_type(path: &Path) -> Result<FileType, TEError> {
    match path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_uppercase())
        .as_deref()
    {
        Some("CSV") => Ok(FileType::CSV),
        Some("PARQUET") | Some("PQ") => Ok(FileType::PARQUET),
        Some("ARROW") | Some("IPC") | Some("FEATHER") => Ok(FileType::ARROW),
        _ => Err(TEError::UnknownFileType),
    }
}

fn get_file_info(path: &Path) -> Result<FileInfo, TEError> {
    let metadata = fs::metadata(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => TEError::FileNotFound,
        ErrorKind::PermissionDenied => TEError::PermissionDenied,
        _ => TEError::IoError(e),
    })?;
    if !metadata.is_file() {
        return Err(TEError::LoadingFailed("Not a file!".into()));
    }

    Ok(FileInfo {
        path: path.to_path_buf(),
        file_size: metadata.len(),
        file_type: detect_file_type(path)?,
    })
}

fn load_csv(path: &Path) -> Result<LazyFrame, PolarsError> {
    LazyCsvReader::new(PlPath::Local(path.into()))
        .with_has_header(true)
        .finish()
}

fn load_parquet(path: &Path) -> Result<LazyFrame, PolarsError> {
    LazyFrame::scan_parquet(PlPath::Local(path.into()), ScanArgsParquet::default())
}

fn load_arrow(path: &Path) -> Result<LazyFrame, PolarsError> {
    LazyFrame::scan_ipc(
        PlPath::Local(path.into()),
        polars::io::ipc::IpcScanOptions,
        UnifiedScanArgs::default(),
    )
}

fn column_kind(dtype: &DataType) -> ColumnKind {
    match dtype {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => ColumnKind::Integer,
        DataType::Float32 | DataType::Float64 => ColumnKind::Float,
        DataType::String => ColumnKind::Text,
        DataType::Null => ColumnKind::Null,
        _ => ColumnKind::Other,
    }
}

/// Convert a loaded frame into a table, one column per rayon task.
pub fn table_from_frame(df: &DataFrame) -> Result<Table, TEError> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    let columns: Result<Vec<Column>, PolarsError> = names
        .par_iter()
        .map(|name| load_column(df, name))
        .collect();
    let columns = columns?;
    for c in columns.iter() {
        debug!("Column \"{}\": {:?}, {} rows", c.name, c.kind, c.len());
    }
    Table::new(columns)
}

fn load_column(df: &DataFrame, name: &str) -> Result<Column, PolarsError> {
    let col = df.column(name)?;
    let kind = column_kind(col.dtype());
    let values: Vec<Value> = match kind {
        ColumnKind::Integer => {
            let casted = col.cast(&DataType::Int64)?;
            casted
                .i64()?
                .into_iter()
                .map(|v| v.map_or(Value::Null, Value::Int))
                .collect()
        }
        ColumnKind::Float => {
            let casted = col.cast(&DataType::Float64)?;
            casted
                .f64()?
                .into_iter()
                .map(|v| v.map_or(Value::Null, Value::Float))
                .collect()
        }
        ColumnKind::Text | ColumnKind::Other => {
            let casted = col.cast(&DataType::String)?;
            casted
                .str()?
                .into_iter()
                .map(|v| v.map_or(Value::Null, |s| Value::Text(s.to_string())))
                .collect()
        }
        ColumnKind::Null => vec![Value::Null; col.len()],
    };
    Ok(Column::new(name, kind, values))
}

fn column_series(column: &Column, rows: &[usize]) -> Series {
    let name: PlSmallStr = column.name.as_str().into();
    match column.kind {
        ColumnKind::Integer => {
            let values: Vec<Option<i64>> = rows.iter().map(|&r| column.values[r].as_int()).collect();
            Series::new(name, values)
        }
        ColumnKind::Float => {
            let values: Vec<Option<f64>> =
                rows.iter().map(|&r| column.values[r].as_float()).collect();
            Series::new(name, values)
        }
        ColumnKind::Text | ColumnKind::Other | ColumnKind::Null => {
            let values: Vec<Option<String>> =
                rows.iter().map(|&r| column.values[r].as_text()).collect();
            Series::new(name, values)
        }
    }
}

/// Frame holding `rows` of the table, in the given order.
pub fn frame_from_table(table: &Table, rows: &[usize]) -> Result<DataFrame, TEError> {
    let columns: Vec<FrameColumn> = table
        .columns()
        .iter()
        .map(|c| FrameColumn::from(column_series(c, rows)))
        .collect();
    Ok(DataFrame::new(columns)?)
}

/// UTF-8 csv with header of `rows` of the table. Nulls become empty fields.
pub fn write_csv(table: &Table, rows: &[usize]) -> Result<Vec<u8>, TEError> {
    let mut df = frame_from_table(table, rows)?;
    let mut buffer = Vec::new();
    CsvWriter::new(&mut buffer)
        .include_header(true)
        .finish(&mut df)?;
    Ok(buffer)
}

/// Write `rows` of the table to `edited_table.csv` inside `dir`.
pub fn export(table: &Table, rows: &[usize], dir: &Path) -> Result<PathBuf, TEError> {
    let start_time = Instant::now();
    let bytes = write_csv(table, rows)?;
    fs::create_dir_all(dir)?;
    let path = dir.join(EXPORT_FILE_NAME);
    fs::write(&path, &bytes)?;
    info!(
        "Exported {} rows ({} bytes) to {:?} in {}ms",
        rows.len(),
        bytes.len(),
        path,
        start_time.elapsed().as_millis()
    );
    Ok(path)
}
