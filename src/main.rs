use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use ratatui::DefaultTerminal;
use tracing::{error, info};
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod domain;
mod inputter;
mod loader;
mod model;
mod session;
mod table;
mod ui;

use controller::Controller;
use domain::{DEMO_ROWS, TEConfig, TEError};
use loader::Source;
use model::{Model, Status};
use session::Session;
use ui::TableUI;

/// Edit csv tables in the terminal.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// File to open (csv, parquet or arrow). Use '-' to read csv from stdin.
    path: Option<String>,

    /// Start with the generated demo table
    #[arg(long, conflicts_with = "path")]
    demo: bool,

    /// Number of rows in the demo table
    #[arg(long, default_value_t = DEMO_ROWS)]
    demo_rows: usize,

    /// Directory edited_table.csv is exported to
    #[arg(short, long, default_value = ".")]
    output_dir: String,

    /// Width limit of a column in normal state
    #[arg(long, default_value_t = 40)]
    max_column_width: usize,

    /// Input poll interval in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,

    /// Log file, filtered by RUST_LOG
    #[arg(long, default_value = "tabedit.log")]
    log_file: String,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_file);

    match run(args) {
        Err(e) => {
            error!("Exiting with error: {:?}", e);
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

fn init_logging(log_file: &str) {
    let file = match expand_path(log_file).and_then(|path| File::create(path).map_err(TEError::from)) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Warning: Could not open log file {log_file}: {e}");
            return;
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .with(ErrorLayer::default())
        .init();
}

fn expand_path(path: &str) -> Result<PathBuf, TEError> {
    let expanded =
        shellexpand::full(path).map_err(|e| TEError::LoadingFailed(e.to_string()))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

fn run(args: Args) -> Result<(), TEError> {
    info!("Starting tabedit with {:?}", args);

    let config = TEConfig::default()
        .with_event_poll_time(args.poll_ms)
        .with_max_column_width(args.max_column_width)
        .with_demo_rows(args.demo_rows)
        .with_export_dir(expand_path(&args.output_dir)?);

    let source = match args.path.as_deref() {
        Some("-") => Some(Source::Stdin),
        Some(path) => Some(Source::File(expand_path(path)?)),
        None if args.demo => Some(Source::Demo(config.demo_rows)),
        None => None,
    };

    // A table given on the command line must load before the terminal is taken over
    let session = match &source {
        Some(source) => Some(Session::load(source)?),
        None => None,
    };

    let mut terminal = ratatui::init();
    let result = event_loop(&mut terminal, &config, session);
    ratatui::restore();
    result
}

fn event_loop(
    terminal: &mut DefaultTerminal,
    config: &TEConfig,
    session: Option<Session>,
) -> Result<(), TEError> {
    let size = terminal.size()?;
    let mut model = Model::init(config, size.width as usize, size.height as usize);
    if let Some(session) = session {
        model.set_session(session);
    }
    let ui = TableUI::new();
    let controller = Controller::new(config);

    while model.status != Status::QUITTING {
        // Render the current view
        terminal.draw(|f| ui.draw(&model, f))?;

        // Handle events and map to a Message
        let message = controller.handle_event(&model)?;
        model.update(message)?;
    }
    info!("Quitting");
    Ok(())
}
