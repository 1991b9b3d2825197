//! `epd-photoframe`: show one frame on the 7.3inch Spectra 6 panel and go back to sleep
//!
//! Meant to be started from cron or a systemd timer. Exit codes: 0 success,
//! 1 configuration or setup, 2 acquisition, 3 codec, 4 panel, 130 interrupted.

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use epd_photoframe::codec::{self, FrameFormat};
use epd_photoframe::config::Config;
use epd_photoframe::epd7in3e;
use epd_photoframe::pipeline::{CancelToken, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "epd-photoframe", version, about)]
struct Cli {
    /// TOML config file, built-in defaults otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More logging, repeat for trace output (RUST_LOG wins)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a frame and show it
    Show {
        #[command(flatten)]
        source: SourceArgs,

        /// Retries of transient fetch failures
        #[arg(long)]
        retries: Option<u32>,

        /// Do not blank the panel first
        #[arg(long)]
        no_clear: bool,
    },
    /// Blank the panel
    Clear,
    /// Fetch and encode a frame without touching the panel
    Convert {
        #[command(flatten)]
        source: SourceArgs,

        /// Where to write the packed panel buffer
        #[arg(long)]
        out: PathBuf,

        /// Also write a PNG of what the panel would show
        #[arg(long)]
        preview: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Image server host
    #[arg(long)]
    host: Option<String>,

    /// Image server port
    #[arg(long)]
    port: Option<u16>,

    /// Resource path on the server
    #[arg(long)]
    path: Option<String>,

    /// Read a local file instead of asking the server
    #[arg(long)]
    file: Option<PathBuf>,

    /// Payload format
    #[arg(long, value_enum)]
    format: Option<FrameFormat>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Floyd-Steinberg dithering
    #[arg(long)]
    dither: bool,
}

impl SourceArgs {
    fn apply(self, config: &mut Config) {
        let source = &mut config.source;
        if let Some(host) = self.host {
            source.host = host;
        }
        if let Some(port) = self.port {
            source.port = port;
        }
        if let Some(path) = self.path {
            source.path = path;
        }
        if self.file.is_some() {
            source.file = self.file;
        }
        if let Some(format) = self.format {
            source.format = format;
        }
        if let Some(timeout) = self.timeout {
            source.timeout_secs = timeout;
        }
        if self.dither {
            config.panel.dither = true;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let mut config = match cli.config.as_deref().map(Config::load).transpose() {
        Ok(config) => config.unwrap_or_default(),
        Err(err) => {
            error!(stage = "config", error = %chain(&err), "startup failed");
            return ExitCode::from(1);
        }
    };
    let command = apply_overrides(cli.command, &mut config);
    if let Err(err) = config.validate() {
        error!(stage = "config", error = %chain(&err), "startup failed");
        return ExitCode::from(1);
    }

    let cancel = CancelToken::new();
    let handler = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || handler.cancel()) {
        warn!(error = %err, "no interrupt handler, ctrl-c will kill the process");
    }
    let pipeline = Pipeline::new(config.pipeline_options(), cancel);

    match command {
        Task::Show => show(&config, &pipeline),
        Task::Clear => clear(&config, &pipeline),
        Task::Convert { out, preview } => convert(&config, &pipeline, out, preview),
    }
}

enum Task {
    Show,
    Clear,
    Convert {
        out: PathBuf,
        preview: Option<PathBuf>,
    },
}

/// Folds the command line into `config`, flags win over the file
fn apply_overrides(command: Command, config: &mut Config) -> Task {
    match command {
        Command::Show {
            source,
            retries,
            no_clear,
        } => {
            source.apply(config);
            if let Some(retries) = retries {
                config.retry.max_retries = retries;
            }
            if no_clear {
                config.panel.clear_before_display = false;
            }
            Task::Show
        }
        Command::Clear => Task::Clear,
        Command::Convert {
            source,
            out,
            preview,
        } => {
            source.apply(config);
            Task::Convert { out, preview }
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Error message including every cause
fn chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(feature = "linux-dev")]
fn exit(result: Result<(), epd_photoframe::error::PipelineError>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => ExitCode::from(err.exit_code()),
    }
}

#[cfg(feature = "linux-dev")]
fn show(config: &Config, pipeline: &Pipeline) -> ExitCode {
    use epd_photoframe::session::PanelSession;

    let driver = match epd_photoframe::linux::open_panel(&config.pins, &config.panel) {
        Ok(driver) => driver,
        Err(err) => {
            error!(stage = "setup", error = %chain(&err), "startup failed");
            return ExitCode::from(1);
        }
    };
    let source = config.image_source();
    let mut session = PanelSession::new(driver);
    exit(pipeline.run(&mut session, source.as_ref()).map(|_| ()))
}

#[cfg(feature = "linux-dev")]
fn clear(config: &Config, pipeline: &Pipeline) -> ExitCode {
    use epd_photoframe::session::PanelSession;

    let driver = match epd_photoframe::linux::open_panel(&config.pins, &config.panel) {
        Ok(driver) => driver,
        Err(err) => {
            error!(stage = "setup", error = %chain(&err), "startup failed");
            return ExitCode::from(1);
        }
    };
    let mut session = PanelSession::new(driver);
    exit(pipeline.clear_only(&mut session))
}

#[cfg(not(feature = "linux-dev"))]
fn show(_config: &Config, _pipeline: &Pipeline) -> ExitCode {
    no_hardware()
}

#[cfg(not(feature = "linux-dev"))]
fn clear(_config: &Config, _pipeline: &Pipeline) -> ExitCode {
    no_hardware()
}

#[cfg(not(feature = "linux-dev"))]
fn no_hardware() -> ExitCode {
    error!(stage = "setup", "built without the linux-dev feature, only `convert` is available");
    ExitCode::from(1)
}

fn convert(
    config: &Config,
    pipeline: &Pipeline,
    out: PathBuf,
    preview: Option<PathBuf>,
) -> ExitCode {
    let source = config.image_source();
    let buffer = match pipeline.convert(source.as_ref(), epd7in3e::MODE) {
        Ok(buffer) => buffer,
        Err(err) => return ExitCode::from(err.exit_code()),
    };

    if let Err(err) = fs::write(&out, buffer.as_bytes()) {
        error!(path = %out.display(), error = %err, "failed to write panel buffer");
        return ExitCode::from(1);
    }
    info!(path = %out.display(), len = buffer.len(), "panel buffer written");

    if let Some(path) = preview {
        if let Err(err) = codec::render_preview(&buffer).save(&path) {
            error!(path = %path.display(), error = %err, "failed to write preview");
            return ExitCode::from(1);
        }
        info!(path = %path.display(), "preview written");
    }
    ExitCode::SUCCESS
}
