//! Daemon configuration: CLI flags, log facilities, and the startup
//! configuration file.
//!
//! The configuration file is a script of control verbs, one per line,
//! identical to what the control socket accepts at runtime. When a file
//! is given, no default listeners are created; only its `add listener`
//! lines matter.

use anyhow::{Context, Result};
use clap::Parser;
use icnfwd_common::control::ControlCommand;
use icnfwd_common::{Error, DEFAULT_CONTROL_PORT, DEFAULT_PORT};
use log::LevelFilter;
use std::path::{Path, PathBuf};

/// The icnfwd forwarder daemon.
#[derive(Parser, Debug)]
#[command(name = "icnfwd", version, about = "Information-centric forwarding daemon")]
pub struct Cli {
    /// TCP and UDP port for the default packet listeners
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Detach from the console and run in the background
    #[arg(long)]
    pub daemon: bool,

    /// Maximum number of content objects to cache
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Set a log facility to a level, e.g. --log io=debug (repeatable).
    /// Facilities: all, config, core, io, message, processor.
    /// Levels: debug, info, notice, warning, error, critical, alert, off.
    #[arg(long = "log", value_name = "FACILITY=LEVEL")]
    pub log: Vec<String>,

    /// Write log output to a file (required with --daemon)
    #[arg(long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Configuration file of control verbs applied at startup
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Control-plane TCP port
    #[arg(long = "control-port", default_value_t = DEFAULT_CONTROL_PORT)]
    pub control_port: u16,
}

/// Logging facility, mapped onto module-path filter targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facility {
    All,
    Config,
    Core,
    Io,
    Message,
    Processor,
}

impl Facility {
    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Facility::All),
            "config" => Ok(Facility::Config),
            "core" => Ok(Facility::Core),
            "io" => Ok(Facility::Io),
            "message" => Ok(Facility::Message),
            "processor" => Ok(Facility::Processor),
            other => Err(Error::Config(format!("unknown log facility '{}'", other))),
        }
    }

    /// Module targets this facility controls.
    pub fn targets(self) -> &'static [&'static str] {
        match self {
            Facility::All => &[],
            Facility::Config => &["icnfwd_daemon::config", "icnfwd_daemon::control"],
            Facility::Core => &[
                "icnfwd_daemon::dispatcher",
                "icnfwd_daemon::forwarder",
                "icnfwd_daemon::messenger",
            ],
            Facility::Io => &["icnfwd_daemon::io", "icnfwd_daemon::connections"],
            Facility::Message => &["icnfwd_common"],
            Facility::Processor => &["icnfwd_daemon::processor", "icnfwd_tables"],
        }
    }
}

fn parse_level(s: &str) -> Result<LevelFilter, Error> {
    match s.to_ascii_lowercase().as_str() {
        "debug" => Ok(LevelFilter::Debug),
        "info" | "notice" => Ok(LevelFilter::Info),
        "warning" => Ok(LevelFilter::Warn),
        "error" | "critical" | "alert" => Ok(LevelFilter::Error),
        "off" => Ok(LevelFilter::Off),
        other => Err(Error::Config(format!("unknown log level '{}'", other))),
    }
}

/// Parse a `facility=level` argument.
pub fn parse_log_spec(spec: &str) -> Result<(Facility, LevelFilter), Error> {
    let (facility, level) = spec
        .split_once('=')
        .ok_or_else(|| Error::Config(format!("expected FACILITY=LEVEL, got '{}'", spec)))?;
    Ok((Facility::from_str(facility)?, parse_level(level)?))
}

/// Initialize the global logger from the CLI's `--log` and `--log-file`.
pub fn init_logging(specs: &[String], log_file: Option<&Path>) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    for spec in specs {
        let (facility, level) = parse_log_spec(spec)?;
        if facility == Facility::All {
            builder.filter_level(level);
        } else {
            for target in facility.targets() {
                builder.filter_module(target, level);
            }
        }
    }
    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

/// Load a configuration file: one control verb per line, `#` comments.
pub fn load_config_file(path: &Path) -> Result<Vec<ControlCommand>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let mut commands = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let parsed = ControlCommand::parse(line)
            .with_context(|| format!("{}:{}", path.display(), index + 1))?;
        if let Some(command) = parsed {
            commands.push(command);
        }
    }
    Ok(commands)
}
