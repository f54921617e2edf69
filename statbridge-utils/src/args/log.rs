use crate::{log, paths};

use anyhow::{anyhow, Result};
use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::*;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::{Directive, FilterExt},
    fmt::format::FmtSpan,
    layer::Filter,
    prelude::*,
    registry::LookupSpan,
    EnvFilter, Layer,
};

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;
type BoxedFilter<S> = Box<dyn Filter<S> + Send + Sync + 'static>;

#[derive(Debug, clap::Args)]
pub struct LogArgGroup {
    /// Increase verbosity of every log output: -v logs each poll, -vv each recorded value.
    /// Overrides the --log-*-directive arguments; RUST_LOG overrides both
    #[arg(short, action = clap::ArgAction::Count)]
    verbosity: u8,

    /// Do not log to stderr
    #[arg(short, long, conflicts_with_all = &["no_color", "log_stderr_directive"])]
    quiet: bool,

    /// Log to stderr without ANSI colors
    #[arg(long, conflicts_with = "quiet")]
    no_color: bool,

    /// EnvFilter directive for stderr
    #[arg(long, conflicts_with = "quiet", default_value = "info")]
    log_stderr_directive: String,

    /// Do not log to journald
    #[cfg(target_os = "linux")]
    #[arg(long)]
    no_log_journald: bool,

    /// EnvFilter directive for journald
    #[cfg(target_os = "linux")]
    #[arg(long, conflicts_with = "no_log_journald", default_value = "info")]
    log_journald_directive: String,

    /// Do not log to rotating files
    #[arg(long)]
    no_log_file: bool,

    /// Directory holding the rotating log files
    #[arg(long, conflicts_with = "no_log_file", default_value_os_t = paths::log_dir())]
    log_file_directory: PathBuf,

    /// EnvFilter directive for log files
    #[arg(long, conflicts_with = "no_log_file", default_value = "info")]
    log_file_directive: String,

    /// Number of rotated log files kept
    #[arg(long, conflicts_with = "no_log_file", default_value_t = 25)]
    log_file_max_files: usize,

    /// Size in bytes at which the log file is rotated
    #[arg(long, conflicts_with = "no_log_file", default_value_t = 10_000_000)]
    log_file_max_bytes: usize,
}

///
/// Keeps the non-blocking log writers flushing. Logs emitted after this is dropped may be lost.
///
pub struct Guard {
    _writers: Vec<WorkerGuard>,
}

impl LogArgGroup {
    fn level(&self) -> Level {
        match self.verbosity {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    //
    // Events logged with `always!` pass every filter
    //
    fn filter<S>(&self, directive: &str) -> Result<BoxedFilter<S>>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let default = match self.verbosity {
            0 => Directive::from_str(directive)
                .map_err(|e| anyhow!("invalid log directive '{}': {}", directive, e))?,
            _ => self.level().into(),
        };
        let env_filter = EnvFilter::builder()
            .with_default_directive(default)
            .from_env()?;
        Ok(env_filter.or(log::Always).boxed())
    }

    fn stderr_layer<S>(&self) -> Result<(BoxedLayer<S>, WorkerGuard)>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let filter = if self.quiet {
            log::Always.boxed()
        } else {
            self.filter(&self.log_stderr_directive)?
        };
        let (writer, guard) = tracing_appender::non_blocking(io::stderr());
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(!self.no_color)
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .with_span_events(FmtSpan::NONE)
            .with_filter(filter)
            .boxed();
        Ok((layer, guard))
    }

    fn file_layer<S>(&self) -> Result<Option<(BoxedLayer<S>, WorkerGuard)>>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        if self.no_log_file {
            return Ok(None);
        }

        let dir = &self.log_file_directory;
        fs::create_dir_all(dir)
            .map_err(|e| anyhow!("failed creating log directory '{}': {}", dir.display(), e))?;
        let rotating = FileRotate::new(
            paths::log_basename(dir),
            AppendTimestamp::default(FileLimit::MaxFiles(self.log_file_max_files)),
            ContentLimit::BytesSurpassed(self.log_file_max_bytes),
            Compression::OnRotate(0),
            #[cfg(unix)]
            None,
        );
        let (writer, guard) = tracing_appender::non_blocking(rotating);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(self.filter(&self.log_file_directive)?)
            .boxed();
        Ok(Some((layer, guard)))
    }

    #[cfg(target_os = "linux")]
    fn journald_layer<S>(&self) -> Result<Option<BoxedLayer<S>>>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        if self.no_log_journald {
            return Ok(None);
        }

        let filter = self.filter(&self.log_journald_directive)?;
        match tracing_journald::layer() {
            Ok(layer) => Ok(Some(
                layer
                    .with_syslog_identifier("statbridge".to_owned())
                    .with_filter(filter)
                    .boxed(),
            )),
            Err(e) => {
                log::warn_early!("Failed setting up journald logging: {}", e);
                Ok(None)
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn journald_layer<S>(&self) -> Result<Option<BoxedLayer<S>>>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        Ok(None)
    }

    pub fn as_tracing_layer<S>(&self) -> Result<(impl Layer<S> + Send + Sync, Guard)>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let (stderr, stderr_guard) = self.stderr_layer()?;
        let mut layers = vec![stderr];
        let mut writers = vec![stderr_guard];

        if let Some((file, file_guard)) = self.file_layer()? {
            layers.push(file);
            writers.push(file_guard);
        }
        layers.extend(self.journald_layer()?);

        if self.quiet && layers.len() == 1 {
            log::warn_early!("No logging is enabled. All logs will be lost.");
        }

        Ok((layers, Guard { _writers: writers }))
    }

    ///
    /// Install the configured outputs as the global subscriber
    ///
    pub fn init(&self) -> Result<Guard> {
        let (layer, guard) = self.as_tracing_layer()?;
        tracing_subscriber::registry().with(layer).try_init()?;
        Ok(guard)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::Parser;
    use test_log::test;

    #[derive(Debug, Parser)]
    struct Args {
        #[clap(flatten)]
        log: LogArgGroup,
    }

    fn parse(args: &[&str]) -> LogArgGroup {
        Args::try_parse_from(std::iter::once("statbridge").chain(args.iter().copied()))
            .expect("parse")
            .log
    }

    #[test]
    fn defaults() {
        let log = parse(&[]);
        assert_eq!(log.level(), Level::INFO);
        assert!(!log.quiet);
        assert_eq!(log.log_stderr_directive, "info");
        assert_eq!(log.log_file_directory, paths::log_dir());
        assert_eq!(log.log_file_max_files, 25);
        assert_eq!(log.log_file_max_bytes, 10_000_000);
    }

    #[test]
    fn quiet_conflicts_with_stderr_options() {
        assert!(Args::try_parse_from(["statbridge", "-q", "--no-color"]).is_err());
        assert!(
            Args::try_parse_from(["statbridge", "-q", "--log-stderr-directive", "debug"]).is_err()
        );
    }

    #[test]
    fn verbosity_levels() {
        assert_eq!(parse(&["-v"]).level(), Level::DEBUG);
        assert_eq!(parse(&["-vv"]).level(), Level::TRACE);
        assert_eq!(parse(&["-vvvv"]).level(), Level::TRACE);
    }

    #[test]
    fn file_layer_creates_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_dir = dir.path().join("nested").join("logs");
        let log = parse(&[
            "--log-file-directory",
            log_dir.to_str().expect("utf8 path"),
        ]);

        let layer = log
            .file_layer::<tracing_subscriber::Registry>()
            .expect("file layer");
        assert!(layer.is_some());
        assert!(log_dir.is_dir());

        assert!(parse(&["--no-log-file"])
            .file_layer::<tracing_subscriber::Registry>()
            .expect("file layer")
            .is_none());
    }

    #[test]
    fn invalid_directive_is_rejected() {
        let log = parse(&[
            "--no-log-file",
            "--log-stderr-directive",
            "statbridge=notalevel",
        ]);
        assert!(log
            .as_tracing_layer::<tracing_subscriber::Registry>()
            .is_err());
    }
}
