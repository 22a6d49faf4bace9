// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use colored::*;
use std::cell::RefCell;
use std::convert::TryFrom;
use std::fs::File;
use std::fs::OpenOptions;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use lazy_static::lazy_static;
use log::{debug, max_level, set_logger, set_max_level, LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use simplelog::{ConfigBuilder, LevelPadding, WriteLogger};
use tokio::task_local;

const TIME_FORMAT_STR: &str = "%H:%M:%S";

lazy_static! {
  pub static ref ENGINE_LOGGER: EngineLogger = EngineLogger::new();
}

///
/// A global `log::Log` implementation that writes colored, human-readable lines to stderr, and
/// optionally mirrors every record into a per-run trace file (see `set_run_logger`).
///
pub struct EngineLogger {
  run_log: Mutex<MaybeWriteLogger<File>>,
  use_color: AtomicBool,
}

impl EngineLogger {
  pub fn new() -> EngineLogger {
    EngineLogger {
      run_log: Mutex::new(MaybeWriteLogger::empty()),
      use_color: AtomicBool::new(false),
    }
  }

  pub fn init(max_level: LevelFilter, use_color: bool) {
    set_max_level(max_level);
    ENGINE_LOGGER.use_color.store(use_color, Ordering::SeqCst);
    if set_logger(&*ENGINE_LOGGER).is_err() {
      debug!("Logging already initialized.");
    }
  }

  ///
  /// Set up a file logger that mirrors every emitted record, regardless of `Destination`. Used to
  /// capture a durable trace of a single run of the engine, independent of whatever is printed to
  /// the user's terminal.
  ///
  pub fn set_run_logger(&self, log_file_path: PathBuf) -> Result<(), String> {
    {
      // Close any previously open file by dropping the existing logger.
      *self.run_log.lock() = MaybeWriteLogger::empty();
    }

    OpenOptions::new()
      .create(true)
      .append(true)
      .open(log_file_path)
      .map(|file| {
        *self.run_log.lock() = MaybeWriteLogger::new(file);
      })
      .map_err(|err| format!("Error opening run trace log: {}", err))
  }
}

impl Log for EngineLogger {
  fn enabled(&self, metadata: &Metadata) -> bool {
    // Individual log levels are handled by each sub-logger, and a global filter is applied via
    // set_max_level. No need to filter here.
    metadata.level() <= max_level()
  }

  fn log(&self, record: &Record) {
    use chrono::Timelike;
    use log::Level;

    match get_destination() {
      Destination::Stderr => {
        let cur_date = chrono::Local::now();
        let time_str = format!(
          "{}.{:02}",
          cur_date.format(TIME_FORMAT_STR),
          cur_date.time().nanosecond() / 10_000_000 // two decimal places of precision
        );

        let level = record.level();
        let use_color = self.use_color.load(Ordering::SeqCst);

        let level_marker = match level {
          _ if !use_color => format!("[{}]", level).normal().clear(),
          Level::Info => format!("[{}]", level).normal(),
          Level::Error => format!("[{}]", level).red(),
          Level::Warn => format!("[{}]", level).red(),
          Level::Debug => format!("[{}]", level).green(),
          Level::Trace => format!("[{}]", level).magenta(),
        };

        eprintln!("{} {} {}", time_str, level_marker, record.args());
      }
      Destination::Quiet => (),
    }

    // Mirror every record into the run trace file, if one is configured, regardless of the
    // chosen stderr-vs-quiet destination.
    self.run_log.lock().log(record);
  }

  fn flush(&self) {
    self.run_log.lock().flush();
  }
}

struct MaybeWriteLogger<W: Write + Send + 'static> {
  inner: Option<Box<WriteLogger<W>>>,
}

impl<W: Write + Send + 'static> MaybeWriteLogger<W> {
  pub fn empty() -> MaybeWriteLogger<W> {
    MaybeWriteLogger { inner: None }
  }

  pub fn new(writable: W) -> MaybeWriteLogger<W> {
    // We initialize the inner WriteLogger with no filters so that we don't have to create a new
    // one every time we change the level of the outer MaybeWriteLogger.
    let config = ConfigBuilder::new()
      .set_time_format_str(TIME_FORMAT_STR)
      .set_time_to_local(true)
      .set_thread_level(LevelFilter::Off)
      .set_level_padding(LevelPadding::Off)
      .set_target_level(LevelFilter::Off)
      .build();

    MaybeWriteLogger {
      inner: Some(WriteLogger::new(LevelFilter::max(), config, writable)),
    }
  }
}

impl<W: Write + Send + 'static> Log for MaybeWriteLogger<W> {
  fn enabled(&self, _metadata: &Metadata) -> bool {
    // EngineLogger will have already filtered using the global filter.
    true
  }

  fn log(&self, record: &Record) {
    if !self.enabled(record.metadata()) {
      return;
    }
    if let Some(ref logger) = self.inner {
      logger.log(record);
    }
  }

  fn flush(&self) {
    if let Some(ref logger) = self.inner {
      logger.flush();
    }
  }
}

///
/// Thread- or task-local context for whether the logger should write to stderr at all.
///
/// Worker threads spawned to drive background node execution are marked `Quiet` by default so
/// that routine scheduling chatter doesn't interleave with a caller's own output; the run trace
/// file (if configured) still receives every record either way. Every time a Task is spawned on a
/// tokio Runtime, the spawning thread's destination is propagated onto it.
///
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub enum Destination {
  Quiet,
  Stderr,
}

impl TryFrom<&str> for Destination {
  type Error = String;
  fn try_from(dest: &str) -> Result<Self, Self::Error> {
    match dest {
      "quiet" => Ok(Destination::Quiet),
      "stderr" => Ok(Destination::Stderr),
      other => Err(format!("Unknown log destination: {:?}", other)),
    }
  }
}

thread_local! {
  static THREAD_DESTINATION: RefCell<Destination> = RefCell::new(Destination::Stderr)
}

task_local! {
  static TASK_DESTINATION: Destination;
}

///
/// Set the current log destination for a Thread, but _not_ for a Task. Tasks must always be
/// spawned by callers using the `scope_task_destination` helper (generally via
/// task_executor::Executor).
///
pub fn set_thread_destination(destination: Destination) {
  THREAD_DESTINATION.with(|thread_destination| {
    *thread_destination.borrow_mut() = destination;
  })
}

///
/// Propagate the current log destination to a Future representing a newly spawned Task. Usage of
/// this method should mostly be contained to task_executor::Executor.
///
pub async fn scope_task_destination<F>(destination: Destination, f: F) -> F::Output
where
  F: Future,
{
  TASK_DESTINATION.scope(destination, f).await
}

///
/// Get the current log destination, from either a Task or a Thread.
///
pub fn get_destination() -> Destination {
  if let Ok(destination) = TASK_DESTINATION.try_with(|destination| *destination) {
    destination
  } else {
    THREAD_DESTINATION.with(|destination| *destination.borrow())
  }
}
