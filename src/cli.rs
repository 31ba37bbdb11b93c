//! Command line argument handling.

use clap::{App, Arg};
use std::path::PathBuf;

/// Parsed command line arguments.
#[derive(Debug, Clone)]
pub struct Args {
    /// Path to the TOML configuration file.
    pub config_path: PathBuf,
    /// Fork into the background after startup, printing the child pid.
    pub daemon: bool,
    /// Override for the message pool's total capacity, in KiB.
    pub msg_buffer_max_kb: Option<u64>,
    /// Verbosity, accumulated from repeated `-v` flags.
    pub verbose: u64,
}

/// Parse `argv`, exiting the process on `--help`/`--version` or a usage
/// error (clap's default behavior).
pub fn parse() -> Args {
    parse_from(::std::env::args())
}

/// Parse an explicit argument iterator. Split out from `parse` so tests can
/// drive it without touching the real process argv.
pub fn parse_from<I, T>(argv: I) -> Args
where
    I: IntoIterator<Item = T>,
    T: Into<::std::ffi::OsString> + Clone,
{
    let matches = App::new("dory")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Dory contributors")
        .about("Batches application events and forwards them to Kafka with at-least-once semantics.")
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("PATH")
                .help("Path to the TOML configuration file")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("daemon")
                .long("daemon")
                .help("Fork into the background after startup, printing the child pid to stdout"),
        )
        .arg(
            Arg::with_name("msg-buffer-max")
                .long("msg_buffer_max")
                .value_name("KB")
                .help("Override the message pool's total capacity, in KiB")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("Increase log verbosity. May be repeated."),
        )
        .get_matches_from(argv);

    let config_path = PathBuf::from(matches.value_of("config").expect("required by clap"));
    let daemon = matches.is_present("daemon");
    let msg_buffer_max_kb = matches
        .value_of("msg-buffer-max")
        .map(|v| v.parse::<u64>().unwrap_or_else(|_| {
            eprintln!("dory: --msg_buffer_max must be a positive integer");
            ::std::process::exit(1);
        }));
    let verbose = matches.occurrences_of("verbose");

    Args {
        config_path,
        daemon,
        msg_buffer_max_kb,
        verbose,
    }
}

/// Fork the current process into the background, per `--daemon`. The
/// parent prints the child's pid to stdout and exits; the child continues
/// running with its controlling terminal detached.
///
/// Grounded in the original's double-fork daemonization helper; we do a
/// single fork with `setsid`, which is sufficient for a long-running
/// service managed by an init system rather than a raw terminal.
pub fn daemonize() {
    unsafe {
        match libc::fork() {
            -1 => {
                eprintln!("dory: fork() failed, continuing in the foreground");
            }
            0 => {
                libc::setsid();
            }
            child_pid => {
                println!("{}", child_pid);
                ::std::process::exit(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_config_path() {
        let args = parse_from(vec!["dory", "--config", "/etc/dory/dory.toml"]);
        assert_eq!(args.config_path, PathBuf::from("/etc/dory/dory.toml"));
        assert!(!args.daemon);
        assert_eq!(args.msg_buffer_max_kb, None);
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn parses_daemon_and_buffer_override_and_verbosity() {
        let args = parse_from(vec![
            "dory",
            "--config",
            "dory.toml",
            "--daemon",
            "--msg_buffer_max",
            "2048",
            "-vvv",
        ]);
        assert!(args.daemon);
        assert_eq!(args.msg_buffer_max_kb, Some(2048));
        assert_eq!(args.verbose, 3);
    }
}
