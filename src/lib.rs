//! Dory is a producer-side daemon that accepts application log/event
//! messages on a local endpoint (UNIX datagram, UNIX stream, or local TCP),
//! batches them, and delivers them to a Kafka cluster with at-least-once
//! semantics. Applications fire-and-forget messages; Dory absorbs bursts,
//! multiplexes across brokers, compresses, retries, and surfaces delivery
//! failures out-of-band (status socket, on-disk discard reports, counters).
//!
//! This crate covers the in-process message pipeline: the bounded-memory
//! message pool, the routing/batching engine, the per-broker dispatcher
//! with its send/receive state machine, the retry and rerouting logic, and
//! the discard-accounting subsystem.
#![allow(unknown_lints)]
#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

extern crate byteorder;
extern crate chan_signal;
extern crate chrono;
extern crate clap;
extern crate coco;
extern crate crc32c;
extern crate fern;
extern crate flate2;
extern crate libc;
extern crate mio;
extern crate rand;
extern crate snap;
extern crate thiserror;
extern crate tiny_http;
extern crate toml;

#[macro_use]
extern crate log;

#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate serde_derive;
extern crate serde;

#[macro_use]
extern crate serde_json;

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
extern crate tempdir;

pub mod batch;
pub mod broker;
pub mod cli;
pub mod conf;
pub mod constants;
pub mod counters;
pub mod discard;
pub mod dispatch;
pub mod errors;
pub mod kafka;
pub mod logging;
pub mod message;
pub mod metadata;
pub mod pool;
pub mod retry;
pub mod router;
pub mod shutdown;
pub mod source;
pub mod status;
pub mod thread;
pub mod time;
pub mod util;
pub mod wire;
