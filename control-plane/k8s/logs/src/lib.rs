//! Multiplexes the logs of every container selected by a label selector into
//! a single channel.
//!
//! Pods are discovered through a watch. Each running container gets its own
//! follow task, and all of them write into one bounded entries channel.
//! Entries from a single container arrive in order; entries from different
//! containers are interleaved in the order they are received.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod config;
mod entry;
mod follow;
mod index;
mod source;
mod stream;

#[cfg(test)]
mod tests;

pub use self::{
    config::{Config, Filter, Transform},
    entry::LogEntry,
    source::{ContainerRef, KubeLogSource, Lines, LogSource, PodEvents},
    stream::{LogStream, Output},
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("log stream is already running")]
    AlreadyRunning,

    #[error("invalid log stream configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("failed to open logs for {target}: {source}")]
    Open {
        target: ContainerRef,
        #[source]
        source: BoxError,
    },

    #[error("failed to read logs for {target}: {source}")]
    Read {
        target: ContainerRef,
        #[source]
        source: BoxError,
    },

    #[error("logs for {target} ended")]
    Ended { target: ContainerRef },
}
