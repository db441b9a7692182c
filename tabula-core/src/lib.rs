#![forbid(unsafe_code)]

pub mod config;
pub mod domain;
pub mod error;

pub mod util {
    pub mod normalize;
    pub mod sanitize;
}

pub mod shape;
pub mod transport;

pub mod repo;
pub mod repo_factory;
pub mod repo_http;

pub mod optimistic;
pub mod resolve;

pub mod poll;
pub mod schedule;

pub mod session;
pub mod upload;
pub mod views;

#[cfg(test)]
mod testing;

// Re-exports: stable API surface
pub use config::{ClientConfig, Screen};
pub use domain::{Filter, ListFetch, ListParams, Page, Record, RecordId, Sort, TableId, TableMeta};
pub use error::{Result, TabulaError};
pub use optimistic::{MutationState, OptimisticList};
pub use poll::{PollConfig, PollHandle, PollView, Poller};
pub use repo::TableRepo;
pub use repo_factory::{Backend, open_repo};
pub use repo_http::RecordClient;
pub use resolve::{DeleteOutcome, DeleteResolver};
pub use schedule::{ManualScheduler, Scheduler, TokioScheduler};
