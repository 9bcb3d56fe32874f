//! stoat-runtime - worker threads for the stoat module subsystem.
//!
//! A worker is an isolated execution context with its own module registry on
//! a dedicated OS thread. Nothing loader-related is shared across workers;
//! the only link is a message channel delivering structured-clone copies of
//! a constrained value domain. See [`Worker`] and [`WorkerContext`].

pub mod worker;

pub use worker::{
    ActiveWorkerCount, ParentPort, Worker, WorkerContext, WorkerError, WorkerOptions,
};
