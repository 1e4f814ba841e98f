//! fetchlock-core
//!
//! Fetch-and-lock dispatch of external tasks to out-of-process workers.
//!
//! - **domain**: ids, tasks, fetch requests, typed variables, errors
//! - **ports**: `TaskStore`, `IdentityService`, `Clock`, `IdGenerator`
//! - **impls**: in-memory store and identity service
//! - **app**: matcher, scheduler, suspension, handler, lifecycle service, engine builder
//! - **config**: TOML configuration
//! - **observability**: logging setup

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
