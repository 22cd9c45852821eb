// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Seastate Core - Diagnostic Job Pipeline
//!
//! This crate runs oceanographic diagnostics over gridded datasets held
//! locally or served by THREDDS catalogs, as asynchronous jobs whose state
//! lives in a durable job store.
//!
//! # Architecture
//!
//! ```text
//!   submit ──► ┌──────────────┐   pending/running/...   ┌────────────┐
//!              │ JobScheduler │ ──────────────────────► │  JobStore  │ ◄── poll
//!              └──────┬───────┘                         └────────────┘
//!                     │ worker
//!                     ▼
//!              ┌──────────────┐   catalog.xml   ┌──────────────────┐
//!              │DatasetAccess │ ──────────────► │  THREDDS server  │
//!              │  (resolve,   │   .dds/.ascii   │ (catalog, DAP2)  │
//!              │   open)      │ ◄────────────── └──────────────────┘
//!              └──────┬───────┘
//!                     │ ArrayView
//!                     ▼
//!              ┌──────────────┐  RawOutput  ┌─────────┐  AnalysisResult
//!              │ diagnostics  │ ──────────► │ encoder │ ──────────────► JobStore
//!              └──────────────┘             └─────────┘
//! ```
//!
//! # Job Status State Machine
//!
//! ```text
//! pending ──► running ──► completed
//!    │           ├──────► failed
//!    └───────────┴──────► cancelled
//! ```
//!
//! A job is always observed `running` before `completed` or `failed`.
//! Failed jobs keep a non-empty error message and are never re-run.
//!
//! # Diagnostics
//!
//! | Diagnostic | Input | Result |
//! |------------|-------|--------|
//! | `thermocline`, `halocline`, `pycnocline` | vertical profile | strongest gradient layer |
//! | `sound_speed` | temperature and salinity profiles | speed profile, channel axis |
//! | `mesoscale_eddy` | 2-D SSH or vorticity | eddies with rotation and radius |
//! | `ocean_front` | 2-D scalar field | fronts with length and gradient |
//! | `internal_wave` | time series at fixed depths | band energy, dominant period |
//!
//! # Dataset References
//!
//! | Form | Meaning |
//! |------|---------|
//! | `42` | registered dataset record |
//! | `local:ctd/a.json` | JSON grid under the data directory |
//! | `catalog:3/ocean/woa.nc` | dataset on registered THREDDS server 3 |
//!
//! # Modules
//!
//! - [`catalog`]: THREDDS catalog fetching and parsing
//! - [`config`]: Configuration from environment variables
//! - [`dataset`]: Dataset resolution and lazy array access
//! - [`diagnostics`]: The fixed diagnostic registry
//! - [`encoder`]: Bounded result payloads
//! - [`persistence`]: Job store and registries (SQLite, in-memory)
//! - [`scheduler`]: Job submission, execution and cancellation
//! - [`runtime`]: Start/shutdown lifecycle for embedding

pub mod catalog;
pub mod config;
pub mod dataset;
pub mod diagnostics;
pub mod encoder;
pub mod error;
pub mod migrations;
pub mod model;
pub mod persistence;
pub mod runtime;
pub mod scheduler;

pub use error::{CoreError, Result};
pub use model::{DiagnosticJob, DiagnosticType, JobStatus};
pub use runtime::SeastateRuntime;
pub use scheduler::JobScheduler;
