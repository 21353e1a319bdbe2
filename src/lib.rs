//! # ups_qproto
//!
//! A generic interpreter for the line-oriented ASCII query/response protocols
//! spoken by Q1-family ("Blazer") UPS devices. A device family is described
//! by a YAML profile: which query elicits each value, what the reply looks
//! like, which bytes hold the value and how to turn them into a typed value.
//! The engine interprets that table; adding a device family means writing a
//! profile, not code.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: the descriptor table and the engine that interprets it
//!   (response parsing, status aggregation, command dispatch, setvar
//!   validation, poll cycles) plus the [`Transport`](protocol::Transport) seam.
//! - **`conformance`**: replays recorded exchanges against a profile and
//!   reports every divergence.
//! - **`config`**: Figment-based settings (exchange timeout, logging).
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: the error taxonomy shared by all of the above.
//!
//! ## Example
//! ```no_run
//! use std::path::Path;
//! use ups_qproto::conformance::{ConformanceHarness, Fixture};
//! use ups_qproto::protocol::DescriptorTable;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let table = DescriptorTable::load(Path::new("profiles/mecer.yaml"))?;
//! let fixture = Fixture::load(Path::new("profiles/mecer.fixture.yaml"))?;
//! let report = ConformanceHarness::new(&table, std::time::Duration::from_secs(1))
//!     .run(&fixture)
//!     .await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod conformance;
pub mod error;
pub mod logging;
pub mod protocol;

pub use error::{UpsError, UpsResult};
