//! # ripple
//!
//! A consequence cascade engine: given a free-text assertion, ripple builds
//! a qualitative system-dynamics model (stocks, agents, incentives, flows),
//! infers initial stock states, analyzes tensions, and generates three
//! sequential rounds of consequence impacts whose lineage and state deltas
//! thread through the evolving model.
//!
//! ## Architecture
//!
//! - **Data model** (`model`, `impact`): the system-dynamics graph and the
//!   impacts generated over it, with referential-integrity validation
//! - **Generation components** (`builder`, `states`, `tension`, `phases`,
//!   `consolidate`, `revise`, `narrative`): pure functions over their
//!   inputs, each validating backend output at its boundary
//! - **Orchestration** (`session`): the single owner of the mutable
//!   qualitative-state map and impact collection
//! - **Backend** (`llm`): the one capability everything consumes — submit a
//!   prompt, get structured JSON back, or fail
//!
//! ## Library usage
//!
//! ```no_run
//! use ripple::llm::{OllamaClient, OllamaConfig};
//! use ripple::session::Session;
//!
//! let mut client = OllamaClient::new(OllamaConfig::default());
//! client.probe();
//! let session = Session::run_cascade(&client, "Remote work becomes universal").unwrap();
//! println!("{}", session.narrative().unwrap_or("no narrative"));
//! ```

pub mod builder;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod impact;
pub mod llm;
pub mod model;
pub mod narrative;
pub mod phases;
pub mod revise;
pub mod session;
pub mod states;
pub mod tension;
