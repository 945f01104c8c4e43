//! Weaver: conversational turn execution core.
//!
//! Takes a turn request, routes it to a single agent, a swarm or a graph,
//! and turns the engine's raw event stream into an ordered list of rich
//! content parts (text, tool calls, reasoning, agent events). Every turn is
//! recorded as a run snapshot, and finished turns may be sampled for
//! background evaluation.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use weaver::prelude::*;
//!
//! # async fn example(engines: Arc<dyn EngineProvider>) -> weaver::error::Result<()> {
//! let config = WeaverConfig::from_env()?;
//! let runner = TurnRunner::from_config(&config, engines);
//!
//! let context = RunContext::builder()
//!     .run_mode("research")
//!     .session_id("session-1")
//!     .build();
//! let request = TurnRequest::builder()
//!     .context(context)
//!     .prompt("Summarize the latest release notes")
//!     .build();
//!
//! let mut chunks = runner.run(request)?;
//! while let Some(chunk) = chunks.next().await {
//!     if chunk.is_terminal() {
//!         println!("{}", chunk.text());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod compaction;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod normalize;
pub mod plan;
pub mod prelude;
pub mod snapshot;
pub mod strategy;
pub mod turn;
pub mod types;
