//! Orc execution engine
//!
//! A cooperative token interpreter for compiled Orc programs:
//! - Tokens walk an immutable node graph, one node per scheduling step
//! - Groups cancel whole subcomputations; regions detect when they finish
//! - Logical clocks deliver timed events deterministically
//! - Sites run outside the engine and answer from any thread

pub mod arena;
pub mod pq;
pub mod value;
pub mod env;
pub mod node;
pub mod error;
pub mod config;
pub mod region;
pub mod group;
pub mod clock;
pub mod token;
pub mod executor;
pub mod site;
pub mod engine;
mod interp;


pub use clock::{ClockId, LogicalClock};
pub use config::EngineConfig;
pub use engine::{Engine, EngineEvent, RunSummary, Step};
pub use error::{ConfigError, EngineError, ErrorReport, TokenError};
pub use executor::{CallId, Delivery, EngineHandle};
pub use group::{GroupId, GroupTable};
pub use node::{Arg, Def, Node, NodeKind, NodeRef};
pub use region::{RegionId, RegionTable};
pub use site::{from_fn, Println, Resumer, Rtimer, Site};
pub use token::Token;
pub use value::{Closure, SourceLocation, Value};
