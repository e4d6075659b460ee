//! Scout Agent: planning, preferences and the tool-augmented conversation loop.
//!
//! This crate contains:
//! - **planner**: strategy selection and seed prompt construction
//! - **preferences**: durable, lock-protected preference store
//! - **feedback**: session feedback aggregation and prompt augmentation
//! - **catalog**: static browser tool schemas
//! - **connector**: tool server lifecycle with simulated fallback
//! - **driver**: the bounded model ↔ tool loop
//! - **session**: caller-facing entry point

pub mod catalog;
pub mod connector;
pub mod driver;
pub mod feedback;
pub mod planner;
pub mod preferences;
pub mod session;

pub use catalog::{CatalogError, ToolSchema};
pub use connector::{ConnectorError, ConnectorState, ConnectorStatus, ToolConnector};
pub use driver::{ConversationDriver, ConversationState, DriverConfig, DriverError, TerminalReason};
pub use feedback::{FeedbackAggregator, FeedbackCategory};
pub use planner::{plan, plan_request, ResearchPlan, Strategy, TaskRequest};
pub use preferences::{PreferenceRecord, PreferenceStore, StoreError};
pub use session::{RunOutcome, RunStatus, Session};
