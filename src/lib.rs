pub mod api_router;
pub mod chat;
pub mod classifier;
pub mod config;
pub mod feedback;
pub mod generator;
pub mod kb;
pub mod llm;
pub mod monitoring;
pub mod session;
pub mod shared;
pub mod sla;
pub mod store;
pub mod tickets;
pub mod triage;
