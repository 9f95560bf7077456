//! Real-time chat backend for the classifieds marketplace: routes messages
//! between live connections of a conversation and keeps the durable message
//! log and dialog markers in step with them.

pub mod chat;
pub mod config;
pub mod dialog;
pub mod entity;
pub mod error;
pub mod history;
pub mod identity;
pub mod registry;
pub mod router;
pub mod server;
pub mod store;
