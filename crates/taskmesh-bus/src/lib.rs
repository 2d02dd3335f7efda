//! Shared-store message bus for the taskmesh system.
//!
//! Every agent has a priority mailbox (a sorted set in the shared store);
//! the bus publishes addressed messages into mailboxes, fans broadcasts
//! out as per-recipient copies, runs one processing loop per subscribed
//! agent, and correlates request/response exchanges through polled
//! response slots. Backpressure is a bounded mailbox: publishing into a
//! full mailbox is rejected with [`taskmesh_core::MeshError::MailboxFull`].
//!
//! # Main types
//!
//! - [`MessageBus`] — The bus itself; owns the subscriber registry.
//! - [`MessageHandler`] — Trait implemented by mailbox consumers.
//! - [`BusConfig`] — Capacities, intervals, and the priority weight.

/// Bus implementation.
pub mod bus;

pub use bus::{BusConfig, MessageBus, MessageHandler};
