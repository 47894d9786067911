//! # Stepwise Core
//!
//! Foundation types for the Stepwise conversation engine.
//!
//! This crate defines the two seams between the engine and a chat transport:
//!
//! - **Inbound**: every event implements [`Event`] and travels as a
//!   [`BoxedEvent`]. The engine routes on [`EventKind`] and addresses
//!   conversation state by [`ConversationKey`].
//! - **Outbound**: handlers talk back through a [`Client`]
//!   (`send`, `edit`, `delete`, `answer_interaction`), shared as a
//!   [`BoxedClient`].
//!
//! ```text
//! ┌─────────────┐  BoxedEvent  ┌────────────┐  BoxedClient  ┌────────────┐
//! │  Transport  │─────────────▶│   Engine   │──────────────▶│  Transport │
//! │  (inbound)  │              │            │               │ (outbound) │
//! └─────────────┘              └────────────┘               └────────────┘
//! ```
//!
//! [`Update`] is a ready-made event envelope for transports that do not bring
//! their own, and [`InteractionData`] parses `action?key=value` button payloads.
//!
//! ## Testing
//!
//! Enable the `testing` feature to get [`testing::RecordingClient`], a client
//! double that records every call.

pub mod client;
pub mod error;
pub mod event;
pub mod interaction;
pub mod message;
pub mod update;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{BoxedClient, Client, downcast_client};
pub use error::{ApiError, ApiResult};
pub use event::{BoxedEvent, Command, ConversationKey, Event, EventKind, parse_command};
pub use interaction::InteractionData;
pub use message::{Button, MessageRef, OutgoingMessage};
pub use update::{Payload, Update};
