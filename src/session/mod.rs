//! Voice session management
//!
//! This module provides the `Session` that owns:
//! - The connection to the voice service
//! - Microphone capture and frame streaming
//! - Reply audio playback
//! - The conversation state presentations observe

mod config;
mod session;
pub mod state;
mod stats;

pub use config::SessionConfig;
pub use session::{Session, SessionCommand, SessionHandle};
pub use state::{
    AppSnapshot, ConversationState, ConversationTurn, Directive, EventCounters, SessionMode,
    StatusFlags, TurnPhase, LISTENING_SENTINEL,
};
pub use stats::SessionStats;
