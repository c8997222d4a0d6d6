//! HTTP API for external control of the voice session
//!
//! - GET /health - Health check
//! - GET /session - Current conversation snapshot
//! - GET /session/stats - Session statistics
//! - POST /session/connect - Connect or reconnect
//! - POST /session/disconnect - Close the connection
//! - POST /session/listen/start - Start streaming the microphone
//! - POST /session/listen/stop - Stop streaming

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
