//! algo-protocol
//!
//! Text line protocol between clients and the algo server.
//!
//! - [`messages`]   : request / reply types
//! - [`line_codec`] : one message per line, comma separated

pub mod messages;
pub mod line_codec;

pub use messages::{ClientRequest, ProtocolError, ServerReply, StopTarget};
pub use line_codec::{format_reply, format_request, parse_reply, parse_request};
