//! Response content negotiation.
pub mod accept;
pub mod transcoder;

pub use accept::AcceptHeader;
pub use transcoder::{ResponseTranscoder, TranscodeError};
