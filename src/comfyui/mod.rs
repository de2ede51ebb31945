pub mod client;
pub mod messages;
pub mod session;

pub use client::{primary_image, ComfyUIClient, ImageRef};
pub use session::{ComfyUISession, CompletionRegistry};
