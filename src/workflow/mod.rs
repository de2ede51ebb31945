//! Workflow graphs and the template directory they are loaded from.
pub mod graph;
pub mod store;

pub use graph::{GraphDocument, NodeKind, NodeRecord};
pub use store::TemplateStore;
