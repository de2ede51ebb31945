//! Prompt and seed injection into workflow graphs.
pub mod injector;

pub use injector::{InjectionReport, ParameterInjector};
