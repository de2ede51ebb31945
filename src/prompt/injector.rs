//! Caller parameter injection into a workflow graph.
//!
//! Two node kinds are rewritten:
//! - every `KSampler` with a `seed` input receives the caller's seed, or one
//!   random seed drawn per call and shared by all samplers;
//! - every `CLIPTextEncode` whose `text` is exactly one of the placeholder
//!   literals receives the positive or negative prompt.
//!
//! Nothing else in the graph is touched and a template without matching
//! nodes is left as is.
use rand::Rng;
use serde_json::Value;

use crate::workflow::graph::{GraphDocument, NodeKind};

/// Placeholder for the positive prompt slot, spelled as existing templates
/// author it.
pub const POSITIVE_PLACEHOLDER: &str = "POSITIVE_PROMT_PLACEHOLDER";
pub const NEGATIVE_PLACEHOLDER: &str = "NEGATIVE_PROMPT_PLACEHOLDER";

/// Seeds live in `[0, SEED_UPPER_BOUND)`.
pub const SEED_UPPER_BOUND: u64 = 10_000_000_000;

/// What a single `inject` call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectionReport {
    /// The seed written to sampler nodes, if any sampler had a seed input.
    pub seed: Option<u64>,
    pub seeded_nodes: usize,
    pub positive_slots: usize,
    pub negative_slots: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterInjector;

/// The input an injectable node kind owns.
enum Target {
    Seed,
    PromptText,
}

impl ParameterInjector {
    pub fn new() -> Self {
        ParameterInjector
    }

    pub fn inject(
        &self,
        doc: &mut GraphDocument,
        seed: Option<i64>,
        positive_prompt: &str,
        negative_prompt: &str,
    ) -> InjectionReport {
        self.inject_with_rng(doc, seed, positive_prompt, negative_prompt, &mut rand::thread_rng())
    }

    /// Same as [`inject`](Self::inject) with an explicit random source for the
    /// unseeded case.
    pub fn inject_with_rng<R: Rng + ?Sized>(
        &self,
        doc: &mut GraphDocument,
        seed: Option<i64>,
        positive_prompt: &str,
        negative_prompt: &str,
        rng: &mut R,
    ) -> InjectionReport {
        let seed = match seed {
            Some(requested) => clamp_seed(requested),
            None => rng.gen_range(0..SEED_UPPER_BOUND),
        };

        let mut report = InjectionReport::default();
        for (id, node) in doc.records_mut() {
            let target = match node.kind() {
                NodeKind::Sampler => Target::Seed,
                NodeKind::TextEncoder => Target::PromptText,
                NodeKind::Other(_) | NodeKind::Untyped => continue,
            };
            let Some(fields) = node.fields_mut() else {
                tracing::trace!(node = id, "Skipping node without inputs");
                continue;
            };
            match target {
                Target::Seed => {
                    if let Some(slot) = fields.get_mut("seed") {
                        *slot = Value::from(seed);
                        report.seed = Some(seed);
                        report.seeded_nodes += 1;
                    }
                }
                Target::PromptText => {
                    let Some(slot) = fields.get_mut("text") else {
                        continue;
                    };
                    match slot.as_str() {
                        Some(POSITIVE_PLACEHOLDER) => {
                            *slot = Value::from(positive_prompt);
                            report.positive_slots += 1;
                        }
                        Some(NEGATIVE_PLACEHOLDER) => {
                            *slot = Value::from(negative_prompt);
                            report.negative_slots += 1;
                        }
                        _ => {}
                    }
                }
            }
        }

        tracing::debug!(?report, "Injected parameters into workflow");
        report
    }
}

/// Clamp a caller-supplied seed into `[0, SEED_UPPER_BOUND)`.
pub fn clamp_seed(requested: i64) -> u64 {
    let max = SEED_UPPER_BOUND - 1;
    if requested < 0 {
        tracing::warn!(requested, clamped = 0, "Seed below range, clamping");
        0
    } else if requested as u64 > max {
        tracing::warn!(requested, clamped = max, "Seed above range, clamping");
        max
    } else {
        requested as u64
    }
}
