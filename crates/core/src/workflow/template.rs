//! Prompt templates with `{{inputs.<name>}}` and
//! `{{steps.<id>.outputs.<name>}}` placeholders.
//!
//! A template is tokenised once. Rendering runs two passes over the segment
//! list: [`Template::fill_inputs`] replaces input placeholders with literal
//! text, then [`Template::fill_outputs`] replaces step output placeholders.
//! Substituted values are never re-scanned, so a value that happens to
//! contain `{{...}}` is emitted verbatim.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Outputs produced so far in a run: step id → output name → value.
pub type StepOutputs = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Input(String),
    StepOutput { step: String, output: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Template {
    segments: Vec<Segment>,
}

#[allow(clippy::expect_used)]
fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*(?:inputs\.([\w-]+)|steps\.([\w-]+)\.outputs\.([\w-]+))\s*\}\}")
            .expect("placeholder pattern is a valid literal")
    })
}

impl Template {
    /// Tokenise `source`. Text that is not a recognised placeholder is kept
    /// as a literal.
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in placeholder().captures_iter(source) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > last {
                segments.push(Segment::Literal(source[last..whole.start()].to_string()));
            }
            if let Some(name) = caps.get(1) {
                segments.push(Segment::Input(name.as_str().to_string()));
            } else if let (Some(step), Some(output)) = (caps.get(2), caps.get(3)) {
                segments.push(Segment::StepOutput {
                    step: step.as_str().to_string(),
                    output: output.as_str().to_string(),
                });
            }
            last = whole.end();
        }
        if last < source.len() {
            segments.push(Segment::Literal(source[last..].to_string()));
        }
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Names of every referenced input.
    pub fn input_refs(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Input(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// `(step id, output name)` of every referenced step output.
    pub fn step_refs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.segments.iter().filter_map(|s| match s {
            Segment::StepOutput { step, output } => Some((step.as_str(), output.as_str())),
            _ => None,
        })
    }

    /// Pass 1: substitute input values. Unknown inputs render empty.
    pub fn fill_inputs(&self, inputs: &BTreeMap<String, String>) -> Template {
        let segments = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Input(name) => {
                    let value = inputs.get(name).cloned().unwrap_or_else(|| {
                        debug!(input = %name, "Input has no value, rendering empty");
                        String::new()
                    });
                    Segment::Literal(value)
                }
                other => other.clone(),
            })
            .collect();
        Template { segments }
    }

    /// Pass 2: substitute step outputs and produce the final text.
    ///
    /// An absent output (its step failed under `continueOnError`) renders
    /// empty and is logged.
    pub fn fill_outputs(&self, outputs: &StepOutputs) -> String {
        let mut rendered = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::StepOutput { step, output } => {
                    match outputs.get(step).and_then(|o| o.get(output)) {
                        Some(value) => rendered.push_str(value),
                        None => warn!(step = %step, output = %output, "Step output missing, rendering empty"),
                    }
                }
                Segment::Input(name) => {
                    debug!(input = %name, "Unfilled input placeholder, rendering empty");
                }
            }
        }
        rendered
    }

    /// Run both passes.
    pub fn render(&self, inputs: &BTreeMap<String, String>, outputs: &StepOutputs) -> String {
        self.fill_inputs(inputs).fill_outputs(outputs)
    }
}
