//! Chat-template placeholders.
//!
//! A `chat:` template names the agent's inputs as `{var}` and the values the
//! model must produce as `${var}`. Before a prompt is sent, every distinct
//! output placeholder is replaced by a numbered completion marker
//! (`<completion0></completion0>`, ...), which the model is asked to fill in.
//! [`extract_completions`] maps the filled markers of a response back to the
//! output names.
//!
//! ```rust
//! use pllm_template::process_template;
//!
//! let processed = process_template("Judge {essay}: ${verdict} (${verdict})").unwrap();
//! assert_eq!(processed.inputs, ["essay"]);
//! assert_eq!(processed.outputs, ["verdict"]);
//! assert_eq!(
//!     processed.template,
//!     "Judge {essay}: <completion0></completion0> (<completion0></completion0>)"
//! );
//! ```

use indexmap::IndexMap;
use regex::{Captures, Regex};
use std::sync::OnceLock;
use thiserror::Error;

/// System prompt sent alongside every processed template.
pub const SYSTEM_PROMPT: &str = "You are an AI assistant designed to generate structured outputs.
Complete the contents of all `<completionK>` tags in order.
For example, you should respond as follows:
<completion0>...</completion0>
<completion1>...</completion1>
Do not include any additional explanation or text outside the `<completion>` tags.
Ensure all `<completionK>` tags are present, even if the values are empty or null. Missing values should be represented by an empty string within the `<completion>` tags.
Follow this sequence strictly and do not deviate from the provided instructions.";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("No value for template input `{0}`")]
    MissingInput(String),

    #[error("Response has no <completion{index}> for output `{name}`")]
    MissingCompletion { index: usize, name: String },

    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

/// `{name}` or `${name}`; names follow identifier syntax.
fn placeholder() -> Result<&'static Regex, TemplateError> {
    static PLACEHOLDER: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"(\$)?\{([A-Za-z_][A-Za-z0-9_]*)\}"))
        .as_ref()
        .map_err(|err| TemplateError::Pattern(err.clone()))
}

pub fn completion_marker(index: usize) -> String {
    format!("<completion{index}></completion{index}>")
}

/// A template with its outputs replaced by completion markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedTemplate {
    /// Distinct `{var}` names, first occurrence first
    pub inputs: Vec<String>,
    /// Distinct `${var}` names; the position is the marker index
    pub outputs: Vec<String>,
    pub template: String,
}

impl ProcessedTemplate {
    /// Marker index of an output name.
    pub fn marker(&self, output: &str) -> Option<usize> {
        self.outputs.iter().position(|name| name == output)
    }

    /// Substitutes every `{var}` with its value.
    pub fn fill_inputs(&self, values: &IndexMap<String, String>) -> Result<String, TemplateError> {
        let mut missing = None;
        let filled = placeholder()?.replace_all(&self.template, |caps: &Captures<'_>| {
            let name = &caps[2];
            match values.get(name) {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    caps[0].to_string()
                }
            }
        });
        match missing {
            Some(name) => Err(TemplateError::MissingInput(name)),
            None => Ok(filled.into_owned()),
        }
    }
}

/// Splits a template into its input and output placeholders and rewrites
/// the outputs to completion markers.
pub fn process_template(text: &str) -> Result<ProcessedTemplate, TemplateError> {
    let pattern = placeholder()?;
    let mut inputs: Vec<String> = Vec::new();
    let mut outputs: Vec<String> = Vec::new();

    let template = pattern.replace_all(text, |caps: &Captures<'_>| {
        let name = &caps[2];
        if caps.get(1).is_none() {
            if !inputs.iter().any(|n| n == name) {
                inputs.push(name.to_string());
            }
            return caps[0].to_string();
        }
        let index = match outputs.iter().position(|n| n == name) {
            Some(index) => index,
            None => {
                outputs.push(name.to_string());
                outputs.len() - 1
            }
        };
        completion_marker(index)
    });

    Ok(ProcessedTemplate {
        inputs,
        outputs,
        template: template.into_owned(),
    })
}

/// Reads the text of each `<completionK>...</completionK>` in `response`,
/// trimmed, keyed by the output name at index `K`.
pub fn extract_completions(
    response: &str,
    outputs: &[String],
) -> Result<IndexMap<String, String>, TemplateError> {
    outputs
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let open = format!("<completion{index}>");
            let close = format!("</completion{index}>");
            let missing = || TemplateError::MissingCompletion {
                index,
                name: name.clone(),
            };
            let start = response.find(&open).ok_or_else(missing)? + open.len();
            let len = response[start..].find(&close).ok_or_else(missing)?;
            Ok((name.clone(), response[start..start + len].trim().to_string()))
        })
        .collect()
}
