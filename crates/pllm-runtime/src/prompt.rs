//! Agents backed by a language model and a chat template.

use crate::error::AgentError;
use crate::executor::{Agent, Values};
use indexmap::IndexMap;
use pllm_template::{
    extract_completions, process_template, ProcessedTemplate, TemplateError, SYSTEM_PROMPT,
};
use serde_json::Value;
use tracing::debug;

/// A text-completion backend.
pub trait Model: Send + Sync {
    /// Completes `prompt` under the `system` instructions.
    fn complete(&self, system: &str, prompt: &str) -> Result<String, AgentError>;
}

impl<F> Model for F
where
    F: Fn(&str, &str) -> Result<String, AgentError> + Send + Sync,
{
    fn complete(&self, system: &str, prompt: &str) -> Result<String, AgentError> {
        self(system, prompt)
    }
}

/// Fills the template with the agent's inputs, asks the model to complete
/// the output markers, and returns each output as a JSON string.
pub struct PromptAgent<M> {
    template: ProcessedTemplate,
    model: M,
}

impl<M: Model> PromptAgent<M> {
    pub fn new(template: &str, model: M) -> Result<Self, TemplateError> {
        Ok(Self {
            template: process_template(template)?,
            model,
        })
    }

    pub fn template(&self) -> &ProcessedTemplate {
        &self.template
    }
}

impl<M: Model> Agent for PromptAgent<M> {
    fn run(&self, inputs: &Values) -> Result<Values, AgentError> {
        let text: IndexMap<String, String> = inputs
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect();

        let prompt = self.template.fill_inputs(&text)?;
        debug!(outputs = self.template.outputs.len(), "prompting model");
        let response = self.model.complete(SYSTEM_PROMPT, &prompt)?;
        let completions = extract_completions(&response, &self.template.outputs)?;

        Ok(completions
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn model<F>(f: F) -> F
    where
        F: Fn(&str, &str) -> Result<String, AgentError> + Send + Sync,
    {
        f
    }

    #[test]
    fn test_prompt_round_trip() {
        let agent = PromptAgent::new(
            "Rate {essay} out of {scale}: ${grade}",
            model(|system, prompt| {
                assert!(system.contains("<completionK>"));
                assert_eq!(prompt, "Rate my essay out of 10: <completion0></completion0>");
                Ok("<completion0> 8 </completion0>".to_string())
            }),
        )
        .unwrap();

        let mut inputs = Values::new();
        inputs.insert("essay".to_string(), json!("my essay"));
        inputs.insert("scale".to_string(), json!(10));
        let outputs = agent.run(&inputs).unwrap();
        assert_eq!(outputs["grade"], json!("8"));
    }

    #[test]
    fn test_missing_input() {
        let agent = PromptAgent::new("{a} ${b}", model(|_, _| Ok(String::new()))).unwrap();
        let err = agent.run(&Values::new()).unwrap_err();
        assert_eq!(err, AgentError::Template(TemplateError::MissingInput("a".to_string())));
    }

    #[test]
    fn test_model_errors_pass_through() {
        let agent = PromptAgent::new(
            "${out}",
            model(|_, _| Err(AgentError::Model("offline".to_string()))),
        )
        .unwrap();
        assert_eq!(
            agent.run(&Values::new()).unwrap_err().to_string(),
            "model error: offline"
        );
    }

    #[test]
    fn test_incomplete_response() {
        let agent = PromptAgent::new("${a} ${b}", model(|_, _| {
            Ok("<completion0>x</completion0>".to_string())
        }))
        .unwrap();
        let err = agent.run(&Values::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Response has no <completion1> for output `b`"
        );
    }
}
