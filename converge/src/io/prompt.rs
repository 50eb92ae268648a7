//! Agent prompt rendering.

use anyhow::Result;
use minijinja::{Environment, context};

const TASK_TEMPLATE: &str = include_str!("prompts/task.md");

/// Inputs for one agent prompt.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub task: &'a str,
    pub branch: &'a str,
    pub context: &'a str,
    pub files: &'a [String],
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("task", TASK_TEMPLATE)
            .expect("task template should be valid");
        Self { env }
    }

    pub fn render(&self, input: &PromptInputs<'_>) -> Result<String> {
        let template = self.env.get_template("task")?;
        let rendered = template.render(context! {
            task => input.task.trim(),
            branch => input.branch,
            context => input.context.trim(),
            files => input.files,
        })?;
        Ok(rendered)
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}
