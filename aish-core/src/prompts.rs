//! Named prompt templates.
//!
//! Templates use `{name}` placeholders. The defaults are compiled in; a
//! [`DiskPromptLibrary`] keeps a user-editable copy in a YAML file.

use crate::collaborators::{OutputSink, Style};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const FIX_COMMAND: &str = "fix_command";
pub const SUMMARIZE: &str = "summarize";
pub const SUMMARIZE_FACTS: &str = "summarize_facts";
pub const SUMMARIZE_LIST_OF_FACTS: &str = "summarize_list_of_facts";
pub const GENERATE_COMMAND: &str = "generate_command";
pub const QUESTION: &str = "question";
pub const PROMPT_SYSTEM_MESSAGE: &str = "prompt_system_message";
pub const SHELL_AUTOSUGGEST_COMMAND: &str = "shell_autocomplete_command";
pub const SHELL_AUTOSUGGEST_NEW_COMMAND: &str = "shell_autocomplete_new_command";
pub const SHELL_AUTOSUGGEST_PROMPT: &str = "shell_autocomplete_prompt";
pub const SHELL_SYSTEM_MESSAGE: &str = "shell_system_message";
pub const GOAL_MODE_SYSTEM_MESSAGE: &str = "goal_mode_system_message";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt not found: {0}")]
    NotFound(String),
    #[error("failed to read prompt library {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write prompt library {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid prompt library {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Template lookup with placeholder substitution.
pub trait PromptLibrary: Send + Sync {
    fn get_prompt(&self, name: &str, args: &[(&str, &str)]) -> Result<String, PromptError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    pub prompt: String,
    /// Whether a newer default may overwrite this entry.
    #[serde(default, rename = "okToReplace")]
    pub ok_to_replace: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PromptFile {
    #[serde(default)]
    prompts: Vec<Prompt>,
}

/// Replace every `{key}` in `template` with its value.
///
/// Placeholders without a matching argument are left as they are.
pub fn interpolate(template: &str, args: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in args {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

fn lookup(prompts: &[Prompt], name: &str, args: &[(&str, &str)]) -> Result<String, PromptError> {
    prompts
        .iter()
        .find(|p| p.name == name)
        .map(|p| interpolate(&p.prompt, args))
        .ok_or_else(|| PromptError::NotFound(name.to_string()))
}

/// In-memory library holding the compiled-in defaults.
#[derive(Debug, Clone)]
pub struct DefaultPromptLibrary {
    prompts: Vec<Prompt>,
}

impl DefaultPromptLibrary {
    pub fn new() -> Self {
        Self {
            prompts: default_prompts(),
        }
    }
}

impl Default for DefaultPromptLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptLibrary for DefaultPromptLibrary {
    fn get_prompt(&self, name: &str, args: &[(&str, &str)]) -> Result<String, PromptError> {
        lookup(&self.prompts, name, args)
    }
}

/// Prompt library persisted as YAML.
#[derive(Debug)]
pub struct DiskPromptLibrary {
    path: PathBuf,
    prompts: Vec<Prompt>,
}

impl DiskPromptLibrary {
    /// Load the library at `path` if it exists, merge in the defaults and
    /// write the result back.
    ///
    /// Stored prompts are only overwritten by a default when they are marked
    /// `okToReplace`, so user edits survive upgrades.
    pub fn open(path: impl Into<PathBuf>, sink: &dyn OutputSink) -> Result<Self, PromptError> {
        let path = path.into();
        let mut library = Self {
            path,
            prompts: Vec::new(),
        };

        let loaded = library.path.exists();
        if loaded {
            library.load()?;
        }
        library.replace_prompts(default_prompts());
        library.save()?;

        if !loaded {
            let _ = sink.write_styled(
                Style::Grey,
                &format!("Wrote prompt library at {}\n", library.path.display()),
            );
        }
        Ok(library)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn prompts(&self) -> &[Prompt] {
        &self.prompts
    }

    fn load(&mut self) -> Result<(), PromptError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| PromptError::Read {
            path: self.path.clone(),
            source,
        })?;
        let file: PromptFile = serde_yaml::from_str(&raw).map_err(|source| PromptError::Parse {
            path: self.path.clone(),
            source,
        })?;
        debug!(
            "loaded {} prompts from {}",
            file.prompts.len(),
            self.path.display()
        );
        self.prompts = file.prompts;
        Ok(())
    }

    fn save(&self) -> Result<(), PromptError> {
        let write_err = |source: io::Error| PromptError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let file = PromptFile {
            prompts: self.prompts.clone(),
        };
        let yaml = serde_yaml::to_string(&file).map_err(|e| write_err(io::Error::other(e)))?;
        fs::write(&self.path, yaml).map_err(write_err)
    }

    fn replace_prompts(&mut self, defaults: Vec<Prompt>) {
        for default in defaults {
            match self.prompts.iter_mut().find(|p| p.name == default.name) {
                Some(existing) if existing.ok_to_replace => *existing = default,
                Some(_) => {}
                None => self.prompts.push(default),
            }
        }
    }
}

impl PromptLibrary for DiskPromptLibrary {
    fn get_prompt(&self, name: &str, args: &[(&str, &str)]) -> Result<String, PromptError> {
        lookup(&self.prompts, name, args)
    }
}

fn prompt(name: &str, text: &str) -> Prompt {
    Prompt {
        name: name.to_string(),
        prompt: text.to_string(),
        ok_to_replace: true,
    }
}

/// The compiled-in prompt set.
pub fn default_prompts() -> Vec<Prompt> {
    vec![
        prompt(
            PROMPT_SYSTEM_MESSAGE,
            "You are an assistant that helps the user in a Unix shell. Make your answers technical but succinct.",
        ),
        prompt(
            SHELL_SYSTEM_MESSAGE,
            "You are an assistant that helps the user with a Unix shell. Give advice about commands that can be run and examples but keep your answers succinct.",
        ),
        prompt(
            GOAL_MODE_SYSTEM_MESSAGE,
            "You are an agent helping me achieve the following goal: '{goal}'. You will execute unix commands to achieve the goal. To execute a command, call the command function. Only run one command at a time. I will give you the results of the command. If the command fails, try to edit it or try another command to do the same thing. If we haven't reached our goal, you will then continue execute commands. If there is significant ambiguity then ask me questions. You must verify that the goal is achieved. You must call one of the functions in your response but state your reasoning before calling the function.",
        ),
        prompt(
            SHELL_AUTOSUGGEST_COMMAND,
            r#"The user is asking for an autocomplete suggestion for this Unix shell command, respond with only the suggested command, which should include the original command text, do not add comments or quotations. Here is recent history:
'''
{history}
'''.
If a command appears recently in history it matches the start of the command, suggest that. This is the start of the command: '{command}'."#,
        ),
        prompt(
            SHELL_AUTOSUGGEST_NEW_COMMAND,
            r#"The user is using a Unix shell but hasn't yet entered anything. Suggest a unix command based on previous assistant output like an example. If the user has entered a command recently which failed, suggest a fixed version of that command. Respond with only the shell command, do not add comments or quotations. Do not suggest in natural language, suggest as a unix shell command. Here is recent history:
'''
{history}
'''
If a command appears recently in history, suggest that.
"#,
        ),
        prompt(
            SHELL_AUTOSUGGEST_PROMPT,
            r#"The user is asking a natural language question likely related to a unix shell command or to programming. Complete the question and include the start of the question in the answer. Do not answer the question. Respond only with the completion. Here is some recent context and history from the user's shell:
'''
{history}
'''.
This is the start of the question: '{command}'."#,
        ),
        prompt(
            FIX_COMMAND,
            r#"The user ran the command "{command}", which failed with exit code {status}. The output from the command is below.
		'''
		{output}
		'''
		We want to do several things:
		1. Explain to the user why the command probably failed. If unsure, explain that you do not know.
		2. Edit the command to fix the problem, don't use placeholders. If unsure, explain that you do not know. If sure, then a new line beginning with '>' and then have the updated command. The final line of your response should only have the updated command."#,
        ),
        prompt(
            SUMMARIZE,
            r#"The following is a raw text file, summarize the file contents, the file's purpose, and write a list of the file's key elements:
'''
{content}
'''

Summary:"#,
        ),
        prompt(
            SUMMARIZE_FACTS,
            r#"The following is a raw text file, write a bullet-point list of facts from the document starting with the most important.
'''
{content}
'''

Summary:"#,
        ),
        prompt(
            SUMMARIZE_LIST_OF_FACTS,
            r#"The following is a list of facts, write a general description of the document and summarize its important facts in a bulleted list.
'''
{content}
'''

Description and Important Facts:"#,
        ),
        prompt(
            GENERATE_COMMAND,
            r#"Write a shell command that accomplishes the following goal. Respond with only the shell command.
'''
{content}
'''

Shell command:"#,
        ),
        prompt(
            QUESTION,
            r#"Answer this question about files stored on disk. Here are some snippets from the file separated by '---'.
'''
{snippets}
'''
{question}:"#,
        ),
    ]
}
