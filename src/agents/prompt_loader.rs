use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use tracing::warn;

use super::AgentRole;
use crate::config::{Config, LOCAL_DIR};
use crate::github::PrRef;

pub const REQUEST_PROMPT: &str = "request.md";
pub const STAGE_PROMPT: &str = "stage.md";

/// Source of a resolved prompt template
#[derive(Debug, Clone, PartialEq)]
pub enum PromptSource {
    /// .mergeguard/prompts/ (project-local)
    Local(PathBuf),
    /// config.prompt_dir (explicit path)
    PromptDir(PathBuf),
    /// ~/.config/mergeguard/prompts/ (global)
    Global(PathBuf),
    /// Binary-embedded default
    Embedded,
}

/// Default prompt templates embedded in the binary, as `(file name, content)`
pub const DEFAULT_PROMPTS: &[(&str, &str)] = &[
    ("planner.md", include_str!("defaults/planner.md")),
    ("reviewer.md", include_str!("defaults/reviewer.md")),
    ("verifier.md", include_str!("defaults/verifier.md")),
    ("reporter.md", include_str!("defaults/reporter.md")),
    (REQUEST_PROMPT, include_str!("defaults/request.md")),
    (STAGE_PROMPT, include_str!("defaults/stage.md")),
];

fn embedded(filename: &str) -> &'static str {
    DEFAULT_PROMPTS
        .iter()
        .find(|(name, _)| *name == filename)
        .map(|(_, content)| *content)
        .unwrap_or_default()
}

/// Prompt loader that reads templates from files or uses defaults.
///
/// Resolution order (highest priority first):
/// 1. `.mergeguard/prompts/{file}` (project-local)
/// 2. `config.prompt_dir`
/// 3. `~/.config/mergeguard/prompts/{file}`
/// 4. Binary-embedded default
#[derive(Debug, Clone)]
pub struct PromptLoader {
    prompt_dir: Option<PathBuf>,
    local_prompts_dir: Option<PathBuf>,
    global_prompts_dir: Option<PathBuf>,
}

impl PromptLoader {
    pub fn new(config: &Config, project_root: &Path) -> Self {
        // Relative prompt_dir resolves against the project root
        let prompt_dir = config.prompt_dir.as_ref().map(|p| {
            let path = PathBuf::from(p);
            if path.is_absolute() {
                path
            } else {
                project_root.join(path)
            }
        });

        let local_prompts_dir = Some(project_root.join(LOCAL_DIR).join("prompts"))
            .filter(|path| path.is_dir());

        let global_prompts_dir = xdg::BaseDirectories::with_prefix("mergeguard")
            .ok()
            .map(|dirs| dirs.get_config_home().join("prompts"));

        Self {
            prompt_dir,
            local_prompts_dir,
            global_prompts_dir,
        }
    }

    /// Loader that only ever returns the embedded defaults
    pub fn embedded_only() -> Self {
        Self {
            prompt_dir: None,
            local_prompts_dir: None,
            global_prompts_dir: None,
        }
    }

    /// Resolve which source would be used for a given prompt filename.
    pub fn resolve_source(&self, filename: &str) -> PromptSource {
        if let Some(ref dir) = self.local_prompts_dir {
            let path = dir.join(filename);
            if path.exists() {
                return PromptSource::Local(path);
            }
        }
        if let Some(ref dir) = self.prompt_dir {
            let path = dir.join(filename);
            if path.exists() {
                return PromptSource::PromptDir(path);
            }
        }
        if let Some(ref dir) = self.global_prompts_dir {
            let path = dir.join(filename);
            if path.exists() {
                return PromptSource::Global(path);
            }
        }
        PromptSource::Embedded
    }

    /// Resolve sources for every prompt file.
    pub fn resolve_all_sources(&self) -> Vec<(String, PromptSource)> {
        DEFAULT_PROMPTS
            .iter()
            .map(|(f, _)| (f.to_string(), self.resolve_source(f)))
            .collect()
    }

    /// System instructions for an agent
    pub fn load_instructions(&self, role: AgentRole) -> String {
        self.load_template(role.prompt_file())
    }

    /// First message sent to the entry agent
    pub fn load_request_prompt(&self, pr: &PrRef) -> String {
        let template = self.load_template(REQUEST_PROMPT);
        render_template(&template, &pr_vars(pr))
    }

    /// Input for a sequential stage: the PR plus the previous agent's output.
    pub fn load_stage_prompt(
        &self,
        pr: &PrRef,
        previous_role: AgentRole,
        previous_output: &str,
        note: Option<&str>,
    ) -> String {
        let template = self.load_template(STAGE_PROMPT);

        let mut vars = pr_vars(pr);
        vars.insert("previous_role", previous_role.to_string());
        vars.insert("previous_output", previous_output.trim().to_string());
        vars.insert(
            "note",
            note.map(|n| format!("\n> Note: {}\n", n)).unwrap_or_default(),
        );

        render_template(&template, &vars)
    }

    /// Order: local .mergeguard/prompts/ → config.prompt_dir → global prompts → embedded default
    fn load_template(&self, filename: &str) -> String {
        [
            &self.local_prompts_dir,
            &self.prompt_dir,
            &self.global_prompts_dir,
        ]
        .into_iter()
        .find_map(|dir| Self::try_load_from(dir, filename))
        .unwrap_or_else(|| embedded(filename).to_string())
    }

    /// Try to load a file from an optional directory.
    /// Returns None for NotFound; logs a warning and returns None for other errors.
    fn try_load_from(dir: &Option<PathBuf>, filename: &str) -> Option<String> {
        dir.as_ref().and_then(|d| {
            let path = d.join(filename);
            match fs::read_to_string(&path) {
                Ok(content) => Some(content),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    warn!(
                        prompt = filename,
                        path = %path.display(),
                        error = %e,
                        "failed to read prompt, falling back"
                    );
                    None
                }
            }
        })
    }
}

fn pr_vars(pr: &PrRef) -> HashMap<&'static str, String> {
    let mut vars = HashMap::new();
    vars.insert("pr_url", pr.html_url());
    vars.insert("owner", pr.owner.clone());
    vars.insert("repo", pr.repo.clone());
    vars.insert("pr_number", pr.number.to_string());
    vars
}

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern is valid"));

/// Render a template by replacing {{key}} with values from vars.
///
/// Single pass: placeholders inside substituted values are left as they are.
fn render_template(template: &str, vars: &HashMap<&str, String>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}
