use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use xdg::BaseDirectories;

use mergeguard::agents::DEFAULT_PROMPTS;
use mergeguard::config::{find_project_root, CONFIG_FILE, LOCAL_DIR};

/// Default config.toml content
const DEFAULT_CONFIG: &str = r#"# MergeGuard configuration.
# Credentials are read from the environment only:
#   MISTRAL_API_KEY  (required)
#   GITHUB_TOKEN     (optional, raises GitHub rate limits and enables private repos)

[mistral]
base_url = "https://api.mistral.ai"
timeout_secs = 120

[github]
api_url = "https://api.github.com"
timeout_secs = 30

[pipeline]
# "server": handoffs executed by the platform
# "sequential": one conversation per agent, driven by mergeguard
handoff_mode = "server"
stage_timeout_secs = 300
max_retries = 2
max_tool_rounds = 32
fallback_to_sequential = true
keep_agents = false

# Per-agent overrides. MERGEGUARD_MODEL overrides every model at once.
# [agents.planner]
# model = "mistral-large-latest"
# temperature = 0.2
#
# [agents.reviewer]
# model = "devstral-latest"
# temperature = 0.3
#
# [agents.verifier]
# model = "devstral-latest"
# temperature = 0.1
#
# [agents.reporter]
# model = "mistral-large-latest"
# temperature = 0.1

# prompt_dir = "/custom/path/to/prompts"  # Optional: custom prompt directory
"#;

/// Default local config.toml content
const DEFAULT_LOCAL_CONFIG: &str = r#"# Project-local MergeGuard configuration.
# Values here override the global config (~/.config/mergeguard/config.toml).
# Only specify values you want to override.

# [pipeline]
# handoff_mode = "sequential"
# stage_timeout_secs = 300

# [agents.reviewer]
# model = "devstral-latest"
"#;

/// Run the init command
pub fn run_init(force: bool, local: bool) -> Result<()> {
    if local {
        let mergeguard_dir = find_project_root().join(LOCAL_DIR);
        write_layout(&mergeguard_dir, DEFAULT_LOCAL_CONFIG, force)?;

        println!();
        println!("Local initialization complete!");
        println!(
            "Project-local config: {}",
            mergeguard_dir.join(CONFIG_FILE).display()
        );
        println!(
            "Project-local prompts: {}",
            mergeguard_dir.join("prompts").display()
        );
        println!();
        println!("Tip: Commit {}/ to share review prompts with your team.", LOCAL_DIR);
        return Ok(());
    }

    let base_dirs =
        BaseDirectories::with_prefix("mergeguard").context("Failed to get config directory")?;
    let config_home = base_dirs.get_config_home();
    write_layout(&config_home, DEFAULT_CONFIG, force)?;

    println!();
    println!("Initialization complete!");
    println!();
    println!(
        "You can customize prompts by editing files in {}",
        config_home.join("prompts").display()
    );
    println!("Available template variables: {{{{pr_url}}}}, {{{{owner}}}}, {{{{repo}}}}, {{{{pr_number}}}}");

    Ok(())
}

/// Write `config.toml` and `prompts/*.md` under `dir`.
fn write_layout(dir: &Path, config: &str, force: bool) -> Result<()> {
    if !dir.exists() {
        println!("Creating configuration directory: {}", dir.display());
        fs::create_dir_all(dir).context("Failed to create config directory")?;
    }
    write_file_if_needed(&dir.join(CONFIG_FILE), config, force, CONFIG_FILE)?;

    let prompts_dir = dir.join("prompts");
    if !prompts_dir.exists() {
        println!("Creating prompts directory: {}", prompts_dir.display());
        fs::create_dir_all(&prompts_dir).context("Failed to create prompts directory")?;
    }
    for (name, content) in DEFAULT_PROMPTS {
        write_file_if_needed(&prompts_dir.join(name), content, force, name)?;
    }
    Ok(())
}

/// Write a file if it doesn't exist or force is true
fn write_file_if_needed(path: &Path, content: &str, force: bool, name: &str) -> Result<()> {
    if path.exists() && !force {
        println!(
            "Skipping {} (already exists, use --force to overwrite)",
            name
        );
        return Ok(());
    }

    println!("Writing {}...", name);
    fs::write(path, content).with_context(|| format!("Failed to write {}", name))?;
    Ok(())
}
