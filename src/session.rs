use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use xdg::BaseDirectories;

use crate::agents::AgentRole;
use crate::config::HandoffMode;
use crate::github::PrRef;
use crate::pipeline::PipelineState;
use crate::report::ReviewReport;

const SESSION_FILE: &str = "session.json";
const REPORT_FILE: &str = "report.json";
const STAGES_DIR: &str = "stages";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSession {
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
    pub state: PipelineState,
    pub mode: HandoffMode,
    pub started_at: String,
    pub updated_at: String,
}

impl ReviewSession {
    pub fn new(pr: &PrRef, mode: HandoffMode) -> Self {
        let now = chrono_now();
        Self {
            owner: pr.owner.clone(),
            repo: pr.repo.clone(),
            pr_number: pr.number,
            state: PipelineState::Initializing,
            mode,
            started_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn pr(&self) -> PrRef {
        PrRef::new(&self.owner, &self.repo, self.pr_number)
    }

    pub fn update_state(&mut self, state: PipelineState) {
        self.state = state;
        self.updated_at = chrono_now();
    }

    pub fn set_mode(&mut self, mode: HandoffMode) {
        self.mode = mode;
        self.updated_at = chrono_now();
    }
}

/// Final text of one agent stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub index: usize,
    pub role: AgentRole,
    pub output: String,
    pub timestamp: String,
}

/// Validate a repository name and flatten it for use as a directory name.
pub fn sanitize_repo_name(repo: &str) -> Result<String> {
    if repo.starts_with('/')
        || repo.starts_with('\\')
        || repo.split(['/', '\\']).any(|part| part == ".." || part == ".")
    {
        return Err(anyhow::anyhow!(
            "Invalid repository name: contains path traversal pattern"
        ));
    }

    let sanitized = repo.replace('/', "_");

    // Allow: alphanumeric, underscore, hyphen, single dot (for names like "foo.js")
    for c in sanitized.chars() {
        if !c.is_alphanumeric() && c != '_' && c != '-' && c != '.' {
            return Err(anyhow::anyhow!(
                "Invalid repository name: contains invalid character '{}'",
                c
            ));
        }
    }

    if sanitized.starts_with('.') {
        return Err(anyhow::anyhow!(
            "Invalid repository name: cannot start with a dot"
        ));
    }

    Ok(sanitized)
}

/// On-disk artifacts of past reviews, one directory per pull request.
#[derive(Debug, Clone)]
pub struct ReviewStore {
    root: PathBuf,
}

impl ReviewStore {
    /// `$XDG_CACHE_HOME/mergeguard/reviews`
    pub fn default_location() -> Self {
        let root = BaseDirectories::with_prefix("mergeguard")
            .map(|dirs| dirs.get_cache_home().join("reviews"))
            .unwrap_or_else(|_| PathBuf::from(".cache/mergeguard/reviews"));
        Self { root }
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn review_dir(&self, pr: &PrRef) -> Result<PathBuf> {
        let safe_repo = sanitize_repo_name(&pr.slug())?;
        Ok(self.root.join(format!("{}_{}", safe_repo, pr.number)))
    }

    pub fn read_session(&self, pr: &PrRef) -> Result<Option<ReviewSession>> {
        let path = self.review_dir(pr)?.join(SESSION_FILE);
        read_json(&path).context("Failed to read review session")
    }

    pub fn write_session(&self, session: &ReviewSession) -> Result<()> {
        let dir = self.review_dir(&session.pr())?;
        fs::create_dir_all(&dir).context("Failed to create review directory")?;
        write_json_atomic(&dir.join(SESSION_FILE), session).context("Failed to write review session")
    }

    pub fn write_stage(&self, pr: &PrRef, index: usize, role: AgentRole, output: &str) -> Result<()> {
        let dir = self.review_dir(pr)?.join(STAGES_DIR);
        fs::create_dir_all(&dir).context("Failed to create stages directory")?;

        let record = StageRecord {
            index,
            role,
            output: output.to_string(),
            timestamp: chrono_now(),
        };
        let path = dir.join(format!("{:03}_{}.json", index, role.key()));
        write_json_atomic(&path, &record).context("Failed to write stage output")
    }

    pub fn read_stages(&self, pr: &PrRef) -> Result<Vec<StageRecord>> {
        let dir = self.review_dir(pr)?.join(STAGES_DIR);
        if !dir.exists() {
            return Ok(vec![]);
        }

        let mut stages = Vec::new();
        for entry in fs::read_dir(&dir).context("Failed to read stages directory")? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let content = fs::read_to_string(&path)?;
                if let Ok(record) = serde_json::from_str::<StageRecord>(&content) {
                    stages.push(record);
                }
            }
        }

        stages.sort_by_key(|s| s.index);
        Ok(stages)
    }

    pub fn write_report(&self, pr: &PrRef, report: &ReviewReport) -> Result<()> {
        let dir = self.review_dir(pr)?;
        fs::create_dir_all(&dir).context("Failed to create review directory")?;
        write_json_atomic(&dir.join(REPORT_FILE), report).context("Failed to write report")
    }

    pub fn read_report(&self, pr: &PrRef) -> Result<Option<ReviewReport>> {
        let path = self.review_dir(pr)?.join(REPORT_FILE);
        read_json(&path).context("Failed to read stored report")
    }

    /// Drop everything stored for `pr`, including stages of an earlier run.
    pub fn clear(&self, pr: &PrRef) -> Result<()> {
        let dir = self.review_dir(pr)?;
        if dir.exists() {
            fs::remove_dir_all(&dir).context("Failed to remove review directory")?;
        }
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

fn chrono_now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Recommendation;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    fn pr() -> PrRef {
        PrRef::new("octo", "widgets", 7)
    }

    fn report() -> ReviewReport {
        ReviewReport {
            summary: "Looks fine".to_string(),
            comments: vec![],
            overall_score: 90,
            recommendation: Recommendation::Approve,
            files_reviewed: 2,
            total_issues: 0,
        }
    }

    #[test]
    fn test_sanitize_repo_name() {
        assert_eq!(sanitize_repo_name("octo/widgets").unwrap(), "octo_widgets");
        assert_eq!(sanitize_repo_name("octo/widgets.js").unwrap(), "octo_widgets.js");
        assert!(sanitize_repo_name("../etc/passwd").is_err());
        assert!(sanitize_repo_name("octo/..").is_err());
        assert_eq!(sanitize_repo_name("octo/a..b").unwrap(), "octo_a..b");
        assert!(sanitize_repo_name("/abs").is_err());
        assert!(sanitize_repo_name("octo/wid gets").is_err());
        assert!(sanitize_repo_name(".hidden/repo").is_err());
    }

    #[test]
    #[serial]
    fn test_default_location_follows_xdg_cache_home() {
        let tmp = TempDir::new().unwrap();
        let orig = env::var("XDG_CACHE_HOME").ok();
        env::set_var("XDG_CACHE_HOME", tmp.path());

        let store = ReviewStore::default_location();
        assert_eq!(
            store.review_dir(&pr()).unwrap(),
            tmp.path().join("mergeguard/reviews/octo_widgets_7")
        );

        match orig {
            Some(v) => env::set_var("XDG_CACHE_HOME", v),
            None => env::remove_var("XDG_CACHE_HOME"),
        }
    }

    #[test]
    fn test_review_dir_layout() {
        let store = ReviewStore::at("/tmp/reviews");
        assert_eq!(
            store.review_dir(&pr()).unwrap(),
            PathBuf::from("/tmp/reviews/octo_widgets_7")
        );
    }

    #[test]
    fn test_session_roundtrip_and_state_update() {
        let tmp = TempDir::new().unwrap();
        let store = ReviewStore::at(tmp.path());
        assert!(store.read_session(&pr()).unwrap().is_none());

        let mut session = ReviewSession::new(&pr(), HandoffMode::Server);
        store.write_session(&session).unwrap();
        session.update_state(PipelineState::Reviewing);
        session.set_mode(HandoffMode::Sequential);
        store.write_session(&session).unwrap();

        let loaded = store.read_session(&pr()).unwrap().unwrap();
        assert_eq!(loaded.state, PipelineState::Reviewing);
        assert_eq!(loaded.mode, HandoffMode::Sequential);
        assert!(!tmp.path().join("octo_widgets_7/session.tmp").exists());
    }

    #[test]
    fn test_stages_are_read_in_order() {
        let tmp = TempDir::new().unwrap();
        let store = ReviewStore::at(tmp.path());
        store.write_stage(&pr(), 2, AgentRole::Verifier, "verified").unwrap();
        store.write_stage(&pr(), 0, AgentRole::Planner, "plan").unwrap();
        store.write_stage(&pr(), 1, AgentRole::Reviewer, "review").unwrap();

        let stages = store.read_stages(&pr()).unwrap();
        let roles: Vec<AgentRole> = stages.iter().map(|s| s.role).collect();
        assert_eq!(
            roles,
            vec![AgentRole::Planner, AgentRole::Reviewer, AgentRole::Verifier]
        );
        assert!(tmp
            .path()
            .join("octo_widgets_7/stages/001_reviewer.json")
            .exists());
    }

    #[test]
    fn test_report_roundtrip_and_clear() {
        let tmp = TempDir::new().unwrap();
        let store = ReviewStore::at(tmp.path());
        store.write_report(&pr(), &report()).unwrap();
        assert_eq!(store.read_report(&pr()).unwrap(), Some(report()));

        store.clear(&pr()).unwrap();
        assert!(store.read_report(&pr()).unwrap().is_none());
        assert!(store.read_stages(&pr()).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_report_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let store = ReviewStore::at(tmp.path());
        let dir = store.review_dir(&pr()).unwrap();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(REPORT_FILE), "not json").unwrap();
        assert!(store.read_report(&pr()).is_err());
    }
}
