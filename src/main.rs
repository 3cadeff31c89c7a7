use std::collections::BTreeMap;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use mergeguard::agents::{AgentRole, MistralClient, PromptLoader};
use mergeguard::config::{find_project_root, Config, HandoffMode, Secrets};
use mergeguard::diff::parse_unified_diff;
use mergeguard::github::{GitHubClient, PrRef};
use mergeguard::output::{
    build_json_output, format_report, format_stages, print_events, write_json_stdout,
};
use mergeguard::pipeline::{Pipeline, PipelineError};
use mergeguard::report::ReviewReport;
use mergeguard::session::ReviewStore;
use mergeguard::style::{check_patch, check_style};
use mergeguard::tools::{tools_for, ToolBox};

mod init;

#[derive(Parser, Debug)]
#[command(name = "mergeguard")]
#[command(about = "Multi-agent pull request review over a hosted agents API")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// GitHub PR URL (e.g., https://github.com/owner/repo/pull/123)
    pr_url: Option<String>,

    /// Output the report as JSON instead of formatted display
    #[arg(long)]
    json: bool,

    /// Stream progress events to stderr as NDJSON
    #[arg(long)]
    events: bool,

    /// "server" (platform-executed handoffs) or "sequential"
    #[arg(long, value_name = "MODE")]
    handoff_mode: Option<HandoffMode>,

    /// Model for every agent; overrides config and MERGEGUARD_MODEL
    #[arg(long)]
    model: Option<String>,

    /// Leave the created agents on the platform after the run
    #[arg(long)]
    keep_agents: bool,

    /// More log output (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the default config and prompt templates
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,

        /// Initialize .mergeguard/ in the project root instead of ~/.config/mergeguard
        #[arg(long)]
        local: bool,
    },
    /// Print the JSON Schema of the review report
    Schema {
        /// Print the tool definitions of every agent instead
        #[arg(long)]
        tools: bool,
    },
    /// Show the stored report of an earlier review
    Show {
        /// GitHub PR URL
        pr_url: String,

        #[arg(long)]
        json: bool,

        /// Also print each agent's stage output before the report
        #[arg(long)]
        stages: bool,
    },
    /// Run the local style checker on a file
    CheckStyle {
        file: PathBuf,

        /// Language override (inferred from the file extension otherwise)
        #[arg(long)]
        language: Option<String>,

        /// Treat the file as a unified diff and check only added lines
        #[arg(long)]
        diff: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if matches!(e.downcast_ref::<PipelineError>(), Some(PipelineError::Cancelled)) {
                eprintln!("\nReview cancelled.");
                return ExitCode::from(130);
            }
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "warn,mergeguard=info",
        _ => "warn,mergeguard=debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: &Args) -> Result<()> {
    match &args.command {
        Some(Command::Init { force, local }) => init::run_init(*force, *local),
        Some(Command::Schema { tools }) => print_schema(*tools),
        Some(Command::Show {
            pr_url,
            json,
            stages,
        }) => show(pr_url, *json, *stages),
        Some(Command::CheckStyle {
            file,
            language,
            diff,
        }) => check_style_file(file, language.as_deref(), *diff),
        None => {
            let Some(pr_url) = args.pr_url.as_deref() else {
                bail!("Missing PR URL. Run `mergeguard --help` for usage.");
            };
            review(pr_url, args).await
        }
    }
}

async fn review(pr_url: &str, args: &Args) -> Result<()> {
    // Reject bad input before touching config or credentials
    let pr: PrRef = pr_url.parse()?;

    let project_root = find_project_root();
    let mut config = Config::load(&project_root).context("Failed to load configuration")?;
    config.apply_env(|key| std::env::var(key).ok())?;
    if let Some(mode) = args.handoff_mode {
        config.pipeline.handoff_mode = mode;
    }
    if let Some(model) = &args.model {
        config.agents.set_model_all(model);
    }
    if args.keep_agents {
        config.pipeline.keep_agents = true;
    }
    let secrets = Secrets::from_env()?;
    debug!(?config, ?secrets, "resolved configuration");

    let retries = config.pipeline.max_retries;
    let github = GitHubClient::new(&config.github, secrets.github_token.as_deref(), retries)?;
    let api = MistralClient::new(&config.mistral, &secrets.mistral_api_key, retries)?;
    let prompts = PromptLoader::new(&config, &project_root);
    for (file, source) in prompts.resolve_all_sources() {
        debug!(prompt = %file, ?source, "prompt template");
    }

    let (event_tx, event_rx) = mpsc::channel(256);
    let printer = tokio::spawn(print_events(event_rx, args.events));

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    if !args.events {
        eprintln!(
            "Reviewing {} ({} handoffs)",
            pr.html_url(),
            config.pipeline.handoff_mode
        );
    }

    let pipeline = Pipeline::new(
        Arc::new(api),
        Arc::new(ToolBox::new(github)),
        config,
        prompts,
        event_tx,
        cancel,
    )
    .with_store(ReviewStore::default_location());
    let result = pipeline.run(&pr).await;
    // closes the event channel so the printer drains and exits
    drop(pipeline);
    let _ = printer.await;

    let outcome = result?;
    if args.json {
        write_json_stdout(&build_json_output(&outcome))?;
    } else {
        println!("{}", format_report(&outcome.report, use_color()));
    }
    Ok(())
}

fn use_color() -> bool {
    std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

fn print_schema(tools: bool) -> Result<()> {
    if tools {
        let by_role: BTreeMap<&str, _> = AgentRole::ALL
            .into_iter()
            .map(|role| (role.key(), tools_for(role)))
            .collect();
        return write_json_stdout(&by_role);
    }
    write_json_stdout(&ReviewReport::json_schema())
}

fn show(pr_url: &str, json: bool, stages: bool) -> Result<()> {
    let pr: PrRef = pr_url.parse()?;
    let store = ReviewStore::default_location();
    let Some(report) = store.read_report(&pr)? else {
        bail!("No stored review for {}", pr);
    };

    if let Some(session) = store.read_session(&pr)? {
        eprintln!(
            "Review of {} from {} ({} handoffs, {})",
            pr,
            session.updated_at,
            session.mode,
            session.state.as_str()
        );
    }

    let stages = if stages {
        store.read_stages(&pr)?
    } else {
        Vec::new()
    };

    if json {
        if stages.is_empty() {
            return write_json_stdout(&report);
        }
        return write_json_stdout(&serde_json::json!({
            "report": report,
            "stages": stages,
        }));
    }
    if !stages.is_empty() {
        println!("{}", format_stages(&stages, use_color()));
    }
    println!("{}", format_report(&report, use_color()));
    Ok(())
}

fn check_style_file(file: &Path, language: Option<&str>, diff: bool) -> Result<()> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    if !diff {
        return write_json_stdout(&check_style(&content, language, file.to_str()));
    }

    let patches = parse_unified_diff(&content);
    if patches.is_empty() {
        // a bare hunk without file headers
        return write_json_stdout(&check_patch(&content, language, None));
    }
    let reports: BTreeMap<_, _> = patches
        .iter()
        .map(|(name, patch)| {
            let report = check_patch(patch, language, Some(name.as_str()));
            (name.as_str(), report)
        })
        .collect();
    write_json_stdout(&reports)
}
