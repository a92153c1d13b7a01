//! `fixloop` CLI: run repair loops, analyze a workspace, inspect past runs.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{debug, error, info};

use fixloop::core::state::{RepairRequest, RepairState};
use fixloop::exit_codes;
use fixloop::io::analyzer::{Analysis, Analyzer, Diagnostics};
use fixloop::io::config::{FixloopConfig, load_config};
use fixloop::io::docker::{ContainerBackend, DockerCli};
use fixloop::io::generative::{CommandFixModel, FixModel};
use fixloop::io::git::GitCli;
use fixloop::io::run_store::{FsRunStore, RunStore, new_run_id};
use fixloop::io::sandbox::Sandbox;
use fixloop::logging;
use fixloop::repair::{Collaborators, RepairSettings, run_repair};

#[derive(Parser)]
#[command(
    name = "fixloop",
    version,
    about = "Autonomous lint/test repair loop for Python repositories"
)]
struct Cli {
    /// Path to the TOML config file (defaults apply when it is missing).
    #[arg(long, global = true, default_value = "fixloop.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Clone each repository and repair it; several URLs run concurrently.
    Run {
        #[arg(long = "repo-url", required = true)]
        repo_urls: Vec<String>,
        #[arg(long)]
        team: String,
        #[arg(long)]
        leader: String,
        /// Override `repair.max_iterations`.
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Lint and test an existing workspace and print the records as JSON.
    Analyze { workspace: PathBuf },
    /// Print the persisted state of a run.
    Status { run_id: String },
}

fn main() -> ExitCode {
    logging::init();
    match run() {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(exit_codes::INVALID as u8)
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    match cli.command {
        Command::Run {
            repo_urls,
            team,
            leader,
            max_iterations,
        } => cmd_run(&config, &repo_urls, &team, &leader, max_iterations),
        Command::Analyze { workspace } => cmd_analyze(&config, &workspace),
        Command::Status { run_id } => cmd_status(&config, &run_id),
    }
}

fn cmd_run(
    config: &FixloopConfig,
    repo_urls: &[String],
    team: &str,
    leader: &str,
    max_iterations: Option<u32>,
) -> Result<i32> {
    if team.trim().is_empty() || leader.trim().is_empty() {
        bail!("--team and --leader must not be empty");
    }
    let repair_config = RepairSettings {
        max_iterations: max_iterations.unwrap_or(config.repair.max_iterations),
        retry: config.retry_policy(),
    };
    if repair_config.max_iterations == 0 {
        bail!("--max-iterations must be > 0");
    }

    let store = FsRunStore::new(&config.repair.registry_dir);
    let scm = GitCli::new(config.git_settings());
    let model = CommandFixModel::from_command(
        &config.generative.command,
        Duration::from_secs(config.generative.timeout_secs),
        config.generative.output_limit_bytes,
    );
    if model.is_none() {
        info!("no generative command configured, only deterministic fixes will be applied");
    }

    let states = thread::scope(|scope| {
        let handles: Vec<_> = repo_urls
            .iter()
            .map(|url| {
                let request = RepairRequest {
                    repo_url: url.clone(),
                    team_name: team.to_string(),
                    leader_name: leader.to_string(),
                };
                let (store, scm, model) = (&store, &scm, model.as_ref());
                scope.spawn(move || {
                    run_one(config, &request, &repair_config, store, scm, model)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join())
            .collect::<Vec<_>>()
    });

    let mut finished = Vec::with_capacity(states.len());
    for joined in states {
        match joined {
            Ok(state) => finished.push(state),
            Err(_) => {
                error!("repair thread panicked");
                return Ok(exit_codes::INVALID);
            }
        }
    }
    for state in &finished {
        println!(
            "{} {} {:?} iterations={} fixes={} branch={}",
            state.run_id,
            state.repo_url,
            state.status,
            state.iteration,
            state.fixed_issues.len(),
            state.branch
        );
    }
    Ok(exit_codes::for_runs(&finished))
}

fn run_one(
    config: &FixloopConfig,
    request: &RepairRequest,
    repair_config: &RepairSettings,
    store: &dyn RunStore,
    scm: &GitCli,
    model: Option<&CommandFixModel>,
) -> RepairState {
    let run_id = new_run_id();
    let workspace = config.repair.workspace_root.join(&run_id);
    let image_tag = run_image_tag(&config.sandbox.image_tag, &run_id);
    let analyzer = Analyzer::new(
        Sandbox::new(docker(config), config.sandbox_settings(Some(image_tag.clone()))),
        config.command_timeout(),
    );
    let collaborators = Collaborators {
        scm,
        diagnostics: &analyzer,
        model: model.map(|m| m as &dyn FixModel),
        store,
    };
    let state = run_repair(&run_id, request, &workspace, &collaborators, repair_config);
    if let Err(err) = analyzer.sandbox().backend().remove_image(&image_tag) {
        debug!(err = %format!("{err:#}"), "failed to remove run image");
    }
    state
}

fn cmd_analyze(config: &FixloopConfig, workspace: &Path) -> Result<i32> {
    if !workspace.is_dir() {
        bail!("workspace {} is not a directory", workspace.display());
    }
    let analyzer = Analyzer::new(
        Sandbox::new(docker(config), config.sandbox_settings(None)),
        config.command_timeout(),
    );
    let report = analysis_report(analyzer.analyze(workspace)?);
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serialize analysis")?
    );
    Ok(exit_codes::OK)
}

fn analysis_report(analysis: Analysis) -> serde_json::Value {
    let inconclusive: Vec<String> = [analysis.lint.inconclusive, analysis.tests.inconclusive]
        .into_iter()
        .flatten()
        .collect();
    json!({
        "lint_errors": analysis.lint.records,
        "test_failures": analysis.tests.records,
        "inconclusive": inconclusive,
    })
}

fn cmd_status(config: &FixloopConfig, run_id: &str) -> Result<i32> {
    let store = FsRunStore::new(&config.repair.registry_dir);
    let Some(state) = store.get(run_id)? else {
        eprintln!("run not found: {run_id}");
        return Ok(exit_codes::NOT_FOUND);
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&state).context("serialize run state")?
    );
    Ok(exit_codes::OK)
}

fn docker(config: &FixloopConfig) -> DockerCli {
    DockerCli::new(
        &config.sandbox.docker_cli,
        config.build_timeout(),
        config.sandbox.output_limit_bytes,
    )
}

/// Per-run image tag so concurrent runs never rebuild each other's image.
fn run_image_tag(image_tag: &str, run_id: &str) -> String {
    let repository = match image_tag.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => repo,
        _ => image_tag,
    };
    format!("{repository}:{run_id}")
}

#[cfg(test)]
mod tests {
    use fixloop::core::types::{ErrorKind, ErrorRecord, PassReport};

    use super::*;

    #[test]
    fn analysis_report_lists_records_and_inconclusive_notes() {
        let analysis = Analysis {
            lint: PassReport::found(vec![ErrorRecord::lint(
                "src/app.py".to_string(),
                3,
                ErrorKind::Syntax,
                "expected ':'".to_string(),
                Some("syntax-error".to_string()),
            )]),
            tests: PassReport::inconclusive("no JUnit report found in test output"),
        };
        let report = analysis_report(analysis);
        assert_eq!(report["lint_errors"].as_array().map(Vec::len), Some(1));
        assert_eq!(report["test_failures"], json!([]));
        assert_eq!(
            report["inconclusive"],
            json!(["no JUnit report found in test output"])
        );
    }

    #[test]
    fn run_image_tag_replaces_only_the_tag() {
        assert_eq!(
            run_image_tag("fixloop-sandbox:latest", "run-1"),
            "fixloop-sandbox:run-1"
        );
        assert_eq!(
            run_image_tag("localhost:5000/sandbox", "run-1"),
            "localhost:5000/sandbox:run-1"
        );
        assert_eq!(run_image_tag("sandbox", "run-1"), "sandbox:run-1");
    }

    #[test]
    fn cli_parses_multiple_repositories() {
        let cli = Cli::try_parse_from([
            "fixloop",
            "run",
            "--repo-url",
            "https://example.com/a.git",
            "--repo-url",
            "https://example.com/b.git",
            "--team",
            "Code Warriors",
            "--leader",
            "Ada",
            "--max-iterations",
            "3",
        ])
        .expect("parse");
        match cli.command {
            Command::Run {
                repo_urls,
                max_iterations,
                ..
            } => {
                assert_eq!(repo_urls.len(), 2);
                assert_eq!(max_iterations, Some(3));
            }
            _ => panic!("expected run"),
        }
        assert_eq!(cli.config, PathBuf::from("fixloop.toml"));
    }
}
