use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use qs_api::{run_project, ProjectOptions};
use qs_core::QsValue;
use qs_runtime::{RhaiEvaluator, StandardOutput};
use walkdir::WalkDir;

const SCRIPT_EXTENSION: &str = "qs";

#[derive(Debug, Parser)]
#[command(name = "queuescript")]
#[command(about = "QueueScript batch runner")]
struct Cli {
    #[command(subcommand)]
    command: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Execute a script directory's entry script to completion.
    Run(RunArgs),
    /// Validate every script in a directory without executing it.
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long = "scripts-dir")]
    scripts_dir: PathBuf,
    /// Entry script name relative to the directory; defaults to main.qs.
    #[arg(long = "entry")]
    entry: Option<String>,
    /// Initial variables, repeatable as NAME=VALUE.
    #[arg(long = "var", value_name = "NAME=VALUE")]
    vars: Vec<String>,
    /// Seconds of script time advanced per scheduler tick.
    #[arg(long = "tick", default_value_t = 0.1)]
    tick: f64,
    #[arg(long = "max-ticks", default_value_t = 100_000)]
    max_ticks: usize,
    /// Evaluate ${...} arguments with the Rhai expression engine.
    #[arg(long = "rhai")]
    rhai: bool,
    /// Print the determinations as a JSON array instead of one per line.
    #[arg(long = "json")]
    json: bool,
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[arg(long = "scripts-dir")]
    scripts_dir: PathBuf,
}

fn main() -> Result<()> {
    match Cli::parse().command {
        Mode::Run(args) => run(args),
        Mode::Check(args) => check(args),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let sources = load_sources(&args.scripts_dir)?;
    let vars = parse_vars(&args.vars)?;

    let mut run = run_project(ProjectOptions {
        sources,
        entry: args.entry,
        vars,
        commands: Vec::new(),
        evaluator: args.rhai.then(|| {
            Arc::new(RhaiEvaluator) as Arc<dyn qs_runtime::ExpressionEvaluator>
        }),
        output: Some(Arc::new(StandardOutput::new(&args.scripts_dir))),
    })
    .map_err(|error| anyhow::anyhow!(error.display_message()))?;

    let mut determinations = run.determinations;
    let mut ticks = 0usize;
    while run.engine.has_running_queues() {
        ticks += 1;
        if ticks > args.max_ticks {
            bail!("scripts still running after {} ticks", args.max_ticks);
        }
        run.engine.tick(args.tick);
        let latest = run.engine.determinations(run.queue);
        if !latest.is_empty() {
            determinations = latest;
        }
    }

    if args.json {
        println!("{}", serde_json::to_string(&determinations)?);
    } else {
        for value in &determinations {
            println!("{}", value.render());
        }
    }
    Ok(())
}

fn check(args: CheckArgs) -> Result<()> {
    let sources = load_sources(&args.scripts_dir)?;
    let mut broken = 0usize;
    for (name, source) in &sources {
        match qs_api::check_source(name, source) {
            Ok(_) => println!("ok: {}", name),
            Err(error) => {
                broken += 1;
                eprintln!("error: {}: {}", error.code, error.display_message());
            }
        }
    }
    if broken > 0 {
        bail!("{} of {} script(s) failed to parse", broken, sources.len());
    }
    Ok(())
}

/// All `.qs` files under the directory, keyed by their relative path.
fn load_sources(scripts_dir: &Path) -> Result<BTreeMap<String, String>> {
    if !scripts_dir.is_dir() {
        bail!("scripts-dir is not a directory: {}", scripts_dir.display());
    }

    let mut sources = BTreeMap::new();
    for entry in WalkDir::new(scripts_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(SCRIPT_EXTENSION) {
            continue;
        }

        let relative = path
            .strip_prefix(scripts_dir)
            .context("script path should live under scripts-dir")?
            .to_string_lossy()
            .replace('\\', "/");
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        sources.insert(relative, content);
    }

    if sources.is_empty() {
        bail!("no .{} files under {}", SCRIPT_EXTENSION, scripts_dir.display());
    }
    Ok(sources)
}

/// NAME=VALUE flags become string variables in the root scope.
fn parse_vars(flags: &[String]) -> Result<BTreeMap<String, QsValue>> {
    let mut vars = BTreeMap::new();
    for flag in flags {
        let Some((name, value)) = flag.split_once('=') else {
            bail!("--var expects NAME=VALUE, got \"{}\"", flag);
        };
        if name.is_empty() {
            bail!("--var expects NAME=VALUE, got \"{}\"", flag);
        }
        vars.insert(name.to_string(), QsValue::from(value));
    }
    Ok(vars)
}

#[cfg(test)]
mod cli_tests {
    use super::*;

    #[test]
    fn var_flags_parse_into_string_variables() {
        let vars = parse_vars(&["who=ada".to_string(), "empty=".to_string()])
            .expect("flags should parse");
        assert_eq!(vars.get("who"), Some(&QsValue::from("ada")));
        assert_eq!(vars.get("empty"), Some(&QsValue::from("")));

        assert!(parse_vars(&["novalue".to_string()]).is_err());
        assert!(parse_vars(&["=orphan".to_string()]).is_err());
    }

    #[test]
    fn source_loading_keeps_only_script_files() {
        let root = std::env::temp_dir().join(format!(
            "qs-cli-test-{}",
            std::process::id()
        ));
        let nested = root.join("lib");
        fs::create_dir_all(&nested).expect("temp dirs should create");
        fs::write(root.join("main.qs"), "echo hi").expect("write should pass");
        fs::write(nested.join("util.qs"), "echo util").expect("write should pass");
        fs::write(root.join("notes.txt"), "ignored").expect("write should pass");

        let sources = load_sources(&root).expect("load should pass");
        assert_eq!(
            sources.keys().cloned().collect::<Vec<_>>(),
            vec!["lib/util.qs".to_string(), "main.qs".to_string()]
        );

        fs::remove_dir_all(&root).expect("cleanup should pass");
    }
}
