use std::collections::BTreeMap;
use std::sync::Arc;

use qs_core::{CommandDescriptor, QsValue, QueueScriptError, Script};
use qs_runtime::{
    CommandHandler, EngineOptions, ExpressionEvaluator, QueueId, QueueScriptEngine, ScriptOutput,
};

/// Everything needed to set up an engine and run a directory-shaped
/// bundle of script sources.
#[derive(Default)]
pub struct ProjectOptions {
    /// Script name -> source text. Every source lands in the output
    /// collaborator's document store so `run` can reach the siblings.
    pub sources: BTreeMap<String, String>,
    /// Entry script name; defaults to `main.qs`.
    pub entry: Option<String>,
    /// Initial variables for the entry queue's root scope.
    pub vars: BTreeMap<String, QsValue>,
    /// Host commands registered before anything is parsed.
    pub commands: Vec<(CommandDescriptor, Arc<dyn CommandHandler>)>,
    pub evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    pub output: Option<Arc<dyn ScriptOutput>>,
}

/// A started project: the engine keeps any still-suspended queues and
/// must be ticked to drive them.
pub struct ProjectRun {
    pub engine: QueueScriptEngine,
    pub queue: QueueId,
    pub determinations: Vec<QsValue>,
}

const DEFAULT_ENTRY: &str = "main.qs";

/// Parses one source against the built-in command set, surfacing the
/// compile error instead of the fail-closed stand-in script.
pub fn check_source(name: &str, source: &str) -> Result<Script, QueueScriptError> {
    qs_parser::try_parse(name, source, &qs_core::builtin_registry())
}

/// Parses one source against the engine's registry and executes it.
/// Compile errors come back as `Err`.
pub fn execute_source(
    engine: &mut QueueScriptEngine,
    name: &str,
    source: &str,
    vars: BTreeMap<String, QsValue>,
) -> Result<(QueueId, Vec<QsValue>), QueueScriptError> {
    let script = qs_parser::try_parse(name, source, engine.registry())?;
    Ok(engine.execute_script(script, vars))
}

/// Sets up an engine for the bundle, resolves the entry script, and
/// starts it. The caller ticks the returned engine while queues remain
/// live.
pub fn run_project(options: ProjectOptions) -> Result<ProjectRun, QueueScriptError> {
    let mut engine = QueueScriptEngine::new(EngineOptions {
        evaluator: options.evaluator,
        output: options.output,
    });
    for (descriptor, handler) in options.commands {
        engine.register_command(descriptor, handler);
    }

    let entry = resolve_entry(&options.sources, options.entry)?;
    // Publish sources the document store cannot already resolve, so
    // `run` reaches the siblings without clobbering backing files.
    let output = engine.output();
    for (name, source) in &options.sources {
        if output.read_document(name).is_err() {
            output.write_document(name, source)?;
        }
    }

    let source = &options.sources[&entry];
    let (queue, determinations) = execute_source(&mut engine, &entry, source, options.vars)?;
    Ok(ProjectRun {
        engine,
        queue,
        determinations,
    })
}

fn resolve_entry(
    sources: &BTreeMap<String, String>,
    explicit: Option<String>,
) -> Result<String, QueueScriptError> {
    if let Some(entry) = explicit {
        if !sources.contains_key(&entry) {
            return Err(QueueScriptError::new(
                "API_ENTRY_SCRIPT_NOT_FOUND",
                format!("Entry script \"{}\" is not among the sources.", entry),
            ));
        }
        return Ok(entry);
    }

    if sources.contains_key(DEFAULT_ENTRY) {
        return Ok(DEFAULT_ENTRY.to_string());
    }

    Err(QueueScriptError::new(
        "API_ENTRY_MAIN_NOT_FOUND",
        format!("Expected a \"{}\" source as the default entry.", DEFAULT_ENTRY),
    ))
}
