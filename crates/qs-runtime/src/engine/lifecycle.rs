use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use qs_core::{
    builtin_registry, CommandDescriptor, CommandKind, CommandRegistry, Entry, QsValue,
    QueueScriptError, Script, Severity,
};
use regex::Regex;

use super::events::EventDefinition;
use super::queue::{Queue, QueueId};
use super::scope::VarScope;

/// Dispatch guard: a single tick may not execute more entries than this.
pub(crate) const DISPATCH_GUARD: usize = 100_000;

/// Receives every human-visible diagnostic, and backs `run` script
/// resolution with a named document store.
pub trait ScriptOutput: Send + Sync {
    fn emit(&self, severity: Severity, message: &str);
    fn read_document(&self, name: &str) -> Result<String, QueueScriptError>;
    fn write_document(&self, name: &str, text: &str) -> Result<(), QueueScriptError>;
}

/// Turns one raw argument plus the current variable scope into a typed
/// value. The engine treats this as an opaque call per argument per
/// execution.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, raw: &str, scope: &VarScope) -> Result<QsValue, QueueScriptError>;
}

/// Host-registered command body.
pub struct CommandInvocation<'a> {
    pub entry: &'a Entry,
    pub args: &'a [QsValue],
    pub scope: &'a mut VarScope,
    pub output: &'a dyn ScriptOutput,
}

pub trait CommandHandler: Send + Sync {
    fn invoke(&self, invocation: CommandInvocation<'_>) -> Result<(), QueueScriptError>;
}

impl<F> CommandHandler for F
where
    F: Fn(CommandInvocation<'_>) -> Result<(), QueueScriptError> + Send + Sync,
{
    fn invoke(&self, invocation: CommandInvocation<'_>) -> Result<(), QueueScriptError> {
        self(invocation)
    }
}

/// Default evaluator: `$name` (or `${name}` inside quoted arguments)
/// resolves case-insensitively against the scope. A lone reference
/// yields the variable's typed value; references embedded in text
/// interpolate their rendered form. Anything else passes through as a
/// literal string.
#[derive(Debug, Default)]
pub struct TemplateEvaluator;

impl ExpressionEvaluator for TemplateEvaluator {
    fn evaluate(&self, raw: &str, scope: &VarScope) -> Result<QsValue, QueueScriptError> {
        if !raw.contains('$') {
            return Ok(QsValue::String(raw.to_string()));
        }

        let regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("template regex must compile");

        if let Some(captures) = regex.captures(raw) {
            let full = captures
                .get(0)
                .expect("capture group 0 must exist for each regex capture");
            if full.start() == 0 && full.end() == raw.len() {
                let name = variable_name(&captures);
                return scope.get(name).ok_or_else(|| undefined_variable(name));
            }
        }

        let mut output = String::new();
        let mut last_index = 0usize;
        for captures in regex.captures_iter(raw) {
            let full = captures
                .get(0)
                .expect("capture group 0 must exist for each regex capture");
            let name = variable_name(&captures);
            let value = scope.get(name).ok_or_else(|| undefined_variable(name))?;
            output.push_str(&raw[last_index..full.start()]);
            output.push_str(&value.render());
            last_index = full.end();
        }
        output.push_str(&raw[last_index..]);
        Ok(QsValue::String(output))
    }
}

fn variable_name<'a>(captures: &'a regex::Captures<'a>) -> &'a str {
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .expect("variable reference must capture a name")
        .as_str()
}

fn undefined_variable(name: &str) -> QueueScriptError {
    QueueScriptError::new(
        "ENGINE_EVAL_UNDEFINED",
        format!("Variable \"{}\" is not defined.", name),
    )
}

/// Console + filesystem output collaborator.
pub struct StandardOutput {
    root: PathBuf,
}

impl StandardOutput {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ScriptOutput for StandardOutput {
    fn emit(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Error => eprintln!("[error] {}", message),
            Severity::Warning => eprintln!("[warning] {}", message),
            Severity::Good => println!("[ok] {}", message),
            Severity::Info => println!("{}", message),
        }
    }

    fn read_document(&self, name: &str) -> Result<String, QueueScriptError> {
        std::fs::read_to_string(self.root.join(name)).map_err(|error| {
            QueueScriptError::new(
                "ENGINE_DOCUMENT_MISSING",
                format!("Document \"{}\" cannot be read: {}.", name, error),
            )
        })
    }

    fn write_document(&self, name: &str, text: &str) -> Result<(), QueueScriptError> {
        std::fs::write(self.root.join(name), text).map_err(|error| {
            QueueScriptError::new(
                "ENGINE_DOCUMENT_WRITE",
                format!("Document \"{}\" cannot be written: {}.", name, error),
            )
        })
    }
}

/// In-memory output collaborator for tests and embedding hosts that
/// capture diagnostics themselves.
#[derive(Debug, Default)]
pub struct MemoryOutput {
    messages: Mutex<Vec<(Severity, String)>>,
    documents: Mutex<BTreeMap<String, String>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.documents
            .lock()
            .expect("document store lock")
            .insert(name.into(), text.into());
        self
    }

    pub fn messages(&self) -> Vec<(Severity, String)> {
        self.messages.lock().expect("message store lock").clone()
    }

    pub fn document(&self, name: &str) -> Option<String> {
        self.documents
            .lock()
            .expect("document store lock")
            .get(name)
            .cloned()
    }
}

impl ScriptOutput for MemoryOutput {
    fn emit(&self, severity: Severity, message: &str) {
        self.messages
            .lock()
            .expect("message store lock")
            .push((severity, message.to_string()));
    }

    fn read_document(&self, name: &str) -> Result<String, QueueScriptError> {
        self.document(name).ok_or_else(|| {
            QueueScriptError::new(
                "ENGINE_DOCUMENT_MISSING",
                format!("Document \"{}\" does not exist.", name),
            )
        })
    }

    fn write_document(&self, name: &str, text: &str) -> Result<(), QueueScriptError> {
        self.documents
            .lock()
            .expect("document store lock")
            .insert(name.to_string(), text.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct EngineOptions {
    pub evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    pub output: Option<Arc<dyn ScriptOutput>>,
}

/// The engine: every registry (commands, functions, events) and every
/// live queue is a field here; there is no ambient global state.
pub struct QueueScriptEngine {
    pub(crate) registry: CommandRegistry,
    pub(crate) handlers: HashMap<String, Arc<dyn CommandHandler>>,
    pub(crate) functions: BTreeMap<String, Arc<Script>>,
    pub(crate) events: BTreeMap<String, EventDefinition>,
    pub(crate) evaluator: Arc<dyn ExpressionEvaluator>,
    pub(crate) output: Arc<dyn ScriptOutput>,
    pub(crate) queues: Vec<Queue>,
    pub(crate) queue_counter: u64,
}

impl QueueScriptEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            registry: builtin_registry(),
            handlers: HashMap::new(),
            functions: BTreeMap::new(),
            events: BTreeMap::new(),
            evaluator: options
                .evaluator
                .unwrap_or_else(|| Arc::new(TemplateEvaluator)),
            output: options
                .output
                .unwrap_or_else(|| Arc::new(StandardOutput::new("."))),
            queues: Vec::new(),
            queue_counter: 1,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn output(&self) -> Arc<dyn ScriptOutput> {
        self.output.clone()
    }

    /// Registers a host command. A duplicate name is a warning and a
    /// no-op; the existing descriptor stays authoritative.
    pub fn register_command(
        &mut self,
        descriptor: CommandDescriptor,
        handler: Arc<dyn CommandHandler>,
    ) {
        let mut descriptor = descriptor;
        descriptor.kind = CommandKind::Host;
        let name = descriptor.name.to_ascii_lowercase();
        if !self.registry.register(descriptor) {
            self.output.emit(
                Severity::Warning,
                &format!("Command \"{}\" is already registered.", name),
            );
            return;
        }
        self.handlers.insert(name, handler);
    }

    pub fn unregister_command(&mut self, name: &str) {
        self.registry.unregister(name);
        self.handlers.remove(&name.to_ascii_lowercase());
    }

    /// Functions may be redefined; the newest definition wins.
    pub fn register_function(&mut self, name: &str, script: Script) {
        self.functions
            .insert(name.to_ascii_lowercase(), Arc::new(script));
    }

    pub fn function(&self, name: &str) -> Option<Arc<Script>> {
        self.functions.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Pushes the initial frame, runs one zero-delta tick, and leaves a
    /// still-running queue registered for future scheduler ticks.
    pub fn execute_script(
        &mut self,
        script: Script,
        vars: BTreeMap<String, QsValue>,
    ) -> (QueueId, Vec<QsValue>) {
        let mut scope = VarScope::default();
        for (name, value) in vars {
            scope.set(&name, value);
        }
        let id = self.spawn_queue(Arc::new(script), scope, None);
        self.tick_queue(id, 0.0);
        (id, self.determinations(id))
    }

    pub(crate) fn queue_index(&self, id: QueueId) -> Option<usize> {
        self.queues.iter().position(|queue| queue.id == id)
    }

    pub(crate) fn queue_mut(&mut self, id: QueueId) -> Option<&mut Queue> {
        self.queues.iter_mut().find(|queue| queue.id == id)
    }
}

#[cfg(test)]
mod lifecycle_tests {
    use super::super::runtime_test_support::*;
    use super::*;

    #[test]
    fn template_evaluator_resolves_whole_token_references_typed() {
        let mut scope = VarScope::default();
        scope.set("items", QsValue::List(vec![QsValue::Number(1.0)]));
        scope.set("name", QsValue::from("ada"));

        let evaluator = TemplateEvaluator;
        let value = evaluator
            .evaluate("$items", &scope)
            .expect("whole-token lookup should pass");
        assert!(matches!(value, QsValue::List(_)));

        let value = evaluator
            .evaluate("hello $name!", &scope)
            .expect("interpolation should pass");
        assert_eq!(value, QsValue::from("hello ada!"));

        let value = evaluator
            .evaluate("${name}-tag", &scope)
            .expect("braced interpolation should pass");
        assert_eq!(value, QsValue::from("ada-tag"));
    }

    #[test]
    fn template_evaluator_rejects_undefined_variables() {
        let evaluator = TemplateEvaluator;
        let error = evaluator
            .evaluate("$missing", &VarScope::default())
            .expect_err("undefined variable should fail");
        assert_eq!(error.code, "ENGINE_EVAL_UNDEFINED");
    }

    #[test]
    fn template_evaluator_passes_literals_through() {
        let evaluator = TemplateEvaluator;
        let value = evaluator
            .evaluate("plain-text", &VarScope::default())
            .expect("literal should pass");
        assert_eq!(value, QsValue::from("plain-text"));
    }

    #[test]
    fn duplicate_command_registration_warns_and_keeps_the_original() {
        let (mut engine, output) = test_engine();
        let handler: Arc<dyn CommandHandler> =
            Arc::new(|_invocation: CommandInvocation<'_>| Ok(()));
        engine.register_command(CommandDescriptor::host("ping", 0, None), handler.clone());
        engine.register_command(CommandDescriptor::host("PING", 0, None), handler);

        let warnings = output
            .messages()
            .into_iter()
            .filter(|(severity, _)| *severity == Severity::Warning)
            .count();
        assert_eq!(warnings, 1);
    }

    #[test]
    fn builtin_commands_cannot_be_shadowed_by_hosts() {
        let (mut engine, output) = test_engine();
        let handler: Arc<dyn CommandHandler> =
            Arc::new(|_invocation: CommandInvocation<'_>| Ok(()));
        engine.register_command(CommandDescriptor::host("echo", 0, None), handler);
        assert_eq!(output.messages().len(), 1);
    }

    #[test]
    fn memory_output_stores_documents() {
        let output = MemoryOutput::new().with_document("startup.qs", "echo hi");
        assert_eq!(
            output
                .read_document("startup.qs")
                .expect("document should resolve"),
            "echo hi"
        );
        let error = output
            .read_document("missing.qs")
            .expect_err("missing document should fail");
        assert_eq!(error.code, "ENGINE_DOCUMENT_MISSING");

        output
            .write_document("out.txt", "payload")
            .expect("write should pass");
        assert_eq!(output.document("out.txt"), Some("payload".to_string()));
    }
}
