mod engine;
mod helpers;

pub use engine::{
    CommandHandler, CommandInvocation, EngineOptions, EventOutcome, ExpressionEvaluator,
    MemoryOutput, QueueId, QueueScriptEngine, ScriptOutput, StandardOutput, TemplateEvaluator,
    VarScope,
};
pub use helpers::rhai_eval::RhaiEvaluator;
