mod calls;
mod eval_bool;
mod events;
mod flow;
mod glue;
mod lifecycle;
mod loops;
mod queue;
mod scheduler;
mod scope;
mod tick;
mod unwind;

#[cfg(test)]
mod tests;

pub use lifecycle::{
    CommandHandler, CommandInvocation, EngineOptions, ExpressionEvaluator, MemoryOutput,
    QueueScriptEngine, ScriptOutput, StandardOutput, TemplateEvaluator,
};
pub use events::EventOutcome;
pub use queue::QueueId;
pub use scope::VarScope;
