use std::collections::BTreeMap;
use std::sync::Arc;

use qs_core::{QsValue, QueueScriptError, Script, Severity};

use super::lifecycle::QueueScriptEngine;
use super::scope::VarScope;

pub(crate) struct EventHandler {
    pub priority: i64,
    pub script: Arc<Script>,
}

pub(crate) struct EventDefinition {
    pub cancellable: bool,
    pub handlers: Vec<EventHandler>,
}

/// Result of firing an event: the context map after every handler that
/// ran, and whether a handler cancelled the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct EventOutcome {
    pub context: BTreeMap<String, QsValue>,
    pub cancelled: bool,
}

impl QueueScriptEngine {
    /// Declares an event. Re-declaring updates the cancellable flag and
    /// keeps any handlers already attached.
    pub fn register_event(&mut self, name: &str, cancellable: bool) {
        self.events
            .entry(name.to_ascii_lowercase())
            .and_modify(|definition| definition.cancellable = cancellable)
            .or_insert(EventDefinition {
                cancellable,
                handlers: Vec::new(),
            });
    }

    /// Attaches a handler script. An `event` statement may attach to an
    /// event the host never declared; such events default to
    /// non-cancellable.
    pub(crate) fn add_event_handler(&mut self, name: &str, priority: i64, script: Script) {
        let definition = self
            .events
            .entry(name.to_ascii_lowercase())
            .or_insert(EventDefinition {
                cancellable: false,
                handlers: Vec::new(),
            });
        definition.handlers.push(EventHandler {
            priority,
            script: Arc::new(script),
        });
    }

    /// Runs every handler in ascending priority order. Each handler is
    /// seeded with the context map as its variables and its final scope
    /// updates the map for the next handler. On a cancellable event a
    /// handler setting `cancel` to true stops the chain.
    pub fn fire_event(
        &mut self,
        name: &str,
        context: BTreeMap<String, QsValue>,
    ) -> Result<EventOutcome, QueueScriptError> {
        let (cancellable, scripts) = {
            let definition = self.events.get(&name.to_ascii_lowercase()).ok_or_else(|| {
                QueueScriptError::new(
                    "ENGINE_EVENT_UNKNOWN",
                    format!("Event \"{}\" is not registered.", name),
                )
            })?;
            let mut ordered: Vec<(i64, Arc<Script>)> = definition
                .handlers
                .iter()
                .map(|handler| (handler.priority, handler.script.clone()))
                .collect();
            ordered.sort_by_key(|(priority, _)| *priority);
            (
                definition.cancellable,
                ordered
                    .into_iter()
                    .map(|(_, script)| script)
                    .collect::<Vec<_>>(),
            )
        };

        let mut context = context;
        let mut cancelled = false;
        for script in scripts {
            let mut scope = VarScope::default();
            for (key, value) in &context {
                scope.set(key, value.clone());
            }

            let handler_id = self.spawn_queue(script.clone(), scope, None);
            self.tick_queue(handler_id, 0.0);
            if self.queue_running(handler_id) {
                // Handlers run synchronously inside the fire; one that
                // suspends cannot be waited for.
                self.output.emit(
                    Severity::Warning,
                    &format!(
                        "Handler \"{}\" for event \"{}\" suspended and was stopped.",
                        script.name, name
                    ),
                );
                self.stop_queue(handler_id);
            }

            if let Some(final_scope) = self
                .queue_mut(handler_id)
                .and_then(|queue| queue.final_scope.take())
            {
                for (key, value) in final_scope.to_map() {
                    context.insert(key, value);
                }
            }
            self.queues.retain(|queue| queue.id != handler_id);

            let cancel_requested = context
                .get("cancel")
                .map(QsValue::is_truthy)
                .unwrap_or(false);
            if cancellable && cancel_requested {
                cancelled = true;
                break;
            }
        }

        Ok(EventOutcome { context, cancelled })
    }
}
