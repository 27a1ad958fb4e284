use std::sync::Arc;

use qs_core::{ArgCoercer, BlockRange, CommandDescriptor, Entry, QsValue, QueueScriptError, Severity};

use super::lifecycle::{CommandInvocation, QueueScriptEngine};
use super::queue::{Frame, QueueId, WaitingOn};
use super::scope::{empty_scope, scope_at, scope_at_mut, VarScope};

impl QueueScriptEngine {
    pub(crate) fn top_frame_mut(&mut self, id: QueueId) -> Result<&mut Frame, QueueScriptError> {
        self.queue_mut(id)
            .and_then(|queue| queue.frames.last_mut())
            .ok_or_else(|| QueueScriptError::new("ENGINE_NO_FRAME", "No runtime frame available."))
    }

    pub(crate) fn peek_scope(&self, id: QueueId) -> &VarScope {
        let Some(index) = self.queue_index(id) else {
            return empty_scope();
        };
        let queue = &self.queues[index];
        if queue.frames.is_empty() {
            return empty_scope();
        }
        scope_at(&queue.frames, queue.frames.len() - 1)
    }

    pub(crate) fn scope_mut(&mut self, id: QueueId) -> Result<&mut VarScope, QueueScriptError> {
        let queue = self
            .queue_mut(id)
            .ok_or_else(|| QueueScriptError::new("ENGINE_NO_FRAME", "No runtime frame available."))?;
        if queue.frames.is_empty() {
            return Err(QueueScriptError::new(
                "ENGINE_NO_FRAME",
                "No runtime frame available.",
            ));
        }
        let top = queue.frames.len() - 1;
        Ok(scope_at_mut(&mut queue.frames, top))
    }

    /// One argument through the expression collaborator.
    pub(crate) fn eval_raw(&self, id: QueueId, raw: &str) -> Result<QsValue, QueueScriptError> {
        self.evaluator.evaluate(raw, self.peek_scope(id))
    }

    pub(crate) fn eval_args(
        &self,
        id: QueueId,
        args: &[String],
    ) -> Result<Vec<QsValue>, QueueScriptError> {
        args.iter().map(|raw| self.eval_raw(id, raw)).collect()
    }

    /// Arguments evaluated, rendered, and joined with single spaces.
    pub(crate) fn eval_joined(
        &self,
        id: QueueId,
        args: &[String],
    ) -> Result<String, QueueScriptError> {
        let values = self.eval_args(id, args)?;
        Ok(values
            .iter()
            .map(QsValue::render)
            .collect::<Vec<_>>()
            .join(" "))
    }

    /// A single value: one argument keeps its type, several collapse to
    /// their joined rendering.
    pub(crate) fn eval_value(
        &self,
        id: QueueId,
        args: &[String],
    ) -> Result<QsValue, QueueScriptError> {
        if args.len() == 1 {
            self.eval_raw(id, &args[0])
        } else {
            self.eval_joined(id, args).map(QsValue::String)
        }
    }

    /// Execution-time coercion of an already-evaluated value. Failures
    /// here are RuntimeErrors, unlike their parse-time counterparts.
    pub(crate) fn runtime_coerce(
        descriptor: &CommandDescriptor,
        index: usize,
        value: QsValue,
    ) -> Result<QsValue, QueueScriptError> {
        let coercer = descriptor.coercer_for(index);
        if coercer == ArgCoercer::Any {
            return Ok(value);
        }
        coercer.coerce(&value.render()).map_err(|detail| {
            QueueScriptError::new(
                "ENGINE_ARGUMENT",
                format!("\"{}\" argument {}: {}.", descriptor.name, index + 1, detail),
            )
        })
    }

    pub(crate) fn integer_arg(
        &self,
        id: QueueId,
        entry: &Entry,
        index: usize,
        default: i64,
    ) -> Result<i64, QueueScriptError> {
        let Some(raw) = entry.args.get(index) else {
            return Ok(default);
        };
        let value = self.eval_raw(id, raw)?;
        let number = value.as_number().ok_or_else(|| {
            QueueScriptError::new(
                "ENGINE_ARGUMENT",
                format!("\"{}\" is not a number.", value.render()),
            )
        })?;
        if number.fract() != 0.0 {
            return Err(QueueScriptError::new(
                "ENGINE_ARGUMENT",
                format!("\"{}\" is not an integer.", value.render()),
            ));
        }
        Ok(number as i64)
    }

    pub(crate) fn block_range(entry: &Entry) -> Result<BlockRange, QueueScriptError> {
        entry.block.ok_or_else(|| {
            QueueScriptError::new(
                "ENGINE_BLOCK_MISSING",
                "Block-owning command has no block range.",
            )
        })
    }

    pub(crate) fn execute_echo(&mut self, id: QueueId, entry: &Entry) -> Result<(), QueueScriptError> {
        let message = self.eval_joined(id, &entry.args)?;
        self.output.emit(Severity::Info, &message);
        Ok(())
    }

    pub(crate) fn execute_set(&mut self, id: QueueId, entry: &Entry) -> Result<(), QueueScriptError> {
        let name = self.variable_name_arg(id, &entry.args[0])?;
        let value = self.eval_value(id, &entry.args[1..])?;
        self.scope_mut(id)?.set(&name, value);
        Ok(())
    }

    pub(crate) fn execute_unset(
        &mut self,
        id: QueueId,
        entry: &Entry,
    ) -> Result<(), QueueScriptError> {
        let name = self.variable_name_arg(id, &entry.args[0])?;
        if self.scope_mut(id)?.remove(&name).is_none() {
            self.output.emit(
                Severity::Warning,
                &format!("Variable \"{}\" does not exist.", name),
            );
        }
        Ok(())
    }

    pub(crate) fn execute_wait(&mut self, id: QueueId, entry: &Entry) -> Result<(), QueueScriptError> {
        let value = self.eval_raw(id, &entry.args[0])?;
        let seconds = value.as_number().ok_or_else(|| {
            QueueScriptError::new(
                "ENGINE_ARGUMENT",
                format!("\"wait\" argument 1: \"{}\" is not a number.", value.render()),
            )
        })?;
        if seconds > 0.0 {
            if let Some(queue) = self.queue_mut(id) {
                queue.wait_timer = seconds;
            }
        }
        Ok(())
    }

    pub(crate) fn execute_host(
        &mut self,
        id: QueueId,
        entry: &Entry,
        descriptor: &CommandDescriptor,
    ) -> Result<(), QueueScriptError> {
        let mut args = Vec::with_capacity(entry.args.len());
        for (index, raw) in entry.args.iter().enumerate() {
            let value = self.eval_raw(id, raw)?;
            args.push(Self::runtime_coerce(descriptor, index, value)?);
        }

        let key = descriptor.name.to_ascii_lowercase();
        let handler = self.handlers.get(&key).cloned().ok_or_else(|| {
            QueueScriptError::new(
                "ENGINE_HANDLER_MISSING",
                format!("Command \"{}\" has no registered handler.", descriptor.name),
            )
        })?;

        let output = Arc::clone(&self.output);
        let scope = self.scope_mut(id)?;
        handler.invoke(CommandInvocation {
            entry,
            args: &args,
            scope,
            output: output.as_ref(),
        })?;

        if descriptor.flags.waitable && entry.await_completion {
            if let Some(queue) = self.queue_mut(id) {
                queue.waiting_on = Some(WaitingOn::External);
            }
        }
        Ok(())
    }

    /// Variable-name argument, evaluated first when it references one.
    pub(crate) fn variable_name_arg(&self, id: QueueId, raw: &str) -> Result<String, QueueScriptError> {
        let name = if raw.contains('$') {
            self.eval_raw(id, raw)?.render()
        } else {
            raw.to_string()
        };
        ArgCoercer::VarName
            .coerce(&name)
            .map(|value| value.render())
            .map_err(|detail| QueueScriptError::new("ENGINE_ARGUMENT", format!("{}.", detail)))
    }
}
