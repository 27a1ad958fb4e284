use std::sync::Arc;

use qs_core::{BlockRange, Entry, EntryKind, QueueScriptError, Script};

use super::lifecycle::QueueScriptEngine;
use super::queue::{Frame, QueueId, ScopeRef, WaitingOn};
use super::scope::VarScope;

impl QueueScriptEngine {
    /// `call <fn> [-name value ...] [tracked]`: push the function's
    /// template entries as a fresh isolated frame. Named bindings are
    /// written into the new scope before it runs; a bare trailing
    /// argument names a caller variable that receives the child's final
    /// scope when the frame pops.
    pub(crate) fn execute_call(&mut self, id: QueueId, entry: &Entry) -> Result<(), QueueScriptError> {
        let name = self.function_name_arg(id, &entry.args[0])?;
        let script = self.function(&name).ok_or_else(|| {
            QueueScriptError::new(
                "ENGINE_CALL_TARGET",
                format!("Function \"{}\" is not defined.", name),
            )
        })?;

        let mut scope = VarScope::default();
        let mut tracked = None;
        let mut index = 1;
        while index < entry.args.len() {
            let arg = &entry.args[index];
            if let Some(binding) = arg.strip_prefix('-') {
                let raw = entry.args.get(index + 1).ok_or_else(|| {
                    QueueScriptError::new(
                        "ENGINE_CALL_BINDING",
                        format!("Named argument \"-{}\" has no value.", binding),
                    )
                })?;
                scope.set(binding, self.eval_raw(id, raw)?);
                index += 2;
            } else {
                if tracked.is_some() {
                    return Err(QueueScriptError::new(
                        "ENGINE_CALL_BINDING",
                        "\"call\" accepts at most one tracked variable.",
                    ));
                }
                tracked = Some(self.variable_name_arg(id, arg)?);
                index += 1;
            }
        }

        let mut frame = Frame::new(script, ScopeRef::Own(scope));
        frame.tracked_var = tracked;
        self.push_frame(id, frame);
        Ok(())
    }

    /// `inject <fn>`: same lookup as call, but the pushed frame reads
    /// and writes the caller's variables directly. No bindings, no
    /// isolation.
    pub(crate) fn execute_inject(
        &mut self,
        id: QueueId,
        entry: &Entry,
    ) -> Result<(), QueueScriptError> {
        let name = self.function_name_arg(id, &entry.args[0])?;
        let script = self.function(&name).ok_or_else(|| {
            QueueScriptError::new(
                "ENGINE_INJECT_TARGET",
                format!("Function \"{}\" is not defined.", name),
            )
        })?;
        self.push_frame(id, Frame::new(script, ScopeRef::Caller));
        Ok(())
    }

    /// `run <document>`: resolve script text from the document store and
    /// execute it as a new independent queue. `&run` parks this queue on
    /// a waiting-on marker that the child's completion callback clears,
    /// surfacing the child's determinations as `determined`.
    pub(crate) fn execute_run(&mut self, id: QueueId, entry: &Entry) -> Result<(), QueueScriptError> {
        let name = self.eval_raw(id, &entry.args[0])?.render();
        let source = self.output.read_document(&name)?;
        let script = qs_parser::parse(&name, &source, &self.registry);

        let notify = entry.await_completion.then_some(id);
        let child = self.spawn_queue(Arc::new(script), VarScope::default(), notify);
        if entry.await_completion {
            if let Some(queue) = self.queue_mut(id) {
                queue.waiting_on = Some(WaitingOn::Queue(child));
            }
        }
        self.tick_queue(child, 0.0);
        Ok(())
    }

    /// `function <name> { ... }` in normal flow registers the block body
    /// as a named function and skips it.
    pub(crate) fn execute_function_def(
        &mut self,
        id: QueueId,
        entry: &Entry,
    ) -> Result<(), QueueScriptError> {
        let range = Self::block_range(entry)?;
        let name = self.function_name_arg(id, &entry.args[0])?;
        let body = {
            let frame = self.top_frame_mut(id)?;
            frame.cursor = range.end + 1;
            slice_block(frame.entries(), range)
        };
        self.register_function(&name, Script::new(name.clone(), body));
        Ok(())
    }

    /// `event <name> [priority] { ... }` registers the block body as a
    /// handler for the named event and skips it. Handlers fire in
    /// ascending priority order.
    pub(crate) fn execute_event_def(
        &mut self,
        id: QueueId,
        entry: &Entry,
    ) -> Result<(), QueueScriptError> {
        let range = Self::block_range(entry)?;
        let name = self.eval_raw(id, &entry.args[0])?.render();
        let priority = self.integer_arg(id, entry, 1, 0)?;
        let body = {
            let frame = self.top_frame_mut(id)?;
            frame.cursor = range.end + 1;
            slice_block(frame.entries(), range)
        };
        self.add_event_handler(&name, priority, Script::new(name.clone(), body));
        Ok(())
    }

    fn function_name_arg(&self, id: QueueId, raw: &str) -> Result<String, QueueScriptError> {
        if raw.contains('$') {
            Ok(self.eval_raw(id, raw)?.render())
        } else {
            Ok(raw.to_string())
        }
    }
}

/// Clones a block body into a standalone entry array, rebasing the
/// inner block ranges and boundary owners to the new zero-based frame.
fn slice_block(entries: &[Entry], range: BlockRange) -> Vec<Entry> {
    let offset = range.start + 1;
    entries[offset..range.end + 1]
        .iter()
        .map(|entry| {
            let mut entry = entry.clone();
            if let Some(block) = entry.block.as_mut() {
                block.start -= offset;
                block.end -= offset;
            }
            if let EntryKind::Boundary { owner, .. } = &mut entry.kind {
                *owner -= offset;
            }
            entry
        })
        .collect()
}
