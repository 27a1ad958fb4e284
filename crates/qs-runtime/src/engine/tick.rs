use qs_core::{CommandKind, Entry, EntryKind, QueueScriptError, SourceRef};

use super::lifecycle::{QueueScriptEngine, DISPATCH_GUARD};
use super::queue::QueueId;

pub(crate) enum StepOutcome {
    Continue,
    Suspended,
    Finished,
}

enum Fetch {
    Entry(Entry),
    Pop,
    Finished,
}

impl QueueScriptEngine {
    /// Advances one queue by one cooperative tick: burns down the wait
    /// timer, then executes entries depth-first until the queue
    /// suspends or its frame stack empties.
    pub fn tick_queue(&mut self, id: QueueId, delta: f64) {
        {
            let Some(queue) = self.queue_mut(id) else {
                return;
            };
            if !queue.running {
                return;
            }
            if queue.wait_timer > 0.0 {
                queue.wait_timer -= delta;
                if queue.wait_timer > 0.0 {
                    return;
                }
                queue.wait_timer = 0.0;
            }
            if queue.waiting_on.is_some() {
                return;
            }
        }

        let mut guard = 0usize;
        loop {
            guard += 1;
            if guard > DISPATCH_GUARD {
                self.unwind(
                    id,
                    QueueScriptError::new(
                        "ENGINE_GUARD_EXCEEDED",
                        format!(
                            "Execution guard exceeded {} dispatches in one tick.",
                            DISPATCH_GUARD
                        ),
                    ),
                );
                return;
            }
            match self.step_queue(id) {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Suspended) | Ok(StepOutcome::Finished) => return,
                Err(fault) => self.unwind(id, fault),
            }
        }
    }

    /// Executes at most one entry (or one frame pop). The cursor always
    /// moves past the entry before it is dispatched, so commands see it
    /// pointing at the next statement.
    fn step_queue(&mut self, id: QueueId) -> Result<StepOutcome, QueueScriptError> {
        let fetch = {
            let Some(queue) = self.queue_mut(id) else {
                return Ok(StepOutcome::Finished);
            };
            if !queue.running {
                Fetch::Finished
            } else {
                match queue.frames.last_mut() {
                    None => {
                        queue.running = false;
                        Fetch::Finished
                    }
                    Some(frame) if frame.cursor >= frame.entries().len() => Fetch::Pop,
                    Some(frame) => {
                        let entry = frame.entries()[frame.cursor].clone();
                        frame.cursor += 1;
                        Fetch::Entry(entry)
                    }
                }
            }
        };

        match fetch {
            Fetch::Finished => Ok(StepOutcome::Finished),
            Fetch::Pop => {
                self.pop_top_frame(id);
                Ok(if self.queue_running(id) {
                    StepOutcome::Continue
                } else {
                    StepOutcome::Finished
                })
            }
            Fetch::Entry(entry) => {
                self.dispatch(id, &entry)?;
                let Some(queue) = self.queue_mut(id) else {
                    return Ok(StepOutcome::Finished);
                };
                if !queue.running {
                    return Ok(StepOutcome::Finished);
                }
                if queue.wait_timer > 0.0 || queue.waiting_on.is_some() {
                    return Ok(StepOutcome::Suspended);
                }
                Ok(StepOutcome::Continue)
            }
        }
    }

    fn dispatch(&mut self, id: QueueId, entry: &Entry) -> Result<(), QueueScriptError> {
        let result = match &entry.kind {
            EntryKind::Boundary { owner, boundary } => {
                self.execute_boundary(id, entry, *owner, *boundary)
            }
            EntryKind::Command { name } => match self.registry.lookup(name) {
                None => Err(QueueScriptError::new(
                    "ENGINE_UNKNOWN_COMMAND",
                    format!("Command \"{}\" is not registered.", name),
                )),
                Some(descriptor) => match descriptor.kind {
                    CommandKind::If => self.execute_if(id, entry),
                    CommandKind::Else => self.execute_else(id, entry),
                    CommandKind::While | CommandKind::Repeat | CommandKind::Foreach => {
                        self.execute_loop_enter(id, entry, descriptor.kind)
                    }
                    CommandKind::Break => self.execute_break(id, entry),
                    CommandKind::Call => self.execute_call(id, entry),
                    CommandKind::Inject => self.execute_inject(id, entry),
                    CommandKind::Run => self.execute_run(id, entry),
                    CommandKind::Function => self.execute_function_def(id, entry),
                    CommandKind::Event => self.execute_event_def(id, entry),
                    CommandKind::Try => self.execute_try(id, entry),
                    CommandKind::Catch => self.execute_catch(id, entry),
                    CommandKind::Error => self.execute_error(id, entry),
                    CommandKind::Determine => self.execute_determine(id, entry),
                    CommandKind::Stop => self.execute_stop(id, entry),
                    CommandKind::Next => self.execute_next(id, entry),
                    CommandKind::Wait => self.execute_wait(id, entry),
                    CommandKind::Echo => self.execute_echo(id, entry),
                    CommandKind::Set => self.execute_set(id, entry),
                    CommandKind::Unset => self.execute_unset(id, entry),
                    CommandKind::Host => self.execute_host(id, entry, &descriptor),
                },
            },
        };
        result.map_err(|error| error.at(SourceRef::new(&entry.script, entry.line)))
    }
}
