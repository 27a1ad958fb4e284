use qs_core::{BoundaryKind, EntryKind, QsValue, QueueScriptError, Severity};

use super::lifecycle::QueueScriptEngine;
use super::queue::QueueId;

impl QueueScriptEngine {
    /// Routes a runtime fault: clears the suspension markers, then walks
    /// the frame stack looking for a try boundary ahead of each cursor.
    /// Finding one parks the fault on the queue and jumps there; finding
    /// none anywhere terminates the queue and reports the failure.
    pub(crate) fn unwind(&mut self, id: QueueId, fault: QueueScriptError) {
        {
            let Some(queue) = self.queue_mut(id) else {
                return;
            };
            queue.waiting_on = None;
            queue.wait_timer = 0.0;
        }

        loop {
            if let Some((owner, boundary)) = self.reachable_try_boundary(id) {
                let Some(queue) = self.queue_mut(id) else {
                    return;
                };
                queue.pending_fault = Some(fault);
                if let Some(frame) = queue.frames.last_mut() {
                    frame.cursor = boundary;
                    // Blocks abandoned by the jump lose their loop state.
                    let exited: Vec<usize> = frame
                        .control
                        .range(owner..=boundary)
                        .map(|(index, _)| *index)
                        .collect();
                    for index in exited {
                        frame.control.remove(&index);
                    }
                }
                return;
            }

            let Some(queue) = self.queue_mut(id) else {
                return;
            };
            // Unwound frames are discarded whole; their determinations
            // do not reach the parent.
            queue.frames.pop();
            if queue.frames.is_empty() {
                break;
            }
        }

        self.output.emit(Severity::Error, &fault.display_message());
        if let Some(queue) = self.queue_mut(id) {
            queue.frames.clear();
            queue.running = false;
        }
        self.finish_queue(id);
    }

    /// Next try boundary at or after the top frame's cursor, as
    /// (owner index, boundary index).
    fn reachable_try_boundary(&self, id: QueueId) -> Option<(usize, usize)> {
        let index = self.queue_index(id)?;
        let frame = self.queues[index].frames.last()?;
        (frame.cursor..frame.entries().len()).find_map(|at| match frame.entries()[at].kind {
            EntryKind::Boundary {
                owner,
                boundary: BoundaryKind::Try,
            } => Some((owner, at)),
            _ => None,
        })
    }

    /// The try boundary entry. Reached in normal flow it skips a
    /// directly following catch block; reached with a pending fault it
    /// consumes the fault, binds `error_message`, and enters the catch
    /// body when one follows. A bare try swallows the fault.
    pub(crate) fn try_boundary(&mut self, id: QueueId) -> Result<(), QueueScriptError> {
        let fault = self
            .queue_mut(id)
            .and_then(|queue| queue.pending_fault.take());

        let catch_range = {
            let frame = self.top_frame_mut(id)?;
            frame
                .entries()
                .get(frame.cursor)
                .filter(|next| next.command_name() == Some("catch"))
                .and_then(|next| next.block)
        };

        match fault {
            None => {
                if let Some(range) = catch_range {
                    self.top_frame_mut(id)?.cursor = range.end + 1;
                }
            }
            Some(fault) => {
                self.scope_mut(id)?
                    .set("error_message", QsValue::String(fault.message));
                if let Some(range) = catch_range {
                    self.top_frame_mut(id)?.cursor = range.start + 1;
                }
            }
        }
        Ok(())
    }
}
