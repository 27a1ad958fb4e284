use qs_core::{BoundaryKind, CommandKind, Entry, QsValue, QueueScriptError};

use super::lifecycle::QueueScriptEngine;
use super::queue::{ControlData, QueueId};
use super::scope::{bind_foreach_vars, bind_repeat_vars, bind_while_vars};

impl QueueScriptEngine {
    /// First encounter of a loop entry: validate the iteration source,
    /// skip the block outright on zero iterations, otherwise store the
    /// loop state at the owner index, bind the loop variables, and fall
    /// into the body.
    pub(crate) fn execute_loop_enter(
        &mut self,
        id: QueueId,
        entry: &Entry,
        kind: CommandKind,
    ) -> Result<(), QueueScriptError> {
        let range = Self::block_range(entry)?;
        match kind {
            CommandKind::Repeat => {
                let total = self.integer_arg(id, entry, 0, 0)?;
                if total < 1 {
                    self.top_frame_mut(id)?.cursor = range.end + 1;
                    return Ok(());
                }
                let total = total as usize;
                self.top_frame_mut(id)?
                    .control
                    .insert(range.start, ControlData::Repeat { index: 1, total });
                bind_repeat_vars(self.scope_mut(id)?, 1, total);
            }
            CommandKind::While => {
                if !self.eval_condition(id, &entry.args) {
                    self.top_frame_mut(id)?.cursor = range.end + 1;
                    return Ok(());
                }
                self.top_frame_mut(id)?.control.insert(
                    range.start,
                    ControlData::While {
                        index: 1,
                        condition_args: entry.args.clone(),
                    },
                );
                bind_while_vars(self.scope_mut(id)?, 1);
            }
            CommandKind::Foreach => {
                let items = self.foreach_items(id, &entry.args)?;
                if items.is_empty() {
                    self.top_frame_mut(id)?.cursor = range.end + 1;
                    return Ok(());
                }
                let total = items.len();
                let first = items[0].clone();
                self.top_frame_mut(id)?
                    .control
                    .insert(range.start, ControlData::Foreach { index: 1, items });
                bind_foreach_vars(self.scope_mut(id)?, 1, total, &first);
            }
            _ => {
                return Err(QueueScriptError::new(
                    "ENGINE_CONTROL_DATA",
                    "Not a loop command.",
                ))
            }
        }
        Ok(())
    }

    /// A single list argument iterates its elements; otherwise every
    /// evaluated argument is one item.
    fn foreach_items(&self, id: QueueId, args: &[String]) -> Result<Vec<QsValue>, QueueScriptError> {
        let values = self.eval_args(id, args)?;
        if values.len() == 1 {
            if let QsValue::List(items) = &values[0] {
                return Ok(items.clone());
            }
        }
        Ok(values)
    }

    pub(crate) fn execute_boundary(
        &mut self,
        id: QueueId,
        _entry: &Entry,
        owner: usize,
        boundary: BoundaryKind,
    ) -> Result<(), QueueScriptError> {
        if boundary == BoundaryKind::Try {
            return self.try_boundary(id);
        }
        self.loop_boundary(id, owner, boundary)
    }

    /// Block-end transition: advance the owner's loop state (or re-run
    /// the while condition), rebind the loop variables, and jump back
    /// to the first body entry while the loop continues. The accessor
    /// fails closed when the stored variant does not match.
    fn loop_boundary(
        &mut self,
        id: QueueId,
        owner: usize,
        boundary: BoundaryKind,
    ) -> Result<(), QueueScriptError> {
        let stored = {
            let frame = self.top_frame_mut(id)?;
            frame.control.get(&owner).cloned()
        };

        match (boundary, stored) {
            (BoundaryKind::Repeat, Some(ControlData::Repeat { index, total })) => {
                if index < total {
                    let next = index + 1;
                    let frame = self.top_frame_mut(id)?;
                    frame
                        .control
                        .insert(owner, ControlData::Repeat { index: next, total });
                    frame.cursor = owner + 1;
                    bind_repeat_vars(self.scope_mut(id)?, next, total);
                } else {
                    self.top_frame_mut(id)?.control.remove(&owner);
                }
                Ok(())
            }
            (
                BoundaryKind::While,
                Some(ControlData::While {
                    index,
                    condition_args,
                }),
            ) => {
                if self.eval_condition(id, &condition_args) {
                    let next = index + 1;
                    let frame = self.top_frame_mut(id)?;
                    frame.control.insert(
                        owner,
                        ControlData::While {
                            index: next,
                            condition_args,
                        },
                    );
                    frame.cursor = owner + 1;
                    bind_while_vars(self.scope_mut(id)?, next);
                } else {
                    self.top_frame_mut(id)?.control.remove(&owner);
                }
                Ok(())
            }
            (BoundaryKind::Foreach, Some(ControlData::Foreach { index, items })) => {
                if index < items.len() {
                    let next = index + 1;
                    let total = items.len();
                    let item = items[next - 1].clone();
                    let frame = self.top_frame_mut(id)?;
                    frame
                        .control
                        .insert(owner, ControlData::Foreach { index: next, items });
                    frame.cursor = owner + 1;
                    bind_foreach_vars(self.scope_mut(id)?, next, total, &item);
                } else {
                    self.top_frame_mut(id)?.control.remove(&owner);
                }
                Ok(())
            }
            _ => Err(QueueScriptError::new(
                "ENGINE_CONTROL_DATA",
                format!("Loop boundary for entry {} has no matching loop state.", owner),
            )),
        }
    }
}
