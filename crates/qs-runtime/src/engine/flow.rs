use qs_core::{BoundaryKind, Entry, EntryKind, QueueScriptError};

use super::lifecycle::QueueScriptEngine;
use super::queue::{ControlData, QueueId};

impl QueueScriptEngine {
    pub(crate) fn execute_if(&mut self, id: QueueId, entry: &Entry) -> Result<(), QueueScriptError> {
        let range = Self::block_range(entry)?;
        let condition = self.eval_condition(id, &entry.args);
        let frame = self.top_frame_mut(id)?;
        frame
            .control
            .insert(range.start, ControlData::If { result: condition });
        if !condition {
            frame.cursor = range.end + 1;
        }
        Ok(())
    }

    /// `else` pairs with the if (or else) whose block ends right before
    /// it. A recorded true result skips this branch; otherwise an
    /// optional condition makes it an else-if.
    pub(crate) fn execute_else(
        &mut self,
        id: QueueId,
        entry: &Entry,
    ) -> Result<(), QueueScriptError> {
        let range = Self::block_range(entry)?;
        let my_index = range.start;

        let prior = {
            let frame = self.top_frame_mut(id)?;
            let owner = my_index.checked_sub(1).and_then(|predecessor| {
                frame.entries().iter().enumerate().find_map(|(index, candidate)| {
                    let owns_predecessor =
                        candidate.block.map(|block| block.end) == Some(predecessor);
                    let chains = matches!(candidate.command_name(), Some("if") | Some("else"));
                    (owns_predecessor && chains).then_some(index)
                })
            });
            let Some(owner) = owner else {
                return Err(QueueScriptError::new(
                    "ENGINE_ELSE_PAIR",
                    "\"else\" does not follow an if block.",
                ));
            };
            match frame.control.get(&owner) {
                Some(ControlData::If { result }) => *result,
                _ => {
                    return Err(QueueScriptError::new(
                        "ENGINE_CONTROL_DATA",
                        "\"else\" has no recorded branch result.",
                    ))
                }
            }
        };

        if prior {
            let frame = self.top_frame_mut(id)?;
            frame
                .control
                .insert(my_index, ControlData::If { result: true });
            frame.cursor = range.end + 1;
            return Ok(());
        }

        let taken = entry.args.is_empty() || self.eval_condition(id, &entry.args);
        let frame = self.top_frame_mut(id)?;
        frame
            .control
            .insert(my_index, ControlData::If { result: taken });
        if !taken {
            frame.cursor = range.end + 1;
        }
        Ok(())
    }

    /// N levels out: innermost enclosing breakable block first, then
    /// whole frames. Running out of frames with levels left is a fault.
    pub(crate) fn execute_break(
        &mut self,
        id: QueueId,
        entry: &Entry,
    ) -> Result<(), QueueScriptError> {
        let levels = self.integer_arg(id, entry, 0, 1)?;
        if levels < 1 {
            return Err(QueueScriptError::new(
                "ENGINE_ARGUMENT",
                "\"break\" level must be positive.",
            ));
        }

        let mut remaining = levels as usize;
        // The cursor already points past this entry, so containment is
        // anchored on the break statement itself, then re-anchored on
        // the owner of each exited block so no block is counted twice.
        let mut anchor = self.top_frame_mut(id)?.cursor.saturating_sub(1);
        while remaining > 0 {
            let target = self.innermost_breakable_block(id, anchor);
            match target {
                Some(range) => {
                    let frame = self.top_frame_mut(id)?;
                    frame.cursor = range.end + 1;
                    let exited: Vec<usize> = frame
                        .control
                        .range(range.start..=range.end)
                        .map(|(index, _)| *index)
                        .collect();
                    for index in exited {
                        frame.control.remove(&index);
                    }
                    anchor = range.start;
                    remaining -= 1;
                }
                None => {
                    self.pop_top_frame(id);
                    remaining -= 1;
                    let emptied = self
                        .queue_index(id)
                        .map(|index| self.queues[index].frames.is_empty())
                        .unwrap_or(true);
                    if emptied {
                        if remaining > 0 {
                            return Err(QueueScriptError::new(
                                "ENGINE_BREAK_DEPTH",
                                format!(
                                    "{} break level(s) remained with no frame to leave.",
                                    remaining
                                ),
                            ));
                        }
                        break;
                    }
                    // Back in the caller: the call entry sits right
                    // behind its cursor and anchors the next level.
                    anchor = self.top_frame_mut(id)?.cursor.saturating_sub(1);
                }
            }
        }
        Ok(())
    }

    /// Innermost breakable block whose range strictly encloses the
    /// anchor entry.
    fn innermost_breakable_block(&self, id: QueueId, anchor: usize) -> Option<qs_core::BlockRange> {
        let index = self.queue_index(id)?;
        let frame = self.queues[index].frames.last()?;
        frame
            .entries()
            .iter()
            .filter_map(|candidate| {
                let range = candidate.block?;
                let name = candidate.command_name()?;
                let encloses = range.start < anchor && anchor <= range.end;
                let breakable = self
                    .registry
                    .lookup(name)
                    .map(|descriptor| descriptor.flags.breakable)
                    .unwrap_or(false);
                (encloses && breakable).then_some(range)
            })
            .max_by_key(|range| range.start)
    }

    pub(crate) fn execute_determine(
        &mut self,
        id: QueueId,
        entry: &Entry,
    ) -> Result<(), QueueScriptError> {
        let value = self.eval_value(id, &entry.args)?;
        self.top_frame_mut(id)?.determinations.push(value);
        Ok(())
    }

    /// Bare `stop` exhausts the current frame so it pops cleanly; with
    /// a loop kind it exits the nearest matching loop instead.
    pub(crate) fn execute_stop(
        &mut self,
        id: QueueId,
        entry: &Entry,
    ) -> Result<(), QueueScriptError> {
        if entry.args.is_empty() {
            let frame = self.top_frame_mut(id)?;
            frame.cursor = frame.entries().len();
            return Ok(());
        }

        let kind = self.loop_kind_arg(id, &entry.args[0])?;
        let Some((owner, boundary)) = self.nearest_boundary(id, Some(kind))? else {
            return Err(QueueScriptError::new(
                "ENGINE_STOP_TARGET",
                format!("No {} boundary ahead of \"stop\".", loop_kind_name(kind)),
            ));
        };
        let frame = self.top_frame_mut(id)?;
        frame.cursor = boundary + 1;
        let exited: Vec<usize> = frame
            .control
            .range(owner..=boundary)
            .map(|(index, _)| *index)
            .collect();
        for index in exited {
            frame.control.remove(&index);
        }
        Ok(())
    }

    /// Jumps *to* the nearest loop boundary, re-evaluating the loop
    /// immediately.
    pub(crate) fn execute_next(
        &mut self,
        id: QueueId,
        entry: &Entry,
    ) -> Result<(), QueueScriptError> {
        let kind = match entry.args.first() {
            Some(raw) => Some(self.loop_kind_arg(id, raw)?),
            None => None,
        };
        let Some((_owner, boundary)) = self.nearest_boundary(id, kind)? else {
            return Err(QueueScriptError::new(
                "ENGINE_NEXT_TARGET",
                "No loop boundary ahead of \"next\".",
            ));
        };
        self.top_frame_mut(id)?.cursor = boundary;
        Ok(())
    }

    /// Forward scan from the cursor for the boundary of the nearest
    /// enclosing loop, kind filtered when requested. Only boundaries
    /// whose block contains the executing entry qualify; a later
    /// sibling loop is not a jump target. Returns (owner index,
    /// boundary index).
    fn nearest_boundary(
        &mut self,
        id: QueueId,
        kind: Option<BoundaryKind>,
    ) -> Result<Option<(usize, usize)>, QueueScriptError> {
        let frame = self.top_frame_mut(id)?;
        let entries = frame.entries();
        let anchor = frame.cursor.saturating_sub(1);
        for index in frame.cursor..entries.len() {
            let EntryKind::Boundary { owner, boundary } = entries[index].kind else {
                continue;
            };
            if boundary == BoundaryKind::Try {
                continue;
            }
            if kind.map(|wanted| wanted != boundary).unwrap_or(false) {
                continue;
            }
            let encloses = entries[owner]
                .block
                .map(|range| range.start < anchor && anchor <= range.end)
                .unwrap_or(false);
            if encloses {
                return Ok(Some((owner, index)));
            }
        }
        Ok(None)
    }

    fn loop_kind_arg(&self, id: QueueId, raw: &str) -> Result<BoundaryKind, QueueScriptError> {
        let name = if raw.contains('$') {
            self.eval_raw(id, raw)?.render()
        } else {
            raw.to_string()
        };
        match name.to_ascii_lowercase().as_str() {
            "while" => Ok(BoundaryKind::While),
            "repeat" => Ok(BoundaryKind::Repeat),
            "foreach" => Ok(BoundaryKind::Foreach),
            _ => Err(QueueScriptError::new(
                "ENGINE_ARGUMENT",
                format!("\"{}\" is not a loop kind.", name),
            )),
        }
    }
}

fn loop_kind_name(kind: BoundaryKind) -> &'static str {
    match kind {
        BoundaryKind::While => "while",
        BoundaryKind::Repeat => "repeat",
        BoundaryKind::Foreach => "foreach",
        BoundaryKind::Try => "try",
    }
}

impl QueueScriptEngine {
    pub(crate) fn execute_error(
        &mut self,
        id: QueueId,
        entry: &Entry,
    ) -> Result<(), QueueScriptError> {
        let message = entry
            .args
            .iter()
            .map(|raw| self.eval_operand(id, raw).render())
            .collect::<Vec<_>>()
            .join(" ");
        Err(QueueScriptError::new("ENGINE_SCRIPT_ERROR", message))
    }

    pub(crate) fn execute_try(&mut self, _id: QueueId, entry: &Entry) -> Result<(), QueueScriptError> {
        // A try block has no condition; execution always falls into the
        // body, and its boundary does the catch work.
        Self::block_range(entry)?;
        Ok(())
    }

    /// Reached in normal flow only; the recovery path enters the catch
    /// body directly from the try boundary.
    pub(crate) fn execute_catch(
        &mut self,
        id: QueueId,
        entry: &Entry,
    ) -> Result<(), QueueScriptError> {
        let range = Self::block_range(entry)?;
        self.top_frame_mut(id)?.cursor = range.end + 1;
        Ok(())
    }
}
