use std::collections::BTreeMap;
use std::sync::Arc;

use qs_core::{Entry, QsValue, QueueScriptError, Script};

use super::lifecycle::QueueScriptEngine;
use super::scope::{scope_at_mut, VarScope};

pub type QueueId = u64;

/// Whether a frame owns its variable scope or reads/writes through the
/// nearest owning frame below it (inject semantics).
#[derive(Debug, Clone)]
pub(crate) enum ScopeRef {
    Own(VarScope),
    Caller,
}

/// Ephemeral per-entry flow state, keyed by the owning entry's index.
/// One variant per stateful flow command; accessors fail closed when
/// the stored variant does not match the command asking for it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ControlData {
    If {
        result: bool,
    },
    Repeat {
        index: usize,
        total: usize,
    },
    While {
        index: usize,
        condition_args: Vec<String>,
    },
    Foreach {
        index: usize,
        items: Vec<QsValue>,
    },
}

/// One script/function invocation: shared immutable entries, a private
/// cursor, a scope reference, and the ephemeral control slots.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub script: Arc<Script>,
    pub cursor: usize,
    pub scope: ScopeRef,
    pub control: BTreeMap<usize, ControlData>,
    pub determinations: Vec<QsValue>,
    pub tracked_var: Option<String>,
}

impl Frame {
    pub fn new(script: Arc<Script>, scope: ScopeRef) -> Self {
        Self {
            script,
            cursor: 0,
            scope,
            control: BTreeMap::new(),
            determinations: Vec::new(),
            tracked_var: None,
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.script.entries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitingOn {
    Queue(QueueId),
    External,
}

/// One independent, resumable execution: a stack of frames plus the
/// suspension state the scheduler consults.
pub(crate) struct Queue {
    pub id: QueueId,
    pub frames: Vec<Frame>,
    pub wait_timer: f64,
    pub waiting_on: Option<WaitingOn>,
    pub running: bool,
    pub pending_fault: Option<QueueScriptError>,
    pub determinations: Vec<QsValue>,
    pub final_scope: Option<VarScope>,
    pub notify: Option<QueueId>,
}

impl QueueScriptEngine {
    pub(crate) fn spawn_queue(
        &mut self,
        script: Arc<Script>,
        scope: VarScope,
        notify: Option<QueueId>,
    ) -> QueueId {
        let id = self.queue_counter;
        self.queue_counter += 1;
        self.queues.push(Queue {
            id,
            frames: vec![Frame::new(script, ScopeRef::Own(scope))],
            wait_timer: 0.0,
            waiting_on: None,
            running: true,
            pending_fault: None,
            determinations: Vec::new(),
            final_scope: None,
            notify,
        });
        id
    }

    pub(crate) fn push_frame(&mut self, id: QueueId, frame: Frame) {
        if let Some(queue) = self.queue_mut(id) {
            queue.frames.push(frame);
        }
    }

    /// Pops the top frame and propagates its results: determinations go
    /// to the parent scope under the reserved `determined` name, a
    /// tracked call variable receives the child's final scope, and a
    /// root pop completes the queue.
    pub(crate) fn pop_top_frame(&mut self, id: QueueId) {
        let Some(index) = self.queue_index(id) else {
            return;
        };
        let Some(frame) = self.queues[index].frames.pop() else {
            return;
        };

        if self.queues[index].frames.is_empty() {
            let queue = &mut self.queues[index];
            queue.determinations = frame.determinations;
            if let ScopeRef::Own(scope) = frame.scope {
                queue.final_scope = Some(scope);
            }
            queue.running = false;
            self.finish_queue(id);
            return;
        }

        let frames = &mut self.queues[index].frames;
        let top = frames.len() - 1;
        if !frame.determinations.is_empty() {
            scope_at_mut(frames, top)
                .set("determined", QsValue::List(frame.determinations.clone()));
        }
        if let Some(tracked) = &frame.tracked_var {
            if let ScopeRef::Own(child_scope) = &frame.scope {
                scope_at_mut(frames, top).set(tracked, QsValue::Map(child_scope.to_map()));
            }
        }
    }

    /// Completion callback: releases a parent queue waiting on this one
    /// and hands it the child's determinations.
    pub(crate) fn finish_queue(&mut self, id: QueueId) {
        let (notify, determinations) = {
            let Some(queue) = self.queue_mut(id) else {
                return;
            };
            (queue.notify.take(), queue.determinations.clone())
        };
        let Some(parent_id) = notify else {
            return;
        };
        let Some(parent) = self.queue_mut(parent_id) else {
            return;
        };
        if parent.waiting_on == Some(WaitingOn::Queue(id)) {
            parent.waiting_on = None;
            if !parent.frames.is_empty() {
                let top = parent.frames.len() - 1;
                scope_at_mut(&mut parent.frames, top)
                    .set("determined", QsValue::List(determinations));
            }
        }
    }
}
