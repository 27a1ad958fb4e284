use qs_core::QsValue;

use super::lifecycle::QueueScriptEngine;
use super::queue::{QueueId, ScopeRef, WaitingOn};

impl QueueScriptEngine {
    /// One external tick: drops queues that finished on an earlier
    /// pass, then advances every live queue once, round-robin.
    pub fn tick(&mut self, delta: f64) {
        self.queues.retain(|queue| queue.running);
        let ids: Vec<QueueId> = self.queues.iter().map(|queue| queue.id).collect();
        for id in ids {
            self.tick_queue(id, delta);
        }
    }

    pub fn queue_running(&self, id: QueueId) -> bool {
        self.queue_index(id)
            .map(|index| self.queues[index].running)
            .unwrap_or(false)
    }

    pub fn has_running_queues(&self) -> bool {
        self.queues.iter().any(|queue| queue.running)
    }

    /// Determinations collected so far: the root frame's while the queue
    /// runs, the queue's final list once it has finished.
    pub fn determinations(&self, id: QueueId) -> Vec<QsValue> {
        let Some(index) = self.queue_index(id) else {
            return Vec::new();
        };
        let queue = &self.queues[index];
        match queue.frames.first() {
            Some(root) => root.determinations.clone(),
            None => queue.determinations.clone(),
        }
    }

    /// Cancellation clears the frame stack immediately; nothing already
    /// executed is rolled back. The root frame's results are kept so a
    /// waiting parent still receives them.
    pub fn stop_queue(&mut self, id: QueueId) {
        let Some(queue) = self.queue_mut(id) else {
            return;
        };
        if let Some(root) = queue.frames.first() {
            queue.determinations = root.determinations.clone();
            if let ScopeRef::Own(scope) = &root.scope {
                queue.final_scope = Some(scope.clone());
            }
        }
        queue.frames.clear();
        queue.waiting_on = None;
        queue.wait_timer = 0.0;
        queue.running = false;
        self.finish_queue(id);
    }

    /// Host signal that an awaited external command has completed. The
    /// queue resumes on its next tick.
    pub fn release_wait(&mut self, id: QueueId) {
        if let Some(queue) = self.queue_mut(id) {
            if queue.waiting_on == Some(WaitingOn::External) {
                queue.waiting_on = None;
            }
        }
    }
}
