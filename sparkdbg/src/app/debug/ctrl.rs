// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Ordered fan-out of one process's control/log stream. Late subscribers
//! replay at most the last [`HISTORY_LIMIT`] events.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::app::errors::AppResult;
use crate::app::types::ControlLogLine;

pub const HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub enum CtrlEvent {
    Line(ControlLogLine),
    /// Terminal event; nothing follows it.
    Completed(AppResult<()>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

pub struct CtrlSubscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<CtrlEvent>,
}

#[derive(Default)]
struct Inner {
    history: VecDeque<CtrlEvent>,
    subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<CtrlEvent>)>,
    next_id: u64,
    completed: bool,
}

impl Inner {
    fn register(&mut self, replay: bool) -> CtrlSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        if replay {
            for event in &self.history {
                let _ = tx.send(event.clone());
            }
        }
        // Dropping the sender of a completed subject closes the receiver.
        if !self.completed {
            self.subscribers.push((id, tx));
        }
        CtrlSubscription { id, events: rx }
    }

    fn publish(&mut self, event: CtrlEvent) {
        self.subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }
}

#[derive(Default)]
pub struct CtrlSubject {
    inner: Mutex<Inner>,
}

impl CtrlSubject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, line: ControlLogLine) {
        let mut inner = self.lock();
        if inner.completed {
            tracing::trace!(text = %line.text, "dropping line after completion");
            return;
        }
        inner.publish(CtrlEvent::Line(line));
    }

    /// Publish the terminal event. Only the first call has an effect.
    pub fn complete(&self, result: AppResult<()>) -> bool {
        let mut inner = self.lock();
        if inner.completed {
            return false;
        }
        inner.publish(CtrlEvent::Completed(result));
        inner.completed = true;
        inner.subscribers.clear();
        true
    }

    /// Subscribe with replay of everything emitted so far.
    pub fn subscribe(&self) -> CtrlSubscription {
        self.lock().register(true)
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe_live(&self) -> CtrlSubscription {
        self.lock().register(false)
    }

    /// Replace `previous` with a live subscription without losing or
    /// duplicating events between the two.
    pub fn handover(&self, previous: SubscriptionId) -> CtrlSubscription {
        let mut inner = self.lock();
        inner.subscribers.retain(|(id, _)| *id != previous);
        inner.register(false)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().subscribers.retain(|(sub, _)| *sub != id);
    }

    pub fn is_completed(&self) -> bool {
        self.lock().completed
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
