use std::collections::VecDeque;

use crate::buffer::Buffer;
use crate::completion::Completer;
use crate::error::{Error, Result};

/// Something that can be told how a queued operation ended.
pub trait Complete {
    fn complete(self, result: Result<()>);
}

impl Complete for Completer<()> {
    fn complete(self, result: Result<()>) {
        Completer::complete(self, result);
    }
}

/// A buffer waiting to be written and the handle that reports its outcome.
#[derive(Debug)]
pub struct SendItem<C = Completer<()>> {
    pub buffer: Buffer,
    pub completion: C,
}

impl<C: Complete> SendItem<C> {
    pub fn new(buffer: Buffer, completion: C) -> Self {
        Self { buffer, completion }
    }

    pub fn complete(self, result: Result<()>) {
        self.completion.complete(result);
    }
}

/// FIFO of pending sends.
///
/// Items leave the queue in submission order, either through [`pop`] or all
/// at once through [`fail_all`].
///
/// [`pop`]: SendQueue::pop
/// [`fail_all`]: SendQueue::fail_all
#[derive(Debug)]
pub struct SendQueue<C = Completer<()>> {
    items: VecDeque<SendItem<C>>,
}

impl<C> Default for SendQueue<C> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<C: Complete> SendQueue<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, buffer: Buffer, completion: C) {
        self.items.push_back(SendItem::new(buffer, completion));
    }

    pub fn push_item(&mut self, item: SendItem<C>) {
        self.items.push_back(item);
    }

    pub fn pop(&mut self) -> Option<SendItem<C>> {
        self.items.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Take every queued item, leaving the queue empty.
    pub fn take(&mut self) -> SendQueue<C> {
        SendQueue {
            items: std::mem::take(&mut self.items),
        }
    }

    /// Complete every queued item with `error`, oldest first.
    pub fn fail_all(&mut self, error: &Error) {
        while let Some(item) = self.items.pop_front() {
            item.complete(Err(error.clone()));
        }
    }
}
