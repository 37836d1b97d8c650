use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    thread::{self, JoinHandle},
    time::Instant,
};

use anyhow::{Context, Result};

use crate::{core::subscription::EventSink, protocol::types::Register};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Deferred {
    at: Instant,
    seq: u64,
    register: Register,
    value: u64,
}

/// Deadline-ordered queue of register changes, fired from its own thread.
///
/// Dropping the queue stops the thread; changes still pending are discarded.
pub struct TimerQueue {
    sender: Option<flume::Sender<Deferred>>,
    seq: u64,
    thread: Option<JoinHandle<()>>,
}

impl TimerQueue {
    pub fn start(events: EventSink) -> Result<Self> {
        let (sender, receiver) = flume::unbounded::<Deferred>();
        let thread = thread::Builder::new()
            .name(format!("mockup-{}", events.name()))
            .spawn(move || {
                let mut heap: BinaryHeap<Reverse<Deferred>> = BinaryHeap::new();
                loop {
                    while let Some(Reverse(next)) = heap.peek().copied() {
                        if next.at > Instant::now() {
                            break;
                        }
                        heap.pop();
                        events.publish(next.register, next.value);
                    }
                    let received = match heap.peek() {
                        Some(Reverse(next)) => match receiver.recv_deadline(next.at) {
                            Err(flume::RecvTimeoutError::Timeout) => continue,
                            other => other.map_err(|_| ()),
                        },
                        None => receiver.recv().map_err(|_| ()),
                    };
                    match received {
                        Ok(deferred) => heap.push(Reverse(deferred)),
                        Err(()) => break,
                    }
                }
            })
            .context("Failed to spawn mockup timer thread")?;

        Ok(Self {
            sender: Some(sender),
            seq: 0,
            thread: Some(thread),
        })
    }

    pub fn schedule(&mut self, at: Instant, register: Register, value: u64) {
        self.seq += 1;
        if let Some(sender) = &self.sender {
            let _ = sender.send(Deferred {
                at,
                seq: self.seq,
                register,
                value,
            });
        }
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
