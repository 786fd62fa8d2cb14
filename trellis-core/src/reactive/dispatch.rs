//! Owner-thread dispatch.
//!
//! A reactive graph is confined to the thread that created its
//! [`Runtime`](super::Runtime). Writes issued from any other thread are
//! wrapped in a [`Job`] and handed to a [`Dispatcher`], which is expected to
//! run them later on the owner thread.
//!
//! [`channel`] builds the stock implementation: a [`ChannelDispatcher`] that
//! any thread can post to, and a [`DispatchQueue`] the owner thread drains,
//! either synchronously from its own loop or as an async task on a
//! current-thread executor.

use std::thread::{self, ThreadId};

use tokio::sync::mpsc::{self, error::SendError, UnboundedReceiver, UnboundedSender};
use tracing::warn;

/// Deferred unit of work destined for the owner thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// "Run this later on the owner thread."
pub trait Dispatcher: Send + Sync {
    /// Queue `job`. On failure the job is handed back so the caller can
    /// decide what to do with it.
    fn dispatch(&self, job: Job) -> Result<(), Job>;
}

/// Create a connected dispatcher/queue pair owned by the calling thread.
pub fn channel() -> (ChannelDispatcher, DispatchQueue) {
    channel_on(thread::current().id())
}

pub(crate) fn channel_on(owner: ThreadId) -> (ChannelDispatcher, DispatchQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelDispatcher { tx }, DispatchQueue { rx, owner })
}

/// Sending half of an owner-thread queue.
#[derive(Clone, Debug)]
pub struct ChannelDispatcher {
    tx: UnboundedSender<Job>,
}

impl Dispatcher for ChannelDispatcher {
    fn dispatch(&self, job: Job) -> Result<(), Job> {
        self.tx.send(job).map_err(|SendError(job)| job)
    }
}

/// Receiving half of an owner-thread queue. Must be drained on the owner
/// thread.
#[derive(Debug)]
pub struct DispatchQueue {
    rx: UnboundedReceiver<Job>,
    owner: ThreadId,
}

impl DispatchQueue {
    /// Run every job that is already queued. Returns how many ran.
    pub fn drain(&mut self) -> usize {
        self.check_thread();
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Wait for the next job and run it. Returns `false` once every
    /// dispatcher has been dropped and the queue is empty.
    pub async fn turn(&mut self) -> bool {
        match self.rx.recv().await {
            Some(job) => {
                self.check_thread();
                job();
                true
            }
            None => false,
        }
    }

    /// Run jobs until every dispatcher has been dropped.
    pub async fn run(mut self) {
        while self.turn().await {}
    }

    /// Number of jobs waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no jobs are waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    fn check_thread(&self) {
        if thread::current().id() != self.owner {
            warn!(
                owner = ?self.owner,
                current = ?thread::current().id(),
                "dispatch queue drained off its owner thread"
            );
        }
    }
}
