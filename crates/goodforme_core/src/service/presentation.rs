//! Serialized presentation-facing execution context.
//!
//! One dedicated thread runs every subscriber callback, in the order jobs
//! were queued. Gateway code queues jobs while holding the store lock, so
//! subscribers observe commits in commit order.

use log::{error, warn};
use std::any::Any;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Barrier(mpsc::SyncSender<()>),
}

/// FIFO queue drained by one named worker thread.
pub struct PresentationQueue {
    sender: Mutex<Option<mpsc::Sender<Message>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    name: String,
}

impl PresentationQueue {
    /// Spawns the worker thread.
    pub fn start(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Message>();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(rx))?;

        Ok(Self {
            sender: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `job`; returns `false` once the queue has been shut down.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.send(Message::Run(Box::new(job)))
    }

    /// Blocks until every job queued before this call has run.
    ///
    /// Must not be called from a job running on this queue.
    pub fn flush(&self) {
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        if self.send(Message::Barrier(done_tx)) {
            let _ = done_rx.recv();
        }
    }

    /// Drains queued jobs and joins the worker. Idempotent.
    pub fn shutdown(&self) {
        let sender = lock(&self.sender).take();
        drop(sender);
        if let Some(handle) = lock(&self.handle).take() {
            if handle.join().is_err() {
                warn!(
                    "event=presentation_shutdown module=service status=error queue={}",
                    self.name
                );
            }
        }
    }

    fn send(&self, message: Message) -> bool {
        match lock(&self.sender).as_ref() {
            Some(sender) => sender.send(message).is_ok(),
            None => {
                warn!(
                    "event=presentation_dispatch module=service status=dropped queue={} reason=shut_down",
                    self.name
                );
                false
            }
        }
    }
}

impl Drop for PresentationQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(rx: mpsc::Receiver<Message>) {
    while let Ok(message) = rx.recv() {
        match message {
            Message::Run(job) => {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                    error!(
                        "event=subscriber_panic module=service status=error payload={}",
                        payload_summary(payload.as_ref())
                    );
                }
            }
            Message::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn payload_summary(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
