use std::{
    sync::mpsc,
    thread::{Scope, ScopedJoinHandle},
    time::Instant,
};

use log::{debug, trace};

use crate::{Error, Result};

type Op<'scope> = Box<dyn FnOnce() -> Result<()> + Send + 'scope>;

enum Command<'scope> {
    Run(&'static str, Op<'scope>),
    Fence(mpsc::SyncSender<Result<()>>),
}

/// In-order command queue drained by its own worker thread.
///
/// Commands run in issue order and the host only blocks in
/// [`Stream::synchronize`]. Once a command fails, later commands are skipped
/// up to the next synchronisation point, which reports the failure. The
/// worker is joined when the stream is dropped.
pub struct Stream<'scope> {
    commands: Option<mpsc::Sender<Command<'scope>>>,
    worker: Option<ScopedJoinHandle<'scope, ()>>,
}

impl<'scope> Stream<'scope> {
    pub fn new<'env>(scope: &'scope Scope<'scope, 'env>) -> Self {
        let (tx, rx) = mpsc::channel();
        let worker = scope.spawn(move || drain(rx));
        Self {
            commands: Some(tx),
            worker: Some(worker),
        }
    }

    /// Queues `op` behind everything issued so far.
    pub fn enqueue<F>(&self, label: &'static str, op: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'scope,
    {
        self.send(Command::Run(label, Box::new(op)))
    }

    /// Blocks until every command issued before this call has finished.
    pub fn synchronize(&self) -> Result<()> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.send(Command::Fence(tx))?;
        rx.recv().map_err(|_| worker_lost())?
    }

    fn send(&self, command: Command<'scope>) -> Result<()> {
        self.commands
            .as_ref()
            .ok_or_else(worker_lost)?
            .send(command)
            .map_err(|_| worker_lost())
    }
}

impl Drop for Stream<'_> {
    fn drop(&mut self) {
        drop(self.commands.take());
        if let Some(worker) = self.worker.take() {
            // A panicked worker already surfaced as a failed synchronize.
            let _ = worker.join();
        }
    }
}

fn drain(commands: mpsc::Receiver<Command<'_>>) {
    let mut failure = None;
    for command in commands {
        match command {
            Command::Run(label, op) => {
                if failure.is_some() {
                    trace!("stream skip op={}", label);
                    continue;
                }
                let start = Instant::now();
                if let Err(err) = op() {
                    failure = Some(err);
                }
                debug!(
                    "stream op={} elapsed={:.2}ms",
                    label,
                    start.elapsed().as_secs_f64() * 1000.
                );
            }
            Command::Fence(reply) => {
                let _ = reply.send(failure.take().map_or(Ok(()), Err));
            }
        }
    }
}

fn worker_lost() -> Error {
    Error::DeviceFault("stream worker exited".to_string())
}
