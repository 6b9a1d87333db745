//! Dedicated I/O worker thread.
//!
//! One thread, isolated from the compute pool, serves disk-bound and
//! latency-tolerant requests: asynchronous file loads and saves, and
//! hot-reload polling of watched files. A disk stall here never starves a
//! compute worker. When the pool is created with the I/O thread disabled,
//! requests run synchronously on the calling thread instead.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace, warn};

use crate::worker;

/// Completion callback for an asynchronous load.
pub type LoadCallback = Box<dyn FnOnce(io::Result<Vec<u8>>) + Send + 'static>;
/// Completion callback for an asynchronous save.
pub type SaveCallback = Box<dyn FnOnce(io::Result<()>) + Send + 'static>;
/// Invoked from the I/O thread whenever a watched file's mtime changes.
pub type WatchCallback = Box<dyn Fn(&Path) + Send + 'static>;

pub(crate) enum IoRequest {
    Load { path: PathBuf, done: LoadCallback },
    Save {
        path: PathBuf,
        bytes: Vec<u8>,
        done: SaveCallback,
    },
    Watch { path: PathBuf, changed: WatchCallback },
    Unwatch { path: PathBuf },
}

struct WatchEntry {
    path: PathBuf,
    changed: WatchCallback,
    last_mtime: Option<SystemTime>,
}

pub(crate) struct IoWorker {
    tx: Option<Sender<IoRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl IoWorker {
    /// Spawns the I/O thread. A zero `poll_interval` disables hot-reload
    /// polling entirely; the thread then only serves explicit requests.
    pub(crate) fn spawn(poll_interval: Duration) -> io::Result<IoWorker> {
        let (tx, rx) = channel::unbounded();
        let handle = thread::Builder::new()
            .name("genpool-io".into())
            .spawn(move || {
                worker::mark_pool_thread();
                debug!("io worker started");
                run_loop(rx, poll_interval);
                debug!("io worker exiting");
            })?;
        Ok(IoWorker {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Hands the request back when the worker has already shut down; the
    /// caller then executes it synchronously.
    pub(crate) fn send(&self, req: IoRequest) -> Result<(), IoRequest> {
        match &self.tx {
            Some(tx) => tx.send(req).map_err(|e| e.into_inner()),
            None => Err(req),
        }
    }

    /// Disconnects the channel and joins the thread. Pending requests are
    /// still served before the thread observes the disconnect.
    pub(crate) fn shutdown(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("io worker panicked during shutdown");
            }
        }
    }
}

impl Drop for IoWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Executes a request on the calling thread: the synchronous fallback used
/// when the I/O thread is disabled or already gone. Watches cannot work
/// without a polling thread and are dropped with a warning.
pub(crate) fn run_sync(req: IoRequest) {
    match req {
        IoRequest::Load { path, done } => done(fs::read(&path)),
        IoRequest::Save { path, bytes, done } => done(fs::write(&path, &bytes)),
        IoRequest::Watch { path, .. } => {
            warn!(path = %path.display(), "watch ignored: no io thread to poll from")
        }
        IoRequest::Unwatch { .. } => {}
    }
}

fn run_loop(rx: Receiver<IoRequest>, poll_interval: Duration) {
    let mut watches: Vec<WatchEntry> = Vec::new();
    loop {
        let msg = if poll_interval.is_zero() {
            rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
        } else {
            rx.recv_timeout(poll_interval)
        };
        match msg {
            Ok(req) => handle_request(req, &mut watches),
            Err(RecvTimeoutError::Timeout) => poll_watches(&mut watches),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn handle_request(req: IoRequest, watches: &mut Vec<WatchEntry>) {
    match req {
        IoRequest::Load { path, done } => {
            trace!(path = %path.display(), "async load");
            done(fs::read(&path));
        }
        IoRequest::Save { path, bytes, done } => {
            trace!(path = %path.display(), len = bytes.len(), "async save");
            done(fs::write(&path, &bytes));
        }
        IoRequest::Watch { path, changed } => {
            trace!(path = %path.display(), "watch registered");
            let last_mtime = mtime_of(&path);
            watches.push(WatchEntry {
                path,
                changed,
                last_mtime,
            });
        }
        IoRequest::Unwatch { path } => {
            watches.retain(|w| w.path != path);
        }
    }
}

fn poll_watches(watches: &mut Vec<WatchEntry>) {
    for entry in watches.iter_mut() {
        let current = mtime_of(&entry.path);
        if current != entry.last_mtime {
            trace!(path = %entry.path.display(), "watched file changed");
            entry.last_mtime = current;
            (entry.changed)(&entry.path);
        }
    }
}

fn mtime_of(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
