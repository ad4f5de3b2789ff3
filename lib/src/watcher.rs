// SPDX-FileCopyrightText: 2021 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::{Error, Result, UapiCall};
use log::{debug, error, warn};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const WAKE: Token = Token(usize::MAX);

/// A background thread that waits for events on a set of fds and hands
/// each ready fd to a reader, one event at a time.
///
/// The fds are borrowed, and must remain open until the watcher is stopped.
pub(crate) struct Watcher {
    name: String,
    // Set before waking, so the thread stops even while draining a busy fd.
    stopping: Arc<AtomicBool>,
    waker: Waker,
    thread: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Start watching the fds.
    ///
    /// The reader is called with the index of a ready fd, and the fd itself,
    /// and should read and dispatch a single event.
    pub(crate) fn new<F>(name: &str, fds: &[RawFd], reader: F) -> Result<Watcher>
    where
        F: FnMut(usize, RawFd) -> Result<()> + Send + 'static,
    {
        let poll = Poll::new()?;
        for (idx, fd) in fds.iter().enumerate() {
            poll.registry()
                .register(&mut SourceFd(fd), Token(idx), Interest::READABLE)?;
        }
        let waker = Waker::new(poll.registry(), WAKE)?;
        let fds = fds.to_vec();
        let stopping = Arc::new(AtomicBool::new(false));
        debug!("{name}: watching {} fds", fds.len());
        let thread = {
            let stopping = stopping.clone();
            thread::Builder::new()
                .name(name.into())
                .spawn(move || run(poll, fds, &stopping, reader))?
        };
        Ok(Watcher {
            name: name.into(),
            stopping,
            waker,
            thread: Some(thread),
        })
    }

    /// Stop the thread and wait for it to exit.
    ///
    /// Must not be called from the watcher thread itself, i.e. from within a reader.
    pub(crate) fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stopping.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            // no way to signal the thread, so leave it running rather than block forever
            error!("{}: failed to wake watcher: {e}", self.name);
            return;
        }
        if thread.join().is_err() {
            warn!("{}: watcher thread panicked", self.name);
        }
        debug!("{}: stopped", self.name);
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<F>(mut poll: Poll, fds: Vec<RawFd>, stopping: &AtomicBool, mut reader: F)
where
    F: FnMut(usize, RawFd) -> Result<()>,
{
    let mut events = Events::with_capacity(fds.len() + 1);
    loop {
        if let Err(e) = poll.poll(&mut events, None) {
            match e.raw_os_error() {
                _ if e.kind() == io::ErrorKind::Interrupted => continue,
                Some(libc::EBADF) => return,
                _ => {
                    error!("watcher poll failed: {e}");
                    panic!("watcher poll failed: {e}");
                }
            }
        }
        for event in &events {
            if event.token() == WAKE {
                return;
            }
            let idx = event.token().0;
            let Some(fd) = fds.get(idx).copied() else {
                continue;
            };
            // readiness is edge triggered, so drain all pending events
            loop {
                if stopping.load(Ordering::Acquire) {
                    return;
                }
                match gpioline_uapi::has_event(fd) {
                    Ok(true) => {
                        if let Err(e) = reader(idx, fd) {
                            warn!("failed to read event from fd {fd}: {e}");
                            break;
                        }
                    }
                    Ok(false) => break,
                    Err(e) if e.errno().is_some_and(|errno| errno.0 == libc::EBADF) => return,
                    Err(e) => {
                        warn!("{}", Error::Uapi(UapiCall::ReadEvent, e));
                        break;
                    }
                }
            }
        }
    }
}
