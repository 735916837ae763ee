// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Raw datagram socket over a non-blocking network stack.
//!
//! The stack never blocks: it answers [`ErrorCode::WOULDBLOCK`] and later
//! reports readiness through the callback installed with
//! [`NetworkStack::attach`]. [`RawSocket`] turns this into blocking calls with
//! an optional timeout.
//!
//! Several threads may share one socket: one parked in `sendto`, another in
//! `recvfrom`, a third calling `close`. The socket lock is never held while
//! sending, receiving or waiting, and `close` does not return
//! before every sender and receiver has observed the closed socket and left.
//!
//! Usage:
//!
//! ```rust,ignore
//! let socket = RawSocket::new(stack);
//! socket.open()?;
//! socket.set_timeout(Some(Duration::from_millis(500)));
//! socket.connect(peer)?;
//! socket.send(&frame)?;
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::{debug, trace, warn};

use crate::ErrorCode;

pub type SocketHandle = usize;

/// Called by the stack whenever a socket may have become readable or
/// writable.
pub type ReadinessCallback = Arc<dyn Fn() + Send + Sync>;

/// Non-blocking socket primitives of the network stack.
pub trait NetworkStack: Send + Sync {
    fn open(&self) -> Result<SocketHandle, ErrorCode>;
    fn close(&self, handle: SocketHandle) -> Result<(), ErrorCode>;
    fn bind(&self, handle: SocketHandle, address: SocketAddr) -> Result<(), ErrorCode>;

    /// Send one datagram. Returns `WOULDBLOCK` when it cannot be queued now.
    fn sendto(
        &self,
        handle: SocketHandle,
        address: SocketAddr,
        data: &[u8],
    ) -> Result<usize, ErrorCode>;

    /// Receive one datagram into `buf`, returning its length and source.
    /// Returns `WOULDBLOCK` when nothing is queued.
    fn recvfrom(
        &self,
        handle: SocketHandle,
        buf: &mut [u8],
    ) -> Result<(usize, SocketAddr), ErrorCode>;

    /// Install or remove (`None`) the readiness callback of `handle`.
    fn attach(&self, handle: SocketHandle, callback: Option<ReadinessCallback>);

    fn gethostbyname(&self, name: &str) -> Result<IpAddr, ErrorCode>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketState {
    Unopened,
    Open,
    /// Open with a peer set. Only a filter and a default destination.
    Connected,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Timeout {
    /// One stack attempt, never park.
    NonBlocking,
    After(Duration),
    Forever,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Reader,
    Writer,
}

/// Snapshot of a socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketStats {
    pub state: SocketState,
    pub peer: Option<SocketAddr>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Times a caller parked waiting for readiness.
    pub waits: usize,
    /// Datagrams dropped because they did not come from the peer.
    pub discarded: usize,
    pub readers: usize,
    pub writers: usize,
}

struct State {
    handle: Option<SocketHandle>,
    peer: Option<SocketAddr>,
    timeout: Timeout,
    readers: usize,
    writers: usize,
    pending: bool,
    closed: bool,
    bytes_sent: u64,
    bytes_received: u64,
    waits: usize,
    discarded: usize,
}

impl State {
    fn count(&mut self, side: Side) -> &mut usize {
        match side {
            Side::Reader => &mut self.readers,
            Side::Writer => &mut self.writers,
        }
    }

    fn socket_state(&self) -> SocketState {
        match (self.closed, self.handle, self.peer) {
            (true, _, _) => SocketState::Closed,
            (false, None, _) => SocketState::Unopened,
            (false, Some(_), None) => SocketState::Open,
            (false, Some(_), Some(_)) => SocketState::Connected,
        }
    }
}

struct Shared {
    state: Mutex<State>,
    /// Signalled when the stack reports readiness or the socket closes.
    readiness: Condvar,
    /// Signalled when a reader or writer leaves.
    finished: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn signal(&self) {
        self.lock().pending = true;
        self.readiness.notify_all();
    }
}

/// Outcome of one stack attempt.
enum Step<T> {
    Done(Result<T, ErrorCode>),
    /// Drop what was received and try again right away.
    Discard,
}

pub struct RawSocket<S: NetworkStack> {
    stack: Arc<S>,
    shared: Arc<Shared>,
}

impl<S: NetworkStack> RawSocket<S> {
    /// An unopened, blocking socket.
    pub fn new(stack: Arc<S>) -> RawSocket<S> {
        RawSocket {
            stack,
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    handle: None,
                    peer: None,
                    timeout: Timeout::Forever,
                    readers: 0,
                    writers: 0,
                    pending: false,
                    closed: false,
                    bytes_sent: 0,
                    bytes_received: 0,
                    waits: 0,
                    discarded: 0,
                }),
                readiness: Condvar::new(),
                finished: Condvar::new(),
            }),
        }
    }

    pub fn open(&self) -> Result<(), ErrorCode> {
        let mut state = self.shared.lock();
        if state.closed || state.handle.is_some() {
            return Err(ErrorCode::PARAMETER);
        }
        let handle = self.stack.open()?;
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        self.stack.attach(
            handle,
            Some(Arc::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.signal();
                }
            })),
        );
        state.handle = Some(handle);
        debug!("socket {} open", handle);
        Ok(())
    }

    /// Readiness notification from the stack. Wakes every parked caller; each
    /// re-checks its own condition.
    pub fn event(&self) {
        self.shared.signal();
    }

    pub fn bind(&self, address: SocketAddr) -> Result<(), ErrorCode> {
        let handle = self.open_handle()?;
        self.stack.bind(handle, address)
    }

    /// Fix the peer: it becomes the destination of [`RawSocket::send`] and
    /// the only source [`RawSocket::recvfrom`] accepts. No packets are
    /// exchanged.
    pub fn connect(&self, address: SocketAddr) -> Result<(), ErrorCode> {
        let mut state = self.shared.lock();
        if state.closed || state.handle.is_none() {
            return Err(ErrorCode::NOSOCKET);
        }
        state.peer = Some(address);
        Ok(())
    }

    /// Resolve `name` through the stack and connect to it.
    pub fn connect_host(&self, name: &str, port: u16) -> Result<(), ErrorCode> {
        let ip = self.stack.gethostbyname(name).map_err(|e| {
            warn!("cannot resolve {}: {:?}", name, e);
            ErrorCode::DNSFAILURE
        })?;
        self.connect(SocketAddr::new(ip, port))
    }

    pub fn set_blocking(&self, blocking: bool) {
        self.shared.lock().timeout = if blocking {
            Timeout::Forever
        } else {
            Timeout::NonBlocking
        };
    }

    /// `None` blocks forever, a zero duration makes the socket non-blocking.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.shared.lock().timeout = match timeout {
            None => Timeout::Forever,
            Some(d) if d.is_zero() => Timeout::NonBlocking,
            Some(d) => Timeout::After(d),
        };
    }

    pub fn sendto(&self, address: SocketAddr, data: &[u8]) -> Result<usize, ErrorCode> {
        let sent = self.run(Side::Writer, |handle, _| {
            Step::Done(self.stack.sendto(handle, address, data))
        })?;
        self.shared.lock().bytes_sent += sent as u64;
        Ok(sent)
    }

    /// Send to the connected peer.
    pub fn send(&self, data: &[u8]) -> Result<usize, ErrorCode> {
        let peer = self.shared.lock().peer.ok_or(ErrorCode::NOADDRESS)?;
        self.sendto(peer, data)
    }

    /// Receive one datagram. On a connected socket, datagrams from any other
    /// source are discarded.
    pub fn recvfrom(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), ErrorCode> {
        let (len, from) = self.run(Side::Reader, |handle, peer| {
            match self.stack.recvfrom(handle, &mut *buf) {
                Ok((_, from)) if peer.is_some_and(|peer| peer != from) => {
                    trace!("dropping datagram from {}", from);
                    Step::Discard
                }
                result => Step::Done(result),
            }
        })?;
        self.shared.lock().bytes_received += len as u64;
        Ok((len, from))
    }

    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, ErrorCode> {
        self.recvfrom(buf).map(|(len, _)| len)
    }

    /// Raw sockets have no connection to accept.
    pub fn accept(&self) -> Result<RawSocket<S>, ErrorCode> {
        Err(ErrorCode::UNSUPPORTED)
    }

    pub fn listen(&self, _backlog: usize) -> Result<(), ErrorCode> {
        Err(ErrorCode::UNSUPPORTED)
    }

    /// Close the socket. Parked senders and receivers are woken and fail with
    /// `NOSOCKET`; this call returns once all of them have left. A socket
    /// that was never opened has nothing to close and stays openable.
    pub fn close(&self) -> Result<(), ErrorCode> {
        let mut state = self.shared.lock();
        if state.closed || state.handle.is_none() {
            return Err(ErrorCode::NOSOCKET);
        }
        state.closed = true;
        self.shared.readiness.notify_all();
        let mut state = self
            .shared
            .finished
            .wait_while(state, |s| s.readers > 0 || s.writers > 0)
            .unwrap_or_else(PoisonError::into_inner);
        let Some(handle) = state.handle.take() else {
            return Ok(());
        };
        drop(state);

        self.stack.attach(handle, None);
        debug!("socket {} closed", handle);
        self.stack.close(handle)
    }

    pub fn stats(&self) -> SocketStats {
        let state = self.shared.lock();
        SocketStats {
            state: state.socket_state(),
            peer: state.peer,
            bytes_sent: state.bytes_sent,
            bytes_received: state.bytes_received,
            waits: state.waits,
            discarded: state.discarded,
            readers: state.readers,
            writers: state.writers,
        }
    }

    fn open_handle(&self) -> Result<SocketHandle, ErrorCode> {
        let state = self.shared.lock();
        match state.handle {
            Some(handle) if !state.closed => Ok(handle),
            _ => Err(ErrorCode::NOSOCKET),
        }
    }

    /// The send/receive retry loop shared by both directions.
    fn run<T>(
        &self,
        side: Side,
        mut attempt: impl FnMut(SocketHandle, Option<SocketAddr>) -> Step<T>,
    ) -> Result<T, ErrorCode> {
        let mut state = self.shared.lock();
        *state.count(side) += 1;

        let result = loop {
            let handle = match state.handle {
                Some(handle) if !state.closed => handle,
                _ => break Err(ErrorCode::NOSOCKET),
            };
            state.pending = false;
            let (peer, timeout) = (state.peer, state.timeout);
            drop(state);

            let step = attempt(handle, peer);
            state = self.shared.lock();

            let outcome = match step {
                Step::Done(outcome) => outcome,
                Step::Discard => {
                    state.discarded += 1;
                    continue;
                }
            };
            if !matches!(outcome, Err(ErrorCode::WOULDBLOCK)) || timeout == Timeout::NonBlocking {
                break outcome;
            }

            state.waits += 1;
            let idle = |s: &mut State| !s.pending && !s.closed;
            let (guard, timed_out) = match timeout {
                Timeout::After(duration) => {
                    let (guard, wait) = self
                        .shared
                        .readiness
                        .wait_timeout_while(state, duration, idle)
                        .unwrap_or_else(PoisonError::into_inner);
                    (guard, wait.timed_out())
                }
                _ => (
                    self.shared
                        .readiness
                        .wait_while(state, idle)
                        .unwrap_or_else(PoisonError::into_inner),
                    false,
                ),
            };
            state = guard;
            if timed_out {
                break Err(ErrorCode::WOULDBLOCK);
            }
        };

        let count = state.count(side);
        *count -= 1;
        let last = *count == 0;
        if state.closed || last {
            self.shared.finished.notify_all();
        }
        result
    }
}

impl<S: NetworkStack> Drop for RawSocket<S> {
    fn drop(&mut self) {
        let handle = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.handle.take()
        };
        if let Some(handle) = handle {
            self.stack.attach(handle, None);
            if let Err(e) = self.stack.close(handle) {
                warn!("socket {} close on drop failed: {:?}", handle, e);
            }
        }
    }
}
