// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! A bounded pool of open sessions shared between threads
//!
//! A session is held by at most one borrower at a time. Borrowing waits
//! up to a timeout for a session to be returned; nothing else in the pool
//! blocks.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::pkcs11::*;
use crate::session::Session;

#[derive(Debug)]
struct PoolState {
    idle: Vec<Session>,
    closed: bool,
}

#[derive(Debug)]
pub struct SessionPool {
    state: Mutex<PoolState>,
    returned: Condvar,
    capacity: usize,
}

impl SessionPool {
    /// Creates a pool out of already opened sessions
    pub fn new(sessions: Vec<Session>) -> SessionPool {
        let capacity = sessions.len();
        SessionPool {
            state: Mutex::new(PoolState {
                idle: sessions,
                closed: false,
            }),
            returned: Condvar::new(),
            capacity: capacity,
        }
    }

    /* a panic while holding the lock can not leave the list of idle
     * sessions inconsistent, so poisoning is ignored */
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Takes a session out of the pool, the session must be handed back
    /// with [SessionPool::requite]
    pub fn take(&self, timeout: Duration) -> Result<Session> {
        let guard = self.lock();
        let (mut guard, _) = self
            .returned
            .wait_timeout_while(guard, timeout, |s| {
                s.idle.is_empty() && !s.closed
            })
            .unwrap_or_else(|e| e.into_inner());
        if guard.closed {
            return Err(Error::invalid_state(
                CKR_SESSION_CLOSED,
                "session pool is closed".to_string(),
            ));
        }
        match guard.idle.pop() {
            Some(s) => {
                log::debug!("session {} borrowed", s.handle());
                Ok(s)
            }
            None => Err(Error::no_session(timeout)),
        }
    }

    /// Borrows a session, it goes back to the pool when the returned
    /// guard is dropped
    pub fn borrow(&self, timeout: Duration) -> Result<PooledSession<'_>> {
        let session = self.take(timeout)?;
        Ok(PooledSession {
            pool: self,
            session: Some(session),
        })
    }

    /// Returns a session to the pool
    ///
    /// The session is closed instead when the pool was closed or already
    /// holds as many sessions as it was created with. Nothing checks the
    /// session came from this pool, handing in a session opened on a
    /// different module or slot makes later borrowers use it.
    pub fn requite(&self, session: Session) {
        if !session.is_idle() {
            log::warn!(
                "session {} returned with active operations: {:?}",
                session.handle(),
                session.active_operations()
            );
        }
        let mut guard = self.lock();
        let refused = if guard.closed {
            Some("closed")
        } else if guard.idle.len() >= self.capacity {
            Some("full")
        } else {
            None
        };
        if let Some(reason) = refused {
            drop(guard);
            let handle = session.handle();
            log::warn!("session {} returned to a {} pool", handle, reason);
            if let Err(e) = session.close() {
                log::warn!("failed to close session {}: {}", handle, e);
            }
            return;
        }
        log::debug!("session {} returned", session.handle());
        guard.idle.push(session);
        drop(guard);
        self.returned.notify_one();
    }

    /// Number of sessions ready to be borrowed
    pub fn available(&self) -> usize {
        self.lock().idle.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Closes the idle sessions, sessions still borrowed are closed when
    /// they are returned
    ///
    /// Reports the first failure, after trying to close every session.
    pub fn close_all(&self) -> Result<()> {
        let sessions = {
            let mut guard = self.lock();
            guard.closed = true;
            std::mem::take(&mut guard.idle)
        };
        self.returned.notify_all();
        let mut result = Ok(());
        for s in sessions {
            let handle = s.handle();
            if let Err(e) = s.close() {
                log::warn!("failed to close session {}: {}", handle, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

/// A borrowed session, returned to its pool on drop
#[derive(Debug)]
pub struct PooledSession<'a> {
    pool: &'a SessionPool,
    session: Option<Session>,
}

impl PooledSession<'_> {
    /// Takes the session out of the guard, the caller becomes
    /// responsible for returning it
    pub fn detach(mut self) -> Option<Session> {
        self.session.take()
    }
}

impl Deref for PooledSession<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        match &self.session {
            Some(s) => s,
            None => unreachable!("session already returned"),
        }
    }
}

impl DerefMut for PooledSession<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        match &mut self.session {
            Some(s) => s,
            None => unreachable!("session already returned"),
        }
    }
}

impl Drop for PooledSession<'_> {
    fn drop(&mut self) {
        if let Some(s) = self.session.take() {
            self.pool.requite(s);
        }
    }
}
