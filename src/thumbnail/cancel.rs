//! Interrupting workers blocked on a thumbnail wait.
//!
//! A [`CancelToken`] is the receiving end of a channel nobody ever sends on.
//! Cancelling drops the sender, which wakes every waiter at once.

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::{Mutex, PoisonError};

/// Create a linked handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = crossbeam_channel::bounded(0);
    (
        CancelHandle {
            sender: Mutex::new(Some(tx)),
        },
        CancelToken { receiver: rx },
    )
}

/// Owner side. Dropping the handle cancels too.
#[derive(Debug)]
pub struct CancelHandle {
    sender: Mutex<Option<Sender<()>>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    receiver: Receiver<()>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self {
            receiver: crossbeam_channel::never(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_wakes_all_tokens() {
        let (handle, token) = cancel_pair();
        let other = token.clone();
        assert!(!token.is_cancelled());

        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(token.is_cancelled());
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_dropping_handle_cancels() {
        let (handle, token) = cancel_pair();
        drop(handle);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_never_token() {
        assert!(!CancelToken::never().is_cancelled());
        assert!(!CancelToken::default().is_cancelled());
    }
}
