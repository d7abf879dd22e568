//! Watch session lifecycle.
//!
//! ```text
//! Starting --Established--> Ready
//!    |                        |
//!    +----CloseRequested------+--> Closing
//!    |                        |       |
//!    +--------Exited----------+-------+--> Closed(status)
//! ```
//!
//! The state lives in a `tokio::sync::watch` channel so that handles can both
//! read it synchronously and await the terminal `Closed` state.

use tokio::sync::watch;

use crate::types::SourceExit;

/// Observable state of a watch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The source was launched; watches are being set up.
    Starting,
    /// The source reported that all watches are established.
    Ready,
    /// Termination was requested; waiting for the source to exit.
    Closing,
    /// The source is gone. `None` if it never started or its status is unknown.
    Closed(Option<SourceExit>),
}

impl SessionState {
    /// Returns `true` once the session has reached its terminal state.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }

    /// Exit status of a closed session.
    #[must_use]
    pub fn exit_status(&self) -> Option<SourceExit> {
        match self {
            Self::Closed(status) => *status,
            _ => None,
        }
    }

    /// Applies a transition, returning the next state if it is legal.
    #[must_use]
    pub fn next(&self, transition: &Transition) -> Option<SessionState> {
        match (self, transition) {
            (Self::Starting, Transition::Established) => Some(Self::Ready),
            (Self::Starting | Self::Ready, Transition::CloseRequested) => Some(Self::Closing),
            (state, Transition::Exited(status)) if !state.is_closed() => {
                Some(Self::Closed(*status))
            }
            _ => None,
        }
    }
}

/// Inputs driving the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Established,
    CloseRequested,
    Exited(Option<SourceExit>),
}

/// Applies `transition` to the shared state, notifying waiters on change.
///
/// Returns `false` if the transition is not legal from the current state.
pub fn apply(state: &watch::Sender<SessionState>, transition: Transition) -> bool {
    state.send_if_modified(|current| match current.next(&transition) {
        Some(next) => {
            *current = next;
            true
        }
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXITED: SourceExit = SourceExit {
        code: Some(0),
        signal: None,
    };

    #[test]
    fn established_only_from_starting() {
        assert_eq!(
            SessionState::Starting.next(&Transition::Established),
            Some(SessionState::Ready)
        );
        assert_eq!(SessionState::Ready.next(&Transition::Established), None);
        assert_eq!(SessionState::Closing.next(&Transition::Established), None);
        assert_eq!(SessionState::Closed(None).next(&Transition::Established), None);
    }

    #[test]
    fn close_requested_from_live_states() {
        assert_eq!(
            SessionState::Starting.next(&Transition::CloseRequested),
            Some(SessionState::Closing)
        );
        assert_eq!(
            SessionState::Ready.next(&Transition::CloseRequested),
            Some(SessionState::Closing)
        );
        assert_eq!(SessionState::Closing.next(&Transition::CloseRequested), None);
        assert_eq!(
            SessionState::Closed(None).next(&Transition::CloseRequested),
            None
        );
    }

    #[test]
    fn exited_from_any_open_state() {
        for state in [
            SessionState::Starting,
            SessionState::Ready,
            SessionState::Closing,
        ] {
            assert_eq!(
                state.next(&Transition::Exited(Some(EXITED))),
                Some(SessionState::Closed(Some(EXITED)))
            );
        }
    }

    #[test]
    fn closed_is_terminal() {
        let closed = SessionState::Closed(Some(EXITED));
        assert!(closed.is_closed());
        assert_eq!(closed.exit_status(), Some(EXITED));
        assert_eq!(closed.next(&Transition::Exited(None)), None);
    }

    #[test]
    fn exit_status_of_open_state_is_none() {
        assert_eq!(SessionState::Ready.exit_status(), None);
        assert!(!SessionState::Closing.is_closed());
    }

    #[tokio::test]
    async fn apply_notifies_waiters() {
        let (tx, mut rx) = watch::channel(SessionState::Starting);

        assert!(apply(&tx, Transition::Established));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), SessionState::Ready);

        assert!(!apply(&tx, Transition::Established));
        assert!(!rx.has_changed().unwrap());

        assert!(apply(&tx, Transition::Exited(None)));
        let state = rx.wait_for(SessionState::is_closed).await.unwrap();
        assert_eq!(*state, SessionState::Closed(None));
    }
}
