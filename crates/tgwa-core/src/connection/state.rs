//! Connection lifecycle as a closed set of inputs consumed by one transition function.
//!
//! `transition` is pure: it mutates the record and returns the side effects the
//! manager must run. Inputs that make no sense in the current state return
//! `None` and leave the record untouched.

use std::{fmt, time::Duration};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Idle,
    Initializing,
    AwaitingPairing,
    Authenticated,
    Ready,
    Disconnected,
    Reconnecting,
    Destroyed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Initializing => "initializing",
            ConnectionState::AwaitingPairing => "awaiting_pairing",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Ready => "ready",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Destroyed => "destroyed",
        }
    }

    /// States in which an underlying client exists (or is being built).
    fn is_connecting_or_connected(self) -> bool {
        matches!(
            self,
            ConnectionState::Initializing
                | ConnectionState::AwaitingPairing
                | ConnectionState::Authenticated
                | ConnectionState::Ready
                | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-delay retry policy for initialization failures and reconnects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_delay: Duration,
    pub max_init_retries: u32,
    /// `None` reconnects forever.
    pub max_reconnects: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            max_init_retries: 3,
            max_reconnects: None,
        }
    }
}

/// The one mutable connection record per process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub state: ConnectionState,
    /// Latest pairing challenge; only set while awaiting pairing.
    pub pairing_challenge: Option<String>,
    /// Consecutive failed initialization attempts.
    pub retry_count: u32,
    /// Reconnects since the last time the client became ready.
    pub reconnect_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    InitRequested,
    InitFailed(String),
    InitTimedOut(Duration),
    PairingChallenge(String),
    Authenticated,
    Ready,
    Disconnected(String),
    RetryDue,
    ReconnectDue,
    Destroy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    ShowPairingChallenge(String),
    NotifyReady,
    NotifyDisconnected(String),
    NotifyWarning(String),
    PersistSession,
    ReleaseResources,
    ScheduleRetry(Duration),
    ScheduleReconnect(Duration),
    StartInitialization,
}

pub fn transition(
    record: &mut ConnectionRecord,
    input: Input,
    policy: &RetryPolicy,
) -> Option<Vec<Effect>> {
    use ConnectionState as S;

    if record.state == S::Destroyed {
        // Terminal. A second destroy is accepted as a no-op.
        return matches!(input, Input::Destroy).then(Vec::new);
    }

    match input {
        Input::Destroy => {
            record.state = S::Destroyed;
            record.pairing_challenge = None;
            Some(vec![Effect::ReleaseResources])
        }

        Input::InitRequested => match record.state {
            S::Idle | S::Disconnected | S::Reconnecting => {
                record.state = S::Initializing;
                record.pairing_challenge = None;
                Some(Vec::new())
            }
            _ => None,
        },

        Input::InitFailed(cause) => init_failed(record, policy, cause),
        Input::InitTimedOut(budget) => init_failed(
            record,
            policy,
            format!("initialization timed out after {budget:?}"),
        ),

        Input::PairingChallenge(payload) => match record.state {
            S::Initializing | S::AwaitingPairing => {
                record.state = S::AwaitingPairing;
                // Challenges expire quickly; the newest replaces the old one.
                record.pairing_challenge = Some(payload.clone());
                Some(vec![Effect::ShowPairingChallenge(payload)])
            }
            _ => None,
        },

        Input::Authenticated => match record.state {
            S::Initializing | S::AwaitingPairing => {
                record.state = S::Authenticated;
                record.pairing_challenge = None;
                Some(Vec::new())
            }
            _ => None,
        },

        Input::Ready => match record.state {
            S::Initializing | S::AwaitingPairing | S::Authenticated => {
                record.state = S::Ready;
                record.pairing_challenge = None;
                record.retry_count = 0;
                record.reconnect_count = 0;
                Some(vec![Effect::PersistSession, Effect::NotifyReady])
            }
            _ => None,
        },

        Input::Disconnected(reason) => {
            if !record.state.is_connecting_or_connected() {
                return None;
            }
            record.state = S::Disconnected;
            record.pairing_challenge = None;
            record.reconnect_count = record.reconnect_count.saturating_add(1);

            let mut effects = vec![Effect::NotifyDisconnected(reason)];
            let allowed = policy
                .max_reconnects
                .map_or(true, |max| record.reconnect_count <= max);
            if allowed {
                effects.push(Effect::ScheduleReconnect(policy.retry_delay));
            } else {
                effects.push(Effect::NotifyWarning(format!(
                    "Gave up reconnecting after {} attempts. Use /login to reconnect manually.",
                    record.reconnect_count - 1
                )));
                record.reconnect_count = 0;
            }
            Some(effects)
        }

        Input::RetryDue => match record.state {
            S::Idle => Some(vec![Effect::StartInitialization]),
            _ => None,
        },

        Input::ReconnectDue => match record.state {
            S::Disconnected => {
                record.state = S::Reconnecting;
                Some(vec![Effect::ReleaseResources, Effect::StartInitialization])
            }
            _ => None,
        },
    }
}

fn init_failed(
    record: &mut ConnectionRecord,
    policy: &RetryPolicy,
    cause: String,
) -> Option<Vec<Effect>> {
    use ConnectionState as S;

    if !matches!(
        record.state,
        S::Initializing | S::AwaitingPairing | S::Authenticated
    ) {
        return None;
    }

    record.state = S::Idle;
    record.pairing_challenge = None;
    record.retry_count = record.retry_count.saturating_add(1);

    let mut effects = vec![Effect::ReleaseResources];
    if record.retry_count <= policy.max_init_retries {
        effects.push(Effect::ScheduleRetry(policy.retry_delay));
    } else {
        effects.push(Effect::NotifyWarning(format!(
            "WhatsApp client failed to start after {} attempts ({cause}). The relay keeps running; use /login to retry.",
            record.retry_count
        )));
        // Fresh budget for the next manual attempt.
        record.retry_count = 0;
    }
    Some(effects)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            retry_delay: Duration::from_secs(5),
            max_init_retries: 2,
            max_reconnects: None,
        }
    }

    fn rec(state: ConnectionState) -> ConnectionRecord {
        ConnectionRecord {
            state,
            ..Default::default()
        }
    }

    #[test]
    fn pairing_then_ready_path() {
        let p = policy();
        let mut r = rec(ConnectionState::Idle);

        assert_eq!(transition(&mut r, Input::InitRequested, &p), Some(vec![]));
        assert_eq!(r.state, ConnectionState::Initializing);

        let fx = transition(&mut r, Input::PairingChallenge("qr-1".into()), &p).unwrap();
        assert_eq!(fx, vec![Effect::ShowPairingChallenge("qr-1".into())]);
        assert_eq!(r.pairing_challenge.as_deref(), Some("qr-1"));

        // A fresh challenge overwrites the previous one.
        transition(&mut r, Input::PairingChallenge("qr-2".into()), &p).unwrap();
        assert_eq!(r.state, ConnectionState::AwaitingPairing);
        assert_eq!(r.pairing_challenge.as_deref(), Some("qr-2"));

        assert_eq!(transition(&mut r, Input::Authenticated, &p), Some(vec![]));
        assert_eq!(r.state, ConnectionState::Authenticated);
        assert_eq!(r.pairing_challenge, None);

        let fx = transition(&mut r, Input::Ready, &p).unwrap();
        assert_eq!(fx, vec![Effect::PersistSession, Effect::NotifyReady]);
        assert_eq!(r.state, ConnectionState::Ready);
    }

    #[test]
    fn resumed_session_goes_straight_to_ready() {
        let p = policy();
        let mut r = rec(ConnectionState::Initializing);
        r.retry_count = 2;
        transition(&mut r, Input::Ready, &p).unwrap();
        assert_eq!(r.state, ConnectionState::Ready);
        assert_eq!(r.retry_count, 0);
    }

    #[test]
    fn disconnect_schedules_fixed_delay_reconnect() {
        let p = policy();
        let mut r = rec(ConnectionState::Ready);

        let fx = transition(&mut r, Input::Disconnected("LOGOUT".into()), &p).unwrap();
        assert_eq!(
            fx,
            vec![
                Effect::NotifyDisconnected("LOGOUT".into()),
                Effect::ScheduleReconnect(Duration::from_secs(5)),
            ]
        );
        assert_eq!(r.state, ConnectionState::Disconnected);

        let fx = transition(&mut r, Input::ReconnectDue, &p).unwrap();
        assert_eq!(
            fx,
            vec![Effect::ReleaseResources, Effect::StartInitialization]
        );
        assert_eq!(r.state, ConnectionState::Reconnecting);

        transition(&mut r, Input::InitRequested, &p).unwrap();
        assert_eq!(r.state, ConnectionState::Initializing);
    }

    #[test]
    fn disconnect_while_idle_is_ignored() {
        let p = policy();
        let mut r = rec(ConnectionState::Idle);
        assert_eq!(transition(&mut r, Input::Disconnected("x".into()), &p), None);
        assert_eq!(r.state, ConnectionState::Idle);
    }

    #[test]
    fn bounded_reconnects_give_up_with_warning() {
        let p = RetryPolicy {
            max_reconnects: Some(1),
            ..policy()
        };
        let mut r = rec(ConnectionState::Ready);

        let fx = transition(&mut r, Input::Disconnected("a".into()), &p).unwrap();
        assert!(fx.contains(&Effect::ScheduleReconnect(p.retry_delay)));
        transition(&mut r, Input::ReconnectDue, &p).unwrap();
        transition(&mut r, Input::InitRequested, &p).unwrap();

        let fx = transition(&mut r, Input::Disconnected("b".into()), &p).unwrap();
        assert!(matches!(fx.last(), Some(Effect::NotifyWarning(_))));
        assert!(!fx.iter().any(|e| matches!(e, Effect::ScheduleReconnect(_))));
    }

    #[test]
    fn init_failures_retry_then_warn_and_reset() {
        let p = policy();
        let mut r = rec(ConnectionState::Idle);

        for attempt in 1..=2 {
            transition(&mut r, Input::InitRequested, &p).unwrap();
            let fx = transition(&mut r, Input::InitFailed("boom".into()), &p).unwrap();
            assert_eq!(
                fx,
                vec![
                    Effect::ReleaseResources,
                    Effect::ScheduleRetry(Duration::from_secs(5))
                ]
            );
            assert_eq!(r.retry_count, attempt);
            assert_eq!(r.state, ConnectionState::Idle);
            assert_eq!(
                transition(&mut r, Input::RetryDue, &p),
                Some(vec![Effect::StartInitialization])
            );
        }

        transition(&mut r, Input::InitRequested, &p).unwrap();
        let fx = transition(&mut r, Input::InitTimedOut(Duration::from_secs(1)), &p).unwrap();
        assert_eq!(fx[0], Effect::ReleaseResources);
        assert!(matches!(&fx[1], Effect::NotifyWarning(m) if m.contains("timed out")));
        assert_eq!(r.retry_count, 0);
        assert_eq!(r.state, ConnectionState::Idle);
    }

    #[test]
    fn destroy_is_terminal_and_idempotent() {
        let p = policy();
        let mut r = rec(ConnectionState::AwaitingPairing);
        r.pairing_challenge = Some("qr".into());

        assert_eq!(
            transition(&mut r, Input::Destroy, &p),
            Some(vec![Effect::ReleaseResources])
        );
        assert_eq!(r.state, ConnectionState::Destroyed);
        assert_eq!(r.pairing_challenge, None);

        assert_eq!(transition(&mut r, Input::Destroy, &p), Some(vec![]));
        assert_eq!(transition(&mut r, Input::InitRequested, &p), None);
        assert_eq!(transition(&mut r, Input::Ready, &p), None);
    }

    #[test]
    fn retry_due_is_dropped_if_someone_already_started() {
        let p = policy();
        let mut r = rec(ConnectionState::Initializing);
        assert_eq!(transition(&mut r, Input::RetryDue, &p), None);
    }
}
