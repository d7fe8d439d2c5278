//! Module owning the anonymous identity of the node and the freshness of its access token.
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::path::{NodePath, PathError};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    #[error("anonymous sign-up failed: {0}")]
    SignupFailed(String),
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

/// Credentials handed out by the identity provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Grant {
    pub uid: String,
    pub id_token: String,
    pub refresh_token: String,
    /// Lifetime of `id_token` in seconds.
    pub expires_in_secs: i64,
}

/// Remote identity provider issuing anonymous identities.
pub trait IdentityProvider {
    /// Creates a new anonymous identity, giving up after `timeout`.
    fn sign_up_anonymous(&self, timeout: Duration) -> Result<Grant, AuthError>;
    /// Exchanges a refresh token for a fresh access token of the same identity.
    fn refresh(&self, refresh_token: &str) -> Result<Grant, AuthError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Parameters for the identity lifecycle.
pub struct AuthParameters
{
    /// Upper bound for the initial sign-up in milliseconds.
    #[serde(default = "default_bootstrap_timeout_ms")]
    pub bootstrap_timeout_ms: u64,
    /// Pause between two sign-up attempts while bootstrapping.
    #[serde(default = "default_bootstrap_poll_ms")]
    pub bootstrap_poll_ms: u64,
    /// The token counts as expired this many seconds before its declared expiry.
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: i64,
    /// Identity path segment used when no uid could be obtained.
    #[serde(default = "default_fallback_identity")]
    pub fallback_identity: String,
}

fn default_bootstrap_timeout_ms() -> u64 { 10_000 }
fn default_bootstrap_poll_ms() -> u64 { 500 }
fn default_refresh_margin_secs() -> i64 { 300 }
fn default_fallback_identity() -> String { String::from("fallback") }

impl Default for AuthParameters {
    fn default() -> Self {
        AuthParameters {
            bootstrap_timeout_ms: default_bootstrap_timeout_ms(),
            bootstrap_poll_ms: default_bootstrap_poll_ms(),
            refresh_margin_secs: default_refresh_margin_secs(),
            fallback_identity: default_fallback_identity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Expired,
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Identity of the node. `uid` is set at most once.
pub struct Identity {
    pub uid: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
/// What a freshness check did.
pub enum RefreshOutcome {
    /// No identity, nothing to refresh.
    NoIdentity,
    Fresh,
    Refreshed,
}

struct Tokens {
    id_token: String,
    refresh_token: String,
}

pub struct AuthSession {
    provider: Box<dyn IdentityProvider>,
    params: AuthParameters,
    state: AuthState,
    identity: Identity,
    tokens: Option<Tokens>,
    node: NodePath,
    bootstrap_attempted: bool,
}

impl AuthSession {
    /// Creates an unauthenticated session writing under the fallback identity.
    ///
    /// # Errors
    ///
    /// * `PathError` - the fallback identity is not a valid path segment.
    pub fn new(provider: Box<dyn IdentityProvider>, params: AuthParameters) -> Result<Self, PathError> {
        let node = NodePath::new(&params.fallback_identity)?;
        Ok(AuthSession {
            provider,
            params,
            state: AuthState::Unauthenticated,
            identity: Identity::default(),
            tokens: None,
            node,
            bootstrap_attempted: false,
        })
    }

    #[cfg(test)]
    pub fn state(&self) -> AuthState {
        self.state
    }

    #[cfg(test)]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Subtree the node writes to: its uid, or the fallback identity.
    pub fn node_path(&self) -> &NodePath {
        &self.node
    }

    /// Current access token, possibly expired.
    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|tokens| tokens.id_token.as_str())
    }

    /// Signs up anonymously, retrying until the bootstrap timeout elapses.
    ///
    /// Each attempt is bounded by the time left, so the whole bootstrap never outlasts the
    /// timeout. Only the first call does anything. On failure the session stays unauthenticated for good
    /// and keeps writing under the fallback identity.
    pub fn bootstrap(&mut self, clock: &dyn Clock) -> Result<(), AuthError> {
        if self.bootstrap_attempted {
            return match self.identity.uid {
                Some(_) => Ok(()),
                None => Err(AuthError::SignupFailed(String::from("bootstrap already failed"))),
            };
        }
        self.bootstrap_attempted = true;
        self.state = AuthState::Authenticating;

        let timeout = Duration::from_millis(self.params.bootstrap_timeout_ms);
        let poll = Duration::from_millis(self.params.bootstrap_poll_ms.max(1));
        let deadline = clock.monotonic() + timeout;

        let error = loop {
            let remaining = deadline.checked_sub(clock.monotonic()).unwrap_or_default();
            let attempt = self.provider.sign_up_anonymous(remaining).and_then(|grant| {
                NodePath::new(&grant.uid)
                    .map(|node| (grant, node))
                    .map_err(|err| AuthError::SignupFailed(format!("uid is not usable as path: {}", err)))
            });
            let last_error = match attempt {
                Ok((grant, node)) => {
                    log::info!(target: "gianode::auth", "Signed up anonymously as \'{}\'", grant.uid);
                    self.node = node;
                    self.install(grant, clock.utc_now());
                    return Ok(());
                }
                Err(err) => err,
            };
            log::debug!(target: "gianode::auth", "Sign-up attempt failed: \'{}\'", last_error);

            let remaining = match deadline.checked_sub(clock.monotonic()) {
                Some(remaining) if remaining > Duration::from_secs(0) => remaining,
                _ => break last_error,
            };
            clock.sleep(poll.min(remaining));
        };

        self.state = AuthState::Unauthenticated;
        log::warn!(target: "gianode::auth", "No identity after {:?}, writing under \'{}\': \'{}\'",
                   timeout, self.params.fallback_identity, error);
        Err(error)
    }

    /// Refreshes the access token if it is expired.
    ///
    /// # Errors
    ///
    /// * `RefreshFailed` - the provider refused or returned another uid. The session stays
    ///     `Expired` and the next call tries again.
    pub fn check_and_refresh(&mut self, now: DateTime<Utc>) -> Result<RefreshOutcome, AuthError> {
        match self.state {
            AuthState::Unauthenticated | AuthState::Authenticating => return Ok(RefreshOutcome::NoIdentity),
            AuthState::Authenticated if !self.is_expired(now) => return Ok(RefreshOutcome::Fresh),
            AuthState::Authenticated => {
                log::debug!(target: "gianode::auth", "Access token expired");
                self.state = AuthState::Expired;
            }
            AuthState::Expired => {}
        }

        let refresh_token = match &self.tokens {
            Some(tokens) => tokens.refresh_token.clone(),
            None => return Err(AuthError::RefreshFailed(String::from("no refresh token"))),
        };
        let grant = self.provider.refresh(&refresh_token)?;
        if self.identity.uid.as_deref() != Some(grant.uid.as_str()) {
            return Err(AuthError::RefreshFailed(format!("provider returned uid \'{}\'", grant.uid)));
        }
        self.install(grant, now);
        log::info!(target: "gianode::auth", "Access token refreshed");
        Ok(RefreshOutcome::Refreshed)
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.identity.token_expires_at {
            Some(expires_at) => now >= expires_at - chrono::Duration::seconds(self.params.refresh_margin_secs),
            None => true,
        }
    }

    fn install(&mut self, grant: Grant, now: DateTime<Utc>) {
        if self.identity.uid.is_none() {
            self.identity.uid = Some(grant.uid);
        }
        self.identity.token_expires_at = Some(now + chrono::Duration::seconds(grant.expires_in_secs));
        self.tokens = Some(Tokens { id_token: grant.id_token, refresh_token: grant.refresh_token });
        self.state = AuthState::Authenticated;
    }
}

#[cfg(test)]
pub mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;
    use crate::clock::ManualClock;

    #[derive(Default)]
    pub struct ProviderState {
        pub signups: VecDeque<Result<Grant, AuthError>>,
        pub refreshes: VecDeque<Result<Grant, AuthError>>,
        pub signup_calls: usize,
        pub signup_timeouts: Vec<Duration>,
        /// Time a sign-up takes, cut short by the timeout it is given.
        pub signup_latency: Option<(Rc<ManualClock>, Duration)>,
        pub refresh_tokens: Vec<String>,
    }

    /// Provider answering from queues. An empty queue answers with a failure.
    pub struct ScriptedProvider(pub Rc<RefCell<ProviderState>>);

    impl ScriptedProvider {
        pub fn new() -> (Self, Rc<RefCell<ProviderState>>) {
            let state = Rc::new(RefCell::new(ProviderState::default()));
            (ScriptedProvider(Rc::clone(&state)), state)
        }
    }

    impl IdentityProvider for ScriptedProvider {
        fn sign_up_anonymous(&self, timeout: Duration) -> Result<Grant, AuthError> {
            let mut state = self.0.borrow_mut();
            state.signup_calls += 1;
            state.signup_timeouts.push(timeout);
            if let Some((clock, latency)) = &state.signup_latency {
                clock.advance((*latency).min(timeout));
                if *latency > timeout {
                    return Err(AuthError::SignupFailed(String::from("timed out")));
                }
            }
            state.signups.pop_front()
                .unwrap_or_else(|| Err(AuthError::SignupFailed(String::from("unreachable"))))
        }

        fn refresh(&self, refresh_token: &str) -> Result<Grant, AuthError> {
            let mut state = self.0.borrow_mut();
            state.refresh_tokens.push(refresh_token.to_string());
            state.refreshes.pop_front()
                .unwrap_or_else(|| Err(AuthError::RefreshFailed(String::from("unreachable"))))
        }
    }

    pub fn grant(uid: &str, generation: u32) -> Grant {
        Grant {
            uid: uid.to_string(),
            id_token: format!("id-{}", generation),
            refresh_token: format!("refresh-{}", generation),
            expires_in_secs: 3600,
        }
    }

    fn session(provider: ScriptedProvider) -> AuthSession {
        AuthSession::new(Box::new(provider), AuthParameters::default()).unwrap()
    }

    #[test]
    fn bootstrap_success_fixes_uid() {
        let (provider, state) = ScriptedProvider::new();
        state.borrow_mut().signups.push_back(Ok(grant("node-a", 1)));
        let clock = ManualClock::new();
        let mut session = session(provider);
        assert_eq!(session.node_path().identity(), "fallback");

        session.bootstrap(&clock).unwrap();

        assert_eq!(session.state(), AuthState::Authenticated);
        assert_eq!(session.identity().uid.as_deref(), Some("node-a"));
        assert_eq!(session.identity().token_expires_at, Some(clock.utc_now() + chrono::Duration::seconds(3600)));
        assert_eq!(session.node_path().identity(), "node-a");
        assert_eq!(session.access_token(), Some("id-1"));
    }

    #[test]
    fn bootstrap_retries_until_success() {
        let (provider, state) = ScriptedProvider::new();
        {
            let mut state = state.borrow_mut();
            state.signups.push_back(Err(AuthError::SignupFailed("timeout".to_string())));
            state.signups.push_back(Err(AuthError::SignupFailed("timeout".to_string())));
            state.signups.push_back(Ok(grant("node-b", 1)));
        }
        let clock = ManualClock::new();
        let mut session = session(provider);

        session.bootstrap(&clock).unwrap();

        assert_eq!(state.borrow().signup_calls, 3);
        assert_eq!(clock.monotonic(), Duration::from_millis(1000));
        assert_eq!(session.identity().uid.as_deref(), Some("node-b"));
    }

    #[test]
    fn bootstrap_gives_up_after_timeout() {
        let (provider, state) = ScriptedProvider::new();
        let clock = ManualClock::new();
        let mut session = session(provider);

        let result = session.bootstrap(&clock);

        assert_eq!(result, Err(AuthError::SignupFailed("unreachable".to_string())));
        assert_eq!(clock.monotonic(), Duration::from_secs(10));
        assert_eq!(state.borrow().signup_calls, 21);
        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert_eq!(session.identity(), &Identity::default());
        assert_eq!(session.node_path().identity(), "fallback");
        assert_eq!(session.access_token(), None);
    }

    #[test]
    fn slow_signup_is_cut_at_the_deadline() {
        let (provider, state) = ScriptedProvider::new();
        let clock = Rc::new(ManualClock::new());
        state.borrow_mut().signup_latency = Some((Rc::clone(&clock), Duration::from_secs(9)));
        let mut session = session(provider);

        let result = session.bootstrap(clock.as_ref());

        assert_eq!(result, Err(AuthError::SignupFailed("timed out".to_string())));
        assert!(clock.monotonic() <= Duration::from_secs(10));
        let state = state.borrow();
        assert_eq!(state.signup_calls, 2);
        assert_eq!(state.signup_timeouts, vec![Duration::from_secs(10), Duration::from_millis(500)]);
        assert_eq!(session.node_path().identity(), "fallback");
    }

    #[test]
    fn failed_bootstrap_is_not_repeated() {
        let (provider, state) = ScriptedProvider::new();
        let clock = ManualClock::new();
        let mut session = session(provider);
        session.bootstrap(&clock).unwrap_err();
        state.borrow_mut().signups.push_back(Ok(grant("late", 1)));

        assert!(session.bootstrap(&clock).is_err());
        assert_eq!(session.check_and_refresh(clock.utc_now()), Ok(RefreshOutcome::NoIdentity));
        assert_eq!(session.identity().uid, None);
        assert_eq!(state.borrow().signups.len(), 1);
    }

    #[test]
    fn unusable_uid_counts_as_failed_signup() {
        let (provider, state) = ScriptedProvider::new();
        state.borrow_mut().signups.push_back(Ok(grant("bad/uid", 1)));
        let params = AuthParameters { bootstrap_timeout_ms: 0, ..AuthParameters::default() };
        let mut session = AuthSession::new(Box::new(provider), params).unwrap();

        match session.bootstrap(&ManualClock::new()) {
            Err(AuthError::SignupFailed(reason)) => assert!(reason.starts_with("uid is not usable")),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(session.identity().uid, None);
    }

    #[test]
    fn invalid_fallback_identity_is_rejected() {
        let (provider, _) = ScriptedProvider::new();
        let params = AuthParameters { fallback_identity: "a.b".to_string(), ..AuthParameters::default() };
        assert!(AuthSession::new(Box::new(provider), params).is_err());
    }

    #[test]
    fn fresh_token_is_kept() {
        let (provider, state) = ScriptedProvider::new();
        state.borrow_mut().signups.push_back(Ok(grant("node-a", 1)));
        let clock = ManualClock::new();
        let mut session = session(provider);
        session.bootstrap(&clock).unwrap();

        clock.advance(Duration::from_secs(3000));
        assert_eq!(session.check_and_refresh(clock.utc_now()), Ok(RefreshOutcome::Fresh));
        assert!(state.borrow().refresh_tokens.is_empty());
    }

    #[test]
    fn expired_token_is_refreshed_under_same_uid() {
        let (provider, state) = ScriptedProvider::new();
        state.borrow_mut().signups.push_back(Ok(grant("node-a", 1)));
        state.borrow_mut().refreshes.push_back(Ok(grant("node-a", 2)));
        let clock = ManualClock::new();
        let mut session = session(provider);
        session.bootstrap(&clock).unwrap();

        clock.advance(Duration::from_secs(3300));
        assert_eq!(session.check_and_refresh(clock.utc_now()), Ok(RefreshOutcome::Refreshed));

        assert_eq!(state.borrow().refresh_tokens, vec!["refresh-1".to_string()]);
        assert_eq!(session.state(), AuthState::Authenticated);
        assert_eq!(session.access_token(), Some("id-2"));
        assert_eq!(session.identity().uid.as_deref(), Some("node-a"));
        assert_eq!(session.identity().token_expires_at, Some(clock.utc_now() + chrono::Duration::seconds(3600)));
    }

    #[test]
    fn refresh_failure_is_retried_next_check() {
        let (provider, state) = ScriptedProvider::new();
        state.borrow_mut().signups.push_back(Ok(grant("node-a", 1)));
        let clock = ManualClock::new();
        let mut session = session(provider);
        session.bootstrap(&clock).unwrap();
        clock.advance(Duration::from_secs(4000));

        assert!(session.check_and_refresh(clock.utc_now()).is_err());
        assert_eq!(session.state(), AuthState::Expired);
        assert_eq!(session.access_token(), Some("id-1"));

        state.borrow_mut().refreshes.push_back(Ok(grant("node-a", 2)));
        assert_eq!(session.check_and_refresh(clock.utc_now()), Ok(RefreshOutcome::Refreshed));
        assert_eq!(state.borrow().refresh_tokens.len(), 2);
        assert_eq!(session.state(), AuthState::Authenticated);
    }

    #[test]
    fn refresh_with_other_uid_is_rejected() {
        let (provider, state) = ScriptedProvider::new();
        state.borrow_mut().signups.push_back(Ok(grant("node-a", 1)));
        state.borrow_mut().refreshes.push_back(Ok(grant("node-z", 2)));
        let clock = ManualClock::new();
        let mut session = session(provider);
        session.bootstrap(&clock).unwrap();
        clock.advance(Duration::from_secs(3600));

        assert!(matches!(session.check_and_refresh(clock.utc_now()), Err(AuthError::RefreshFailed(_))));
        assert_eq!(session.identity().uid.as_deref(), Some("node-a"));
        assert_eq!(session.node_path().identity(), "node-a");
        assert_eq!(session.access_token(), Some("id-1"));
    }
}
