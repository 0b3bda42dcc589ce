//! Resolver contract tests: absence vs failure, memoization, single-flight, isolation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use session_locals::identity::{
    Credential, IdentityProvider, Principal, ProviderError, RequestContext, ResolveError, ResolverState, Session,
};

/// Scripted provider: token -> outcome, counting every lookup.
struct ScriptedProvider {
    outcomes: HashMap<String, Result<Session, ProviderError>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(delay: Duration) -> Self {
        Self { outcomes: HashMap::new(), delay, calls: AtomicUsize::new(0) }
    }

    fn with(mut self, token: &str, outcome: Result<Session, ProviderError>) -> Self {
        self.outcomes.insert(token.to_string(), outcome);
        self
    }

    fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl IdentityProvider for ScriptedProvider {
    async fn lookup(&self, credential: &Credential) -> Result<Session, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.outcomes
            .get(credential.token())
            .cloned()
            .unwrap_or(Err(ProviderError::InvalidCredential))
    }

    fn name(&self) -> &'static str { "scripted" }
}

fn session(user: &str, token: &str, expires_in: chrono::Duration) -> Session {
    let now = Utc::now();
    Session {
        session_id: format!("sid-{}", user),
        token: token.to_string(),
        principal: Principal::new(user),
        issued_at: now,
        expires_at: now + expires_in,
    }
}

fn fixture() -> Arc<ScriptedProvider> {
    Arc::new(
        ScriptedProvider::new(Duration::from_millis(20))
            .with("T1", Ok(session("u1", "T1", chrono::Duration::hours(1))))
            .with("T2", Ok(session("u2", "T2", chrono::Duration::seconds(-30))))
            .with("T3", Err(ProviderError::Expired))
            .with("DOWN", Err(ProviderError::Unavailable("connection refused".into()))),
    )
}

fn ctx(p: &Arc<ScriptedProvider>, cred: Option<Credential>) -> RequestContext {
    RequestContext::new(p.clone(), cred)
}

#[tokio::test]
async fn no_credential_resolves_to_absence_without_provider_call() {
    let p = fixture();
    let c = ctx(&p, None);
    assert_eq!(c.locals().get_session.resolve().await, Ok(None));
    assert_eq!(p.calls(), 0);
}

#[tokio::test]
async fn valid_token_yields_provider_session() {
    let p = fixture();
    let c = ctx(&p, Some(Credential::Cookie("T1".into())));
    let got = c.locals().get_session.resolve().await.unwrap().expect("session");
    assert_eq!(got.principal.user_id, "u1");
    assert_eq!(got.session_id, "sid-u1");
    assert_eq!(*got, p.outcomes["T1"].clone().unwrap());
}

#[tokio::test]
async fn expired_session_from_provider_is_absence() {
    let p = fixture();
    let c = ctx(&p, Some(Credential::Bearer("T2".into())));
    assert_eq!(c.locals().get_session.resolve().await, Ok(None));
}

#[tokio::test]
async fn invalid_or_expired_credentials_are_absence_not_errors() {
    let p = fixture();
    for tok in ["T3", "garbage"] {
        let c = ctx(&p, Some(Credential::Bearer(tok.into())));
        assert_eq!(c.locals().get_session.resolve().await, Ok(None), "token {}", tok);
    }
}

#[tokio::test]
async fn provider_outage_is_a_failed_resolution() {
    let p = fixture();
    let c = ctx(&p, Some(Credential::Bearer("DOWN".into())));
    let res = c.locals().get_session.resolve().await;
    assert_eq!(res, Err(ResolveError::ProviderUnavailable("connection refused".into())));
    // the failure is terminal for this request as well
    assert_eq!(c.locals().get_session.resolve().await, res);
    assert_eq!(p.calls(), 1);
}

#[tokio::test]
async fn sequential_calls_are_memoized() {
    let p = fixture();
    let c = ctx(&p, Some(Credential::Cookie("T1".into())));
    let locals = c.locals();
    let a = locals.get_session.resolve().await.unwrap().unwrap();
    let b = locals.session().await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(p.calls(), 1);
}

#[tokio::test]
async fn concurrent_calls_share_one_lookup() {
    let p = fixture();
    let c = ctx(&p, Some(Credential::Cookie("T1".into())));
    let middleware_view = c.locals();
    let handler_view = c.locals();

    let (a, b) = tokio::join!(middleware_view.get_session.resolve(), handler_view.get_session.resolve());
    assert_eq!(a, b);
    assert_eq!(p.calls(), 1);

    let many = futures::future::join_all((0..16).map(|_| {
        let l = c.locals();
        async move { l.get_session.resolve().await }
    }))
    .await;
    assert!(many.iter().all(|r| r == &a));
    assert_eq!(p.calls(), 1);
}

#[tokio::test]
async fn concurrent_calls_across_tasks_share_one_lookup() {
    let p = fixture();
    let c = ctx(&p, Some(Credential::Cookie("T1".into())));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let l = c.locals();
            tokio::spawn(async move { l.get_session.resolve().await })
        })
        .collect();
    for h in handles {
        let got = h.await.unwrap().unwrap().unwrap();
        assert_eq!(got.principal.user_id, "u1");
    }
    assert_eq!(p.calls(), 1);
}

#[tokio::test]
async fn identical_credentials_in_two_requests_are_isolated() {
    let p = fixture();
    let a = ctx(&p, Some(Credential::Cookie("T1".into())));
    let b = ctx(&p, Some(Credential::Cookie("T1".into())));
    let ra = a.locals().get_session.resolve().await.unwrap().unwrap();
    assert_eq!(b.locals().get_session.state(), ResolverState::Unresolved);
    let rb = b.locals().get_session.resolve().await.unwrap().unwrap();
    assert!(!Arc::ptr_eq(&ra, &rb));
    assert_eq!(p.calls(), 2);
    assert_ne!(a.request_id, b.request_id);
}

#[tokio::test]
async fn state_machine_progresses_once() {
    let p = fixture();
    let c = ctx(&p, Some(Credential::Cookie("T1".into())));
    let locals = c.locals();
    assert_eq!(locals.get_session.state(), ResolverState::Unresolved);

    let pending = {
        let l = locals.clone();
        tokio::spawn(async move { l.get_session.resolve().await })
    };
    // give the spawned task a chance to start the lookup; the provider sleeps 20ms
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(locals.get_session.state(), ResolverState::Resolving);

    pending.await.unwrap().unwrap();
    assert_eq!(locals.get_session.state(), ResolverState::Resolved);
    locals.get_session.resolve().await.unwrap();
    assert_eq!(locals.get_session.state(), ResolverState::Resolved);
}

#[tokio::test]
async fn escaped_locals_fail_after_teardown() {
    let p = fixture();
    let escaped = {
        let c = ctx(&p, Some(Credential::Cookie("T1".into())));
        c.locals()
    };
    assert!(escaped.get_session.is_closed());
    assert_eq!(escaped.get_session.resolve().await, Err(ResolveError::ContextClosed));
    assert_eq!(p.calls(), 0);
}

#[tokio::test]
async fn explicit_close_blocks_new_resolutions() {
    let p = fixture();
    let c = ctx(&p, Some(Credential::Cookie("T1".into())));
    let locals = c.locals();
    locals.get_session.resolve().await.unwrap();
    c.close();
    assert_eq!(locals.get_session.resolve().await, Err(ResolveError::ContextClosed));
    assert_eq!(p.calls(), 1);
}
