//! End-to-end registration and verification flow against in-memory backends.

use anyhow::Result;
use async_trait::async_trait;
use enskribi::api::email::{EmailDispatcher, EmailJob};
use enskribi::api::handlers::auth::{
    CredentialStore, MemoryCredentialStore, MemoryRateLimiter, PasswordPolicy, RegisterError,
    RegistrationService, TokenManager, VerificationOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

struct RecordingDispatcher {
    jobs: Mutex<Vec<EmailJob>>,
}

impl RecordingDispatcher {
    fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
        }
    }

    async fn jobs(&self) -> Vec<EmailJob> {
        self.jobs.lock().await.clone()
    }
}

#[async_trait]
impl EmailDispatcher for RecordingDispatcher {
    async fn enqueue(&self, job: EmailJob) -> Result<()> {
        self.jobs.lock().await.push(job);
        Ok(())
    }
}

struct Harness {
    store: Arc<MemoryCredentialStore>,
    dispatcher: Arc<RecordingDispatcher>,
    service: RegistrationService,
    tokens: TokenManager,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryCredentialStore::new());
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let tokens = TokenManager::new(store.clone(), 86_400);
    let service = RegistrationService::new(
        store.clone(),
        tokens.clone(),
        Arc::new(MemoryRateLimiter::new(5, Duration::from_secs(600))),
        dispatcher.clone(),
        PasswordPolicy::default(),
        "http://localhost:8080".to_string(),
    );
    Harness {
        store,
        dispatcher,
        service,
        tokens,
    }
}

fn token_from_email(job: &EmailJob) -> String {
    let marker = "/auth/verify?token=";
    let start = job.body_html.find(marker).expect("verify link in email") + marker.len();
    job.body_html[start..]
        .chars()
        .take_while(|c| *c != '"')
        .collect()
}

#[tokio::test]
async fn successful_registration_creates_exactly_one_of_everything() {
    let h = harness();

    let registered = h
        .service
        .register("Alice@Example.com", "Str0ng-pass", Some("Alice"), None)
        .await
        .unwrap();
    assert!(registered.requires_verification);

    let user = h
        .store
        .find_user_by_email("alice@example.com")
        .await
        .unwrap()
        .expect("user persisted under normalized email");
    assert_eq!(user.id, registered.id);
    assert!(!user.is_verified());

    let jobs = h.dispatcher.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].to_email, "alice@example.com");
    assert_eq!(jobs[0].subject, "Verify your email address");
}

#[tokio::test]
async fn duplicate_registration_is_a_conflict() {
    let h = harness();

    h.service
        .register("bob@example.com", "Str0ng-pass", None, Some("10.0.0.1"))
        .await
        .unwrap();
    let err = h
        .service
        .register("BOB@example.com", "Other-Str0ng", None, Some("10.0.0.2"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegisterError::Conflict));

    // The first account and its pending verification are untouched.
    let user = h
        .store
        .find_user_by_email("bob@example.com")
        .await
        .unwrap()
        .unwrap();
    assert!(!user.is_verified());
    assert_eq!(h.dispatcher.jobs().await.len(), 1);
}

#[tokio::test]
async fn policy_failures_report_every_rule() {
    let h = harness();

    let err = h
        .service
        .register("carol@example.com", "abc", None, None)
        .await
        .unwrap_err();
    match err {
        RegisterError::PolicyViolation { violations } => {
            assert_eq!(violations.len(), 4);
            assert!(violations[0].contains("at least 8 characters"));
        }
        other => panic!("expected PolicyViolation, got {other:?}"),
    }
    assert!(h.dispatcher.jobs().await.is_empty());
}

#[tokio::test]
async fn sixth_attempt_from_one_client_is_rate_limited() {
    let h = harness();

    for i in 0..5 {
        h.service
            .register(
                &format!("user{i}@example.com"),
                "Str0ng-pass",
                None,
                Some("203.0.113.9"),
            )
            .await
            .unwrap();
    }

    let err = h
        .service
        .register(
            "user5@example.com",
            "Str0ng-pass",
            None,
            Some("203.0.113.9"),
        )
        .await
        .unwrap_err();
    match err {
        RegisterError::RateLimited {
            retry_after_seconds,
        } => assert!(retry_after_seconds >= 1),
        other => panic!("expected RateLimited, got {other:?}"),
    }

    // A different client still has budget.
    h.service
        .register(
            "user5@example.com",
            "Str0ng-pass",
            None,
            Some("203.0.113.10"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn emailed_token_verifies_once() {
    let h = harness();

    h.service
        .register("dave@example.com", "Str0ng-pass", Some("Dave"), None)
        .await
        .unwrap();

    let jobs = h.dispatcher.jobs().await;
    let token = token_from_email(&jobs[0]);

    assert_eq!(
        h.tokens.verify(&token).await.unwrap(),
        VerificationOutcome::Success
    );
    let user = h
        .store
        .find_user_by_email("dave@example.com")
        .await
        .unwrap()
        .unwrap();
    assert!(user.is_verified());

    // Replay finds nothing: the token was consumed.
    assert_eq!(
        h.tokens.verify(&token).await.unwrap(),
        VerificationOutcome::NotFound
    );
}

#[tokio::test]
async fn reissuing_invalidates_the_emailed_token() {
    let h = harness();

    let registered = h
        .service
        .register("erin@example.com", "Str0ng-pass", None, None)
        .await
        .unwrap();

    let jobs = h.dispatcher.jobs().await;
    let emailed = token_from_email(&jobs[0]);

    let reissued = h.tokens.issue(registered.id).await.unwrap();

    assert_eq!(
        h.tokens.verify(&emailed).await.unwrap(),
        VerificationOutcome::NotFound
    );
    assert_eq!(
        h.tokens.verify(&reissued.token).await.unwrap(),
        VerificationOutcome::Success
    );
}
