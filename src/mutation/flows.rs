//! Ready-made mutations for the login and lead-enrichment flows.
//!
//! Both return a builder so callers can still attach listeners, hooks or a
//! test clock before calling `build()`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{GatekeepConfig, ENRICHMENT_POLICY, LOGIN_POLICY};

use super::executor::{ThrottledMutation, ThrottledMutationBuilder};
use super::remote::RemoteCall;

/// Login form payload.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Login submission, rate limited per email.
///
/// Uses the `login` policy: failed attempts count against the email and a
/// successful login clears its counter.
pub fn login_mutation<R>(
    config: &GatekeepConfig,
    remote: Arc<dyn RemoteCall<Credentials, R>>,
) -> ThrottledMutationBuilder<Credentials, R>
where
    R: Send + 'static,
{
    ThrottledMutation::builder(LOGIN_POLICY, remote)
        .policy(config.policy(LOGIN_POLICY))
        .key_fn(|_, credentials: &Credentials| Some(credentials.email.clone()))
        .validator(|credentials: &Credentials| {
            if !credentials.email.contains('@') {
                return Err("a valid email address is required".to_string());
            }
            if credentials.password.is_empty() {
                return Err("password is required".to_string());
            }
            Ok(())
        })
}

/// Lead enrichment, rate limited per lead (the operation id).
pub fn enrichment_mutation<T, R>(
    config: &GatekeepConfig,
    remote: Arc<dyn RemoteCall<T, R>>,
) -> ThrottledMutationBuilder<T, R>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    ThrottledMutation::builder(ENRICHMENT_POLICY, remote).policy(config.policy(ENRICHMENT_POLICY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::mutation::{remote_fn, ErrorKind, MutationError, RemoteError};
    use std::time::Duration;

    fn auth_backend() -> Arc<dyn RemoteCall<Credentials, String>> {
        Arc::new(remote_fn(|credentials: Credentials| async move {
            if credentials.password == "hunter2" {
                Ok(format!("session-for-{}", credentials.email))
            } else {
                Err(RemoteError::with_status(401, "invalid credentials"))
            }
        }))
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let rendered = format!("{:?}", Credentials::new("a@x.com", "hunter2"));
        assert!(rendered.contains("a@x.com"));
        assert!(!rendered.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_login_locks_email_after_failures() {
        let clock = ManualClock::default();
        let login = login_mutation(&GatekeepConfig::default(), auth_backend())
            .clock(Arc::new(clock.clone()))
            .build();

        for attempt in 0..5 {
            let err = login
                .execute(&format!("login-{}", attempt), Credentials::new("A@X.com", "wrong"))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Terminal);
        }

        clock.advance(Duration::from_secs(1));
        let err = login
            .execute("login-5", Credentials::new("a@x.com", "hunter2"))
            .await
            .unwrap_err();
        assert_eq!(err, MutationError::RateLimited { retry_after_ms: 299_000 });
        assert!(clock.recorded_sleeps().is_empty());

        // Another email is unaffected.
        assert!(login
            .execute("login-6", Credentials::new("b@x.com", "hunter2"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_successful_login_clears_counter() {
        let login = login_mutation(&GatekeepConfig::default(), auth_backend())
            .clock(Arc::new(ManualClock::default()))
            .build();

        for attempt in 0..4 {
            let _ = login
                .execute(&format!("login-{}", attempt), Credentials::new("a@x.com", "wrong"))
                .await;
        }
        assert_eq!(login.limiter().remaining("a@x.com"), 1);

        let session = tokio_test::assert_ok!(
            login
                .execute("login-4", Credentials::new("a@x.com", "hunter2"))
                .await
        );
        assert_eq!(session, "session-for-a@x.com");
        assert_eq!(login.limiter().remaining("a@x.com"), 5);
    }

    #[tokio::test]
    async fn test_login_rejects_malformed_payload() {
        let login = login_mutation(&GatekeepConfig::default(), auth_backend())
            .clock(Arc::new(ManualClock::default()))
            .build();

        let err = login
            .execute("login-1", Credentials::new("not-an-email", "pw"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = login
            .execute("login-2", Credentials::new("a@x.com", ""))
            .await
            .unwrap_err();
        assert_eq!(err, MutationError::InvalidInput("password is required".to_string()));
        assert_eq!(login.stats().remote_calls, 0);
    }

    #[tokio::test]
    async fn test_enrichment_retries_with_policy_backoff() {
        let config = GatekeepConfig::from_yaml(
            r#"
policies:
  enrichment:
    retry:
      max_retries: 2
      base_delay_ms: 100
    initial_quota: 3
"#,
        )
        .unwrap();
        let clock = ManualClock::default();
        let remote: Arc<dyn RemoteCall<String, String>> = Arc::new(remote_fn(|_: String| async {
            Err::<String, _>(RemoteError::with_status(429, "slow down"))
        }));
        let enrich = enrichment_mutation(&config, remote)
            .clock(Arc::new(clock.clone()))
            .build();

        let err = enrich.execute("lead-7", "acme.com".to_string()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RetriesExhausted);
        assert_eq!(
            clock.recorded_sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert_eq!(enrich.remaining_quota(), 3);
        assert_eq!(enrich.name(), "enrichment");
    }
}
