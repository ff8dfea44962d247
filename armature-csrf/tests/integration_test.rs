//! Integration tests for armature-csrf

use armature_csrf::*;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn guard(config: CsrfConfig) -> CsrfGuard {
    CsrfGuard::new(config).unwrap()
}

#[test]
fn test_missing_token_rotates_master_token() {
    let guard = guard(CsrfConfig::default());
    let session = guard.memory_session("a");
    let store = guard.snapshot().store().clone();
    assert_eq!(store.get_master_token(&session), None);

    let decision = guard.validate(Some(&session), "/transfer", &Method::POST, None);
    assert_eq!(
        decision.outcome,
        ValidationOutcome::Rejected {
            reason: RejectReason::MissingToken
        }
    );
    let first = store.get_master_token(&session).unwrap();

    guard.validate(Some(&session), "/transfer", &Method::POST, None);
    let second = store.get_master_token(&session).unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_valid_token_with_rotation() {
    let guard = guard(CsrfConfig::default().with_rotate(true));
    let session = guard.memory_session("b");
    let store = guard.snapshot().store().clone();

    let t1 = store.ensure_master_token(&session).unwrap();
    let decision = guard.validate(Some(&session), "/transfer", &Method::POST, Some(&t1));
    assert_eq!(
        decision.outcome,
        ValidationOutcome::Accepted {
            reason: AcceptReason::ValidToken
        }
    );
    assert_ne!(store.get_master_token(&session), Some(t1));
}

#[test]
fn test_page_token_for_other_resource_is_rejected() {
    let guard = guard(CsrfConfig::default().with_token_per_page(true));
    let session = guard.memory_session("c");
    let store = guard.snapshot().store().clone();

    let p1 = store.ensure_page_token(&session, "/admin").unwrap();
    let p2 = store.ensure_page_token(&session, "/billing").unwrap();
    assert_ne!(p1, p2);

    let decision = guard.validate(Some(&session), "/admin", &Method::POST, Some(&p2));
    assert_eq!(
        decision.outcome,
        ValidationOutcome::Rejected {
            reason: RejectReason::TokenMismatch
        }
    );
}

#[test]
fn test_unprotected_extension_needs_no_token() {
    let guard = guard(CsrfConfig::default().with_unprotected_extensions(vec!["png".to_string()]));
    let session = guard.memory_session("d");

    for supplied in [None, Some("anything")] {
        let decision = guard.validate(Some(&session), "/images/logo.png", &Method::POST, supplied);
        assert_eq!(
            decision.outcome,
            ValidationOutcome::Accepted {
                reason: AcceptReason::Unprotected
            }
        );
    }
    assert_eq!(session.master_token(), None);
}

#[test]
fn test_unprotected_rule_wins_over_protected_rule() {
    let config = CsrfConfig::default()
        .with_unprotected_pages(vec!["/public/*".to_string()])
        .with_protected_pages(vec!["/account/*".to_string()]);
    let policy = ProtectionPolicy::from_config(&config).unwrap();

    assert!(!policy.is_protected("/public/account/x", &Method::POST).is_protected);
    assert!(policy.is_protected("/account/x", &Method::POST).is_protected);
}

#[test]
fn test_unprotected_methods_win_over_protected_methods() {
    let guard = guard(
        CsrfConfig::default()
            .with_protected_methods(vec!["POST".to_string(), "PUT".to_string()])
            .with_unprotected_methods(vec!["PUT".to_string()]),
    );
    let session = guard.memory_session("m");

    assert!(guard.validate(Some(&session), "/x", &Method::PUT, None).is_accepted());
    assert!(guard.validate(Some(&session), "/x", &Method::DELETE, None).is_accepted());
    assert!(!guard.validate(Some(&session), "/x", &Method::POST, None).is_accepted());
}

#[test]
fn test_context_path_and_regex_rules() {
    let guard = guard(
        CsrfConfig::default()
            .with_context_path("/app")
            .with_protect_all(false)
            .with_protected_pages(vec![r"^/api/v\d+/orders$".to_string()]),
    );
    let session = guard.memory_session("r");

    assert!(
        !guard
            .validate(Some(&session), "https://shop.example/app/api/v2/orders?id=1", &Method::POST, None)
            .is_accepted()
    );
    assert!(
        guard
            .validate(Some(&session), "/app/api/v2/orders/1", &Method::POST, None)
            .is_accepted()
    );
}

#[test]
fn test_concurrent_ensure_creates_one_token() {
    let guard = Arc::new(guard(CsrfConfig::default()));
    let session = Arc::new(guard.memory_session("shared"));
    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let guard = Arc::clone(&guard);
            let session = Arc::clone(&session);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                guard.master_token(&*session).unwrap()
            })
        })
        .collect();

    let tokens: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(tokens.iter().all(|token| *token == tokens[0]));
    assert_eq!(session.master_token(), Some(tokens[0].clone()));
}

/// Host session counting attribute writes.
#[derive(Default)]
struct CountingSession {
    master: Mutex<Option<String>>,
    pages: Mutex<HashMap<String, String>>,
    master_writes: AtomicUsize,
    page_writes: AtomicUsize,
}

impl LogicalSession for CountingSession {
    fn id(&self) -> &str {
        "counting"
    }

    fn master_token(&self) -> Option<String> {
        self.master.lock().clone()
    }

    fn set_master_token(&self, token: String) {
        // Widen the race window between check and create
        thread::sleep(Duration::from_millis(1));
        self.master_writes.fetch_add(1, Ordering::SeqCst);
        *self.master.lock() = Some(token);
    }

    fn page_tokens(&self) -> HashMap<String, String> {
        self.pages.lock().clone()
    }

    fn set_page_tokens(&self, tokens: HashMap<String, String>) {
        thread::sleep(Duration::from_millis(1));
        self.page_writes.fetch_add(1, Ordering::SeqCst);
        *self.pages.lock() = tokens;
    }
}

#[test]
fn test_concurrent_ensure_writes_session_once() {
    let store = TokenStore::new(TokenGenerator::new(
        PrngRegistry::new().create("ChaCha").unwrap(),
        32,
    ));
    let session = Arc::new(CountingSession::default());
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let store = store.clone();
            let session = Arc::clone(&session);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let master = store.ensure_master_token(&*session).unwrap();
                let page = store.ensure_page_token(&*session, "/admin").unwrap();
                (master, page)
            })
        })
        .collect();

    let results: Vec<(String, String)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.iter().all(|result| *result == results[0]));
    assert_eq!(session.master_writes.load(Ordering::SeqCst), 1);
    assert_eq!(session.page_writes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_sessions_get_distinct_tokens() {
    let guard = Arc::new(guard(CsrfConfig::default()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let guard = Arc::clone(&guard);
            thread::spawn(move || {
                let session = guard.memory_session(format!("session-{}", i));
                guard.master_token(&session).unwrap()
            })
        })
        .collect();

    let mut tokens: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    tokens.sort();
    tokens.dedup();
    assert_eq!(tokens.len(), 8);
}

#[test]
fn test_session_created_precreates_page_tokens() {
    let guard = guard(
        CsrfConfig::default()
            .with_token_per_page(true)
            .with_token_per_page_precreate(true)
            .with_protected_pages(vec!["/admin/*".to_string(), "/billing".to_string()]),
    );
    let session = guard.memory_session("p");
    guard.session_created(&session).unwrap();

    let tokens = session.page_tokens();
    assert_eq!(tokens.len(), 2);

    // Precreated tokens are the ones the forms will carry
    let admin = guard.token_for(&session, "/admin/users", &Method::POST).unwrap();
    assert_eq!(tokens["/admin/*"], admin);
    assert!(
        guard
            .validate(Some(&session), "/admin/users", &Method::POST, Some(&admin))
            .is_accepted()
    );
}

#[test]
fn test_session_attribute_names_follow_config() {
    let guard = guard(CsrfConfig::default().with_session_keys("csrf.master", "csrf.pages"));
    let session = guard.memory_session("k");

    let token = guard.master_token(&session).unwrap();
    assert_eq!(session.attribute::<String>("csrf.master"), Some(token));
    assert_eq!(session.attribute::<String>("OWASP_CSRFGUARD_KEY"), None);
}

#[test]
fn test_no_session_handling() {
    let strict = guard(CsrfConfig::default());
    assert_eq!(
        strict.validate(None, "/transfer", &Method::POST, None).outcome,
        ValidationOutcome::Rejected {
            reason: RejectReason::NoSession
        }
    );

    let lenient = guard(CsrfConfig::default().with_validate_when_no_session_exists(false));
    assert!(lenient.validate(None, "/transfer", &Method::POST, None).is_accepted());
}

#[test]
fn test_rejection_directives() {
    let guard = guard(CsrfConfig::default().with_actions(vec![
        ActionSpec::new("log"),
        ActionSpec::new("redirect").with_param("page", "/csrf-error.html"),
        ActionSpec::new("error").with_param("code", "400").with_param("message", "Bad token"),
    ]));
    let session = guard.memory_session("x");

    let decision = guard.validate(Some(&session), "/transfer", &Method::POST, None);
    assert_eq!(
        decision.directives,
        vec![
            Directive::Redirect {
                location: "/csrf-error.html".to_string()
            },
            Directive::Status {
                code: StatusCode::BAD_REQUEST,
                message: "Bad token".to_string()
            },
        ]
    );
}

#[test]
fn test_validate_request_sources() {
    let guard = guard(CsrfConfig::default());
    let session = guard.memory_session("h");
    let token = guard.master_token(&session).unwrap();

    let mut headers = HeaderMap::new();
    headers.insert("x-csrf-token", HeaderValue::from_str(&token).unwrap());
    assert!(
        guard
            .validate_request(Some(&session), &Method::POST, "/transfer", &headers, None)
            .is_accepted()
    );

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    let body = format!("amount=5&OWASP-CSRFTOKEN={}", token);
    assert!(
        guard
            .validate_request(Some(&session), &Method::POST, "/transfer", &headers, Some(body.as_bytes()))
            .is_accepted()
    );

    let decision = guard.validate_request(Some(&session), &Method::POST, "/transfer", &HeaderMap::new(), None);
    assert_eq!(
        decision.outcome,
        ValidationOutcome::Rejected {
            reason: RejectReason::MissingToken
        }
    );
}

#[test]
fn test_custom_prng_and_action() {
    #[derive(Debug)]
    struct Deny;

    impl RejectAction for Deny {
        fn name(&self) -> &'static str {
            "deny"
        }

        fn execute(&self, ctx: &RejectionContext<'_>) -> Option<Directive> {
            Some(Directive::Status {
                code: StatusCode::FORBIDDEN,
                message: format!("{} on {}", ctx.reason, ctx.uri),
            })
        }
    }

    let prngs = PrngRegistry::new().with("Seeded", || {
        use rand::SeedableRng;
        Ok(Box::new(rand::rngs::StdRng::seed_from_u64(7)) as Box<dyn SecureRandomSource>)
    });
    let actions = ActionRegistry::new().with("deny", |_| Ok(Arc::new(Deny) as Arc<dyn RejectAction>));
    let guard = CsrfGuard::with_registries(
        CsrfConfig::default()
            .with_prng("seeded")
            .with_actions(vec![ActionSpec::new("deny")]),
        prngs,
        actions,
    )
    .unwrap();
    let session = guard.memory_session("z");

    let decision = guard.validate(Some(&session), "/transfer", &Method::POST, Some("x"));
    assert_eq!(
        decision.directives,
        vec![Directive::Status {
            code: StatusCode::FORBIDDEN,
            message: "token mismatch on /transfer".to_string()
        }]
    );
}

fn write_config(path: &std::path::Path, content: &str) {
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.sync_all().unwrap();
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

#[tokio::test]
async fn test_reload_task_applies_file_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("csrfguard.toml");
    write_config(&path, "protect_all = true\n");

    let loader = ConfigLoader::new().with_env_prefix(None);
    let guard = Arc::new(CsrfGuard::from_file(&path, &loader).unwrap());
    let handle = guard.spawn_reload_task(&path, Duration::from_millis(20), loader);
    let session = guard.memory_session("reload");

    assert!(!guard.validate(Some(&session), "/hook", &Method::POST, None).is_accepted());

    write_config(&path, "unprotected_pages = [\"/hook\"]\n");
    assert!(wait_for(|| guard.validate(Some(&session), "/hook", &Method::POST, None).is_accepted()).await);

    // A broken file leaves the running configuration in place
    write_config(&path, "token_length = 1\n");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(guard.config().unprotected_pages, vec!["/hook"]);
    assert_eq!(guard.config().token_length, 32);

    drop(guard);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

/// Session whose reads are slow, like one kept in a remote store.
struct SlowSession {
    inner: MemorySession,
}

impl SlowSession {
    fn new(id: &str) -> Self {
        Self {
            inner: MemorySession::new(id, SessionKeys::default()),
        }
    }
}

impl LogicalSession for SlowSession {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn master_token(&self) -> Option<String> {
        thread::sleep(Duration::from_millis(5));
        self.inner.master_token()
    }

    fn set_master_token(&self, token: String) {
        self.inner.set_master_token(token);
    }

    fn page_tokens(&self) -> HashMap<String, String> {
        thread::sleep(Duration::from_millis(5));
        self.inner.page_tokens()
    }

    fn set_page_tokens(&self, tokens: HashMap<String, String>) {
        self.inner.set_page_tokens(tokens);
    }
}

fn concurrent_replays(guard: Arc<CsrfGuard>, session: Arc<SlowSession>, uri: &'static str, token: String) -> usize {
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let guard = Arc::clone(&guard);
            let session = Arc::clone(&session);
            let barrier = Arc::clone(&barrier);
            let token = token.clone();
            thread::spawn(move || {
                barrier.wait();
                guard
                    .validate(Some(&*session), uri, &Method::POST, Some(&token))
                    .is_accepted()
            })
        })
        .collect();

    handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|accepted| *accepted)
        .count()
}

#[test]
fn test_rotated_master_token_is_accepted_once_under_contention() {
    let guard = Arc::new(guard(CsrfConfig::default().with_rotate(true)));
    let session = Arc::new(SlowSession::new("race"));
    let token = guard.master_token(&*session).unwrap();

    let accepted = concurrent_replays(Arc::clone(&guard), Arc::clone(&session), "/transfer", token.clone());
    assert_eq!(accepted, 1);
    assert_ne!(session.master_token(), Some(token));
}

#[test]
fn test_rotated_page_token_is_accepted_once_under_contention() {
    let guard = Arc::new(guard(
        CsrfConfig::default()
            .with_rotate(true)
            .with_token_per_page(true)
            .with_protected_pages(vec!["/admin/*".to_string()]),
    ));
    let session = Arc::new(SlowSession::new("page-race"));
    let token = guard.token_for(&*session, "/admin/users", &Method::POST).unwrap();

    let accepted = concurrent_replays(Arc::clone(&guard), Arc::clone(&session), "/admin/users", token.clone());
    assert_eq!(accepted, 1);
    assert_ne!(session.page_tokens().get("/admin/*"), Some(&token));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watch_uses_configured_reload_interval() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("csrfguard.toml");
    write_config(&path, "reload_interval_secs = 1\n");

    let guard = CsrfGuard::watch(&path, ConfigLoader::new().with_env_prefix(None)).unwrap();
    let session = guard.memory_session("watch");
    assert!(!guard.validate(Some(&session), "/hook", &Method::POST, None).is_accepted());

    write_config(&path, "reload_interval_secs = 1\nunprotected_pages = [\"/hook\"]\n");
    assert!(wait_for(|| guard.validate(Some(&session), "/hook", &Method::POST, None).is_accepted()).await);
}
