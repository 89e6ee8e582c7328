//! Test doubles shared by engine and scan-surface tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, Semaphore};

use crate::sync::{AuthorityError, AuthorityResult, CheckinAuthority, CheckinDecision};

pub fn allowed_decision(code: &str) -> CheckinDecision {
    CheckinDecision {
        reservation_id: format!("res-{code}"),
        reservation_code: code.to_string(),
        status: Some("confirmed".to_string()),
        guest_name: None,
        allowed: true,
        can_override: false,
        reason: None,
    }
}

pub fn blocked_decision(
    code: &str,
    can_override: bool,
    reason: Option<&str>,
    guest_name: Option<&str>,
) -> CheckinDecision {
    CheckinDecision {
        reservation_id: format!("res-{code}"),
        reservation_code: code.to_string(),
        status: Some("for_verification".to_string()),
        guest_name: guest_name.map(str::to_string),
        allowed: false,
        can_override,
        reason: reason.map(str::to_string),
    }
}

enum ScriptedValidate {
    Decision(CheckinDecision),
    NotFound,
    TransportError(String),
}

#[derive(Default)]
struct ScriptedInner {
    validations: Mutex<VecDeque<ScriptedValidate>>,
    commit_error: Mutex<Option<String>>,
    calls: Mutex<Vec<String>>,
}

/// Authority double driven by a script of validate responses.
///
/// Every call is appended to a log (`validate:{code}:{offline|direct}`,
/// `commit:{reservation_id}:{reason|none}`) so tests can assert ordering.
#[derive(Clone, Default)]
pub struct ScriptedAuthority {
    inner: Arc<ScriptedInner>,
}

impl ScriptedAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_decision(&self, decision: CheckinDecision) {
        self.inner
            .validations
            .lock()
            .unwrap()
            .push_back(ScriptedValidate::Decision(decision));
    }

    pub fn push_not_found(&self) {
        self.inner
            .validations
            .lock()
            .unwrap()
            .push_back(ScriptedValidate::NotFound);
    }

    pub fn push_transport_error(&self, message: &str) {
        self.inner
            .validations
            .lock()
            .unwrap()
            .push_back(ScriptedValidate::TransportError(message.to_string()));
    }

    pub fn fail_commits_with(&self, message: &str) {
        *self.inner.commit_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.calls.lock().unwrap().clone()
    }

    fn log(&self, call: String) {
        self.inner.calls.lock().unwrap().push(call);
    }
}

impl CheckinAuthority for ScriptedAuthority {
    async fn validate(
        &self,
        reservation_code: &str,
        offline_mode: bool,
    ) -> AuthorityResult<Option<CheckinDecision>> {
        let mode = if offline_mode { "offline" } else { "direct" };
        self.log(format!("validate:{reservation_code}:{mode}"));

        let next = self.inner.validations.lock().unwrap().pop_front();
        match next {
            Some(ScriptedValidate::Decision(decision)) => Ok(Some(decision)),
            Some(ScriptedValidate::NotFound) => Ok(None),
            Some(ScriptedValidate::TransportError(message)) => Err(AuthorityError::Api(message)),
            None => Err(AuthorityError::Api("unscripted validate call".to_string())),
        }
    }

    async fn commit(
        &self,
        reservation_id: &str,
        override_reason: Option<&str>,
    ) -> AuthorityResult<()> {
        self.log(format!(
            "commit:{reservation_id}:{}",
            override_reason.unwrap_or("none")
        ));

        match self.inner.commit_error.lock().unwrap().clone() {
            Some(message) => Err(AuthorityError::Api(message)),
            None => Ok(()),
        }
    }
}

struct BlockingInner {
    entered: Notify,
    gate: Semaphore,
    released: AtomicBool,
}

/// Authority double whose validate parks until released.
///
/// Used to hold a drain pass in flight while a test pokes at the engine
/// from outside. After [`BlockingAuthority::release`] the gate stays open.
#[derive(Clone)]
pub struct BlockingAuthority {
    inner: Arc<BlockingInner>,
}

impl BlockingAuthority {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BlockingInner {
                entered: Notify::new(),
                gate: Semaphore::new(0),
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Wait until a validate call is parked inside the gate.
    pub async fn wait_until_validating(&self) {
        self.inner.entered.notified().await;
    }

    /// Open the gate for the parked call and every call after it.
    pub fn release(&self) {
        self.inner.released.store(true, Ordering::Release);
        self.inner.gate.add_permits(1);
    }
}

impl CheckinAuthority for BlockingAuthority {
    async fn validate(
        &self,
        reservation_code: &str,
        _offline_mode: bool,
    ) -> AuthorityResult<Option<CheckinDecision>> {
        if !self.inner.released.load(Ordering::Acquire) {
            self.inner.entered.notify_one();
            let _permit = self
                .inner
                .gate
                .acquire()
                .await
                .map_err(|_| AuthorityError::Api("gate closed".to_string()))?;
        }
        Ok(Some(allowed_decision(reservation_code)))
    }

    async fn commit(
        &self,
        _reservation_id: &str,
        _override_reason: Option<&str>,
    ) -> AuthorityResult<()> {
        Ok(())
    }
}
