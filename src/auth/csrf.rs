use actix_web::cookie::{Cookie, SameSite};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::OwnedMutexGuard;

use crate::auth::clock::{Clock, SystemClock};
use crate::auth::entropy::{EntropySource, OsEntropy, random_hex};
use crate::auth::session::{LiveSession, SessionContext, SessionData, SessionLocks, SessionStore, ensure_session_id};
use crate::config::CsrfSettings;
use crate::errors::AppError;

const TOKEN_BYTES: usize = 32;

/// The token held in a session, with its creation time in unix seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfRecord {
    pub token: String,
    pub created_at: i64,
}

impl CsrfRecord {
    pub fn is_expired(&self, now: i64, ttl_secs: i64) -> bool {
        now - self.created_at > ttl_secs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    NoToken,
    Valid,
    Expired,
}

/// Issues, checks and rotates the anti-forgery token of a session.
///
/// The server-side record is authoritative; the cookie built by
/// [`CsrfManager::issue_cookie`] only mirrors it for scripts. Records live in
/// [`SessionData`] and are only read or written under the session's lock.
pub struct CsrfManager {
    settings: CsrfSettings,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn EntropySource>,
    locks: SessionLocks,
    data: SessionData,
}

impl CsrfManager {
    pub fn new(settings: CsrfSettings) -> Self {
        Self {
            settings,
            clock: Arc::new(SystemClock),
            entropy: Arc::new(OsEntropy),
            locks: SessionLocks::new(),
            data: SessionData::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn settings(&self) -> &CsrfSettings {
        &self.settings
    }

    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    pub fn session_data(&self) -> &SessionData {
        &self.data
    }

    fn now(&self) -> i64 {
        self.clock.now().timestamp()
    }

    /// Attach to the request's session, stamping an id into `carrier` on
    /// first touch. Only the carrier is written here; token state is left
    /// alone until the caller holds [`CsrfManager::lock_session`].
    pub fn ensure_session(&self, carrier: &impl SessionStore) -> Result<SessionContext<LiveSession>, AppError> {
        let id = ensure_session_id(carrier, self.entropy.as_ref())?;
        Ok(SessionContext::new(self.data.live(&id), id))
    }

    /// Exclusive access to the session's token state until the guard drops.
    pub async fn lock_session<S: SessionStore>(&self, ctx: &SessionContext<S>) -> OwnedMutexGuard<()> {
        self.locks.acquire(ctx.id()).await
    }

    /// Destroy the session server-side and in the request's carrier.
    pub fn end_session<S: SessionStore>(
        &self,
        ctx: SessionContext<S>,
        guard: OwnedMutexGuard<()>,
        carrier: &impl SessionStore,
    ) {
        carrier.purge();
        ctx.teardown(guard, &self.locks);
    }

    pub fn record<S: SessionStore>(&self, ctx: &SessionContext<S>) -> Result<Option<CsrfRecord>, AppError> {
        let token = ctx.store().read::<String>(&self.settings.token_key())?;
        let created_at = ctx.store().read::<i64>(self.settings.time_key())?;
        Ok(match (token, created_at) {
            (Some(token), Some(created_at)) if !token.is_empty() => Some(CsrfRecord { token, created_at }),
            _ => None,
        })
    }

    pub fn token_state<S: SessionStore>(&self, ctx: &SessionContext<S>) -> Result<TokenState, AppError> {
        Ok(match self.record(ctx)? {
            None => TokenState::NoToken,
            Some(r) if r.is_expired(self.now(), self.settings.ttl_secs) => TokenState::Expired,
            Some(_) => TokenState::Valid,
        })
    }

    /// Current token, or a new one if there is none or it has expired.
    pub fn generate_token<S: SessionStore>(&self, ctx: &SessionContext<S>) -> Result<String, AppError> {
        let now = self.now();
        if let Some(record) = self.record(ctx)? {
            if !record.is_expired(now, self.settings.ttl_secs) {
                return Ok(record.token);
            }
            log::debug!("CSRF token of session {} expired", ctx.id());
        }

        let token = random_hex(self.entropy.as_ref(), TOKEN_BYTES)?;
        ctx.store().write(&self.settings.token_key(), &token)?;
        ctx.store().write(self.settings.time_key(), &now)?;
        Ok(token)
    }

    /// Drop the current record and issue a fresh token.
    pub fn regenerate_token<S: SessionStore>(&self, ctx: &SessionContext<S>) -> Result<String, AppError> {
        ctx.store().remove(&self.settings.token_key());
        ctx.store().remove(self.settings.time_key());
        self.generate_token(ctx)
    }

    /// Like [`CsrfManager::validate_token`] but reports why a token was refused.
    pub fn check_token<S: SessionStore>(&self, ctx: &SessionContext<S>, candidate: &str) -> Result<(), AppError> {
        if candidate.is_empty() {
            return Err(AppError::TokenMissingOrExpired);
        }
        let record = self.record(ctx)?.ok_or(AppError::TokenMissingOrExpired)?;
        if record.is_expired(self.now(), self.settings.ttl_secs) {
            return Err(AppError::TokenMissingOrExpired);
        }
        if !constant_time_eq(&record.token, candidate) {
            return Err(AppError::TokenMismatch);
        }
        Ok(())
    }

    /// Never rotates; see [`CsrfManager::verify_and_rotate`].
    pub fn validate_token<S: SessionStore>(&self, ctx: &SessionContext<S>, candidate: &str) -> bool {
        match self.check_token(ctx, candidate) {
            Ok(()) => true,
            Err(err @ AppError::SessionUnavailable(_)) => {
                log::error!("{err}");
                false
            }
            Err(_) => false,
        }
    }

    /// Accept `candidate` and replace it, returning the new token.
    pub fn verify_and_rotate<S: SessionStore>(&self, ctx: &SessionContext<S>, candidate: &str) -> Result<String, AppError> {
        self.check_token(ctx, candidate)?;
        self.regenerate_token(ctx)
    }

    /// Cookie mirroring `token`, or the session's current token when `None`.
    pub fn issue_cookie<S: SessionStore>(
        &self,
        ctx: &SessionContext<S>,
        token: Option<&str>,
    ) -> Result<Cookie<'static>, AppError> {
        let token = match token {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => self.generate_token(ctx)?,
        };
        Ok(self.cookie_for(token))
    }

    pub fn cookie_for(&self, token: String) -> Cookie<'static> {
        let mut builder = Cookie::build(self.settings.cookie_name.clone(), token)
            .path("/")
            .secure(self.settings.secure)
            .http_only(true)
            .same_site(SameSite::Lax);
        if let Some(domain) = &self.settings.cookie_domain {
            builder = builder.domain(domain.clone());
        }
        builder.finish()
    }

    /// Cookie that clears the mirror on the client.
    pub fn removal_cookie(&self) -> Cookie<'static> {
        let mut cookie = self.cookie_for(String::new());
        cookie.make_removal();
        cookie
    }
}

/// Fixed-time comparison; length mismatch is the only early exit.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
