//! Local passcode gate.
//!
//! The passcode is stored as a PBKDF2-HMAC-SHA256 key with a per-passcode salt.
//! Failed attempts and the lockout deadline are persisted with it. Whether the
//! current process is unlocked is held in memory only.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Duration;
use courier_core::time::{format_db, parse_db};
use courier_core::{Clock, LedgerError};
use courier_store::{CredentialRecord, SqliteLedgerStore};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tracing::{info, warn};

const DEFAULT_PASSCODE: &str = "1234";
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
pub const MIN_PASSCODE_LEN: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct PasscodePolicy {
    pub iterations: u32,
    pub max_failed_attempts: i64,
    pub lockout: Duration,
}

impl PasscodePolicy {
    pub fn with_iterations(iterations: u32) -> Self {
        Self {
            iterations,
            ..Self::default()
        }
    }
}

impl Default for PasscodePolicy {
    fn default() -> Self {
        Self {
            iterations: 120_000,
            max_failed_attempts: 5,
            lockout: Duration::minutes(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("incorrect passcode, {remaining_attempts} attempts left")]
    Rejected { remaining_attempts: i64 },
    #[error("too many failed attempts, locked until {until}")]
    LockedOut { until: String },
    #[error("passcode must be at least 4 characters")]
    TooShort,
    #[error("stored credential is unreadable")]
    CorruptCredential,
    #[error("passcode hashing task failed")]
    Hashing(#[from] JoinError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnlockOutcome {
    pub needs_change: bool,
}

pub struct AuthSession {
    store: Arc<SqliteLedgerStore>,
    clock: Arc<dyn Clock>,
    policy: PasscodePolicy,
    authenticated: AtomicBool,
    credential: Mutex<()>,
}

impl AuthSession {
    /// Opens the gate locked, provisioning the default passcode on first start.
    pub async fn open(
        store: Arc<SqliteLedgerStore>,
        clock: Arc<dyn Clock>,
        policy: PasscodePolicy,
    ) -> Result<Self, AuthError> {
        let session = Self {
            store,
            clock,
            policy,
            authenticated: AtomicBool::new(false),
            credential: Mutex::new(()),
        };
        session.load_or_provision().await?;
        Ok(session)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn lock(&self) {
        self.authenticated.store(false, Ordering::Release);
        info!("session locked");
    }

    pub async fn needs_change(&self) -> Result<bool, AuthError> {
        Ok(self.load_or_provision().await?.needs_change)
    }

    pub async fn unlock(&self, passcode: &str) -> Result<UnlockOutcome, AuthError> {
        let _guard = self.credential.lock().await;
        let mut record = self.load_or_provision().await?;
        self.check_lockout(&mut record).await?;

        if !verify(passcode, &record).await? {
            return Err(self.register_failure(record).await?);
        }

        record.failed_attempts = 0;
        record.lockout_until = None;
        self.store.save_credential(&record).await?;
        self.authenticated.store(true, Ordering::Release);
        info!(needs_change = record.needs_change, "session unlocked");

        Ok(UnlockOutcome {
            needs_change: record.needs_change,
        })
    }

    /// Replaces the passcode with a freshly salted one.
    pub async fn change_passcode(&self, current: &str, new_passcode: &str) -> Result<(), AuthError> {
        if new_passcode.chars().count() < MIN_PASSCODE_LEN {
            return Err(AuthError::TooShort);
        }

        let _guard = self.credential.lock().await;
        let mut record = self.load_or_provision().await?;
        self.check_lockout(&mut record).await?;

        if !verify(current, &record).await? {
            return Err(self.register_failure(record).await?);
        }

        let replacement = provision(new_passcode, self.policy.iterations, false).await?;
        self.store.save_credential(&replacement).await?;
        info!("passcode changed");
        Ok(())
    }

    async fn load_or_provision(&self) -> Result<CredentialRecord, AuthError> {
        if let Some(record) = self.store.load_credential().await? {
            return Ok(record);
        }
        let record = provision(DEFAULT_PASSCODE, self.policy.iterations, true).await?;
        self.store.save_credential(&record).await?;
        info!("default passcode provisioned");
        Ok(record)
    }

    /// An expired lockout clears itself along with the failure count.
    async fn check_lockout(&self, record: &mut CredentialRecord) -> Result<(), AuthError> {
        let Some(until) = record.lockout_until.clone() else {
            return Ok(());
        };
        if let Some(deadline) = parse_db(&until) {
            if self.clock.now() < deadline {
                return Err(AuthError::LockedOut { until });
            }
        }

        record.failed_attempts = 0;
        record.lockout_until = None;
        self.store.save_credential(record).await?;
        Ok(())
    }

    async fn register_failure(&self, mut record: CredentialRecord) -> Result<AuthError, AuthError> {
        record.failed_attempts += 1;
        let error = if record.failed_attempts >= self.policy.max_failed_attempts {
            let until = format_db(self.clock.now() + self.policy.lockout);
            record.lockout_until = Some(until.clone());
            warn!(failed_attempts = record.failed_attempts, %until, "passcode locked out");
            AuthError::LockedOut { until }
        } else {
            warn!(failed_attempts = record.failed_attempts, "passcode rejected");
            AuthError::Rejected {
                remaining_attempts: self.policy.max_failed_attempts - record.failed_attempts,
            }
        };
        self.store.save_credential(&record).await?;
        Ok(error)
    }
}

async fn verify(passcode: &str, record: &CredentialRecord) -> Result<bool, AuthError> {
    let salt = STANDARD
        .decode(&record.salt)
        .map_err(|_| AuthError::CorruptCredential)?;
    let expected = STANDARD
        .decode(&record.hash)
        .map_err(|_| AuthError::CorruptCredential)?;
    let derived = derive_key(passcode.to_owned(), salt, record.iterations).await?;
    Ok(bool::from(derived[..].ct_eq(&expected[..])))
}

async fn provision(
    passcode: &str,
    iterations: u32,
    needs_change: bool,
) -> Result<CredentialRecord, AuthError> {
    let mut salt = vec![0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let encoded_salt = STANDARD.encode(&salt);
    let key = derive_key(passcode.to_owned(), salt, iterations).await?;

    Ok(CredentialRecord {
        hash: STANDARD.encode(key),
        salt: encoded_salt,
        iterations,
        needs_change,
        failed_attempts: 0,
        lockout_until: None,
    })
}

async fn derive_key(passcode: String, salt: Vec<u8>, iterations: u32) -> Result<[u8; KEY_LEN], AuthError> {
    let key = tokio::task::spawn_blocking(move || {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(passcode.as_bytes(), &salt, iterations, &mut key);
        key
    })
    .await?;
    Ok(key)
}
