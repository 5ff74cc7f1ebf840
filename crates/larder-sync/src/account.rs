//! Local account provisioning. First login verifies the credentials
//! against the remote service and stores its token; later logins verify
//! the local argon2 hash and never touch the remote service.

use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::Rng;
use rand::distr::Alphanumeric;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use larder_db::models::UserRow;
use larder_db::{Database, StoreError};
use larder_remote::{RemoteApi, RemoteError};

const PARTNER_CODE_LEN: usize = 10;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("invalid password")]
    InvalidPassword,
    /// The remote service refused the credentials on first login.
    #[error("remote login failed: {0}")]
    RemoteLogin(String),
    #[error(transparent)]
    Remote(RemoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("password hashing failed")]
    Hash,
}

impl AccountError {
    pub fn code(&self) -> &'static str {
        match self {
            AccountError::InvalidPassword => "invalid_password",
            AccountError::RemoteLogin(_) => "invalid_remote_login",
            AccountError::Remote(_) => "remote_error",
            AccountError::Store(_) | AccountError::Hash => "internal_error",
        }
    }
}

impl From<RemoteError> for AccountError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Rejection(message) | RemoteError::InvalidToken(message) => {
                AccountError::RemoteLogin(message)
            }
            other => AccountError::Remote(other),
        }
    }
}

/// Log a user in, creating the local account on first contact.
pub async fn login_or_create<S: RemoteApi + ?Sized>(
    remote: &S,
    db: &Database,
    email: &str,
    password: &str,
) -> Result<UserRow, AccountError> {
    let email = email.to_lowercase();

    if let Some(user) = db.get_user_by_email(&email)? {
        info!("Found existing user for {}", email);
        if !verify_password(&user.password, password)? {
            info!("Password invalid");
            return Err(AccountError::InvalidPassword);
        }
        return Ok(user);
    }

    info!("Trying remote login for {}", email);
    let remote_token = remote.login(&email, password).await?;
    info!("Remote login successful, creating local user");

    let id = Uuid::new_v4().to_string();
    // display name defaults to the mailbox part; users can share it as-is
    let name = email.split('@').next().unwrap_or(&email).to_string();
    let user = db.create_user(
        &id,
        &email,
        &name,
        &hash_password(password)?,
        &remote_token,
        &generate_partner_code(),
    )?;
    Ok(user)
}

pub fn hash_password(password: &str) -> Result<String, AccountError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AccountError::Hash)
}

pub fn verify_password(hash: &str, password: &str) -> Result<bool, AccountError> {
    let parsed = PasswordHash::new(hash).map_err(|_| AccountError::Hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Short shareable code others use to request a partnership.
pub fn generate_partner_code() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(PARTNER_CODE_LEN)
        .map(char::from)
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRemote, test_db};

    #[tokio::test]
    async fn first_login_provisions_via_remote_later_logins_verify_locally() {
        let db = test_db();
        let remote = FakeRemote::default();

        let user = login_or_create(&remote, &db, "Cook@Example.com", "secret")
            .await
            .unwrap();
        assert_eq!(user.email, "cook@example.com");
        assert_eq!(user.name, "cook");
        assert_eq!(user.remote_token, "token-cook@example.com");
        assert_eq!(user.partner_code.len(), PARTNER_CODE_LEN);

        let again = login_or_create(&remote, &db, "cook@example.com", "secret")
            .await
            .unwrap();
        assert_eq!(again.id, user.id);

        let err = login_or_create(&remote, &db, "cook@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidPassword));
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password(&hash, "hunter2").unwrap());
        assert!(!verify_password(&hash, "hunter3").unwrap());
    }
}
