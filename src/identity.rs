use std::collections::HashMap;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use async_trait::async_trait;
use rand::prelude::*;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::Error;

/// An authenticated identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());

        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// A login attempt. Submitted as the `username` and `password` form fields.
#[derive(Debug, Deserialize)]
#[serde(from = "RawCredentials")]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

#[derive(Deserialize)]
struct RawCredentials {
    username: String,
    password: String,
}

impl From<RawCredentials> for Credentials {
    fn from(raw: RawCredentials) -> Self {
        Self::new(raw.username, raw.password)
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// Validates credentials against some source of users.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// `Ok(None)` means the credentials were wrong. Implementations must not
    /// reveal whether the username or the password was at fault.
    async fn authenticate(&self, credentials: &Credentials) -> Result<Option<Principal>, Error>;
}

struct User {
    hash: String,
    roles: Vec<String>,
}

/// Fixed set of users with argon2-hashed passwords.
pub struct InMemoryUsers {
    argon2: Argon2<'static>,
    users: HashMap<String, User>,
    decoy: String,
}

impl InMemoryUsers {
    pub fn new() -> Result<Self, Error> {
        Self::with_argon2(Argon2::default())
    }

    /// Use custom argon2 cost parameters, e.g. cheap ones in tests.
    pub fn with_params(params: Params) -> Result<Self, Error> {
        Self::with_argon2(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    fn with_argon2(argon2: Argon2<'static>) -> Result<Self, Error> {
        // Unknown usernames are verified against this so they cost the same as a wrong password.
        let decoy = hash_password(&argon2, "decoy")?;

        Ok(Self {
            argon2,
            users: HashMap::new(),
            decoy,
        })
    }

    pub fn with_user<I, R>(
        mut self,
        username: impl Into<String>,
        password: &str,
        roles: I,
    ) -> Result<Self, Error>
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        let user = User {
            hash: hash_password(&self.argon2, password)?,
            roles: roles.into_iter().map(Into::into).collect(),
        };
        self.users.insert(username.into(), user);

        Ok(self)
    }

    fn verify(&self, hash: &str, password: &str) -> bool {
        PasswordHash::new(hash)
            .map(|parsed| {
                self.argon2
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }
}

fn hash_password(argon2: &Argon2<'_>, password: &str) -> Result<String, Error> {
    let mut salt = [0u8; 16];
    thread_rng().fill(&mut salt);
    let salt = SaltString::encode_b64(&salt).map_err(|e| Error::PasswordHash(e.to_string()))?;

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::PasswordHash(e.to_string()))
}

#[async_trait]
impl IdentityProvider for InMemoryUsers {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Option<Principal>, Error> {
        let password = credentials.password.expose_secret();

        let Some(user) = self.users.get(&credentials.username) else {
            self.verify(&self.decoy, password);
            return Ok(None);
        };

        if !self.verify(&user.hash, password) {
            return Ok(None);
        }

        Ok(Some(Principal {
            name: credentials.username.clone(),
            roles: user.roles.clone(),
        }))
    }
}
