//! User lookup and persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Data for a user that has not been stored yet.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

#[async_trait]
pub trait UserProvider: Send + Sync + 'static {
    async fn find_by_id(&self, id: u64) -> Result<Option<User>>;

    /// Emails are matched case-insensitively.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Store a user. Fails with `Conflict` when the email is taken.
    async fn create(&self, user: NewUser) -> Result<User>;
}

/// Users held in memory with sequential ids.
#[derive(Debug)]
pub struct InMemoryUserProvider {
    users: DashMap<u64, User>,
    next_id: AtomicU64,
}

impl Default for InMemoryUserProvider {
    fn default() -> Self {
        Self {
            users: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl InMemoryUserProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserProvider for InMemoryUserProvider {
    async fn find_by_id(&self, id: u64) -> Result<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .map(|u| u.clone()))
    }

    async fn create(&self, user: NewUser) -> Result<User> {
        if self.find_by_email(&user.email).await?.is_some() {
            return Err(Error::Conflict {
                message: "The email has already been taken.".to_string(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let user = User {
            id,
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            created_at: Utc::now(),
        };
        self.users.insert(id, user.clone());
        Ok(user)
    }
}
