use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::repo::UserStore;
use crate::auth::repo_types::{Role, User};
use crate::error::StoreError;

/// In-process store with the same uniqueness rules as the PostgreSQL one.
/// Used by tests and by `AppState::fake`.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_unique(users: &HashMap<Uuid, User>, candidate: &User) -> Result<(), StoreError> {
    for other in users.values().filter(|u| u.id != candidate.id) {
        if other.email == candidate.email {
            return Err(StoreError::Duplicate { field: "email" });
        }
        if other.role() != candidate.role() {
            continue;
        }
        let theirs = other.profile.unique_keys();
        for (field, value) in candidate.profile.unique_keys() {
            if theirs.iter().any(|(f, v)| *f == field && *v == value) {
                return Err(StoreError::Duplicate { field });
            }
        }
    }
    Ok(())
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        check_unique(&users, user)?;
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_details(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if !users.contains_key(&user.id) {
            return Err(StoreError::NotFound(user.id));
        }
        check_unique(&users, user)?;
        if let Some(stored) = users.get_mut(&user.id) {
            stored.name = user.name.clone();
            stored.profile = user.profile.clone();
            stored.updated_at = user.updated_at;
        }
        Ok(())
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let stored = users.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        stored.password_hash = password_hash.to_string();
        stored.updated_at = at;
        Ok(())
    }

    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        match users.get_mut(&id) {
            Some(stored) if stored.is_active => {
                stored.last_login = Some(at);
                stored.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_active_by_email_and_role(
        &self,
        email: &str,
        role: Role,
    ) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == email && u.role() == role && u.is_active)
            .cloned())
    }

    async fn set_active(
        &self,
        id: Uuid,
        active: bool,
        at: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        match users.get_mut(&id) {
            Some(user) => {
                user.is_active = active;
                user.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count(&self) -> Result<i64, StoreError> {
        Ok(self.users.read().await.len() as i64)
    }

    async fn close(&self) {}
}
