//! Demo `users` group
//!
//! Each user record is synthesized on the owning node and names the instance
//! that produced it, which makes ownership visible from the outside.

use crate::cache::{Filled, Getter};
use crate::common::{Error, FillError};
use crate::node::http::CacheState;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Name of the demo group
pub const USERS_GROUP: &str = "users";

/// Lifetime of a synthesized user record
pub const USER_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub user: String,
    pub instance: String,
}

impl User {
    pub fn new(id: &str, instance: &str) -> Self {
        Self {
            id: id.to_string(),
            user: format!("user-{}", id),
            instance: instance.to_string(),
        }
    }
}

/// Getter for the `users` group, stamping records with `instance`
pub fn users_getter(instance: impl Into<String>) -> impl Getter {
    let instance: String = instance.into();
    move |id: String| {
        let instance = instance.clone();
        async move {
            tracing::info!(id = %id, %instance, "Creating user record");
            let user = User::new(&id, &instance);
            let bytes = serde_json::to_vec(&user).map_err(|e| FillError::new(e.to_string()))?;
            Ok::<_, FillError>(Filled::new(bytes, Some(Instant::now() + USER_TTL)))
        }
    }
}

/// `GET /users/:id`
pub async fn get_user(
    State(state): State<CacheState>,
    Path(id): Path<String>,
) -> Result<Json<User>, Error> {
    let bytes = state.coordinator.lookup(USERS_GROUP, &id).await?;
    let user = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Internal(format!("malformed user record: {}", e)))?;
    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_users_getter_stamps_instance() {
        let getter = users_getter("app2");
        let filled = getter.get("42").await.unwrap();

        let user: User = serde_json::from_slice(&filled.value).unwrap();
        assert_eq!(user, User::new("42", "app2"));
        assert_eq!(user.user, "user-42");
        assert!(filled.expires_at.is_some());
    }

    #[test]
    fn test_user_json_shape() {
        let json = serde_json::to_value(User::new("7", "app1")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "7", "user": "user-7", "instance": "app1"})
        );
    }
}
