//! Server services reachable through the plugin API.

use async_trait::async_trait;
use dashmap::DashMap;

use chathub_core::AppResult;
use chathub_core::types::UserId;
use chathub_entity::User;

/// User lookups backing `API.GetUser` and `API.GetProfileImage`.
///
/// `Ok(None)` means the user does not exist. The bridge turns that into a
/// not-found error; implementations must not return empty data instead.
#[async_trait]
pub trait UserService: Send + Sync + 'static {
    /// Fetches a user record.
    async fn get_user(&self, user_id: UserId) -> AppResult<Option<User>>;

    /// Fetches a user's profile image bytes.
    async fn get_profile_image(&self, user_id: UserId) -> AppResult<Option<Vec<u8>>>;
}

#[derive(Debug, Clone)]
struct StoredUser {
    user: User,
    image: Option<Vec<u8>>,
}

/// In-memory [`UserService`], used by the server binary until a store is
/// wired in, and by tests.
#[derive(Debug, Default)]
pub struct InMemoryUserService {
    users: DashMap<UserId, StoredUser>,
}

impl InMemoryUserService {
    /// Creates an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a user.
    pub fn insert(&self, user: User) {
        let image = self.users.get(&user.id).and_then(|s| s.image.clone());
        self.users.insert(user.id, StoredUser { user, image });
    }

    /// Sets an uploaded profile image. Returns false if the user is unknown.
    pub fn set_profile_image(&self, user_id: UserId, image: Vec<u8>) -> bool {
        match self.users.get_mut(&user_id) {
            Some(mut stored) => {
                stored.image = Some(image);
                true
            }
            None => false,
        }
    }

    /// Number of stored users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no users are stored.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserService for InMemoryUserService {
    async fn get_user(&self, user_id: UserId) -> AppResult<Option<User>> {
        Ok(self.users.get(&user_id).map(|s| s.user.clone()))
    }

    async fn get_profile_image(&self, user_id: UserId) -> AppResult<Option<Vec<u8>>> {
        Ok(self.users.get(&user_id).map(|stored| {
            stored
                .image
                .clone()
                .unwrap_or_else(|| default_profile_image(&stored.user))
        }))
    }
}

/// Generated avatar for users who never uploaded one: an SVG with the
/// first letter of their display name.
pub fn default_profile_image(user: &User) -> Vec<u8> {
    let initial = user
        .display_name()
        .chars()
        .next()
        .map(|c| c.to_uppercase().to_string())
        .unwrap_or_else(|| "?".to_string());
    let hue = user.id.as_uuid().as_bytes()[0] as u32 * 360 / 256;
    format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="128" height="128">"#,
            r#"<rect width="128" height="128" fill="hsl({hue},45%,55%)"/>"#,
            r##"<text x="64" y="84" font-size="64" text-anchor="middle" fill="#fff">{initial}</text>"##,
            "</svg>"
        ),
        hue = hue,
        initial = initial,
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chathub_entity::UserRole;

    #[tokio::test]
    async fn test_unknown_user_is_none() {
        let service = InMemoryUserService::new();
        assert!(service.get_user(UserId::new()).await.unwrap().is_none());
        assert!(service.get_profile_image(UserId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_existing_user_without_upload_gets_generated_image() {
        let service = InMemoryUserService::new();
        let user = User::new("alice", UserRole::Member);
        let id = user.id;
        service.insert(user);

        let image = service.get_profile_image(id).await.unwrap().unwrap();
        assert!(!image.is_empty());
        assert!(String::from_utf8(image).unwrap().contains(">A</text>"));
    }

    #[tokio::test]
    async fn test_uploaded_image_survives_user_update() {
        let service = InMemoryUserService::new();
        let mut user = User::new("bob", UserRole::Member);
        service.insert(user.clone());
        assert!(service.set_profile_image(user.id, vec![1, 2, 3]));

        user.nickname = Some("Bobby".into());
        service.insert(user.clone());
        assert_eq!(
            service.get_profile_image(user.id).await.unwrap(),
            Some(vec![1, 2, 3])
        );
        assert!(!service.set_profile_image(UserId::new(), vec![9]));
    }
}
