use crate::models::{PreferencesPatch, ProfilePatch, UserRecord};
use crate::services::store::{self, KeyValueStore, StoreError};
use chrono::Utc;
use ethers::types::Address;
use std::sync::Arc;

pub struct UserRepository {
    store: Arc<dyn KeyValueStore>,
}

fn user_key(wallet: Address) -> String {
    format!("user:{:?}", wallet)
}

/// Result of [`UserRepository::upsert`].
#[derive(Debug, Clone)]
pub struct UpsertedUser {
    pub user: UserRecord,
    pub created: bool,
}

impl UserRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Creates the user on first sight, otherwise merges the supplied fields
    /// into the stored profile and preferences.
    pub async fn upsert(
        &self,
        wallet: Address,
        profile: Option<ProfilePatch>,
        preferences: Option<PreferencesPatch>,
    ) -> Result<UpsertedUser, StoreError> {
        let key = user_key(wallet);

        loop {
            match store::load::<UserRecord>(self.store.as_ref(), &key).await? {
                None => {
                    let mut user = UserRecord::new(wallet);
                    user.profile_data = profile.clone().map(|patch| patch.apply(Default::default()));
                    user.preferences = preferences.clone().map(|patch| patch.apply(Default::default()));

                    if self.store.put_if_absent(&key, &store::encode(&key, &user)?).await? {
                        tracing::info!(wallet = ?wallet, "User created");
                        return Ok(UpsertedUser { user, created: true });
                    }
                }
                Some((raw, mut user)) => {
                    if let Some(patch) = &profile {
                        user.profile_data = Some(patch.clone().apply(user.profile_data.take().unwrap_or_default()));
                    }
                    if let Some(patch) = &preferences {
                        user.preferences = Some(patch.clone().apply(user.preferences.take().unwrap_or_default()));
                    }
                    user.updated_at = Utc::now();

                    if self
                        .store
                        .compare_and_swap(&key, &raw, &store::encode(&key, &user)?)
                        .await?
                    {
                        return Ok(UpsertedUser { user, created: false });
                    }
                }
            }
        }
    }

    pub async fn get(&self, wallet: Address) -> Result<Option<UserRecord>, StoreError> {
        Ok(store::load::<UserRecord>(self.store.as_ref(), &user_key(wallet))
            .await?
            .map(|(_, user)| user))
    }

    pub async fn delete(&self, wallet: Address) -> Result<bool, StoreError> {
        self.store.delete(&user_key(wallet)).await
    }
}
