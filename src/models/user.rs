use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileData {
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub personality_traits: Vec<String>,
    #[serde(default)]
    pub looking_for: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    #[serde(default)]
    pub date_vibes: Vec<String>,
    #[serde(default)]
    pub budget_range: String,
    #[serde(default)]
    pub activity_types: Vec<String>,
}

/// Partial profile update. Only the fields present in the request are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interests: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality_traits: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub looking_for: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl ProfilePatch {
    pub fn apply(self, mut profile: ProfileData) -> ProfileData {
        if let Some(interests) = self.interests {
            profile.interests = interests;
        }
        if let Some(traits) = self.personality_traits {
            profile.personality_traits = traits;
        }
        if let Some(looking_for) = self.looking_for {
            profile.looking_for = looking_for;
        }
        if self.age.is_some() {
            profile.age = self.age;
        }
        if self.location.is_some() {
            profile.location = self.location;
        }
        profile
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_vibes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_types: Option<Vec<String>>,
}

impl PreferencesPatch {
    pub fn apply(self, mut preferences: UserPreferences) -> UserPreferences {
        if let Some(vibes) = self.date_vibes {
            preferences.date_vibes = vibes;
        }
        if let Some(budget) = self.budget_range {
            preferences.budget_range = budget;
        }
        if let Some(activities) = self.activity_types {
            preferences.activity_types = activities;
        }
        preferences
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: Uuid,
    pub wallet_address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_data: Option<ProfileData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<UserPreferences>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(wallet_address: Address) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            wallet_address,
            profile_data: None,
            preferences: None,
            created_at: now,
            updated_at: now,
        }
    }
}
