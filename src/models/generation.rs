use crate::models::{ServiceType, TransactionReference};
use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BioInputs {
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub personality_traits: Vec<String>,
    #[serde(default)]
    pub looking_for: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
}

impl BioInputs {
    pub fn validate(&self) -> Result<(), String> {
        if !has_entries(&self.interests) {
            return Err("Please add at least one interest".to_string());
        }
        if !has_entries(&self.personality_traits) {
            return Err("Please add at least one personality trait".to_string());
        }
        if self.looking_for.trim().is_empty() {
            return Err("Please describe what you're looking for".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateIdeaInputs {
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub vibe: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<String>,
}

impl DateIdeaInputs {
    pub fn validate(&self) -> Result<(), String> {
        if !has_entries(&self.interests) {
            return Err("Please add at least one interest".to_string());
        }
        if self.location.trim().is_empty() {
            return Err("Please enter your location".to_string());
        }
        if self.vibe.trim().is_empty() {
            return Err("Please describe your desired date vibe".to_string());
        }
        Ok(())
    }
}

fn has_entries(values: &[String]) -> bool {
    values.iter().any(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ServiceInputs {
    Bio(BioInputs),
    DateIdeas(DateIdeaInputs),
}

impl ServiceInputs {
    pub fn service_type(&self) -> ServiceType {
        match self {
            ServiceInputs::Bio(_) => ServiceType::BioGeneration,
            ServiceInputs::DateIdeas(_) => ServiceType::DateIdeaGeneration,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            ServiceInputs::Bio(inputs) => inputs.validate(),
            ServiceInputs::DateIdeas(inputs) => inputs.validate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateIdeaItem {
    pub title: String,
    pub description: String,
    pub category: String,
    pub estimated_cost: String,
    pub duration: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GeneratedContent {
    Bios(Vec<String>),
    DateIdeas(Vec<DateIdeaItem>),
}

/// One paid generation, alive only for the duration of a gateway call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub requestor: Address,
    pub inputs: ServiceInputs,
    pub transaction_reference: Option<TransactionReference>,
}

impl GenerationRequest {
    pub fn service_type(&self) -> ServiceType {
        self.inputs.service_type()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStage {
    Received,
    PaymentChecked,
    EntitlementConsumed,
    Generated,
    Completed,
}

impl GenerationStage {
    pub fn next(self) -> Option<GenerationStage> {
        match self {
            GenerationStage::Received => Some(GenerationStage::PaymentChecked),
            GenerationStage::PaymentChecked => Some(GenerationStage::EntitlementConsumed),
            GenerationStage::EntitlementConsumed => Some(GenerationStage::Generated),
            GenerationStage::Generated => Some(GenerationStage::Completed),
            GenerationStage::Completed => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub generation_id: Uuid,
    #[serde(flatten)]
    pub content: GeneratedContent,
    pub transaction_hash: TransactionReference,
    pub service_type: ServiceType,
}

/// Stored history item for a wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationEntry {
    pub generation_id: Uuid,
    pub service_type: ServiceType,
    pub transaction_hash: TransactionReference,
    pub inputs: ServiceInputs,
    pub content: GeneratedContent,
    pub created_at: DateTime<Utc>,
}
