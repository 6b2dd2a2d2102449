use crate::models::{GenerationEntry, ServiceType};
use crate::services::store::{self, KeyValueStore, StoreError};
use ethers::types::Address;
use std::sync::Arc;

const MAX_ENTRIES_PER_SERVICE: usize = 50;

/// Recent generations per wallet, newest first.
pub struct HistoryRepository {
    store: Arc<dyn KeyValueStore>,
}

fn history_key(wallet: Address, service: ServiceType) -> String {
    format!("history:{:?}:{}", wallet, service)
}

impl HistoryRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, wallet: Address, entry: GenerationEntry) -> Result<(), StoreError> {
        let key = history_key(wallet, entry.service_type);
        store::update::<Vec<GenerationEntry>, _>(self.store.as_ref(), &key, |mut entries| {
            entries.insert(0, entry.clone());
            entries.truncate(MAX_ENTRIES_PER_SERVICE);
            entries
        })
        .await?;
        Ok(())
    }

    pub async fn list(
        &self,
        wallet: Address,
        service: Option<ServiceType>,
    ) -> Result<Vec<GenerationEntry>, StoreError> {
        let services = match service {
            Some(service) => vec![service],
            None => ServiceType::ALL.to_vec(),
        };

        let mut entries = Vec::new();
        for service in services {
            let key = history_key(wallet, service);
            if let Some((_, stored)) = store::load::<Vec<GenerationEntry>>(self.store.as_ref(), &key).await? {
                entries.extend(stored);
            }
        }

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BioInputs, GeneratedContent, ServiceInputs, TransactionReference};
    use crate::services::store::MemoryStore;
    use chrono::{Duration, Utc};
    use ethers::types::H256;
    use uuid::Uuid;

    fn entry(service: ServiceType, minutes_ago: i64) -> GenerationEntry {
        GenerationEntry {
            generation_id: Uuid::new_v4(),
            service_type: service,
            transaction_hash: TransactionReference::new(H256::random()),
            inputs: ServiceInputs::Bio(BioInputs {
                interests: vec!["tea".to_string()],
                personality_traits: vec!["calm".to_string()],
                looking_for: "friendship".to_string(),
                age: None,
            }),
            content: GeneratedContent::Bios(vec!["bio".to_string()]),
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_filterable() {
        let history = HistoryRepository::new(Arc::new(MemoryStore::new()));
        let wallet = Address::repeat_byte(0x10);

        history.record(wallet, entry(ServiceType::BioGeneration, 10)).await.unwrap();
        history.record(wallet, entry(ServiceType::DateIdeaGeneration, 5)).await.unwrap();
        history.record(wallet, entry(ServiceType::BioGeneration, 1)).await.unwrap();

        let all = history.list(wallet, None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|pair| pair[0].created_at >= pair[1].created_at));

        let bios = history.list(wallet, Some(ServiceType::BioGeneration)).await.unwrap();
        assert_eq!(bios.len(), 2);

        let other = history.list(Address::repeat_byte(0x11), None).await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let history = HistoryRepository::new(Arc::new(MemoryStore::new()));
        let wallet = Address::repeat_byte(0x12);

        for _ in 0..(MAX_ENTRIES_PER_SERVICE + 5) {
            history.record(wallet, entry(ServiceType::BioGeneration, 0)).await.unwrap();
        }

        let entries = history.list(wallet, Some(ServiceType::BioGeneration)).await.unwrap();
        assert_eq!(entries.len(), MAX_ENTRIES_PER_SERVICE);
    }
}
