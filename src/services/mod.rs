pub mod analytics;
pub mod chain;
pub mod gateway;
pub mod generator;
pub mod history;
pub mod ledger;
pub mod store;
pub mod users;
pub mod verifier;

pub use analytics::Analytics;
pub use chain::{ChainClient, ChainError, EthereumChainClient};
pub use gateway::GenerationGateway;
pub use generator::{GenerationError, GenerationService, LlmSettings, OpenAiGenerator};
pub use history::HistoryRepository;
pub use ledger::{EntitlementLedger, LedgerError};
pub use store::{KeyValueStore, MemoryStore, RedisStore, StoreError};
pub use users::UserRepository;
pub use verifier::{PaymentVerifier, VerificationError};
