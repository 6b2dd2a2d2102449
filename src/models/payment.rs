use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Hash of a submitted transaction, as claimed by the client.
///
/// Always rendered in canonical form: `0x` followed by 64 lower-case hex
/// characters. That form is also the storage key, so two spellings of the same
/// hash can never produce two payment records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionReference(H256);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid transaction hash: {0}")]
pub struct InvalidReference(String);

impl TransactionReference {
    pub fn new(hash: H256) -> Self {
        Self(hash)
    }

    pub fn hash(&self) -> H256 {
        self.0
    }
}

impl FromStr for TransactionReference {
    type Err = InvalidReference;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| InvalidReference(format!("{} (missing 0x prefix)", trimmed)))?;

        if digits.len() != 64 {
            return Err(InvalidReference(format!(
                "{} (expected 64 hex characters, got {})",
                trimmed,
                digits.len()
            )));
        }

        let bytes = hex::decode(digits).map_err(|e| InvalidReference(format!("{} ({})", trimmed, e)))?;
        Ok(Self(H256::from_slice(&bytes)))
    }
}

impl TryFrom<String> for TransactionReference {
    type Error = InvalidReference;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TransactionReference> for String {
    fn from(reference: TransactionReference) -> Self {
        reference.to_string()
    }
}

impl fmt::Display for TransactionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.as_bytes()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceType {
    #[serde(rename = "bio")]
    BioGeneration,
    #[serde(rename = "dateIdeas", alias = "date-ideas")]
    DateIdeaGeneration,
}

impl ServiceType {
    pub const ALL: [ServiceType; 2] = [ServiceType::BioGeneration, ServiceType::DateIdeaGeneration];

    /// Wire name, also used in storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::BioGeneration => "bio",
            ServiceType::DateIdeaGeneration => "dateIdeas",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ServiceType::BioGeneration => "Bio Generation",
            ServiceType::DateIdeaGeneration => "Date Ideas Generation",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown service type: {0}")]
pub struct UnknownServiceType(String);

impl FromStr for ServiceType {
    type Err = UnknownServiceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "bio" => Ok(ServiceType::BioGeneration),
            "dateIdeas" | "date-ideas" => Ok(ServiceType::DateIdeaGeneration),
            other => Err(UnknownServiceType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePrice {
    pub amount_wei: U256,
    pub currency: &'static str,
    pub recipient: Address,
}

/// Fixed price and recipient for every [`ServiceType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTable {
    bio: ServicePrice,
    date_ideas: ServicePrice,
}

impl PriceTable {
    pub fn new(recipient: Address, bio_wei: U256, date_ideas_wei: U256) -> Self {
        Self {
            bio: ServicePrice {
                amount_wei: bio_wei,
                currency: "ETH",
                recipient,
            },
            date_ideas: ServicePrice {
                amount_wei: date_ideas_wei,
                currency: "ETH",
                recipient,
            },
        }
    }

    pub fn price(&self, service: ServiceType) -> &ServicePrice {
        match service {
            ServiceType::BioGeneration => &self.bio,
            ServiceType::DateIdeaGeneration => &self.date_ideas,
        }
    }

    /// Payments for every service go to the same wallet.
    pub fn recipient(&self) -> Address {
        self.bio.recipient
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Verified,
    Rejected,
}

/// Why a transaction does not pay for the requested service.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum PaymentRejection {
    #[error("Insufficient payment amount: {observed} wei < {required} wei")]
    InsufficientAmount { required: U256, observed: U256 },

    #[error("Invalid recipient address: expected {expected:?}, got {actual:?}")]
    WrongRecipient {
        expected: Address,
        actual: Option<Address>,
    },

    #[error("Transaction was sent by {sender:?}, not {claimed:?}")]
    PayerMismatch { claimed: Address, sender: Address },

    #[error("Transaction failed")]
    TransactionFailed,
}

impl PaymentRejection {
    /// Rejections that follow from the transaction alone. Anything else depends
    /// on who claims the payment or for which service, so a later claim may
    /// still succeed.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            PaymentRejection::WrongRecipient { .. } | PaymentRejection::TransactionFailed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub payment_id: Uuid,
    pub transaction_reference: TransactionReference,
    pub payer: Address,
    pub service_type: ServiceType,
    pub amount_observed: U256,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<PaymentRejection>,
}

impl PaymentRecord {
    pub fn pending(reference: TransactionReference, payer: Address, service: ServiceType) -> Self {
        Self {
            payment_id: Uuid::new_v4(),
            transaction_reference: reference,
            payer,
            service_type: service,
            amount_observed: U256::zero(),
            created_at: Utc::now(),
            verified_at: None,
            status: PaymentStatus::Pending,
            rejection: None,
        }
    }

    pub fn verified(&self, payer: Address, service: ServiceType, amount: U256) -> Self {
        Self {
            payer,
            service_type: service,
            amount_observed: amount,
            verified_at: Some(Utc::now()),
            status: PaymentStatus::Verified,
            rejection: None,
            ..self.clone()
        }
    }

    pub fn rejected(&self, amount: U256, rejection: PaymentRejection) -> Self {
        Self {
            amount_observed: amount,
            status: PaymentStatus::Rejected,
            rejection: Some(rejection),
            ..self.clone()
        }
    }

    pub fn is_verified(&self) -> bool {
        self.status == PaymentStatus::Verified
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntitlementState {
    Unconsumed,
    Consumed,
}

/// Single-use credit for one generation, backed by one verified payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub transaction_reference: TransactionReference,
    pub payer: Address,
    pub service_type: ServiceType,
    pub state: EntitlementState,
    pub granted_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl Entitlement {
    pub fn from_payment(record: &PaymentRecord) -> Self {
        Self {
            transaction_reference: record.transaction_reference,
            payer: record.payer,
            service_type: record.service_type,
            state: EntitlementState::Unconsumed,
            granted_at: Utc::now(),
            consumed_at: None,
        }
    }

    pub fn consumed(&self) -> Self {
        Self {
            state: EntitlementState::Consumed,
            consumed_at: Some(Utc::now()),
            ..self.clone()
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.state == EntitlementState::Consumed
    }

    pub fn belongs_to(&self, payer: Address, service: ServiceType) -> bool {
        self.payer == payer && self.service_type == service
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0x00000000000000000000000000000000000000000000000000000000000000aa";

    #[test]
    fn test_reference_parses_to_canonical_form() {
        let upper = "0x00000000000000000000000000000000000000000000000000000000000000AA";
        let reference: TransactionReference = upper.parse().unwrap();
        assert_eq!(reference.to_string(), HASH);
        assert_eq!(reference, HASH.parse().unwrap());
    }

    #[test]
    fn test_reference_rejects_malformed_input() {
        assert!("aa".parse::<TransactionReference>().is_err());
        assert!("0x1234".parse::<TransactionReference>().is_err());
        assert!(HASH.replace("aa", "zz").parse::<TransactionReference>().is_err());
        assert!(HASH.trim_start_matches("0x").parse::<TransactionReference>().is_err());
    }

    #[test]
    fn test_reference_serde_uses_hex_string() {
        let reference: TransactionReference = HASH.parse().unwrap();
        let json = serde_json::to_string(&reference).unwrap();
        assert_eq!(json, format!("\"{}\"", HASH));
        assert!(serde_json::from_str::<TransactionReference>("\"0xnope\"").is_err());
    }

    #[test]
    fn test_service_type_wire_names() {
        assert_eq!(serde_json::to_string(&ServiceType::BioGeneration).unwrap(), "\"bio\"");
        assert_eq!(
            serde_json::from_str::<ServiceType>("\"date-ideas\"").unwrap(),
            ServiceType::DateIdeaGeneration
        );
        assert_eq!("dateIdeas".parse::<ServiceType>().unwrap(), ServiceType::DateIdeaGeneration);
        assert!("horoscope".parse::<ServiceType>().is_err());
    }

    #[test]
    fn test_price_table_lookup() {
        let recipient = Address::repeat_byte(0x42);
        let table = PriceTable::new(recipient, U256::from(10u64), U256::from(5u64));

        assert_eq!(table.price(ServiceType::BioGeneration).amount_wei, U256::from(10u64));
        assert_eq!(table.price(ServiceType::DateIdeaGeneration).amount_wei, U256::from(5u64));
        assert_eq!(table.recipient(), recipient);
    }

    #[test]
    fn test_only_transaction_intrinsic_rejections_are_final() {
        assert!(PaymentRejection::TransactionFailed.is_final());
        assert!(PaymentRejection::WrongRecipient {
            expected: Address::zero(),
            actual: None
        }
        .is_final());
        assert!(!PaymentRejection::InsufficientAmount {
            required: U256::one(),
            observed: U256::zero()
        }
        .is_final());
        assert!(!PaymentRejection::PayerMismatch {
            claimed: Address::zero(),
            sender: Address::repeat_byte(1)
        }
        .is_final());
    }

    #[test]
    fn test_entitlement_consumption_marks_state() {
        let record = PaymentRecord::pending(HASH.parse().unwrap(), Address::zero(), ServiceType::BioGeneration)
            .verified(Address::zero(), ServiceType::BioGeneration, U256::one());
        let entitlement = Entitlement::from_payment(&record);

        assert!(!entitlement.is_consumed());
        let consumed = entitlement.consumed();
        assert!(consumed.is_consumed());
        assert!(consumed.consumed_at.is_some());
        assert!(consumed.belongs_to(Address::zero(), ServiceType::BioGeneration));
        assert!(!consumed.belongs_to(Address::zero(), ServiceType::DateIdeaGeneration));
    }
}
