use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub const DEFAULT_PHONE_COUNTRY_CODE: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthInputError {
    #[error("email must not be empty")]
    EmptyEmail,
    #[error("email must contain a local part and a domain")]
    InvalidEmail,
    #[error("phone number must not be empty")]
    EmptyPhone,
    #[error("phone number must contain 7 to 15 digits")]
    InvalidPhone,
    #[error("verification code must not be empty")]
    EmptyVerificationCode,
    #[error("verification code must contain letters or digits")]
    InvalidVerificationCode,
    #[error("wallet address must not be empty")]
    EmptyWalletAddress,
    #[error("custom identity kind must not be empty")]
    EmptyIdentityKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChainKind {
    Evm,
    Solana,
    Cosmos,
}

impl ChainKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Evm => "EVM",
            Self::Solana => "SOLANA",
            Self::Cosmos => "COSMOS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalWalletInfo {
    pub address: String,
    #[serde(rename = "type")]
    pub chain: ChainKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl ExternalWalletInfo {
    pub fn new(address: &str, chain: ChainKind) -> Result<Self, AuthInputError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(AuthInputError::EmptyWalletAddress);
        }
        Ok(Self {
            address: address.to_string(),
            chain,
            provider: None,
        })
    }
}

/// Who is authenticating. Encoded to and decoded from the wire in exactly one
/// place each: [`Identity::to_wire`] and [`Identity::from_wire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Email(String),
    Phone(String),
    ExternalWallet(ExternalWalletInfo),
    Custom { kind: String, value: String },
}

impl Identity {
    pub fn email(raw: &str) -> Result<Self, AuthInputError> {
        normalize_email(raw).map(Self::Email)
    }

    pub fn phone(raw: &str) -> Result<Self, AuthInputError> {
        normalize_phone(raw, DEFAULT_PHONE_COUNTRY_CODE).map(Self::Phone)
    }

    pub fn external_wallet(address: &str, chain: ChainKind) -> Result<Self, AuthInputError> {
        ExternalWalletInfo::new(address, chain).map(Self::ExternalWallet)
    }

    pub fn custom(kind: &str, value: &str) -> Result<Self, AuthInputError> {
        let kind = kind.trim();
        if kind.is_empty() {
            return Err(AuthInputError::EmptyIdentityKind);
        }
        Ok(Self::Custom {
            kind: kind.to_string(),
            value: value.trim().to_string(),
        })
    }

    pub fn to_wire(&self) -> Value {
        match self {
            Self::Email(email) => json!({ "email": email }),
            Self::Phone(phone) => json!({ "phone": phone }),
            Self::ExternalWallet(wallet) => json!({
                "externalWalletAddress": wallet.address,
                "externalWalletType": wallet.chain.as_str(),
            }),
            Self::Custom { kind, value } => {
                let mut auth = Map::new();
                auth.insert(kind.clone(), Value::String(value.clone()));
                Value::Object(auth)
            }
        }
    }

    /// Identity echoed back by the host, if any.
    pub fn from_wire(
        email: Option<&str>,
        phone: Option<&str>,
        external_wallet: Option<&ExternalWalletInfo>,
    ) -> Option<Self> {
        match (email, phone, external_wallet) {
            (Some(email), _, _) if !email.trim().is_empty() => Some(Self::Email(email.to_string())),
            (_, Some(phone), _) if !phone.trim().is_empty() => Some(Self::Phone(phone.to_string())),
            (_, _, Some(wallet)) => Some(Self::ExternalWallet(wallet.clone())),
            _ => None,
        }
    }
}

pub fn normalize_email(raw: &str) -> Result<String, AuthInputError> {
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(AuthInputError::EmptyEmail);
    }
    match normalized.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(normalized),
        _ => Err(AuthInputError::InvalidEmail),
    }
}

/// Formats a phone number as `+<country code><digits>`. Numbers without a
/// leading `+` get `default_country_code`.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> Result<String, AuthInputError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AuthInputError::EmptyPhone);
    }

    let digits = trimmed
        .chars()
        .filter(|ch| ch.is_ascii_digit())
        .collect::<String>();
    let full = if trimmed.starts_with('+') {
        digits
    } else {
        let country = default_country_code.trim_start_matches('+');
        if digits.starts_with(country) && digits.len() > 10 {
            digits
        } else {
            format!("{country}{digits}")
        }
    };

    if !(7..=15).contains(&full.len()) {
        return Err(AuthInputError::InvalidPhone);
    }
    Ok(format!("+{full}"))
}

pub fn normalize_verification_code(raw: &str) -> Result<String, AuthInputError> {
    let collapsed = raw.split_whitespace().collect::<String>();
    if collapsed.is_empty() {
        return Err(AuthInputError::EmptyVerificationCode);
    }

    let digits_only = collapsed
        .chars()
        .filter(|ch| ch.is_ascii_digit())
        .collect::<String>();
    if digits_only.len() == 6 {
        return Ok(digits_only);
    }

    let alnum = collapsed
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .collect::<String>();
    if alnum.is_empty() {
        return Err(AuthInputError::InvalidVerificationCode);
    }

    Ok(alnum)
}
