use ethers_core::types::H256;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// EIP-1193 "user rejected request".
pub const USER_REJECTED_CODE: i64 = 4001;

/// Classified wallet failures, each with a fixed operator-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletErrorKind {
    Rejected,
    InsufficientFunds,
    NonceConflict,
    WrongNetwork,
    Other,
}

/// Backing errors for all lifecycle operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("wallet error ({kind:?}): {message}")]
    Wallet {
        kind: WalletErrorKind,
        message: String,
    },
    #[error("transaction 0x{tx_hash:x} reverted: {reason}")]
    Reverted { tx_hash: H256, reason: String },
    #[error("failed to decode {what}: {message}")]
    Decode { what: String, message: String },
    #[error("failed API: {message}")]
    Api { message: String, is_retryable: bool },
    #[error("timed out waiting for {what} after {attempts} attempts")]
    Timeout { what: String, attempts: usize },
    #[error("failed store: {0}")]
    Store(String),
    #[error("failed for other reasons: {message}")]
    Other { message: String, is_retryable: bool },
}

impl Error {
    pub fn decode(what: &str, message: impl Into<String>) -> Self {
        Error::Decode {
            what: what.to_string(),
            message: message.into(),
        }
    }

    pub fn api(message: impl Into<String>, is_retryable: bool) -> Self {
        Error::Api {
            message: message.into(),
            is_retryable,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Error::Other {
            message: message.into(),
            is_retryable: false,
        }
    }

    /// Returns the error message in "String".
    #[inline]
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Error::Validation(message) | Error::Store(message) => message.clone(),
            Error::Wallet { message, .. }
            | Error::Api { message, .. }
            | Error::Other { message, .. }
            | Error::Decode { message, .. } => message.clone(),
            Error::Reverted { reason, .. } => reason.clone(),
            Error::Timeout { .. } => self.to_string(),
        }
    }

    /// Returns if the error is retryable.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Api { is_retryable, .. } | Error::Other { is_retryable, .. } => *is_retryable,
            Error::Wallet { kind, .. } => *kind == WalletErrorKind::NonceConflict,
            Error::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Marks an API failure retryable. For idempotent reads polled with backoff.
    #[must_use]
    pub fn into_retryable_api(self) -> Self {
        match self {
            Error::Api { message, .. } => Error::Api {
                message,
                is_retryable: true,
            },
            other => other,
        }
    }

    /// Returns the message shown to the operator for a failed step.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Error::Wallet { kind, message } => match kind {
                WalletErrorKind::Rejected => String::from("Transaction rejected by user"),
                WalletErrorKind::InsufficientFunds => {
                    String::from("Insufficient funds for transaction")
                }
                WalletErrorKind::NonceConflict => {
                    String::from("Transaction nonce error. Please try again.")
                }
                WalletErrorKind::WrongNetwork => {
                    String::from("Wrong network. Please switch your wallet network.")
                }
                WalletErrorKind::Other => format!("Transaction failed: {message}"),
            },
            Error::Reverted { reason, .. } => format!("Transaction reverted: {reason}"),
            Error::Validation(message) => message.clone(),
            _ => format!("Transaction failed: {}", self.message()),
        }
    }
}

/// Maps a raw wallet/RPC failure to a typed error by its code and message text.
pub fn classify_wallet_error(code: Option<i64>, message: &str) -> Error {
    let lower = message.to_lowercase();
    let kind = if code == Some(USER_REJECTED_CODE)
        || lower.contains("user rejected")
        || lower.contains("user denied")
    {
        WalletErrorKind::Rejected
    } else if lower.contains("insufficient funds") {
        WalletErrorKind::InsufficientFunds
    } else if lower.contains("nonce") {
        WalletErrorKind::NonceConflict
    } else if lower.contains("chain id") || lower.contains("wrong network") {
        WalletErrorKind::WrongNetwork
    } else {
        WalletErrorKind::Other
    };
    Error::Wallet {
        kind,
        message: message.to_string(),
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::api(
            format!("failed HTTP request {e}"),
            e.is_timeout() || e.is_connect(),
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::decode("JSON", e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    }
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- errors::test_classify_wallet_error --exact --show-output
#[test]
fn test_classify_wallet_error() {
    let e = classify_wallet_error(Some(4001), "MetaMask Tx Signature: User denied");
    assert_eq!(e.user_message(), "Transaction rejected by user");

    let e = classify_wallet_error(None, "user rejected the request");
    assert_eq!(e.user_message(), "Transaction rejected by user");

    let e = classify_wallet_error(Some(-32000), "insufficient funds for gas * price + value");
    assert_eq!(e.user_message(), "Insufficient funds for transaction");

    let e = classify_wallet_error(Some(-32000), "nonce too low");
    assert_eq!(e.user_message(), "Transaction nonce error. Please try again.");
    assert!(e.is_retryable());

    let e = classify_wallet_error(None, "execution reverted");
    assert_eq!(e.user_message(), "Transaction failed: execution reverted");

    let e = Error::Reverted {
        tx_hash: H256::zero(),
        reason: String::from("InvalidNodeID(0x00)"),
    };
    assert_eq!(e.user_message(), "Transaction reverted: InvalidNodeID(0x00)");
    assert!(!e.into_retryable_api().is_retryable());

    let e = Error::api("platform.getTxStatus failed (-32000: not found)", false);
    assert!(!e.is_retryable());
    assert!(e.into_retryable_api().is_retryable());
}
