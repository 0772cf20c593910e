//! Warp signature aggregation.
use std::time::Duration;

use async_trait::async_trait;
use primitive_types::H256;
use serde::{Deserialize, Serialize};

use crate::{
    errors::{Error, Result},
    pchain::format_id,
    warp::SignedMessage,
};

pub const DEFAULT_QUORUM_PERCENTAGE: u8 = 67;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRequest {
    pub unsigned_message: Vec<u8>,
    pub justification: Vec<u8>,
    pub signing_subnet_id: H256,
    pub quorum_percentage: u8,
}

/// Output of one aggregation, consumed by the next submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureArtifact {
    pub unsigned_message: Vec<u8>,
    pub signed_message: Vec<u8>,
    pub quorum_percentage: u8,
}

impl SignatureArtifact {
    /// Checks that "signed_message" signs exactly "unsigned_message".
    pub fn verify_envelope(&self) -> Result<()> {
        let signed = SignedMessage::from_bytes(&self.signed_message)?;
        if signed.unsigned.to_bytes()? != self.unsigned_message {
            return Err(Error::decode(
                "signed message",
                "aggregator signed a different message",
            ));
        }
        Ok(())
    }
}

#[async_trait]
pub trait SignatureAggregator: Send + Sync {
    async fn aggregate(&self, req: &AggregateRequest) -> Result<SignatureArtifact>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AggregateBody {
    message: String,
    justification: String,
    signing_subnet_id: String,
    quorum_percentage: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregateResponse {
    signed_message: String,
}

/// Aggregation service over HTTP (e.g., the Data API signature aggregator).
pub struct HttpAggregator {
    client: reqwest::Client,
    url: String,
}

impl HttpAggregator {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl SignatureAggregator for HttpAggregator {
    async fn aggregate(&self, req: &AggregateRequest) -> Result<SignatureArtifact> {
        let body = AggregateBody {
            message: hex::encode(&req.unsigned_message),
            justification: hex::encode(&req.justification),
            signing_subnet_id: format_id(&req.signing_subnet_id),
            quorum_percentage: req.quorum_percentage,
        };
        log::info!(
            "aggregating signatures for {} byte(s) at {}% of subnet {}",
            req.unsigned_message.len(),
            req.quorum_percentage,
            body.signing_subnet_id
        );

        let resp = self.client.post(&self.url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::api(
                format!("signature aggregation returned {status}: {text}"),
                status.is_server_error(),
            ));
        }
        let parsed: AggregateResponse = resp.json().await?;
        let signed_message = hex::decode(parsed.signed_message.trim_start_matches("0x"))
            .map_err(|e| Error::decode("signed message", e.to_string()))?;

        let artifact = SignatureArtifact {
            unsigned_message: req.unsigned_message.clone(),
            signed_message,
            quorum_percentage: req.quorum_percentage,
        };
        artifact.verify_envelope()?;
        Ok(artifact)
    }
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- aggregator::test_verify_envelope --exact --show-output
#[test]
fn test_verify_envelope() {
    use crate::warp::UnsignedMessage;

    let unsigned = UnsignedMessage::new(5, H256::repeat_byte(0x01), vec![0x01]);
    let signed = SignedMessage {
        unsigned: unsigned.clone(),
        signers: vec![0x03],
        signature: vec![0xaa; crate::warp::message::BLS_SIGNATURE_LEN],
    };
    let mut artifact = SignatureArtifact {
        unsigned_message: unsigned.to_bytes().unwrap(),
        signed_message: signed.to_bytes().unwrap(),
        quorum_percentage: DEFAULT_QUORUM_PERCENTAGE,
    };
    assert!(artifact.verify_envelope().is_ok());

    artifact.unsigned_message = UnsignedMessage::new(1, H256::zero(), vec![0x01])
        .to_bytes()
        .unwrap();
    assert!(artifact.verify_envelope().is_err());

    let body = serde_json::to_value(AggregateBody {
        message: String::from("00"),
        justification: String::new(),
        signing_subnet_id: format_id(&H256::zero()),
        quorum_percentage: 67,
    })
    .unwrap();
    assert_eq!(body["quorumPercentage"], 67);
    assert!(body.get("signingSubnetId").is_some());
}
