use std::{
    fs::{self, File},
    io::{self, Error, ErrorKind, Write},
    path::Path,
};

use l1_toolbox::{
    aggregator::DEFAULT_QUORUM_PERCENTAGE, confirm::Backoff, phases::Settings,
};
use serde::{Deserialize, Serialize};

pub const VERSION: u32 = 1;

/// Default config file path.
pub fn default_path() -> String {
    format!("{}/.l1-toolbox/config.yaml", home_dir())
}

fn home_dir() -> String {
    dirs::home_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| String::from("."))
}

/// Signature aggregator of the Avalanche Data API for "network_id".
pub fn default_aggregator_url(network_id: u32) -> String {
    let network = if network_id == 1 { "mainnet" } else { "fuji" };
    format!("https://glacier-api.avax.network/v1/signatureAggregator/{network}/aggregateSignatures")
}

/// Defines the operator configuration.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    pub version: u32,
    pub network_id: u32,

    /// Node endpoint serving "/ext/bc/P" and "/ext/bc/C/avax".
    pub pchain_rpc_url: String,
    /// EVM RPC of the chain hosting the validator manager.
    pub evm_rpc_url: String,
    /// Read from "evm_rpc_url" when not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm_chain_id: Option<u64>,

    pub aggregator_url: String,
    /// Wallet service that signs and issues P-Chain transactions.
    pub wallet_url: String,

    /// Hex-encoded key of the EVM sender. Overridden by "--evm-private-key".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm_private_key: Option<String>,

    pub store_dir: String,
    pub quorum_percentage: u8,

    /// Polling of EVM receipts.
    pub receipt_poll: Backoff,
    /// Polling of P-Chain commits.
    pub pchain_poll: Backoff,
}

impl Default for Config {
    fn default() -> Self {
        Self::default()
    }
}

impl Config {
    pub fn default() -> Self {
        Self {
            version: VERSION,
            network_id: 5,
            pchain_rpc_url: String::from("https://api.avax-test.network"),
            evm_rpc_url: String::from("https://api.avax-test.network/ext/bc/C/rpc"),
            evm_chain_id: None,
            aggregator_url: default_aggregator_url(5),
            wallet_url: String::from("http://127.0.0.1:9660/ext/wallet"),
            evm_private_key: None,
            store_dir: format!("{}/.l1-toolbox/store", home_dir()),
            quorum_percentage: DEFAULT_QUORUM_PERCENTAGE,
            receipt_poll: Backoff::default(),
            pchain_poll: Backoff::default(),
        }
    }

    /// Converts to YAML.
    pub fn encode_yaml(&self) -> io::Result<String> {
        serde_yaml::to_string(&self).map_err(|e| {
            Error::new(
                ErrorKind::Other,
                format!("failed to serialize Config to YAML {}", e),
            )
        })
    }

    /// Saves the current config to disk and overwrites the file.
    pub fn sync(&self, file_path: &str) -> io::Result<()> {
        log::info!("syncing Config to '{}'", file_path);
        let path = Path::new(file_path);
        if let Some(parent_dir) = path.parent() {
            log::info!("creating parent dir '{}'", parent_dir.display());
            fs::create_dir_all(parent_dir)?;
        }

        let d = self.encode_yaml()?;
        let mut f = File::create(file_path)?;
        f.write_all(d.as_bytes())?;
        Ok(())
    }

    pub fn load(file_path: &str) -> io::Result<Self> {
        log::info!("loading Config from {}", file_path);

        if !Path::new(file_path).exists() {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("file {} does not exists (run 'default-config' first)", file_path),
            ));
        }

        let f = File::open(file_path).map_err(|e| {
            Error::new(
                ErrorKind::Other,
                format!("failed to open {} ({})", file_path, e),
            )
        })?;
        serde_yaml::from_reader(f)
            .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("invalid YAML: {}", e)))
    }

    /// Validates the config.
    pub fn validate(&self) -> io::Result<()> {
        log::info!("validating Config");

        if self.version != VERSION {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("unsupported config version {} (expected {VERSION})", self.version),
            ));
        }
        for (name, v) in [
            ("pchain_rpc_url", &self.pchain_rpc_url),
            ("evm_rpc_url", &self.evm_rpc_url),
            ("aggregator_url", &self.aggregator_url),
            ("wallet_url", &self.wallet_url),
        ] {
            if !v.starts_with("http://") && !v.starts_with("https://") {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!("{name} '{v}' is not an HTTP URL"),
                ));
            }
        }
        if self.store_dir.is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput, "empty store_dir"));
        }
        if self.quorum_percentage == 0 || self.quorum_percentage > 100 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "quorum_percentage {} must be within (0, 100]",
                    self.quorum_percentage
                ),
            ));
        }
        for (name, b) in [("receipt_poll", &self.receipt_poll), ("pchain_poll", &self.pchain_poll)] {
            if b.max_attempts == 0 || b.multiplier == 0 {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!("{name} needs positive max_attempts and multiplier"),
                ));
            }
        }
        Ok(())
    }

    /// Phase settings derived from the config.
    pub fn settings(&self) -> Settings {
        Settings {
            network_id: self.network_id,
            quorum_percentage: self.quorum_percentage,
            receipt_backoff: self.receipt_poll.clone(),
            pchain_backoff: self.pchain_poll.clone(),
        }
    }

    /// Returns the EVM key, preferring "flag" over the config.
    pub fn evm_private_key(&self, flag: Option<&String>) -> io::Result<String> {
        match flag.or(self.evm_private_key.as_ref()) {
            Some(k) if !k.is_empty() => Ok(k.clone()),
            _ => Err(Error::new(
                ErrorKind::InvalidInput,
                "no EVM private key (set evm_private_key or --evm-private-key)",
            )),
        }
    }
}

/// RUST_LOG=debug cargo test --package l1-toolbox-cli --bin l1-toolbox -- config::test_config --exact --show-output
#[test]
fn test_config() {
    let _ = env_logger::builder().is_test(true).try_init();

    let contents = r#"
version: 1
network_id: 1
pchain_rpc_url: https://api.avax.network
evm_rpc_url: http://localhost:9650/ext/bc/2u9Hu7Noja3Z1kbZyrztTVV1o4Bo2Qv3zU5Wx2ZDuNUGJ7RRRq/rpc
evm_chain_id: 99999
aggregator_url: https://glacier-api.avax.network/v1/signatureAggregator/mainnet/aggregateSignatures
wallet_url: http://127.0.0.1:9660/ext/wallet
store_dir: /tmp/l1-toolbox-store
quorum_percentage: 80
receipt_poll:
  initial: 500
  max: 4000
  multiplier: 2
  max_attempts: 10
pchain_poll:
  initial: 1000
  max: 15000
  multiplier: 2
  max_attempts: 20
"#;
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    let cfg = Config::load(f.path().to_str().unwrap()).unwrap();
    cfg.validate().unwrap();
    assert_eq!(cfg.evm_chain_id, Some(99999));
    assert!(cfg.evm_private_key.is_none());

    let settings = cfg.settings();
    assert_eq!(settings.network_id, 1);
    assert_eq!(settings.quorum_percentage, 80);
    assert_eq!(
        settings.receipt_backoff.initial,
        std::time::Duration::from_millis(500)
    );

    // flag wins over the file
    assert!(cfg.evm_private_key(None).is_err());
    let flag = String::from("56289e99c94b6912bfc12adc093c9b51124f0dc54ac7a766b2bc5ccf558d8027");
    assert_eq!(cfg.evm_private_key(Some(&flag)).unwrap(), flag);

    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("nested").join("config.yaml");
    let p = p.to_str().unwrap();
    cfg.sync(p).unwrap();
    assert_eq!(Config::load(p).unwrap(), cfg);

    let mut bad = cfg.clone();
    bad.quorum_percentage = 101;
    assert!(bad.validate().is_err());
    let mut bad = cfg;
    bad.wallet_url = String::from("127.0.0.1:9660");
    assert!(bad.validate().is_err());

    assert!(Config::default().validate().is_ok());
    assert!(Config::load("/nonexistent/config.yaml").is_err());
}
