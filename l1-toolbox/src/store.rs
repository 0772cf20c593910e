//! File-backed session store.
//!
//! One JSON document per key under the store directory, each wrapped as
//! `{"version": 1, "value": ...}`.
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use avalanche_types::key::secp256k1::private_key::Key;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    candidate::ValidatorCandidate,
    errors::{Error, Result},
};

pub const SCHEMA_VERSION: u32 = 1;

pub const VALIDATORS_KEY: &str = "addValidator_validators";
pub const RELAYER_PRIVATE_KEY_KEY: &str = "icm-relayer-private-key";

#[derive(Debug, Serialize, Deserialize)]
struct Versioned<T> {
    version: u32,
    value: T,
}

#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    /// Opens (creating if needed) the store directory.
    pub fn open(dir: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        log::info!("opened store at '{dir}'");
        Ok(Self {
            dir: PathBuf::from(dir),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let p = self.path(key);
        if !p.exists() {
            return Ok(None);
        }
        let b = fs::read(&p)?;
        let doc: Versioned<serde_json::Value> = serde_json::from_slice(&b)
            .map_err(|e| Error::Store(format!("malformed document '{key}' ({e})")))?;
        if doc.version != SCHEMA_VERSION {
            return Err(Error::Store(format!(
                "document '{key}' has schema version {} (expected {SCHEMA_VERSION})",
                doc.version
            )));
        }
        let v = serde_json::from_value(doc.value)
            .map_err(|e| Error::Store(format!("malformed value of '{key}' ({e})")))?;
        Ok(Some(v))
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let doc = Versioned {
            version: SCHEMA_VERSION,
            value,
        };
        let d = serde_json::to_vec_pretty(&doc)?;

        // atomic replace
        let p = self.path(key);
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        let mut f = File::create(&tmp)?;
        f.write_all(&d)?;
        f.sync_all()?;
        fs::rename(&tmp, &p)?;
        log::debug!("wrote '{key}' to {}", p.display());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let p = self.path(key);
        if p.exists() {
            fs::remove_file(&p)?;
            log::info!("removed '{key}'");
        }
        Ok(())
    }

    pub fn load_validators(&self) -> Result<Vec<ValidatorCandidate>> {
        Ok(self.read(VALIDATORS_KEY)?.unwrap_or_default())
    }

    pub fn save_validators(&self, validators: &[ValidatorCandidate]) -> Result<()> {
        self.write(VALIDATORS_KEY, &validators)
    }

    pub fn clear_validators(&self) -> Result<()> {
        self.remove(VALIDATORS_KEY)
    }

    /// Returns the session relayer key, generating one on first use.
    pub fn relayer_private_key(&self) -> Result<String> {
        if let Some(k) = self.read::<String>(RELAYER_PRIVATE_KEY_KEY)? {
            return Ok(k);
        }
        let k = Key::generate()
            .map_err(|e| Error::Store(format!("failed to generate relayer key ({e})")))?;
        let hex = k.to_hex();
        self.write(RELAYER_PRIVATE_KEY_KEY, &hex)?;
        log::info!("generated a new relayer key");
        Ok(hex)
    }

    pub fn clear_relayer_private_key(&self) -> Result<()> {
        self.remove(RELAYER_PRIVATE_KEY_KEY)
    }
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- store::test_validators_round_trip --exact --show-output
#[test]
fn test_validators_round_trip() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().to_str().unwrap()).unwrap();
    assert!(store.load_validators().unwrap().is_empty());

    let mut big = crate::candidate::sample_candidate();
    big.validator_weight = u64::MAX;
    big.validator_balance = 9_007_199_254_740_993; // above 2^53
    big.stake_amount = Some(u128::MAX);
    let validators = vec![crate::candidate::sample_candidate(), big];

    store.save_validators(&validators).unwrap();
    assert_eq!(store.load_validators().unwrap(), validators);

    // big integers are stored as strings
    let raw = fs::read_to_string(dir.path().join("addValidator_validators.json")).unwrap();
    assert!(raw.contains("\"18446744073709551615\""));
    assert!(raw.contains("\"version\": 1"));

    store.clear_validators().unwrap();
    assert!(store.load_validators().unwrap().is_empty());
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- store::test_schema_errors --exact --show-output
#[test]
fn test_schema_errors() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().to_str().unwrap()).unwrap();

    fs::write(
        dir.path().join("addValidator_validators.json"),
        r#"{"version": 2, "value": []}"#,
    )
    .unwrap();
    assert!(matches!(store.load_validators(), Err(Error::Store(_))));

    fs::write(dir.path().join("addValidator_validators.json"), "not json").unwrap();
    assert!(matches!(store.load_validators(), Err(Error::Store(_))));
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- store::test_relayer_key --exact --show-output
#[test]
fn test_relayer_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().to_str().unwrap()).unwrap();

    let k1 = store.relayer_private_key().unwrap();
    let k2 = store.relayer_private_key().unwrap();
    assert_eq!(k1, k2);
    assert!(Key::from_hex(&k1).is_ok());

    store.clear_relayer_private_key().unwrap();
    let k3 = store.relayer_private_key().unwrap();
    assert_ne!(k1, k3);
}
