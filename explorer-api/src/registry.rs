use std::{
    collections::HashSet,
    fs::{self, File},
    io::{self, Error, ErrorKind, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Chain {
    /// EVM chain ID as used in the request path (e.g., "43114").
    pub chain_id: String,
    pub name: String,
    #[serde(default)]
    pub rpc_url: String,
}

/// Chains the explorer serves.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct ChainRegistry {
    pub chains: Vec<Chain>,
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::default()
    }
}

impl ChainRegistry {
    pub fn default() -> Self {
        Self {
            chains: vec![
                Chain {
                    chain_id: String::from("43114"),
                    name: String::from("Avalanche C-Chain"),
                    rpc_url: String::from("https://api.avax.network/ext/bc/C/rpc"),
                },
                Chain {
                    chain_id: String::from("43113"),
                    name: String::from("Avalanche Fuji C-Chain"),
                    rpc_url: String::from("https://api.avax-test.network/ext/bc/C/rpc"),
                },
            ],
        }
    }

    pub fn load(file_path: &str) -> io::Result<Self> {
        log::info!("loading chain registry from {}", file_path);

        if !Path::new(file_path).exists() {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("file {file_path} does not exists"),
            ));
        }

        let f = File::open(file_path)
            .map_err(|e| Error::new(ErrorKind::Other, format!("failed to open {file_path} ({e})")))?;
        serde_yaml::from_reader(f)
            .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("invalid YAML: {e}")))
    }

    pub fn sync(&self, file_path: &str) -> io::Result<()> {
        log::info!("syncing chain registry to '{}'", file_path);
        let path = Path::new(file_path);
        if let Some(parent_dir) = path.parent() {
            fs::create_dir_all(parent_dir)?;
        }

        let d = serde_yaml::to_string(self)
            .map_err(|e| Error::new(ErrorKind::Other, format!("failed to serialize YAML {e}")))?;
        let mut f = File::create(file_path)?;
        f.write_all(d.as_bytes())?;
        Ok(())
    }

    /// Loads "file_path", writing the built-in chains there first when the
    /// file does not exist yet. Without a path the built-in chains are used.
    pub fn load_or_init(file_path: Option<&str>) -> io::Result<Self> {
        match file_path {
            Some(p) if Path::new(p).exists() => Self::load(p),
            Some(p) => {
                log::info!("no chain registry at '{p}', writing the built-in chains");
                let r = Self::default();
                r.sync(p)?;
                Ok(r)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> io::Result<()> {
        log::info!("validating chain registry");

        let mut found = HashSet::new();
        for c in self.chains.iter() {
            if c.chain_id.is_empty() {
                return Err(Error::new(ErrorKind::InvalidInput, "empty chain_id"));
            }
            if !found.insert(c.chain_id.clone()) {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!("duplicate chain_id {}", c.chain_id),
                ));
            }
        }
        Ok(())
    }

    /// Returns the chain only if it has an RPC URL to read from.
    pub fn get(&self, chain_id: &str) -> Option<&Chain> {
        self.chains
            .iter()
            .find(|c| c.chain_id == chain_id && !c.rpc_url.is_empty())
    }
}

/// RUST_LOG=debug cargo test --package explorer-api --bin explorer-api -- registry::test_registry --exact --show-output
#[test]
fn test_registry() {
    let _ = env_logger::builder().is_test(true).try_init();

    let r = ChainRegistry::default();
    assert!(r.validate().is_ok());
    assert_eq!(r.get("43114").unwrap().name, "Avalanche C-Chain");
    assert!(r.get("137").is_none());

    let contents = r#"
chains:
  - chain_id: "43114"
    name: C-Chain
    rpc_url: http://localhost:9650/ext/bc/C/rpc
  - chain_id: "99999"
    name: no-rpc
"#;
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    let loaded = ChainRegistry::load(f.path().to_str().unwrap()).unwrap();
    assert!(loaded.validate().is_ok());
    assert!(loaded.get("43114").is_some());
    // registered without an RPC URL
    assert!(loaded.get("99999").is_none());

    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("nested").join("chains.yaml");
    let p = p.to_str().unwrap();
    loaded.sync(p).unwrap();
    assert_eq!(ChainRegistry::load(p).unwrap(), loaded);

    let mut dup = loaded.clone();
    dup.chains.push(dup.chains[0].clone());
    assert!(dup.validate().is_err());

    // existing file is read as is
    assert_eq!(ChainRegistry::load_or_init(Some(p)).unwrap(), loaded);
    // missing file gets the built-in chains
    let fresh = dir.path().join("fresh").join("chains.yaml");
    let fresh = fresh.to_str().unwrap();
    assert_eq!(ChainRegistry::load_or_init(Some(fresh)).unwrap(), ChainRegistry::default());
    assert_eq!(ChainRegistry::load(fresh).unwrap(), ChainRegistry::default());
    assert_eq!(ChainRegistry::load_or_init(None).unwrap(), ChainRegistry::default());
}
