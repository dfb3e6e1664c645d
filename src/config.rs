use std::fs;
use std::path::PathBuf;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::FieldAliases;
use crate::error::IdseqError;

pub const DEFAULT_URL: &str = "https://idseq.net";
pub const DEFAULT_MAX_PART_SIZE_IN_MB: u64 = 5000;
pub const BYTES_PER_MB: u64 = 1_000_000;
pub const CONFIG_FILE_NAME: &str = "idseq.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub upload_chunk_size_mb: Option<u64>,
    #[serde(default)]
    pub aliases: AliasConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AliasConfig {
    #[serde(default)]
    pub collection_location: Vec<String>,
    #[serde(default)]
    pub host_genome: Vec<String>,
    #[serde(default)]
    pub sample_name: Vec<String>,
}

/// Values that take precedence over the config file, lowest first: environment, then flags.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub url: Option<String>,
    pub email: Option<String>,
    pub token: Option<String>,
    pub upload_chunk_size_mb: Option<u64>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            url: non_empty_env("IDSEQ_URL"),
            email: non_empty_env("IDSEQ_EMAIL"),
            token: non_empty_env("IDSEQ_TOKEN"),
            upload_chunk_size_mb: None,
        }
    }

    /// Fields set on `self` win over `fallback`.
    pub fn or(self, fallback: Overrides) -> Self {
        Self {
            url: self.url.or(fallback.url),
            email: self.email.or(fallback.email),
            token: self.token.or(fallback.token),
            upload_chunk_size_mb: self.upload_chunk_size_mb.or(fallback.upload_chunk_size_mb),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Aliases {
    pub collection_location: FieldAliases,
    pub host_genome: FieldAliases,
    pub sample_name: FieldAliases,
}

impl Default for Aliases {
    fn default() -> Self {
        Self {
            collection_location: FieldAliases::collection_location(),
            host_genome: FieldAliases::host_genome(),
            sample_name: FieldAliases::sample_name(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub url: String,
    pub email: Option<String>,
    pub token: Option<String>,
    pub max_part_size: u64,
    pub aliases: Aliases,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>, flags: Overrides) -> Result<ResolvedConfig, IdseqError> {
        let config = match path {
            Some(path) => Self::read(PathBuf::from(path))?,
            None => match Self::implicit_path() {
                Some(path) => Self::read(path)?,
                None => Config::default(),
            },
        };
        Self::resolve_config(config, flags.or(Overrides::from_env()))
    }

    pub fn resolve_config(
        config: Config,
        overrides: Overrides,
    ) -> Result<ResolvedConfig, IdseqError> {
        let chunk_mb = overrides
            .upload_chunk_size_mb
            .or(config.upload_chunk_size_mb)
            .unwrap_or(DEFAULT_MAX_PART_SIZE_IN_MB);
        if chunk_mb == 0 {
            return Err(IdseqError::ConfigParse(
                "upload chunk size must be at least 1 MB".to_string(),
            ));
        }

        let mut aliases = Aliases::default();
        aliases
            .collection_location
            .extend(config.aliases.collection_location);
        aliases.host_genome.extend(config.aliases.host_genome);
        aliases.sample_name.extend(config.aliases.sample_name);

        let url = overrides
            .url
            .or(config.url)
            .unwrap_or_else(|| DEFAULT_URL.to_string());

        Ok(ResolvedConfig {
            url: url.trim_end_matches('/').to_string(),
            email: overrides.email.or(config.email),
            token: overrides.token.or(config.token),
            max_part_size: chunk_mb * BYTES_PER_MB,
            aliases,
        })
    }

    fn read(path: PathBuf) -> Result<Config, IdseqError> {
        let content = fs::read_to_string(&path).map_err(|_| IdseqError::ConfigRead(path.clone()))?;
        serde_json::from_str(&content).map_err(|err| IdseqError::ConfigParse(err.to_string()))
    }

    fn implicit_path() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("idseq").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_config() {
        let resolved = ConfigLoader::resolve_config(Config::default(), Overrides::default()).unwrap();
        assert_eq!(resolved.url, DEFAULT_URL);
        assert_eq!(resolved.max_part_size, 5_000_000_000);
        assert!(resolved.email.is_none());
    }
}
