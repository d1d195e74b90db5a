use {
    anyhow::{Context as _, Result, format_err},
    byte_unit::Byte,
    derivative::Derivative,
    filecrypt_protocol::{UploadKey, util::deserialize_byte_size},
    filecrypt_sdk::client::DEFAULT_UPLOAD_CHUNK_SIZE,
    serde::{Deserialize, Serialize},
    std::{
        path::{Path, PathBuf},
        time::Duration,
    },
    url::Url,
};

const CONFIG_FILE_NAME: &str = "filecrypt.json5";

#[derive(Derivative, Clone, Serialize, Deserialize)]
#[derivative(Debug)]
#[serde(default)]
pub struct Config {
    pub base_url: Option<Url>,
    #[derivative(Debug = "ignore")]
    pub api_key: Option<UploadKey>,
    pub output_dir: Option<PathBuf>,
    #[serde(deserialize_with = "deserialize_byte_size")]
    pub upload_chunk_size: Byte,
    pub max_retries: Option<usize>,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    pub progress: bool,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            output_dir: None,
            upload_chunk_size: Byte::from(DEFAULT_UPLOAD_CHUNK_SIZE),
            max_retries: None,
            retry_delay: Duration::from_secs(1),
            progress: true,
            log_filter: "info".into(),
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| format_err!("cannot find config dir"))?;
    Ok(config_dir.join(CONFIG_FILE_NAME))
}

impl Config {
    pub fn parse(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        json5::from_str(&fs_err::read_to_string(path)?)
            .with_context(|| format!("invalid config file {path:?}"))
    }

    /// Loads the given config file, or the default one if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::parse(path);
        }
        let path = default_config_path()?;
        if path.try_exists()? {
            Self::parse(path)
        } else {
            Ok(Self::default())
        }
    }
}
