pub mod cli;
pub mod config;
pub mod term;

use {
    crate::{cli::Cli, config::Config, term::Progress},
    anyhow::{Context as _, Result, ensure},
    filecrypt_protocol::{UploadKey, util::maybe_block_in_place},
    filecrypt_sdk::{
        client::{Client, UploadOptions},
        crypto::{DEFAULT_CHUNK_SIZE, generate},
    },
    std::path::{Path, PathBuf},
    tracing::info,
    url::Url,
};

/// Settings for one run, after merging the command line over the config file.
#[derive(Debug, Clone)]
pub struct Options {
    pub base_url: Url,
    pub filename: String,
    pub output_dir: PathBuf,
    pub progress: bool,
    /// Present if the encrypted file should be uploaded.
    pub upload_key: Option<UploadKey>,
    pub upload: UploadOptions,
}

impl Options {
    pub fn new(cli: &Cli, config: &Config) -> Result<Self> {
        let base_url = cli
            .base_url
            .clone()
            .or_else(|| config.base_url.clone())
            .context("missing base URL, use --base-url or set `base_url` in config")?;
        let filename = if let Some(filename) = &cli.filename {
            filename.clone()
        } else {
            default_filename(&cli.infile)?
        };
        ensure!(!filename.is_empty(), "download filename cannot be empty");
        let upload_key = if cli.upload {
            Some(
                cli.api_key
                    .clone()
                    .or_else(|| config.api_key.clone())
                    .context("upload key is required for --upload")?,
            )
        } else {
            None
        };
        let chunk_size = cli
            .upload_chunk_size
            .unwrap_or(config.upload_chunk_size)
            .as_u64();
        ensure!(chunk_size > 0, "upload chunk size must be positive");
        Ok(Self {
            base_url,
            filename,
            output_dir: cli
                .output_dir
                .clone()
                .or_else(|| config.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from(".")),
            progress: cli.progress_override().unwrap_or(config.progress),
            upload_key,
            upload: UploadOptions {
                chunk_size: usize::try_from(chunk_size)?,
                max_retries: cli.max_retries.or(config.max_retries),
                retry_delay: config.retry_delay,
            },
        })
    }
}

fn default_filename(infile: &Path) -> Result<String> {
    let name = infile
        .file_name()
        .with_context(|| format!("{infile:?} has no file name"))?
        .to_str()
        .context("input filename is not valid UTF-8, use --filename")?;
    Ok(name.to_owned())
}

/// Encrypts `cli.infile`, prints the download link and uploads the result if requested.
#[expect(clippy::print_stdout, reason = "the download link is the output")]
pub async fn run(cli: Cli, config: Config) -> Result<()> {
    let options = Options::new(&cli, &config)?;
    ensure!(
        maybe_block_in_place(|| cli.infile.is_file()),
        "{:?} is not a file",
        cli.infile
    );

    let client = Client::new(options.base_url.clone())?;
    let (file_id, token, key) = generate(&options.filename)?;
    let url = client.download_url(
        &file_id,
        &token.display_unmasked().to_string(),
        &options.filename,
    )?;
    println!("{url}");

    let size = fs_err::metadata(&cli.infile)?.len();
    let path = {
        let mut progress = Progress::new("Encrypting", size, options.progress);
        maybe_block_in_place(|| {
            key.encrypt_file(&cli.infile, &options.output_dir, DEFAULT_CHUNK_SIZE, |n| {
                progress.advance(n);
            })
        })?
    };
    info!(?path, "encrypted");

    if let Some(upload_key) = &options.upload_key {
        let total = fs_err::metadata(&path)?.len();
        let mut progress = Progress::new("Uploading", total, options.progress);
        client
            .upload_file(&path, &file_id, upload_key, &options.upload, |n| {
                progress.advance(n);
            })
            .await?;
    }
    Ok(())
}
