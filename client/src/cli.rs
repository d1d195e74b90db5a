use {
    byte_unit::Byte,
    clap::Parser,
    filecrypt_protocol::UploadKey,
    std::path::PathBuf,
    url::Url,
};

/// Encrypts a file for use with the filecrypt server and prints the generated download link.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct Cli {
    pub infile: PathBuf,
    /// Config file location (default: `<config dir>/filecrypt.json5`).
    #[clap(short, long)]
    pub config: Option<PathBuf>,
    /// Base URL of the download link (also a config option).
    #[clap(short, long)]
    pub base_url: Option<Url>,
    /// Download filename (default: same as the input filename).
    #[clap(short, long)]
    pub filename: Option<String>,
    /// Directory for the encrypted file (default: current directory).
    #[clap(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Hide progress.
    #[clap(short, long, overrides_with = "progress")]
    pub no_progress: bool,
    /// Show progress (default, also a config option).
    #[clap(short, long, overrides_with = "no_progress")]
    pub progress: bool,
    /// Upload the encrypted file to the server and remove the local copy.
    #[clap(short, long)]
    pub upload: bool,
    /// Upload key (also a config option).
    #[clap(short, long)]
    pub api_key: Option<UploadKey>,
    /// Size of a single upload request, e.g. "10 MB".
    #[clap(long)]
    pub upload_chunk_size: Option<Byte>,
    /// Attempts per upload request before giving up (default: retry forever).
    #[clap(long)]
    pub max_retries: Option<usize>,
}

impl Cli {
    /// Progress setting requested on the command line, if any.
    #[must_use]
    pub fn progress_override(&self) -> Option<bool> {
        if self.no_progress {
            Some(false)
        } else if self.progress {
            Some(true)
        } else {
            None
        }
    }
}
