use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    filecrypt_protocol::UploadKey,
};

#[derive(Debug, Parser)]
#[clap(version, about = "Manages upload keys of a filecrypt server")]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Generates a new upload key. Add it to `upload_keys` in the server config.
    GenerateKey,
    /// Prints the public id of an existing upload key.
    KeyId { key: UploadKey },
}

#[expect(clippy::print_stdout, reason = "command output")]
fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::GenerateKey => {
            let key = UploadKey::generate();
            println!("Upload key: {}", key.as_unmasked_str());
            println!("Key id: {}", key.key_id());
        }
        Command::KeyId { key } => {
            println!("{}", key.key_id());
        }
    }
    Ok(())
}
