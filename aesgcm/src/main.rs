#![warn(clippy::all, clippy::pedantic)]

use aesgcm_io::{Algorithm, EncryptedReader, EncryptedWriter, WriterConfig};
use anyhow::{ensure, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::exit;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Encrypt and decrypt files as streams of authenticated chunks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Hex-encoded key. 16, 24 or 32 bytes for AES-GCM, 32 bytes for ChaCha20-Poly1305
    #[arg(short, long, env = "AESGCM_KEY", hide_env_values = true)]
    key: String,

    /// Log filter to use when RUST_LOG isn't set
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    operation: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a file, or stdin
    Encrypt {
        /// Read plaintext from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Write ciphertext to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Plaintext bytes per chunk. 0 uses the default of 512
        #[arg(short, long, default_value_t = 0)]
        chunk_size: usize,

        #[arg(short, long, value_enum, default_value_t = Cipher::AesGcm)]
        algorithm: Cipher,
    },

    /// Decrypt a file, or stdin
    Decrypt {
        /// Read ciphertext from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Write plaintext to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Encrypt random bytes in memory, decrypt them again and compare
    Demo {
        /// Number of random plaintext bytes
        #[arg(default_value_t = 1096)]
        size: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Cipher {
    AesGcm,
    Chacha20Poly1305,
}

impl From<Cipher> for Algorithm {
    fn from(cipher: Cipher) -> Self {
        match cipher {
            Cipher::AesGcm => Algorithm::AesGcm,
            Cipher::Chacha20Poly1305 => Algorithm::ChaCha20Poly1305,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let key = hex::decode(cli.key.trim()).unwrap_or_else(|err| {
        eprintln!("Key must be hex-encoded: {err}");
        exit(1)
    });

    let result = match cli.operation {
        Commands::Encrypt {
            input,
            output,
            chunk_size,
            algorithm,
        } => {
            let config = WriterConfig {
                chunk_size,
                algorithm: algorithm.into(),
            };
            encrypt(input, output, &key, config).await
        }
        Commands::Decrypt { input, output } => decrypt(input, output, &key).await,
        Commands::Demo { size } => demo(size, &key).await,
    };

    if let Err(err) = result {
        eprintln!("{err:#}");
        exit(1)
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_input(path: Option<PathBuf>) -> anyhow::Result<Box<dyn AsyncRead + Send + Unpin>> {
    Ok(match path {
        Some(path) => Box::new(
            File::open(&path)
                .await
                .with_context(|| format!("Couldn't open '{}'", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    })
}

async fn open_output(
    path: Option<PathBuf>,
) -> anyhow::Result<Box<dyn AsyncWrite + Send + Unpin>> {
    Ok(match path {
        Some(path) => Box::new(
            File::create(&path)
                .await
                .with_context(|| format!("Couldn't create '{}'", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    })
}

async fn encrypt(
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    key: &[u8],
    config: WriterConfig,
) -> anyhow::Result<()> {
    let mut input = open_input(input).await?;
    let output = open_output(output).await?;

    let mut writer = EncryptedWriter::new(output, key, config)?;
    let bytes = tokio::io::copy(&mut input, &mut writer)
        .await
        .context("Encryption failed")?;
    writer.close().await?;

    info!(bytes, chunks = writer.chunks(), "encrypted stream");
    Ok(())
}

async fn decrypt(input: Option<PathBuf>, output: Option<PathBuf>, key: &[u8]) -> anyhow::Result<()> {
    let input = open_input(input).await?;
    let mut output = open_output(output).await?;

    let mut reader = EncryptedReader::new(input, key).await?;
    let bytes = tokio::io::copy_buf(&mut reader, &mut output)
        .await
        .context("Decryption failed")?;
    output.flush().await?;

    info!(bytes, chunks = reader.chunks(), "decrypted stream");
    Ok(())
}

async fn demo(size: usize, key: &[u8]) -> anyhow::Result<()> {
    let plaintext: Vec<u8> = (0..size).map(|_| rand::random()).collect();
    println!("Plaintext: {}", hex::encode(&plaintext));
    println!("Plaintext Size: {} bytes", plaintext.len());

    let mut writer = EncryptedWriter::new(Vec::new(), key, WriterConfig::default())?;
    writer.write_all(&plaintext).await?;
    writer.close().await?;
    let ciphertext = writer.into_inner();
    println!("Ciphertext: {}", hex::encode(&ciphertext));
    println!("Ciphertext Size: {} bytes", ciphertext.len());

    let mut reader = EncryptedReader::new(&ciphertext[..], key).await?;
    let mut decrypted = Vec::new();
    reader.read_to_end(&mut decrypted).await?;
    println!("Decrypted Size: {} bytes", decrypted.len());

    ensure!(decrypted == plaintext, "Decrypted text doesn't match the plaintext");
    println!("Decrypted text matches the plaintext");
    Ok(())
}
