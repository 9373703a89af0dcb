//! HealthVault - CLI
//!
//! Offline helpers around the envelope and tag formats: key generation,
//! tag encoding, thumbnail identifiers and payload inspection.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};

use healthvault::attachment::{content_hash, Resolution, ThumbnailIdentity};
use healthvault::config::DEFAULT_THUMBNAIL_MARKER;
use healthvault::payload;
use healthvault::tag_encoder::{format_query, search_candidates, upload_tags, TagEncoder, SEARCH_ENCODINGS};
use healthvault::tagging::TagGroup;
use healthvault::thumbs::{ImageResizer, ThumbnailEngine};
use healthvault_crypto::{
    CryptoService, KeyExchangeFormat, KeyPair, KeyType, MemoryStore, DEFAULT_KEY_PAIR_TAG,
};

#[derive(Parser)]
#[command(name = "healthvault")]
#[command(version = healthvault::VERSION)]
#[command(about = "HealthVault - client-side encrypted health records")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a key in exchange format
    Keygen {
        #[arg(value_enum)]
        kind: KeyKind,
    },

    /// Encode tags for upload or search
    EncodeTags {
        /// `key=value`, repeatable
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Free-text annotation, repeatable
        #[arg(short, long = "annotation")]
        annotations: Vec<String>,

        /// Emit a search query instead of upload tags
        #[arg(short, long)]
        search: bool,

        /// Tag encryption key in exchange format; output is encrypted
        #[arg(long)]
        tek: Option<String>,
    },

    /// Pack a thumbnail identifier
    PackThumb {
        full: String,
        medium: String,
        small: String,

        #[arg(long, default_value = DEFAULT_THUMBNAIL_MARKER)]
        marker: String,
    },

    /// Parse a thumbnail identifier
    ParseThumb {
        value: String,

        #[arg(short, long, value_enum)]
        resolution: Option<ResolutionArg>,
    },

    /// Show hash, detected type and size of a payload
    Hash {
        path: PathBuf,
    },

    /// Render a rendition of an image
    Resize {
        input: PathBuf,
        output: PathBuf,

        /// Longest edge in pixels
        #[arg(short, long, default_value_t = 200)]
        size: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KeyKind {
    Data,
    Attachment,
    Tag,
    Common,
    Keypair,
}

#[derive(Clone, Copy, ValueEnum)]
enum ResolutionArg {
    Full,
    Medium,
    Small,
}

impl From<ResolutionArg> for Resolution {
    fn from(arg: ResolutionArg) -> Self {
        match arg {
            ResolutionArg::Full => Resolution::Full,
            ResolutionArg::Medium => Resolution::Medium,
            ResolutionArg::Small => Resolution::Small,
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Keygen { kind } => {
            let key_type = match kind {
                KeyKind::Data => KeyType::Data,
                KeyKind::Attachment => KeyType::Attachment,
                KeyKind::Tag => KeyType::Tag,
                KeyKind::Common => KeyType::Common,
                KeyKind::Keypair => {
                    let pair = KeyPair::generate(DEFAULT_KEY_PAIR_TAG, 2048)?;
                    println!("{}", serde_json::to_string(&KeyExchangeFormat::from_key(&pair.public)?)?);
                    println!("{}", serde_json::to_string(&KeyExchangeFormat::from_key(&pair.private)?)?);
                    return Ok(());
                }
            };
            let key = healthvault_crypto::Key::generate(key_type)?;
            println!("{}", serde_json::to_string(&KeyExchangeFormat::from_key(&key)?)?);
        }

        Commands::EncodeTags {
            tags,
            annotations,
            search,
            tek,
        } => {
            let mut group = TagGroup::new();
            for tag in &tags {
                let Some((key, value)) = tag.split_once('=') else {
                    bail!("tag {:?} is not key=value", tag);
                };
                group.insert(key, value);
            }
            group.set_annotations(&annotations)?;

            let encoder = match tek {
                Some(json) => {
                    let key = KeyExchangeFormat::decode_key(json.as_bytes())
                        .context("could not read tag encryption key")?;
                    if key.key_type != KeyType::Tag {
                        bail!("expected a tag encryption key");
                    }
                    let crypto = Arc::new(CryptoService::new(Arc::new(MemoryStore::new()), DEFAULT_KEY_PAIR_TAG));
                    crypto.set_tag_key(Some(key));
                    Some(TagEncoder::new(crypto))
                }
                None => None,
            };

            match (search, encoder) {
                (true, Some(encoder)) => println!("{}", encoder.search_query(&group)?),
                (true, None) => println!("{}", format_query(&search_candidates(&group, SEARCH_ENCODINGS)?)),
                (false, Some(encoder)) => {
                    for tag in encoder.encode_for_upload(&group)? {
                        println!("{}", tag);
                    }
                }
                (false, None) => {
                    for tag in upload_tags(&group)? {
                        println!("{}", tag);
                    }
                }
            }
        }

        Commands::PackThumb {
            full,
            medium,
            small,
            marker,
        } => {
            println!("{}", ThumbnailIdentity::new(&marker, &full, &medium, &small));
        }

        Commands::ParseThumb { value, resolution } => {
            let identity = ThumbnailIdentity::parse(&value)?;
            match resolution {
                Some(resolution) => println!("{}", identity.select(resolution.into())),
                None => {
                    println!("marker: {}", identity.marker);
                    println!("full:   {}", identity.full);
                    println!("medium: {}", identity.medium);
                    println!("small:  {}", identity.small);
                }
            }
        }

        Commands::Hash { path } => {
            let data = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            println!("hash: {}", content_hash(&data));
            println!("type: {}", payload::detect_mime(&data));
            println!("size: {}", data.len());
        }

        Commands::Resize { input, output, size } => {
            let data = std::fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
            let resized = ThumbnailEngine::new().resize(&data, size)?;
            std::fs::write(&output, &resized)?;
            println!("Wrote {} ({} bytes)", output.display(), resized.len());
        }
    }

    Ok(())
}
