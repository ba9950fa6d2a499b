use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use qeltrix::{
    descriptor_for, AeadAlgo, Compression, ContentDerived, EngineError, Mode, PackConfig, Packer,
    RsaOaep, Seeker, SourceHint, Unpacker,
};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};

#[derive(Parser)]
#[command(name = "qltx", version = "0.1.0", about = "The .qltx content-derived-keying container CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Logging verbosity, e.g. "qeltrix=debug"
    #[arg(long, global = true, default_value = "qeltrix=info")]
    log: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a file into a .qltx container
    Pack {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Container format version, 1-4
        #[arg(long, default_value = "2")]
        version: u8,
        /// Block size in bytes
        #[arg(long, default_value = "1048576")]
        block_size: u32,
        /// Compression: lz4, zstd, none
        #[arg(short, long, default_value = "zstd")]
        compression: String,
        /// AEAD algo: chacha20, aes256
        #[arg(short, long, default_value = "chacha20")]
        algo: String,
        /// Key-derivation mode: two_pass, single_pass
        #[arg(long, default_value = "two_pass")]
        mode: String,
        /// For single_pass mode: how many leading bytes seed the key
        #[arg(long, default_value = "65536")]
        head_bytes: u64,
        /// Disable deterministic block permutation
        #[arg(long)]
        no_permute: bool,
        /// Recipient RSA public key (PEM) — switches to RSA-OAEP transport (V3 only)
        #[arg(long)]
        recipient_public_key: Option<PathBuf>,
        /// Worker threads (defaults to available parallelism)
        #[arg(long)]
        workers: Option<usize>,
        /// Directory for the two-pass pipeline's staged block temp files
        /// (defaults to the platform temp directory)
        #[arg(long)]
        tempdir: Option<PathBuf>,
    },
    /// Unpack a .qltx container
    Unpack {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Original input, required to re-derive a content-derived key
        #[arg(long)]
        source: Option<PathBuf>,
        /// Recipient RSA private key (PEM), for RSA-OAEP containers
        #[arg(long)]
        recipient_private_key: Option<PathBuf>,
        /// Skip the global ciphertext hash verification pass
        #[arg(long)]
        no_verify: bool,
    },
    /// Read a byte range out of a .qltx container without full decryption
    Seek {
        input: PathBuf,
        #[arg(long)]
        offset: u64,
        #[arg(long)]
        length: u64,
        #[arg(long)]
        source: Option<PathBuf>,
        #[arg(long)]
        recipient_private_key: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = tracing_subscriber::EnvFilter::try_new(&cli.log)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("qeltrix=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("qltx: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(command: Commands) -> Result<(), EngineError> {
    match command {
        Commands::Pack {
            input,
            output,
            version,
            block_size,
            compression,
            algo,
            mode,
            head_bytes,
            no_permute,
            recipient_public_key,
            workers,
            tempdir,
        } => {
            let descriptor = descriptor_for(version)
                .ok_or_else(|| EngineError::Usage(format!("unsupported version {version}")))?;
            let compression = Compression::from_name(&compression)
                .ok_or_else(|| EngineError::Usage(format!("unknown compression '{compression}'")))?;
            let algo = AeadAlgo::from_name(&algo)
                .ok_or_else(|| EngineError::Usage(format!("unknown algo '{algo}'")))?;
            let mode = match mode.as_str() {
                "two_pass" => Mode::TwoPass,
                "single_pass" => Mode::SinglePassFirstN { head_bytes },
                other => return Err(EngineError::Usage(format!("unknown mode '{other}'"))),
            };
            let workers = workers.unwrap_or_else(|| {
                std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
            });

            let config = PackConfig {
                version: descriptor,
                block_size,
                compression,
                algo,
                permute: !no_permute,
                mode,
                workers,
                tempdir,
            };

            match recipient_public_key {
                Some(path) => {
                    let pem = std::fs::read_to_string(&path)?;
                    let public_key = rsa::RsaPublicKey::from_pkcs1_pem(&pem)
                        .or_else(|_| rsa::RsaPublicKey::from_public_key_pem(&pem))
                        .map_err(|e| EngineError::Usage(format!("invalid public key: {e}")))?;
                    let transport = RsaOaep::for_packing(public_key);
                    let packer = Packer::new(config, &transport);
                    packer.pack_file(&input, &output)?;
                }
                None => {
                    let transport = ContentDerived;
                    let packer = Packer::new(config, &transport);
                    packer.pack_file(&input, &output)?;
                }
            }
            println!("packed {} -> {}", input.display(), output.display());
            Ok(())
        }

        Commands::Unpack { input, output, source, recipient_private_key, no_verify } => {
            let source_bytes = source.as_ref().map(std::fs::read).transpose()?;
            let source_hint = match &source_bytes {
                Some(bytes) => SourceHint::Full(bytes),
                None => SourceHint::None,
            };

            let file = std::fs::File::open(&input)?;
            let mut reader = std::io::BufReader::new(file);

            let raw = match recipient_private_key {
                Some(path) => {
                    let pem = std::fs::read_to_string(&path)?;
                    let private_key = rsa::RsaPrivateKey::from_pkcs1_pem(&pem)
                        .or_else(|_| rsa::RsaPrivateKey::from_pkcs8_pem(&pem))
                        .map_err(|e| EngineError::Usage(format!("invalid private key: {e}")))?;
                    let transport = RsaOaep::for_unpacking(private_key);
                    let mut unpacker = Unpacker::new(&transport);
                    unpacker.verify_global_hash = !no_verify;
                    unpacker.unpack_reader(&mut reader, source_hint)?
                }
                None => {
                    let transport = ContentDerived;
                    let mut unpacker = Unpacker::new(&transport);
                    unpacker.verify_global_hash = !no_verify;
                    unpacker.unpack_reader(&mut reader, source_hint)?
                }
            };
            std::fs::write(&output, &raw)?;
            println!("unpacked {} -> {}", input.display(), output.display());
            Ok(())
        }

        Commands::Seek { input, offset, length, source, recipient_private_key } => {
            let source_bytes = source.as_ref().map(std::fs::read).transpose()?;
            let source_hint = match &source_bytes {
                Some(bytes) => SourceHint::Full(bytes),
                None => SourceHint::None,
            };

            let file = std::fs::File::open(&input)?;
            let mut reader = std::io::BufReader::new(file);

            let window = match recipient_private_key {
                Some(path) => {
                    let pem = std::fs::read_to_string(&path)?;
                    let private_key = rsa::RsaPrivateKey::from_pkcs1_pem(&pem)
                        .or_else(|_| rsa::RsaPrivateKey::from_pkcs8_pem(&pem))
                        .map_err(|e| EngineError::Usage(format!("invalid private key: {e}")))?;
                    let transport = RsaOaep::for_unpacking(private_key);
                    let seeker = Seeker::new(&transport);
                    seeker.read_range(&mut reader, offset, length, source_hint)?
                }
                None => {
                    let transport = ContentDerived;
                    let seeker = Seeker::new(&transport);
                    seeker.read_range(&mut reader, offset, length, source_hint)?
                }
            };
            use std::io::Write;
            std::io::stdout().write_all(&window)?;
            Ok(())
        }
    }
}
