use anyhow::{Context, Result, anyhow, bail};
use clap::{ArgGroup, Parser};
use keylocker::{ByteSpec, Entropy, Entry, KdfParams, KeyLocker, LockerError, Region, StoreMode};
use std::io::{IsTerminal, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::Zeroizing;

mod auth;

#[derive(Debug, clap::Args)]
struct Argon2Args {
    /// Argon2 memory cost in KiB (default: 262144)
    #[arg(long = "argon-mem")]
    mem_cost_kib: Option<u32>,

    /// Argon2 time cost / iterations (default: 4)
    #[arg(long = "argon-time")]
    time_cost: Option<u32>,

    /// Argon2 parallelism (default: 4)
    #[arg(long = "argon-parallelism")]
    parallelism: Option<u32>,
}

impl Argon2Args {
    fn to_kdf_params(&self) -> Result<KdfParams> {
        let default = KdfParams::default();

        KdfParams::new(
            self.mem_cost_kib.unwrap_or(default.mem_cost_kib()),
            self.time_cost.unwrap_or(default.time_cost()),
            self.parallelism.unwrap_or(default.parallelism()),
        )
    }
}

#[derive(Debug, Parser)]
#[command(name = "keylocker")]
#[command(
    version,
    about = "Deniable key vault hidden in the free space of a disk or file.",
    after_help = "The KeyFile carries no header: every parameter given here \
                  (offset, length, --extended, Argon2 costs) must be repeated \
                  identically on later runs."
)]
#[command(group(ArgGroup::new("mode").required(true).args(["create", "write", "read", "wipe"])))]
struct Cli {
    /// KeyFile target: a regular file or a block device
    keyfile: PathBuf,

    /// Device identifier bound into key derivation (omit for text entries)
    #[arg(default_value = "")]
    device: String,

    /// Optional label stored with the entry, e.g. the mapper name to
    /// recreate on read
    label: Option<String>,

    /// Byte offset of the KeyFile inside the target
    #[arg(long, value_name = "SPEC")]
    offset: Option<String>,

    /// Length of the KeyFile region (or its endpoint when negative)
    #[arg(long, value_name = "SPEC")]
    length: Option<String>,

    /// Initialize the region as a fresh KeyFile full of random bytes
    #[arg(long)]
    create: bool,

    /// Store an entry
    #[arg(long)]
    write: bool,

    /// Recover an entry
    #[arg(long)]
    read: bool,

    /// Destroy the KeyFile by overwriting it with random bytes
    #[arg(long)]
    wipe: bool,

    /// Allow --create to overwrite an existing regular file
    #[arg(long)]
    force: bool,

    /// Shamir parameters as SHARES/THRESHOLD (default 7/4)
    #[arg(long, value_name = "N/T", conflicts_with = "plain")]
    shamir: Option<String>,

    /// Store plain copies instead of Shamir shares
    #[arg(long, value_name = "COPIES", num_args = 0..=1, default_missing_value = "3")]
    plain: Option<u8>,

    /// Double-size slots, for 512-bit XTS keys and long device names
    #[arg(long)]
    extended: bool,

    /// Start of the hidden data on DEVICE
    #[arg(long, value_name = "SPEC")]
    hidden_start: Option<String>,

    /// Length of the hidden data on DEVICE
    #[arg(long, value_name = "SPEC")]
    hidden_length: Option<String>,

    /// Text payload to store with the entry
    #[arg(long)]
    text: Option<String>,

    /// Store this cipher key instead of generating one
    #[arg(long, value_name = "HEX")]
    key_hex: Option<String>,

    /// Length of a generated cipher key in bytes
    #[arg(long, default_value_t = 32)]
    key_bytes: usize,

    /// Password attempts in interactive read mode
    #[arg(long, default_value_t = 3)]
    tries: u32,

    #[command(flatten)]
    argon2: Argon2Args,
}

fn main() {
    let args = Cli::parse();
    if let Err(err) = run(args) {
        eprintln!("Error: {err:#}");
        std::process::exit(exit_code(&err));
    }
}

/// 1 = no entry recovered, 2 = usage, 3 = I/O.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(locker) = err.downcast_ref::<LockerError>() {
        return match locker {
            LockerError::Usage(_) => 2,
            _ => 1,
        };
    }
    if err.downcast_ref::<std::io::Error>().is_some() {
        return 3;
    }
    1
}

fn run(args: Cli) -> Result<()> {
    let kdf = args.argon2.to_kdf_params()?;
    let offset = args.offset.as_deref().map(ByteSpec::parse).transpose()?;
    let length = args.length.as_deref().map(ByteSpec::parse).transpose()?;

    let mut entropy = Entropy::new()?;
    mix_timing_jitter(&mut entropy);

    if args.create {
        prepare_create_target(&args, length.as_ref())?;
    }

    let writable = args.create || args.write || args.wipe;
    let region = Region::open(&args.keyfile, offset.as_ref(), length.as_ref(), writable)?;

    if args.create {
        let locker = KeyLocker::create(region, kdf, args.extended, entropy)?;
        println!(
            "KeyFile initialized: {} slots of {} bytes",
            locker.slot_count(),
            locker.slot_size()
        );
        return Ok(());
    }

    if args.wipe {
        let mut locker = KeyLocker::open(region, kdf, args.extended, entropy)?;
        locker.wipe(3)?;
        println!("KeyFile overwritten with random data.");
        println!("Note: flash storage may retain remapped sectors; only physical");
        println!("destruction guarantees erasure.");
        return Ok(());
    }

    if args.write {
        let (entry, generated) = build_entry(&args, &mut entropy)?;
        let password = auth::read_password_with_confirmation().map_err(usage)?;

        let mut locker = KeyLocker::open(region, kdf, args.extended, entropy)?;
        locker.put(&password, &args.device, &entry, store_mode(&args)?)?;

        if generated {
            // shown once: the caller needs it now to set up the hidden data
            println!("generated key: {}", hex::encode(&entry.key[..]));
        }
        println!("entry stored");
        return Ok(());
    }

    // read mode
    let mut locker = KeyLocker::open(region, kdf, args.extended, entropy)?;
    let interactive = std::io::stdin().is_terminal();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let password = auth::read_password().map_err(usage)?;
        match locker.get(&password, &args.device) {
            Ok(entry) => {
                print_entry(&entry);
                return Ok(());
            }
            Err(err) => {
                let retryable = matches!(
                    err.downcast_ref::<LockerError>(),
                    Some(LockerError::NoEntry)
                );
                if retryable && interactive && attempt < args.tries {
                    eprintln!("Try {attempt} - no entry was recovered\n");
                    continue;
                }
                return Err(err);
            }
        }
    }
}

fn usage(err: anyhow::Error) -> anyhow::Error {
    anyhow!(LockerError::Usage(format!("{err}")))
}

fn mix_timing_jitter(entropy: &mut Entropy) {
    if let Ok(now) = SystemTime::now().duration_since(UNIX_EPOCH) {
        entropy.mix(&now.subsec_nanos().to_le_bytes());
        entropy.mix(&now.as_secs().to_le_bytes());
    }
}

/// A new KeyFile in a regular file needs the file to exist first; block
/// devices and existing files are only size-checked.
fn prepare_create_target(args: &Cli, length: Option<&ByteSpec>) -> Result<()> {
    if args.keyfile.exists() {
        let meta = std::fs::metadata(&args.keyfile)?;
        if meta.is_file() && !args.force {
            bail!(LockerError::Usage(format!(
                "{} already exists; pass --force to overwrite it",
                args.keyfile.display()
            )));
        }
        return Ok(());
    }

    let size = match length {
        Some(ByteSpec::Bytes(v)) if *v > 0 => *v as u64,
        _ => {
            bail!(LockerError::Usage(
                "creating a new file needs an absolute --length".into()
            ))
        }
    };

    let file = std::fs::File::create(&args.keyfile)
        .with_context(|| format!("cannot create {}", args.keyfile.display()))?;
    file.set_len(size)?;
    Ok(())
}

fn store_mode(args: &Cli) -> Result<StoreMode> {
    if let Some(copies) = args.plain {
        return Ok(StoreMode::Plain { copies });
    }
    match args.shamir.as_deref() {
        None => Ok(StoreMode::default()),
        Some(spec) => {
            let parsed = spec.split_once('/').and_then(|(n, t)| {
                Some((n.trim().parse::<u8>().ok()?, t.trim().parse::<u8>().ok()?))
            });
            match parsed {
                Some((shares, threshold)) => Ok(StoreMode::Shamir { shares, threshold }),
                None => Err(LockerError::Usage(format!(
                    "--shamir expects N/T, got '{spec}'"
                ))
                .into()),
            }
        }
    }
}

fn build_entry(args: &Cli, entropy: &mut Entropy) -> Result<(Entry, bool)> {
    let has_range = args.hidden_start.is_some() || args.hidden_length.is_some();
    let text = args.text.as_deref().or(args.label.as_deref());

    if !has_range {
        match text {
            Some(text) => return Ok((Entry::text(text), false)),
            None => bail!(LockerError::Usage(
                "--write needs --hidden-start and --hidden-length, or --text".into()
            )),
        }
    }

    let (start_spec, length_spec) = match (&args.hidden_start, &args.hidden_length) {
        (Some(s), Some(l)) => (ByteSpec::parse(s)?, ByteSpec::parse(l)?),
        _ => bail!(LockerError::Usage(
            "--hidden-start and --hidden-length go together".into()
        )),
    };

    // partition-relative and end-relative specs resolve now; the entry
    // stores only absolute bytes
    let total = device_total(&args.device).unwrap_or(u64::MAX);
    let start = start_spec.resolve_offset(total)?;
    let length = length_spec.resolve_length(total, start)?;

    let (key, generated) = match args.key_hex.as_deref() {
        Some(spec) => {
            let key = hex::decode(spec.trim())
                .map_err(|e| LockerError::Usage(format!("bad --key-hex: {e}")))?;
            (Zeroizing::new(key), false)
        }
        None => (entropy.random(args.key_bytes)?, true),
    };

    let entry = Entry {
        device: args.device.clone(),
        start,
        length,
        key,
        text: Zeroizing::new(text.unwrap_or_default().to_string()),
    };
    Ok((entry, generated))
}

/// Size of the named device, when the identifier is an openable path.
fn device_total(device: &str) -> Option<u64> {
    if device.is_empty() {
        return None;
    }
    let mut file = std::fs::File::open(device).ok()?;
    file.seek(SeekFrom::End(0)).ok()
}

fn print_entry(entry: &Entry) {
    if !entry.device.is_empty() || entry.length > 0 {
        println!("device: {}", entry.device);
        println!("start:  {}", entry.start);
        println!("length: {}", entry.length);
    }
    if !entry.key.is_empty() {
        println!("key:    {}", hex::encode(&entry.key[..]));
    }
    if !entry.text.is_empty() {
        println!("text:   {}", *entry.text);
    }
}
