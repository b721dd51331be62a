// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Command-line utility for managing TCG Opal and Enterprise
//! self-encrypting drives: ownership, locking ranges, MBR shadowing,
//! erase and revert, plus raw diagnostic access to the TPer.

#[cfg(target_os = "linux")]
mod linux;
mod output;

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use clap::Parser;
use clap::Subcommand;

use tcg_storage::Authority;
use tcg_storage::EngineConfig;
use tcg_storage::LockState;
use tcg_storage::RangeLockEnable;
use tcg_storage::SecurityTransport;
use tcg_storage::SedDevice;
use tcg_storage::credential;
use tcg_storage::credential::KdfRegime;
use tcg_storage::credential::PasswordHashing;
use tcg_storage::raw;
use tcg_storage_protocol::Uid;

use output::OutputFormat;

type Device = SedDevice<Box<dyn SecurityTransport>>;

#[derive(Parser, Debug)]
#[command(
    name = "sedutil",
    about = "Self-encrypting drive management utility",
    version,
    long_about = None,
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Output style
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Readable)]
    output: OutputFormat,

    /// Send passwords to the drive verbatim instead of hashing them
    #[arg(long, global = true)]
    no_hash: bool,

    /// Password hashing regime
    #[arg(long, global = true, value_enum, default_value_t = Kdf::Sha1)]
    kdf: Kdf,

    /// Give up on a response after MS milliseconds
    #[arg(long, global = true, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use this ComID instead of the one reported by the drive
    #[arg(long, global = true, value_name = "HEX", value_parser = parse_com_id)]
    com_id: Option<u16>,

    /// Log every request and response at trace level
    #[arg(long, global = true)]
    dump_wire: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Kdf {
    Sha1,
    Sha256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OnOff {
    On,
    Off,
}

impl OnOff {
    fn get(self) -> bool {
        self == OnOff::On
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LockingMode {
    /// Lock reads and writes when locked
    Enabled,
    /// Never lock
    Disabled,
    /// Lock only writes
    WriteOnly,
}

impl From<LockingMode> for RangeLockEnable {
    fn from(mode: LockingMode) -> Self {
        match mode {
            LockingMode::Enabled => RangeLockEnable::ENABLED,
            LockingMode::Disabled => RangeLockEnable::DISABLED,
            LockingMode::WriteOnly => RangeLockEnable::READ_ONLY,
        }
    }
}

fn parse_com_id(s: &str) -> Result<u16, String> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|err| format!("{s:?}: {err}"))
}

fn parse_lock_state(s: &str) -> Result<LockState, String> {
    s.parse().map_err(|err: tcg_storage::Error| err.to_string())
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List block devices and their SSC support
    #[command(name = "scan")]
    Scan,
    /// Print the discovery report and TPer properties
    #[command(name = "query")]
    Query(DeviceArg),
    /// Report whether a device is a supported self-encrypting drive
    #[command(name = "is-valid-sed")]
    IsValidSed(DeviceArg),
    /// Print the factory default SID password (MSID)
    #[command(name = "print-default-password")]
    PrintDefaultPassword(DeviceArg),
    /// Run the PBKDF2 known-answer self test
    #[command(name = "validate-pbkdf2")]
    ValidatePbkdf2,

    /// Set the SID password, authenticating with the MSID
    #[command(name = "take-ownership")]
    TakeOwnership(PasswordArgs),
    /// Change the SID password
    #[command(name = "set-sid-password")]
    SetSidPassword(ChangePasswordArgs),
    /// Activate the Locking SP
    #[command(name = "activate-locking-sp")]
    ActivateLockingSp(PasswordArgs),
    /// Activate the Locking SP with one range in Single User Mode
    #[command(name = "activate-locking-sp-sum")]
    ActivateLockingSpSum(RangePasswordArgs),
    /// Take ownership, activate locking, open the global range and enable
    /// the MBR shadow
    #[command(name = "initial-setup")]
    InitialSetup(PasswordArgs),
    /// Activate Single User Mode for a range and hand it to its owner
    #[command(name = "setup-sum")]
    SetupSum(SetupSumArgs),

    /// Set an authority's password
    #[command(name = "set-password")]
    SetPassword(SetPasswordArgs),
    /// Single User Mode: a range owner changes its own password
    #[command(name = "set-password-sum")]
    SetPasswordSum(SetPasswordSumArgs),
    /// Enable a Locking SP user
    #[command(name = "enable-user")]
    EnableUser(EnableUserArgs),

    /// Lock or unlock a range
    #[command(name = "set-locking-range")]
    SetLockingRange(LockArgs),
    /// Single User Mode: lock or unlock a range as its owner
    #[command(name = "set-locking-range-sum")]
    SetLockingRangeSum(LockArgs),
    /// Enable or disable locking on a range
    #[command(name = "configure-range")]
    ConfigureRange(ConfigureRangeArgs),
    /// Define the bounds of a range and enable locking on it
    #[command(name = "setup-range")]
    SetupRange(SetupRangeArgs),
    /// Single User Mode: define a range as its owner
    #[command(name = "setup-range-sum")]
    SetupRangeSum(SetupRangeArgs),
    /// List locking ranges
    #[command(name = "list-ranges")]
    ListRanges(ListRangesArgs),
    /// Generate a new key for a range, destroying its data
    #[command(name = "rekey")]
    Rekey(RangePasswordArgs),

    /// Enterprise: erase a band as EraseMaster
    #[command(name = "erase-range")]
    EraseRange(RangePasswordArgs),
    /// Single User Mode: erase a range as Admin1
    #[command(name = "erase-range-sum")]
    EraseRangeSum(RangePasswordArgs),
    /// Enterprise: enable BandMaster authorities
    #[command(name = "set-bands-enabled")]
    SetBandsEnabled(BandsArgs),

    /// Set the MBR shadow Done flag
    #[command(name = "set-mbr-done")]
    SetMbrDone(MbrArgs),
    /// Turn MBR shadowing on or off
    #[command(name = "set-mbr-enable")]
    SetMbrEnable(MbrArgs),
    /// Write a pre-boot authentication image to the MBR shadow
    #[command(name = "load-pba")]
    LoadPba(LoadPbaArgs),

    /// Revert the Locking SP as Admin1
    #[command(name = "revert-locking-sp")]
    RevertLockingSp(RevertLockingSpArgs),
    /// Revert the drive to factory state as SID or PSID
    #[command(name = "revert-tper")]
    RevertTper(RevertTperArgs),

    /// Invoke a method on an object and print the raw results
    #[command(name = "raw-cmd")]
    RawCmd(RawCmdArgs),
    /// Read every column of an object
    #[command(name = "obj-dump")]
    ObjDump(ObjDumpArgs),
}

#[derive(Args, Debug)]
struct DeviceArg {
    /// Block device, e.g. /dev/sda or /dev/nvme0n1
    device: PathBuf,
}

#[derive(Args, Debug)]
struct PasswordArgs {
    password: String,
    device: PathBuf,
}

#[derive(Args, Debug)]
struct ChangePasswordArgs {
    old_password: String,
    new_password: String,
    device: PathBuf,
}

#[derive(Args, Debug)]
struct RangePasswordArgs {
    range: u32,
    password: String,
    device: PathBuf,
}

#[derive(Args, Debug)]
struct SetupSumArgs {
    range: u32,
    start: u64,
    length: u64,
    sid_password: String,
    user_password: String,
    device: PathBuf,
}

#[derive(Args, Debug)]
struct SetPasswordArgs {
    /// Password of the authenticating authority
    password: String,
    /// Authority to change, e.g. Admin1, User2, BandMaster0, EraseMaster
    authority: Authority,
    new_password: String,
    device: PathBuf,
}

#[derive(Args, Debug)]
struct SetPasswordSumArgs {
    /// Range owner, e.g. User2
    user: Authority,
    old_password: String,
    new_password: String,
    device: PathBuf,
}

#[derive(Args, Debug)]
struct EnableUserArgs {
    admin_password: String,
    user: Authority,
    device: PathBuf,
}

#[derive(Args, Debug)]
struct LockArgs {
    range: u32,
    /// RW, RO or LK
    #[arg(value_parser = parse_lock_state)]
    state: LockState,
    password: String,
    device: PathBuf,
}

#[derive(Args, Debug)]
struct ConfigureRangeArgs {
    range: u32,
    #[arg(value_enum)]
    mode: LockingMode,
    password: String,
    device: PathBuf,
}

#[derive(Args, Debug)]
struct SetupRangeArgs {
    range: u32,
    start: u64,
    length: u64,
    password: String,
    device: PathBuf,
}

#[derive(Args, Debug)]
struct ListRangesArgs {
    password: String,
    device: PathBuf,
    /// Only show this range
    #[arg(long, value_name = "N")]
    range: Option<u32>,
}

#[derive(Args, Debug)]
struct BandsArgs {
    password: String,
    device: PathBuf,
    /// Only enable this band
    #[arg(long, value_name = "N")]
    band: Option<u32>,
}

#[derive(Args, Debug)]
struct MbrArgs {
    #[arg(value_enum)]
    value: OnOff,
    password: String,
    device: PathBuf,
}

#[derive(Args, Debug)]
struct LoadPbaArgs {
    password: String,
    image: PathBuf,
    device: PathBuf,
}

#[derive(Args, Debug)]
struct RevertLockingSpArgs {
    password: String,
    device: PathBuf,
    /// Keep the global range key and its data
    #[arg(long)]
    keep_global: bool,
}

#[derive(Args, Debug)]
struct RevertTperArgs {
    /// SID password, or the PSID printed on the drive label with --psid
    password: String,
    device: PathBuf,
    /// Authenticate as PSID
    #[arg(long)]
    psid: bool,
    /// Only revert the Admin SP
    #[arg(long, requires = "psid")]
    admin_sp_only: bool,
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// SP to open the session with
    #[arg(long, value_name = "UID", default_value = "0000020500000001")]
    sp: Uid,
    /// Authority to authenticate as; anonymous when omitted
    #[arg(long, requires = "password")]
    authority: Option<Authority>,
    /// Password of --authority
    #[arg(long, requires = "authority")]
    password: Option<String>,
    /// Send --password verbatim (for MSID and PSID)
    #[arg(long)]
    plain: bool,
}

#[derive(Args, Debug)]
struct RawCmdArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Invoking UID
    invoking: Uid,
    /// Method UID
    method: Uid,
    /// Hex-encoded parameter tokens
    #[arg(long, value_name = "HEX", default_value = "")]
    params: String,
    device: PathBuf,
}

#[derive(Args, Debug)]
struct ObjDumpArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Object UID
    object: Uid,
    device: PathBuf,
}

fn config_from_cli(global: &GlobalArgs) -> Result<EngineConfig, String> {
    let defaults = EngineConfig::default();
    let password_hashing = if global.no_hash {
        PasswordHashing::NoHash
    } else {
        PasswordHashing::Pbkdf2(match global.kdf {
            Kdf::Sha1 => KdfRegime::Sha1,
            Kdf::Sha256 => KdfRegime::Sha256,
        })
    };
    let receive_timeout = match global.timeout_ms {
        Some(0) => return Err("--timeout-ms must be greater than zero".into()),
        Some(ms) => Duration::from_millis(ms),
        None => defaults.receive_timeout,
    };
    Ok(EngineConfig {
        password_hashing,
        receive_timeout,
        dump_wire: global.dump_wire,
        com_id_override: global.com_id,
        ..defaults
    })
}

fn init_tracing(global: &GlobalArgs) {
    let level = match global.verbose {
        _ if global.dump_wire => tracing::Level::TRACE,
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);
    if global.output == OutputFormat::Normal {
        builder.init();
    } else {
        builder.without_time().init();
    }
}

fn main() {
    let cli = Cli::parse();
    let config = match config_from_cli(&cli.global) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("error: {message}");
            std::process::exit(1);
        }
    };
    init_tracing(&cli.global);

    if let Err(err) = run(cli.command, cli.global.output, config) {
        eprintln!("error: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("caused by: {cause}");
        }
        std::process::exit(1);
    }
}

#[cfg(target_os = "linux")]
fn open_transport(path: &Path) -> anyhow::Result<Box<dyn SecurityTransport>> {
    Ok(Box::new(linux::BlockDevice::open(path)?))
}

#[cfg(not(target_os = "linux"))]
fn open_transport(_path: &Path) -> anyhow::Result<Box<dyn SecurityTransport>> {
    anyhow::bail!("security protocol pass-through is only implemented on Linux")
}

#[cfg(target_os = "linux")]
fn candidate_devices() -> anyhow::Result<Vec<PathBuf>> {
    Ok(linux::scan()?)
}

#[cfg(not(target_os = "linux"))]
fn candidate_devices() -> anyhow::Result<Vec<PathBuf>> {
    anyhow::bail!("device scan is only implemented on Linux")
}

fn open(path: &Path, config: &EngineConfig) -> anyhow::Result<Device> {
    let transport =
        open_transport(path).with_context(|| format!("failed to open {}", path.display()))?;
    SedDevice::open(transport, config.clone())
        .with_context(|| format!("failed to read discovery from {}", path.display()))
}

/// `1`, `2` and `E` for each SSC the drive reports.
fn ssc_summary(dev: &Device) -> String {
    let discovery = dev.discovery();
    let mut s = String::new();
    if discovery.opal1().is_some() {
        s.push('1');
    }
    if discovery.opal2().is_some() {
        s.push('2');
    }
    if discovery.enterprise().is_some() {
        s.push('E');
    }
    s
}

/// Opens `path` and runs `op`, attaching the operation name and device to
/// any failure.
fn with_device<R>(
    path: &Path,
    config: &EngineConfig,
    operation: &str,
    op: impl FnOnce(&mut Device) -> Result<R, tcg_storage::Error>,
) -> anyhow::Result<R> {
    let mut dev = open(path, config)?;
    tracing::info!(operation, device = %path.display(), variant = ?dev.variant(), "running");
    op(&mut dev).with_context(|| format!("{operation} failed on {}", path.display()))
}

fn session_auth(
    dev: &Device,
    args: &SessionArgs,
) -> anyhow::Result<Option<(Uid, credential::Credential)>> {
    let (Some(authority), Some(password)) = (args.authority, args.password.as_deref()) else {
        return Ok(None);
    };
    let credential = if args.plain {
        credential::Credential::plain(password.as_bytes())
    } else {
        dev.credential(password)?
    };
    Ok(Some((authority.uid(), credential)))
}

fn run(command: Command, format: OutputFormat, config: EngineConfig) -> anyhow::Result<()> {
    let config = &config;
    match command {
        Command::Scan => {
            let mut entries = Vec::new();
            for path in candidate_devices().context("failed to enumerate block devices")? {
                let entry = match open(&path, config) {
                    Ok(dev) => output::ScanEntry {
                        path: path.display().to_string(),
                        ssc: ssc_summary(&dev),
                        identity: Some(dev.identity().clone()),
                    },
                    Err(err) => {
                        tracing::debug!(device = %path.display(), error = %err, "not a SED");
                        output::ScanEntry {
                            path: path.display().to_string(),
                            ssc: String::new(),
                            identity: None,
                        }
                    }
                };
                entries.push(entry);
            }
            output::scan(format, &entries);
        }
        Command::Query(DeviceArg { device }) => {
            let mut dev = open(&device, config)?;
            let properties = if dev.is_sed() {
                Some(dev.properties().with_context(|| {
                    format!("properties exchange failed on {}", device.display())
                })?)
            } else {
                None
            };
            output::query(
                format,
                &device,
                dev.identity(),
                dev.discovery(),
                properties.as_ref().map(|p| p.tper.as_slice()),
            );
        }
        Command::IsValidSed(DeviceArg { device }) => {
            let dev = open(&device, config)?;
            let verdict = match dev.variant() {
                Some(variant) => format!("SED {} ({variant})", ssc_summary(&dev)),
                None => "NOT a supported SED".to_string(),
            };
            output::field(format, "status", &verdict);
        }
        Command::PrintDefaultPassword(DeviceArg { device }) => {
            let msid = with_device(&device, config, "MSID read", |dev| dev.msid())?;
            output::field(format, "msid", &String::from_utf8_lossy(&msid));
        }
        Command::ValidatePbkdf2 => {
            credential::self_test().context("PBKDF2 self test failed")?;
            output::field(format, "pbkdf2", "ok");
        }
        Command::TakeOwnership(PasswordArgs { password, device }) => {
            with_device(&device, config, "take ownership", |dev| {
                dev.take_ownership(&password)
            })?;
            output::done(format, "take ownership", &device);
        }
        Command::SetSidPassword(args) => {
            with_device(&args.device, config, "set SID password", |dev| {
                dev.set_sid_password(&args.old_password, &args.new_password)
            })?;
            output::done(format, "set SID password", &args.device);
        }
        Command::ActivateLockingSp(PasswordArgs { password, device }) => {
            with_device(&device, config, "activate Locking SP", |dev| {
                dev.activate_locking_sp(&password)
            })?;
            output::done(format, "activate Locking SP", &device);
        }
        Command::ActivateLockingSpSum(args) => {
            with_device(&args.device, config, "activate Locking SP in Single User Mode", |dev| {
                dev.activate_locking_sp_sum(args.range, &args.password)
            })?;
            output::done(format, "activate Locking SP in Single User Mode", &args.device);
        }
        Command::InitialSetup(PasswordArgs { password, device }) => {
            with_device(&device, config, "initial setup", |dev| {
                dev.initial_setup(&password)
            })?;
            output::done(format, "initial setup", &device);
        }
        Command::SetupSum(args) => {
            with_device(&args.device, config, "Single User Mode setup", |dev| {
                dev.setup_sum(
                    args.range,
                    args.start,
                    args.length,
                    &args.sid_password,
                    &args.user_password,
                )
            })?;
            output::done(format, "Single User Mode setup", &args.device);
        }
        Command::SetPassword(args) => {
            with_device(&args.device, config, "set password", |dev| {
                dev.set_password(&args.password, args.authority, &args.new_password)
            })?;
            output::done(format, "set password", &args.device);
        }
        Command::SetPasswordSum(args) => {
            with_device(&args.device, config, "set Single User Mode password", |dev| {
                dev.set_password_sum(args.user, &args.old_password, &args.new_password)
            })?;
            output::done(format, "set Single User Mode password", &args.device);
        }
        Command::EnableUser(args) => {
            with_device(&args.device, config, "enable user", |dev| {
                dev.enable_user(&args.admin_password, args.user)
            })?;
            output::done(format, "enable user", &args.device);
        }
        Command::SetLockingRange(args) => {
            with_device(&args.device, config, "set locking range", |dev| {
                dev.set_locking_range(args.range, args.state, &args.password)
            })?;
            output::done(format, "set locking range", &args.device);
        }
        Command::SetLockingRangeSum(args) => {
            with_device(&args.device, config, "set Single User Mode locking range", |dev| {
                dev.set_locking_range_sum(args.range, args.state, &args.password)
            })?;
            output::done(format, "set Single User Mode locking range", &args.device);
        }
        Command::ConfigureRange(args) => {
            with_device(&args.device, config, "configure range", |dev| {
                dev.configure_range(args.range, args.mode.into(), &args.password)
            })?;
            output::done(format, "configure range", &args.device);
        }
        Command::SetupRange(args) => {
            with_device(&args.device, config, "setup range", |dev| {
                dev.setup_range(args.range, args.start, args.length, &args.password)
            })?;
            output::done(format, "setup range", &args.device);
        }
        Command::SetupRangeSum(args) => {
            with_device(&args.device, config, "setup Single User Mode range", |dev| {
                dev.setup_range_sum(args.range, args.start, args.length, &args.password)
            })?;
            output::done(format, "setup Single User Mode range", &args.device);
        }
        Command::ListRanges(args) => {
            let ranges = with_device(&args.device, config, "list ranges", |dev| {
                dev.list_ranges(args.range, &args.password)
            })?;
            output::ranges(format, &ranges);
        }
        Command::Rekey(args) => {
            with_device(&args.device, config, "rekey", |dev| {
                dev.rekey(args.range, &args.password)
            })?;
            output::done(format, "rekey", &args.device);
        }
        Command::EraseRange(args) => {
            with_device(&args.device, config, "erase range", |dev| {
                dev.erase_range(args.range, &args.password)
            })?;
            output::done(format, "erase range", &args.device);
        }
        Command::EraseRangeSum(args) => {
            with_device(&args.device, config, "erase Single User Mode range", |dev| {
                dev.erase_range_sum(args.range, &args.password)
            })?;
            output::done(format, "erase Single User Mode range", &args.device);
        }
        Command::SetBandsEnabled(args) => {
            with_device(&args.device, config, "enable bands", |dev| {
                dev.set_bands_enabled(args.band, &args.password)
            })?;
            output::done(format, "enable bands", &args.device);
        }
        Command::SetMbrDone(args) => {
            with_device(&args.device, config, "set MBR done", |dev| {
                dev.set_mbr_done(args.value.get(), &args.password)
            })?;
            output::done(format, "set MBR done", &args.device);
        }
        Command::SetMbrEnable(args) => {
            with_device(&args.device, config, "set MBR enable", |dev| {
                dev.set_mbr_enable(args.value.get(), &args.password)
            })?;
            output::done(format, "set MBR enable", &args.device);
        }
        Command::LoadPba(args) => {
            let image = fs_err::read(&args.image)?;
            let total = image.len();
            with_device(&args.device, config, "load PBA", |dev| {
                dev.load_pba(&args.password, &image, |written| {
                    if format == OutputFormat::Readable {
                        eprint!("\rwritten {written} of {total} bytes");
                    }
                })
            })?;
            if format == OutputFormat::Readable {
                eprintln!();
            }
            output::done(format, "load PBA", &args.device);
        }
        Command::RevertLockingSp(args) => {
            with_device(&args.device, config, "revert Locking SP", |dev| {
                dev.revert_locking_sp(&args.password, args.keep_global)
            })?;
            output::done(format, "revert Locking SP", &args.device);
        }
        Command::RevertTper(args) => {
            let authority = if args.psid {
                Authority::Psid
            } else {
                Authority::Sid
            };
            with_device(&args.device, config, "revert TPer", |dev| {
                dev.revert_tper(&args.password, authority, args.admin_sp_only)
            })?;
            output::done(format, "revert TPer", &args.device);
        }
        Command::RawCmd(args) => {
            let params = raw::parse_params(&args.params).context("invalid parameter tokens")?;
            let mut dev = open(&args.device, config)?;
            let auth = session_auth(&dev, &args.session)?;
            let results = raw::raw_command(
                dev.tper_mut(),
                args.session.sp,
                auth.as_ref().map(|(uid, c)| (*uid, c)),
                args.invoking,
                args.method,
                params,
            )
            .with_context(|| format!("raw command failed on {}", args.device.display()))?;
            output::values(format, &results);
        }
        Command::ObjDump(args) => {
            let mut dev = open(&args.device, config)?;
            let auth = session_auth(&dev, &args.session)?;
            let results = raw::object_dump(
                dev.tper_mut(),
                args.session.sp,
                auth.as_ref().map(|(uid, c)| (*uid, c)),
                args.object,
            )
            .with_context(|| format!("object dump failed on {}", args.device.display()))?;
            output::values(format, &results);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcg_storage_protocol::uid::object;

    fn try_parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("sedutil").chain(args.iter().copied()))
    }

    fn parse(args: &[&str]) -> Cli {
        try_parse(args).unwrap()
    }

    #[test]
    fn cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn default_config_hashes_with_sha1() {
        let cli = parse(&["query", "/dev/sda"]);
        let config = config_from_cli(&cli.global).unwrap();
        assert_eq!(
            config.password_hashing,
            PasswordHashing::Pbkdf2(KdfRegime::Sha1)
        );
        assert_eq!(config.com_id_override, None);
        assert_eq!(cli.global.output, OutputFormat::Readable);
    }

    #[test]
    fn global_flags_map_to_config() {
        let cli = parse(&[
            "--no-hash",
            "--timeout-ms",
            "250",
            "--com-id",
            "0x07fe",
            "--dump-wire",
            "take-ownership",
            "secret",
            "/dev/nvme0n1",
        ]);
        let config = config_from_cli(&cli.global).unwrap();
        assert_eq!(config.password_hashing, PasswordHashing::NoHash);
        assert_eq!(config.receive_timeout, Duration::from_millis(250));
        assert_eq!(config.com_id_override, Some(0x07fe));
        assert!(config.dump_wire);
        assert!(matches!(
            cli.command,
            Command::TakeOwnership(PasswordArgs { ref password, .. }) if password == "secret"
        ));
    }

    #[test]
    fn kdf_and_output_after_subcommand() {
        let cli = parse(&["list-ranges", "pw", "/dev/sdb", "--kdf", "sha256", "--output", "json"]);
        let config = config_from_cli(&cli.global).unwrap();
        assert_eq!(
            config.password_hashing,
            PasswordHashing::Pbkdf2(KdfRegime::Sha256)
        );
        assert_eq!(cli.global.output, OutputFormat::Json);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cli = parse(&["--timeout-ms", "0", "scan"]);
        assert!(config_from_cli(&cli.global).is_err());
    }

    #[test]
    fn lock_states_and_authorities() {
        let cli = parse(&["set-locking-range", "1", "ro", "pw", "/dev/sda"]);
        let Command::SetLockingRange(args) = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(args.state, LockState::ReadOnly);

        let cli = parse(&["set-password", "pw", "User3", "new", "/dev/sda"]);
        let Command::SetPassword(args) = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(args.authority, Authority::User(3));

        assert!(try_parse(&["set-locking-range", "1", "open", "pw", "/dev/sda"]).is_err());
        assert!(try_parse(&["enable-user", "pw", "Nobody", "/dev/sda"]).is_err());
    }

    #[test]
    fn psid_revert_flags() {
        let cli = parse(&["revert-tper", "PSID123", "/dev/sda", "--psid", "--admin-sp-only"]);
        let Command::RevertTper(args) = cli.command else {
            panic!("wrong command");
        };
        assert!(args.psid && args.admin_sp_only);
        assert!(try_parse(&["revert-tper", "pw", "/dev/sda", "--admin-sp-only"]).is_err());
    }

    #[test]
    fn raw_command_uids() {
        let cli = parse(&[
            "raw-cmd",
            "--authority",
            "Admin1",
            "--password",
            "pw",
            "--sp",
            "0000020500000002",
            "0000080300000001",
            "0x0000000600000016",
            "--params",
            "f0 f1",
            "/dev/sda",
        ]);
        let Command::RawCmd(args) = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(args.session.sp, object::LOCKING_SP);
        assert_eq!(args.session.authority, Some(Authority::Admin(1)));
        assert_eq!(args.method, Uid::new(0x0000_0006_0000_0016));
        assert_eq!(args.params, "f0 f1");

        assert!(
            try_parse(&[
                "obj-dump",
                "--authority",
                "SID",
                "0000000b00000001",
                "/dev/sda",
            ])
            .is_err()
        );
    }

    #[test]
    fn configure_modes() {
        let cli = parse(&["configure-range", "0", "write-only", "pw", "/dev/sda"]);
        let Command::ConfigureRange(args) = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(RangeLockEnable::from(args.mode), RangeLockEnable::READ_ONLY);
    }
}
