use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum StopBitsArg {
    #[value(name = "1")]
    One,
    #[value(name = "2")]
    Two,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum JsonProgressArg {
    /// Emit a JSON event for every block.
    Blocks,
    /// Emit fewer JSON events by throttling block output to percent changes.
    Percent,
    /// Do not emit per-block progress events.
    None,
}

#[derive(Parser)]
#[command(name = "lpc2000-loader")]
#[command(about = "NXP LPC2000 flasher CLI (UART ISP bootloader)")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Erase the chip and program an Intel HEX image into flash.
    Program(ProgramArgs),

    /// Compare an Intel HEX image against flash contents.
    Verify(VerifyArgs),

    /// Erase every flash sector of the chip.
    Erase(EraseArgs),

    /// Check whether flash is blank (sector 0 excluded).
    BlankCheck(BlankCheckArgs),

    /// Read the part ID and print the chip name.
    Identify(IdentifyArgs),

    /// Read the boot code version.
    BootVersion(BootVersionArgs),

    /// List detected serial ports.
    List(ListArgs),
}

#[derive(Parser, Clone)]
pub struct ConnectionArgs {
    /// Serial port (auto-selected when exactly one is present).
    #[arg(long)]
    pub port: Option<String>,

    /// Crystal frequency of the target board in kHz.
    #[arg(long, default_value_t = 12000)]
    pub crystal_khz: u32,

    /// Stop bits for the serial link.
    #[arg(long, value_enum, default_value_t = StopBitsArg::One)]
    pub stop_bits: StopBitsArg,

    /// Max time to wait for any single bootloader response.
    #[arg(long, default_value_t = 1000)]
    pub response_timeout_ms: u64,
}

#[derive(Parser)]
pub struct ProgramArgs {
    /// Path to Intel HEX firmware.
    pub hex: PathBuf,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Skip the confirmation prompt before erasing the chip.
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Emit JSON line events to stdout.
    #[arg(long)]
    pub json: bool,

    /// Include monotonic timestamps in JSON events (milliseconds since process start).
    #[arg(long, requires = "json")]
    pub json_timestamps: bool,

    /// JSON progress verbosity.
    #[arg(long, value_enum, default_value_t = JsonProgressArg::Percent, requires = "json")]
    pub json_progress: JsonProgressArg,

    /// Reduce output (only errors).
    #[arg(long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// More logs to stderr.
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Parser)]
pub struct VerifyArgs {
    /// Path to Intel HEX firmware.
    pub hex: PathBuf,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Emit JSON line events to stdout.
    #[arg(long)]
    pub json: bool,

    /// Include monotonic timestamps in JSON events (milliseconds since process start).
    #[arg(long, requires = "json")]
    pub json_timestamps: bool,

    /// JSON progress verbosity.
    #[arg(long, value_enum, default_value_t = JsonProgressArg::Percent, requires = "json")]
    pub json_progress: JsonProgressArg,

    /// Reduce output (only errors).
    #[arg(long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// More logs to stderr.
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Parser)]
pub struct EraseArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Skip the confirmation prompt.
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Emit JSON line events to stdout.
    #[arg(long)]
    pub json: bool,

    /// More logs to stderr.
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Parser)]
pub struct BlankCheckArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Emit JSON output.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct IdentifyArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Emit JSON output.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct BootVersionArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Emit JSON output.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ListArgs {
    /// Emit JSON line output.
    #[arg(long)]
    pub json: bool,
}
