//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;
use crt_core::{PendingAtClose, ReferencePolicy};

#[derive(Parser)]
#[command(
    name = "crt",
    version,
    about = "Transform clinical CSV extracts into linked output records",
    long_about = "Transform a folder of vendor CSV extracts into output records.\n\n\
                  References between records are resolved within one batch; records\n\
                  that point at targets filed later are patched once the target arrives."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Allow raw cell values in trace logs. They contain patient data.
    #[arg(long = "log-data", global = true)]
    pub log_data: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Map and file every extract in a folder as one batch.
    Run(RunArgs),

    /// List the supported resource kinds.
    Kinds,
}

#[derive(Parser)]
pub struct RunArgs {
    /// JSON mapping configuration.
    #[arg(value_name = "MAPPING_JSON")]
    pub mapping: PathBuf,

    /// Folder containing the CSV extracts.
    #[arg(value_name = "INPUT_DIR")]
    pub input_dir: PathBuf,

    /// JSON-lines output file (default: <INPUT_DIR>/records.jsonl).
    #[arg(long = "output", short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Abort the batch on the first record error.
    ///
    /// Also fails the batch when references are still pending at close,
    /// unless --pending-at-close is given.
    #[arg(long = "strict")]
    pub strict: bool,

    /// Default policy for references whose target is not yet filed.
    #[arg(long = "forward-refs", value_enum, default_value = "deferrable")]
    pub forward_refs: ForwardRefsArg,

    /// What to do with references still pending when the batch closes.
    #[arg(long = "pending-at-close", value_enum)]
    pub pending_at_close: Option<PendingAtCloseArg>,

    /// Worker threads (default: one per core).
    #[arg(long = "threads", value_name = "N")]
    pub threads: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ForwardRefsArg {
    Deferrable,
    Required,
}

impl From<ForwardRefsArg> for ReferencePolicy {
    fn from(arg: ForwardRefsArg) -> Self {
        match arg {
            ForwardRefsArg::Deferrable => ReferencePolicy::Deferrable,
            ForwardRefsArg::Required => ReferencePolicy::Required,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum PendingAtCloseArg {
    Fail,
    MarkBroken,
    LeavePending,
}

impl From<PendingAtCloseArg> for PendingAtClose {
    fn from(arg: PendingAtCloseArg) -> Self {
        match arg {
            PendingAtCloseArg::Fail => PendingAtClose::Fail,
            PendingAtCloseArg::MarkBroken => PendingAtClose::MarkBroken,
            PendingAtCloseArg::LeavePending => PendingAtClose::LeavePending,
        }
    }
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
