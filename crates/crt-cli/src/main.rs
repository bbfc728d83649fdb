//! `crt`: batch transformer for clinical CSV extracts.

use clap::{ColorChoice, Parser};
use crt_cli::commands::{kinds, run};
use crt_cli::logging::{LogConfig, LogFormat, init_logging};
use crt_cli::types::RunOptions;
use crt_core::FilerOptions;
use std::io::{self, IsTerminal};
use tracing::level_filters::LevelFilter;

mod cli;
mod summary;

use crate::cli::{Cli, Command, LogFormatArg, LogLevelArg, RunArgs};
use crate::summary::{print_kinds, print_summary};

fn main() {
    let cli = Cli::parse();
    cli.color.write_global();
    let log_config = log_config_from_cli(&cli);
    if let Err(error) = init_logging(&log_config) {
        eprintln!("error: failed to initialize logging: {error}");
        std::process::exit(1);
    }
    let exit_code = match cli.command {
        Command::Run(args) => match run(&run_options(&args)) {
            Ok(result) => {
                print_summary(&result);
                0
            }
            Err(error) => {
                eprintln!("error: {error:#}");
                1
            }
        },
        Command::Kinds => {
            print_kinds(&kinds());
            0
        }
    };
    std::process::exit(exit_code);
}

fn run_options(args: &RunArgs) -> RunOptions {
    let mut filer = if args.strict {
        FilerOptions::strict()
    } else {
        FilerOptions::default()
    };
    filer = filer.with_forward_references(args.forward_refs.into());
    if let Some(policy) = args.pending_at_close {
        filer = filer.with_pending_at_close(policy.into());
    }
    RunOptions {
        mapping: args.mapping.clone(),
        input_dir: args.input_dir.clone(),
        output: args.output.clone(),
        filer,
        threads: args.threads,
    }
}

/// Build logging configuration from CLI flags with consistent precedence.
fn log_config_from_cli(cli: &Cli) -> LogConfig {
    let mut config = LogConfig {
        level_filter: cli.verbosity.tracing_level_filter(),
        ..LogConfig::default()
    };
    config.use_env_filter = !(cli.verbosity.is_present() || cli.log_level.is_some());
    if let Some(level) = cli.log_level {
        config.level_filter = match level {
            LogLevelArg::Error => LevelFilter::ERROR,
            LogLevelArg::Warn => LevelFilter::WARN,
            LogLevelArg::Info => LevelFilter::INFO,
            LogLevelArg::Debug => LevelFilter::DEBUG,
            LogLevelArg::Trace => LevelFilter::TRACE,
        };
    }
    config.format = match cli.log_format {
        LogFormatArg::Pretty => LogFormat::Pretty,
        LogFormatArg::Compact => LogFormat::Compact,
        LogFormatArg::Json => LogFormat::Json,
    };
    config.log_file = cli.log_file.clone();
    config.log_data = cli.log_data;
    config.with_ansi = match cli.color.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => cli.log_file.is_none() && io::stderr().is_terminal(),
    };
    config
}
