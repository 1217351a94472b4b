//! FlexBM command line entry point.
//!
//! `check` validates a configuration document. `reconfig` loads one,
//! applies a command plan against a new document and reports the result
//! code, optionally dumping the reconfigured document.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use flexbm::{error_log, info_log};
use flexbm::{init_tracing, ObjectKind, P4Objects, ReconfigResult, RuntimeConfig, Switch};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

/// P4 behavioral model runtime with live pipeline reconfiguration
#[derive(Parser, Debug)]
#[command(name = "flexbm")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Runtime configuration file (TOML)
    #[arg(short = 'c', long, global = true, default_value = "/etc/flexbm/flexbm.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short = 'l', long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a configuration document and print its object counts
    Check {
        #[arg(long)]
        json: PathBuf,
    },

    /// Apply a reconfiguration plan to a loaded configuration
    Reconfig {
        /// Configuration loaded before the plan runs
        #[arg(long)]
        init: PathBuf,

        /// Configuration supplying definitions for inserted objects
        #[arg(long = "new")]
        new_json: PathBuf,

        /// Command plan
        #[arg(long)]
        plan: PathBuf,

        /// Write the resulting configuration document here
        #[arg(long)]
        dump: Option<PathBuf>,
    },
}

const COUNTED_KINDS: [ObjectKind; 7] = [
    ObjectKind::Pipeline,
    ObjectKind::Conditional,
    ObjectKind::Flex,
    ObjectKind::Table,
    ObjectKind::Action,
    ObjectKind::RegisterArray,
    ObjectKind::Calculation,
];

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match RuntimeConfig::load_or_default(&args.config).and_then(|c| {
        c.validate()?;
        Ok(c)
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("flexbm: {e}");
            return ExitCode::FAILURE;
        }
    };

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    if let Err(e) = init_tracing(&level, config.logging.json) {
        eprintln!("flexbm: {e}");
        return ExitCode::FAILURE;
    }

    match run(args.command, &config) {
        Ok(code) => code,
        Err(e) => {
            error_log!("Main", error = %e, "Command failed");
            eprintln!("flexbm: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: &RuntimeConfig) -> anyhow::Result<ExitCode> {
    match command {
        Command::Check { json } => check(json),
        Command::Reconfig {
            init,
            new_json,
            plan,
            dump,
        } => reconfig(config, init, new_json, plan, dump),
    }
}

fn check(json: PathBuf) -> anyhow::Result<ExitCode> {
    let objects = match P4Objects::from_path(&json) {
        Ok(objects) => objects,
        Err(e) => {
            error_log!("Main", path = %json.display(), error = %e, "Configuration rejected");
            println!("{}", ReconfigResult::P4ObjectsInitFail);
            return Ok(exit_code(ReconfigResult::P4ObjectsInitFail));
        }
    };

    for kind in COUNTED_KINDS {
        println!("{:<16}{}", kind.as_str(), objects.object_count(kind));
    }
    Ok(ExitCode::SUCCESS)
}

fn reconfig(
    config: &RuntimeConfig,
    init: PathBuf,
    new_json: PathBuf,
    plan: PathBuf,
    dump: Option<PathBuf>,
) -> anyhow::Result<ExitCode> {
    let switch = Switch::from_config(config);
    if let Err(e) = switch.init_objects(0, &init) {
        error_log!("Main", path = %init.display(), error = %e, "Initial configuration rejected");
        println!("{}", ReconfigResult::P4ObjectsInitFail);
        return Ok(exit_code(ReconfigResult::P4ObjectsInitFail));
    }

    let result = switch.apply_reconfig(0, &new_json, &plan);
    println!("{result}");

    if let Some(out) = dump {
        let generation = switch.active(0)?;
        let document = serde_json::to_string_pretty(&generation.objects().cfg())?;
        fs::write(&out, document)
            .with_context(|| format!("failed to write {}", out.display()))?;
        info_log!(
            "Main",
            path = %out.display(),
            generation = generation.number(),
            "Wrote configuration"
        );
    }

    Ok(exit_code(result))
}

fn exit_code(result: ReconfigResult) -> ExitCode {
    u8::try_from(result.code()).map_or(ExitCode::FAILURE, ExitCode::from)
}
