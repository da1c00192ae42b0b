use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload};

use flag_context::client::{FlagClient, StaticFlags};
use flag_context::errors::Result;
use flag_context::identity::{self, ServiceInfo};
use flag_context::verbosity::Verbosity;
use flag_context::{
    get_context_kind, merge_with, Context, ContextError, DuplicatePolicy, Kind, MergeOptions,
};

/// Build and combine flag evaluation contexts from the command line.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Service name stamped into service contexts (defaults to this package)
    #[arg(long, env = "FLAGCTX_SERVICE_NAME")]
    service_name: Option<String>,
    /// Service version stamped into service contexts (defaults to this package)
    #[arg(long, env = "FLAGCTX_SERVICE_VERSION")]
    service_version: Option<String>,
    /// Host name stamped into service contexts (defaults to $HOSTNAME)
    #[arg(long)]
    hostname: Option<String>,
    /// Log level (emerg, alert, crit, error, warn, notice, info, debug)
    #[arg(long, env = "FLAGCTX_LOG", default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge contexts (JSON strings) into one multi context
    Merge {
        contexts: Vec<String>,
        /// Let later contexts replace earlier ones of the same kind instead of failing
        #[arg(long)]
        last_write_wins: bool,
    },
    /// Print the context of one kind out of a single or multi context
    Get { kind: String, context: String },
    /// Print a generated identity context
    New {
        #[command(subcommand)]
        which: NewContext,
    },
    /// Evaluate a flag against static flag values loaded from a JSON file
    Eval {
        /// JSON file mapping flag keys to values
        #[arg(long)]
        flags: String,
        flag: String,
        /// Context to evaluate for (JSON)
        #[arg(default_value = "{}")]
        context: String,
        /// Fallback value (JSON, or taken as a string)
        #[arg(long, default_value = "null")]
        fallback: String,
        /// Print the evaluation reason too
        #[arg(long)]
        detail: bool,
    },
}

#[derive(Subcommand, Debug)]
enum NewContext {
    Service {
        #[arg(long, default_value = "app")]
        component: String,
    },
    Session { attributes: Option<String> },
    Request { attributes: Option<String> },
    Job { attributes: Option<String> },
    User { attributes: Option<String> },
}

fn main() {
    // Parse CLI arguments.
    let args = Args::parse();

    let verbosity = match Verbosity::parse(&args.log_level) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    let (filter, level_handle) = reload::Layer::new(verbosity.level_filter());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(args, level_handle) {
        Ok(out) => println!("{out}"),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

fn run<S: 'static>(args: Args, level_handle: reload::Handle<LevelFilter, S>) -> Result<String> {
    let current = ServiceInfo::current();
    let service = ServiceInfo::new(
        args.service_name.unwrap_or(current.name),
        args.service_version.unwrap_or(current.version),
        args.hostname.unwrap_or(current.hostname),
    );

    let out = match args.command {
        Command::Merge { contexts, last_write_wins } => {
            let parsed = contexts.iter().map(|s| Context::from_json(s)).collect::<Result<Vec<_>>>()?;
            let mut opts = MergeOptions::default();
            if last_write_wins {
                opts.on_duplicate = DuplicatePolicy::LastWriteWins;
            }
            merge_with(parsed, &opts)?.to_value()
        }
        Command::Get { kind, context } => {
            let kind = Kind::parse(&kind)?;
            let ctx = Context::from_json(&context)?;
            get_context_kind(&kind, &ctx).map_or(Value::Null, |c| c.to_value())
        }
        Command::New { which } => Value::from(&new_context(&service, which)?),
        Command::Eval { flags, flag, context, fallback, detail } => {
            let raw = std::fs::read_to_string(&flags)
                .map_err(|e| ContextError::io(&flags, e))?;
            let evaluator = StaticFlags::from_json(&raw)?;
            let known = evaluator.flags().map(str::to_string).collect::<Vec<_>>();
            let client = FlagClient::new(Arc::new(evaluator), service).with_level_handle(level_handle);
            // Replay every flag as an update so config and EAP flags take effect.
            for f in &known {
                client.handle_update(f)?;
            }

            let fallback = serde_json::from_str::<Value>(&fallback).unwrap_or(Value::String(fallback));
            let ctx = Context::from_json(&context)?;
            let result = client.variation_detail(&flag, ctx, fallback)?;
            client.shutdown();
            if detail {
                serde_json::json!({"value": result.value, "reason": format!("{:?}", result.reason)})
            } else {
                result.value
            }
        }
    };
    Ok(serde_json::to_string_pretty(&out)?)
}

fn new_context(service: &ServiceInfo, which: NewContext) -> Result<Context> {
    let ctx = match which {
        NewContext::Service { component } => identity::service_context(service, &component),
        NewContext::Session { attributes } => identity::session_context(attributes_arg(attributes)?),
        NewContext::Request { attributes } => identity::request_context(attributes_arg(attributes)?),
        NewContext::Job { attributes } => identity::job_context(attributes_arg(attributes)?),
        NewContext::User { attributes } => identity::user_context(attributes_arg(attributes)?),
    };
    Ok(ctx.into())
}

fn attributes_arg(raw: Option<String>) -> Result<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(s) => Ok(serde_json::from_str(&s)?),
    }
}
