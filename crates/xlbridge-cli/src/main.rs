use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};
use xlbridge_core::engine::Registered;
use xlbridge_core::function::render_error;
use xlbridge_core::{AsyncKind, ConverterRegistry, FunctionTable, ModuleId, RegistrationContext, Scope, UserFunction, Value};
use xlbridge_runtime::rtd::{PublisherState, RtdFunction, RtdManager, RtdPublisher, UrlPublisher};
use xlbridge_runtime::{AsyncBridge, BridgeConfig, BridgeMetrics, Caller, ChannelContext, ContextEvent, Scheduler};

mod demo;

#[derive(Parser)]
#[command(name = "xlbridge", version, about = "xlbridge: worksheet function bridge host")]
struct Cli {
    /// Config file (defaults to $XLBRIDGE_CONFIG, then ~/.xlbridge/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the sample module and print the function descriptors as JSON
    Describe {
        /// Register into this workbook's scope
        #[arg(long)]
        workbook: Option<String>,
    },

    /// Call a registered function and print what it returns
    Call {
        /// Function name as registered, e.g. ADD
        function: String,

        /// Positional arguments. TRUE/FALSE, integers and numbers are parsed; anything else is text
        args: Vec<String>,

        /// Keyword options as key=value, passed to the function's keywords table
        #[arg(long = "kw")]
        keywords: Vec<String>,

        /// Calling cell address
        #[arg(long, default_value = "A1")]
        caller: String,
    },

    /// Poll a URL as an RTD topic and print each published value
    Watch {
        url: String,

        /// Stop after this many values
        #[arg(long, default_value = "3")]
        count: usize,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only command output
    fmt()
        .with_env_filter(EnvFilter::from_env("XLBRIDGE_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = BridgeConfig::load(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Commands::Describe { workbook } => describe(workbook),
        Commands::Call {
            function,
            args,
            keywords,
            caller,
        } => call(&config, &function, &args, &keywords, caller).await,
        Commands::Watch { url, count } => watch(&config, url, count).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn register_demo(workbook: Option<&str>) -> Result<FunctionTable> {
    let registration = RegistrationContext::new(Arc::new(ConverterRegistry::new()));
    let declared = demo::declare(&registration);
    let table = FunctionTable::new();
    let scope = match workbook {
        Some(wb) => Scope::Workbook(wb.to_string()),
        None => Scope::Global,
    };
    let report = registration.scan_module(&ModuleId::new(demo::MODULE), &table, &scope)?;
    tracing::info!(
        declared = declared.len(),
        registered = report.added,
        skipped = declared.iter().filter(|d| !d.is_registered()).count(),
        "Registered sample module"
    );
    Ok(table)
}

fn describe(workbook: Option<String>) -> Result<()> {
    let table = register_demo(workbook.as_deref())?;
    let descriptors = table.descriptors();
    println!("{}", serde_json::to_string_pretty(&descriptors)?);
    Ok(())
}

fn parse_value(raw: &str) -> Value {
    match raw {
        "" => Value::Missing,
        "TRUE" | "true" => Value::Bool(true),
        "FALSE" | "false" => Value::Bool(false),
        _ => raw
            .parse::<i64>()
            .map(Value::Int)
            .or_else(|_| raw.parse::<f64>().map(Value::Number))
            .unwrap_or_else(|_| Value::Str(raw.to_string())),
    }
}

fn raw_args(registered: &Registered, args: &[String], keywords: &[String]) -> Result<Vec<Value>> {
    let mut raw: Vec<Value> = args.iter().map(|a| parse_value(a)).collect();
    if keywords.is_empty() {
        return Ok(raw);
    }
    let descriptor = &registered.descriptor;
    if descriptor.keywords_arg().is_none() {
        bail!("{} takes no keyword options", descriptor.name);
    }
    let pairs = keywords
        .iter()
        .map(|kw| {
            kw.split_once('=')
                .map(|(k, v)| (k.to_string(), parse_value(v)))
                .with_context(|| format!("Keyword option '{kw}' is not key=value"))
        })
        .collect::<Result<Vec<_>>>()?;
    let positional = descriptor.args.len() - 1;
    if raw.len() > positional {
        bail!(
            "{} takes at most {positional} positional arguments before its keyword options, got {}",
            descriptor.name,
            raw.len()
        );
    }
    raw.resize(positional, Value::Missing);
    raw.push(Value::table(pairs));
    Ok(raw)
}

async fn call(config: &BridgeConfig, function: &str, args: &[String], keywords: &[String], caller: String) -> Result<()> {
    let table = register_demo(None)?;
    let registered = table
        .lookup(None, function)
        .with_context(|| format!("No function named {function}; known: {}", table.names().join(", ")))?;
    let descriptor = registered.descriptor.clone();
    let call_args = descriptor.convert_args(&raw_args(&registered, args, keywords)?)?;
    let caller = Caller::new(caller);

    match descriptor.flags.async_kind {
        AsyncKind::None => {
            let UserFunction::Plain(f) = &descriptor.func else {
                bail!("{function} is not a plain function");
            };
            match f(call_args) {
                Ok(value) => println!("{}", descriptor.convert_return(value)?),
                Err(err) => println!("{}", render_error(&err)),
            }
            Ok(())
        }
        AsyncKind::Native => {
            let scheduler = Scheduler::new(config.scheduler.clone());
            let bridge = AsyncBridge::new(scheduler.handle()?, &descriptor.name, descriptor.func.clone())?;
            let (ctx, mut events) = ChannelContext::new(Some(caller));
            bridge.invoke(ctx, call_args);
            while let Some(event) = events.next().await {
                match event {
                    ContextEvent::Result(value) => println!("{value}"),
                    ContextEvent::Done => break,
                }
            }
            tokio::task::spawn_blocking(move || scheduler.shutdown()).await?;
            Ok(())
        }
        AsyncKind::Rtd => {
            let scheduler = Scheduler::new(config.scheduler.clone());
            let metrics = Arc::new(BridgeMetrics::new());
            let manager = Arc::new(RtdManager::new(config.rtd.update_capacity).with_metrics(metrics.clone()));
            let rtd = RtdFunction::new(manager.clone(), scheduler.handle()?, &descriptor.name, descriptor.func.clone())?
                .with_metrics(metrics.clone());

            let mut updates = manager.updates();
            let (topic, initial) = rtd.call(Some(caller), call_args);
            if let Some(value) = initial {
                println!("{value}");
            }
            manager.connect(1, &topic);
            loop {
                match tokio::time::timeout(Duration::from_millis(500), updates.recv()).await {
                    Ok(Ok(update)) if update.topic == topic => {
                        if let Some(value) = update.value {
                            println!("{value}");
                        }
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(_)) => break,
                    Err(_) if manager.peek(&topic).is_none() => break,
                    Err(_) => {}
                }
            }
            manager.disconnect(1)?;
            tracing::debug!(metrics = ?metrics.snapshot(), "RTD call finished");
            tokio::task::spawn_blocking(move || scheduler.shutdown()).await?;
            Ok(())
        }
    }
}

async fn watch(config: &BridgeConfig, url: String, count: usize) -> Result<()> {
    let scheduler = Scheduler::new(config.scheduler.clone());
    let manager = Arc::new(RtdManager::new(config.rtd.update_capacity));
    let publisher = Arc::new(UrlPublisher::new(url.clone(), &manager, scheduler.handle()?, &config.rtd)?);

    let mut updates = manager.updates();
    manager.start(publisher.clone());
    manager.connect(1, &url);
    tracing::info!(url = %url, interval_ms = config.rtd.poll_interval_ms, "Watching URL");

    let mut seen = 0;
    while seen < count {
        match tokio::time::timeout(Duration::from_millis(500), updates.recv()).await {
            Ok(update) => {
                let update = update?;
                if update.topic != url {
                    continue;
                }
                let Some(value) = update.value else {
                    break;
                };
                println!("{value}");
                seen += 1;
            }
            // A failed request publishes its error and stops the publisher
            Err(_) if publisher.state() == PublisherState::Stopped => break,
            Err(_) => {}
        }
    }

    manager.disconnect(1)?;
    tokio::task::spawn_blocking(move || scheduler.shutdown()).await?;
    Ok(())
}
