//! wasm-embed CLI entry point.
//!
//! Runs a WebAssembly module's `_start` (or a named export), hosts a simple
//! REPL over its exports, and compiles modules ahead of time.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use wasm_embed_common::{CallError, ConfigFile, LogLevel};
use wasm_embed_core::{Instance, Module, NativeRegistry, Runtime, Value, WasiArgs};
use wasm_embed_natives::{LoggingHost, register_all};

/// Embed and run WebAssembly modules.
#[derive(Parser, Debug)]
#[command(name = "wasm-embed", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a module.
    Run(RunArgs),

    /// Compile a module into a precompiled artifact.
    Compile(CompileArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Module file (`.wasm`, `.wat` or a precompiled artifact).
    file: PathBuf,

    /// Arguments for the program, or for `--function`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Call this export instead of `_start`.
    #[arg(short, long)]
    function: Option<String>,

    /// Verbosity from 0 (fatal only) to 4 (everything).
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=4))]
    verbose: Option<u8>,

    /// Stack size in bytes.
    #[arg(long)]
    stack_size: Option<u32>,

    /// Application heap size in bytes.
    #[arg(long)]
    heap_size: Option<u32>,

    /// Maximum number of threads.
    #[arg(long)]
    max_threads: Option<u32>,

    /// Environment variable passed to the guest (`KEY=VALUE`).
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Directory the guest may access.
    #[arg(long = "dir", value_name = "DIR")]
    dirs: Vec<String>,

    /// Host directory mapped to a guest path (`GUEST::HOST`).
    #[arg(long = "map-dir", value_name = "GUEST::HOST")]
    map_dirs: Vec<String>,

    /// Address or CIDR block guest sockets may use.
    #[arg(long = "addr-pool", value_name = "ADDR[/MASK]", value_delimiter = ',')]
    addr_pool: Vec<String>,

    /// Read `FUNC ARG...` lines from stdin and call them.
    #[arg(long)]
    repl: bool,

    /// TOML configuration file. Flags override its values.
    #[arg(short, long, env = "WASM_EMBED_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CompileArgs {
    /// Module file to compile.
    file: PathBuf,

    /// Output path of the artifact.
    #[arg(short, long)]
    output: PathBuf,

    /// TOML configuration file.
    #[arg(short, long, env = "WASM_EMBED_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args),
        Command::Compile(args) => compile(&args),
    }
}

fn init_tracing(level: LogLevel) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(level.as_filter_directive())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ConfigFile> {
    match path {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config '{}'", path.display())),
        None => Ok(ConfigFile::default()),
    }
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    // Flags override the config file
    let engine = &mut config.runtime.engine;
    if let Some(verbose) = args.verbose {
        engine.log_level = LogLevel::from_verbosity(verbose);
    }
    if let Some(max_threads) = args.max_threads {
        engine.max_threads = max_threads;
    }
    let instance_config = &mut config.runtime.instance;
    if let Some(stack_size) = args.stack_size {
        instance_config.stack_size = stack_size;
    }
    if let Some(heap_size) = args.heap_size {
        instance_config.heap_size = heap_size;
    }
    config.wasi.dirs.extend(args.dirs);
    config.wasi.map_dirs.extend(args.map_dirs);
    config.wasi.env.extend(args.env);
    config.wasi.addr_pool.extend(args.addr_pool);

    init_tracing(config.runtime.engine.log_level);
    info!(file = %args.file.display(), "Starting wasm-embed");

    let logging = LoggingHost::new();
    let mut natives = NativeRegistry::new();
    register_all(&mut natives, &config.natives, &logging)
        .context("Failed to register native functions")?;

    let runtime = Runtime::builder()
        .config(config.runtime.engine.clone())
        .native_symbols(natives)
        .build()
        .context("Failed to initialize runtime")?;

    let mut module = Module::from_file(&runtime, &args.file)
        .with_context(|| format!("Failed to load '{}'", args.file.display()))?;

    let mut wasi = WasiArgs::from_config(&config.wasi).context("Invalid WASI configuration")?;
    wasi.argv = std::iter::once(args.file.display().to_string())
        .chain(args.args.iter().cloned())
        .collect();
    module.set_wasi(wasi);

    let mut instance = Instance::with_config(&module, &config.runtime.instance)
        .context("Failed to instantiate module")?;

    if args.repl {
        return repl(&mut instance);
    }

    match &args.function {
        Some(function) => {
            let results = call_with_text(&mut instance, function, &args.args)?;
            println!("{}", format_results(&results));
        }
        None => {
            let entry = ["_start", "main"]
                .into_iter()
                .find(|name| module.function_signature(name).is_some())
                .context("Module exports neither '_start' nor 'main'")?;
            debug!(entry, "Running entry point");
            match instance.call(entry, &[]) {
                Ok(_) => {}
                Err(CallError::Exited { code, .. }) => {
                    instance.destroy();
                    std::process::exit(code);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

/// Call `function` with arguments parsed per its declared parameter types.
fn call_with_text(
    instance: &mut Instance<'_>,
    function: &str,
    args: &[String],
) -> anyhow::Result<Vec<Value>> {
    let signature = instance.function_signature(function)?;
    if signature.params.len() != args.len() {
        bail!(CallError::ArgumentCountMismatch {
            expected: signature.params.len(),
            actual: args.len(),
        });
    }

    let values = signature
        .params
        .iter()
        .zip(args)
        .map(|(ty, text)| Value::parse(*ty, text))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(instance.call(function, &values)?)
}

fn format_results(results: &[Value]) -> String {
    results
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn repl(instance: &mut Instance<'_>) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("webassembly> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let mut words = line.split_whitespace();
        let Some(function) = words.next() else {
            continue;
        };
        if function == "__exit__" {
            break;
        }

        let args: Vec<String> = words.map(str::to_string).collect();
        match call_with_text(instance, function, &args) {
            Ok(results) => println!("{}", format_results(&results)),
            Err(e) => println!("{e:#}"),
        }
    }

    Ok(())
}

fn compile(args: &CompileArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    init_tracing(config.runtime.engine.log_level);

    let runtime = Runtime::builder()
        .config(config.runtime.engine)
        .build()
        .context("Failed to initialize runtime")?;
    let module = Module::from_file(&runtime, &args.file)
        .with_context(|| format!("Failed to load '{}'", args.file.display()))?;

    let artifact = module.serialize().context("Failed to compile module")?;
    std::fs::write(&args.output, &artifact)
        .with_context(|| format!("Failed to write '{}'", args.output.display()))?;

    info!(
        output = %args.output.display(),
        artifact_len = artifact.len(),
        "Module compiled"
    );
    Ok(())
}
