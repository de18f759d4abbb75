use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use proctop::config::{Config, load_config, try_load_config_from_path};
use proctop::format::{format_bytes, format_percent, format_uptime, truncate_unicode};
use proctop::system::collector::Collector;
use proctop::system::details::{EnvVar, FileHandle, Library, MemoryMap, NetworkConnection, ThreadInfo};
use proctop::system::kill::ProcessKiller;
use proctop::system::platform::{self, HostConfig};
use proctop::system::process::ProcessInfo;
use proctop::system::resolver::NameResolver;
use proctop::system::snapshot::DataSnapshot;
use proctop::system::store::DataStore;

const COMMAND_WIDTH: usize = 60;
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(
    name = "proctop",
    version,
    about = "Headless process monitor: process tree snapshots, drill-down and tree-aware kill"
)]
struct Cli {
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Refresh rate in milliseconds
    #[arg(long)]
    refresh_rate: Option<u64>,

    /// Log filter, e.g. `debug` or `proctop=trace` (overrides config and RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format on stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Number of snapshots to print.
    #[arg(long, default_value_t = 1)]
    iterations: usize,

    /// Emit JSON instead of text.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Show threads, files, connections, maps, environment and libraries of one process.
    #[arg(long, conflicts_with = "kill")]
    pid: Option<u32>,

    /// Terminate a process.
    #[arg(long)]
    kill: Option<u32>,

    /// With --kill: terminate the whole subtree, deepest first.
    #[arg(long, requires = "kill", default_value_t = false)]
    tree: bool,

    /// With --kill: send SIGKILL instead of SIGTERM.
    #[arg(long, requires = "kill", default_value_t = false)]
    force: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = load_config_for_cli(&cli)?;
    init_tracing(&cli, &config);

    let host = platform::detect_host(config.proc.root.clone())
        .wrap_err_with(|| format!("cannot read {}", config.proc.root.display()))?;
    debug!(?host, "Detected host");

    if let Some(pid) = cli.kill {
        return run_kill(&cli, &config, &host, pid);
    }
    if let Some(pid) = cli.pid {
        return run_details(&cli, &config, &host, pid);
    }
    run_snapshots(&cli, &config, &host)
}

fn load_config_for_cli(cli: &Cli) -> Result<Config> {
    // An explicitly named file must load; the default location may be absent.
    let mut config = match &cli.config {
        Some(path) => try_load_config_from_path(path)?,
        None => load_config(),
    };

    if let Some(rate) = cli.refresh_rate {
        config.general.refresh_rate_ms = rate;
    }
    if let Some(ref level) = cli.log_level {
        config.general.log_level = level.clone();
    }

    Ok(config)
}

fn init_tracing(cli: &Cli, config: &Config) {
    let filter = match (&cli.log_level, EnvFilter::try_from_default_env()) {
        (None, Ok(from_env)) => from_env,
        _ => EnvFilter::try_new(&config.general.log_level).unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    match cli.log_format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }
}

fn run_snapshots(cli: &Cli, config: &Config, host: &HostConfig) -> Result<()> {
    if cli.iterations == 0 {
        return Err(eyre!("--iterations must be greater than 0"));
    }

    let collector = Collector::new(
        platform::host_process_data(host)?,
        platform::host_system_data(host)?,
    );
    let store = DataStore::with_options(
        collector,
        config.general.refresh_interval(),
        config.general.error_log_capacity,
    );

    let (tx, rx) = mpsc::channel();
    store.set_on_data_updated(move |snapshot| {
        let _ = tx.send(snapshot);
    });
    store.start()?;

    // The first tick only primes the CPU counters.
    rx.recv().map_err(|_| eyre!("collector stopped unexpectedly"))?;
    for i in 0..cli.iterations {
        let snapshot = rx.recv().map_err(|_| eyre!("collector stopped unexpectedly"))?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&*snapshot)?);
        } else {
            if i > 0 {
                println!();
            }
            print_snapshot(&snapshot);
        }
    }
    store.stop();
    info!(iterations = cli.iterations, "Done");

    for err in store.recent_errors() {
        eprintln!("warning: {err}");
    }
    Ok(())
}

fn print_snapshot(snapshot: &DataSnapshot) {
    let totals = &snapshot.totals;
    println!(
        "Tasks: {} ({} running, {} threads)  CPU: {}  Load: {:.2} {:.2} {:.2}  Up: {}",
        totals.process_count,
        totals.running_count,
        totals.thread_count,
        format_percent(totals.cpu_usage_percent),
        totals.load_average.one,
        totals.load_average.five,
        totals.load_average.fifteen,
        format_uptime(totals.uptime_seconds),
    );
    println!(
        "Mem: {} / {} ({} available)  Swap: {} / {}",
        format_bytes(totals.memory_used),
        format_bytes(totals.memory_total),
        format_bytes(totals.memory_available),
        format_bytes(totals.swap_used),
        format_bytes(totals.swap_total),
    );
    let cores: Vec<String> = totals.per_core_usage.iter().map(|u| format!("{u:.0}")).collect();
    println!("Cores: [{}]", cores.join(" "));
    println!();
    println!(
        "{:>7} {:<10} {:>7} {:>7} {:>9} {:>9}  COMMAND",
        "PID", "USER", "CPU%", "TREE%", "MEM", "TREE MEM"
    );

    for (pid, depth) in snapshot.tree.visible_pids(&HashSet::new()) {
        let Some(node) = snapshot.tree.get(pid) else {
            continue;
        };
        let info = &node.info;
        let label = format!("{}{}", "  ".repeat(depth), display_command(info));
        println!(
            "{:>7} {:<10} {:>7.1} {:>7.1} {:>9} {:>9}  {}",
            pid,
            truncate_unicode(&info.user, 10),
            info.cpu_percent,
            node.subtree_cpu_percent,
            format_bytes(info.memory_bytes),
            format_bytes(node.subtree_memory),
            truncate_unicode(&label, COMMAND_WIDTH),
        );
    }
}

fn display_command(info: &ProcessInfo) -> &str {
    if info.command.is_empty() {
        &info.name
    } else {
        &info.command
    }
}

#[derive(Serialize)]
struct ConnectionView {
    #[serde(flatten)]
    connection: NetworkConnection,
    local_service: String,
    remote_host: String,
    remote_service: String,
}

#[derive(Serialize)]
struct ProcessDetails {
    process: ProcessInfo,
    threads: Vec<ThreadInfo>,
    files: Vec<FileHandle>,
    connections: Vec<ConnectionView>,
    memory_maps: Vec<MemoryMap>,
    environment: Vec<EnvVar>,
    libraries: Vec<Library>,
}

fn run_details(cli: &Cli, config: &Config, host: &HostConfig, pid: u32) -> Result<()> {
    let mut provider = platform::host_process_data(host)?;
    let process = provider
        .process_info(pid)
        .ok_or_else(|| eyre!("process {pid} not found"))?;

    let connections = provider.network_connections(pid);
    let connections = if config.resolver.enabled {
        let resolver = system_resolver(config)?;
        resolver.start()?;
        describe_connections(&resolver, connections)
    } else {
        connections
            .into_iter()
            .map(|connection| ConnectionView {
                remote_host: connection.remote_address.clone(),
                connection,
                local_service: String::new(),
                remote_service: String::new(),
            })
            .collect()
    };

    let details = ProcessDetails {
        threads: provider.threads(pid),
        files: provider.file_handles(pid),
        connections,
        memory_maps: provider.memory_maps(pid),
        environment: provider.environment(pid),
        libraries: provider.libraries(pid),
        process,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&details)?);
    } else {
        print_details(&details);
    }
    Ok(())
}

#[cfg(unix)]
fn system_resolver(config: &Config) -> Result<NameResolver> {
    use proctop::system::resolver::SystemLookup;
    Ok(NameResolver::new(SystemLookup, &config.resolver.services_path))
}

#[cfg(not(unix))]
fn system_resolver(_config: &Config) -> Result<NameResolver> {
    Err(eyre!("name resolution is only available on unix hosts"))
}

/// Enqueue every peer, then give the background worker a bounded amount of
/// time to answer before reading the cache.
fn describe_connections(
    resolver: &NameResolver,
    connections: Vec<NetworkConnection>,
) -> Vec<ConnectionView> {
    for conn in &connections {
        resolver.hostname(&conn.remote_address);
    }
    let deadline = Instant::now() + RESOLVE_TIMEOUT;
    while Instant::now() < deadline
        && connections
            .iter()
            .any(|conn| resolver.hostname(&conn.remote_address).is_empty())
    {
        thread::sleep(Duration::from_millis(25));
    }

    connections
        .into_iter()
        .map(|connection| {
            let proto = connection.protocol.transport();
            let host = resolver.hostname(&connection.remote_address);
            ConnectionView {
                local_service: resolver.service_name(connection.local_port, proto),
                remote_service: resolver.service_name(connection.remote_port, proto),
                remote_host: if host.is_empty() {
                    connection.remote_address.clone()
                } else {
                    host
                },
                connection,
            }
        })
        .collect()
}

fn print_details(details: &ProcessDetails) {
    let p = &details.process;
    println!("{} (PID {}, parent {})", p.name, p.pid, p.ppid);
    println!("  Command: {}", p.command);
    println!("  Executable: {}", p.exe_path);
    let uid = p.uid.map(|uid| uid.to_string()).unwrap_or_else(|| "?".to_string());
    println!("  User: {} ({uid})  State: {}", p.user, p.state.label());
    println!(
        "  Memory: {} resident, {} virtual ({:.1}%)",
        format_bytes(p.memory_bytes),
        format_bytes(p.virtual_bytes),
        p.memory_percent
    );
    println!("  Priority: {}  Nice: {}  Threads: {}", p.priority, p.nice, p.threads);

    println!("\nThreads ({}):", details.threads.len());
    for t in &details.threads {
        println!(
            "  {:>7} {:<16} {:<9} cpu{:<3} {}",
            t.tid,
            truncate_unicode(&t.name, 16),
            t.state.label(),
            t.processor,
            t.current_library
        );
    }

    println!("\nOpen files ({}):", details.files.len());
    for f in &details.files {
        println!("  {:>5} {:<10} {}", f.fd, f.kind.label(), f.target);
    }

    println!("\nConnections ({}):", details.connections.len());
    for c in &details.connections {
        let conn = &c.connection;
        println!(
            "  {:<5} {}:{} {} -> {}:{} {} {}",
            conn.protocol.table_name(),
            conn.local_address,
            conn.local_port,
            c.local_service,
            c.remote_host,
            conn.remote_port,
            c.remote_service,
            conn.state
        );
    }

    println!("\nMemory maps ({}):", details.memory_maps.len());
    for m in &details.memory_maps {
        println!(
            "  {:016x}-{:016x} {} {:>9} {}",
            m.start, m.end, m.permissions, m.size_human, m.path
        );
    }

    println!("\nEnvironment ({}):", details.environment.len());
    for e in &details.environment {
        println!("  {}={}", e.name, e.value);
    }

    println!("\nLibraries ({}):", details.libraries.len());
    for l in &details.libraries {
        let marker = if l.is_executable { "*" } else { " " };
        println!("  {marker} {:<32} {:>9} {}", l.name, l.size_human, l.path);
    }
}

fn run_kill(cli: &Cli, config: &Config, host: &HostConfig, pid: u32) -> Result<()> {
    let killer = ProcessKiller::with_grace_period(platform::host_control(host)?, config.kill.grace_period());
    let result = if cli.tree {
        killer.kill_process_tree(pid, cli.force)
    } else {
        killer.kill_process(pid, cli.force)
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.success && result.process_still_running {
        println!("Signal delivered to PID {pid}, but it is still running (retry with --force)");
    } else if result.success {
        println!("PID {pid} terminated");
    }

    if result.success {
        Ok(())
    } else {
        Err(eyre!("{}", result.error_message()))
    }
}
