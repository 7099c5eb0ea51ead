//! Storage daemon entry point.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use lattice_common::{HostAddr, IndexManager, SchemaManager};
use lattice_kv::{LatticeStore, MemPartManager, ReplicaFabric, StoreOptions};
use lattice_storage::{ChainTransactionManager, StorageEnv};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "lattice-storaged", about = "lattice storage daemon")]
struct StoragedArgs {
    /// Bind address; empty means use the hostname.
    #[arg(long, default_value = "")]
    local_ip: String,

    /// RPC listen port.
    #[arg(long, default_value_t = 44500)]
    port: u16,

    /// Whether to turn on SO_REUSEPORT on the listen socket.
    #[arg(long, default_value_t = true)]
    reuse_port: bool,

    /// Root data path. Required.
    #[arg(long, env = "LATTICE_STORAGE_DATA_PATH", default_value = "")]
    data_path: String,

    /// Comma-separated `host:port` list of meta replicas.
    #[arg(long, env = "LATTICE_META_SERVER_ADDRS", default_value = "")]
    meta_server_addrs: String,

    /// I/O pool size.
    #[arg(long, default_value_t = 16)]
    num_io_threads: usize,

    /// Worker pool size.
    #[arg(long, default_value_t = 32)]
    num_worker_threads: usize,

    /// File to hold the process id.
    #[arg(long, default_value = "pids/lattice-storaged.pid")]
    pid_file: String,

    /// Whether to run as a daemon process.
    #[arg(long, default_value_t = true)]
    daemonize: bool,

    /// Log every edge routed through an atomic chain.
    #[arg(long, env = "LATTICE_TRACE_ATOMIC", default_value_t = false)]
    trace_atomic: bool,
}

fn local_identity(local_ip: &str, port: u16) -> HostAddr {
    let host = if local_ip.is_empty() {
        fs::read_to_string("/etc/hostname")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "localhost".to_string())
    } else {
        local_ip.to_string()
    };
    HostAddr::new(host, port)
}

fn write_pid_file(path: &str) -> anyhow::Result<()> {
    let path = PathBuf::from(path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, std::process::id().to_string())?;
    Ok(())
}

async fn run(args: StoragedArgs) -> anyhow::Result<()> {
    anyhow::ensure!(
        !args.data_path.is_empty(),
        "storage data path should not be empty"
    );
    write_pid_file(&args.pid_file)?;
    if args.daemonize {
        warn!("daemonize requested; process supervision is external, staying in foreground");
    }

    let local = local_identity(&args.local_ip, args.port);
    info!(identity = %local, "identify myself");
    let meta_addrs = HostAddr::parse_list(&args.meta_server_addrs)?;

    let store = LatticeStore::open(
        StoreOptions {
            local: local.clone(),
            // Storage daemons serve leader reads only.
            check_leader: true,
        },
        PathBuf::from(&args.data_path).as_path(),
        ReplicaFabric::new(),
    )?;

    let part_man = Arc::new(MemPartManager::new());
    part_man.register_listener(store.clone());

    // Processors are constructed per request by the RPC binding; the env
    // outlives them all.
    let _env = Arc::new(StorageEnv {
        store: store.clone(),
        schema_man: Arc::new(SchemaManager::new()),
        index_man: Arc::new(IndexManager::new()),
        txn_man: ChainTransactionManager::new(store),
    });

    info!(
        port = args.port,
        reuse_port = args.reuse_port,
        io_threads = args.num_io_threads,
        meta_addrs = meta_addrs.len(),
        trace_atomic = args.trace_atomic,
        "the storage daemon started"
    );

    wait_for_shutdown().await?;
    info!("the storage daemon stopped");
    Ok(())
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = term.recv() => {}
    }
    info!("shutdown signal received, stopping this server");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = StoragedArgs::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.num_worker_threads.max(1))
        .enable_all()
        .build()?;
    runtime.block_on(run(args))
}
