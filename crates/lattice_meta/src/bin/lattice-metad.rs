//! Meta daemon entry point.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use lattice_common::HostAddr;
use lattice_kv::{LatticeStore, MemPartManager, ReplicaFabric, StoreOptions};
use lattice_meta::{init_meta_kv, MetaBootOptions};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "lattice-metad", about = "lattice meta daemon")]
struct MetadArgs {
    /// Bind address; empty means use the hostname.
    #[arg(long, default_value = "")]
    local_ip: String,

    /// RPC listen port.
    #[arg(long, default_value_t = 45500)]
    port: u16,

    /// Whether to turn on SO_REUSEPORT on the listen socket.
    #[arg(long, default_value_t = true)]
    reuse_port: bool,

    /// Root data path. Required.
    #[arg(long, env = "LATTICE_META_DATA_PATH", default_value = "")]
    data_path: String,

    /// Comma-separated `host:port` list of meta replicas; empty means
    /// single-node.
    #[arg(long, env = "LATTICE_META_SERVER_ADDRS", default_value = "")]
    meta_server_addrs: String,

    /// I/O pool size.
    #[arg(long, default_value_t = 16)]
    num_io_threads: usize,

    /// Worker pool size.
    #[arg(long, default_value_t = 32)]
    num_worker_threads: usize,

    /// HTTP admin pool size.
    #[arg(long, default_value_t = 3)]
    meta_http_thread_num: usize,

    /// File to hold the process id.
    #[arg(long, default_value = "pids/lattice-metad.pid")]
    pid_file: String,

    /// Whether to run as a daemon process.
    #[arg(long, default_value_t = true)]
    daemonize: bool,

    /// Rewrite legacy meta records into the current format on start.
    #[arg(long, default_value_t = false)]
    upgrade_meta_data: bool,
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

async fn run(args: MetadArgs) -> anyhow::Result<()> {
    anyhow::ensure!(!args.data_path.is_empty(), "meta data path should not be empty");
    write_pid_file(&args.pid_file)?;
    if args.daemonize {
        warn!("daemonize requested; process supervision is external, staying in foreground");
    }

    let local = local_identity(&args.local_ip, args.port);
    info!(identity = %local, "identify myself");

    let meta_peers = HostAddr::parse_list(&args.meta_server_addrs)?;
    let store = LatticeStore::open(
        StoreOptions {
            local: local.clone(),
            // Meta daemons let followers serve reads.
            check_leader: false,
        },
        PathBuf::from(&args.data_path).as_path(),
        ReplicaFabric::new(),
    )?;

    let part_man = MemPartManager::new();
    let service = init_meta_kv(
        store,
        &part_man,
        MetaBootOptions {
            local: local.clone(),
            meta_peers,
            upgrade_meta_data: args.upgrade_meta_data,
            poll_interval: Duration::from_secs(1),
        },
    )
    .await?;

    info!(
        cluster_id = service.cluster_id(),
        port = args.port,
        reuse_port = args.reuse_port,
        io_threads = args.num_io_threads,
        http_threads = args.meta_http_thread_num,
        "the meta daemon started"
    );

    wait_for_shutdown().await?;
    info!("the meta daemon stopped");
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
    let args = MetadArgs::parse();
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
