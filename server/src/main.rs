//! SimpliDFS metadata server: binds the framed transport, wires the
//! metadata authority to a (bootstrapped single-node, by default) Raft
//! node, and starts the audit verifier and repair worker background
//! threads. Grounded on the teacher's binary entry points, which init
//! `tracing-subscriber`, load config, and wrap `main`'s body in `anyhow`.

mod commands;
mod dispatch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use simplidfs_audit::AuditVerifier;
use simplidfs_authority::{AuthorityConfig, MetadataAuthority};
use simplidfs_config::{ClusterConfig, MetricsRegistry};
use simplidfs_health::NodeHealthCache;
use simplidfs_proto::Payload;
use simplidfs_raft::RaftNode;
use simplidfs_repair::RepairWorker;
use simplidfs_verifier::{FetchError, ReplicaVerifier};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "simplidfs-server")]
struct Args {
    /// Optional TOML config file (layered under defaults and
    /// `SIMPLIDFS_*` environment overrides).
    #[arg(long)]
    config: Option<String>,

    /// Comma-separated `id@host:port` peers for Raft. Empty means a
    /// single-node cluster, bootstrapped as leader immediately.
    #[arg(long, default_value = "")]
    peers: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = ClusterConfig::load(args.config.as_deref()).context("loading cluster config")?;
    info!(cluster_id = %config.cluster_id, listen = %config.listen_host, port = config.listen_port, "starting simplidfs-server");

    let health = Arc::new(NodeHealthCache::new(simplidfs_health::HealthCacheConfig {
        failure_threshold: config.health_failure_threshold,
        success_threshold: config.health_success_threshold,
        cooldown: config.health_cooldown(),
    }));

    let authority = Arc::new(MetadataAuthority::new(
        health.clone(),
        AuthorityConfig {
            replication_factor: config.replication_factor,
            heartbeat_timeout: chrono::Duration::seconds(30),
            data_dir: Some(PathBuf::from(&config.data_dir)),
        },
    ));
    authority.load().context("loading persisted metadata")?;

    let peer_ids = parse_peers(&args.peers);
    let metrics = Arc::new(MetricsRegistry::new());

    let raft_authority = authority.clone();
    let raft = Arc::new(RaftNode::new(
        config.cluster_id.clone(),
        peer_ids,
        Box::new(|peer, msg| {
            // No real peer transport wired yet: a cluster running with
            // peers configured needs a RaftMessage sender bridged over
            // `simplidfs-transport`. Single-node deployments never reach
            // this closure because the peer list is empty. Disclosed in
            // DESIGN.md as a known scope limitation.
            tracing::warn!(peer, ?msg, "raft peer transport not wired; message dropped");
        }),
        Box::new(move |cmd: &str| {
            if let Some(command) = commands::AuthorityCommand::decode(cmd) {
                command.apply(&raft_authority);
            }
        }),
        metrics.clone(),
    ));
    // A no-op when `peer_ids` is non-empty; see `RaftNode::bootstrap_single_node`.
    raft.bootstrap_single_node();
    raft.start();

    let verifier = Arc::new(ReplicaVerifier::new(
        |_node: &str, _filename: &str| {
            Err::<simplidfs_digest::Digest, FetchError>(FetchError::Unreachable(
                "cross-node chunk fetch not wired in this deployment".to_string(),
            ))
        },
        metrics.clone(),
    ));
    {
        let authority = authority.clone();
        let health = health.clone();
        std::thread::spawn(move || loop {
            let report = verifier.verify_all(&authority.inode_views(), &health);
            authority.apply_verify_report(&report);
            std::thread::sleep(std::time::Duration::from_secs(5));
        });
    }

    let mut repair = RepairWorker::new(
        authority.clone(),
        health.clone(),
        Box::new(|filename, source, target| {
            info!(filename, source, target, "repair: replicate (no chunk transport wired, logging only)");
        }),
        config.replication_factor,
    );
    repair.start();

    let mut audit_verifier = AuditVerifier::start(simplidfs_audit::AuditLog::global(), std::time::Duration::from_secs(30));

    let mut server = simplidfs_transport::Server::bind((config.listen_host.as_str(), config.listen_port))
        .context("binding listen address")?;
    let dispatch_authority = authority.clone();
    let dispatch_raft = raft.clone();
    server.start(move |mut conn| loop {
        match conn.receive() {
            Ok(Some(bytes)) => {
                let request = Payload::decode(&bytes);
                let response = dispatch::handle(request, &dispatch_authority, &dispatch_raft);
                if conn.send(&response.encode()).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "connection error");
                break;
            }
        }
    });

    info!("simplidfs-server ready; press Ctrl-C to stop");
    ctrlc_wait();

    server.shutdown();
    repair.stop();
    raft.stop();
    audit_verifier.stop();
    Ok(())
}

fn parse_peers(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(|s| s.to_string()).collect()
}

/// Blocks until the process receives a termination signal. No external
/// signal-handling crate is introduced for one `Ctrl-C` wait; a bare
/// channel plus `ctrlc`-style handler would need another dependency this
/// workspace otherwise has no use for, so this blocks on stdin EOF instead
/// (works for both an interactive `Ctrl-D`/`Ctrl-C` and a piped shutdown).
fn ctrlc_wait() {
    let mut buf = String::new();
    let _ = std::io::stdin().read_line(&mut buf);
}
