//! DLRS CLI — committed low-rank seeds, ZK proofs and gossip
//!
//! Commands:
//!   dlrs factorize — factorize a synthetic matrix and report the error
//!   dlrs create    — create a seed and add it to the local store
//!   dlrs list      — list the seeds in the local store
//!   dlrs prove     — prove and verify a capability of a stored seed
//!   dlrs compat    — run a two-party compatibility session between two seeds
//!   dlrs serve     — start a P2P node sharing the stored seeds
//!   dlrs demo      — run a full in-memory demo (gossip, sessions, evolution)

use dlrs_protocol::config::{DlrsConfig, GossipConfig};
use dlrs_protocol::error::{DlrsError, Result};
use dlrs_protocol::factor::Matrix;
use dlrs_protocol::mpc::{initiate, respond, Dealer, Link};
use dlrs_protocol::network::{
    GossipNode, Libp2pTransport, MemoryNetwork, SwarmConfig, Transport,
};
use dlrs_protocol::seed::{
    AnyChangeTrigger, CompositionCertificate, Feedback, OwnedSeed, ReconstructionFitness,
};
use dlrs_protocol::zk::{
    encoded_quality, prove_capability, verify_capability, verify_compatibility, Challenge,
    Compatibility, CompatibilityStatement, SubspaceClaim, ZkContext,
};
use dlrs_protocol::{factorize, FactorTarget, SeedStore};
use nalgebra::DMatrix;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_CONFIG: &str = "dlrs.json";

fn print_usage() {
    println!(
        r#"
╔══════════════════════════════════════════════════════════════╗
║        DLRS v0.2 — Distributed Low-Rank Space                ║
║        Committed seeds + ZK proofs + gossip                  ║
╚══════════════════════════════════════════════════════════════╝

Usage: dlrs <command> [options]

Commands:
  factorize <m> <n> <rank> [--randomized]          Factorize a synthetic matrix
  create    <name> <rank> <m> <n> [domains...]     Create a seed in the local store
  list                                             List stored seeds
  prove     <id> <domain> [bound]                  Prove a capability of a seed
  compat    <id_a> <id_b> [--compose <name>]       Two-party compatibility session
  serve     [port]                                 Start a P2P node
  demo                                             Run the in-memory demo

Configuration is read from $DLRS_CONFIG (default {}) and DLRS_* variables.

Examples:
  dlrs create nlp-core 4 32 24 nlp reasoning
  dlrs prove 3fa2 nlp
  dlrs compat 3fa2 91c0 --compose nlp+vision
  dlrs serve 9000
"#,
        DEFAULT_CONFIG
    );
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    let result = match args[1].as_str() {
        "factorize" => cmd_factorize(&args[2..]),
        "create" => cmd_create(&args[2..]),
        "list" => cmd_list(),
        "prove" => cmd_prove(&args[2..]),
        "compat" => cmd_compat(&args[2..]).await,
        "serve" => cmd_serve(&args[2..]).await,
        "demo" => cmd_demo().await,
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            print_usage();
            Err(DlrsError::InvalidInput(format!("unknown command '{}'", other)))
        }
    };

    if let Err(e) = result {
        eprintln!("\n  Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config() -> Result<DlrsConfig> {
    let path = env::var("DLRS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    DlrsConfig::resolve(Some(Path::new(&path)))
}

fn load_store(config: &DlrsConfig, ctx: &ZkContext) -> Result<SeedStore> {
    let store = SeedStore::open(&config.node.store_path, &config.node.name, ctx.fingerprint())?;
    println!("  Store {} holds {} seeds", config.node.store_path, store.len());
    Ok(store)
}

fn arg<T: FromStr>(args: &[String], index: usize, what: &str) -> Result<T> {
    let raw = args
        .get(index)
        .ok_or_else(|| DlrsError::InvalidInput(format!("missing <{}>", what)))?;
    raw.parse()
        .map_err(|_| DlrsError::InvalidInput(format!("<{}> must be a number, got '{}'", what, raw)))
}

fn short(id: &str) -> &str {
    &id[..8.min(id.len())]
}

/// Rank-`rank` signal plus a little noise
fn synthetic_knowledge(m: usize, n: usize, rank: usize) -> Matrix {
    let left: DMatrix<f64> = DMatrix::new_random(m, rank);
    let right: DMatrix<f64> = DMatrix::new_random(rank, n);
    left * right + DMatrix::<f64>::new_random(m, n) * 0.01
}

fn cmd_factorize(args: &[String]) -> Result<()> {
    let m: usize = arg(args, 0, "m")?;
    let n: usize = arg(args, 1, "n")?;
    let rank: usize = arg(args, 2, "rank")?;
    let mut config = load_config()?;
    if args.iter().any(|a| a == "--randomized") {
        config.factorization.randomized = true;
    }

    let k = synthetic_knowledge(m, n, rank);
    let started = Instant::now();
    let factors = factorize(&k, FactorTarget::Rank(rank), &config.factorization.method())?;
    let elapsed = started.elapsed();
    let error = factors.reconstruction_error(&k);

    println!("\n  Factorized {}x{} to rank {} in {:?}", m, n, factors.rank, elapsed);
    println!("  Method:            {:?}", config.factorization.method());
    println!("  Frobenius error:   {:.6} (relative {:.6})", error, error / k.norm().max(f64::EPSILON));
    println!("  Compression ratio: {:.2}x", factors.compression_ratio());
    println!("  Singular values:   {:?}", factors.sigma.iter().map(|s| format!("{:.3}", s)).collect::<Vec<_>>());
    Ok(())
}

fn cmd_create(args: &[String]) -> Result<()> {
    let name = args
        .first()
        .ok_or_else(|| DlrsError::InvalidInput("usage: dlrs create <name> <rank> <m> <n> [domains...]".into()))?;
    let rank: usize = arg(args, 1, "rank")?;
    let m: usize = arg(args, 2, "m")?;
    let n: usize = arg(args, 3, "n")?;
    let domains: Vec<String> = if args.len() > 4 {
        args[4..].to_vec()
    } else {
        vec!["general".to_string()]
    };

    let config = load_config()?;
    let ctx = ZkContext::new(config.crypto.clone())?;
    let mut store = load_store(&config, &ctx)?;

    let target = match config.factorization.tolerance {
        Some(tolerance) => FactorTarget::Bounded {
            max_rank: rank,
            tolerance,
        },
        None => FactorTarget::Rank(rank),
    };
    let factors = factorize(&synthetic_knowledge(m, n, rank), target, &config.factorization.method())?;
    let owned = OwnedSeed::from_factors(
        &ctx,
        name.as_str(),
        factors,
        domains,
        config.lifecycle.attestation_margin,
        &mut rand::thread_rng(),
    )?;
    println!("\n  {}", owned.seed().summary());
    let id = store.add(owned);
    store.save()?;
    println!("  Created seed {}", id);
    Ok(())
}

fn cmd_list() -> Result<()> {
    let config = load_config()?;
    let ctx = ZkContext::new(config.crypto.clone())?;
    let store = load_store(&config, &ctx)?;
    if store.is_empty() {
        println!("\n  No seeds. Use 'dlrs create' or 'dlrs demo' to get started.");
        return Ok(());
    }
    println!("\n  {}", store.summary());
    println!("  {}", "-".repeat(80));
    for owned in store.list_by_fitness() {
        println!("  [{}] {} ({})", short(&owned.id()), owned.seed().summary(), owned.state());
    }
    Ok(())
}

fn cmd_prove(args: &[String]) -> Result<()> {
    let id = args
        .first()
        .ok_or_else(|| DlrsError::InvalidInput("usage: dlrs prove <id> <domain> [bound]".into()))?;
    let domain = args
        .get(1)
        .ok_or_else(|| DlrsError::InvalidInput("missing <domain>".into()))?;

    let config = load_config()?;
    let ctx = ZkContext::new(config.crypto.clone())?;
    let store = load_store(&config, &ctx)?;
    let owned = store.find(id)?;
    let commitment = &owned.seed().commitment;

    let challenge = Challenge::for_domain(domain, commitment.shape.n());
    let quality = encoded_quality(&ctx, owned.secret(), &challenge)?;
    let bound = match args.get(2) {
        Some(_) => arg(args, 2, "bound")?,
        None => quality * (1.0 - config.lifecycle.attestation_margin),
    };

    let started = Instant::now();
    let proof = prove_capability(&ctx, commitment, owned.secret(), &challenge, bound, &mut rand::thread_rng())?;
    let proved_in = started.elapsed();
    let started = Instant::now();
    verify_capability(&ctx, commitment, &challenge, bound, &proof)?;
    let verified_in = started.elapsed();

    println!("\n  Capability of [{}] in '{}'", short(&owned.id()), domain);
    println!("  Claimed bound: quality >= {:.6}", bound);
    println!("  Proof size:    {} bytes (JSON)", serde_json::to_vec(&proof)?.len());
    println!("  Proved in {:?}, verified in {:?}", proved_in, verified_in);
    Ok(())
}

async fn cmd_compat(args: &[String]) -> Result<()> {
    let usage = || DlrsError::InvalidInput("usage: dlrs compat <id_a> <id_b> [--compose <name>]".into());
    let a_id = args.first().ok_or_else(usage)?;
    let b_id = args.get(1).ok_or_else(usage)?;
    let compose_as = match args.iter().position(|a| a == "--compose") {
        Some(i) => Some(args.get(i + 1).ok_or_else(usage)?.clone()),
        None => None,
    };

    let config = load_config()?;
    let ctx = ZkContext::new(config.crypto.clone())?;
    let mut store = load_store(&config, &ctx)?;
    let a = store.find(a_id)?.clone();
    let b = store.find(b_id)?.clone();

    let subspace = SubspaceClaim::shared_domains(&a.seed().domains, &b.seed().domains, a.seed().shape().n());
    let statement = CompatibilityStatement {
        commitment_a: a.seed().commitment.clone(),
        commitment_b: b.seed().commitment.clone(),
        subspace,
    };
    let (ra, rb) = Dealer::session(statement.subspace.weights.len(), &mut rand::thread_rng());
    let (mut la, mut lb, _cancel) = Link::pair(&config.session);
    let started = Instant::now();
    let (outcome, _) = tokio::join!(
        initiate::<Compatibility>(&ctx, &mut la, &statement, a.secret(), ra),
        respond::<Compatibility>(&ctx, &mut lb, &statement, b.secret(), rb),
    );
    let outcome = outcome?;
    let score = verify_compatibility(&ctx, &statement, &outcome.proof)?;

    println!("\n  Session {} finished in {:?}", outcome.session, started.elapsed());
    println!("  Shared domains: {:?}", statement.subspace.domains);
    println!("  Compatibility:  {:.6} (proof verified)", score);

    if let Some(name) = compose_as {
        let composite = OwnedSeed::compose(&ctx, name, &a, &b, &config.lifecycle, &mut rand::thread_rng())?;
        println!("  {}", composite.seed().summary());
        store.add(composite);
        store.save()?;
    }
    Ok(())
}

async fn cmd_serve(args: &[String]) -> Result<()> {
    let config = load_config()?;
    let port: u16 = args
        .first()
        .and_then(|s| s.parse().ok())
        .unwrap_or(config.node.listen_port);

    println!("\n  Starting DLRS P2P Node...");
    println!("  {}", "=".repeat(50));

    let ctx = Arc::new(ZkContext::new(config.crypto.clone())?);
    let mut store = load_store(&config, &ctx)?;
    store.verify(&ctx)?;

    let (transport, inbox) = Libp2pTransport::start(SwarmConfig {
        listen_port: port,
        heartbeat_secs: 1,
        queue_capacity: config.gossip.inbox_capacity,
    })?;
    let transport = Arc::new(transport);
    println!("  Peer ID: {}", transport.local_id());
    println!("  Parameters: {}", ctx.fingerprint());

    let node = Arc::new(GossipNode::new(
        Arc::clone(&ctx),
        config.gossip.clone(),
        config.lifecycle.clone(),
        transport.clone(),
    )
    .with_session_config(config.session.clone()));
    let restored = store.restore_into(node.view()).await?;
    println!("  Sharing {} seeds. Press Ctrl+C to stop.\n", restored);
    let handle = Arc::clone(&node).start(inbox);

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| DlrsError::Network(format!("waiting for Ctrl+C: {}", e)))?;

    println!("\n  Shutting down...");
    handle.stop().await;
    transport.shutdown();
    println!("  {}", node.view().stats().await);
    store.capture(node.view()).await;
    store.save()?;
    println!("  Saved {} owned seeds to {}", store.len(), store.path().display());
    Ok(())
}

async fn cmd_demo() -> Result<()> {
    println!(
        r#"
╔══════════════════════════════════════════════════════════════╗
║              DLRS v0.2 — Full Demo                           ║
║       Seeds + Gossip + Two-Party Proofs + Evolution          ║
╚══════════════════════════════════════════════════════════════╝
"#
    );
    let config = DlrsConfig::default();
    let ctx = Arc::new(ZkContext::new(config.crypto.clone())?);
    let gossip = GossipConfig {
        announce_interval_ms: 100,
        lifecycle_interval_ms: 500,
        ..config.gossip.clone()
    };

    println!("Step 1: Three nodes join an in-memory network...");
    println!("{}", "-".repeat(60));
    let net = MemoryNetwork::new();
    let mut nodes = Vec::new();
    let mut inboxes = Vec::new();
    for name in ["alice", "bob", "carol"] {
        let (transport, inbox) = net.join(name, gossip.inbox_capacity);
        let node = GossipNode::new(Arc::clone(&ctx), gossip.clone(), config.lifecycle.clone(), Arc::new(transport))
            .with_session_config(config.session.clone());
        nodes.push(Arc::new(node));
        inboxes.push(inbox);
        println!("  {} joined", name);
    }
    let (alice, bob, carol) = (Arc::clone(&nodes[0]), Arc::clone(&nodes[1]), Arc::clone(&nodes[2]));

    println!("\nStep 2: Alice and Bob seal knowledge into seeds...");
    println!("{}", "-".repeat(60));
    let (nlp, vision) = {
        let mut rng = rand::thread_rng();
        let nlp = OwnedSeed::new(&ctx, "nlp-core", &synthetic_knowledge(24, 16, 4), 4, vec!["nlp".into(), "ai".into()], &mut rng)?;
        let vision = OwnedSeed::new(&ctx, "vision-core", &synthetic_knowledge(24, 16, 4), 4, vec!["vision".into(), "ai".into()], &mut rng)?;
        (nlp, vision)
    };
    println!("  {}", nlp.seed().summary());
    println!("  {}", vision.seed().summary());
    let nlp_id = alice.add_seed(nlp.clone()).await?;
    let vision_id = bob.add_seed(vision.clone()).await?;

    println!("\nStep 3: Gossip — fingerprints pushed, payloads pulled and verified...");
    println!("{}", "-".repeat(60));
    let handles: Vec<_> = nodes
        .iter()
        .cloned()
        .zip(inboxes)
        .map(|(node, inbox)| node.start(inbox))
        .collect();
    let deadline = Instant::now() + Duration::from_secs(10);
    while !(carol.view().contains(&nlp_id).await && carol.view().contains(&vision_id).await) {
        if Instant::now() > deadline {
            return Err(DlrsError::Network("seeds did not reach carol in time".into()));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    for node in &nodes {
        println!("  {}: {}", node.id(), node.view().stats().await);
    }

    println!("\nStep 4: Alice and Bob prove compatibility without revealing factors...");
    println!("{}", "-".repeat(60));
    let subspace = SubspaceClaim::shared_domains(&nlp.seed().domains, &vision.seed().domains, nlp.seed().shape().n());
    let statement = CompatibilityStatement {
        commitment_a: nlp.seed().commitment.clone(),
        commitment_b: vision.seed().commitment.clone(),
        subspace: subspace.clone(),
    };
    let (ra, rb) = Dealer::session(subspace.weights.len(), &mut rand::thread_rng());
    let mut outgoing = alice.connect_session(bob.id()).await?;
    let (outcome, _) = tokio::join!(
        initiate::<Compatibility>(&ctx, &mut outgoing.link, &statement, nlp.secret(), ra),
        async {
            let mut incoming = bob
                .accept_session()
                .await
                .ok_or_else(|| DlrsError::Network("bob stopped accepting sessions".into()))?;
            respond::<Compatibility>(&ctx, &mut incoming.link, &statement, vision.secret(), rb).await
        },
    );
    let outcome = outcome?;
    println!(
        "  Session {} over channel {}: compatibility {:.6} on {:?}",
        outcome.session, outgoing.channel, outcome.score, subspace.domains
    );

    let certificate = CompositionCertificate::new(statement, outcome.score, outcome.proof);
    let composite_id = carol
        .view()
        .compose_with_certificate(&ctx, "nlp+vision", &nlp_id, &vision_id, certificate, &config.lifecycle)
        .await?;
    println!("  Carol verified and holds composite [{}]", short(&composite_id));

    println!("\nStep 5: Alice evolves her seed on feedback...");
    println!("{}", "-".repeat(60));
    let observed = nlp.factors().reconstruct() + DMatrix::new_random(24, 16) * 0.2;
    let feedback = Feedback::new(observed, 0.05)?;
    let evolved_id = alice
        .evolve(&nlp_id, &feedback, &ReconstructionFitness, &AnyChangeTrigger)
        .await?;
    match alice.view().get(&evolved_id).await {
        Some(seed) => println!("  {}", seed.summary()),
        None => println!("  seed [{}] was evicted", short(&evolved_id)),
    }

    println!("\nStep 6: Lifecycle round and shutdown...");
    println!("{}", "-".repeat(60));
    for node in &nodes {
        let pruned = node.lifecycle_round().await;
        println!("  {}: pruned {} | {}", node.id(), pruned.len(), node.view().stats().await);
    }
    for handle in handles {
        handle.stop().await;
    }
    println!("\n  Top 'ai' seeds at carol:");
    for seed in carol.view().top_seeds("ai", 5).await {
        println!("    [{}] {} fitness={:.3}", short(&seed.id()), seed.name, seed.fitness);
    }
    println!("\n  Demo complete.");
    Ok(())
}
