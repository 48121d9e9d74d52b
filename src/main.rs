use std::error::Error;
use std::sync::Arc;

use log::{error, info};
use structopt::StructOpt;

use shard_router::{
    opt::{Command, Opt},
    route_key, MemoryStore, ShardConfig, ShardRouter,
};

type Router = ShardRouter<Arc<MemoryStore>>;

fn main() {
    env_logger::init();

    if let Err(err) = run(Opt::from_args()) {
        error!("{}", err);
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn run(opt: Opt) -> Result<(), Box<dyn Error>> {
    info!("CLI Options {:?}", opt);

    let mut conf = ShardConfig::load(&opt.configuration_path)?;
    conf.apply_overrides(opt.hash.clone(), opt.replicas)?;

    // no network client ships with the crate; every server is served in-process
    let router: Router = ShardRouter::from_config(&conf, |server| {
        Ok(Arc::new(MemoryStore::new(server.name.clone())))
    })?;

    match opt.command {
        Command::Route { keys } => route(&router, &keys),
        Command::Ring => ring(&router),
        Command::Demo => demo(&router),
    }
}

fn route(router: &Router, keys: &[String]) -> Result<(), Box<dyn Error>> {
    for key in keys {
        let tag = route_key(key);
        let (node, position) = router.ring().resolve_with_position(tag)?;
        println!("{}\ttag={}\tposition={}\tnode={}", key, tag, position, node);
    }
    Ok(())
}

fn ring(router: &Router) -> Result<(), Box<dyn Error>> {
    let ring = router.ring();
    println!(
        "hash={} replicas={} nodes={} positions={}",
        ring.hash_method(),
        ring.replicas(),
        ring.nodes().len(),
        ring.len()
    );

    let shares = ring.distribution();
    for node in ring.nodes() {
        let share = shares.get(&node).copied().unwrap_or(0.0);
        println!(
            "{}\tpositions={}\tshare={:.2}%",
            node,
            ring.positions_of(&node).len(),
            share * 100.0
        );
    }
    println!("{}", ring.spec().to_json()?);
    Ok(())
}

fn demo(router: &Router) -> Result<(), Box<dyn Error>> {
    for key in &["major{name1:1}", "year{name1:2}", "abcd{name2:9}efg"] {
        println!("{} -> {}", key, router.node_for(key)?);
    }

    router.set("major{name1:1}", "cs")?;
    router.set("year{name1:2}", 4)?;
    println!("major: {}", router.get("major{name1:1}")?);
    println!("year: {}", router.get("year{name1:2}")?);

    router.rpush("upvotes{name1:1}", 400)?;
    println!("upvote: {}", router.lpop("upvotes{name1:1}")?);

    router.rpush("upvotes{name1:1}", "upvotes")?;
    router.lpush("upvotes{name1:1}", 1)?;
    println!("upvote: {}", router.rpop("upvotes{name1:1}")?);
    println!("upvote: {}", router.blpop_default(&["upvotes{name1:1}"])?);

    match router.get("never-set") {
        Ok(value) => println!("never-set: {}", value),
        Err(err) => println!("never-set: {}", err),
    }
    Ok(())
}
