use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "shard-router")]
pub struct Opt {
    /// shard descriptor listing servers, hash method and replicas
    #[structopt(long = "config", parse(from_os_str), default_value = "config/shards.json")]
    pub configuration_path: PathBuf,

    /// hash method, overriding the descriptor
    #[structopt(long)]
    pub hash: Option<String>,

    /// virtual nodes per server, overriding the descriptor
    #[structopt(short, long)]
    pub replicas: Option<i64>,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(StructOpt, Debug, PartialEq)]
pub enum Command {
    /// Show the tag, ring position and node each key routes to
    Route {
        #[structopt(required = true)]
        keys: Vec<String>,
    },

    /// Show ring membership and each node's share of the keyspace
    Ring,

    /// Run a few commands through the router against in-memory nodes
    Demo,
}
