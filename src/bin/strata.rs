//! Command-line front end: seeds an in-memory graph and runs queries against it.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use serde_json::Value;
use strata::{
    ConnectionArguments, Edge, EdgeSide, EngineConfig, Filter, GraphClient, MemoryTripleStore,
    Node, NodeId, PutRequest,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "strata",
    version,
    about = "Query a seeded in-memory Strata graph",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "JSON file with `nodes` and `edges` to load before running the command"
    )]
    seed: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "STRATA_CONFIG",
        help = "Engine configuration (TOML)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Json,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Page through every node of a type.
    Nodes(NodesCmd),
    /// Fetch one node by id.
    Node {
        #[arg(value_name = "ID")]
        id: String,
    },
    /// Page through the edges of a node.
    Edges(EdgesCmd),
    /// Print the effective engine configuration.
    Config,
}

#[derive(Args, Debug)]
struct PageArgs {
    #[arg(long, help = "Page size when paging forward")]
    first: Option<usize>,

    #[arg(long, value_name = "CURSOR", help = "Resume after this cursor")]
    after: Option<String>,

    #[arg(long, help = "Page size when paging backward")]
    last: Option<usize>,

    #[arg(long, value_name = "CURSOR", help = "Resume before this cursor")]
    before: Option<String>,

    #[arg(
        long = "where",
        value_name = "PROP=VALUE",
        help = "Keep entities whose property equals VALUE (parsed as JSON when possible)"
    )]
    filters: Vec<String>,
}

#[derive(Args, Debug)]
struct NodesCmd {
    #[arg(value_name = "TYPE")]
    type_name: String,

    #[command(flatten)]
    page: PageArgs,
}

#[derive(Args, Debug)]
struct EdgesCmd {
    #[arg(value_name = "ID")]
    id: String,

    #[arg(long = "type", value_name = "EDGE_TYPE", help = "Edge type; all types when omitted")]
    edge_type: Option<String>,

    #[arg(long, value_enum, default_value_t = SideArg::Out, help = "Side of the edge the node sits on")]
    side: SideArg,

    #[command(flatten)]
    page: PageArgs,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum SideArg {
    In,
    Out,
}

impl From<SideArg> for EdgeSide {
    fn from(value: SideArg) -> Self {
        match value {
            SideArg::In => EdgeSide::In,
            SideArg::Out => EdgeSide::Out,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Seed {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_default()?,
    };
    let client = GraphClient::new(std::sync::Arc::new(MemoryTripleStore::new()), config.clone());
    if let Some(path) = &cli.seed {
        load_seed(&client, path)?;
    }

    match cli.command {
        Command::Nodes(cmd) => {
            let mut query = client
                .nodes(cmd.type_name)
                .page(page_arguments(&cmd.page));
            if let Some(filter) = parse_filters(&cmd.page.filters)? {
                query = query.filter(filter);
            }
            let page = query.get()?;
            emit(cli.format, &page, || {
                for edge in &page.edges {
                    println!("{}\t{}", edge.node.id, edge.cursor);
                }
            })?;
        }
        Command::Node { id } => {
            let node = client.node(NodeId::parse(&id)?).get()?;
            emit(cli.format, &node, || {
                if let Some(node) = &node {
                    println!("{} v{}", node.id, node.version());
                }
            })?;
        }
        Command::Edges(cmd) => {
            let source = client.node(NodeId::parse(&cmd.id)?);
            let mut query = match (EdgeSide::from(cmd.side), cmd.edge_type) {
                (EdgeSide::In, Some(edge_type)) => source.in_edges(edge_type),
                (EdgeSide::Out, Some(edge_type)) => source.out_edges(edge_type),
                (EdgeSide::In, None) => source.all_in_edges(),
                (EdgeSide::Out, None) => source.all_out_edges(),
            }
            .page(page_arguments(&cmd.page));
            if let Some(filter) = parse_filters(&cmd.page.filters)? {
                query = query.filter(filter);
            }
            let page = query.get()?;
            emit(cli.format, &page, || {
                for edge in &page.edges {
                    let e = &edge.node;
                    println!("{}\t{} -> {}\t{}", e.edge_type, e.in_id, e.out_id, edge.cursor);
                }
            })?;
        }
        Command::Config => match cli.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
            OutputFormat::Text => print!("{}", config.to_toml_string()?),
        },
    }
    Ok(())
}

fn load_seed(client: &GraphClient, path: &Path) -> Result<(), Box<dyn Error>> {
    let raw = fs::read_to_string(path)?;
    let seed: Seed = serde_json::from_str(&raw)?;
    let (nodes, edges) = (seed.nodes.len(), seed.edges.len());
    let mut request = PutRequest::new().with_mutation_id("seed");
    for node in seed.nodes {
        request = request.put(node);
    }
    for edge in seed.edges {
        request = request.put(edge);
    }
    client.put(request)?;
    info!(path = %path.display(), nodes, edges, "cli.seed.loaded");
    Ok(())
}

fn page_arguments(args: &PageArgs) -> ConnectionArguments {
    ConnectionArguments {
        first: args.first,
        after: args.after.clone(),
        last: args.last,
        before: args.before.clone(),
    }
}

fn parse_filters(raw: &[String]) -> Result<Option<Filter>, Box<dyn Error>> {
    let mut combined: Option<Filter> = None;
    for item in raw {
        let (prop, value) = item
            .split_once('=')
            .ok_or_else(|| format!("filter '{item}' must look like PROP=VALUE"))?;
        let value = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::from(value));
        let filter = Filter::eq(prop, value);
        combined = Some(match combined {
            Some(prev) => prev.and(filter),
            None => filter,
        });
    }
    Ok(combined)
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}
