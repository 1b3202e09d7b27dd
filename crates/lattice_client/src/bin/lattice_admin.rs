//! Minimal admin client for server-group management RPCs.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use lattice_client::admin::GroupAdminClient;
use lattice_client::TableName;
use lattice_rpc::admin::{ServerName, TcpAdminConnection};

#[derive(Parser)]
#[command(name = "lattice-admin")]
#[command(about = "Server-group admin client for Lattice", long_about = None)]
struct Args {
    /// Target admin address for a node (host:port).
    #[arg(long, default_value = "127.0.0.1:16030")]
    target: String,
    /// Per-RPC timeout in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    rpc_timeout_ms: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch and print one group as JSON.
    Get {
        #[arg(long)]
        name: String,
    },
    /// Print the group a table is pinned to.
    GetOfTable {
        #[arg(long)]
        table: String,
    },
    /// Print the group a server belongs to.
    GetOfServer {
        #[arg(long)]
        host: String,
        #[arg(long)]
        port: u16,
    },
    /// Move servers (host:port, repeatable) into a target group.
    MoveServers {
        #[arg(long = "server")]
        servers: Vec<String>,
        #[arg(long)]
        target: String,
    },
    /// Move tables (repeatable) into a target group.
    MoveTables {
        #[arg(long = "table")]
        tables: Vec<String>,
        #[arg(long)]
        target: String,
    },
    /// Create a group.
    Add {
        #[arg(long)]
        name: String,
    },
    /// Remove an empty group.
    Remove {
        #[arg(long)]
        name: String,
    },
    /// Trigger a balance pass for a group.
    Balance {
        #[arg(long)]
        name: String,
    },
    /// List every group as JSON.
    List,
}

fn parse_server(raw: &str) -> anyhow::Result<ServerName> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("expected host:port, got {raw}"))?;
    Ok(ServerName {
        host: host.to_string(),
        port: port.parse()?,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let connection = TcpAdminConnection::connect(
        &args.target,
        Duration::from_millis(args.rpc_timeout_ms),
    )
    .await?;
    let client = GroupAdminClient::new(Arc::new(connection));

    match args.command {
        Command::Get { name } => {
            let group = client.get_group(&name).await?;
            match group {
                Some(group) => println!("{}", serde_json::to_string_pretty(&group)?),
                None => println!("no such group: {name}"),
            }
        }
        Command::GetOfTable { table } => {
            let group = client.group_of_table(&TableName::new(table)).await?;
            match group {
                Some(group) => println!("{}", serde_json::to_string_pretty(&group)?),
                None => println!("table is not pinned to a group"),
            }
        }
        Command::GetOfServer { host, port } => {
            let group = client
                .group_of_server(&ServerName { host, port })
                .await?;
            match group {
                Some(group) => println!("{}", serde_json::to_string_pretty(&group)?),
                None => println!("server is not in any group"),
            }
        }
        Command::MoveServers { servers, target } => {
            if servers.is_empty() {
                anyhow::bail!("at least one --server is required");
            }
            let servers = servers
                .iter()
                .map(|raw| parse_server(raw))
                .collect::<anyhow::Result<Vec<_>>>()?;
            client.move_servers(servers, &target).await?;
            println!("ok");
        }
        Command::MoveTables { tables, target } => {
            if tables.is_empty() {
                anyhow::bail!("at least one --table is required");
            }
            let tables = tables.into_iter().map(TableName::new).collect();
            client.move_tables(tables, &target).await?;
            println!("ok");
        }
        Command::Add { name } => {
            client.add_group(&name).await?;
            println!("ok");
        }
        Command::Remove { name } => {
            client.remove_group(&name).await?;
            println!("ok");
        }
        Command::Balance { name } => {
            let ran = client.balance_group(&name).await?;
            println!("balance ran: {ran}");
        }
        Command::List => {
            let groups = client.list_groups().await?;
            println!("{}", serde_json::to_string_pretty(&groups)?);
        }
    }
    Ok(())
}
