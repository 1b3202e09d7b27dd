//! Server-group admin protocol.
//!
//! Group management is a thin request/response surface: every operation is
//! one message pair over an `AdminConnection`, with no retry or ordering
//! logic anywhere in the client. Messages are hand-framed big-endian, the
//! same discipline as the rest of the store's wire surfaces.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::tablet::TableName;
use crate::wire::{put_str, put_u32, put_u8, read_str, read_u32, read_u8};

/// A serving node's network identity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerName {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for ServerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One server group: its member nodes and the tables pinned to them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub name: String,
    pub servers: Vec<ServerName>,
    pub tables: Vec<TableName>,
}

/// Admin operations, one variant per RPC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminRequest {
    GetGroup { name: String },
    GetGroupOfTable { table: TableName },
    GetGroupOfServer { server: ServerName },
    MoveServers { servers: Vec<ServerName>, target: String },
    MoveTables { tables: Vec<TableName>, target: String },
    AddGroup { name: String },
    RemoveGroup { name: String },
    BalanceGroup { name: String },
    ListGroups,
}

/// Admin responses; paired with the request variants above.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminResponse {
    MaybeGroup(Option<GroupInfo>),
    Groups(Vec<GroupInfo>),
    Balanced(bool),
    Done,
}

const REQ_GET_GROUP: u8 = 1;
const REQ_GET_GROUP_OF_TABLE: u8 = 2;
const REQ_GET_GROUP_OF_SERVER: u8 = 3;
const REQ_MOVE_SERVERS: u8 = 4;
const REQ_MOVE_TABLES: u8 = 5;
const REQ_ADD_GROUP: u8 = 6;
const REQ_REMOVE_GROUP: u8 = 7;
const REQ_BALANCE_GROUP: u8 = 8;
const REQ_LIST_GROUPS: u8 = 9;

const RESP_MAYBE_GROUP: u8 = 1;
const RESP_GROUPS: u8 = 2;
const RESP_BALANCED: u8 = 3;
const RESP_DONE: u8 = 4;

const STATUS_OK: u8 = 0;
const STATUS_ERR: u8 = 1;

fn put_server(out: &mut Vec<u8>, server: &ServerName) {
    put_str(out, &server.host);
    put_u32(out, u32::from(server.port));
}

fn read_server(data: &[u8], offset: &mut usize) -> anyhow::Result<ServerName> {
    let host = read_str(data, offset)?;
    let port = read_u32(data, offset)?;
    anyhow::ensure!(port <= u32::from(u16::MAX), "port out of range");
    Ok(ServerName {
        host,
        port: port as u16,
    })
}

fn put_group(out: &mut Vec<u8>, group: &GroupInfo) {
    put_str(out, &group.name);
    put_u32(out, group.servers.len() as u32);
    for server in &group.servers {
        put_server(out, server);
    }
    put_u32(out, group.tables.len() as u32);
    for table in &group.tables {
        put_str(out, table.as_str());
    }
}

fn read_group(data: &[u8], offset: &mut usize) -> anyhow::Result<GroupInfo> {
    let name = read_str(data, offset)?;
    let server_count = read_u32(data, offset)? as usize;
    let mut servers = Vec::with_capacity(server_count);
    for _ in 0..server_count {
        servers.push(read_server(data, offset)?);
    }
    let table_count = read_u32(data, offset)? as usize;
    let mut tables = Vec::with_capacity(table_count);
    for _ in 0..table_count {
        tables.push(TableName::new(read_str(data, offset)?));
    }
    Ok(GroupInfo {
        name,
        servers,
        tables,
    })
}

pub fn encode_request(request: &AdminRequest) -> Bytes {
    let mut out = Vec::new();
    match request {
        AdminRequest::GetGroup { name } => {
            put_u8(&mut out, REQ_GET_GROUP);
            put_str(&mut out, name);
        }
        AdminRequest::GetGroupOfTable { table } => {
            put_u8(&mut out, REQ_GET_GROUP_OF_TABLE);
            put_str(&mut out, table.as_str());
        }
        AdminRequest::GetGroupOfServer { server } => {
            put_u8(&mut out, REQ_GET_GROUP_OF_SERVER);
            put_server(&mut out, server);
        }
        AdminRequest::MoveServers { servers, target } => {
            put_u8(&mut out, REQ_MOVE_SERVERS);
            put_u32(&mut out, servers.len() as u32);
            for server in servers {
                put_server(&mut out, server);
            }
            put_str(&mut out, target);
        }
        AdminRequest::MoveTables { tables, target } => {
            put_u8(&mut out, REQ_MOVE_TABLES);
            put_u32(&mut out, tables.len() as u32);
            for table in tables {
                put_str(&mut out, table.as_str());
            }
            put_str(&mut out, target);
        }
        AdminRequest::AddGroup { name } => {
            put_u8(&mut out, REQ_ADD_GROUP);
            put_str(&mut out, name);
        }
        AdminRequest::RemoveGroup { name } => {
            put_u8(&mut out, REQ_REMOVE_GROUP);
            put_str(&mut out, name);
        }
        AdminRequest::BalanceGroup { name } => {
            put_u8(&mut out, REQ_BALANCE_GROUP);
            put_str(&mut out, name);
        }
        AdminRequest::ListGroups => put_u8(&mut out, REQ_LIST_GROUPS),
    }
    Bytes::from(out)
}

pub fn decode_request(data: &[u8]) -> anyhow::Result<AdminRequest> {
    let mut offset = 0usize;
    let tag = read_u8(data, &mut offset)?;
    let request = match tag {
        REQ_GET_GROUP => AdminRequest::GetGroup {
            name: read_str(data, &mut offset)?,
        },
        REQ_GET_GROUP_OF_TABLE => AdminRequest::GetGroupOfTable {
            table: TableName::new(read_str(data, &mut offset)?),
        },
        REQ_GET_GROUP_OF_SERVER => AdminRequest::GetGroupOfServer {
            server: read_server(data, &mut offset)?,
        },
        REQ_MOVE_SERVERS => {
            let count = read_u32(data, &mut offset)? as usize;
            let mut servers = Vec::with_capacity(count);
            for _ in 0..count {
                servers.push(read_server(data, &mut offset)?);
            }
            AdminRequest::MoveServers {
                servers,
                target: read_str(data, &mut offset)?,
            }
        }
        REQ_MOVE_TABLES => {
            let count = read_u32(data, &mut offset)? as usize;
            let mut tables = Vec::with_capacity(count);
            for _ in 0..count {
                tables.push(TableName::new(read_str(data, &mut offset)?));
            }
            AdminRequest::MoveTables {
                tables,
                target: read_str(data, &mut offset)?,
            }
        }
        REQ_ADD_GROUP => AdminRequest::AddGroup {
            name: read_str(data, &mut offset)?,
        },
        REQ_REMOVE_GROUP => AdminRequest::RemoveGroup {
            name: read_str(data, &mut offset)?,
        },
        REQ_BALANCE_GROUP => AdminRequest::BalanceGroup {
            name: read_str(data, &mut offset)?,
        },
        REQ_LIST_GROUPS => AdminRequest::ListGroups,
        other => anyhow::bail!("unknown admin request tag {other}"),
    };
    Ok(request)
}

/// Encode a server-side outcome: the response on success, the remote error
/// message otherwise.
pub fn encode_response(outcome: &Result<AdminResponse, String>) -> Bytes {
    let mut out = Vec::new();
    match outcome {
        Err(message) => {
            put_u8(&mut out, STATUS_ERR);
            put_str(&mut out, message);
        }
        Ok(response) => {
            put_u8(&mut out, STATUS_OK);
            match response {
                AdminResponse::MaybeGroup(group) => {
                    put_u8(&mut out, RESP_MAYBE_GROUP);
                    match group {
                        None => put_u8(&mut out, 0),
                        Some(group) => {
                            put_u8(&mut out, 1);
                            put_group(&mut out, group);
                        }
                    }
                }
                AdminResponse::Groups(groups) => {
                    put_u8(&mut out, RESP_GROUPS);
                    put_u32(&mut out, groups.len() as u32);
                    for group in groups {
                        put_group(&mut out, group);
                    }
                }
                AdminResponse::Balanced(ran) => {
                    put_u8(&mut out, RESP_BALANCED);
                    put_u8(&mut out, u8::from(*ran));
                }
                AdminResponse::Done => put_u8(&mut out, RESP_DONE),
            }
        }
    }
    Bytes::from(out)
}

pub fn decode_response(data: &[u8]) -> anyhow::Result<Result<AdminResponse, String>> {
    let mut offset = 0usize;
    let status = read_u8(data, &mut offset)?;
    if status == STATUS_ERR {
        return Ok(Err(read_str(data, &mut offset)?));
    }
    anyhow::ensure!(status == STATUS_OK, "unknown admin status {status}");
    let tag = read_u8(data, &mut offset)?;
    let response = match tag {
        RESP_MAYBE_GROUP => {
            let present = read_u8(data, &mut offset)? != 0;
            if present {
                AdminResponse::MaybeGroup(Some(read_group(data, &mut offset)?))
            } else {
                AdminResponse::MaybeGroup(None)
            }
        }
        RESP_GROUPS => {
            let count = read_u32(data, &mut offset)? as usize;
            let mut groups = Vec::with_capacity(count);
            for _ in 0..count {
                groups.push(read_group(data, &mut offset)?);
            }
            AdminResponse::Groups(groups)
        }
        RESP_BALANCED => AdminResponse::Balanced(read_u8(data, &mut offset)? != 0),
        RESP_DONE => AdminResponse::Done,
        other => anyhow::bail!("unknown admin response tag {other}"),
    };
    Ok(Ok(response))
}

/// One admin endpoint: ships an encoded request, returns the encoded
/// response. Implementations carry no protocol knowledge.
#[async_trait]
pub trait AdminConnection: Send + Sync + 'static {
    async fn call(&self, request: Bytes) -> anyhow::Result<Bytes>;
}

/// Length-prefixed framing over one TCP connection, serialized so calls on
/// the shared stream cannot interleave.
pub struct TcpAdminConnection {
    stream: Mutex<TcpStream>,
    rpc_timeout: Duration,
}

impl TcpAdminConnection {
    pub async fn connect(addr: &str, rpc_timeout: Duration) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream: Mutex::new(stream),
            rpc_timeout,
        })
    }

    async fn round_trip(&self, request: &[u8]) -> anyhow::Result<Bytes> {
        let mut stream = self.stream.lock().await;
        stream.write_all(&(request.len() as u32).to_be_bytes()).await?;
        stream.write_all(request).await?;
        stream.flush().await?;

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;
        Ok(Bytes::from(body))
    }
}

#[async_trait]
impl AdminConnection for TcpAdminConnection {
    async fn call(&self, request: Bytes) -> anyhow::Result<Bytes> {
        match tokio::time::timeout(self.rpc_timeout, self.round_trip(&request)).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("admin rpc timed out after {:?}", self.rpc_timeout),
        }
    }
}
