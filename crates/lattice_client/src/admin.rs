//! Server-group admin client.
//!
//! A pure pass-through: each operation serializes its arguments into one
//! request message, performs one RPC over the connection, and unwraps the
//! response. No retry, batching, or ordering logic lives here; a remote
//! rejection surfaces with the server's own message.

use std::sync::Arc;

use lattice_rpc::admin::{
    decode_response, encode_request, AdminConnection, AdminRequest, AdminResponse, GroupInfo,
    ServerName,
};
use lattice_rpc::TableName;

use crate::error::AdminError;

pub struct GroupAdminClient {
    connection: Arc<dyn AdminConnection>,
}

impl GroupAdminClient {
    pub fn new(connection: Arc<dyn AdminConnection>) -> Self {
        Self { connection }
    }

    async fn call(&self, request: AdminRequest) -> Result<AdminResponse, AdminError> {
        let encoded = encode_request(&request);
        let raw = self
            .connection
            .call(encoded)
            .await
            .map_err(|err| AdminError::Transport(err.to_string()))?;
        match decode_response(&raw) {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(message)) => Err(AdminError::Remote(message)),
            Err(err) => Err(AdminError::Protocol(err.to_string())),
        }
    }

    pub async fn get_group(&self, name: &str) -> Result<Option<GroupInfo>, AdminError> {
        match self
            .call(AdminRequest::GetGroup {
                name: name.to_string(),
            })
            .await?
        {
            AdminResponse::MaybeGroup(group) => Ok(group),
            _ => Err(AdminError::UnexpectedResponse("get_group")),
        }
    }

    pub async fn group_of_table(&self, table: &TableName) -> Result<Option<GroupInfo>, AdminError> {
        match self
            .call(AdminRequest::GetGroupOfTable {
                table: table.clone(),
            })
            .await?
        {
            AdminResponse::MaybeGroup(group) => Ok(group),
            _ => Err(AdminError::UnexpectedResponse("group_of_table")),
        }
    }

    pub async fn group_of_server(
        &self,
        server: &ServerName,
    ) -> Result<Option<GroupInfo>, AdminError> {
        match self
            .call(AdminRequest::GetGroupOfServer {
                server: server.clone(),
            })
            .await?
        {
            AdminResponse::MaybeGroup(group) => Ok(group),
            _ => Err(AdminError::UnexpectedResponse("group_of_server")),
        }
    }

    pub async fn move_servers(
        &self,
        servers: Vec<ServerName>,
        target: &str,
    ) -> Result<(), AdminError> {
        match self
            .call(AdminRequest::MoveServers {
                servers,
                target: target.to_string(),
            })
            .await?
        {
            AdminResponse::Done => Ok(()),
            _ => Err(AdminError::UnexpectedResponse("move_servers")),
        }
    }

    pub async fn move_tables(
        &self,
        tables: Vec<TableName>,
        target: &str,
    ) -> Result<(), AdminError> {
        match self
            .call(AdminRequest::MoveTables {
                tables,
                target: target.to_string(),
            })
            .await?
        {
            AdminResponse::Done => Ok(()),
            _ => Err(AdminError::UnexpectedResponse("move_tables")),
        }
    }

    pub async fn add_group(&self, name: &str) -> Result<(), AdminError> {
        match self
            .call(AdminRequest::AddGroup {
                name: name.to_string(),
            })
            .await?
        {
            AdminResponse::Done => Ok(()),
            _ => Err(AdminError::UnexpectedResponse("add_group")),
        }
    }

    pub async fn remove_group(&self, name: &str) -> Result<(), AdminError> {
        match self
            .call(AdminRequest::RemoveGroup {
                name: name.to_string(),
            })
            .await?
        {
            AdminResponse::Done => Ok(()),
            _ => Err(AdminError::UnexpectedResponse("remove_group")),
        }
    }

    /// Trigger a balance pass for the group; returns whether one ran.
    pub async fn balance_group(&self, name: &str) -> Result<bool, AdminError> {
        match self
            .call(AdminRequest::BalanceGroup {
                name: name.to_string(),
            })
            .await?
        {
            AdminResponse::Balanced(ran) => Ok(ran),
            _ => Err(AdminError::UnexpectedResponse("balance_group")),
        }
    }

    pub async fn list_groups(&self) -> Result<Vec<GroupInfo>, AdminError> {
        match self.call(AdminRequest::ListGroups).await? {
            AdminResponse::Groups(groups) => Ok(groups),
            _ => Err(AdminError::UnexpectedResponse("list_groups")),
        }
    }
}
