//! Register/discover protocol client.
//!
//! The register center is just another RPC peer: `REGISTER` and `DISCOVER`
//! frames are correlated request/response pairs sent through the same
//! [`RpcClient`] as service calls.
//!
//! Responses use these shapes:
//! - register / unregister: `SUCCESS` with no data
//! - discover: `SUCCESS` with the address as a string, or
//!   `SERVICE_NOT_FOUND`

use std::collections::BTreeSet;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::client::RpcClient;
use crate::correlation::generate_request_id;
use crate::error::{Result, RpcError};
use crate::protocol::{
    DiscoveryQuery, Message, RegistryAction, RegistryCommand, ResponseCode,
};

/// Client side of the register center protocol.
#[derive(Clone)]
pub struct RegisterClient {
    client: RpcClient,
    center: SocketAddr,
}

impl RegisterClient {
    /// Talk to the register center named in the client's configuration.
    pub fn new(client: RpcClient) -> Self {
        let center = client.config().register_center;
        Self::with_center(client, center)
    }

    pub fn with_center(client: RpcClient, center: SocketAddr) -> Self {
        Self { client, center }
    }

    #[inline]
    pub fn center(&self) -> SocketAddr {
        self.center
    }

    /// Announce that `service_name` is served at `address`.
    pub async fn register(&self, service_name: &str, address: SocketAddr) -> Result<()> {
        self.command(RegistryAction::Register, service_name, address)
            .await
    }

    /// Withdraw `address` for `service_name`.
    pub async fn unregister(&self, service_name: &str, address: SocketAddr) -> Result<()> {
        self.command(RegistryAction::Unregister, service_name, address)
            .await
    }

    /// Resolve `service_name` to one provider address.
    ///
    /// # Errors
    ///
    /// [`RpcError::DiscoveryMiss`] if the center knows no address for it.
    pub async fn discover(&self, service_name: &str) -> Result<SocketAddr> {
        let message = Message::discover(DiscoveryQuery {
            request_id: generate_request_id(),
            service_name: service_name.to_string(),
        })
        .with_serializer(self.client.config().serializer);

        let response = self.client.call(self.center, message).await?;
        if response.response_code == ResponseCode::ServiceNotFound {
            return Err(RpcError::DiscoveryMiss(service_name.to_string()));
        }

        let data = response.into_result()?.ok_or_else(|| {
            RpcError::Serialization(format!("discover {service_name}: response has no address"))
        })?;
        let addr: SocketAddr = serde_json::from_value(data)?;

        tracing::debug!("Discovered {} at {}", service_name, addr);
        Ok(addr)
    }

    async fn command(
        &self,
        action: RegistryAction,
        service_name: &str,
        address: SocketAddr,
    ) -> Result<()> {
        let message = Message::register(RegistryCommand {
            request_id: generate_request_id(),
            action,
            service_name: service_name.to_string(),
            address,
        })
        .with_serializer(self.client.config().serializer);

        self.client.call(self.center, message).await?.into_result()?;
        tracing::info!(
            "{:?} {} at {} with register center {}",
            action,
            service_name,
            address,
            self.center
        );
        Ok(())
    }
}

/// Register-center view of one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub service_name: String,
    pub addresses: BTreeSet<SocketAddr>,
}

impl RegistryEntry {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            addresses: BTreeSet::new(),
        }
    }

    /// Apply a register or unregister command for this service.
    ///
    /// Returns whether the address set changed.
    pub fn apply(&mut self, command: &RegistryCommand) -> bool {
        match command.action {
            RegistryAction::Register => self.addresses.insert(command.address),
            RegistryAction::Unregister => self.addresses.remove(&command.address),
        }
    }

    /// Address handed out by discovery: the lowest one.
    pub fn pick(&self) -> Option<SocketAddr> {
        self.addresses.iter().next().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}
