//! Local service registry.
//!
//! Maps a service's fully qualified name to the object implementing it and
//! announces each newly published service to the register center.
//!
//! Services are keyed by [`ServiceDescriptor::rpc_service_name`], so two
//! versions (or groups) of the same service can be published side by side.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::net::{TcpListener, UdpSocket};

use super::service::Service;
use crate::error::{Result, RpcError};
use crate::register::RegisterClient;

/// Identity of a published service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceDescriptor {
    pub service_name: String,
    pub group: String,
    pub version: String,
}

impl ServiceDescriptor {
    pub fn new(service_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            group: String::new(),
            version: version.into(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// `name@version`, plus `#group` when a group is set.
    pub fn rpc_service_name(&self) -> String {
        if self.group.is_empty() {
            format!("{}@{}", self.service_name, self.version)
        } else {
            format!("{}@{}#{}", self.service_name, self.version, self.group)
        }
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rpc_service_name())
    }
}

/// A published service.
#[derive(Clone)]
pub struct ServiceRegistration {
    pub descriptor: ServiceDescriptor,
    pub service: Arc<dyn Service>,
    pub address: SocketAddr,
}

impl fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("descriptor", &self.descriptor)
            .field("address", &self.address)
            .finish()
    }
}

/// Address remote callers should use to reach a listener bound to `bound`.
///
/// A wildcard bind (`0.0.0.0` or `::`) is replaced by the local interface
/// address that routes to `peer`, normally the register center. Connecting a
/// UDP socket only selects a route; nothing is sent.
pub async fn advertised_address(bound: SocketAddr, peer: SocketAddr) -> Result<SocketAddr> {
    if !bound.ip().is_unspecified() {
        return Ok(bound);
    }

    let unspecified: IpAddr = if peer.is_ipv4() {
        Ipv4Addr::UNSPECIFIED.into()
    } else {
        Ipv6Addr::UNSPECIFIED.into()
    };
    let socket = UdpSocket::bind(SocketAddr::new(unspecified, 0)).await?;
    socket.connect(peer).await?;
    let local = socket.local_addr()?;

    tracing::debug!("Advertising {} for wildcard bind {}", local.ip(), bound);
    Ok(SocketAddr::new(local.ip(), bound.port()))
}

/// Services hosted by this process.
pub struct ServiceProvider {
    services: DashMap<String, ServiceRegistration>,
    /// Address remote callers reach this process on.
    address: SocketAddr,
    register: Option<RegisterClient>,
}

impl ServiceProvider {
    /// Provider announcing its services at `address` to the register center.
    pub fn new(address: SocketAddr, register: RegisterClient) -> Self {
        Self {
            services: DashMap::new(),
            address,
            register: Some(register),
        }
    }

    /// Provider advertising the address `listener` is reachable on.
    ///
    /// See [`advertised_address`].
    pub async fn for_listener(listener: &TcpListener, register: RegisterClient) -> Result<Self> {
        let address = advertised_address(listener.local_addr()?, register.center()).await?;
        Ok(Self::new(address, register))
    }

    /// Provider that never talks to a register center.
    pub fn local(address: SocketAddr) -> Self {
        Self {
            services: DashMap::new(),
            address,
            register: None,
        }
    }

    #[inline]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Publish `service` under `descriptor`.
    ///
    /// Returns `false` without side effects if the name is already
    /// published. A failed registration with the register center rolls the
    /// local entry back.
    pub async fn publish<S: Service>(&self, descriptor: ServiceDescriptor, service: S) -> Result<bool> {
        self.publish_arc(descriptor, Arc::new(service)).await
    }

    /// Publish an already shared service.
    pub async fn publish_arc(
        &self,
        descriptor: ServiceDescriptor,
        service: Arc<dyn Service>,
    ) -> Result<bool> {
        let name = descriptor.rpc_service_name();

        match self.services.entry(name.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!("Service {} already published", name);
                return Ok(false);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ServiceRegistration {
                    descriptor,
                    service,
                    address: self.address,
                });
            }
        }

        if let Some(register) = &self.register {
            if let Err(e) = register.register(&name, self.address).await {
                self.services.remove(&name);
                return Err(e);
            }
        }

        tracing::info!("Published {} at {}", name, self.address);
        Ok(true)
    }

    /// Withdraw a published service.
    ///
    /// Returns `false` if it was not published.
    pub async fn unpublish(&self, descriptor: &ServiceDescriptor) -> Result<bool> {
        let name = descriptor.rpc_service_name();
        if self.services.remove(&name).is_none() {
            return Ok(false);
        }

        if let Some(register) = &self.register {
            register.unregister(&name, self.address).await?;
        }

        tracing::info!("Unpublished {}", name);
        Ok(true)
    }

    /// Local lookup.
    ///
    /// # Errors
    ///
    /// [`RpcError::ServiceNotFound`] if the service was never published here.
    pub fn get_service(&self, descriptor: &ServiceDescriptor) -> Result<Arc<dyn Service>> {
        let name = descriptor.rpc_service_name();
        self.lookup(&name).ok_or(RpcError::ServiceNotFound(name))
    }

    /// Local lookup by fully qualified name, as carried in requests.
    pub fn lookup(&self, rpc_service_name: &str) -> Option<Arc<dyn Service>> {
        self.services
            .get(rpc_service_name)
            .map(|registration| registration.service.clone())
    }

    /// Names of every published service, sorted.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
