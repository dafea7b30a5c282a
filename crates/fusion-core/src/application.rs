// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fused applications: the live containers of one job and their wiring.
use std::collections::{BTreeMap, BTreeSet};

use fusion_topology::{AppId, NodeIndex, Topology, TopologyConnectionId};
use tracing::{debug, info, instrument};

use crate::config::FuserConfig;
use crate::connection::FusedContainerConnection;
use crate::container::{ContainerSpecification, FusedContainer};
use crate::error::{Diagnostics, FuseError};
use crate::ident::{ContainerIndex, ContainerPortIndex, FusedContainerConnectionId};
use crate::persist::{PersistedApplication, PersistedContainer};

/// One inter-container link resolved to concrete container ports.
#[derive(Debug, Clone, Copy)]
struct Link {
    topology_connection: TopologyConnectionId,
    source: (ContainerIndex, ContainerPortIndex),
    destination: (ContainerIndex, ContainerPortIndex),
}

/// All containers of one job plus the connections between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusedApplication {
    id: AppId,
    config: FuserConfig,
    next_container_index: ContainerIndex,
    containers: BTreeMap<ContainerIndex, FusedContainer>,
    connections: BTreeMap<FusedContainerConnectionId, FusedContainerConnection>,
    diagnostics: Diagnostics,
}

impl FusedApplication {
    /// Creates an application with no containers.
    pub fn new(id: AppId, config: FuserConfig) -> Self {
        Self {
            id,
            config,
            next_container_index: ContainerIndex(0),
            containers: BTreeMap::new(),
            connections: BTreeMap::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Builds one container per specification, in order, and wires them.
    #[instrument(skip(topology, specs, config), fields(app = %id, specs = specs.len()))]
    pub fn construct(
        topology: &mut Topology,
        id: AppId,
        specs: &[ContainerSpecification],
        config: FuserConfig,
    ) -> Result<Self, FuseError> {
        let mut app = Self::new(id, config);
        app.add_containers(topology, specs)?;
        info!(
            containers = app.containers.len(),
            connections = app.connections.len(),
            anomalies = app.diagnostics.len(),
            "fused application constructed"
        );
        Ok(app)
    }

    /// Builds containers for `specs` and wires them against the live set.
    ///
    /// Either every container is added or none is. Builds run against a
    /// staged copy of the topology, so a failure leaves both the application
    /// and the topology as they were.
    #[instrument(skip(self, topology, specs), fields(app = %self.id, specs = specs.len()))]
    pub fn add_containers(
        &mut self,
        topology: &mut Topology,
        specs: &[ContainerSpecification],
    ) -> Result<Vec<ContainerIndex>, FuseError> {
        self.check_ownership(specs)?;
        let mut staged = self.clone();
        let mut staged_topology = topology.clone();
        let added = staged.add_in_place(&mut staged_topology, specs)?;
        *self = staged;
        *topology = staged_topology;
        debug!(added = added.len(), "containers added");
        Ok(added)
    }

    fn add_in_place(
        &mut self,
        topology: &mut Topology,
        specs: &[ContainerSpecification],
    ) -> Result<Vec<ContainerIndex>, FuseError> {
        let mut diags = Diagnostics::new();
        let mut added = Vec::with_capacity(specs.len());
        for spec in specs {
            let container = FusedContainer::build(
                topology,
                self.id,
                self.next_container_index,
                spec,
                &self.config,
                &mut diags,
            )?;
            added.push(container.index());
            self.containers.insert(container.index(), container);
            self.next_container_index = self.next_container_index.next();
        }
        for link in self.plan_links(&added, &mut diags)? {
            self.connect(link.topology_connection, link.source, link.destination)?;
        }
        self.diagnostics.absorb(diags);
        Ok(added)
    }

    /// Rejects `specs` that would give a node a second owner.
    ///
    /// Checked before anything is built, against the live containers and
    /// against the earlier entries of `specs`.
    fn check_ownership(&self, specs: &[ContainerSpecification]) -> Result<(), FuseError> {
        let mut owners = self.owner_map()?;
        let mut index = self.next_container_index;
        for spec in specs {
            for node in &spec.nodes {
                if let Some(first) = owners.insert((spec.topology_app_id, *node), index) {
                    return Err(FuseError::NodeOwnedTwice {
                        node: *node,
                        first,
                        second: index,
                    });
                }
            }
            index = index.next();
        }
        Ok(())
    }

    /// Retires a container and drops every container connection touching it.
    ///
    /// Queued ports the container injected are removed from the topology, so
    /// whoever owns its nodes next derives them from scratch.
    #[instrument(skip(self, topology), fields(app = %self.id))]
    pub fn remove_container(
        &mut self,
        topology: &mut Topology,
        index: ContainerIndex,
    ) -> Result<FusedContainer, FuseError> {
        let cleared = self.container(index)?.clear_injected_queues(topology)?;
        let removed = self
            .containers
            .remove(&index)
            .ok_or(FuseError::ContainerNotFound {
                app: self.id,
                container: index,
            })?;
        let dropped: Vec<FusedContainerConnectionId> = self
            .connections
            .keys()
            .filter(|id| id.source_container == index || id.destination_container == index)
            .copied()
            .collect();
        for id in &dropped {
            self.connections.remove(id);
            for peer in [id.source_container, id.destination_container] {
                if let Some(container) = self.containers.get_mut(&peer) {
                    container.unlink(id);
                }
            }
        }
        debug!(
            dropped = dropped.len(),
            injected_queues = cleared,
            "container removed"
        );
        Ok(removed)
    }

    /// Replaces the `removed` containers with containers built from `specs`.
    ///
    /// Fails without changing the application or the topology when any step
    /// fails.
    #[instrument(skip(self, topology, specs), fields(app = %self.id))]
    pub fn refuse(
        &mut self,
        topology: &mut Topology,
        removed: &[ContainerIndex],
        specs: &[ContainerSpecification],
    ) -> Result<Vec<ContainerIndex>, FuseError> {
        let mut staged = self.clone();
        let mut staged_topology = topology.clone();
        for index in removed {
            staged.remove_container(&mut staged_topology, *index)?;
        }
        staged.check_ownership(specs)?;
        let added = staged.add_in_place(&mut staged_topology, specs)?;
        *self = staged;
        *topology = staged_topology;
        Ok(added)
    }

    /// Maps every owned node of every live container to its container.
    ///
    /// A node found in two containers is a contract violation.
    pub fn owner_map(&self) -> Result<BTreeMap<(AppId, NodeIndex), ContainerIndex>, FuseError> {
        let mut owners = BTreeMap::new();
        for container in self.containers.values() {
            for node in container.nodes() {
                let key = (container.topology_app_id(), *node);
                if let Some(first) = owners.insert(key, container.index()) {
                    return Err(FuseError::NodeOwnedTwice {
                        node: *node,
                        first,
                        second: container.index(),
                    });
                }
            }
        }
        Ok(owners)
    }

    /// Resolves the inter-container connections of `added` to port pairs.
    fn plan_links(
        &self,
        added: &[ContainerIndex],
        diags: &mut Diagnostics,
    ) -> Result<Vec<Link>, FuseError> {
        let policy = self.config.anomaly_policy;
        let owners = self.owner_map()?;
        let mut links = Vec::new();
        for index in added {
            let container = self.container(*index)?;
            let tapp_id = container.topology_app_id();
            for conn in container.inter_connections() {
                let source_owner = owners.get(&(tapp_id, conn.source.node)).copied();
                let destination_owner = owners.get(&(tapp_id, conn.destination.node)).copied();
                let (Some(src_c), Some(dst_c)) = (source_owner, destination_owner) else {
                    let node = if source_owner.is_none() {
                        conn.source.node
                    } else {
                        conn.destination.node
                    };
                    diags.record(
                        policy,
                        FuseError::UnassignedPeer {
                            connection: *conn,
                            node,
                        },
                        format!("wiring container {index}"),
                    )?;
                    continue;
                };
                let Some(src_p) = self.container(src_c)?.output_port_for(conn) else {
                    diags.record(
                        policy,
                        FuseError::UnresolvedPort {
                            container: src_c,
                            connection: *conn,
                        },
                        format!("wiring container {index}"),
                    )?;
                    continue;
                };
                let Some(dst_p) = self.container(dst_c)?.input_port_for(conn.destination) else {
                    diags.record(
                        policy,
                        FuseError::UnresolvedPort {
                            container: dst_c,
                            connection: *conn,
                        },
                        format!("wiring container {index}"),
                    )?;
                    continue;
                };
                links.push(Link {
                    topology_connection: *conn,
                    source: (src_c, src_p),
                    destination: (dst_c, dst_p),
                });
            }
        }
        Ok(links)
    }

    /// Registers the container connection for a resolved logical connection.
    ///
    /// An id that already exists is reused; both endpoint ports end up
    /// linked to it exactly once.
    pub fn connect(
        &mut self,
        topology_connection: TopologyConnectionId,
        source: (ContainerIndex, ContainerPortIndex),
        destination: (ContainerIndex, ContainerPortIndex),
    ) -> Result<FusedContainerConnectionId, FuseError> {
        let id = FusedContainerConnectionId {
            app_id: self.id,
            source_container: source.0,
            source_port: source.1,
            destination_container: destination.0,
            destination_port: destination.1,
        };
        self.container(source.0)?.output_port(source.1)?;
        self.container(destination.0)?.input_port(destination.1)?;

        self.connections
            .entry(id)
            .or_insert_with(|| FusedContainerConnection::new(id, topology_connection));
        self.container_mut(source.0)?
            .output_port_mut(source.1)?
            .port
            .link(id);
        self.container_mut(destination.0)?
            .input_port_mut(destination.1)?
            .port
            .link(id);
        Ok(id)
    }

    /// Application id.
    pub fn id(&self) -> AppId {
        self.id
    }

    /// Configuration used for every build.
    pub fn config(&self) -> &FuserConfig {
        &self.config
    }

    /// Index the next added container will receive.
    pub fn next_container_index(&self) -> ContainerIndex {
        self.next_container_index
    }

    /// Indices of live containers.
    pub fn container_indices(&self) -> BTreeSet<ContainerIndex> {
        self.containers.keys().copied().collect()
    }

    /// Looks up a live container.
    pub fn container(&self, index: ContainerIndex) -> Result<&FusedContainer, FuseError> {
        self.containers
            .get(&index)
            .ok_or(FuseError::ContainerNotFound {
                app: self.id,
                container: index,
            })
    }

    fn container_mut(&mut self, index: ContainerIndex) -> Result<&mut FusedContainer, FuseError> {
        let app = self.id;
        self.containers
            .get_mut(&index)
            .ok_or(FuseError::ContainerNotFound {
                app,
                container: index,
            })
    }

    /// Live containers in index order.
    pub fn containers(&self) -> impl Iterator<Item = &FusedContainer> {
        self.containers.values()
    }

    /// Looks up a container connection.
    pub fn connection(
        &self,
        id: FusedContainerConnectionId,
    ) -> Result<&FusedContainerConnection, FuseError> {
        self.connections
            .get(&id)
            .ok_or(FuseError::ConnectionNotFound(id))
    }

    /// Container connections in id order.
    pub fn connections(&self) -> impl Iterator<Item = &FusedContainerConnection> {
        self.connections.values()
    }

    /// Container hosting `node` of topology application `tapp`.
    pub fn owner_of(&self, tapp: AppId, node: NodeIndex) -> Option<ContainerIndex> {
        self.containers
            .values()
            .find(|c| c.topology_app_id() == tapp && c.owns(node))
            .map(FusedContainer::index)
    }

    /// Anomalies recorded by every operation so far.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Identity fields needed to rebuild this application.
    pub fn persist(&self) -> PersistedApplication {
        PersistedApplication {
            id: self.id,
            next_container_index: self.next_container_index,
            containers: self
                .containers
                .values()
                .map(PersistedContainer::capture)
                .collect(),
        }
    }

    /// Rebuilds an application from persisted identity fields.
    ///
    /// Every derived structure is recomputed; a container whose port tables
    /// come out different from the persisted ones fails recovery.
    #[instrument(skip(topology, persisted, config), fields(app = %persisted.id))]
    pub fn restore(
        topology: &mut Topology,
        persisted: &PersistedApplication,
        config: FuserConfig,
    ) -> Result<Self, FuseError> {
        let mut app = Self::new(persisted.id, config);
        let mut diags = Diagnostics::new();
        let mut staged_topology = topology.clone();
        for stored in &persisted.containers {
            let container = FusedContainer::build(
                &mut staged_topology,
                persisted.id,
                stored.index,
                &stored.specification(),
                &app.config,
                &mut diags,
            )?;
            stored.verify(&container)?;
            app.containers.insert(container.index(), container);
        }
        app.next_container_index = persisted.next_container_index;
        let all: Vec<ContainerIndex> = app.containers.keys().copied().collect();
        for link in app.plan_links(&all, &mut diags)? {
            app.connect(link.topology_connection, link.source, link.destination)?;
        }
        app.diagnostics = diags;
        *topology = staged_topology;
        info!(
            containers = app.containers.len(),
            connections = app.connections.len(),
            "fused application restored"
        );
        Ok(app)
    }
}
