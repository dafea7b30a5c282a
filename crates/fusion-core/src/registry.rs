// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Process-wide index of fused applications.
//!
//! The registry is an ordinary value; callers own it and pass it by `&mut`.
use std::collections::BTreeMap;

use fusion_topology::AppId;
use tracing::debug;

use crate::application::FusedApplication;
use crate::connection::FusedContainerConnection;
use crate::container::FusedContainer;
use crate::error::FuseError;
use crate::ident::{ContainerIndex, ContainerPortIndex, FusedContainerConnectionId};
use crate::port::{FusedContainerInputPort, FusedContainerOutputPort};

/// Fused applications keyed by id.
#[derive(Debug, Clone, Default)]
pub struct FusionRegistry {
    applications: BTreeMap<AppId, FusedApplication>,
}

impl FusionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an application; its id must be free.
    pub fn register(&mut self, app: FusedApplication) -> Result<(), FuseError> {
        let id = app.id();
        if self.applications.contains_key(&id) {
            return Err(FuseError::DuplicateApplication(id));
        }
        debug!(app = %id, "fused application registered");
        self.applications.insert(id, app);
        Ok(())
    }

    /// Removes an application when its job ends.
    pub fn deregister(&mut self, id: AppId) -> Result<FusedApplication, FuseError> {
        self.applications
            .remove(&id)
            .ok_or(FuseError::ApplicationNotFound(id))
    }

    /// Registered application ids.
    pub fn application_ids(&self) -> impl Iterator<Item = AppId> + '_ {
        self.applications.keys().copied()
    }

    /// Looks up an application.
    pub fn application(&self, id: AppId) -> Result<&FusedApplication, FuseError> {
        self.applications
            .get(&id)
            .ok_or(FuseError::ApplicationNotFound(id))
    }

    /// Looks up an application mutably.
    pub fn application_mut(&mut self, id: AppId) -> Result<&mut FusedApplication, FuseError> {
        self.applications
            .get_mut(&id)
            .ok_or(FuseError::ApplicationNotFound(id))
    }

    /// Looks up a container.
    pub fn container(
        &self,
        app: AppId,
        container: ContainerIndex,
    ) -> Result<&FusedContainer, FuseError> {
        self.application(app)?.container(container)
    }

    /// Looks up a container input port.
    pub fn input_port(
        &self,
        app: AppId,
        container: ContainerIndex,
        port: ContainerPortIndex,
    ) -> Result<&FusedContainerInputPort, FuseError> {
        self.container(app, container)?.input_port(port)
    }

    /// Looks up a container output port.
    pub fn output_port(
        &self,
        app: AppId,
        container: ContainerIndex,
        port: ContainerPortIndex,
    ) -> Result<&FusedContainerOutputPort, FuseError> {
        self.container(app, container)?.output_port(port)
    }

    /// Looks up a container connection.
    pub fn connection(
        &self,
        app: AppId,
        id: FusedContainerConnectionId,
    ) -> Result<&FusedContainerConnection, FuseError> {
        self.application(app)?.connection(id)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::config::FuserConfig;

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = FusionRegistry::new();
        registry
            .register(FusedApplication::new(AppId(1), FuserConfig::default()))
            .unwrap();
        let err = registry
            .register(FusedApplication::new(AppId(1), FuserConfig::default()))
            .unwrap_err();
        assert_eq!(err, FuseError::DuplicateApplication(AppId(1)));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn lookups_fail_after_deregistration() {
        let mut registry = FusionRegistry::new();
        registry
            .register(FusedApplication::new(AppId(2), FuserConfig::default()))
            .unwrap();
        registry.deregister(AppId(2)).unwrap();
        assert_eq!(
            registry.container(AppId(2), ContainerIndex(0)).unwrap_err(),
            FuseError::ApplicationNotFound(AppId(2))
        );
    }
}
