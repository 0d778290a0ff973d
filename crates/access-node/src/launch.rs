//! Launching nodes
//!
//! [`spawn_node`] starts one Dealer, Guard or Relay on a fabric; [`Deployment`] starts
//! a whole system on one fabric and [`simulate`] runs the client harness against it
//! in process.

use crate::bus::MessageBus;
use crate::client::{ClientHarness, HarnessConfig, HarnessReport};
use crate::config::{Role, SystemConfig};
use crate::dealer_node::DealerNode;
use crate::fabric::Fabric;
use crate::guard_node::GuardNode;
use crate::relay::Relay;
use crate::{NodeError, NodeResult};
use access_core::{Dealer, Guard, Modulus, ParticipantId, TokenAssembler};
use rand::rngs::OsRng;
use std::sync::Arc;
use tokio::task::JoinHandle;

fn check_index(role: Role, id: ParticipantId, count: u32) -> NodeResult<()> {
    if id.as_u32() == 0 || id.as_u32() > count {
        return Err(NodeError::Config(format!(
            "{} is out of range, the system has {}",
            role, count
        )));
    }
    Ok(())
}

/// Subscribe a node for `role` and spawn its event loop
pub async fn spawn_node(
    role: Role,
    fabric: Arc<dyn Fabric>,
    config: &SystemConfig,
    modulus: &Modulus,
) -> NodeResult<JoinHandle<NodeResult<()>>> {
    let scheme = config.mode.scheme();
    match role {
        Role::Dealer(id) => {
            check_index(role, id, config.num_dealers)?;
            let dealer = Dealer::new(
                id,
                config.num_guards,
                scheme,
                modulus.clone(),
                config.bit_size,
                &mut OsRng,
            )?;
            let node = DealerNode::start(dealer, fabric).await?;
            Ok(tokio::spawn(node.run()))
        }
        Role::Guard(id) => {
            check_index(role, id, config.num_guards)?;
            let guard =
                Guard::new(id, scheme, modulus.clone(), config.num_dealers, config.num_guards)?;
            let node = GuardNode::start(guard, fabric, config.timeouts).await?;
            Ok(tokio::spawn(node.run()))
        }
        Role::Relay => {
            let relay =
                Relay::start(fabric, config.num_dealers, config.num_guards, config.timeouts).await?;
            Ok(tokio::spawn(relay.run()))
        }
        Role::User => Err(NodeError::Config(
            "the user role runs the client harness, not a node".to_string(),
        )),
    }
}

/// Run a single node until its fabric closes
pub async fn run_node(
    role: Role,
    fabric: Arc<dyn Fabric>,
    config: &SystemConfig,
    modulus: &Modulus,
) -> NodeResult<()> {
    log::info!("Starting {} in {} mode", role, config.mode);
    let handle = spawn_node(role, fabric, config, modulus).await?;
    handle.await.map_err(|e| NodeError::Task(e.to_string()))?
}

/// Every Dealer, Guard and the Relay of one system
#[derive(Debug)]
pub struct Deployment {
    tasks: Vec<(Role, JoinHandle<NodeResult<()>>)>,
}

impl Deployment {
    /// Start the Guards, the Relay and the Dealers on `fabric`
    pub async fn deploy(
        fabric: Arc<dyn Fabric>,
        config: &SystemConfig,
        modulus: &Modulus,
    ) -> NodeResult<Self> {
        config.validate()?;
        let roles = ParticipantId::range(config.num_guards)
            .map(Role::Guard)
            .chain(std::iter::once(Role::Relay))
            .chain(ParticipantId::range(config.num_dealers).map(Role::Dealer));

        let mut tasks = Vec::new();
        for role in roles {
            tasks.push((role, spawn_node(role, fabric.clone(), config, modulus).await?));
        }
        log::info!(
            "Deployed {} dealers, {} guards and a relay in {} mode",
            config.num_dealers,
            config.num_guards,
            config.mode
        );
        Ok(Deployment { tasks })
    }

    /// Roles of the running nodes
    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.tasks.iter().map(|(role, _)| *role)
    }

    /// Roles whose event loop already ended
    pub fn finished(&self) -> Vec<Role> {
        self.tasks
            .iter()
            .filter(|(_, task)| task.is_finished())
            .map(|(role, _)| *role)
            .collect()
    }

    /// Stop every node
    pub fn shutdown(self) {
        for (role, task) in self.tasks {
            log::debug!("Stopping {}", role);
            task.abort();
        }
    }
}

/// Launch a whole system on an in-process bus and run the harness against it
pub async fn simulate(config: &SystemConfig, harness: HarnessConfig) -> NodeResult<HarnessReport> {
    let setup = config.setup(&mut OsRng)?;
    let bus: Arc<dyn Fabric> = Arc::new(MessageBus::new());
    let deployment = Deployment::deploy(bus.clone(), config, &setup.modulus).await?;

    let assembler = TokenAssembler::new(
        config.mode,
        setup.modulus,
        setup.blinding,
        config.num_dealers as usize,
    )?;
    let report = ClientHarness::start(bus, assembler, harness).await?.run().await;

    for role in deployment.finished() {
        log::warn!("{} stopped before the harness finished", role);
    }
    deployment.shutdown();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use access_core::OperatingMode;

    #[tokio::test]
    async fn test_deployment_roles() {
        let config = SystemConfig {
            num_dealers: 2,
            num_guards: 3,
            bit_size: 32,
            mode: OperatingMode::DistributedAdditive,
            ..SystemConfig::default()
        };
        let bus: Arc<dyn Fabric> = Arc::new(MessageBus::new());
        let deployment = Deployment::deploy(bus, &config, &config.modulus).await.unwrap();

        let roles: Vec<Role> = deployment.roles().collect();
        assert_eq!(roles.len(), 6);
        assert_eq!(roles[0], Role::Guard(ParticipantId(1)));
        assert_eq!(roles[3], Role::Relay);
        assert_eq!(roles[5], Role::Dealer(ParticipantId(2)));
        deployment.shutdown();
    }

    #[tokio::test]
    async fn test_spawn_rejects_bad_roles() {
        let config = SystemConfig::default();
        let bus: Arc<dyn Fabric> = Arc::new(MessageBus::new());

        let outside = Role::Guard(ParticipantId(9));
        let result = spawn_node(outside, bus.clone(), &config, &config.modulus).await;
        assert!(matches!(result, Err(NodeError::Config(_))));

        let result = spawn_node(Role::User, bus, &config, &config.modulus).await;
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[tokio::test]
    async fn test_centralized_mode_rejects_several_dealers() {
        let config = SystemConfig {
            num_dealers: 2,
            mode: OperatingMode::CentralizedAdditive,
            ..SystemConfig::default()
        };
        assert!(simulate(&config, HarnessConfig::default()).await.is_err());
    }
}
