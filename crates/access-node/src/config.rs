//! Deployment configuration
//!
//! Peer addresses come from the environment, one comma-separated `host:port` list per
//! role:
//!
//! | Variable           | Content                         |
//! |--------------------|---------------------------------|
//! | `DEALER_ADDRESSES` | one address per Dealer, in order |
//! | `GUARD_ADDRESSES`  | one address per Guard, in order  |
//! | `RELAY_ADDRESS`    | the Relay                       |
//! | `USER_ADDRESS`     | the client harness              |

use crate::fabric::Topic;
use crate::{NodeError, NodeResult};
use access_core::{BlindingKey, Modulus, OperatingMode, ParticipantId};
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Request and sweep timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// How long a Guard waits for its peers before replying "Request Stalled"
    pub request: Duration,
    /// How long the Relay waits before flushing an incomplete aggregate; longer than
    /// `request` so stalled Guard replies arrive first
    pub relay: Duration,
    /// Interval between expiry sweeps
    pub sweep: Duration,
}

impl Timeouts {
    /// Guard timeout `request`, Relay timeout a fifth longer
    pub fn with_request_timeout(request: Duration) -> Self {
        Timeouts {
            request,
            relay: request + request / 5,
            sweep: (request / 30).clamp(Duration::from_millis(10), Duration::from_secs(1)),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::with_request_timeout(Duration::from_secs(30))
    }
}

/// Retry policy for outbound TCP connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    /// Attempts before giving up
    pub attempts: u32,
    /// Wait between attempts
    pub backoff: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        ConnectPolicy {
            attempts: 100,
            backoff: Duration::from_millis(100),
        }
    }
}

/// A node's place in the deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Dealer with the given index
    Dealer(ParticipantId),
    /// Guard with the given index
    Guard(ParticipantId),
    /// Relay
    Relay,
    /// Client harness
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Dealer(id) => write!(f, "dealer {}", id),
            Role::Guard(id) => write!(f, "guard {}", id),
            Role::Relay => f.write_str("relay"),
            Role::User => f.write_str("user"),
        }
    }
}

/// Address book of every node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddresses {
    /// Dealer addresses, by index
    pub dealers: Vec<String>,
    /// Guard addresses, by index
    pub guards: Vec<String>,
    /// Relay address
    pub relay: String,
    /// Client harness address
    pub user: String,
}

impl PeerAddresses {
    /// Read the address book from the process environment
    pub fn from_env() -> NodeResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the address book through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> NodeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let list = |key: &str| -> NodeResult<Vec<String>> {
            let raw = lookup(key).ok_or_else(|| NodeError::Config(format!("{} is not set", key)))?;
            let addrs: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if addrs.is_empty() {
                return Err(NodeError::Config(format!("{} is empty", key)));
            }
            Ok(addrs)
        };
        let single = |key: &str| -> NodeResult<String> {
            let mut addrs = list(key)?;
            if addrs.len() != 1 {
                return Err(NodeError::Config(format!("{} must hold exactly one address", key)));
            }
            Ok(addrs.remove(0))
        };

        Ok(PeerAddresses {
            dealers: list("DEALER_ADDRESSES")?,
            guards: list("GUARD_ADDRESSES")?,
            relay: single("RELAY_ADDRESS")?,
            user: single("USER_ADDRESS")?,
        })
    }

    /// Check there is an address for every configured participant
    pub fn check_counts(&self, num_dealers: u32, num_guards: u32) -> NodeResult<()> {
        if self.dealers.len() < num_dealers as usize || self.guards.len() < num_guards as usize {
            return Err(NodeError::Config(format!(
                "need {} dealer and {} guard addresses, got {} and {}",
                num_dealers,
                num_guards,
                self.dealers.len(),
                self.guards.len()
            )));
        }
        Ok(())
    }

    /// Address a role listens on
    pub fn address_of(&self, role: Role) -> NodeResult<&str> {
        let addr = match role {
            Role::Dealer(id) if id.as_u32() > 0 => self.dealers.get(id.index()),
            Role::Guard(id) if id.as_u32() > 0 => self.guards.get(id.index()),
            Role::Relay => Some(&self.relay),
            Role::User => Some(&self.user),
            _ => None,
        };
        addr.map(String::as_str)
            .ok_or_else(|| NodeError::Config(format!("no address for {}", role)))
    }

    /// Which addresses each topic is delivered to
    pub fn routes(&self, num_dealers: u32, num_guards: u32) -> HashMap<Topic, Vec<String>> {
        let dealers: Vec<String> =
            self.dealers.iter().take(num_dealers as usize).cloned().collect();
        let guards: Vec<String> = self.guards.iter().take(num_guards as usize).cloned().collect();

        let mut routes = HashMap::new();
        routes.insert(Topic::TokenRequests, dealers);
        routes.insert(Topic::AccessRequests, guards.clone());
        routes.insert(Topic::Gather, guards.clone());
        routes.insert(Topic::DealerReplies, vec![self.relay.clone()]);
        routes.insert(Topic::GuardReplies, vec![self.relay.clone()]);
        routes.insert(Topic::GuardReady, vec![self.relay.clone()]);
        routes.insert(Topic::UserRequests, vec![self.relay.clone()]);
        routes.insert(Topic::UserReplies, vec![self.user.clone()]);
        for (id, addr) in ParticipantId::range(num_guards).zip(guards) {
            routes.insert(Topic::Shares(id), vec![addr]);
        }
        routes
    }
}

/// Parameters of one system launch
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Number of Dealers
    pub num_dealers: u32,
    /// Number of Guards
    pub num_guards: u32,
    /// Bit size of secrets and user values
    pub bit_size: u64,
    /// Modulus of the additive modes; replaced by a fresh RSA modulus in the anonymous mode
    pub modulus: Modulus,
    /// Operating mode
    pub mode: OperatingMode,
    /// Timeouts
    pub timeouts: Timeouts,
}

impl SystemConfig {
    /// Check mode and participant counts
    pub fn validate(&self) -> NodeResult<()> {
        self.mode.validate(self.num_dealers, self.num_guards)?;
        if self.bit_size == 0 {
            return Err(NodeError::Config("bit size must be positive".to_string()));
        }
        Ok(())
    }

    /// Produce the launch-wide material: the modulus everyone shares and, in the
    /// anonymous mode, the user's blinding key
    pub fn setup<R: Rng + ?Sized>(&self, rng: &mut R) -> NodeResult<Setup> {
        self.validate()?;
        if !self.mode.is_anonymous() {
            return Ok(Setup {
                modulus: self.modulus.clone(),
                blinding: None,
            });
        }

        let key = BlindingKey::generate(self.bit_size, rng)?;
        log::info!("Generated {}-bit blinding modulus for {}", key.n.bits(), self.mode);
        Ok(Setup {
            modulus: key.modulus()?,
            blinding: Some(key),
        })
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            num_dealers: 3,
            num_guards: 4,
            bit_size: 128,
            modulus: Modulus::default(),
            mode: OperatingMode::DistributedMultiplicative,
            timeouts: Timeouts::default(),
        }
    }
}

/// Material generated once per launch
#[derive(Debug, Clone)]
pub struct Setup {
    /// Modulus handed to Dealers and Guards
    pub modulus: Modulus,
    /// Blinding key, held by the user only
    pub blinding: Option<BlindingKey>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn env(key: &str) -> Option<String> {
        match key {
            "DEALER_ADDRESSES" => Some("127.0.0.1:7001, 127.0.0.1:7002".to_string()),
            "GUARD_ADDRESSES" => Some("127.0.0.1:7101,127.0.0.1:7102,127.0.0.1:7103".to_string()),
            "RELAY_ADDRESS" => Some("127.0.0.1:7200".to_string()),
            "USER_ADDRESS" => Some("127.0.0.1:7300".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_addresses_from_lookup() {
        let peers = PeerAddresses::from_lookup(env).unwrap();
        assert_eq!(peers.dealers, vec!["127.0.0.1:7001", "127.0.0.1:7002"]);
        assert_eq!(peers.guards.len(), 3);
        assert_eq!(peers.address_of(Role::Guard(ParticipantId(2))).unwrap(), "127.0.0.1:7102");
        assert_eq!(peers.address_of(Role::Relay).unwrap(), "127.0.0.1:7200");
        assert!(peers.address_of(Role::Dealer(ParticipantId(3))).is_err());
        assert!(peers.address_of(Role::Guard(ParticipantId(0))).is_err());

        assert!(peers.check_counts(2, 3).is_ok());
        assert!(peers.check_counts(3, 3).is_err());
    }

    #[test]
    fn test_missing_variable() {
        let result =
            PeerAddresses::from_lookup(|key| if key == "USER_ADDRESS" { None } else { env(key) });
        assert!(matches!(result, Err(NodeError::Config(_))));

        let result = PeerAddresses::from_lookup(|key| {
            if key == "RELAY_ADDRESS" {
                Some("a:1,b:2".to_string())
            } else {
                env(key)
            }
        });
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn test_routes() {
        let peers = PeerAddresses::from_lookup(env).unwrap();
        let routes = peers.routes(2, 3);

        assert_eq!(routes[&Topic::TokenRequests].len(), 2);
        assert_eq!(routes[&Topic::Gather].len(), 3);
        assert_eq!(routes[&Topic::Shares(ParticipantId(3))], vec!["127.0.0.1:7103".to_string()]);
        assert_eq!(routes[&Topic::UserReplies], vec!["127.0.0.1:7300".to_string()]);
        assert!(!routes.contains_key(&Topic::Shares(ParticipantId(4))));
    }

    #[test]
    fn test_timeouts() {
        let t = Timeouts::default();
        assert_eq!(t.request, Duration::from_secs(30));
        assert!(t.relay > t.request);
        assert_eq!(t.sweep, Duration::from_secs(1));

        let t = Timeouts::with_request_timeout(Duration::from_millis(300));
        assert_eq!(t.sweep, Duration::from_millis(10));
    }

    #[test]
    fn test_setup_per_mode() {
        let mut rng = OsRng;
        let config = SystemConfig {
            mode: OperatingMode::DistributedAdditive,
            ..SystemConfig::default()
        };
        let setup = config.setup(&mut rng).unwrap();
        assert_eq!(setup.modulus, Modulus::default());
        assert!(setup.blinding.is_none());

        let config = SystemConfig {
            bit_size: 64,
            ..SystemConfig::default()
        };
        let setup = config.setup(&mut rng).unwrap();
        let key = setup.blinding.unwrap();
        assert_eq!(setup.modulus.value(), &key.n);

        let config = SystemConfig {
            mode: OperatingMode::CentralizedAdditive,
            ..SystemConfig::default()
        };
        assert!(config.setup(&mut rng).is_err());
    }
}
