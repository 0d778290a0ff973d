//! End-to-end runs of the whole system on the in-process bus

use access_core::messages::ACCESS_DENIED;
use access_core::{
    AccessError, AccessRequest, AccessVerdict, ClientRequest, DealerReply, OperatingMode,
    RelayReply, Token, TokenAssembler, TokenRequest,
};
use access_node::fabric::publish_json;
use access_node::{
    simulate, Deployment, Fabric, HarnessConfig, MessageBus, Subscription, SystemConfig,
    Timeouts, Topic,
};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use std::sync::Arc;
use std::time::Duration;

fn harness(requests: usize) -> HarnessConfig {
    HarnessConfig {
        requests,
        interval: Duration::from_millis(20),
        bit_size: 64,
        reply_timeout: Duration::from_secs(20),
    }
}

fn system(mode: OperatingMode, num_dealers: u32, num_guards: u32) -> SystemConfig {
    SystemConfig {
        num_dealers,
        num_guards,
        bit_size: 64,
        mode,
        timeouts: Timeouts::with_request_timeout(Duration::from_secs(5)),
        ..SystemConfig::default()
    }
}

async fn assert_all_granted(config: SystemConfig, requests: usize) {
    let _ = env_logger::builder().is_test(true).try_init();

    let report = simulate(&config, harness(requests)).await.unwrap();
    assert_eq!(report.sent, requests, "{:?}", report);
    assert_eq!(report.granted, requests, "{:?}", report);
    assert_eq!(report.denied, 0);
    assert_eq!(report.timings.len(), requests);
    assert!(report.total_stats().mean_ms >= report.token_stats().mean_ms);
}

#[tokio::test]
async fn test_centralized_additive() {
    assert_all_granted(system(OperatingMode::CentralizedAdditive, 1, 3), 3).await;
}

#[tokio::test]
async fn test_distributed_additive() {
    assert_all_granted(system(OperatingMode::DistributedAdditive, 3, 4), 3).await;
}

#[tokio::test]
async fn test_distributed_multiplicative() {
    assert_all_granted(system(OperatingMode::DistributedMultiplicative, 3, 4), 3).await;
}

#[tokio::test]
async fn test_single_guard() {
    assert_all_granted(system(OperatingMode::DistributedMultiplicative, 2, 1), 2).await;
}

/// A running system driven by hand through the user topics
struct Driver {
    bus: Arc<MessageBus>,
    replies: Subscription,
    assembler: TokenAssembler,
    deployment: Deployment,
}

impl Driver {
    async fn deploy(config: &SystemConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let setup = config.setup(&mut OsRng).unwrap();
        let bus = Arc::new(MessageBus::new());
        let replies = bus.subscribe(Topic::UserReplies).await.unwrap();
        let deployment = Deployment::deploy(bus.clone(), config, &setup.modulus).await.unwrap();
        let assembler = TokenAssembler::new(
            config.mode,
            setup.modulus,
            setup.blinding,
            config.num_dealers as usize,
        )
        .unwrap();
        Driver { bus, replies, assembler, deployment }
    }

    async fn send(&self, request: ClientRequest) {
        publish_json(&*self.bus, Topic::UserRequests, &request).await.unwrap();
    }

    async fn get_token(&self, id: &str, value: &BigUint) {
        let request = TokenRequest { id: id.to_string(), value: self.assembler.prepare(value) };
        self.send(ClientRequest::GetToken(request)).await;
    }

    async fn get_access(&self, anonymous_id: &str, token: Token) {
        let request = AccessRequest { anonymous_id: anonymous_id.to_string(), token };
        self.send(ClientRequest::GetAccess(request)).await;
    }

    async fn next(&mut self) -> RelayReply {
        tokio::time::timeout(Duration::from_secs(10), self.replies.recv_json())
            .await
            .expect("no reply from the relay")
            .expect("bus closed")
    }

    async fn dealer_replies(&mut self) -> Vec<DealerReply> {
        match self.next().await {
            RelayReply::Dealers { responses, .. } => responses,
            other => panic!("expected dealer replies, got {:?}", other),
        }
    }

    async fn verdict(&mut self) -> AccessVerdict {
        match self.next().await {
            RelayReply::Guards { responses, .. } => AccessVerdict::from_replies(&responses),
            other => panic!("expected guard replies, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_altered_token_denied() {
    let config = system(OperatingMode::DistributedAdditive, 3, 4);
    let mut driver = Driver::deploy(&config).await;
    let value = BigUint::from(12_345u32);

    driver.get_token("User altered", &value).await;
    let replies = driver.dealer_replies().await;
    let token = driver.assembler.assemble("User altered", &value, &replies).unwrap();

    let forged = Token::new(
        token.value.clone(),
        config.modulus.add(&token.signature, &BigUint::from(1u32)),
    );
    driver.get_access("anon forged", forged).await;
    match driver.next().await {
        RelayReply::Guards { id, responses } => {
            assert_eq!(id, "anon forged");
            assert_eq!(responses.len(), 1);
            assert!(!responses[0].success);
            assert_eq!(responses[0].message, ACCESS_DENIED);
        }
        other => panic!("expected guard replies, got {:?}", other),
    }

    driver.get_access("anon genuine", token).await;
    assert_eq!(driver.verdict().await, AccessVerdict::Granted);
    driver.deployment.shutdown();
}

#[tokio::test]
async fn test_repeated_token_request_refused() {
    let config = system(OperatingMode::DistributedMultiplicative, 3, 4);
    let mut driver = Driver::deploy(&config).await;
    let value = BigUint::from(4_242u32);

    driver.get_token("User repeated", &value).await;
    let first = driver.dealer_replies().await;
    assert_eq!(first.len(), 3);
    assert!(first.iter().all(|r| r.success));

    driver.get_token("User repeated", &value).await;
    let second = driver.dealer_replies().await;
    let refusal = AccessError::DuplicateRequest("User repeated".to_string()).to_string();
    assert_eq!(second.len(), 3);
    assert!(second.iter().all(|r| !r.success && r.value.is_none() && r.message == refusal));
    assert!(driver.assembler.assemble("User repeated", &value, &second).is_err());

    // The first issuance stays valid
    let token = driver.assembler.assemble("User repeated", &value, &first).unwrap();
    driver.get_access("anon repeated", token).await;
    assert_eq!(driver.verdict().await, AccessVerdict::Granted);
    driver.deployment.shutdown();
}
