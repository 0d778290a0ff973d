//! Client harness
//!
//! Plays the user: sends token requests at a fixed interval, turns each Dealer
//! aggregate into a token, presents the token under a fresh anonymous id and records
//! how long both legs took.

use crate::config::SystemConfig;
use crate::fabric::{publish_json, Fabric, Subscription, Topic};
use crate::{NodeError, NodeResult};
use access_core::{
    AccessRequest, AccessVerdict, ClientRequest, DealerReply, GuardReply, RelayReply,
    TokenAssembler, TokenRequest,
};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bytes of randomness in a token request id
const REQUEST_ID_BYTES: usize = 8;
/// Bytes of randomness in an anonymous id (six hex characters)
const ANONYMOUS_ID_BYTES: usize = 3;

/// Harness parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Token requests to send
    pub requests: usize,
    /// Delay between consecutive token requests
    pub interval: Duration,
    /// Bit size of the random values
    pub bit_size: u64,
    /// Give up when no reply arrived for this long
    pub reply_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            requests: 10,
            interval: Duration::from_millis(1000),
            bit_size: 128,
            reply_timeout: Duration::from_secs(60),
        }
    }
}

/// Latency of one complete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTiming {
    /// From sending `getToken` to holding the token
    pub token: Duration,
    /// From sending `getAccess` to the verdict
    pub access: Duration,
}

impl RequestTiming {
    /// Both legs together
    pub fn total(&self) -> Duration {
        self.token + self.access
    }
}

/// Mean and population standard deviation, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatencyStats {
    /// Mean
    pub mean_ms: f64,
    /// Population standard deviation
    pub std_ms: f64,
}

impl LatencyStats {
    /// Summarize a set of durations; zero for an empty set
    pub fn from_samples<I: IntoIterator<Item = Duration>>(samples: I) -> Self {
        let ms: Vec<f64> = samples.into_iter().map(|d| d.as_nanos() as f64 / 1e6).collect();
        if ms.is_empty() {
            return LatencyStats::default();
        }
        let n = ms.len() as f64;
        let mean_ms = ms.iter().sum::<f64>() / n;
        let variance = ms.iter().map(|x| (x - mean_ms).powi(2)).sum::<f64>() / n;
        LatencyStats {
            mean_ms,
            std_ms: variance.sqrt(),
        }
    }
}

impl fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} ms ± {:.3} ms", self.mean_ms, self.std_ms)
    }
}

/// Outcome counts and timings of a harness run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarnessReport {
    /// Token requests sent
    pub sent: usize,
    /// Tokens accepted by the Guards
    pub granted: usize,
    /// Tokens rejected by the Guards
    pub denied: usize,
    /// Access requests the Guards gave up on
    pub stalled: usize,
    /// Access requests no Guard answered
    pub incomplete: usize,
    /// Token requests that never produced a token
    pub failed: usize,
    /// Timings of every request that got a Guard decision
    pub timings: Vec<RequestTiming>,
}

impl HarnessReport {
    fn record(&mut self, verdict: AccessVerdict) {
        match verdict {
            AccessVerdict::Granted => self.granted += 1,
            AccessVerdict::Denied => self.denied += 1,
            AccessVerdict::Stalled => self.stalled += 1,
            AccessVerdict::Incomplete => self.incomplete += 1,
        }
    }

    /// Requests that reached a final outcome of any kind
    pub fn completed(&self) -> usize {
        self.granted + self.denied + self.stalled + self.incomplete + self.failed
    }

    /// Token leg latency
    pub fn token_stats(&self) -> LatencyStats {
        LatencyStats::from_samples(self.timings.iter().map(|t| t.token))
    }

    /// Access leg latency
    pub fn access_stats(&self) -> LatencyStats {
        LatencyStats::from_samples(self.timings.iter().map(|t| t.access))
    }

    /// End-to-end latency
    pub fn total_stats(&self) -> LatencyStats {
        LatencyStats::from_samples(self.timings.iter().map(RequestTiming::total))
    }

    /// Report file name for a launch
    pub fn csv_file_name(system: &SystemConfig) -> String {
        format!(
            "times_dealers_{}_guards_{}_bitsize_{}_mode_{}.csv",
            system.num_dealers, system.num_guards, system.bit_size, system.mode
        )
    }

    /// Header row and one row of latency figures
    pub fn to_csv(&self) -> String {
        let token = self.token_stats();
        let access = self.access_stats();
        let total = self.total_stats();
        format!(
            "token_mean,token_std,access_mean,access_std,total_mean,total_std\n{},{},{},{},{},{}\n",
            token.mean_ms, token.std_ms, access.mean_ms, access.std_ms, total.mean_ms, total.std_ms
        )
    }

    /// Write [`to_csv`](Self::to_csv) into `dir`, returning the file path
    pub fn write_csv(&self, dir: &Path, system: &SystemConfig) -> NodeResult<PathBuf> {
        let path = dir.join(Self::csv_file_name(system));
        fs::write(&path, self.to_csv())?;
        Ok(path)
    }
}

struct TokenInFlight {
    value: BigUint,
    sent: Instant,
}

struct AccessInFlight {
    token: Duration,
    sent: Instant,
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill(buf.as_mut_slice());
    hex::encode(buf)
}

/// Drives a load of token and access requests through the Relay
pub struct ClientHarness {
    fabric: Arc<dyn Fabric>,
    assembler: TokenAssembler,
    replies: Subscription,
    config: HarnessConfig,
    tokens: HashMap<String, TokenInFlight>,
    accesses: HashMap<String, AccessInFlight>,
    report: HarnessReport,
}

impl ClientHarness {
    /// Subscribe to Relay replies
    pub async fn start(
        fabric: Arc<dyn Fabric>,
        assembler: TokenAssembler,
        config: HarnessConfig,
    ) -> NodeResult<Self> {
        if config.interval.is_zero() {
            return Err(NodeError::Config("request interval must be positive".to_string()));
        }
        let replies = fabric.subscribe(Topic::UserReplies).await?;
        Ok(ClientHarness {
            fabric,
            assembler,
            replies,
            config,
            tokens: HashMap::new(),
            accesses: HashMap::new(),
            report: HarnessReport::default(),
        })
    }

    async fn request_token(&mut self) -> NodeResult<()> {
        let id = format!("User {}", random_hex(REQUEST_ID_BYTES));
        let value = self.assembler.random_value(self.config.bit_size, &mut OsRng);
        let request = ClientRequest::GetToken(TokenRequest {
            id: id.clone(),
            value: self.assembler.prepare(&value),
        });

        log::debug!("{}: requesting token", id);
        self.tokens.insert(
            id,
            TokenInFlight {
                value,
                sent: Instant::now(),
            },
        );
        self.report.sent += 1;
        publish_json(self.fabric.as_ref(), Topic::UserRequests, &request).await
    }

    async fn on_dealers(&mut self, id: String, responses: Vec<DealerReply>) -> NodeResult<()> {
        let pending = match self.tokens.remove(&id) {
            Some(pending) => pending,
            None => {
                log::debug!("{}: unexpected dealer aggregate", id);
                return Ok(());
            }
        };

        let token = match self.assembler.assemble(&id, &pending.value, &responses) {
            Ok(token) => token,
            Err(e) => {
                log::warn!("{}: no token: {}", id, e);
                self.report.failed += 1;
                return Ok(());
            }
        };

        let anonymous_id = random_hex(ANONYMOUS_ID_BYTES);
        log::debug!("{}: token ready, presenting as {}", id, anonymous_id);
        self.accesses.insert(
            anonymous_id.clone(),
            AccessInFlight {
                token: pending.sent.elapsed(),
                sent: Instant::now(),
            },
        );
        let request = ClientRequest::GetAccess(AccessRequest { anonymous_id, token });
        publish_json(self.fabric.as_ref(), Topic::UserRequests, &request).await
    }

    fn on_guards(&mut self, id: String, responses: Vec<GuardReply>) {
        let pending = match self.accesses.remove(&id) {
            Some(pending) => pending,
            None => {
                log::debug!("{}: unexpected guard decision", id);
                return;
            }
        };

        let verdict = AccessVerdict::from_replies(&responses);
        match verdict {
            AccessVerdict::Granted => log::info!("{}: Accept", id),
            AccessVerdict::Denied => log::info!("{}: Reject", id),
            other => log::warn!("{}: {}", id, other),
        }
        self.report.record(verdict);
        if verdict != AccessVerdict::Incomplete {
            self.report.timings.push(RequestTiming {
                token: pending.token,
                access: pending.sent.elapsed(),
            });
        }
    }

    fn idle(&self) -> bool {
        self.report.sent >= self.config.requests
            && self.tokens.is_empty()
            && self.accesses.is_empty()
    }

    /// Send every request and wait for every outcome
    pub async fn run(mut self) -> NodeResult<HarnessReport> {
        log::info!(
            "Harness: {} requests every {:?} in {} mode",
            self.config.requests,
            self.config.interval,
            self.assembler.mode()
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        let mut deadline = tokio::time::Instant::now() + self.config.reply_timeout;

        while !self.idle() {
            let sending = self.report.sent < self.config.requests;
            tokio::select! {
                _ = ticker.tick(), if sending => {
                    self.request_token().await?;
                    deadline = tokio::time::Instant::now() + self.config.reply_timeout;
                }
                reply = self.replies.recv_json::<RelayReply>() => {
                    match reply {
                        Some(RelayReply::Dealers { id, responses, .. }) => {
                            self.on_dealers(id, responses).await?
                        }
                        Some(RelayReply::Guards { id, responses }) => self.on_guards(id, responses),
                        None => break,
                    }
                    deadline = tokio::time::Instant::now() + self.config.reply_timeout;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    log::warn!(
                        "Harness: no reply for {:?}, abandoning {} token and {} access requests",
                        self.config.reply_timeout,
                        self.tokens.len(),
                        self.accesses.len()
                    );
                    break;
                }
            }
        }

        self.report.failed += self.tokens.len();
        self.report.incomplete += self.accesses.len();
        self.report.failed += self.config.requests.saturating_sub(self.report.sent);

        let report = self.report;
        log::info!(
            "Harness: {} granted, {} denied, {} stalled, {} incomplete, {} failed",
            report.granted,
            report.denied,
            report.stalled,
            report.incomplete,
            report.failed
        );
        log::info!(
            "Harness: token {}, access {}, total {}",
            report.token_stats(),
            report.access_stats(),
            report.total_stats()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use access_core::messages::{ACCESS_GRANTED, TOKEN_EVALUATED};
    use access_core::{BlindingKey, Modulus, OperatingMode, ParticipantId};

    #[test]
    fn test_latency_stats() {
        let stats = LatencyStats::from_samples(vec![
            Duration::from_millis(2),
            Duration::from_millis(4),
            Duration::from_millis(4),
            Duration::from_millis(4),
            Duration::from_millis(5),
            Duration::from_millis(5),
            Duration::from_millis(7),
            Duration::from_millis(9),
        ]);
        assert!((stats.mean_ms - 5.0).abs() < 1e-9);
        assert!((stats.std_ms - 2.0).abs() < 1e-9);

        assert_eq!(LatencyStats::from_samples(Vec::new()), LatencyStats::default());
    }

    #[test]
    fn test_report_csv() {
        let report = HarnessReport {
            sent: 1,
            granted: 1,
            timings: vec![RequestTiming {
                token: Duration::from_millis(10),
                access: Duration::from_millis(20),
            }],
            ..HarnessReport::default()
        };
        assert_eq!(report.completed(), 1);
        assert_eq!(
            report.to_csv(),
            "token_mean,token_std,access_mean,access_std,total_mean,total_std\n10,0,20,0,30,0\n"
        );

        let system = SystemConfig {
            num_dealers: 2,
            num_guards: 5,
            bit_size: 64,
            mode: OperatingMode::DistributedAdditive,
            ..SystemConfig::default()
        };
        assert_eq!(
            HarnessReport::csv_file_name(&system),
            "times_dealers_2_guards_5_bitsize_64_mode_distributed-additive.csv"
        );
    }

    #[test]
    fn test_random_hex_length() {
        assert_eq!(random_hex(ANONYMOUS_ID_BYTES).len(), 6);
        assert_eq!(random_hex(REQUEST_ID_BYTES).len(), 16);
    }

    /// Answers on behalf of a single multiplicative Dealer holding share 5 and a
    /// single Guard that grants everything
    async fn fake_relay(bus: Arc<MessageBus>, key: BlindingKey) {
        let mut requests = bus.subscribe(Topic::UserRequests).await.unwrap();
        while let Some(request) = requests.recv_json::<ClientRequest>().await {
            let reply = match request {
                ClientRequest::GetToken(r) => RelayReply::Dealers {
                    id: r.id.clone(),
                    value: r.value.clone(),
                    responses: vec![DealerReply {
                        dealer: ParticipantId(1),
                        id: r.id,
                        value: Some(r.value.modpow(&BigUint::from(5u32), &key.n)),
                        success: true,
                        message: TOKEN_EVALUATED.to_string(),
                    }],
                },
                ClientRequest::GetAccess(r) => {
                    assert_eq!(
                        r.token.signature,
                        r.token.value.modpow(&BigUint::from(5u32), &key.n)
                    );
                    RelayReply::Guards {
                        id: r.anonymous_id.clone(),
                        responses: vec![GuardReply {
                            guard: ParticipantId(1),
                            id: r.anonymous_id,
                            success: true,
                            message: ACCESS_GRANTED.to_string(),
                        }],
                    }
                }
            };
            publish_json(&*bus, Topic::UserReplies, &reply).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_harness_blinds_and_reports() {
        let key = BlindingKey::from_parts(
            BigUint::from(91u32),
            BigUint::from(5u32),
            BigUint::from(5u32),
        )
        .unwrap();
        let modulus = Modulus::from_u64(91).unwrap();
        let assembler = TokenAssembler::new(
            OperatingMode::DistributedMultiplicative,
            modulus,
            Some(key.clone()),
            1,
        )
        .unwrap();

        let bus = Arc::new(MessageBus::new());
        let relay = tokio::spawn(fake_relay(bus.clone(), key));

        let config = HarnessConfig {
            requests: 3,
            interval: Duration::from_millis(10),
            bit_size: 16,
            reply_timeout: Duration::from_secs(5),
        };
        let harness = ClientHarness::start(bus.clone(), assembler, config).await.unwrap();
        let report = harness.run().await.unwrap();

        assert_eq!(report.sent, 3);
        assert_eq!(report.granted, 3);
        assert_eq!(report.timings.len(), 3);
        relay.abort();
    }

    #[tokio::test]
    async fn test_harness_gives_up_without_relay() {
        let assembler =
            TokenAssembler::new(OperatingMode::DistributedAdditive, Modulus::default(), None, 2)
                .unwrap();
        let bus = Arc::new(MessageBus::new());
        let config = HarnessConfig {
            requests: 2,
            interval: Duration::from_millis(10),
            bit_size: 16,
            reply_timeout: Duration::from_millis(200),
        };
        let harness = ClientHarness::start(bus, assembler, config).await.unwrap();
        let report = harness.run().await.unwrap();

        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.granted, 0);
    }

    #[tokio::test]
    async fn test_harness_rejects_zero_interval() {
        let assembler =
            TokenAssembler::new(OperatingMode::DistributedAdditive, Modulus::default(), None, 2)
                .unwrap();
        let config = HarnessConfig {
            interval: Duration::ZERO,
            ..HarnessConfig::default()
        };
        let result = ClientHarness::start(Arc::new(MessageBus::new()), assembler, config).await;
        assert!(matches!(result, Err(NodeError::Config(_))));
    }
}
