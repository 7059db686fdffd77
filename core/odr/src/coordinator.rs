use std::collections::HashMap;
use std::sync::Arc;

use lxs_distributor::DistRequest;
use lxs_interfaces::{ConfigConsumer, TrustAnchor, TrustAnchorProvider};
use lxs_metrics::increment_counter;
use lxs_retriever::{RetrievalJob, RetrieveManager};
use lxs_types::{keccak256, BlockNumber, Bytes, OdrError, OdrReply, OdrRequest, RequestKind, B256};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::verify::{self, unexpected, HeaderProof};
use crate::Config;

/// A block the caller already trusts, usually taken from its local header chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockRef {
    pub number: BlockNumber,
    pub hash: B256,
}

impl BlockRef {
    pub const fn new(number: BlockNumber, hash: B256) -> Self {
        Self { number, hash }
    }
}

/// Verified result of any of the fetches, shared between coalesced callers.
#[derive(Clone, Debug)]
enum OdrValue {
    Header(HeaderProof),
    TrieNode(Option<Bytes>),
    Receipts(Vec<Bytes>),
    BloomBits(Bytes),
    Code(Bytes),
}

type Shared = Result<OdrValue, OdrError>;

/// Identifies a fetch for coalescing: the wire request plus the root its reply is checked
/// against.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct FetchKey {
    request: OdrRequest,
    root: B256,
}

/// Entry point for everything that needs proven chain data it does not store.
///
/// Every fetch turns into a retrieval job with the matching proof check and blocks the
/// caller until a verified value, exhaustion or cancellation. Identical concurrent
/// fetches share one job.
pub struct OdrCoordinator {
    config: Config,
    retriever: Arc<RetrieveManager>,
    anchors: Arc<dyn TrustAnchorProvider>,
    inflight: Mutex<HashMap<FetchKey, broadcast::Sender<Shared>>>,
}

impl ConfigConsumer for OdrCoordinator {
    const KEY: &'static str = "odr";

    type Config = Config;
}

impl OdrCoordinator {
    pub fn new(
        config: Config,
        retriever: Arc<RetrieveManager>,
        anchors: Arc<dyn TrustAnchorProvider>,
    ) -> Self {
        Self {
            config,
            retriever,
            anchors,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn retriever(&self) -> &Arc<RetrieveManager> {
        &self.retriever
    }

    /// Number of distinct fetches currently on the network.
    pub fn inflight(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Value stored under the hashed `key` in the trie at `root`, a state or storage trie
    /// of `block`. `None` when the trie provably has no such key.
    pub async fn fetch_trie_node(
        &self,
        block: BlockRef,
        root: B256,
        key: B256,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>, OdrError> {
        let request = OdrRequest::TrieProof {
            block_hash: block.hash,
            root,
            key,
        };
        let fetch = FetchKey {
            request: request.clone(),
            root,
        };
        let value = self
            .fetch(fetch, cancel, || {
                let dist = DistRequest::new(request.clone()).min_head(block.number);
                self.job(dist, move |reply| match reply {
                    OdrReply::TrieProof { value, proof } => {
                        verify::verify_trie_proof(root, key, value.clone(), proof)
                            .map(OdrValue::TrieNode)
                    },
                    other => Err(unexpected(RequestKind::TrieNode, other)),
                })
            })
            .await?;
        match value {
            OdrValue::TrieNode(value) => Ok(value),
            other => Err(mixed_up(other)),
        }
    }

    /// All receipts of `block`, checked against the receipts root of its header.
    pub async fn fetch_receipts(
        &self,
        block: BlockRef,
        receipts_root: B256,
        cancel: &CancellationToken,
    ) -> Result<Vec<Bytes>, OdrError> {
        if receipts_root == alloy_trie::EMPTY_ROOT_HASH {
            return Ok(Vec::new());
        }

        let request = OdrRequest::Receipts {
            block_hash: block.hash,
        };
        let fetch = FetchKey {
            request: request.clone(),
            root: receipts_root,
        };
        let value = self
            .fetch(fetch, cancel, || {
                let dist = DistRequest::new(request.clone()).min_head(block.number);
                self.job(dist, move |reply| match reply {
                    OdrReply::Receipts(receipts) => {
                        verify::verify_receipts(receipts_root, receipts)?;
                        Ok(OdrValue::Receipts(receipts.clone()))
                    },
                    other => Err(unexpected(RequestKind::Receipts, other)),
                })
            })
            .await?;
        match value {
            OdrValue::Receipts(receipts) => Ok(receipts),
            other => Err(mixed_up(other)),
        }
    }

    /// Compressed bloom bits vector `bit` of `section`, proven against the latest bloom
    /// trie root. Fails right away when the bloom trie does not cover the section yet.
    pub async fn fetch_bloom_bits(
        &self,
        section: u64,
        bit: u16,
        cancel: &CancellationToken,
    ) -> Result<Bytes, OdrError> {
        let anchor = covering(
            self.anchors.bloom_trie_root(),
            RequestKind::BloomBits,
            section,
        )?;
        let request = OdrRequest::BloomBits {
            bloom_section: anchor.section,
            section,
            bit,
        };
        let fetch = FetchKey {
            request: request.clone(),
            root: anchor.root,
        };
        let head = self.config.bloom_trie_head(anchor.section);
        let value = self
            .fetch(fetch, cancel, || {
                let dist = DistRequest::new(request.clone()).min_head(head);
                self.job(dist, move |reply| match reply {
                    OdrReply::BloomBits { bits, proof } => {
                        verify::verify_bloom_bits(anchor.root, bit, section, bits, proof)?;
                        Ok(OdrValue::BloomBits(bits.clone()))
                    },
                    other => Err(unexpected(RequestKind::BloomBits, other)),
                })
            })
            .await?;
        match value {
            OdrValue::BloomBits(bits) => Ok(bits),
            other => Err(mixed_up(other)),
        }
    }

    /// Contract code with `code_hash` of the account `addr_hash` in the state of `block`.
    pub async fn fetch_code(
        &self,
        block: BlockRef,
        addr_hash: B256,
        code_hash: B256,
        cancel: &CancellationToken,
    ) -> Result<Bytes, OdrError> {
        // Accounts without code all share the hash of the empty string.
        if code_hash == keccak256(b"") {
            return Ok(Bytes::new());
        }

        let request = OdrRequest::Code {
            block_hash: block.hash,
            addr_hash,
            code_hash,
        };
        let fetch = FetchKey {
            request: request.clone(),
            root: code_hash,
        };
        let value = self
            .fetch(fetch, cancel, || {
                let dist = DistRequest::new(request.clone()).min_head(block.number);
                self.job(dist, move |reply| match reply {
                    OdrReply::Code(code) => {
                        verify::verify_code(code_hash, code)?;
                        Ok(OdrValue::Code(code.clone()))
                    },
                    other => Err(unexpected(RequestKind::Code, other)),
                })
            })
            .await?;
        match value {
            OdrValue::Code(code) => Ok(code),
            other => Err(mixed_up(other)),
        }
    }

    /// Canonical header at `number`, proven against the latest canonical-hash trie root.
    pub async fn fetch_header_by_number(
        &self,
        number: BlockNumber,
        cancel: &CancellationToken,
    ) -> Result<HeaderProof, OdrError> {
        let section = number / self.config.cht_size.max(1);
        let anchor = covering(self.anchors.cht_root(), RequestKind::Header, section)?;
        let request = OdrRequest::HeaderByNumber {
            number,
            cht_section: anchor.section,
        };
        let fetch = FetchKey {
            request: request.clone(),
            root: anchor.root,
        };
        let head = self.config.cht_head(anchor.section);
        let value = self
            .fetch(fetch, cancel, || {
                let dist = DistRequest::new(request.clone()).min_head(head);
                self.job(dist, move |reply| match reply {
                    OdrReply::Header { header, td, proof } => {
                        verify::verify_header(anchor.root, number, header, *td, proof)
                            .map(OdrValue::Header)
                    },
                    other => Err(unexpected(RequestKind::Header, other)),
                })
            })
            .await?;
        match value {
            OdrValue::Header(header) => Ok(header),
            other => Err(mixed_up(other)),
        }
    }

    fn job<F>(&self, request: DistRequest, verify: F) -> RetrievalJob<OdrValue>
    where
        F: Fn(&OdrReply) -> Result<OdrValue, lxs_types::VerifyError> + Send + Sync + 'static,
    {
        RetrievalJob::new(request, self.retriever.config().policy(), verify)
    }

    /// Run the job built by `make_job`, or wait for an identical one that is already
    /// running. A follower whose leader was canceled or dropped takes over.
    async fn fetch<F>(
        &self,
        key: FetchKey,
        cancel: &CancellationToken,
        make_job: F,
    ) -> Result<OdrValue, OdrError>
    where
        F: Fn() -> RetrievalJob<OdrValue>,
    {
        let kind = key.request.kind();
        loop {
            let follower = {
                let mut inflight = self.inflight.lock();
                match inflight.get(&key) {
                    Some(sender) => Some(sender.subscribe()),
                    None => {
                        let (sender, _) = broadcast::channel(1);
                        inflight.insert(key.clone(), sender);
                        None
                    },
                }
            };

            let Some(mut rx) = follower else {
                let guard = InflightGuard {
                    inflight: &self.inflight,
                    key: Some(key.clone()),
                };
                let result = self.retriever.retrieve(make_job(), cancel).await;
                if let Some(sender) = guard.finish() {
                    // Nobody waiting is fine.
                    let _ = sender.send(result.clone());
                }
                self.report(kind, &result);
                return result;
            };

            increment_counter!(
                "odr_coalesced_requests",
                Some("Fetches that joined an identical fetch in flight"),
                "kind" => kind.as_str()
            );
            trace!(kind = %kind, "joining fetch in flight");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OdrError::Canceled),
                shared = rx.recv() => match shared {
                    Ok(Err(OdrError::Canceled)) | Err(RecvError::Closed) => {
                        debug!(kind = %kind, "shared fetch was abandoned, retrying");
                        continue;
                    },
                    Ok(result) => return result,
                    // Only one message is ever sent on the channel.
                    Err(RecvError::Lagged(_)) => continue,
                },
            }
        }
    }

    fn report(&self, kind: RequestKind, result: &Shared) {
        let result = match result {
            Ok(_) => "verified",
            Err(OdrError::Canceled) => "canceled",
            Err(OdrError::Internal(_)) => "internal",
            Err(_) => "exhausted",
        };
        increment_counter!(
            "odr_fetches",
            Some("Finished fetches by result"),
            "kind" => kind.as_str(),
            "result" => result
        );
    }
}

/// Removes the in-flight entry when the leading fetch ends, also when its future is
/// dropped. Waiting followers then see the channel close.
struct InflightGuard<'a> {
    inflight: &'a Mutex<HashMap<FetchKey, broadcast::Sender<Shared>>>,
    key: Option<FetchKey>,
}

impl InflightGuard<'_> {
    fn finish(mut self) -> Option<broadcast::Sender<Shared>> {
        let key = self.key.take()?;
        self.inflight.lock().remove(&key)
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inflight.lock().remove(&key);
        }
    }
}

fn covering(
    anchor: Option<TrustAnchor>,
    kind: RequestKind,
    section: u64,
) -> Result<TrustAnchor, OdrError> {
    anchor
        .filter(|anchor| anchor.section >= section)
        .ok_or(OdrError::UnknownTrustAnchor { kind, section })
}

/// Verification only ever yields the variant of its own request, the shared channel is
/// keyed by that request.
fn mixed_up(value: OdrValue) -> OdrError {
    error!("coalesced fetch produced a value of another kind: {value:?}");
    OdrError::Internal(format!("unexpected {value:?} for a coalesced fetch"))
}
