//! Mempool tracker
//!
//! Polls `getrawmempool` and keeps two maps describing unconfirmed state:
//! spent outpoint -> spending input, and created outpoint -> value. Readers use them as a
//! soft, eventually consistent filter over confirmed unspent outputs.
//!
//! The tracker is the only writer. Each cycle computes its whole delta first and applies it
//! under one write lock, so readers never see half of an update.

use bitcoin::{OutPoint, Transaction, Txid};
use futures::StreamExt;
use log::{debug, error, info};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::{ChainSource, MempoolConfig, SyncResult};

/// Shared unconfirmed state.
///
/// Spenders are recorded as `OutPoint { txid: spending txid, vout: input index }`.
#[derive(Debug, Default, Clone)]
pub struct MempoolState {
    spends: HashMap<OutPoint, OutPoint>,
    utxos: HashMap<OutPoint, u64>,
}

impl MempoolState {
    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.spends.contains_key(outpoint)
    }

    pub fn spender(&self, outpoint: &OutPoint) -> Option<OutPoint> {
        self.spends.get(outpoint).copied()
    }

    pub fn utxo_value(&self, outpoint: &OutPoint) -> Option<u64> {
        self.utxos.get(outpoint).copied()
    }

    pub fn spends_len(&self) -> usize {
        self.spends.len()
    }

    pub fn utxos_len(&self) -> usize {
        self.utxos.len()
    }
}

/// Result of one polling cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MempoolCycle {
    pub mempool_size: usize,
    pub fetched: usize,
    pub removed: usize,
}

pub struct MempoolTracker<N: ChainSource> {
    node: Arc<N>,
    config: MempoolConfig,
    state: Arc<RwLock<MempoolState>>,
}

impl<N: ChainSource + 'static> MempoolTracker<N> {
    pub fn new(node: Arc<N>, config: MempoolConfig) -> Self {
        Self {
            node,
            config,
            state: Arc::new(RwLock::new(MempoolState::default())),
        }
    }

    /// Handle for readers
    pub fn state(&self) -> Arc<RwLock<MempoolState>> {
        self.state.clone()
    }

    pub async fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.state.read().await.is_spent(outpoint)
    }

    pub async fn spender(&self, outpoint: &OutPoint) -> Option<OutPoint> {
        self.state.read().await.spender(outpoint)
    }

    pub async fn utxo_value(&self, outpoint: &OutPoint) -> Option<u64> {
        self.state.read().await.utxo_value(outpoint)
    }

    async fn fetch_tx(&self, txid: Txid) -> Option<Transaction> {
        for attempt in 0..=self.config.fetch_retries {
            match self.node.get_raw_transaction(&txid).await {
                Ok(tx) => return Some(tx),
                Err(e) => debug!("fetch mempool tx {} failed (attempt {}): {}", txid, attempt + 1, e),
            }
        }
        None
    }

    /// Run one polling cycle.
    pub async fn update(&self) -> SyncResult<MempoolCycle> {
        let txids = self.node.get_raw_mempool().await?;
        let txid_set: HashSet<Txid> = txids.iter().copied().collect();

        let (stale_utxos, stale_spends, new_txids) = {
            let state = self.state.read().await;
            let stale_utxos: Vec<OutPoint> = state
                .utxos
                .keys()
                .filter(|outpoint| !txid_set.contains(&outpoint.txid))
                .copied()
                .collect();
            let stale_spends: Vec<OutPoint> = state
                .spends
                .iter()
                .filter(|(_, spender)| !txid_set.contains(&spender.txid))
                .map(|(outpoint, _)| *outpoint)
                .collect();
            let new_txids: Vec<Txid> = txids
                .iter()
                .filter(|txid| !state.utxos.contains_key(&OutPoint::new(**txid, 0)))
                .copied()
                .collect();
            (stale_utxos, stale_spends, new_txids)
        };

        let total = new_txids.len();
        let mut fetched_txs = Vec::with_capacity(total);
        let mut done = 0usize;
        let mut last_logged_percent = 0usize;
        let mut stream = futures::stream::iter(new_txids)
            .map(|txid| self.fetch_tx(txid))
            .buffer_unordered(self.config.fetch_concurrency.max(1));
        while let Some(tx) = stream.next().await {
            done += 1;
            let percent = done * 100 / total;
            if percent > last_logged_percent && total > self.config.progress_threshold {
                info!("syncing {}% ({}/{})", percent, done, total);
                last_logged_percent = percent;
            }
            if let Some(tx) = tx {
                fetched_txs.push(tx);
            }
        }

        let mut new_spends = Vec::new();
        let mut new_utxos = Vec::new();
        for tx in &fetched_txs {
            let txid = tx.compute_txid();
            for (vin, input) in tx.input.iter().enumerate() {
                new_spends.push((input.previous_output, OutPoint::new(txid, vin as u32)));
            }
            for (vout, output) in tx.output.iter().enumerate() {
                new_utxos.push((OutPoint::new(txid, vout as u32), output.value.to_sat()));
            }
        }

        let cycle = {
            let mut state = self.state.write().await;
            let before = state.utxos.len();
            for outpoint in &stale_utxos {
                state.utxos.remove(outpoint);
                state.spends.remove(outpoint);
            }
            for outpoint in &stale_spends {
                state.spends.remove(outpoint);
            }
            let removed = before - state.utxos.len();
            state.spends.extend(new_spends);
            state.utxos.extend(new_utxos);

            info!(
                "Txs: {}, Spends: {}, UTXOs: {}, Removed: {}",
                txids.len(),
                state.spends.len(),
                state.utxos.len(),
                removed
            );
            MempoolCycle {
                mempool_size: txids.len(),
                fetched: fetched_txs.len(),
                removed,
            }
        };

        Ok(cycle)
    }

    /// Poll forever on a background task.
    pub fn start_background_tasks(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Daemon process mempool initialized");
            loop {
                match self.update().await {
                    Ok(_) => sleep(self.config.update_interval).await,
                    Err(e) => {
                        error!("Daemon process mempool error: {}", e);
                        sleep(self.config.error_backoff).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChain;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, ScriptBuf, Sequence, TxIn, TxOut, Witness};

    fn spend(prev: OutPoint, values: &[u64]) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: prev,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: values
                .iter()
                .map(|v| TxOut {
                    value: Amount::from_sat(*v),
                    script_pubkey: ScriptBuf::new(),
                })
                .collect(),
        }
    }

    fn fast_config() -> MempoolConfig {
        MempoolConfig {
            update_interval: std::time::Duration::from_millis(1),
            error_backoff: std::time::Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn tracks_spends_and_outputs() {
        let chain = Arc::new(MockChain::new());
        let funding = spend(OutPoint::null(), &[50_000]);
        let child = spend(OutPoint::new(funding.compute_txid(), 0), &[20_000, 29_000]);
        chain.add_transaction(funding.clone());
        chain.add_transaction(child.clone());
        chain.set_mempool(vec![funding.compute_txid(), child.compute_txid()]);

        let tracker = MempoolTracker::new(chain.clone(), fast_config());
        let cycle = tracker.update().await.unwrap();
        assert_eq!(cycle.fetched, 2);

        let funded = OutPoint::new(funding.compute_txid(), 0);
        assert!(tracker.is_spent(&funded).await);
        assert_eq!(
            tracker.spender(&funded).await,
            Some(OutPoint::new(child.compute_txid(), 0))
        );
        assert_eq!(
            tracker.utxo_value(&OutPoint::new(child.compute_txid(), 1)).await,
            Some(29_000)
        );

        // the child confirms and leaves the mempool
        chain.set_mempool(vec![funding.compute_txid()]);
        let cycle = tracker.update().await.unwrap();
        assert_eq!(cycle.fetched, 0);
        assert_eq!(cycle.removed, 2);
        assert!(!tracker.is_spent(&funded).await);
        assert_eq!(tracker.utxo_value(&OutPoint::new(child.compute_txid(), 0)).await, None);
    }

    #[tokio::test]
    async fn retries_then_skips_unfetchable_transactions() {
        let chain = Arc::new(MockChain::new());
        let flaky = spend(OutPoint::null(), &[1_000]);
        let broken = spend(OutPoint::null(), &[2_000, 3_000]);
        chain.add_transaction(flaky.clone());
        chain.add_transaction(broken.clone());
        chain.fail_transaction(flaky.compute_txid(), 2);
        chain.fail_transaction(broken.compute_txid(), 3);
        chain.set_mempool(vec![flaky.compute_txid(), broken.compute_txid()]);

        let tracker = MempoolTracker::new(chain.clone(), fast_config());
        let cycle = tracker.update().await.unwrap();
        assert_eq!(cycle.fetched, 1);
        assert!(tracker
            .utxo_value(&OutPoint::new(flaky.compute_txid(), 0))
            .await
            .is_some());

        // the failed one is picked up again on the next cycle
        let cycle = tracker.update().await.unwrap();
        assert_eq!(cycle.fetched, 1);
        assert_eq!(tracker.state().read().await.utxos_len(), 3);
    }

    #[tokio::test]
    async fn rpc_failure_leaves_state_untouched() {
        let chain = Arc::new(MockChain::new());
        let tx = spend(OutPoint::null(), &[1_000]);
        chain.add_transaction(tx.clone());
        chain.set_mempool(vec![tx.compute_txid()]);
        let tracker = MempoolTracker::new(chain.clone(), fast_config());
        tracker.update().await.unwrap();

        chain.set_connected(false);
        assert!(tracker.update().await.is_err());
        assert_eq!(tracker.state().read().await.utxos_len(), 1);
    }
}
