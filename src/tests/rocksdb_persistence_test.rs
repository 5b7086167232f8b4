//! The indexer over RocksDB: rows survive a restart and indexing resumes where it stopped

use super::block_builder::ChainBuilder;
use super::tx_builder::outpoint;
use super::*;
use catshrew_rocksdb::RocksDBAdapter;
use tempfile::TempDir;

type RocksSync = CatSync<MockChain, IndexStore<RocksDBAdapter>, CatProcessor<MockChain, RocksDBAdapter>>;

fn open_sync(path: &TempDir, chain: &MockChain) -> Result<(IndexStore<RocksDBAdapter>, RocksSync)> {
    let db = RocksDBAdapter::open_optimized(path.path().to_string_lossy().to_string())?;
    let store = IndexStore::new(db);
    let node = Arc::new(chain.clone());
    let processor = Arc::new(CatProcessor::new(node.clone(), store.clone(), protocol_params()));
    let sync = CatSync::new(node, store.clone(), processor, sync_config());
    Ok((store, sync))
}

#[tokio::test]
async fn test_index_survives_restart() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let chain = MockChain::new();
    let deploy = TokenDeploy::new("cat", OPEN_MINTER_V2_MD5);
    let mint = deploy.first_mint([0xa1; 20], 500);
    let second = deploy.mint(outpoint(&mint, 1), [0xb0; 20], 500);

    let blocks = ChainBuilder::new(GENESIS_HEIGHT)
        .add_block_with(vec![deploy.reveal.clone()])
        .add_block_with(vec![mint.clone()]);
    blocks.load(&chain);

    {
        let (store, sync) = open_sync(&dir, &chain)?;
        sync.init().await?;
        while sync.process_next().await?.is_some() {}
        assert_eq!(store.last_block()?.unwrap().height, 3);
    }

    let blocks = blocks.add_block_with(vec![second.clone()]);
    blocks.load(&chain);

    let (store, sync) = open_sync(&dir, &chain)?;
    sync.init().await?;
    assert_eq!(sync.next_height().await?, 4);
    assert_eq!(sync.process_next().await?, Some(4));

    let token = store.get_token(&deploy.token_id())?.unwrap();
    assert_eq!(token.token_pubkey, Some(deploy.token.key_hex()));
    assert_eq!(token.first_mint_height, Some(3));
    assert_eq!(store.mints_from(0)?.len(), 2);
    let minter = store.get_tx_out(&mint.compute_txid().to_string(), 1)?.unwrap();
    assert_eq!(minter.spend_txid, Some(second.compute_txid().to_string()));
    Ok(())
}

#[tokio::test]
async fn test_init_retracts_rows_above_the_last_block() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let chain = MockChain::new();
    let deploy = TokenDeploy::new("cat", OPEN_MINTER_V2_MD5);
    let mint = deploy.first_mint([0xa1; 20], 500);
    ChainBuilder::new(GENESIS_HEIGHT)
        .add_block_with(vec![deploy.reveal.clone()])
        .add_block_with(vec![mint.clone()])
        .load(&chain);

    let (store, sync) = open_sync(&dir, &chain)?;
    assert_eq!(sync.process_next().await?, Some(2));

    // rows of a block whose processing died before the block row was saved
    let header = catshrew_sync::BlockHeader {
        hash: chain.hash_at(3).unwrap(),
        height: 3,
        previousblockhash: chain.hash_at(2),
        time: 0,
    };
    sync.processor().process_tx(&mint, 1, &header).await?;
    assert_eq!(store.mints_from(0)?.len(), 1);

    sync.init().await?;
    assert!(store.mints_from(0)?.is_empty());
    let minter = store
        .get_tx_out(&deploy.reveal.compute_txid().to_string(), 1)?
        .unwrap();
    assert!(!minter.is_spent());
    assert_eq!(sync.next_height().await?, 3);
    Ok(())
}
