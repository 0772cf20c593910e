//! C-Chain to P-Chain funding through an export/import pair.
use crate::{
    confirm::{self, Backoff},
    errors::{Error, Result},
    pchain::{wait_for_commit, PChainClient, PChainWallet, TxStatus},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutput {
    pub export_tx_id: String,
    pub import_tx_id: String,
}

/// Exports "amount_navax" from the C-Chain, waits for the export to be
/// accepted, then imports it on the P-Chain and waits for the commit.
pub async fn cross_chain_transfer(
    wallet: &dyn PChainWallet,
    pchain: &dyn PChainClient,
    amount_navax: u64,
    backoff: &Backoff,
) -> Result<TransferOutput> {
    if amount_navax == 0 {
        return Err(Error::Validation(String::from(
            "transfer amount must be positive",
        )));
    }

    let export_tx_id = wallet.export_c_to_p(amount_navax).await?;
    log::info!("issued export {export_tx_id} of {amount_navax} nAVAX");

    let what = format!("export tx {export_tx_id}");
    confirm::poll(&what, backoff, || async {
        let status = pchain
            .get_atomic_tx_status(&export_tx_id)
            .await
            .map_err(Error::into_retryable_api)?;
        match status {
            TxStatus::Accepted | TxStatus::Committed => Ok(Some(())),
            TxStatus::Dropped(reason) => Err(Error::other(format!(
                "export tx {export_tx_id} was dropped ({reason})"
            ))),
            _ => Ok(None),
        }
    })
    .await?;

    let import_tx_id = wallet.import_to_p().await?;
    log::info!("issued import {import_tx_id}");
    wait_for_commit(pchain, &import_tx_id, backoff).await?;

    Ok(TransferOutput {
        export_tx_id,
        import_tx_id,
    })
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- transfer::test_cross_chain_transfer --exact --show-output
#[tokio::test]
async fn test_cross_chain_transfer() {
    use crate::testutil::{fast_backoff, FakePChain, FakeWallet};

    let _ = env_logger::builder().is_test(true).try_init();

    let pchain = FakePChain::default();
    pchain.push_status("export-1", TxStatus::Processing);
    pchain.push_status("export-1", TxStatus::Accepted);
    pchain.push_status("import-1", TxStatus::Committed);
    let wallet = FakeWallet::default();

    let out = cross_chain_transfer(&wallet, &pchain, 1_000_000_000, &fast_backoff())
        .await
        .unwrap();
    assert_eq!(
        out,
        TransferOutput {
            export_tx_id: String::from("export-1"),
            import_tx_id: String::from("import-1"),
        }
    );
    assert_eq!(
        wallet.calls(),
        vec![String::from("exportCToP"), String::from("importToP")]
    );

    // export never accepted, import never issued
    pchain.push_status("export-2", TxStatus::Processing);
    let e = cross_chain_transfer(&wallet, &pchain, 1, &fast_backoff())
        .await
        .unwrap_err();
    assert!(matches!(e, Error::Timeout { .. }));
    assert_eq!(wallet.calls().len(), 3);

    assert!(matches!(
        cross_chain_transfer(&wallet, &pchain, 0, &fast_backoff()).await,
        Err(Error::Validation(_))
    ));
}
