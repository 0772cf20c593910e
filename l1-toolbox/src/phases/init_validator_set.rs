use ethers_core::abi::Token;
use primitive_types::{H160, H256, U256};

use super::{send_with_predicate, sign_pchain_message, Settings};
use crate::{
    aggregator::SignatureAggregator,
    contracts,
    errors::{Error, Result},
    evm::EvmClient,
    manager::{ManagerContext, Target},
    pchain::{format_id, PChainClient},
    warp::{message::initial_validation_id, Payload},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitValidatorSetOutput {
    pub tx_hash: H256,
    pub conversion_id: H256,
    /// Validation IDs of the initial validators, in conversion order.
    pub validation_ids: Vec<H256>,
}

/// Seeds the manager with the validators of the ConvertSubnetToL1Tx.
pub async fn init_validator_set(
    evm: &dyn EvmClient,
    pchain: &dyn PChainClient,
    aggregator: &dyn SignatureAggregator,
    ctx: &ManagerContext,
    conversion_tx_id: &str,
    settings: &Settings,
) -> Result<InitValidatorSetOutput> {
    let tx = pchain.get_tx(conversion_tx_id).await?;
    let data = tx.conversion.ok_or_else(|| {
        Error::Validation(format!(
            "P-Chain tx {conversion_tx_id} is not a ConvertSubnetToL1Tx"
        ))
    })?;
    if data.subnet_id != ctx.subnet_id {
        return Err(Error::Validation(format!(
            "conversion tx {conversion_tx_id} belongs to subnet {}",
            format_id(&data.subnet_id)
        )));
    }
    if data.manager_address.len() != 20 {
        return Err(Error::decode(
            "conversion data",
            format!("manager address has {} bytes", data.manager_address.len()),
        ));
    }

    let conversion_id = data.conversion_id()?;
    log::info!(
        "initializing {} validator(s) of conversion 0x{:x}",
        data.validators.len(),
        conversion_id
    );

    let message = Payload::SubnetToL1Conversion { conversion_id };
    let signature = sign_pchain_message(
        aggregator,
        ctx,
        &message,
        data.subnet_id.as_bytes().to_vec(),
        settings,
    )
    .await?;

    let validators = data
        .validators
        .iter()
        .map(|v| {
            Token::Tuple(vec![
                Token::Bytes(v.node_id.clone()),
                Token::Bytes(v.bls_public_key.clone()),
                Token::Uint(U256::from(v.weight)),
            ])
        })
        .collect();
    let conversion = Token::Tuple(vec![
        Token::FixedBytes(data.subnet_id.as_bytes().to_vec()),
        Token::FixedBytes(data.manager_chain_id.as_bytes().to_vec()),
        Token::Address(H160::from_slice(&data.manager_address)),
        Token::Array(validators),
    ]);

    let target = Target {
        method: &contracts::INITIALIZE_VALIDATOR_SET,
        address: ctx.manager_address,
    };
    let tx_hash = send_with_predicate(
        evm,
        target,
        &[conversion, Token::Uint(U256::zero())],
        &signature.signed_message,
        &settings.receipt_backoff,
    )
    .await?;

    let validation_ids = (0..data.validators.len() as u32)
        .map(|i| initial_validation_id(&data.subnet_id, i))
        .collect();
    Ok(InitValidatorSetOutput {
        tx_hash,
        conversion_id,
        validation_ids,
    })
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- phases::init_validator_set::test_init_validator_set --exact --show-output
#[tokio::test]
async fn test_init_validator_set() {
    use crate::{
        testutil::{fast_settings, poa_context, FakeAggregator, FakeEvm, FakePChain},
        warp::message::{ConversionValidator, SubnetToL1ConversionData},
    };

    let _ = env_logger::builder().is_test(true).try_init();

    let ctx = poa_context();
    let data = SubnetToL1ConversionData {
        subnet_id: ctx.subnet_id,
        manager_chain_id: ctx.blockchain_id,
        manager_address: ctx.manager_address.as_bytes().to_vec(),
        validators: vec![
            ConversionValidator {
                node_id: vec![0x01; 20],
                bls_public_key: vec![0x02; 48],
                weight: 100,
            },
            ConversionValidator {
                node_id: vec![0x03; 20],
                bls_public_key: vec![0x04; 48],
                weight: 100,
            },
        ],
    };
    let pchain = FakePChain::default();
    pchain.add_conversion_tx("convert-1", data.clone());

    let evm = FakeEvm::default();
    let aggregator = FakeAggregator::default();
    let out = init_validator_set(&evm, &pchain, &aggregator, &ctx, "convert-1", &fast_settings())
        .await
        .unwrap();
    assert_eq!(out.conversion_id, data.conversion_id().unwrap());
    assert_eq!(out.validation_ids.len(), 2);
    assert_eq!(out.validation_ids[1], initial_validation_id(&ctx.subnet_id, 1));

    let reqs = aggregator.requests();
    assert_eq!(reqs[0].justification, ctx.subnet_id.as_bytes().to_vec());
    let (_, payload) = crate::warp::parse_payload(&reqs[0].unsigned_message).unwrap();
    assert_eq!(
        payload,
        Payload::SubnetToL1Conversion {
            conversion_id: out.conversion_id
        }
    );

    let sent = evm.sent();
    assert_eq!(sent[0].to, ctx.manager_address);
    assert_eq!(&sent[0].data[..4], &contracts::INITIALIZE_VALIDATOR_SET.selector());

    // conversion of another subnet
    let mut other = data;
    other.subnet_id = H256::repeat_byte(0x77);
    pchain.add_conversion_tx("convert-2", other);
    assert!(matches!(
        init_validator_set(&evm, &pchain, &aggregator, &ctx, "convert-2", &fast_settings()).await,
        Err(Error::Validation(_))
    ));
}
