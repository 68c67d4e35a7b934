//! Contract adapters for the collaborators on the local chain
//!
//! Each adapter encodes calls with a human-readable ABI, simulates the call to
//! read its return value, then submits it through the [`TransactionSender`].

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::messaging::{OutboundMessage, Relay};
use crate::registry::ChainId;
use crate::services::{AmmService, CreatedPool, OrchestratorHooks, SwapService, Treasury};
use crate::tx::TransactionSender;

use async_trait::async_trait;
use ethers::abi::{self, Abi, Token};
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use tracing::{debug, info};

const AMM_ABI: &[&str] = &[
    "function createPool(string name, string chainLabel, address[] tokens) returns (address pool, bytes32 poolId)",
    "function joinPool(bytes32 poolId, address[] tokens, uint256 minOutput) returns (uint256 shares)",
];

const SWAP_ROUTER_ABI: &[&str] = &[
    "function swap(address tokenOut, uint256 amount, address provider, bytes data) returns (uint256 amountOut)",
];

const RELAY_ROUTER_ABI: &[&str] = &[
    "function getFee(uint64 destinationChainSelector, (bytes,bytes,(address,uint256)[],address,bytes) message) view returns (uint256 fee)",
    "function ccipSend(uint64 destinationChainSelector, (bytes,bytes,(address,uint256)[],address,bytes) message) payable returns (bytes32 messageId)",
];

const ERC20_ABI: &[&str] = &[
    "function approve(address spender, uint256 amount) returns (bool)",
    "function transfer(address to, uint256 amount) returns (bool)",
];

const ISSUANCE_ABI: &[&str] = &[
    "function onPoolCreated(uint64 chainId, address[] tokens)",
    "function onDeposited(address depositor, uint256 totalShares)",
];

/// `bytes4(keccak256("CCIP EVMExtraArgsV1"))`
const EVM_EXTRA_ARGS_V1_TAG: [u8; 4] = [0x97, 0xa6, 0x57, 0xc9];

/// A deployed contract with its interface
struct Contract {
    address: Address,
    abi: Abi,
    service: &'static str,
}

impl Contract {
    fn new(address: Address, human_readable: &[&str], service: &'static str) -> OrchestratorResult<Self> {
        let abi = abi::parse_abi(human_readable)
            .map_err(|e| OrchestratorError::Internal(format!("{} ABI: {}", service, e)))?;
        Ok(Self { address, abi, service })
    }

    fn encode(&self, name: &str, args: &[Token]) -> OrchestratorResult<Bytes> {
        let function = self
            .abi
            .function(name)
            .map_err(|e| OrchestratorError::external(self.service, e))?;
        let data = function
            .encode_input(args)
            .map_err(|e| OrchestratorError::external(self.service, e))?;
        Ok(Bytes::from(data))
    }

    fn decode(&self, name: &str, output: &[u8]) -> OrchestratorResult<Vec<Token>> {
        let function = self
            .abi
            .function(name)
            .map_err(|e| OrchestratorError::external(self.service, e))?;
        function
            .decode_output(output)
            .map_err(|e| OrchestratorError::Decode(format!("{}.{}: {}", self.service, name, e)))
    }

    /// Simulate then submit; returns the simulated outputs
    async fn execute(
        &self,
        sender: &TransactionSender,
        name: &str,
        args: &[Token],
        value: U256,
        gas_cap: u64,
    ) -> OrchestratorResult<Vec<Token>> {
        let data = self.encode(name, args)?;
        let output = sender
            .call(self.address, data.clone(), value)
            .await
            .map_err(|e| OrchestratorError::external(self.service, e))?;
        let outputs = self.decode(name, &output)?;

        let receipt = sender
            .send(self.address, data, value, gas_cap)
            .await
            .map_err(|e| OrchestratorError::external(self.service, e))?;
        debug!(
            "{}.{} executed in {:?}",
            self.service, name, receipt.transaction_hash
        );

        Ok(outputs)
    }
}

fn output_address(outputs: &[Token], index: usize) -> OrchestratorResult<Address> {
    outputs
        .get(index)
        .cloned()
        .and_then(Token::into_address)
        .ok_or_else(|| OrchestratorError::Decode(format!("expected address at output {}", index)))
}

fn output_bytes32(outputs: &[Token], index: usize) -> OrchestratorResult<H256> {
    match outputs.get(index) {
        Some(Token::FixedBytes(bytes)) if bytes.len() == 32 => Ok(H256::from_slice(bytes)),
        _ => Err(OrchestratorError::Decode(format!("expected bytes32 at output {}", index))),
    }
}

fn output_uint(outputs: &[Token], index: usize) -> OrchestratorResult<U256> {
    outputs
        .get(index)
        .cloned()
        .and_then(Token::into_uint)
        .ok_or_else(|| OrchestratorError::Decode(format!("expected uint256 at output {}", index)))
}

fn address_array(tokens: &[Address]) -> Token {
    Token::Array(tokens.iter().copied().map(Token::Address).collect())
}

/// AMM pool factory and vault
pub struct EvmAmm {
    contract: Contract,
    sender: Arc<TransactionSender>,
    gas_cap: u64,
}

impl EvmAmm {
    pub fn new(address: Address, sender: Arc<TransactionSender>, gas_cap: u64) -> OrchestratorResult<Self> {
        Ok(Self {
            contract: Contract::new(address, AMM_ABI, "amm")?,
            sender,
            gas_cap,
        })
    }
}

#[async_trait]
impl AmmService for EvmAmm {
    async fn create_pool(
        &self,
        name: String,
        chain_label: String,
        tokens: Vec<Address>,
    ) -> OrchestratorResult<CreatedPool> {
        let outputs = self
            .contract
            .execute(
                &self.sender,
                "createPool",
                &[Token::String(name), Token::String(chain_label), address_array(&tokens)],
                U256::zero(),
                self.gas_cap,
            )
            .await?;

        Ok(CreatedPool {
            address: output_address(&outputs, 0)?,
            pool_id: output_bytes32(&outputs, 1)?,
        })
    }

    async fn join_pool(
        &self,
        pool_id: H256,
        tokens: Vec<Address>,
        min_output: U256,
    ) -> OrchestratorResult<U256> {
        let outputs = self
            .contract
            .execute(
                &self.sender,
                "joinPool",
                &[
                    Token::FixedBytes(pool_id.as_bytes().to_vec()),
                    address_array(&tokens),
                    Token::Uint(min_output),
                ],
                U256::zero(),
                self.gas_cap,
            )
            .await?;

        output_uint(&outputs, 0)
    }
}

/// Swap router selling the quote currency
pub struct EvmSwapper {
    router: Contract,
    quote: Contract,
    sender: Arc<TransactionSender>,
    gas_cap: u64,
}

impl EvmSwapper {
    pub fn new(
        router: Address,
        quote_token: Address,
        sender: Arc<TransactionSender>,
        gas_cap: u64,
    ) -> OrchestratorResult<Self> {
        Ok(Self {
            router: Contract::new(router, SWAP_ROUTER_ABI, "swap_router")?,
            quote: Contract::new(quote_token, ERC20_ABI, "quote_token")?,
            sender,
            gas_cap,
        })
    }
}

#[async_trait]
impl SwapService for EvmSwapper {
    async fn swap(
        &self,
        token_out: Address,
        amount: U256,
        provider: Address,
        calldata: Bytes,
    ) -> OrchestratorResult<U256> {
        self.quote
            .execute(
                &self.sender,
                "approve",
                &[Token::Address(self.router.address), Token::Uint(amount)],
                U256::zero(),
                self.gas_cap,
            )
            .await?;

        let outputs = self
            .router
            .execute(
                &self.sender,
                "swap",
                &[
                    Token::Address(token_out),
                    Token::Uint(amount),
                    Token::Address(provider),
                    Token::Bytes(calldata.to_vec()),
                ],
                U256::zero(),
                self.gas_cap,
            )
            .await?;

        output_uint(&outputs, 0)
    }
}

/// Quote-currency balance held by the orchestrator wallet
pub struct Erc20Treasury {
    quote: Contract,
    sender: Arc<TransactionSender>,
    gas_cap: u64,
}

impl Erc20Treasury {
    pub fn new(quote_token: Address, sender: Arc<TransactionSender>, gas_cap: u64) -> OrchestratorResult<Self> {
        Ok(Self {
            quote: Contract::new(quote_token, ERC20_ABI, "treasury")?,
            sender,
            gas_cap,
        })
    }
}

#[async_trait]
impl Treasury for Erc20Treasury {
    async fn refund(&self, depositor: Address, amount: U256) -> OrchestratorResult<()> {
        self.quote
            .execute(
                &self.sender,
                "transfer",
                &[Token::Address(depositor), Token::Uint(amount)],
                U256::zero(),
                self.gas_cap,
            )
            .await?;

        info!("Refunded {} quote to {:?}", amount, depositor);
        Ok(())
    }
}

/// Issuance contract notified of pool and deposit completion
pub struct IssuanceHooks {
    contract: Contract,
    sender: Arc<TransactionSender>,
    gas_cap: u64,
}

impl IssuanceHooks {
    pub fn new(address: Address, sender: Arc<TransactionSender>, gas_cap: u64) -> OrchestratorResult<Self> {
        Ok(Self {
            contract: Contract::new(address, ISSUANCE_ABI, "issuance")?,
            sender,
            gas_cap,
        })
    }
}

#[async_trait]
impl OrchestratorHooks for IssuanceHooks {
    async fn on_pool_created(&self, chain_id: ChainId, tokens: Vec<Address>) -> OrchestratorResult<()> {
        self.contract
            .execute(
                &self.sender,
                "onPoolCreated",
                &[Token::Uint(U256::from(chain_id)), address_array(&tokens)],
                U256::zero(),
                self.gas_cap,
            )
            .await?;
        Ok(())
    }

    async fn on_deposited(&self, depositor: Address, total_shares: U256) -> OrchestratorResult<()> {
        self.contract
            .execute(
                &self.sender,
                "onDeposited",
                &[Token::Address(depositor), Token::Uint(total_shares)],
                U256::zero(),
                self.gas_cap,
            )
            .await?;
        Ok(())
    }
}

/// CCIP-style router: native-currency fees, ERC-20 token transfers
pub struct EvmRelay {
    router: Contract,
    sender: Arc<TransactionSender>,
    gas_cap: u64,
}

impl EvmRelay {
    pub fn new(router: Address, sender: Arc<TransactionSender>, gas_cap: u64) -> OrchestratorResult<Self> {
        Ok(Self {
            router: Contract::new(router, RELAY_ROUTER_ABI, "relay")?,
            sender,
            gas_cap,
        })
    }

    async fn approve_transfers(&self, message: &OutboundMessage) -> OrchestratorResult<()> {
        for transfer in &message.token_amounts {
            let token = Contract::new(transfer.token, ERC20_ABI, "relay")?;
            token
                .execute(
                    &self.sender,
                    "approve",
                    &[Token::Address(self.router.address), Token::Uint(transfer.amount)],
                    U256::zero(),
                    self.gas_cap,
                )
                .await?;
        }
        Ok(())
    }
}

/// Router message tuple `(receiver, data, tokenAmounts, feeToken, extraArgs)`
fn router_message(message: &OutboundMessage) -> Token {
    let mut extra_args = EVM_EXTRA_ARGS_V1_TAG.to_vec();
    extra_args.extend(abi::encode(&[Token::Uint(U256::from(message.gas_limit))]));

    Token::Tuple(vec![
        Token::Bytes(abi::encode(&[Token::Address(message.receiver)])),
        Token::Bytes(message.data.to_vec()),
        Token::Array(
            message
                .token_amounts
                .iter()
                .map(|t| Token::Tuple(vec![Token::Address(t.token), Token::Uint(t.amount)]))
                .collect(),
        ),
        // Fees are paid in native currency
        Token::Address(Address::zero()),
        Token::Bytes(extra_args),
    ])
}

#[async_trait]
impl Relay for EvmRelay {
    async fn fee(&self, selector: u64, message: OutboundMessage) -> OrchestratorResult<U256> {
        let data = self.router.encode(
            "getFee",
            &[Token::Uint(U256::from(selector)), router_message(&message)],
        )?;
        let output = self
            .sender
            .call(self.router.address, data, U256::zero())
            .await
            .map_err(|e| OrchestratorError::external("relay", e))?;
        output_uint(&self.router.decode("getFee", &output)?, 0)
    }

    async fn send(&self, selector: u64, message: OutboundMessage, fee: U256) -> OrchestratorResult<H256> {
        self.approve_transfers(&message).await?;

        let outputs = self
            .router
            .execute(
                &self.sender,
                "ccipSend",
                &[Token::Uint(U256::from(selector)), router_message(&message)],
                fee,
                self.gas_cap,
            )
            .await?;

        output_bytes32(&outputs, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::TokenAmount;

    #[test]
    fn test_abis_parse() {
        for (abi, service) in [
            (AMM_ABI, "amm"),
            (SWAP_ROUTER_ABI, "swap_router"),
            (RELAY_ROUTER_ABI, "relay"),
            (ERC20_ABI, "erc20"),
            (ISSUANCE_ABI, "issuance"),
        ] {
            assert!(Contract::new(Address::zero(), abi, service).is_ok(), "{}", service);
        }
    }

    #[test]
    fn test_join_pool_round_trip() {
        let amm = Contract::new(Address::zero(), AMM_ABI, "amm").unwrap();
        let data = amm
            .encode(
                "joinPool",
                &[
                    Token::FixedBytes(vec![7u8; 32]),
                    address_array(&[Address::from_low_u64_be(1)]),
                    Token::Uint(U256::from(5)),
                ],
            )
            .unwrap();
        assert_eq!(data.len(), 4 + 32 * 5);

        let output = abi::encode(&[Token::Uint(U256::from(42))]);
        let decoded = amm.decode("joinPool", &output).unwrap();
        assert_eq!(output_uint(&decoded, 0).unwrap(), U256::from(42));
        assert!(output_address(&decoded, 0).is_err());
    }

    #[test]
    fn test_router_message_layout() {
        let message = OutboundMessage {
            receiver: Address::from_low_u64_be(0xb2),
            data: Bytes::from(vec![1, 2, 3]),
            token_amounts: vec![TokenAmount {
                token: Address::from_low_u64_be(0xc0),
                amount: U256::from(100),
            }],
            gas_limit: 500_000,
        };

        let fields = match router_message(&message) {
            Token::Tuple(fields) => fields,
            other => panic!("unexpected token {:?}", other),
        };
        assert_eq!(fields.len(), 5);
        assert_eq!(
            fields[0],
            Token::Bytes(abi::encode(&[Token::Address(message.receiver)]))
        );
        match &fields[4] {
            Token::Bytes(extra) => {
                assert_eq!(&extra[..4], &EVM_EXTRA_ARGS_V1_TAG);
                assert_eq!(U256::from_big_endian(&extra[4..]), U256::from(500_000));
            }
            other => panic!("unexpected token {:?}", other),
        }

        let relay = Contract::new(Address::zero(), RELAY_ROUTER_ABI, "relay").unwrap();
        assert!(relay
            .encode("ccipSend", &[Token::Uint(U256::from(5002)), router_message(&message)])
            .is_ok());
    }
}
