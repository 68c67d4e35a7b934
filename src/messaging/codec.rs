//! Wire format for cross-chain messages
//!
//! Every message is an ABI-encoded envelope `(uint8 kind, uint64 origin, bytes payload)`.
//! Receipts wrap their body once more as `(uint8 subKind, bytes body)` so new
//! sub-kinds can be added without breaking older peers.

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::registry::ChainId;

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};

/// Top-level message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    CreatePool = 0,
    Deposit = 1,
    Success = 2,
    Failure = 3,
}

impl MessageKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageKind::CreatePool),
            1 => Some(MessageKind::Deposit),
            2 => Some(MessageKind::Success),
            3 => Some(MessageKind::Failure),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::CreatePool => "create_pool",
            MessageKind::Deposit => "deposit",
            MessageKind::Success => "success",
            MessageKind::Failure => "failure",
        }
    }
}

/// Sub-kinds of a SUCCESS receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SuccessKind {
    PoolCreated = 0,
    Deposited = 1,
    Withdraw = 2,
}

impl SuccessKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SuccessKind::PoolCreated),
            1 => Some(SuccessKind::Deposited),
            2 => Some(SuccessKind::Withdraw),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SuccessKind::PoolCreated => "pool_created",
            SuccessKind::Deposited => "deposited",
            SuccessKind::Withdraw => "withdraw",
        }
    }
}

/// Sub-kinds of a FAILURE receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FailureKind {
    PoolCreationFailed = 0,
    TokenAdditionFailed = 1,
    DepositFailed = 2,
}

impl FailureKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(FailureKind::PoolCreationFailed),
            1 => Some(FailureKind::TokenAdditionFailed),
            2 => Some(FailureKind::DepositFailed),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FailureKind::PoolCreationFailed => "pool_creation_failed",
            FailureKind::TokenAdditionFailed => "token_addition_failed",
            FailureKind::DepositFailed => "deposit_failed",
        }
    }
}

/// Outer message envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Raw kind tag; unknown tags survive decoding so they can be ignored
    pub kind: u8,
    pub origin_chain_id: ChainId,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(kind: MessageKind, origin_chain_id: ChainId, payload: Bytes) -> Self {
        Self {
            kind: kind as u8,
            origin_chain_id,
            payload,
        }
    }

    /// Envelope carrying a request payload
    pub fn request<P: AbiPayload>(kind: MessageKind, origin_chain_id: ChainId, payload: P) -> Self {
        Self::new(kind, origin_chain_id, payload.encode())
    }

    pub fn success(origin_chain_id: ChainId, sub_kind: SuccessKind, body: Bytes) -> Self {
        let receipt = ReceiptBody {
            sub_kind: sub_kind as u8,
            body,
        };
        Self::new(MessageKind::Success, origin_chain_id, receipt.encode())
    }

    pub fn failure(origin_chain_id: ChainId, sub_kind: FailureKind, body: Bytes) -> Self {
        let receipt = ReceiptBody {
            sub_kind: sub_kind as u8,
            body,
        };
        Self::new(MessageKind::Failure, origin_chain_id, receipt.encode())
    }

    pub fn message_kind(&self) -> Option<MessageKind> {
        MessageKind::from_u8(self.kind)
    }

    pub fn encode(&self) -> Bytes {
        Bytes::from(abi::encode(&[
            Token::Uint(U256::from(self.kind)),
            Token::Uint(U256::from(self.origin_chain_id)),
            Token::Bytes(self.payload.to_vec()),
        ]))
    }

    pub fn decode(data: &[u8]) -> OrchestratorResult<Self> {
        let tokens = decode_tokens(
            &[ParamType::Uint(8), ParamType::Uint(64), ParamType::Bytes],
            data,
        )?;
        let mut fields = Fields::new(tokens);

        Ok(Self {
            kind: fields.uint8()?,
            origin_chain_id: fields.uint64()?,
            payload: fields.bytes()?,
        })
    }
}

/// Body of a SUCCESS or FAILURE receipt
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptBody {
    pub sub_kind: u8,
    pub body: Bytes,
}

impl ReceiptBody {
    pub fn encode(&self) -> Bytes {
        Bytes::from(abi::encode(&[
            Token::Uint(U256::from(self.sub_kind)),
            Token::Bytes(self.body.to_vec()),
        ]))
    }

    pub fn decode(data: &[u8]) -> OrchestratorResult<Self> {
        let tokens = decode_tokens(&[ParamType::Uint(8), ParamType::Bytes], data)?;
        let mut fields = Fields::new(tokens);

        Ok(Self {
            sub_kind: fields.uint8()?,
            body: fields.bytes()?,
        })
    }
}

/// A payload with a fixed ABI tuple layout
pub trait AbiPayload: Sized {
    fn param_types() -> Vec<ParamType>;

    fn into_tokens(self) -> Vec<Token>;

    fn from_tokens(fields: &mut Fields) -> OrchestratorResult<Self>;

    fn encode(self) -> Bytes {
        Bytes::from(abi::encode(&self.into_tokens()))
    }

    fn decode(data: &[u8]) -> OrchestratorResult<Self> {
        let tokens = decode_tokens(&Self::param_types(), data)?;
        Self::from_tokens(&mut Fields::new(tokens))
    }
}

/// `CreatePoolRequest(address[] tokens, string name)`
#[derive(Debug, Clone, PartialEq)]
pub struct CreatePoolRequest {
    pub tokens: Vec<Address>,
    pub name: String,
}

impl AbiPayload for CreatePoolRequest {
    fn param_types() -> Vec<ParamType> {
        vec![
            ParamType::Array(Box::new(ParamType::Address)),
            ParamType::String,
        ]
    }

    fn into_tokens(self) -> Vec<Token> {
        vec![address_array(self.tokens), Token::String(self.name)]
    }

    fn from_tokens(fields: &mut Fields) -> OrchestratorResult<Self> {
        Ok(Self {
            tokens: fields.addresses()?,
            name: fields.string()?,
        })
    }
}

/// `DepositRequest(bytes32 depositId, address[] tokens, bytes32 poolId,
/// uint256 minOutput, address swapProvider, bytes[] swapCalldata)`
#[derive(Debug, Clone, PartialEq)]
pub struct DepositRequest {
    pub deposit_id: H256,
    pub tokens: Vec<Address>,
    pub pool_id: H256,
    pub min_output: U256,
    pub swap_provider: Address,
    pub swap_calldata: Vec<Bytes>,
}

impl AbiPayload for DepositRequest {
    fn param_types() -> Vec<ParamType> {
        vec![
            ParamType::FixedBytes(32),
            ParamType::Array(Box::new(ParamType::Address)),
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
            ParamType::Address,
            ParamType::Array(Box::new(ParamType::Bytes)),
        ]
    }

    fn into_tokens(self) -> Vec<Token> {
        vec![
            Token::FixedBytes(self.deposit_id.as_bytes().to_vec()),
            address_array(self.tokens),
            Token::FixedBytes(self.pool_id.as_bytes().to_vec()),
            Token::Uint(self.min_output),
            Token::Address(self.swap_provider),
            Token::Array(
                self.swap_calldata
                    .into_iter()
                    .map(|b| Token::Bytes(b.to_vec()))
                    .collect(),
            ),
        ]
    }

    fn from_tokens(fields: &mut Fields) -> OrchestratorResult<Self> {
        Ok(Self {
            deposit_id: fields.bytes32()?,
            tokens: fields.addresses()?,
            pool_id: fields.bytes32()?,
            min_output: fields.uint()?,
            swap_provider: fields.address()?,
            swap_calldata: fields.bytes_list()?,
        })
    }
}

/// `PoolCreatedReceipt(address pool, bytes32 poolId, address[] tokens, uint256[] weights)`
#[derive(Debug, Clone, PartialEq)]
pub struct PoolCreatedReceipt {
    pub address: Address,
    pub pool_id: H256,
    pub tokens: Vec<Address>,
    pub weights: Vec<U256>,
}

impl AbiPayload for PoolCreatedReceipt {
    fn param_types() -> Vec<ParamType> {
        vec![
            ParamType::Address,
            ParamType::FixedBytes(32),
            ParamType::Array(Box::new(ParamType::Address)),
            ParamType::Array(Box::new(ParamType::Uint(256))),
        ]
    }

    fn into_tokens(self) -> Vec<Token> {
        vec![
            Token::Address(self.address),
            Token::FixedBytes(self.pool_id.as_bytes().to_vec()),
            address_array(self.tokens),
            Token::Array(self.weights.into_iter().map(Token::Uint).collect()),
        ]
    }

    fn from_tokens(fields: &mut Fields) -> OrchestratorResult<Self> {
        Ok(Self {
            address: fields.address()?,
            pool_id: fields.bytes32()?,
            tokens: fields.addresses()?,
            weights: fields.uints()?,
        })
    }
}

/// `DepositedReceipt(bytes32 depositId, uint256 receivedShares)`
#[derive(Debug, Clone, PartialEq)]
pub struct DepositedReceipt {
    pub deposit_id: H256,
    pub received_shares: U256,
}

impl AbiPayload for DepositedReceipt {
    fn param_types() -> Vec<ParamType> {
        vec![ParamType::FixedBytes(32), ParamType::Uint(256)]
    }

    fn into_tokens(self) -> Vec<Token> {
        vec![
            Token::FixedBytes(self.deposit_id.as_bytes().to_vec()),
            Token::Uint(self.received_shares),
        ]
    }

    fn from_tokens(fields: &mut Fields) -> OrchestratorResult<Self> {
        Ok(Self {
            deposit_id: fields.bytes32()?,
            received_shares: fields.uint()?,
        })
    }
}

/// `DepositFailedReceipt(bytes32 depositId)`
#[derive(Debug, Clone, PartialEq)]
pub struct DepositFailedReceipt {
    pub deposit_id: H256,
}

impl AbiPayload for DepositFailedReceipt {
    fn param_types() -> Vec<ParamType> {
        vec![ParamType::FixedBytes(32)]
    }

    fn into_tokens(self) -> Vec<Token> {
        vec![Token::FixedBytes(self.deposit_id.as_bytes().to_vec())]
    }

    fn from_tokens(fields: &mut Fields) -> OrchestratorResult<Self> {
        Ok(Self {
            deposit_id: fields.bytes32()?,
        })
    }
}

fn address_array(addresses: Vec<Address>) -> Token {
    Token::Array(addresses.into_iter().map(Token::Address).collect())
}

fn decode_tokens(types: &[ParamType], data: &[u8]) -> OrchestratorResult<Vec<Token>> {
    abi::decode(types, data).map_err(|e| OrchestratorError::Decode(e.to_string()))
}

/// Sequential reader over decoded ABI tokens
pub struct Fields {
    tokens: std::vec::IntoIter<Token>,
}

impl Fields {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens: tokens.into_iter(),
        }
    }

    fn next(&mut self, expected: &str) -> OrchestratorResult<Token> {
        self.tokens
            .next()
            .ok_or_else(|| OrchestratorError::Decode(format!("missing {} field", expected)))
    }

    fn mismatch(expected: &str, got: &Token) -> OrchestratorError {
        OrchestratorError::Decode(format!("expected {}, got {:?}", expected, got))
    }

    pub fn uint(&mut self) -> OrchestratorResult<U256> {
        match self.next("uint")? {
            Token::Uint(v) => Ok(v),
            other => Err(Self::mismatch("uint", &other)),
        }
    }

    pub fn uint8(&mut self) -> OrchestratorResult<u8> {
        let value = self.uint()?;
        if value > U256::from(u8::MAX) {
            return Err(OrchestratorError::Decode(format!("uint8 overflow: {}", value)));
        }
        Ok(value.low_u32() as u8)
    }

    pub fn uint64(&mut self) -> OrchestratorResult<u64> {
        let value = self.uint()?;
        if value > U256::from(u64::MAX) {
            return Err(OrchestratorError::Decode(format!("uint64 overflow: {}", value)));
        }
        Ok(value.low_u64())
    }

    pub fn address(&mut self) -> OrchestratorResult<Address> {
        match self.next("address")? {
            Token::Address(a) => Ok(a),
            other => Err(Self::mismatch("address", &other)),
        }
    }

    pub fn bytes32(&mut self) -> OrchestratorResult<H256> {
        match self.next("bytes32")? {
            Token::FixedBytes(b) if b.len() == 32 => Ok(H256::from_slice(&b)),
            other => Err(Self::mismatch("bytes32", &other)),
        }
    }

    pub fn bytes(&mut self) -> OrchestratorResult<Bytes> {
        match self.next("bytes")? {
            Token::Bytes(b) => Ok(Bytes::from(b)),
            other => Err(Self::mismatch("bytes", &other)),
        }
    }

    pub fn string(&mut self) -> OrchestratorResult<String> {
        match self.next("string")? {
            Token::String(s) => Ok(s),
            other => Err(Self::mismatch("string", &other)),
        }
    }

    fn array(&mut self, expected: &str) -> OrchestratorResult<Vec<Token>> {
        match self.next(expected)? {
            Token::Array(items) => Ok(items),
            other => Err(Self::mismatch(expected, &other)),
        }
    }

    pub fn addresses(&mut self) -> OrchestratorResult<Vec<Address>> {
        self.array("address[]")?
            .into_iter()
            .map(|t| match t {
                Token::Address(a) => Ok(a),
                other => Err(Self::mismatch("address", &other)),
            })
            .collect()
    }

    pub fn uints(&mut self) -> OrchestratorResult<Vec<U256>> {
        self.array("uint256[]")?
            .into_iter()
            .map(|t| match t {
                Token::Uint(v) => Ok(v),
                other => Err(Self::mismatch("uint", &other)),
            })
            .collect()
    }

    pub fn bytes_list(&mut self) -> OrchestratorResult<Vec<Bytes>> {
        self.array("bytes[]")?
            .into_iter()
            .map(|t| match t {
                Token::Bytes(b) => Ok(Bytes::from(b)),
                other => Err(Self::mismatch("bytes", &other)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_envelope_decodes() {
        let receipt = PoolCreatedReceipt {
            address: Address::from_low_u64_be(0xaa),
            pool_id: H256::from_low_u64_be(7),
            tokens: vec![Address::from_low_u64_be(1), Address::from_low_u64_be(2)],
            weights: vec![U256::exp10(17) * 5, U256::exp10(17) * 5],
        };
        let envelope = Envelope::success(42, SuccessKind::PoolCreated, receipt.clone().encode());

        let decoded = Envelope::decode(&envelope.encode()).unwrap();
        assert_eq!(decoded.message_kind(), Some(MessageKind::Success));
        assert_eq!(decoded.origin_chain_id, 42);

        let body = ReceiptBody::decode(&decoded.payload).unwrap();
        assert_eq!(SuccessKind::from_u8(body.sub_kind), Some(SuccessKind::PoolCreated));
        assert_eq!(PoolCreatedReceipt::decode(&body.body).unwrap(), receipt);
    }

    #[test]
    fn test_deposit_request_payload() {
        let request = DepositRequest {
            deposit_id: H256::repeat_byte(0x11),
            tokens: vec![Address::from_low_u64_be(3)],
            pool_id: H256::repeat_byte(0x22),
            min_output: U256::from(95),
            swap_provider: Address::from_low_u64_be(9),
            swap_calldata: vec![Bytes::from(vec![0xde, 0xad])],
        };
        let decoded = DepositRequest::decode(&request.clone().encode()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_unknown_kind_survives_decoding() {
        let envelope = Envelope {
            kind: 200,
            origin_chain_id: 5,
            payload: Bytes::default(),
        };
        let decoded = Envelope::decode(&envelope.encode()).unwrap();
        assert_eq!(decoded.kind, 200);
        assert!(decoded.message_kind().is_none());
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let err = Envelope::decode(&[0x01, 0x02, 0x03]).unwrap_err();
        assert!(matches!(err, OrchestratorError::Decode(_)));

        // Truncated payload
        let err = DepositedReceipt::decode(&[0u8; 16]).unwrap_err();
        assert!(matches!(err, OrchestratorError::Decode(_)));
    }
}
