//! Contract interface metadata and log encoding.
//!
//! A log carries the event topic in `topics[0]`, one 32-byte word per
//! indexed parameter in the remaining topics, and one 32-byte word per
//! non-indexed parameter in `data`.

use crate::blockchain::Sha256Hash;
use crate::crypto::{address_to_hex, sha256, Address, ADDRESS_LENGTH};
use crate::error::ChainError;
use serde::{Deserialize, Serialize};

pub const WORD_SIZE: usize = 32;

/// Maximum number of topics a single log may carry (event topic + 3 indexed).
pub const MAX_TOPICS: usize = 4;

pub type Word = [u8; WORD_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    Uint,
    Address,
    Bool,
    Bytes32,
}

impl ParamKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamKind::Uint => "uint256",
            ParamKind::Address => "address",
            ParamKind::Bool => "bool",
            ParamKind::Bytes32 => "bytes32",
        }
    }
}

/// A typed value passed to or emitted by a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Token {
    Uint(u128),
    Address(Address),
    Bool(bool),
    Bytes32(Word),
}

impl Token {
    pub fn kind(&self) -> ParamKind {
        match self {
            Token::Uint(_) => ParamKind::Uint,
            Token::Address(_) => ParamKind::Address,
            Token::Bool(_) => ParamKind::Bool,
            Token::Bytes32(_) => ParamKind::Bytes32,
        }
    }

    pub fn as_uint(&self) -> Option<u128> {
        match self {
            Token::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Token::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Token::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes32(&self) -> Option<Word> {
        match self {
            Token::Bytes32(w) => Some(*w),
            _ => None,
        }
    }

    pub fn to_word(&self) -> Word {
        let mut word = [0u8; WORD_SIZE];
        match self {
            Token::Uint(v) => word[WORD_SIZE - 16..].copy_from_slice(&v.to_be_bytes()),
            Token::Address(a) => word[WORD_SIZE - ADDRESS_LENGTH..].copy_from_slice(a),
            Token::Bool(b) => word[WORD_SIZE - 1] = u8::from(*b),
            Token::Bytes32(w) => word = *w,
        }
        word
    }

    pub fn from_word(kind: ParamKind, word: &Word) -> Result<Token, ChainError> {
        match kind {
            ParamKind::Uint => {
                if word[..WORD_SIZE - 16].iter().any(|b| *b != 0) {
                    return Err(ChainError::AbiError(
                        "uint256 value does not fit in 128 bits".to_string(),
                    ));
                }
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&word[WORD_SIZE - 16..]);
                Ok(Token::Uint(u128::from_be_bytes(bytes)))
            }
            ParamKind::Address => {
                if word[..WORD_SIZE - ADDRESS_LENGTH].iter().any(|b| *b != 0) {
                    return Err(ChainError::AbiError("address word has dirty high bytes".to_string()));
                }
                let mut address = [0u8; ADDRESS_LENGTH];
                address.copy_from_slice(&word[WORD_SIZE - ADDRESS_LENGTH..]);
                Ok(Token::Address(address))
            }
            ParamKind::Bool => match (word[..WORD_SIZE - 1].iter().all(|b| *b == 0), word[WORD_SIZE - 1]) {
                (true, 0) => Ok(Token::Bool(false)),
                (true, 1) => Ok(Token::Bool(true)),
                _ => Err(ChainError::AbiError("invalid bool word".to_string())),
            },
            ParamKind::Bytes32 => Ok(Token::Bytes32(*word)),
        }
    }

    /// JSON rendering used for decoded events: integers become decimal strings
    /// so 128-bit values survive consumers limited to f64.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Token::Uint(v) => serde_json::Value::String(v.to_string()),
            Token::Address(a) => serde_json::Value::String(address_to_hex(a)),
            Token::Bool(b) => serde_json::Value::Bool(*b),
            Token::Bytes32(w) => serde_json::Value::String(format!("0x{}", hex::encode(w))),
        }
    }
}

/// Raw log record produced by the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Sha256Hash>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventParam {
    pub name: String,
    pub kind: ParamKind,
    pub indexed: bool,
}

impl EventParam {
    pub fn new(name: &str, kind: ParamKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            indexed: false,
        }
    }

    pub fn indexed(name: &str, kind: ParamKind) -> Self {
        Self {
            indexed: true,
            ..Self::new(name, kind)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub name: String,
    pub params: Vec<EventParam>,
}

impl EventDescriptor {
    pub fn new(name: &str, params: Vec<EventParam>) -> Self {
        Self {
            name: name.to_string(),
            params,
        }
    }

    /// Canonical signature, e.g. `Transfer(address,address,uint256)`.
    pub fn signature(&self) -> String {
        let kinds: Vec<&str> = self.params.iter().map(|p| p.kind.type_name()).collect();
        format!("{}({})", self.name, kinds.join(","))
    }

    pub fn topic(&self) -> Sha256Hash {
        sha256(self.signature().as_bytes())
    }

    /// Builds the raw log a contract at `address` emits for this event.
    pub fn encode_log(&self, address: Address, values: &[Token]) -> Result<Log, ChainError> {
        if values.len() != self.params.len() {
            return Err(ChainError::AbiError(format!(
                "event {} expects {} values, got {}",
                self.name,
                self.params.len(),
                values.len()
            )));
        }

        let mut topics = vec![self.topic()];
        let mut data = Vec::new();
        for (param, value) in self.params.iter().zip(values) {
            if param.kind != value.kind() {
                return Err(ChainError::AbiError(format!(
                    "event {} field {} expects {}, got {}",
                    self.name,
                    param.name,
                    param.kind.type_name(),
                    value.kind().type_name()
                )));
            }
            if param.indexed {
                topics.push(value.to_word());
            } else {
                data.extend_from_slice(&value.to_word());
            }
        }

        if topics.len() > MAX_TOPICS {
            return Err(ChainError::AbiError(format!(
                "event {} has more than {} indexed fields",
                self.name,
                MAX_TOPICS - 1
            )));
        }

        Ok(Log { address, topics, data })
    }

    /// Decodes the fields of a log whose first topic matches this event.
    pub fn decode_fields(&self, log: &Log) -> Result<Vec<(String, Token)>, ChainError> {
        let indexed = self.params.iter().filter(|p| p.indexed).count();
        let non_indexed = self.params.len() - indexed;

        if log.topics.len() != indexed + 1 {
            return Err(ChainError::AbiError(format!(
                "event {} expects {} topics, log has {}",
                self.name,
                indexed + 1,
                log.topics.len()
            )));
        }
        if log.data.len() != non_indexed * WORD_SIZE {
            return Err(ChainError::AbiError(format!(
                "event {} expects {} data bytes, log has {}",
                self.name,
                non_indexed * WORD_SIZE,
                log.data.len()
            )));
        }

        let mut topics = log.topics[1..].iter();
        let mut words = log.data.chunks_exact(WORD_SIZE);
        let mut fields = Vec::with_capacity(self.params.len());
        for param in &self.params {
            let word: Word = if param.indexed {
                *topics
                    .next()
                    .ok_or_else(|| ChainError::AbiError("missing topic".to_string()))?
            } else {
                let chunk = words
                    .next()
                    .ok_or_else(|| ChainError::AbiError("missing data word".to_string()))?;
                let mut word = [0u8; WORD_SIZE];
                word.copy_from_slice(chunk);
                word
            };
            fields.push((param.name.clone(), Token::from_word(param.kind, &word)?));
        }
        Ok(fields)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    pub inputs: Vec<ParamKind>,
}

impl FunctionDescriptor {
    pub fn new(name: &str, inputs: Vec<ParamKind>) -> Self {
        Self {
            name: name.to_string(),
            inputs,
        }
    }

    pub fn check_args(&self, args: &[Token]) -> Result<(), ChainError> {
        let kinds: Vec<ParamKind> = args.iter().map(Token::kind).collect();
        if kinds != self.inputs {
            return Err(ChainError::AbiError(format!(
                "function {} called with mismatched arguments",
                self.name
            )));
        }
        Ok(())
    }
}

/// Interface metadata of a contract: what it can be called with and what it emits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInterface {
    pub constructor: Vec<ParamKind>,
    pub functions: Vec<FunctionDescriptor>,
    pub events: Vec<EventDescriptor>,
}

impl ContractInterface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constructor(mut self, inputs: Vec<ParamKind>) -> Self {
        self.constructor = inputs;
        self
    }

    pub fn with_function(mut self, function: FunctionDescriptor) -> Self {
        self.functions.push(function);
        self
    }

    pub fn with_event(mut self, event: EventDescriptor) -> Self {
        self.events.push(event);
        self
    }

    pub fn check_constructor_args(&self, args: &[Token]) -> Result<(), ChainError> {
        let kinds: Vec<ParamKind> = args.iter().map(Token::kind).collect();
        if kinds != self.constructor {
            return Err(ChainError::AbiError(
                "constructor called with mismatched arguments".to_string(),
            ));
        }
        Ok(())
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn event(&self, name: &str) -> Option<&EventDescriptor> {
        self.events.iter().find(|e| e.name == name)
    }

    pub fn event_by_topic(&self, topic: &Sha256Hash) -> Option<&EventDescriptor> {
        self.events.iter().find(|e| &e.topic() == topic)
    }
}
