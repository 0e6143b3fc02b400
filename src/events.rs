//! Decoding of raw logs into named events and per-contract subscriptions.

use crate::abi::{Log, Token};
use crate::blockchain::LogListener;
use crate::contracts::ContractRegistry;
use crate::crypto::{address_to_hex, Address};
use crate::error::{ChainError, ListenerFailure};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, warn};

pub type ListenerError = Box<dyn Error + Send + Sync>;

/// A log decoded against the emitting contract's interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub address: Address,
    pub event: String,
    /// Field values in declaration order.
    pub fields: Vec<(String, Token)>,
}

impl DecodedEvent {
    pub fn get(&self, name: &str) -> Option<&Token> {
        self.fields.iter().find(|(field, _)| field == name).map(|(_, value)| value)
    }

    /// Flat JSON object of the fields, with the event name under `_event_type`.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("_event_type".to_string(), Value::String(self.event.clone()));
        for (name, value) in &self.fields {
            object.insert(name.clone(), value.to_json());
        }
        Value::Object(object)
    }
}

/// Callback receiving the decoded events of one contract.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &DecodedEvent) -> Result<(), ListenerError>;
}

impl<F> EventListener for F
where
    F: Fn(&DecodedEvent) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_event(&self, event: &DecodedEvent) -> Result<(), ListenerError> {
        self(event)
    }
}

/// Routes raw logs to the listeners subscribed to the emitting contract.
///
/// Clones share the same subscriptions.
#[derive(Clone)]
pub struct EventRouter {
    contracts: ContractRegistry,
    subscriptions: Arc<RwLock<HashMap<Address, Vec<Arc<dyn EventListener>>>>>,
}

impl EventRouter {
    pub fn new(contracts: ContractRegistry) -> Self {
        Self {
            contracts,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Appends `listener` to the contract's subscribers; dispatch follows
    /// subscription order.
    pub fn subscribe(&self, address: Address, listener: Arc<dyn EventListener>) {
        self.subscriptions.write().entry(address).or_default().push(listener);
        debug!(address = %address_to_hex(&address), "subscribed event listener");
    }

    pub fn listener_count(&self, address: &Address) -> usize {
        self.subscriptions.read().get(address).map_or(0, Vec::len)
    }

    /// Decodes `log` using the interface of the contract that emitted it.
    pub fn decode(&self, log: &Log) -> Result<DecodedEvent, ChainError> {
        let instance = self
            .contracts
            .get(&log.address)
            .ok_or_else(|| ChainError::UnknownContract(address_to_hex(&log.address)))?;
        let topic = log
            .topics
            .first()
            .ok_or_else(|| ChainError::AbiError("log carries no event topic".to_string()))?;
        let descriptor = instance.interface.event_by_topic(topic).ok_or_else(|| {
            ChainError::AbiError(format!(
                "{} declares no event with topic {}",
                instance.name,
                hex::encode(topic)
            ))
        })?;

        Ok(DecodedEvent {
            address: log.address,
            event: descriptor.name.clone(),
            fields: descriptor.decode_fields(log)?,
        })
    }

    /// Decodes `log` and delivers it to every subscriber of its contract.
    /// All subscribers are called even when some fail; the failures are
    /// returned together. Logs from unregistered contracts are an error even
    /// when nobody subscribed to them.
    pub fn dispatch(&self, log: &Log) -> Result<usize, ChainError> {
        let event = self.decode(log)?;
        let listeners = match self.subscriptions.read().get(&log.address) {
            Some(listeners) => listeners.clone(),
            None => return Ok(0),
        };
        let source = address_to_hex(&log.address);

        let mut failures = Vec::new();
        for listener in &listeners {
            if let Err(e) = listener.on_event(&event) {
                warn!(contract = %source, event = %event.event, error = %e, "event listener failed");
                failures.push(ListenerFailure::new(source.clone(), e.to_string()));
            }
        }
        if failures.is_empty() {
            Ok(listeners.len())
        } else {
            Err(ChainError::ListenerFailure(failures))
        }
    }
}

impl LogListener for EventRouter {
    fn on_log(&self, log: &Log) -> Result<(), ChainError> {
        self.dispatch(log).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{ContractInterface, EventDescriptor, EventParam, ParamKind};
    use crate::contracts::ContractInstance;
    use parking_lot::Mutex;

    fn sold() -> EventDescriptor {
        EventDescriptor::new(
            "Sold",
            vec![
                EventParam::indexed("buyer", ParamKind::Address),
                EventParam::new("price", ParamKind::Uint),
            ],
        )
    }

    fn router() -> EventRouter {
        let contracts = ContractRegistry::new();
        contracts.register(ContractInstance {
            address: [1u8; 20],
            name: "Market".to_string(),
            interface: Arc::new(ContractInterface::new().with_event(sold())),
            alias: None,
        });
        EventRouter::new(contracts)
    }

    fn sold_log(price: u128) -> Log {
        sold()
            .encode_log([1u8; 20], &[Token::Address([2u8; 20]), Token::Uint(price)])
            .unwrap()
    }

    fn recorder(seen: Arc<Mutex<Vec<(u8, u128)>>>, tag: u8) -> Arc<dyn EventListener> {
        Arc::new(move |event: &DecodedEvent| -> Result<(), ListenerError> {
            let price = event.get("price").and_then(Token::as_uint).unwrap_or_default();
            seen.lock().push((tag, price));
            Ok(())
        })
    }

    #[test]
    fn test_decode_and_json() {
        let event = router().decode(&sold_log(30)).unwrap();
        assert_eq!(event.event, "Sold");
        assert_eq!(event.get("price"), Some(&Token::Uint(30)));

        let json = event.to_json();
        assert_eq!(json["_event_type"], "Sold");
        assert_eq!(json["buyer"], address_to_hex(&[2u8; 20]));
    }

    #[test]
    fn test_listeners_called_in_subscription_order() {
        let router = router();
        let seen = Arc::new(Mutex::new(Vec::new()));
        router.subscribe([1u8; 20], recorder(seen.clone(), 1));
        router.subscribe([1u8; 20], recorder(seen.clone(), 2));

        router.on_log(&sold_log(5)).unwrap();
        router.on_log(&sold_log(6)).unwrap();
        assert_eq!(*seen.lock(), vec![(1, 5), (2, 5), (1, 6), (2, 6)]);
    }

    #[test]
    fn test_registered_contract_without_subscribers() {
        assert_eq!(router().dispatch(&sold_log(1)).unwrap(), 0);
    }

    #[test]
    fn test_unregistered_contract_is_rejected() {
        let log = EventDescriptor::new("Other", vec![]).encode_log([9u8; 20], &[]).unwrap();
        assert!(matches!(router().dispatch(&log), Err(ChainError::UnknownContract(_))));
    }

    #[test]
    fn test_failures_are_aggregated() {
        let router = router();
        let seen = Arc::new(Mutex::new(Vec::new()));
        router.subscribe(
            [1u8; 20],
            Arc::new(|_: &DecodedEvent| -> Result<(), ListenerError> { Err("first".into()) }),
        );
        router.subscribe([1u8; 20], recorder(seen.clone(), 2));
        router.subscribe(
            [1u8; 20],
            Arc::new(|_: &DecodedEvent| -> Result<(), ListenerError> { Err("third".into()) }),
        );

        match router.on_log(&sold_log(8)) {
            Err(ChainError::ListenerFailure(failures)) => {
                let messages: Vec<&str> = failures.iter().map(|f| f.message.as_str()).collect();
                assert_eq!(messages, vec!["first", "third"]);
            }
            other => panic!("expected listener failure, got {:?}", other),
        }
        assert_eq!(*seen.lock(), vec![(2, 8)]);
    }

    #[test]
    fn test_unknown_topic_is_an_abi_error() {
        let log = EventDescriptor::new("Refund", vec![]).encode_log([1u8; 20], &[]).unwrap();
        assert!(matches!(router().decode(&log), Err(ChainError::AbiError(_))));
    }
}
