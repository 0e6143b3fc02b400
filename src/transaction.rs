//! Transaction module split into types and validation for better modularity

pub mod types;
pub mod validation;

pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{ensure_funded, WorldState};
    use crate::crypto::{sha256, KeyPair};

    fn keypair(name: &str) -> KeyPair {
        KeyPair::from_secret_bytes(&sha256(name.as_bytes())).unwrap()
    }

    #[test]
    fn test_tx_validation_success() {
        let keypair = keypair("alice");
        let mut state = WorldState::new();
        ensure_funded(&mut state, &keypair.address(), 1_000);

        let tx = Transaction::transfer(keypair.address(), 0, [7u8; 20], 100, 21_000)
            .signed(&keypair)
            .unwrap();
        assert!(tx.validate(&state).is_ok());
    }

    #[test]
    fn test_unsigned_transaction_fails() {
        let state = WorldState::new();
        let tx = Transaction::transfer([1u8; 20], 0, [7u8; 20], 0, 21_000);
        let err = tx.validate(&state).unwrap_err();
        assert_eq!(err.to_string(), "Invalid transaction: Transaction not signed");
    }

    #[test]
    fn test_signature_from_other_key_fails() {
        let alice = keypair("alice");
        let mallory = keypair("mallory");
        let tx = Transaction::transfer(alice.address(), 0, [7u8; 20], 0, 21_000)
            .signed(&mallory)
            .unwrap();
        assert!(tx.validate_signature().is_err());
    }

    #[test]
    fn test_tampered_transaction_fails() {
        let alice = keypair("alice");
        let mut tx = Transaction::transfer(alice.address(), 0, [7u8; 20], 5, 21_000)
            .signed(&alice)
            .unwrap();
        tx.value = 5_000;
        assert!(tx.validate_signature().is_err());
    }

    #[test]
    fn test_wrong_nonce_and_overdraft_are_rejected() {
        let alice = keypair("alice");
        let mut state = WorldState::new();
        ensure_funded(&mut state, &alice.address(), 10);

        let wrong_nonce = Transaction::transfer(alice.address(), 3, [7u8; 20], 1, 21_000)
            .signed(&alice)
            .unwrap();
        assert!(wrong_nonce
            .validate(&state)
            .unwrap_err()
            .to_string()
            .contains("Invalid nonce"));

        let overdraft = Transaction::transfer(alice.address(), 0, [7u8; 20], 11, 21_000)
            .signed(&alice)
            .unwrap();
        assert!(overdraft
            .validate(&state)
            .unwrap_err()
            .to_string()
            .contains("Insufficient balance"));
    }

    #[test]
    fn test_hash_changes_with_signature() {
        let alice = keypair("alice");
        let unsigned = Transaction::transfer(alice.address(), 0, [7u8; 20], 1, 21_000);
        let signed = unsigned.clone().signed(&alice).unwrap();
        assert_ne!(unsigned.hash(), signed.hash());
        assert_eq!(signed.hash_str().len(), 64);
    }
}
