//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Conservation: Σ(delta) == 0 over the whole log
//! - Exactly-once: a hold leaves `Held` exactly once
//! - Available balance never exceeds settled balance, never goes negative

use ledger_core::{Config, Error, Ledger, UserId};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Strategy for generating valid amounts (positive decimals, minor units)
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1u64..1_000_00u64).prop_map(|cents| Decimal::new(cents as i64, 2))
}

/// Strategy for picking one of a small set of users
fn user_strategy() -> impl Strategy<Value = UserId> {
    (0u8..4).prop_map(|n| UserId::new(format!("user-{}", n)))
}

/// One step of a random wallet workload
#[derive(Debug, Clone)]
enum Op {
    Deposit(UserId, Decimal),
    /// Hold then settle: release to payee, refund, or leave active
    Hold(UserId, Decimal, Settlement),
}

#[derive(Debug, Clone)]
enum Settlement {
    Release(UserId),
    Refund,
    Leave,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (user_strategy(), amount_strategy()).prop_map(|(u, a)| Op::Deposit(u, a)),
        (
            user_strategy(),
            amount_strategy(),
            prop_oneof![
                user_strategy().prop_map(Settlement::Release),
                Just(Settlement::Refund),
                Just(Settlement::Leave),
            ]
        )
            .prop_map(|(u, a, s)| Op::Hold(u, a, s)),
    ]
}

/// Create test ledger with temp directory
async fn create_test_ledger() -> (Ledger, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();

    (Ledger::open(config).await.unwrap(), temp_dir)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: conservation holds after any workload, and no user's
    /// available balance ever goes negative
    #[test]
    fn prop_conservation_under_random_workload(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger().await;

            for op in &ops {
                match op {
                    Op::Deposit(user, amount) => {
                        ledger.deposit(user.clone(), *amount).await.unwrap();
                    }
                    Op::Hold(user, amount, settlement) => {
                        // Holds may legitimately fail on insufficient funds
                        let hold = match ledger.hold(user.clone(), *amount, Uuid::new_v4()).await {
                            Ok(hold) => hold,
                            Err(Error::InsufficientFunds { .. }) => continue,
                            Err(e) => panic!("unexpected hold error: {}", e),
                        };

                        match settlement {
                            Settlement::Release(payee) => {
                                ledger.release(hold.hold_id, payee.clone()).await.unwrap();
                            }
                            Settlement::Refund => {
                                ledger.refund(hold.hold_id).await.unwrap();
                            }
                            Settlement::Leave => {}
                        }
                    }
                }

                prop_assert!(ledger.check_conservation().await.unwrap());
            }

            for n in 0u8..4 {
                let user = UserId::new(format!("user-{}", n));
                let available = ledger.available_balance(user.clone()).await.unwrap();
                let balance = ledger.balance(user).await.unwrap();
                prop_assert!(available >= Decimal::ZERO);
                prop_assert!(available <= balance);
            }

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: a hold settles exactly once, whichever way it settles
    #[test]
    fn prop_hold_settles_exactly_once(amount in amount_strategy(), release_first in any::<bool>()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger().await;

            let buyer = UserId::new("buyer-1");
            let seller = UserId::new("seller-9");

            ledger.deposit(buyer.clone(), amount).await.unwrap();
            let hold = ledger.hold(buyer.clone(), amount, Uuid::new_v4()).await.unwrap();

            if release_first {
                ledger.release(hold.hold_id, seller.clone()).await.unwrap();
            } else {
                ledger.refund(hold.hold_id).await.unwrap();
            }

            // Any further settlement attempt is rejected
            let release_again = ledger.release(hold.hold_id, seller.clone()).await;
            prop_assert!(matches!(release_again, Err(Error::HoldAlreadySettled(_))));
            let refund_again = ledger.refund(hold.hold_id).await;
            prop_assert!(matches!(refund_again, Err(Error::HoldAlreadySettled(_))));

            // Seller was paid at most once
            let expected = if release_first { amount } else { Decimal::ZERO };
            prop_assert_eq!(ledger.balance(seller).await.unwrap(), expected);

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: a hold for the full available balance always succeeds,
    /// one cent more always fails
    #[test]
    fn prop_hold_boundary(amount in amount_strategy()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger().await;

            let buyer = UserId::new("buyer-1");
            ledger.deposit(buyer.clone(), amount).await.unwrap();

            let over = amount + Decimal::new(1, 2);
            let result = ledger.hold(buyer.clone(), over, Uuid::new_v4()).await;
            prop_assert!(matches!(result, Err(Error::InsufficientFunds { .. })));

            let exact = ledger.hold(buyer.clone(), amount, Uuid::new_v4()).await;
            prop_assert!(exact.is_ok());
            prop_assert_eq!(
                ledger.available_balance(buyer).await.unwrap(),
                Decimal::ZERO
            );

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_wallet_hold_cancel_scenario() {
        // Buyer has 500, orders a 500 item, cancels before confirm
        let (ledger, _temp) = create_test_ledger().await;

        let buyer = UserId::new("buyer-1");
        let amount = Decimal::new(50000, 2);

        ledger.deposit(buyer.clone(), amount).await.unwrap();
        let hold = ledger.hold(buyer.clone(), amount, Uuid::new_v4()).await.unwrap();
        assert_eq!(ledger.available_balance(buyer.clone()).await.unwrap(), Decimal::ZERO);

        ledger.refund(hold.hold_id).await.unwrap();
        assert_eq!(ledger.available_balance(buyer.clone()).await.unwrap(), amount);
        assert!(ledger.check_conservation().await.unwrap());

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_holds_cannot_overdraw() {
        let (ledger, _temp) = create_test_ledger().await;
        let ledger = std::sync::Arc::new(ledger);

        let buyer = UserId::new("buyer-1");
        ledger.deposit(buyer.clone(), Decimal::new(50000, 2)).await.unwrap();

        // Ten concurrent holds of 100.00 against a 500.00 balance:
        // exactly five can succeed
        let mut tasks = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            let buyer = buyer.clone();
            tasks.push(tokio::spawn(async move {
                ledger.hold(buyer, Decimal::new(10000, 2), Uuid::new_v4()).await
            }));
        }

        let mut succeeded = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 5);
        assert_eq!(
            ledger.available_balance(buyer).await.unwrap(),
            Decimal::ZERO
        );
    }
}
