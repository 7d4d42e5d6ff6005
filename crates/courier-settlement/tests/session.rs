use std::sync::Arc;
use std::time::Duration;

use courier_core::time::parse_db;
use courier_core::{DriverProfile, FixedClock, LedgerError, NewPayment, OrderDraft, PaymentMethod};
use courier_settlement::{
    PaymentCap, PaymentRequest, ReconcilerConfig, SessionPhase, SessionState, SettlementSession,
};
use courier_store::SqliteLedgerStore;
use tokio::sync::watch;

const NOW: &str = "2026-02-06 10:00:00";

fn driver(name: &str, commission: f64) -> DriverProfile {
    DriverProfile {
        name: name.to_string(),
        commission,
        ..DriverProfile::default()
    }
}

fn draft(driver: &str, amount: i64) -> OrderDraft {
    OrderDraft {
        customer_name: "Reza".to_string(),
        driver_name: driver.to_string(),
        neighborhood_name: "Tajrish".to_string(),
        amount,
        description: String::new(),
    }
}

fn cash(amount: i64) -> PaymentRequest {
    PaymentRequest {
        amount,
        method: PaymentMethod::Cash,
        cap: PaymentCap::Unbounded,
    }
}

async fn setup() -> (Arc<SqliteLedgerStore>, SettlementSession<SqliteLedgerStore>) {
    let store = Arc::new(SqliteLedgerStore::in_memory().await.unwrap());
    let clock = Arc::new(FixedClock(parse_db(NOW).unwrap()));
    let session = SettlementSession::new(
        Arc::clone(&store),
        clock,
        ReconcilerConfig {
            coalesce_window: Duration::from_millis(5),
        },
    );
    (store, session)
}

async fn wait_for<F>(rx: &mut watch::Receiver<SessionState>, mut done: F) -> SessionState
where
    F: FnMut(&SessionState) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let state = rx.borrow_and_update();
                if done(&state) {
                    return state.clone();
                }
            }
            rx.changed().await.expect("session dropped");
        }
    })
    .await
    .expect("session never reached the expected state")
}

fn balance_is(state: &SessionState, balance: i64) -> bool {
    state
        .view
        .as_ref()
        .is_some_and(|view| view.figures.balance == balance)
}

#[tokio::test]
async fn loading_a_driver_goes_live() {
    let (store, mut session) = setup().await;
    let ali = store.insert_driver(&driver("Ali", 10.0)).await.unwrap();
    store.place_order(&draft("Ali", 100), NOW).await.unwrap();

    let mut rx = session.subscribe();
    session.load_driver(ali).await.unwrap();
    assert_eq!(session.state().phase, SessionPhase::Loading);

    let state = wait_for(&mut rx, |state| state.phase == SessionPhase::Live).await;
    let view = state.view.unwrap();
    assert_eq!(view.driver_id, ali);
    assert_eq!(view.orders.len(), 1);
    assert_eq!(view.figures.total, 100);
    assert_eq!(view.figures.commission, 10);
    assert_eq!(view.figures.net, 90);
    assert_eq!(view.figures.paid, 0);
    assert_eq!(view.figures.balance, 90);
    assert!(!state.settle_offered);
}

#[tokio::test]
async fn unknown_driver_is_rejected() {
    let (_store, mut session) = setup().await;
    let err = session.load_driver(99).await.unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "driver", id: 99 }));

    let state = session.state();
    assert_eq!(state.phase, SessionPhase::Idle);
    assert_eq!(state.generation, 0);
}

#[tokio::test]
async fn clearing_the_balance_offers_settlement_once() {
    let (store, mut session) = setup().await;
    let ali = store.insert_driver(&driver("Ali", 10.0)).await.unwrap();
    store.place_order(&draft("Ali", 100), NOW).await.unwrap();

    let mut rx = session.subscribe();
    session.load_driver(ali).await.unwrap();
    wait_for(&mut rx, |state| state.phase == SessionPhase::Live).await;

    session.record_payment(cash(90)).await.unwrap();
    let state = wait_for(&mut rx, |state| state.phase == SessionPhase::SettleOffered).await;
    assert!(state.settle_offered);
    assert!(balance_is(&state, 0));

    assert!(session.decline_settlement());
    assert!(!session.decline_settlement());
    assert_eq!(session.state().phase, SessionPhase::Live);

    session.record_payment(cash(10)).await.unwrap();
    let state = wait_for(&mut rx, |state| balance_is(state, -10)).await;
    assert_eq!(state.phase, SessionPhase::Live);
}

#[tokio::test]
async fn accepting_settlement_closes_the_cycle() {
    let (store, mut session) = setup().await;
    let ali = store.insert_driver(&driver("Ali", 10.0)).await.unwrap();
    store.place_order(&draft("Ali", 100), NOW).await.unwrap();

    let mut rx = session.subscribe();
    session.load_driver(ali).await.unwrap();
    wait_for(&mut rx, |state| state.phase == SessionPhase::Live).await;
    session.record_payment(cash(90)).await.unwrap();
    wait_for(&mut rx, |state| state.phase == SessionPhase::SettleOffered).await;

    assert_eq!(session.commit_settlement().await.unwrap(), 1);
    assert_eq!(session.state().phase, SessionPhase::Live);

    let state = wait_for(&mut rx, |state| {
        state.view.as_ref().is_some_and(|view| view.orders.is_empty())
    })
    .await;
    let figures = state.view.unwrap().figures;
    assert_eq!((figures.total, figures.paid, figures.balance), (0, 0, 0));

    // The earlier payment stays in the closed cycle. One recorded after the
    // settlement counts toward the next, although it shares the same second.
    session.record_payment(cash(20)).await.unwrap();
    store
        .place_order(&draft("Ali", 50), "2026-02-06 11:00:00")
        .await
        .unwrap();
    let state = wait_for(&mut rx, |state| balance_is(state, 25)).await;
    assert_eq!(state.view.unwrap().figures.paid, 20);
    assert_eq!(state.phase, SessionPhase::Live);
}

#[tokio::test]
async fn view_keeps_refreshing_under_sustained_writes() {
    let store = Arc::new(SqliteLedgerStore::in_memory().await.unwrap());
    let clock = Arc::new(FixedClock(parse_db(NOW).unwrap()));
    let mut session = SettlementSession::new(
        Arc::clone(&store),
        clock,
        ReconcilerConfig {
            coalesce_window: Duration::from_millis(25),
        },
    );
    let ali = store.insert_driver(&driver("Ali", 10.0)).await.unwrap();

    let mut rx = session.subscribe();
    session.load_driver(ali).await.unwrap();
    wait_for(&mut rx, |state| state.phase == SessionPhase::Live).await;

    let writer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for _ in 0..200 {
                store.place_order(&draft("Ali", 10), NOW).await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    let state = wait_for(&mut rx, |state| {
        state.view.as_ref().is_some_and(|view| view.figures.total > 0)
    })
    .await;
    assert!(!writer.is_finished());
    assert!(state.view.unwrap().figures.total < 2_000);

    writer.await.unwrap();
    wait_for(&mut rx, |state| {
        state.view.as_ref().is_some_and(|view| view.figures.total == 2_000)
    })
    .await;
}

#[tokio::test]
async fn already_cleared_driver_is_offered_on_load() {
    let (store, mut session) = setup().await;
    let ali = store.insert_driver(&driver("Ali", 10.0)).await.unwrap();
    store.place_order(&draft("Ali", 100), NOW).await.unwrap();
    store
        .insert_payment(&NewPayment {
            driver_id: ali,
            amount: 90,
            method: PaymentMethod::Cash,
            date_time: NOW.to_string(),
        })
        .await
        .unwrap();

    let mut rx = session.subscribe();
    session.load_driver(ali).await.unwrap();
    let state = wait_for(&mut rx, |state| state.phase == SessionPhase::SettleOffered).await;
    assert!(state.settle_offered);
    assert!(balance_is(&state, 0));
}

#[tokio::test]
async fn payments_without_open_orders_show_nothing_owed() {
    let (store, mut session) = setup().await;
    let ali = store.insert_driver(&driver("Ali", 10.0)).await.unwrap();

    let mut rx = session.subscribe();
    session.load_driver(ali).await.unwrap();
    wait_for(&mut rx, |state| state.phase == SessionPhase::Live).await;

    session.record_payment(cash(40)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = session.state();
    let figures = state.view.unwrap().figures;
    assert_eq!((figures.paid, figures.balance), (0, 0));
    assert_eq!(state.phase, SessionPhase::Live);
    assert!(!state.settle_offered);
}

#[tokio::test]
async fn capped_payment_cannot_exceed_balance() {
    let (store, mut session) = setup().await;
    let ali = store.insert_driver(&driver("Ali", 10.0)).await.unwrap();
    store.place_order(&draft("Ali", 100), NOW).await.unwrap();

    let mut rx = session.subscribe();
    session.load_driver(ali).await.unwrap();
    wait_for(&mut rx, |state| state.phase == SessionPhase::Live).await;

    let over = PaymentRequest {
        cap: PaymentCap::CurrentBalance,
        ..cash(91)
    };
    assert!(matches!(
        session.record_payment(over).await,
        Err(LedgerError::Validation(_))
    ));
    assert!(matches!(
        session.record_payment(cash(0)).await,
        Err(LedgerError::Validation(_))
    ));
    assert_eq!(store.total_paid_since_last_settlement(ali).await.unwrap(), 0);

    let exact = PaymentRequest {
        cap: PaymentCap::CurrentBalance,
        ..cash(90)
    };
    let receipt = session.record_payment(exact).await.unwrap();
    assert!(receipt.clears_balance);
    assert_eq!(receipt.driver_id, ali);
    assert_eq!(store.total_paid_since_last_settlement(ali).await.unwrap(), 90);
}

#[tokio::test]
async fn actions_need_a_loaded_driver() {
    let (_store, session) = setup().await;
    assert!(matches!(
        session.commit_settlement().await,
        Err(LedgerError::Validation(_))
    ));
    assert!(matches!(
        session.record_payment(cash(10)).await,
        Err(LedgerError::Validation(_))
    ));
    assert!(!session.decline_settlement());
}

#[tokio::test]
async fn rate_change_recomputes_the_view() {
    let (store, mut session) = setup().await;
    let ali = store.insert_driver(&driver("Ali", 10.0)).await.unwrap();
    store.place_order(&draft("Ali", 100), NOW).await.unwrap();

    let mut rx = session.subscribe();
    session.load_driver(ali).await.unwrap();
    wait_for(&mut rx, |state| balance_is(state, 90)).await;

    store
        .update_driver(ali, &driver("Ali", 20.0), NOW)
        .await
        .unwrap();
    let state = wait_for(&mut rx, |state| balance_is(state, 80)).await;
    let view = state.view.unwrap();
    assert_eq!(view.rate, 20.0);
    assert_eq!(view.figures.commission, 20);
}

#[tokio::test]
async fn switching_drivers_discards_the_previous_view() {
    let (store, mut session) = setup().await;
    let ali = store.insert_driver(&driver("Ali", 10.0)).await.unwrap();
    let sara = store.insert_driver(&driver("Sara", 20.0)).await.unwrap();
    store.place_order(&draft("Ali", 100), NOW).await.unwrap();
    store.place_order(&draft("Sara", 200), NOW).await.unwrap();

    let mut rx = session.subscribe();
    session.load_driver(ali).await.unwrap();
    session.load_driver(sara).await.unwrap();

    let state = wait_for(&mut rx, |state| state.phase == SessionPhase::Live).await;
    assert_eq!(state.generation, 2);
    assert_eq!(state.driver_id, Some(sara));
    assert_eq!(state.view.as_ref().unwrap().driver_id, sara);

    store.place_order(&draft("Ali", 500), NOW).await.unwrap();
    store.place_order(&draft("Sara", 300), NOW).await.unwrap();
    let state = wait_for(&mut rx, |state| {
        state
            .view
            .as_ref()
            .is_some_and(|view| view.figures.total == 500)
    })
    .await;
    let view = state.view.unwrap();
    assert_eq!(view.driver_id, sara);
    assert!(view.orders.iter().all(|order| order.driver_id == sara));
    assert_eq!(view.figures.balance, 400);
}

#[tokio::test]
async fn unload_returns_to_idle() {
    let (store, mut session) = setup().await;
    let ali = store.insert_driver(&driver("Ali", 10.0)).await.unwrap();

    let mut rx = session.subscribe();
    session.load_driver(ali).await.unwrap();
    wait_for(&mut rx, |state| state.phase == SessionPhase::Live).await;

    session.unload();
    store.place_order(&draft("Ali", 100), NOW).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = session.state();
    assert_eq!(state.phase, SessionPhase::Idle);
    assert_eq!(state.driver_id, None);
    assert!(state.view.is_none());
}
