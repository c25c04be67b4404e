//! Behavioral parity suite for the two event log implementations
//!
//! The in-memory log is the reference semantics for subscriber dispatch;
//! the durable log must be indistinguishable from it. The same assertions
//! run against both backends. The PostgreSQL half connects via
//! `DATABASE_URL` and skips when no database is reachable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use weaver::event_log::{EventLog, MemoryEventLog, PgEventLog};
use weaver::events::{event_types, Envelope, Seq};

fn tick_envelope() -> Envelope {
    Envelope::new(
        event_types::CLOCK_TICK,
        "parity_test",
        serde_json::json!({
            "ts": chrono::Utc::now(),
            "timeframe": "1m",
            "bar_index": 0,
            "is_backtest": true,
        }),
    )
}

/// Every assertion both implementations must satisfy.
async fn assert_log_contract(log: Arc<dyn EventLog>) {
    let base = match log.read_from(0, u32::MAX).await.unwrap().last() {
        Some(record) => record.seq,
        None => 0,
    };

    // Appending then reading from an earlier offset yields the envelope
    // exactly once.
    let env = tick_envelope();
    let seq = log.append(env.clone()).await.unwrap();
    assert!(seq > base);
    let records = log.read_from(seq - 1, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].envelope, env);
    assert!(log.read_from(seq, 10).await.unwrap().is_empty());

    // Subscribers registered before the append observe envelopes
    // synchronously, in registration order, each in seq order.
    let observed: Arc<Mutex<Vec<(String, Seq)>>> = Arc::new(Mutex::new(Vec::new()));
    let mut subscription_ids = Vec::new();
    for name in ["first", "second"] {
        let observed = observed.clone();
        subscription_ids.push(log.subscribe(
            name,
            &[event_types::CLOCK_TICK],
            None,
            Arc::new(move |delivery| {
                let observed = observed.clone();
                Box::pin(async move {
                    observed.lock().unwrap().push((name.to_string(), delivery.seq));
                    Ok(())
                })
            }),
        ));
    }

    let seq_a = log.append(tick_envelope()).await.unwrap();
    let seq_b = log.append(tick_envelope()).await.unwrap();
    {
        let observed = observed.lock().unwrap();
        assert_eq!(
            *observed,
            vec![
                ("first".to_string(), seq_a),
                ("second".to_string(), seq_a),
                ("first".to_string(), seq_b),
                ("second".to_string(), seq_b),
            ]
        );
    }

    // A failing subscriber is skipped; append succeeds and later
    // subscribers still run.
    let after_failure = Arc::new(AtomicUsize::new(0));
    let failing = log.subscribe(
        "failing",
        &["*"],
        None,
        Arc::new(|_| Box::pin(async { anyhow::bail!("subscriber blew up") })),
    );
    let counter = after_failure.clone();
    let counting = log.subscribe(
        "after_failing",
        &["*"],
        None,
        Arc::new(move |_| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }),
    );
    log.append(tick_envelope()).await.unwrap();
    assert_eq!(after_failure.load(Ordering::SeqCst), 1);

    // Unsubscribe is idempotent and stops delivery.
    for id in subscription_ids {
        log.unsubscribe(id);
        log.unsubscribe(id);
    }
    log.unsubscribe(failing);
    log.unsubscribe(counting);
    let before = observed.lock().unwrap().len();
    log.append(tick_envelope()).await.unwrap();
    assert_eq!(observed.lock().unwrap().len(), before);

    // Unknown event types are refused before any persistence or dispatch.
    let last = log.read_from(0, u32::MAX).await.unwrap().last().unwrap().seq;
    let bad = Envelope::new("no.SuchType", "parity_test", serde_json::json!({}));
    assert!(log.append(bad).await.is_err());
    assert_eq!(
        log.read_from(0, u32::MAX).await.unwrap().last().unwrap().seq,
        last
    );
}

#[tokio::test]
async fn test_memory_log_contract() {
    assert_log_contract(Arc::new(MemoryEventLog::new())).await;
}

#[tokio::test]
async fn test_durable_log_contract() {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test - DATABASE_URL not set");
            return;
        }
    };
    let pool = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
    {
        Ok(pool) => pool,
        Err(_) => {
            eprintln!("Skipping test - database not available");
            return;
        }
    };
    weaver::persistence::schema::bootstrap(&pool).await.unwrap();

    assert_log_contract(Arc::new(PgEventLog::new(pool))).await;
}
