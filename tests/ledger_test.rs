//! Ledger Integrity Tests
//!
//! Chain validity, tamper detection, filtering and concurrent appends
//! against real ledger files.

use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::tempdir;

use trading_audit::audit::{Payload, DEFAULT_STATUS};
use trading_audit::AuditError;

mod common;
use common::*;

#[tokio::test]
async fn test_chain_valid_after_sequential_writes() {
    let dir = tempdir().unwrap();
    let audit = open_service(&ledger_path(&dir)).await;

    let n = 25;
    for i in 0..n {
        audit
            .log("risk_check", "evaluate", payload(json!({"i": i, "symbol": "600519"})), DEFAULT_STATUS)
            .await
            .unwrap();
    }

    let report = audit.verify_chain(100).await.unwrap();
    assert!(report.valid);
    assert_eq!(report.checked_rows, n);
    assert_eq!(report.first_break_id, None);
    assert_eq!(report.message, "hash chain verified");
}

#[tokio::test]
async fn test_chain_valid_with_full_precision_floats() {
    let dir = tempdir().unwrap();
    let audit = open_service(&ledger_path(&dir)).await;

    audit
        .log("portfolio", "rebalance", payload(json!({"weight": 394301.33835633675})), "OK")
        .await
        .unwrap();

    // Prices and P&L computed at runtime rather than typed as short literals
    let mut price = 1731.2_f64;
    for i in 1..=200 {
        price = price * 1.000_731 + (i as f64).sqrt() / 7.0;
        let pnl = (price - 1731.2) * 300.0 / 3.0;
        audit
            .log(
                "pipeline",
                "fill",
                payload(json!({"price": price, "pnl": pnl, "weight": 1.0 / (i as f64 + 2.0)})),
                "OK",
            )
            .await
            .unwrap();
    }

    let report = audit.verify_chain(1000).await.unwrap();
    assert!(report.valid, "{:?}", report);
    assert_eq!(report.checked_rows, 201);

    let first = audit.query(None, 1000).await.unwrap().remove(0);
    assert_eq!(first.payload["weight"], json!(394301.33835633675));
}

#[tokio::test]
async fn test_verify_limit_bounds_checked_rows() {
    let dir = tempdir().unwrap();
    let audit = open_service(&ledger_path(&dir)).await;

    for i in 0..10 {
        audit.log("x", "a", payload(json!({"i": i})), "OK").await.unwrap();
    }

    let report = audit.verify_chain(4).await.unwrap();
    assert!(report.valid);
    assert_eq!(report.checked_rows, 4);
}

#[tokio::test]
async fn test_empty_ledger_verifies() {
    let dir = tempdir().unwrap();
    let audit = open_service(&ledger_path(&dir)).await;

    let report = audit.verify_chain(100).await.unwrap();
    assert!(report.valid);
    assert_eq!(report.checked_rows, 0);
}

#[tokio::test]
async fn test_query_filtering() {
    let dir = tempdir().unwrap();
    let audit = open_service(&ledger_path(&dir)).await;

    let first = audit.log("a", "one", payload(json!({"n": 1})), "OK").await.unwrap();
    let second = audit.log("a", "two", payload(json!({"n": 2})), "OK").await.unwrap();
    audit.log("b", "three", payload(json!({"n": 3})), "OK").await.unwrap();

    let rows = audit.query(Some("a"), 10).await.unwrap();
    let ids: Vec<i64> = rows.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![first, second]);
    assert_eq!(rows[0].action, "one");
    assert_eq!(rows[1].action, "two");

    assert!(audit.query(Some("c"), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_query_rejects_non_positive_limit() {
    let dir = tempdir().unwrap();
    let audit = open_service(&ledger_path(&dir)).await;

    let err = audit.query(None, 0).await.unwrap_err();
    assert!(matches!(err, AuditError::InvalidArgument(_)));
    assert!(!err.is_storage_unavailable());
}

#[tokio::test]
async fn test_tampered_payload_detected() {
    let dir = tempdir().unwrap();
    let path = ledger_path(&dir);
    let audit = open_service(&path).await;

    for qty in [100, 200, 300] {
        audit
            .log("pipeline", "order", payload(json!({"symbol": "000001", "qty": qty})), "OK")
            .await
            .unwrap();
    }

    tamper(
        &path,
        r#"UPDATE audit_events SET payload = '{"qty":9999,"symbol":"000001"}' WHERE id = 2"#,
    )
    .await;

    let report = audit.verify_chain(100).await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.first_break_id, Some(2));
    assert_eq!(report.checked_rows, 2);
}

#[tokio::test]
async fn test_tampered_status_detected() {
    let dir = tempdir().unwrap();
    let path = ledger_path(&dir);
    let audit = open_service(&path).await;

    audit.log("risk_check", "evaluate", Payload::new(), "ERROR").await.unwrap();
    audit.log("risk_check", "evaluate", Payload::new(), "OK").await.unwrap();

    tamper(&path, "UPDATE audit_events SET status = 'OK' WHERE id = 1").await;

    let report = audit.verify_chain(100).await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.first_break_id, Some(1));
}

#[tokio::test]
async fn test_tampered_hash_detected() {
    let dir = tempdir().unwrap();
    let path = ledger_path(&dir);
    let audit = open_service(&path).await;

    for i in 0..5 {
        audit.log("x", "a", payload(json!({"i": i})), "OK").await.unwrap();
    }

    tamper(
        &path,
        "UPDATE audit_events SET hash = 'sha256:0123456789abcdef' WHERE id = 4",
    )
    .await;

    let report = audit.verify_chain(100).await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.first_break_id, Some(4));
}

#[tokio::test]
async fn test_rehashed_row_still_breaks_successor() {
    let dir = tempdir().unwrap();
    let path = ledger_path(&dir);
    let audit = open_service(&path).await;

    for i in 0..3 {
        audit.log("x", "a", payload(json!({"i": i})), "OK").await.unwrap();
    }

    // Rewriting a row's content and hash consistently moves the break to
    // the next entry, whose prev_hash no longer matches.
    let mut forged = audit.query(None, 10).await.unwrap().remove(1);
    forged.status = "ERROR".to_string();
    forged.hash = forged.calculate_hash();
    tamper(
        &path,
        &format!(
            "UPDATE audit_events SET status = 'ERROR', hash = '{}' WHERE id = 2",
            forged.hash
        ),
    )
    .await;

    let report = audit.verify_chain(100).await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.first_break_id, Some(3));
}

#[tokio::test]
async fn test_deleted_row_detected() {
    let dir = tempdir().unwrap();
    let path = ledger_path(&dir);
    let audit = open_service(&path).await;

    for i in 0..4 {
        audit.log("x", "a", payload(json!({"i": i})), "OK").await.unwrap();
    }

    tamper(&path, "DELETE FROM audit_events WHERE id = 2").await;

    let report = audit.verify_chain(100).await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.first_break_id, Some(3));
}

#[tokio::test]
async fn test_damaged_row_does_not_block_query_or_export() {
    let dir = tempdir().unwrap();
    let path = ledger_path(&dir);
    let audit = open_service(&path).await;

    for symbol in ["000001", "600519", "300750"] {
        audit
            .log("pipeline", "order", payload(json!({"symbol": symbol})), "OK")
            .await
            .unwrap();
    }

    tamper(&path, "UPDATE audit_events SET payload = 'not json' WHERE id = 2").await;

    let ids: Vec<i64> = audit.query(None, 10).await.unwrap().iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![1, 3]);

    let csv = audit.export_csv(None, 10).await.unwrap();
    assert_eq!(csv.lines().count(), 3);
    assert!(csv.contains("300750"));

    let report = audit.verify_chain(100).await.unwrap();
    assert_eq!(report.first_break_id, Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_stay_chained() {
    let dir = tempdir().unwrap();
    let audit = Arc::new(open_service(&ledger_path(&dir)).await);

    let k = 32;
    let handles: Vec<_> = (0..k)
        .map(|i| {
            let audit = audit.clone();
            tokio::spawn(async move {
                audit
                    .log("alert", "sync", payload(json!({"worker": i})), "OK")
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap());
    }

    let expected: HashSet<i64> = (1..=k as i64).collect();
    assert_eq!(ids, expected);

    let report = audit.verify_chain(1000).await.unwrap();
    assert!(report.valid);
    assert_eq!(report.checked_rows, k as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_run_alongside_appends() {
    let dir = tempdir().unwrap();
    let audit = Arc::new(open_service(&ledger_path(&dir)).await);

    let writer = {
        let audit = audit.clone();
        tokio::spawn(async move {
            for i in 0..50 {
                audit.log("x", "w", payload(json!({"i": i})), "OK").await.unwrap();
            }
        })
    };

    for _ in 0..10 {
        let report = audit.verify_chain(1000).await.unwrap();
        assert!(report.valid);
        let rows = audit.query(None, 1000).await.unwrap();
        assert!(rows.windows(2).all(|w| w[1].prev_hash == w[0].hash));
    }

    writer.await.unwrap();
    assert_eq!(audit.verify_chain(1000).await.unwrap().checked_rows, 50);
}

#[tokio::test]
async fn test_reopen_continues_chain() {
    let dir = tempdir().unwrap();
    let path = ledger_path(&dir);

    let first = open_service(&path).await;
    first.log("x", "a", Payload::new(), "OK").await.unwrap();
    first.ledger().close().await;

    let second = open_service(&path).await;
    let id = second.log("x", "b", Payload::new(), "OK").await.unwrap();
    assert_eq!(id, 2);

    let rows = second.query(None, 10).await.unwrap();
    assert_eq!(rows[1].prev_hash, rows[0].hash);
    assert!(rows[1].created_at > rows[0].created_at);
    assert!(second.verify_chain(10).await.unwrap().valid);
}
