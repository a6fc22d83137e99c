use std::sync::Arc;

use crate::changes::SENTINEL_COL;
use crate::config::MERGE_EQUAL_VALUES;
use crate::schema::ColumnSpec;
use crate::tests::{fresh_db, sync_once};
use crate::value::Value;
use crate::{ConvergeDb, RowOp};

async fn user_db(name: &str) -> (tempfile::TempDir, Arc<ConvergeDb>) {
    let (dir, db) = fresh_db(name).await;
    db.create_table("user", &["id"], &[ColumnSpec::new("name", Value::Null)])
        .unwrap();
    db.track_table("user").await.unwrap();
    (dir, db)
}

#[tokio::test]
async fn insert_exports_one_record_with_fresh_clocks() {
    let (_d, db) = user_db("a.redb").await;
    db.upsert("user", &[Value::Integer(1)], &[("name", Value::text("Javi"))])
        .await
        .unwrap();

    let changes = db.changes_since(0, None).await.unwrap();
    assert_eq!(changes.len(), 1);
    let r = &changes[0];
    assert_eq!(r.table, "user");
    assert_eq!(r.col_id, 0);
    assert_eq!(r.value, Value::text("Javi"));
    assert_eq!(r.col_version, 1);
    assert_eq!(r.db_version, 1);
    assert_eq!(r.site_id, db.site_id().await.unwrap());
    assert_eq!(r.causal_length, 1);
    assert_eq!(r.seq, 0);
}

#[tokio::test]
async fn delete_replaces_exports_with_a_sentinel() {
    let (_d, db) = user_db("a.redb").await;
    db.upsert("user", &[Value::Integer(1)], &[("name", Value::text("Javi"))])
        .await
        .unwrap();
    db.delete_row("user", &[Value::Integer(1)]).await.unwrap();

    let changes = db.changes_since(0, None).await.unwrap();
    assert_eq!(changes.len(), 1);
    let r = &changes[0];
    assert_eq!(r.col_id, SENTINEL_COL);
    assert_eq!(r.value, Value::Null);
    assert_eq!(r.causal_length, 2);
    assert_eq!(r.db_version, 2);
}

#[tokio::test]
async fn one_transaction_shares_a_version_and_orders_seq_by_column_id() {
    let (_d, db) = fresh_db("a.redb").await;
    db.create_table(
        "user",
        &["id"],
        &[
            ColumnSpec::new("name", Value::Null),
            ColumnSpec::new("age", Value::Null),
        ],
    )
    .unwrap();
    db.track_table("user").await.unwrap();

    // two rows in one transaction, columns listed out of id order
    db.write(vec![
        RowOp::upsert(
            "user",
            &[Value::Integer(1)],
            &[("age", Value::Integer(40)), ("name", Value::text("Javi"))],
        ),
        RowOp::upsert("user", &[Value::Integer(2)], &[("name", Value::text("Erin"))]),
    ])
    .await
    .unwrap();

    let changes = db.changes_since(0, None).await.unwrap();
    assert_eq!(changes.len(), 3);
    assert!(changes.iter().all(|c| c.db_version == 1));
    // row 1 first (smaller key), name (id 0) before age (id 1)
    assert_eq!(changes[0].col_id, 0);
    assert_eq!(changes[0].seq, 0);
    assert_eq!(changes[1].col_id, 1);
    assert_eq!(changes[1].seq, 1);
    assert_eq!(changes[2].value, Value::text("Erin"));
    assert_eq!(changes[2].seq, 2);
}

#[tokio::test]
async fn replicas_converge_through_bidirectional_sync() {
    let (_da, a) = user_db("a.redb").await;
    let (_db_, b) = user_db("b.redb").await;
    let k = [Value::Integer(1)];

    a.upsert("user", &k, &[("name", Value::text("bbb"))]).await.unwrap();
    b.upsert("user", &k, &[("name", Value::text("aaa"))]).await.unwrap();

    sync_once(&a, &b, 0).await;
    sync_once(&b, &a, 0).await;

    // equal col_version, larger value wins on both sides
    let want = Some(vec![("name".to_string(), Value::text("bbb"))]);
    assert_eq!(a.get_row("user", &k).await.unwrap(), want);
    assert_eq!(b.get_row("user", &k).await.unwrap(), want);
}

#[tokio::test]
async fn winning_merge_is_restamped_locally_but_keeps_origin_clocks() {
    let (_da, a) = user_db("a.redb").await;
    let (_db_, b) = user_db("b.redb").await;
    let k = [Value::Integer(1)];

    // b has local history so its next stamp is ahead of a's
    b.upsert("user", &[Value::Integer(9)], &[("name", Value::text("x"))])
        .await
        .unwrap();
    b.upsert("user", &[Value::Integer(9)], &[("name", Value::text("y"))])
        .await
        .unwrap();

    a.upsert("user", &k, &[("name", Value::text("Javi"))]).await.unwrap();
    sync_once(&a, &b, 0).await;

    let exported = b.changes_since(2, None).await.unwrap();
    assert_eq!(exported.len(), 1);
    let r = &exported[0];
    // origin identity travels unchanged
    assert_eq!(r.site_id, a.site_id().await.unwrap());
    assert_eq!(r.col_version, 1);
    // but the stamp is b's own watermark
    assert_eq!(r.db_version, 3);
    assert_eq!(b.db_version().await.unwrap(), 3);
}

#[tokio::test]
async fn higher_column_version_beats_value_order() {
    let (_da, a) = user_db("a.redb").await;
    let (_db_, b) = user_db("b.redb").await;
    let k = [Value::Integer(1)];

    a.upsert("user", &k, &[("name", Value::text("zzz"))]).await.unwrap();
    b.upsert("user", &k, &[("name", Value::text("mid"))]).await.unwrap();
    b.upsert("user", &k, &[("name", Value::text("aaa"))]).await.unwrap(); // col_version 2

    sync_once(&a, &b, 0).await;
    sync_once(&b, &a, 0).await;

    let want = Some(vec![("name".to_string(), Value::text("aaa"))]);
    assert_eq!(a.get_row("user", &k).await.unwrap(), want);
    assert_eq!(b.get_row("user", &k).await.unwrap(), want);
}

#[tokio::test]
async fn concurrent_delete_beats_concurrent_update() {
    let (_da, a) = user_db("a.redb").await;
    let (_db_, b) = user_db("b.redb").await;
    let k = [Value::Integer(1)];

    a.upsert("user", &k, &[("name", Value::text("Javi"))]).await.unwrap();
    let wm = sync_once(&a, &b, 0).await;
    sync_once(&b, &a, 0).await;

    // concurrently: a updates, b deletes
    a.upsert("user", &k, &[("name", Value::text("Erin"))]).await.unwrap();
    b.delete_row("user", &k).await.unwrap();

    sync_once(&a, &b, wm).await;
    sync_once(&b, &a, 0).await;

    assert_eq!(a.get_row("user", &k).await.unwrap(), None);
    assert_eq!(b.get_row("user", &k).await.unwrap(), None);
}

#[tokio::test]
async fn resurrection_outranks_the_tombstone_it_follows() {
    let (_da, a) = user_db("a.redb").await;
    let (_db_, b) = user_db("b.redb").await;
    let k = [Value::Integer(1)];

    a.upsert("user", &k, &[("name", Value::text("Javi"))]).await.unwrap();
    a.delete_row("user", &k).await.unwrap();
    a.upsert("user", &k, &[("name", Value::text("Javi"))]).await.unwrap();

    sync_once(&a, &b, 0).await;
    assert!(b.get_row("user", &k).await.unwrap().is_some());

    // a stale tombstone (cl=2) arriving late changes nothing
    let mut stale = b.changes_since(0, None).await.unwrap();
    stale.retain(|c| c.is_sentinel());
    assert!(stale.is_empty());
}

#[tokio::test]
async fn reapplying_a_changeset_is_idempotent() {
    let (_da, a) = user_db("a.redb").await;
    let (_db_, b) = user_db("b.redb").await;

    a.upsert("user", &[Value::Integer(1)], &[("name", Value::text("Javi"))])
        .await
        .unwrap();
    let changes = a.changes_since(0, None).await.unwrap();

    b.apply_changes(changes.clone()).await.unwrap();
    let v = b.db_version().await.unwrap();
    let snapshot = b.get_row("user", &[Value::Integer(1)]).await.unwrap();

    b.apply_changes(changes).await.unwrap();
    assert_eq!(b.db_version().await.unwrap(), v);
    assert_eq!(b.get_row("user", &[Value::Integer(1)]).await.unwrap(), snapshot);
}

#[tokio::test]
async fn equal_values_keep_first_writer_unless_configured() {
    let (_da, a) = user_db("a.redb").await;
    let (_db_, b) = user_db("b.redb").await;
    let k = [Value::Integer(1)];

    a.upsert("user", &k, &[("name", Value::text("c"))]).await.unwrap();
    b.upsert("user", &k, &[("name", Value::text("c"))]).await.unwrap();

    // default: same version, same value, incoming record does not win
    sync_once(&a, &b, 0).await;
    let r = &b.changes_since(0, None).await.unwrap()[0];
    assert_eq!(r.site_id, b.site_id().await.unwrap());
    assert_eq!(b.db_version().await.unwrap(), 1);
}

#[tokio::test]
async fn equal_values_tiebreak_on_site_id_when_enabled() {
    let (_da, a) = user_db("a.redb").await;
    let (_db_, b) = user_db("b.redb").await;
    a.set_config(MERGE_EQUAL_VALUES, true).await.unwrap();
    b.set_config(MERGE_EQUAL_VALUES, true).await.unwrap();
    let k = [Value::Integer(1)];

    a.upsert("user", &k, &[("name", Value::text("c"))]).await.unwrap();
    b.upsert("user", &k, &[("name", Value::text("c"))]).await.unwrap();

    sync_once(&a, &b, 0).await;
    sync_once(&b, &a, 0).await;

    let a_site = a.site_id().await.unwrap();
    let b_site = b.site_id().await.unwrap();
    let winner = a_site.max(b_site);

    let ra = &a.changes_since(0, None).await.unwrap()[0];
    let rb = &b.changes_since(0, None).await.unwrap()[0];
    assert_eq!(ra.site_id, winner);
    assert_eq!(rb.site_id, winner);
}

#[tokio::test]
async fn three_way_equal_value_tiebreak_settles() {
    let (_da, a) = user_db("a.redb").await;
    let (_db_, b) = user_db("b.redb").await;
    let (_dc, c) = user_db("c.redb").await;
    let k = [Value::Integer(1)];

    for db in [&a, &b, &c] {
        db.set_config(MERGE_EQUAL_VALUES, true).await.unwrap();
        db.upsert("user", &k, &[("name", Value::text("c"))]).await.unwrap();
    }

    for _ in 0..3 {
        sync_once(&a, &b, 0).await;
        sync_once(&b, &c, 0).await;
        sync_once(&c, &a, 0).await;
    }

    let winner = a
        .site_id()
        .await
        .unwrap()
        .max(b.site_id().await.unwrap())
        .max(c.site_id().await.unwrap());
    for db in [&a, &b, &c] {
        let r = &db.changes_since(0, None).await.unwrap()[0];
        assert_eq!(r.site_id, winner);
    }

    // Once every replica records the winning site, further gossip is pure
    // no-op and moves no watermark.
    let versions = [
        a.db_version().await.unwrap(),
        b.db_version().await.unwrap(),
        c.db_version().await.unwrap(),
    ];
    for _ in 0..2 {
        sync_once(&a, &b, 0).await;
        sync_once(&b, &c, 0).await;
        sync_once(&c, &a, 0).await;
        sync_once(&b, &a, 0).await;
        sync_once(&c, &b, 0).await;
        sync_once(&a, &c, 0).await;
    }
    assert_eq!(a.db_version().await.unwrap(), versions[0]);
    assert_eq!(b.db_version().await.unwrap(), versions[1]);
    assert_eq!(c.db_version().await.unwrap(), versions[2]);
}

#[tokio::test]
async fn three_replicas_converge_regardless_of_gossip_order() {
    let (_da, a) = user_db("a.redb").await;
    let (_db_, b) = user_db("b.redb").await;
    let (_dc, c) = user_db("c.redb").await;
    let k = [Value::Integer(1)];

    a.upsert("user", &k, &[("name", Value::text("alpha"))]).await.unwrap();
    b.upsert("user", &k, &[("name", Value::text("gamma"))]).await.unwrap();
    c.upsert("user", &k, &[("name", Value::text("beta"))]).await.unwrap();

    // two full gossip rounds in arbitrary pair order
    for _ in 0..2 {
        sync_once(&a, &b, 0).await;
        sync_once(&c, &a, 0).await;
        sync_once(&b, &c, 0).await;
        sync_once(&b, &a, 0).await;
        sync_once(&a, &c, 0).await;
        sync_once(&c, &b, 0).await;
    }

    let want = Some(vec![("name".to_string(), Value::text("gamma"))]);
    assert_eq!(a.get_row("user", &k).await.unwrap(), want);
    assert_eq!(b.get_row("user", &k).await.unwrap(), want);
    assert_eq!(c.get_row("user", &k).await.unwrap(), want);
}

#[tokio::test]
async fn exclude_filter_suppresses_a_sites_records() {
    let (_da, a) = user_db("a.redb").await;
    let (_db_, b) = user_db("b.redb").await;

    a.upsert("user", &[Value::Integer(1)], &[("name", Value::text("Javi"))])
        .await
        .unwrap();
    sync_once(&a, &b, 0).await;

    // b should not echo a's own writes back to a
    let a_site = a.site_id().await.unwrap();
    let echo = b.changes_since(0, Some(&a_site)).await.unwrap();
    assert!(echo.is_empty());
    let all = b.changes_since(0, None).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn incremental_watermarks_only_ship_new_records() {
    let (_da, a) = user_db("a.redb").await;
    let (_db_, b) = user_db("b.redb").await;

    a.upsert("user", &[Value::Integer(1)], &[("name", Value::text("Javi"))])
        .await
        .unwrap();
    let wm = sync_once(&a, &b, 0).await;

    a.upsert("user", &[Value::Integer(2)], &[("name", Value::text("Erin"))])
        .await
        .unwrap();
    let delta = a.changes_since(wm, None).await.unwrap();
    assert_eq!(delta.len(), 1);
    assert_eq!(delta[0].value, Value::text("Erin"));

    b.apply_changes(delta).await.unwrap();
    assert!(b.get_row("user", &[Value::Integer(2)]).await.unwrap().is_some());
}

#[tokio::test]
async fn wire_batches_round_trip_between_replicas() {
    let (_da, a) = user_db("a.redb").await;
    let (_db_, b) = user_db("b.redb").await;

    a.upsert("user", &[Value::Integer(1)], &[("name", Value::text("Javi"))])
        .await
        .unwrap();
    let wire = crate::changes::encode_batch(&a.changes_since(0, None).await.unwrap()).unwrap();
    let report = b.apply_changes_wire(&wire).await.unwrap();
    assert_eq!(report.applied, 1);
    assert!(b.get_row("user", &[Value::Integer(1)]).await.unwrap().is_some());

    assert!(b.apply_changes_wire(&[0xde, 0xad]).await.is_err());
}
