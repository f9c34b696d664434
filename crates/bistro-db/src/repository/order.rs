//! # Order Repository
//!
//! Persists the Order aggregate.
//!
//! ## Storage Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        One Order Write                                  │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. UPDATE orders SET body = <Order JSON>, version = v + 1     │   │
//! │  │     WHERE id = ? AND version = v          (0 rows → stale)     │   │
//! │  │                                                                 │   │
//! │  │  2. DELETE FROM order_payments WHERE order_id = ?              │   │
//! │  │     INSERT INTO order_payments ... (one row per attempt)       │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Uniqueness enforced by SQLite, surfaced as DbError::UniqueViolation:  │
//! │  • one PLACED order per table                                          │
//! │  • one pending scan attempt per order                                  │
//! │  • (order no, channel, external ref) per attempt                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::error::{DbError, DbResult};
use bistro_core::{GatewayKind, Money, Order};

/// A scan attempt that has been PENDING for a while.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingScan {
    pub seq_no: String,
    pub order_no: String,
    pub gateway: Option<GatewayKind>,
    pub external_ref: Option<String>,
    pub amount: Money,
    pub opened_at_ms: i64,
}

/// Repository for order persistence.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub async fn get_by_no(&self, order_no: &str) -> DbResult<Option<Order>> {
        let row = sqlx::query("SELECT body, version FROM orders WHERE order_no = ?1")
            .bind(order_no)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| map_order(&r)).transpose()
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        let row = sqlx::query("SELECT body, version FROM orders WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| map_order(&r)).transpose()
    }

    /// The order holding payment attempt `seq_no`.
    pub async fn find_by_seq_no(&self, seq_no: &str) -> DbResult<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT o.body, o.version
            FROM orders o
            JOIN order_payments p ON p.order_id = o.id
            WHERE p.seq_no = ?1
            "#,
        )
        .bind(seq_no)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| map_order(&r)).transpose()
    }

    /// Order number of the PLACED order occupying `table_id`, if any.
    pub async fn active_order_for_table(&self, table_id: &str) -> DbResult<Option<String>> {
        let order_no: Option<String> = sqlx::query_scalar(
            "SELECT order_no FROM orders WHERE table_id = ?1 AND status = 'placed'",
        )
        .bind(table_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order_no)
    }

    /// Scan attempts still PENDING that were opened before `opened_before`,
    /// oldest first.
    pub async fn list_stale_pending_scans(
        &self,
        opened_before: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<PendingScan>> {
        let rows = sqlx::query(
            r#"
            SELECT seq_no, order_no, gateway, external_ref, amount_cents, opened_at_ms
            FROM order_payments
            WHERE state = 'pending' AND channel = 'scan' AND opened_at_ms < ?1
            ORDER BY opened_at_ms ASC
            LIMIT ?2
            "#,
        )
        .bind(opened_before.timestamp_millis())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PendingScan {
                    seq_no: row.try_get("seq_no")?,
                    order_no: row.try_get("order_no")?,
                    gateway: row.try_get("gateway")?,
                    external_ref: row.try_get("external_ref")?,
                    amount: Money::from_cents(row.try_get("amount_cents")?),
                    opened_at_ms: row.try_get("opened_at_ms")?,
                })
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Inserts a freshly opened order.
    ///
    /// ## Errors
    /// `UniqueViolation` if the order number is taken or the table is held by
    /// another PLACED order.
    pub async fn insert(&self, order: &Order) -> DbResult<()> {
        debug!(order_no = %order.order_no, table_id = ?order.table_id, "Inserting order");

        let body = serde_json::to_string(order)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_no, merchant_id, store_id, business_date, table_id,
                status, payment_status, total_cents, paid_cents,
                version, body, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14
            )
            "#,
        )
        .bind(&order.id)
        .bind(&order.order_no)
        .bind(&order.merchant_id)
        .bind(&order.store_id)
        .bind(order.business_date)
        .bind(&order.table_id)
        .bind(order.status)
        .bind(order.payment_status)
        .bind(order.amount.total.cents())
        .bind(order.amount.paid.cents())
        .bind(order.version)
        .bind(&body)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        write_payments(&mut tx, order).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Writes `order` if nobody else has since it was read, then bumps its
    /// version.
    ///
    /// ## Errors
    /// - `StaleVersion` if the stored version moved
    /// - `UniqueViolation` on a table or pending-scan clash
    pub async fn update(&self, order: &mut Order) -> DbResult<()> {
        let expected = order.version;
        let mut next = order.clone();
        next.version = expected + 1;
        let body = serde_json::to_string(&next)?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders SET
                table_id = ?1,
                status = ?2,
                payment_status = ?3,
                total_cents = ?4,
                paid_cents = ?5,
                version = ?6,
                body = ?7,
                updated_at = ?8
            WHERE id = ?9 AND version = ?10
            "#,
        )
        .bind(&next.table_id)
        .bind(next.status)
        .bind(next.payment_status)
        .bind(next.amount.total.cents())
        .bind(next.amount.paid.cents())
        .bind(next.version)
        .bind(&body)
        .bind(next.updated_at)
        .bind(&next.id)
        .bind(expected)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(order_no = %order.order_no, expected, "Stale order write");
            return Err(DbError::stale("Order", order.order_no.clone(), expected));
        }

        sqlx::query("DELETE FROM order_payments WHERE order_id = ?1")
            .bind(&next.id)
            .execute(&mut *tx)
            .await?;
        write_payments(&mut tx, &next).await?;
        tx.commit().await?;

        debug!(
            order_no = %next.order_no,
            version = next.version,
            status = %next.status,
            payment_status = %next.payment_status,
            "Order updated"
        );
        *order = next;
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn write_payments(tx: &mut Transaction<'_, Sqlite>, order: &Order) -> DbResult<()> {
    for payment in &order.payments {
        sqlx::query(
            r#"
            INSERT INTO order_payments (
                seq_no, order_id, order_no, channel, gateway,
                external_ref, amount_cents, state, opened_at_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&payment.seq_no)
        .bind(&order.id)
        .bind(&order.order_no)
        .bind(payment.channel)
        .bind(payment.gateway)
        .bind(&payment.external_ref)
        .bind(payment.amount.cents())
        .bind(payment.state)
        .bind(payment.created_at.timestamp_millis())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn map_order(row: &SqliteRow) -> DbResult<Order> {
    let body: String = row.try_get("body")?;
    let version: i64 = row.try_get("version")?;
    let mut order: Order = serde_json::from_str(&body)?;
    order.version = version;
    Ok(order)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use bistro_core::order::ScanAttempt;
    use bistro_core::{
        ErrorKind, ItemDraft, NewOrder, OperatorContext, OrderStatus, PayState, TaxRate,
    };
    use chrono::{Duration, NaiveDate};

    fn op() -> OperatorContext {
        OperatorContext {
            operator_id: "u-1".to_string(),
            operator_name: "Mei".to_string(),
            merchant_id: "m-1".to_string(),
            store_id: "store1".to_string(),
            terminal_id: "t-1".to_string(),
        }
    }

    fn order(no: &str, table: Option<&str>) -> Order {
        Order::open(
            NewOrder {
                order_no: no.to_string(),
                merchant_id: "m-1".to_string(),
                store_id: "store1".to_string(),
                business_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
                shift_id: None,
                table_id: table.map(str::to_string),
                people: 2,
                items: vec![ItemDraft {
                    product_id: "p-noodles".to_string(),
                    name: "Beef Noodles".to_string(),
                    quantity: 2,
                    unit_price: Money::from_cents(2450),
                    tax_rate: TaxRate::zero(),
                    discount: Money::zero(),
                    remark: None,
                    selections: vec![],
                }],
                tax_rates: vec![],
                fees: vec![],
            },
            &op(),
        )
        .unwrap()
    }

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = db().await;
        let repo = db.orders();
        let order = order("S00120240315000001", Some("T1"));
        repo.insert(&order).await.unwrap();

        let loaded = repo.get_by_no(&order.order_no).await.unwrap().unwrap();
        assert_eq!(loaded, order);
        assert_eq!(repo.get_by_id(&order.id).await.unwrap().unwrap().order_no, order.order_no);
        assert!(repo.get_by_no("missing").await.unwrap().is_none());
        assert_eq!(
            repo.active_order_for_table("T1").await.unwrap().as_deref(),
            Some("S00120240315000001")
        );
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_detects_stale() {
        let db = db().await;
        let repo = db.orders();
        let original = order("S00120240315000001", None);
        repo.insert(&original).await.unwrap();

        let mut first = original.clone();
        let mut second = original.clone();

        first.settle_cash("P1", Money::from_cents(5000), &op()).unwrap();
        repo.update(&mut first).await.unwrap();
        assert_eq!(first.version, 2);

        second.cancel(None, &op()).unwrap();
        let err = repo.update(&mut second).await.unwrap_err();
        assert!(err.is_stale());
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let stored = repo.get_by_no(&original.order_no).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_one_placed_order_per_table() {
        let db = db().await;
        let repo = db.orders();
        let mut first = order("S00120240315000001", Some("T1"));
        repo.insert(&first).await.unwrap();

        let err = repo
            .insert(&order("S00120240315000002", Some("T1")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(repo.get_by_no("S00120240315000002").await.unwrap().is_none());

        // Completing the first order frees the table
        first.settle_cash("P1", Money::from_cents(4900), &op()).unwrap();
        repo.update(&mut first).await.unwrap();
        assert!(repo.active_order_for_table("T1").await.unwrap().is_none());
        repo.insert(&order("S00120240315000002", Some("T1"))).await.unwrap();
    }

    #[tokio::test]
    async fn test_seq_no_lookup_and_pending_sweep_listing() {
        let db = db().await;
        let repo = db.orders();
        let mut order = order("S00120240315000001", None);
        repo.insert(&order).await.unwrap();

        order
            .open_scan_payment(
                ScanAttempt {
                    seq_no: "S0012024031500000001".to_string(),
                    gateway: GatewayKind::Generic,
                    amount: Money::from_cents(4900),
                    client_ip: None,
                },
                &op(),
            )
            .unwrap();
        repo.update(&mut order).await.unwrap();

        let found = repo
            .find_by_seq_no("S0012024031500000001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.order_no, order.order_no);
        assert_eq!(found.pending_scan().unwrap().state, PayState::Pending);

        let later = Utc::now() + Duration::seconds(60);
        let stale = repo.list_stale_pending_scans(later, 10).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].gateway, Some(GatewayKind::Generic));
        assert_eq!(stale[0].amount.cents(), 4900);

        let earlier = Utc::now() - Duration::seconds(60);
        assert!(repo.list_stale_pending_scans(earlier, 10).await.unwrap().is_empty());
    }
}
