//! # Refund Order Repository
//!
//! Persists refund orders (JSON body + filter columns) with the same
//! versioned-write discipline as orders, and answers the two questions
//! refund creation needs: which refunds already exist for an origin order,
//! and how many units of each origin item they hold.

use std::collections::HashMap;

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use bistro_core::refund::{Page, PageRequest, RefundFilter};
use bistro_core::RefundOrder;

/// Repository for refund order persistence.
#[derive(Debug, Clone)]
pub struct RefundRepository {
    pool: SqlitePool,
}

impl RefundRepository {
    pub fn new(pool: SqlitePool) -> Self {
        RefundRepository { pool }
    }

    /// Inserts a new refund order.
    ///
    /// ## Errors
    /// `UniqueViolation` if the refund number is already taken.
    pub async fn insert(&self, refund: &RefundOrder) -> DbResult<()> {
        debug!(
            refund_no = %refund.refund_no,
            origin_order_no = %refund.origin_order_no,
            "Inserting refund order"
        );

        let body = serde_json::to_string(refund)?;
        sqlx::query(
            r#"
            INSERT INTO refund_orders (
                id, refund_no, merchant_id, store_id, origin_order_id, origin_order_no,
                status, business_date, total_cents, version, body, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&refund.id)
        .bind(&refund.refund_no)
        .bind(&refund.merchant_id)
        .bind(&refund.store_id)
        .bind(&refund.origin_order_id)
        .bind(&refund.origin_order_no)
        .bind(refund.status)
        .bind(refund.business_date)
        .bind(refund.amount.total.cents())
        .bind(refund.version)
        .bind(&body)
        .bind(refund.created_at)
        .bind(refund.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                field,
                value: refund.refund_no.clone(),
            },
            other => other,
        })?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<RefundOrder>> {
        let row = sqlx::query("SELECT body, version FROM refund_orders WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| map_refund(&r)).transpose()
    }

    pub async fn exists_refund_no(&self, refund_no: &str) -> DbResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM refund_orders WHERE refund_no = ?1")
                .bind(refund_no)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    /// Versioned write; see [`crate::repository::order::OrderRepository::update`].
    pub async fn update(&self, refund: &mut RefundOrder) -> DbResult<()> {
        let expected = refund.version;
        let mut next = refund.clone();
        next.version = expected + 1;
        let body = serde_json::to_string(&next)?;

        let result = sqlx::query(
            r#"
            UPDATE refund_orders SET
                status = ?1,
                total_cents = ?2,
                version = ?3,
                body = ?4,
                updated_at = ?5
            WHERE id = ?6 AND version = ?7
            "#,
        )
        .bind(next.status)
        .bind(next.amount.total.cents())
        .bind(next.version)
        .bind(&body)
        .bind(next.updated_at)
        .bind(&next.id)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::stale("RefundOrder", refund.refund_no.clone(), expected));
        }

        debug!(refund_no = %next.refund_no, status = %next.status, version = next.version, "Refund order updated");
        *refund = next;
        Ok(())
    }

    /// All refund orders of one origin order, oldest first.
    pub async fn list_for_origin(&self, origin_order_id: &str) -> DbResult<Vec<RefundOrder>> {
        let rows = sqlx::query(
            r#"
            SELECT body, version FROM refund_orders
            WHERE origin_order_id = ?1
            ORDER BY created_at ASC
            "#,
        )
        .bind(origin_order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_refund).collect()
    }

    /// Units of each origin item held by refunds that are not rejected or
    /// cancelled.
    pub async fn refunded_quantities(&self, origin_order_id: &str) -> DbResult<HashMap<String, i64>> {
        let mut taken: HashMap<String, i64> = HashMap::new();
        for refund in self.list_for_origin(origin_order_id).await? {
            if !refund.status.holds_quantity() {
                continue;
            }
            for product in &refund.products {
                *taken.entry(product.origin_item_id.clone()).or_default() += product.refund_quantity;
            }
        }
        Ok(taken)
    }

    /// Filtered, newest-first page of refund orders plus the total count.
    pub async fn list(&self, filter: &RefundFilter, page: PageRequest) -> DbResult<Page<RefundOrder>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM refund_orders");
        push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Sqlite>::new("SELECT body, version FROM refund_orders");
        push_filter(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, refund_no DESC LIMIT ")
            .push_bind(i64::from(page.size))
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows = select.build().fetch_all(&self.pool).await?;
        let items = rows.iter().map(map_refund).collect::<DbResult<Vec<_>>>()?;

        Ok(Page {
            items,
            total,
            page: page.page,
            size: page.size,
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &RefundFilter) {
    let mut sep = " WHERE ";
    let mut clause = |qb: &mut QueryBuilder<'_, Sqlite>, column: &str| {
        qb.push(sep).push(column);
        sep = " AND ";
    };

    if let Some(merchant_id) = &filter.merchant_id {
        clause(qb, "merchant_id = ");
        qb.push_bind(merchant_id.clone());
    }
    if let Some(store_id) = &filter.store_id {
        clause(qb, "store_id = ");
        qb.push_bind(store_id.clone());
    }
    if let Some(origin) = &filter.origin_order_no {
        clause(qb, "origin_order_no = ");
        qb.push_bind(origin.clone());
    }
    if let Some(from) = filter.date_from {
        clause(qb, "business_date >= ");
        qb.push_bind(from);
    }
    if let Some(to) = filter.date_to {
        clause(qb, "business_date <= ");
        qb.push_bind(to);
    }
    if let Some(status) = filter.status {
        clause(qb, "status = ");
        qb.push_bind(status);
    }
}

fn map_refund(row: &SqliteRow) -> DbResult<RefundOrder> {
    let body: String = row.try_get("body")?;
    let version: i64 = row.try_get("version")?;
    let mut refund: RefundOrder = serde_json::from_str(&body)?;
    refund.version = version;
    Ok(refund)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use bistro_core::refund::{RefundOrderProduct, RefundStatus, RefundType};
    use bistro_core::{ErrorKind, Money, OperatorContext, RefundDraft};
    use chrono::NaiveDate;

    fn op() -> OperatorContext {
        OperatorContext {
            operator_id: "mgr-1".to_string(),
            operator_name: "Lin".to_string(),
            merchant_id: "m-1".to_string(),
            store_id: "store1".to_string(),
            terminal_id: "t-1".to_string(),
        }
    }

    fn refund(no: &str, day: u32, item: &str, qty: i64) -> RefundOrder {
        let product = RefundOrderProduct {
            origin_item_id: item.to_string(),
            product_id: "p-noodles".to_string(),
            name: "Beef Noodles".to_string(),
            origin_quantity: 2,
            origin_amount: Money::from_cents(4900),
            origin_discount: Money::zero(),
            origin_tax: Money::zero(),
            refund_quantity: qty,
            refund_amount: Money::from_cents(2450 * qty),
            refund_discount: Money::zero(),
            refund_tax: Money::zero(),
        };
        RefundOrder::create(
            RefundDraft {
                merchant_id: "m-1".to_string(),
                store_id: "store1".to_string(),
                store_code: "S001".to_string(),
                origin_order_id: "order-1".to_string(),
                origin_order_no: "S00120240315000001".to_string(),
                refund_type: RefundType::Partial,
                business_date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
                reason: None,
                remark: None,
                products: vec![product],
            },
            no.to_string(),
            &op(),
        )
        .unwrap()
    }

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_get_and_duplicate_number() {
        let db = db().await;
        let repo = db.refunds();
        let r = refund("S00120240315000001", 15, "item-1", 1);
        repo.insert(&r).await.unwrap();

        assert_eq!(repo.get(&r.id).await.unwrap().unwrap(), r);
        assert!(repo.exists_refund_no(&r.refund_no).await.unwrap());

        let clash = refund("S00120240315000001", 15, "item-1", 1);
        let err = repo.insert(&clash).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(repo.get(&clash.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_is_versioned() {
        let db = db().await;
        let repo = db.refunds();
        let original = refund("S00120240315000001", 15, "item-1", 1);
        repo.insert(&original).await.unwrap();

        let mut first = original.clone();
        first.cancel().unwrap();
        repo.update(&mut first).await.unwrap();
        assert_eq!(first.version, 2);

        let mut second = original.clone();
        second.cancel().unwrap();
        assert!(repo.update(&mut second).await.unwrap_err().is_stale());
    }

    #[tokio::test]
    async fn test_refunded_quantities_skip_cancelled() {
        let db = db().await;
        let repo = db.refunds();
        repo.insert(&refund("R1", 15, "item-1", 1)).await.unwrap();
        let mut cancelled = refund("R2", 15, "item-1", 1);
        repo.insert(&cancelled).await.unwrap();
        cancelled.cancel().unwrap();
        repo.update(&mut cancelled).await.unwrap();
        repo.insert(&refund("R3", 15, "item-2", 2)).await.unwrap();

        let taken = repo.refunded_quantities("order-1").await.unwrap();
        assert_eq!(taken.get("item-1"), Some(&1));
        assert_eq!(taken.get("item-2"), Some(&2));
    }

    #[tokio::test]
    async fn test_list_filters_and_pages() {
        let db = db().await;
        let repo = db.refunds();
        for (i, day) in [14u32, 15, 15, 16].iter().enumerate() {
            let r = refund(&format!("R{}", i + 1), *day, &format!("item-{}", i), 1);
            repo.insert(&r).await.unwrap();
        }

        let all = repo
            .list(&RefundFilter::default(), PageRequest { page: 1, size: 10 })
            .await
            .unwrap();
        assert_eq!(all.total, 4);
        assert_eq!(all.items.len(), 4);

        let filter = RefundFilter {
            store_id: Some("store1".to_string()),
            date_from: NaiveDate::from_ymd_opt(2024, 3, 15),
            date_to: NaiveDate::from_ymd_opt(2024, 3, 15),
            status: Some(RefundStatus::Pending),
            ..Default::default()
        };
        let page = repo.list(&filter, PageRequest { page: 1, size: 1 }).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);

        let page2 = repo.list(&filter, PageRequest { page: 2, size: 1 }).await.unwrap();
        assert_eq!(page2.items.len(), 1);
        assert_ne!(page.items[0].id, page2.items[0].id);

        let none = RefundFilter {
            status: Some(RefundStatus::Completed),
            ..Default::default()
        };
        assert_eq!(repo.list(&none, PageRequest::default()).await.unwrap().total, 0);
    }
}
