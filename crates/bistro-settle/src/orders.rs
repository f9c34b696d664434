//! # Order Mutation Service
//!
//! Opens orders and applies every edit a cashier can make before payment.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create_order                                                           │
//! │    store ◄── Catalog          table ◄── Catalog (same store, free)      │
//! │    lines ◄── Catalog products (known, active, same store)               │
//! │    order_no ◄── SequenceGenerator "OD:{store}:{date}"                   │
//! │    Order::open ──► OrderRepository::insert                              │
//! │                                                                         │
//! │  append / modify price / remove / turn table / discount / cancel        │
//! │    load ──► Order::<mutation> ──► update WHERE version = v              │
//! │                                   0 rows ──► Conflict                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A losing concurrent writer gets `Conflict` ("modified concurrently") and
//! is expected to reload and retry.

use std::sync::Arc;

use bistro_core::numbering;
use bistro_core::{
    CoreResult, DiscountSpec, ErrorKind, ItemDraft, ItemSelection, Money, NewOrder,
    OperatorContext, Order, OrderFee, OrderTaxRate, ValidationError,
};
use bistro_db::{Database, DbError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::Catalog;
use crate::config::BusinessSettings;
use crate::error::{SettleError, SettleResult};
use crate::sequence::SequenceGenerator;

// =============================================================================
// Requests
// =============================================================================

/// One line as the register sends it. Name, price and tax come from the
/// catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRequest {
    pub product_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub discount: Money,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub selections: Vec<ItemSelection>,
}

impl LineRequest {
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        LineRequest {
            product_id: product_id.into(),
            quantity,
            discount: Money::zero(),
            remark: None,
            selections: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub table_id: Option<String>,
    pub people: i64,
    #[serde(default)]
    pub shift_id: Option<String>,
    pub items: Vec<LineRequest>,
    #[serde(default)]
    pub tax_rates: Vec<OrderTaxRate>,
    #[serde(default)]
    pub fees: Vec<OrderFee>,
}

// =============================================================================
// Service
// =============================================================================

/// Order creation and pre-payment mutations.
#[derive(Clone)]
pub struct OrderService {
    db: Database,
    catalog: Arc<dyn Catalog>,
    sequences: Arc<dyn SequenceGenerator>,
    business: BusinessSettings,
}

impl OrderService {
    pub fn new(
        db: Database,
        catalog: Arc<dyn Catalog>,
        sequences: Arc<dyn SequenceGenerator>,
        business: BusinessSettings,
    ) -> Self {
        OrderService {
            db,
            catalog,
            sequences,
            business,
        }
    }

    /// Opens a PLACED, UNPAID order in the operator's store.
    ///
    /// ## Errors
    /// - `InvalidInput` for no items, bad quantities, `people < 1`, or an
    ///   unknown / foreign / inactive product
    /// - `NotFound` for an unknown store, or a table that is unknown or
    ///   belongs to another store
    /// - `Conflict` if another PLACED order holds the table
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        op: &OperatorContext,
    ) -> SettleResult<Order> {
        if request.items.is_empty() {
            return Err(ValidationError::Required {
                field: "items".to_string(),
            }
            .into());
        }

        let store = self.catalog.store(&op.store_id).await?;
        if let Some(table_id) = request.table_id.as_deref() {
            self.ensure_table_free(table_id, &store.id, None).await?;
        }
        let drafts = self.resolve_lines(&store.id, request.items).await?;

        let date = self.business.today();
        let seq = self
            .sequences
            .next(&numbering::order_scope(&store.id, date))
            .await?;
        let order_no = numbering::order_no(&store.code, date, seq);

        let order = Order::open(
            NewOrder {
                order_no,
                merchant_id: store.merchant_id.clone(),
                store_id: store.id.clone(),
                business_date: date,
                shift_id: request.shift_id,
                table_id: request.table_id.clone(),
                people: request.people,
                items: drafts,
                tax_rates: request.tax_rates,
                fees: request.fees,
            },
            op,
        )?;

        self.db
            .orders()
            .insert(&order)
            .await
            .map_err(|e| table_clash(e, request.table_id.as_deref()))?;

        info!(
            order_no = %order.order_no,
            table_id = ?order.table_id,
            total = %order.amount.total,
            operator = %op.operator_id,
            "Order created"
        );
        Ok(order)
    }

    pub async fn get_order(&self, order_no: &str) -> SettleResult<Order> {
        self.load(order_no).await
    }

    /// Adds lines, folding identical ones into existing lines.
    pub async fn append_items(
        &self,
        order_no: &str,
        lines: Vec<LineRequest>,
        op: &OperatorContext,
    ) -> SettleResult<Order> {
        let order = self.load(order_no).await?;
        let drafts = self.resolve_lines(&order.store_id, lines).await?;
        let order = self
            .write(order, |o| o.append_items(drafts, op))
            .await?;
        info!(%order_no, total = %order.amount.total, "Items appended");
        Ok(order)
    }

    pub async fn modify_item_price(
        &self,
        order_no: &str,
        item_id: &str,
        new_price: Money,
        op: &OperatorContext,
    ) -> SettleResult<Order> {
        let order = self.load(order_no).await?;
        let order = self
            .write(order, |o| o.modify_item_price(item_id, new_price, op))
            .await?;
        info!(%order_no, %item_id, %new_price, "Item price modified");
        Ok(order)
    }

    pub async fn remove_items(
        &self,
        order_no: &str,
        item_id: &str,
        quantity: i64,
        op: &OperatorContext,
    ) -> SettleResult<Order> {
        let order = self.load(order_no).await?;
        let order = self
            .write(order, |o| o.remove_items(item_id, quantity, op))
            .await?;
        info!(%order_no, %item_id, quantity, "Items removed");
        Ok(order)
    }

    /// Moves the order to `table_id` in the same store.
    pub async fn turn_table(
        &self,
        order_no: &str,
        table_id: &str,
        op: &OperatorContext,
    ) -> SettleResult<Order> {
        let order = self.load(order_no).await?;
        self.ensure_table_free(table_id, &order.store_id, Some(order_no))
            .await?;

        let from = order.table_id.clone();
        let order = self
            .write(order, |o| o.turn_table(table_id, op))
            .await
            .map_err(|e| match e {
                SettleError::Database(db) => table_clash(db, Some(table_id)),
                other => other,
            })?;
        info!(%order_no, from = ?from, to = %table_id, "Table turned");
        Ok(order)
    }

    pub async fn discount_order(
        &self,
        order_no: &str,
        spec: DiscountSpec,
        op: &OperatorContext,
    ) -> SettleResult<Order> {
        let order = self.load(order_no).await?;
        let order = self.write(order, |o| o.apply_discount(spec, op)).await?;
        info!(%order_no, discount = %order.amount.discount, total = %order.amount.total, "Order discounted");
        Ok(order)
    }

    /// Voids the order and frees its table.
    ///
    /// ## Errors
    /// `InvalidState` unless PLACED, while a scan attempt is open, or when
    /// money was taken and not fully refunded.
    pub async fn cancel_order(
        &self,
        order_no: &str,
        reason: Option<String>,
        op: &OperatorContext,
    ) -> SettleResult<Order> {
        let order = self.load(order_no).await?;
        let order = self.write(order, |o| o.cancel(reason, op)).await?;
        info!(%order_no, reason = ?order.cancel_reason, operator = %op.operator_id, "Order cancelled");
        Ok(order)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn load(&self, order_no: &str) -> SettleResult<Order> {
        self.db
            .orders()
            .get_by_no(order_no)
            .await?
            .ok_or_else(|| SettleError::not_found("Order", order_no))
    }

    /// Applies `f` and writes the result, version-checked.
    async fn write<F>(&self, mut order: Order, f: F) -> SettleResult<Order>
    where
        F: FnOnce(&mut Order) -> CoreResult<()>,
    {
        f(&mut order)?;
        self.db.orders().update(&mut order).await?;
        Ok(order)
    }

    /// `NotFound` unless the table exists in `store_id`; `Conflict` if a
    /// PLACED order other than `holder` sits at it.
    async fn ensure_table_free(
        &self,
        table_id: &str,
        store_id: &str,
        holder: Option<&str>,
    ) -> SettleResult<()> {
        let table = self.catalog.table(table_id).await?;
        if table.store_id != store_id {
            return Err(SettleError::not_found("Table", table_id));
        }

        if let Some(occupant) = self.db.orders().active_order_for_table(table_id).await? {
            if Some(occupant.as_str()) != holder {
                return Err(SettleError::TableOccupied {
                    table_id: table_id.to_string(),
                    order_no: occupant,
                });
            }
        }
        Ok(())
    }

    /// Turns register lines into drafts priced from the catalog.
    async fn resolve_lines(
        &self,
        store_id: &str,
        lines: Vec<LineRequest>,
    ) -> SettleResult<Vec<ItemDraft>> {
        let mut drafts = Vec::with_capacity(lines.len());
        for line in lines {
            let product = match self.catalog.product(&line.product_id).await {
                Ok(product) => product,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(invalid_product(&line.product_id, "unknown product"));
                }
                Err(e) => return Err(e),
            };
            if product.store_id != store_id {
                return Err(invalid_product(&line.product_id, "sold by another store"));
            }
            if !product.is_active {
                return Err(invalid_product(&line.product_id, "not on sale"));
            }

            drafts.push(ItemDraft {
                product_id: product.id.clone(),
                name: product.name.clone(),
                quantity: line.quantity,
                unit_price: product.price(),
                tax_rate: product.tax_rate(),
                discount: line.discount,
                remark: line.remark,
                selections: line.selections,
            });
        }
        Ok(drafts)
    }
}

fn invalid_product(product_id: &str, reason: &str) -> SettleError {
    ValidationError::InvalidFormat {
        field: format!("product_id {}", product_id),
        reason: reason.to_string(),
    }
    .into()
}

/// A unique-index hit on the table column means someone else took it.
fn table_clash(err: DbError, table_id: Option<&str>) -> SettleError {
    match (err, table_id) {
        (DbError::UniqueViolation { field, .. }, Some(table_id)) if field.contains("table") => {
            SettleError::TableOccupied {
                table_id: table_id.to_string(),
                order_no: "another order".to_string(),
            }
        }
        (err, _) => err.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cashier, seeded_db, FOREIGN_PRODUCT, NOODLES, TEA};
    use bistro_core::{OrderStatus, PaymentStatus};

    fn service(db: &Database) -> OrderService {
        OrderService::new(
            db.clone(),
            Arc::new(db.catalog()),
            Arc::new(db.sequences()),
            BusinessSettings::default(),
        )
    }

    fn request(table_id: Option<&str>, lines: Vec<LineRequest>) -> CreateOrderRequest {
        CreateOrderRequest {
            table_id: table_id.map(str::to_string),
            people: 2,
            shift_id: None,
            items: lines,
            tax_rates: vec![],
            fees: vec![],
        }
    }

    #[tokio::test]
    async fn test_create_order_prices_from_catalog() {
        let db = seeded_db().await;
        let orders = service(&db);

        let order = orders
            .create_order(
                request(Some("T1"), vec![LineRequest::new(NOODLES, 2), LineRequest::new(TEA, 1)]),
                &cashier(),
            )
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Placed);
        assert_eq!(order.payment_status, PaymentStatus::Unpaid);
        assert_eq!(order.amount.total.cents(), 2 * 2450 + 400);
        assert!(order.order_no.starts_with("S001"));
        assert!(order.order_no.ends_with("000001"));
        assert_eq!(order.order_no.len(), 4 + 8 + 6);

        let second = orders
            .create_order(request(None, vec![LineRequest::new(TEA, 1)]), &cashier())
            .await
            .unwrap();
        assert!(second.order_no.ends_with("000002"));

        assert_eq!(orders.get_order(&order.order_no).await.unwrap(), order);
    }

    #[tokio::test]
    async fn test_create_order_rejects_bad_input() {
        let db = seeded_db().await;
        let orders = service(&db);

        let empty = orders.create_order(request(None, vec![]), &cashier()).await;
        assert_eq!(empty.unwrap_err().kind(), ErrorKind::InvalidInput);

        let unknown = orders
            .create_order(request(None, vec![LineRequest::new("ghost", 1)]), &cashier())
            .await;
        assert_eq!(unknown.unwrap_err().kind(), ErrorKind::InvalidInput);

        let foreign = orders
            .create_order(request(None, vec![LineRequest::new(FOREIGN_PRODUCT, 1)]), &cashier())
            .await;
        assert_eq!(foreign.unwrap_err().kind(), ErrorKind::InvalidInput);

        let zero = orders
            .create_order(request(None, vec![LineRequest::new(NOODLES, 0)]), &cashier())
            .await;
        assert_eq!(zero.unwrap_err().kind(), ErrorKind::InvalidInput);

        let mut nobody = request(None, vec![LineRequest::new(NOODLES, 1)]);
        nobody.people = 0;
        let nobody = orders.create_order(nobody, &cashier()).await;
        assert_eq!(nobody.unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_table_rules() {
        let db = seeded_db().await;
        let orders = service(&db);
        let lines = || vec![LineRequest::new(NOODLES, 1)];

        let other_store = orders.create_order(request(Some("X1"), lines()), &cashier()).await;
        assert_eq!(other_store.unwrap_err().kind(), ErrorKind::NotFound);

        let missing = orders.create_order(request(Some("T9"), lines()), &cashier()).await;
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::NotFound);

        let first = orders
            .create_order(request(Some("T1"), lines()), &cashier())
            .await
            .unwrap();
        let taken = orders.create_order(request(Some("T1"), lines()), &cashier()).await;
        assert_eq!(taken.unwrap_err().kind(), ErrorKind::Conflict);

        let second = orders
            .create_order(request(Some("T2"), lines()), &cashier())
            .await
            .unwrap();
        let clash = orders.turn_table(&second.order_no, "T1", &cashier()).await;
        assert!(matches!(clash, Err(SettleError::TableOccupied { .. })));

        // T2 is still held by the second order
        let moved = orders
            .turn_table(&first.order_no, "T2", &cashier())
            .await;
        assert_eq!(moved.unwrap_err().kind(), ErrorKind::Conflict);
        orders.cancel_order(&second.order_no, None, &cashier()).await.unwrap();
        let moved = orders
            .turn_table(&first.order_no, "T2", &cashier())
            .await
            .unwrap();
        assert_eq!(moved.table_id.as_deref(), Some("T2"));
        assert_eq!(
            db.orders().active_order_for_table("T1").await.unwrap(),
            None
        );

        let cross = orders.turn_table(&first.order_no, "X1", &cashier()).await;
        assert_eq!(cross.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_item_mutations() {
        let db = seeded_db().await;
        let orders = service(&db);
        let order = orders
            .create_order(request(None, vec![LineRequest::new(NOODLES, 2)]), &cashier())
            .await
            .unwrap();
        let no = order.order_no.clone();

        let order = orders
            .append_items(&no, vec![LineRequest::new(NOODLES, 1), LineRequest::new(TEA, 2)], &cashier())
            .await
            .unwrap();
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.items[0].quantity, 3);
        assert_eq!(order.amount.total.cents(), 3 * 2450 + 2 * 400);

        let noodles = order.items[0].id.clone();
        let order = orders
            .modify_item_price(&no, &noodles, Money::from_cents(2000), &cashier())
            .await
            .unwrap();
        assert_eq!(order.items[0].original_price, Some(Money::from_cents(2450)));
        assert_eq!(order.amount.total.cents(), 3 * 2000 + 2 * 400);

        let missing = orders
            .modify_item_price(&no, "nope", Money::from_cents(100), &cashier())
            .await;
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::NotFound);

        let huge = orders
            .modify_item_price(&no, &noodles, Money::from_cents(i64::MAX / 2 + 1), &cashier())
            .await;
        assert_eq!(huge.unwrap_err().kind(), ErrorKind::InvalidInput);
        let unchanged = orders.get_order(&no).await.unwrap();
        assert_eq!(unchanged.amount.total.cents(), 3 * 2000 + 2 * 400);
        assert_eq!(unchanged.version, order.version);

        let too_many = orders.remove_items(&no, &noodles, 4, &cashier()).await;
        assert_eq!(too_many.unwrap_err().kind(), ErrorKind::InvalidInput);

        let order = orders.remove_items(&no, &noodles, 3, &cashier()).await.unwrap();
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.amount.total.cents(), 800);

        let order = orders
            .discount_order(&no, DiscountSpec::Percentage(5000), &cashier())
            .await
            .unwrap();
        assert_eq!(order.amount.total.cents(), 400);

        let too_big = orders
            .discount_order(&no, DiscountSpec::Amount(Money::from_cents(900)), &cashier())
            .await;
        assert_eq!(too_big.unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_closed_orders_reject_mutations() {
        let db = seeded_db().await;
        let orders = service(&db);
        let order = orders
            .create_order(request(None, vec![LineRequest::new(TEA, 1)]), &cashier())
            .await
            .unwrap();
        let no = order.order_no.clone();
        orders.cancel_order(&no, Some("walked out".into()), &cashier()).await.unwrap();

        let before = orders.get_order(&no).await.unwrap();
        let append = orders.append_items(&no, vec![LineRequest::new(TEA, 1)], &cashier()).await;
        assert_eq!(append.unwrap_err().kind(), ErrorKind::InvalidState);
        let remove = orders.remove_items(&no, &order.items[0].id, 1, &cashier()).await;
        assert_eq!(remove.unwrap_err().kind(), ErrorKind::InvalidState);
        let price = orders
            .modify_item_price(&no, &order.items[0].id, Money::from_cents(1), &cashier())
            .await;
        assert_eq!(price.unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(orders.get_order(&no).await.unwrap(), before);

        assert_eq!(
            orders.get_order("nope").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_stale_write_is_conflict() {
        let db = seeded_db().await;
        let orders = service(&db);
        let order = orders
            .create_order(request(None, vec![LineRequest::new(TEA, 1)]), &cashier())
            .await
            .unwrap();

        // Someone else writes first; our copy is now stale
        let mut theirs = order.clone();
        db.orders().update(&mut theirs).await.unwrap();

        let err = orders
            .write(order, |o| o.apply_discount(DiscountSpec::Percentage(1000), &cashier()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("modified concurrently"));
    }
}
