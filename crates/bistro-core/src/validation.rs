//! # Validation Module
//!
//! Input validation for everything that reaches an aggregate.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Service (bistro-settle)                                      │
//! │  ├── Catalog resolution (product/table exists, same store)             │
//! │  └── Callback URL parsing                                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Quantities, prices, rates, remarks                                │
//! │  └── Pagination bounds                                                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── UNIQUE order_no / refund_no / seq_no                              │
//! │  └── Partial UNIQUE: one PLACED order per table                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::ItemDraft;
use crate::{FULL_BPS, MAX_ITEM_QUANTITY, MAX_PEOPLE, MAX_PRICE_CENTS, MAX_REMARK_CHARS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Largest page a list query may request.
pub const MAX_PAGE_SIZE: u32 = 100;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a required identifier (product id, table id, order no).
pub fn validate_required(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a free-text remark.
///
/// ## Rules
/// - Optional
/// - At most 200 characters (counted as chars, not bytes)
pub fn validate_remark(remark: Option<&str>) -> ValidationResult<()> {
    if let Some(remark) = remark {
        if remark.chars().count() > MAX_REMARK_CHARS {
            return Err(ValidationError::TooLong {
                field: "remark".to_string(),
                max: MAX_REMARK_CHARS,
            });
        }
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a quantity value.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (999)
///
/// ## Example
/// ```rust
/// use bistro_core::validation::validate_quantity;
///
/// assert!(validate_quantity(2).is_ok());
/// assert!(validate_quantity(0).is_err());
/// assert!(validate_quantity(1000).is_err());
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a guest count.
pub fn validate_people(people: i64) -> ValidationResult<()> {
    if !(1..=MAX_PEOPLE).contains(&people) {
        return Err(ValidationError::OutOfRange {
            field: "people".to_string(),
            min: 1,
            max: MAX_PEOPLE,
        });
    }
    Ok(())
}

/// Validates a price in cents. Zero is allowed (complimentary items).
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    validate_amount_cents("price", cents)
}

/// Validates a fixed amount (fee, discount, selection delta) against
/// `0..=MAX_PRICE_CENTS`.
pub fn validate_amount_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if !(0..=MAX_PRICE_CENTS).contains(&cents) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_PRICE_CENTS,
        });
    }

    Ok(())
}

/// Validates a rate in basis points (0% to 100%).
pub fn validate_bps(field: &str, bps: u32) -> ValidationResult<()> {
    if bps > FULL_BPS {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: FULL_BPS as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Composite Validators
// =============================================================================

/// Validates an item draft before it touches an order.
pub fn validate_item_draft(draft: &ItemDraft) -> ValidationResult<()> {
    validate_required("product_id", &draft.product_id)?;
    validate_quantity(draft.quantity)?;
    validate_price_cents(draft.unit_price.cents())?;
    validate_bps("tax_rate", draft.tax_rate.bps())?;
    validate_remark(draft.remark.as_deref())?;

    for selection in &draft.selections {
        validate_required("selection id", &selection.id)?;
        validate_amount_cents("selection price", selection.price_delta.cents())?;
    }

    if draft.discount.is_negative() {
        return Err(ValidationError::OutOfRange {
            field: "item discount".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }
    let unit_total =
        draft.unit_price + draft.selections.iter().map(|s| s.price_delta).sum::<Money>();
    validate_amount_cents("unit price", unit_total.cents())?;
    let line = unit_total.multiply_quantity(draft.quantity);
    if draft.discount > line {
        return Err(ValidationError::OutOfRange {
            field: "item discount".to_string(),
            min: 0,
            max: line.cents(),
        });
    }

    Ok(())
}

/// Validates pagination: page ≥ 1, 1 ≤ size ≤ 100.
pub fn validate_page(page: u32, size: u32) -> ValidationResult<()> {
    if page < 1 {
        return Err(ValidationError::MustBePositive {
            field: "page".to_string(),
        });
    }
    if !(1..=MAX_PAGE_SIZE).contains(&size) {
        return Err(ValidationError::OutOfRange {
            field: "page size".to_string(),
            min: 1,
            max: MAX_PAGE_SIZE as i64,
        });
    }
    Ok(())
}

/// Validates a UUID string format.
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    validate_required(field, id)?;

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemSelection, SelectionKind, TaxRate};

    fn draft() -> ItemDraft {
        ItemDraft {
            product_id: "p-1".to_string(),
            name: "Dumplings".to_string(),
            quantity: 2,
            unit_price: Money::from_cents(1200),
            tax_rate: TaxRate::from_bps(600),
            discount: Money::zero(),
            remark: None,
            selections: vec![],
        }
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(999).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(1000).is_err());
    }

    #[test]
    fn test_validate_remark_counts_chars() {
        assert!(validate_remark(None).is_ok());
        assert!(validate_remark(Some(&"辣".repeat(200))).is_ok());
        assert!(validate_remark(Some(&"a".repeat(201))).is_err());
    }

    #[test]
    fn test_validate_item_draft() {
        assert!(validate_item_draft(&draft()).is_ok());

        let mut d = draft();
        d.product_id = "  ".to_string();
        assert!(validate_item_draft(&d).is_err());

        let mut d = draft();
        d.discount = Money::from_cents(2401);
        assert!(validate_item_draft(&d).is_err());

        let mut d = draft();
        d.unit_price = Money::from_cents(-1);
        assert!(validate_item_draft(&d).is_err());
    }

    #[test]
    fn test_validate_amount_ceiling() {
        assert!(validate_price_cents(0).is_ok());
        assert!(validate_price_cents(MAX_PRICE_CENTS).is_ok());
        assert!(validate_price_cents(MAX_PRICE_CENTS + 1).is_err());
        assert!(validate_price_cents(i64::MAX).is_err());
        assert!(validate_amount_cents("fee", -1).is_err());

        let mut d = draft();
        d.unit_price = Money::from_cents(MAX_PRICE_CENTS);
        d.selections.push(ItemSelection {
            kind: SelectionKind::Recipe,
            id: "egg".to_string(),
            name: "Extra egg".to_string(),
            price_delta: Money::from_cents(1),
        });
        assert!(validate_item_draft(&d).is_err());

        let mut d = draft();
        d.selections.push(ItemSelection {
            kind: SelectionKind::Recipe,
            id: "egg".to_string(),
            name: "Extra egg".to_string(),
            price_delta: Money::from_cents(i64::MAX),
        });
        assert!(validate_item_draft(&d).is_err());
    }

    #[test]
    fn test_validate_page() {
        assert!(validate_page(1, 1).is_ok());
        assert!(validate_page(3, 100).is_ok());
        assert!(validate_page(0, 10).is_err());
        assert!(validate_page(1, 0).is_err());
        assert!(validate_page(1, 101).is_err());
    }

    #[test]
    fn test_validate_people_and_bps() {
        assert!(validate_people(1).is_ok());
        assert!(validate_people(0).is_err());
        assert!(validate_bps("discount", 10000).is_ok());
        assert!(validate_bps("discount", 10001).is_err());
    }
}
