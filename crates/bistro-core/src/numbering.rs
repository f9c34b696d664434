//! # Business Date & Document Numbers
//!
//! A restaurant's trading day does not end at midnight: orders rung up at
//! 01:30 after a late service still belong to the previous day. Every
//! document number embeds that business date.
//!
//! ```text
//!   order no     S001 20240315 000042          scope  OD:{store_id}:20240315
//!   payment seq  S001 20240315 00000007        scope  PAY:{store_id}:20240315
//!   refund no    S001 20240315 000003          scope  RF:{store_id}
//! ```
//!
//! Order and payment scopes embed the date, so their counters restart each
//! business day. The refund scope does not: refund numbers keep counting
//! across days and the date in the number is only informational.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};

/// Width of the order number counter.
pub const ORDER_SEQ_WIDTH: usize = 6;
/// Width of the payment sequence counter.
pub const PAYMENT_SEQ_WIDTH: usize = 8;
/// Width of the refund number counter.
pub const REFUND_SEQ_WIDTH: usize = 6;

/// Business date of `now` in a store at `offset`, where the trading day
/// rolls over at `cutoff_hour` local time.
///
/// Before the cutoff we are still in the previous business day.
///
/// ## Example
/// ```rust
/// use bistro_core::numbering::business_date;
/// use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};
///
/// let utc = FixedOffset::east_opt(0).unwrap();
/// let late = Utc.with_ymd_and_hms(2024, 3, 16, 1, 30, 0).unwrap();
/// assert_eq!(
///     business_date(late, utc, 4),
///     NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
/// );
/// ```
pub fn business_date(now: DateTime<Utc>, offset: FixedOffset, cutoff_hour: u32) -> NaiveDate {
    let local = now.with_timezone(&offset);
    // cutoff_hour is validated to 0..=23 by config; clamp anyway
    let shifted = local - Duration::hours(i64::from(cutoff_hour.min(23)));
    shifted.date_naive()
}

/// `yyyymmdd` rendering used inside numbers and scopes.
pub fn compact_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Sequence scope for order numbers: one counter per store per day.
pub fn order_scope(store_id: &str, date: NaiveDate) -> String {
    format!("OD:{}:{}", store_id, compact_date(date))
}

/// Sequence scope for payment sequence numbers: one counter per store per day.
pub fn payment_scope(store_id: &str, date: NaiveDate) -> String {
    format!("PAY:{}:{}", store_id, compact_date(date))
}

/// Sequence scope for refund numbers: one counter per store.
pub fn refund_scope(store_id: &str) -> String {
    format!("RF:{}", store_id)
}

/// `{store_code}{yyyymmdd}{seq zero-padded to width}`.
pub fn document_no(store_code: &str, date: NaiveDate, seq: i64, width: usize) -> String {
    format!("{}{}{:0width$}", store_code, compact_date(date), seq, width = width)
}

pub fn order_no(store_code: &str, date: NaiveDate, seq: i64) -> String {
    document_no(store_code, date, seq, ORDER_SEQ_WIDTH)
}

pub fn payment_seq_no(store_code: &str, date: NaiveDate, seq: i64) -> String {
    document_no(store_code, date, seq, PAYMENT_SEQ_WIDTH)
}

pub fn refund_no(store_code: &str, date: NaiveDate, seq: i64) -> String {
    document_no(store_code, date, seq, REFUND_SEQ_WIDTH)
}
