//! Loan (borrow) model and the fine / renewal state machine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, FromRow, Postgres};
use utoipa::{IntoParams, ToSchema};

use crate::{config::LoanPolicy, error::LedgerError};

use super::user::BorrowerType;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Loan status, derived from the dates by [`Loan::refresh_status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Borrowed,
    Overdue,
    Returned,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Borrowed => "borrowed",
            LoanStatus::Overdue => "overdue",
            LoanStatus::Returned => "returned",
        }
    }

    /// Borrowed or overdue
    pub fn is_active(&self) -> bool {
        !matches!(self, LoanStatus::Returned)
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "borrowed" => Ok(LoanStatus::Borrowed),
            "overdue" => Ok(LoanStatus::Overdue),
            "returned" => Ok(LoanStatus::Returned),
            _ => Err(format!("Invalid loan status: {}", s)),
        }
    }
}

// SQLx conversion for LoanStatus
impl sqlx::Type<Postgres> for LoanStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for LoanStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s: String = Decode::<Postgres>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl Encode<'_, Postgres> for LoanStatus {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
        <&str as Encode<Postgres>>::encode(self.as_str(), buf)
    }
}

/// Fine attached to a loan.
///
/// `total_amount` is always `amount + late_fee_amount`. Once
/// `late_fee_applied` is set the late fee is locked in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Fine {
    /// Base overdue fine (days overdue times the daily rate)
    pub amount: Decimal,
    pub late_fee_amount: Decimal,
    pub total_amount: Decimal,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub late_fee_applied: bool,
}

impl Fine {
    /// Nothing owed, or whatever was owed has been paid
    pub fn is_settled(&self) -> bool {
        self.total_amount.is_zero() || self.is_paid
    }
}

/// One borrowing transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Loan {
    pub id: i32,
    pub book_id: i32,
    pub borrower_id: i32,
    pub borrower_type: BorrowerType,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub status: LoanStatus,
    pub fine: Fine,
    pub renewal_count: i16,
    pub issued_by: i32,
    /// Optimistic concurrency counter, bumped on every write
    #[serde(skip)]
    pub version: i32,
}

/// Flat loan row as stored in the `loans` table
#[derive(Debug, FromRow)]
pub struct LoanRow {
    pub id: i32,
    pub book_id: i32,
    pub borrower_id: i32,
    pub borrower_type: BorrowerType,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub status: LoanStatus,
    pub fine_amount: Decimal,
    pub late_fee_amount: Decimal,
    pub fine_total: Decimal,
    pub fine_paid: bool,
    pub fine_paid_at: Option<DateTime<Utc>>,
    pub late_fee_applied: bool,
    pub renewal_count: i16,
    pub issued_by: i32,
    pub version: i32,
}

impl From<LoanRow> for Loan {
    fn from(row: LoanRow) -> Self {
        Self {
            id: row.id,
            book_id: row.book_id,
            borrower_id: row.borrower_id,
            borrower_type: row.borrower_type,
            borrow_date: row.borrow_date,
            due_date: row.due_date,
            return_date: row.return_date,
            status: row.status,
            fine: Fine {
                amount: row.fine_amount,
                late_fee_amount: row.late_fee_amount,
                total_amount: row.fine_total,
                is_paid: row.fine_paid,
                paid_at: row.fine_paid_at,
                late_fee_applied: row.late_fee_applied,
            },
            renewal_count: row.renewal_count,
            issued_by: row.issued_by,
            version: row.version,
        }
    }
}

/// A loan about to be created
#[derive(Debug, Clone, PartialEq)]
pub struct NewLoan {
    pub book_id: i32,
    pub borrower_id: i32,
    pub borrower_type: BorrowerType,
    pub issued_by: i32,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
}

impl NewLoan {
    pub fn new(
        book_id: i32,
        borrower_id: i32,
        borrower_type: BorrowerType,
        issued_by: i32,
        now: DateTime<Utc>,
        policy: &LoanPolicy,
    ) -> Self {
        Self {
            book_id,
            borrower_id,
            borrower_type,
            issued_by,
            borrow_date: now,
            due_date: now + policy.loan_period(borrower_type),
        }
    }

    /// The stored loan once an id has been assigned
    pub fn into_loan(self, id: i32) -> Loan {
        Loan {
            id,
            book_id: self.book_id,
            borrower_id: self.borrower_id,
            borrower_type: self.borrower_type,
            borrow_date: self.borrow_date,
            due_date: self.due_date,
            return_date: None,
            status: LoanStatus::Borrowed,
            fine: Fine::default(),
            renewal_count: 0,
            issued_by: self.issued_by,
            version: 0,
        }
    }
}

/// Loan listing filter
#[derive(Debug, Clone, Default, PartialEq, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct LoanFilter {
    pub borrower_id: Option<i32>,
    pub book_id: Option<i32>,
    pub status: Option<LoanStatus>,
    /// Include returned loans (default: active loans only)
    pub include_returned: Option<bool>,
}

impl LoanFilter {
    pub fn matches(&self, loan: &Loan) -> bool {
        if !self.include_returned.unwrap_or(false)
            && !loan.status.is_active()
            && self.status != Some(LoanStatus::Returned)
        {
            return false;
        }
        self.borrower_id.map_or(true, |id| loan.borrower_id == id)
            && self.book_id.map_or(true, |id| loan.book_id == id)
            && self.status.map_or(true, |s| loan.status == s)
    }
}

/// Started days between `due` and `now`, at least one.
///
/// Only meaningful when `now > due`.
pub fn overdue_days(due: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let late_ms = (now - due).num_milliseconds();
    ((late_ms + MS_PER_DAY - 1) / MS_PER_DAY).max(1)
}

impl Loan {
    pub fn is_returned(&self) -> bool {
        self.return_date.is_some() || self.status == LoanStatus::Returned
    }

    /// Recompute the fine for `now` and return the total owed.
    ///
    /// Returned loans and loans not yet due are left untouched and report
    /// zero. The late fee is computed once, the first time the loan is
    /// seen more than `late_fee_grace_days` overdue, and never again.
    /// `amount` never drops below what was already assessed, so a renewal
    /// that moves the due date keeps the earlier fine.
    pub fn compute_fine(&mut self, now: DateTime<Utc>, policy: &LoanPolicy) -> Decimal {
        if self.is_returned() || now <= self.due_date {
            return Decimal::ZERO;
        }

        let overdue_days = overdue_days(self.due_date, now);
        let rate = policy.for_borrower(self.borrower_type).daily_fine;
        let base_fine = Decimal::from(overdue_days) * rate;

        let fine_overdue_days = overdue_days - policy.late_fee_grace_days;
        if fine_overdue_days > 0 && !self.fine.late_fee_applied {
            self.fine.late_fee_amount =
                (Decimal::from(fine_overdue_days) * policy.late_fee_per_day).min(policy.late_fee_cap);
            self.fine.late_fee_applied = true;
        }

        self.fine.amount = base_fine.max(self.fine.amount);
        self.fine.total_amount = self.fine.amount + self.fine.late_fee_amount;
        self.fine.total_amount
    }

    /// Bring `status` (and the fine, when overdue) in line with `now`.
    /// Run before every write of an open loan.
    pub fn refresh_status(&mut self, now: DateTime<Utc>, policy: &LoanPolicy) {
        if self.return_date.is_some() {
            self.status = LoanStatus::Returned;
        } else if now > self.due_date {
            self.status = LoanStatus::Overdue;
            self.compute_fine(now, policy);
        } else {
            self.status = LoanStatus::Borrowed;
        }
    }

    pub fn ensure_open(&self) -> Result<(), LedgerError> {
        if self.is_returned() {
            Err(LedgerError::AlreadyReturned { loan_id: self.id })
        } else {
            Ok(())
        }
    }

    /// Finalize the fine and close the loan
    pub fn close(&mut self, now: DateTime<Utc>, policy: &LoanPolicy) -> Result<(), LedgerError> {
        self.ensure_open()?;
        self.compute_fine(now, policy);
        self.return_date = Some(now);
        self.status = LoanStatus::Returned;
        Ok(())
    }

    /// Extend the due date by one loan period, counted from the current
    /// due date. Returns the new due date.
    pub fn renew(&mut self, policy: &LoanPolicy) -> Result<DateTime<Utc>, LedgerError> {
        self.ensure_open()?;
        if self.renewal_count >= policy.max_renewals {
            return Err(LedgerError::RenewalLimitExceeded {
                loan_id: self.id,
                max: policy.max_renewals,
            });
        }
        if !self.fine.is_settled() {
            return Err(LedgerError::OutstandingFine {
                loan_id: self.id,
                amount: self.fine.total_amount,
            });
        }

        self.due_date += policy.loan_period(self.borrower_type);
        self.renewal_count += 1;
        self.status = LoanStatus::Borrowed;
        Ok(self.due_date)
    }

    /// Settle the fine as of `now`. Returns the amount paid.
    pub fn pay_fine(&mut self, now: DateTime<Utc>, policy: &LoanPolicy) -> Result<Decimal, LedgerError> {
        if self.fine.is_paid {
            return Err(LedgerError::AlreadyPaid { loan_id: self.id });
        }
        self.compute_fine(now, policy);
        if self.fine.total_amount.is_zero() {
            return Err(LedgerError::NothingToPay { loan_id: self.id });
        }
        self.fine.is_paid = true;
        self.fine.paid_at = Some(now);
        Ok(self.fine.total_amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 2, 10, 0, 0).unwrap() + Duration::days(n)
    }

    fn loan(borrower_type: BorrowerType) -> Loan {
        NewLoan::new(1, 42, borrower_type, 7, day(0), &LoanPolicy::default()).into_loan(1)
    }

    fn dec(n: i64) -> Decimal {
        Decimal::from(n)
    }

    #[test]
    fn new_loan_due_after_role_period() {
        let policy = LoanPolicy::default();
        assert_eq!(loan(BorrowerType::Student).due_date, day(7));
        assert_eq!(loan(BorrowerType::Faculty).due_date, day(14));
        let l = NewLoan::new(1, 2, BorrowerType::Student, 3, day(0), &policy).into_loan(5);
        assert_eq!(l.status, LoanStatus::Borrowed);
        assert_eq!(l.fine, Fine::default());
        assert_eq!(l.renewal_count, 0);
    }

    #[test]
    fn overdue_days_round_partial_days_up() {
        assert_eq!(overdue_days(day(0), day(0) + Duration::seconds(1)), 1);
        assert_eq!(overdue_days(day(0), day(1)), 1);
        assert_eq!(overdue_days(day(0), day(1) + Duration::minutes(1)), 2);
        assert_eq!(overdue_days(day(0), day(0) + Duration::nanoseconds(10)), 1);
    }

    #[test]
    fn no_fine_until_due() {
        let policy = LoanPolicy::default();
        let mut l = loan(BorrowerType::Student);
        assert_eq!(l.compute_fine(day(7), &policy), Decimal::ZERO);
        assert_eq!(l.fine, Fine::default());
        l.refresh_status(day(7), &policy);
        assert_eq!(l.status, LoanStatus::Borrowed);
    }

    #[test]
    fn student_three_days_overdue() {
        let policy = LoanPolicy::default();
        let mut l = loan(BorrowerType::Student);
        assert_eq!(l.compute_fine(day(10), &policy), dec(6));
        assert_eq!(l.fine.amount, dec(6));
        assert_eq!(l.fine.late_fee_amount, Decimal::ZERO);
        assert_eq!(l.fine.total_amount, dec(6));
        assert!(!l.fine.late_fee_applied);
    }

    #[test]
    fn student_late_fee_after_grace_period() {
        let policy = LoanPolicy::default();
        let mut l = loan(BorrowerType::Student);
        l.compute_fine(day(10), &policy);
        assert_eq!(l.compute_fine(day(20), &policy), dec(86));
        assert_eq!(l.fine.amount, dec(26));
        assert_eq!(l.fine.late_fee_amount, dec(60));
        assert_eq!(l.fine.total_amount, dec(86));
        assert!(l.fine.late_fee_applied);
    }

    #[test]
    fn faculty_two_days_overdue_has_no_late_fee() {
        let policy = LoanPolicy::default();
        let mut l = loan(BorrowerType::Faculty);
        assert_eq!(l.compute_fine(day(16), &policy), dec(10));
        assert_eq!(l.fine.late_fee_amount, Decimal::ZERO);
        assert!(!l.fine.late_fee_applied);
    }

    #[test]
    fn late_fee_is_locked_in_at_first_computation() {
        let policy = LoanPolicy::default();
        let mut l = loan(BorrowerType::Student);
        // 8 days overdue: one day past the grace period
        l.compute_fine(day(15), &policy);
        assert_eq!(l.fine.late_fee_amount, dec(10));

        l.compute_fine(day(15) + Duration::hours(3), &policy);
        assert_eq!(l.fine.late_fee_amount, dec(10));

        // 30 days overdue would be 230 uncapped; stays at the locked value
        assert_eq!(l.compute_fine(day(37), &policy), dec(60 + 10));
        assert_eq!(l.fine.late_fee_amount, dec(10));
    }

    #[test]
    fn late_fee_is_capped() {
        let policy = LoanPolicy::default();
        let mut l = loan(BorrowerType::Student);
        // first seen 30 days overdue: 23 days past grace, 230 capped to 100
        assert_eq!(l.compute_fine(day(37), &policy), dec(60 + 100));
        assert_eq!(l.fine.late_fee_amount, dec(100));
    }

    #[test]
    fn fine_never_decreases_while_open() {
        let policy = LoanPolicy::default();
        for borrower_type in [BorrowerType::Student, BorrowerType::Faculty] {
            let mut l = loan(borrower_type);
            let mut previous = Decimal::ZERO;
            for hours in (0..24 * 60).step_by(5) {
                let now = day(0) + Duration::hours(hours);
                let total = l.compute_fine(now, &policy);
                assert!(total >= previous, "fine dropped at hour {}", hours);
                assert_eq!(l.fine.total_amount, l.fine.amount + l.fine.late_fee_amount);
                previous = total;
            }
        }
    }

    #[test]
    fn refresh_status_follows_dates() {
        let policy = LoanPolicy::default();
        let mut l = loan(BorrowerType::Student);
        l.refresh_status(day(3), &policy);
        assert_eq!(l.status, LoanStatus::Borrowed);

        l.refresh_status(day(9), &policy);
        assert_eq!(l.status, LoanStatus::Overdue);
        assert_eq!(l.fine.total_amount, dec(4));

        l.return_date = Some(day(9));
        l.refresh_status(day(30), &policy);
        assert_eq!(l.status, LoanStatus::Returned);
        assert_eq!(l.fine.total_amount, dec(4));
    }

    #[test]
    fn close_finalizes_fine_and_is_terminal() {
        let policy = LoanPolicy::default();
        let mut l = loan(BorrowerType::Student);
        l.close(day(10), &policy).unwrap();
        assert_eq!(l.status, LoanStatus::Returned);
        assert_eq!(l.return_date, Some(day(10)));
        assert_eq!(l.fine.total_amount, dec(6));

        let snapshot = l.clone();
        assert_eq!(l.compute_fine(day(40), &policy), Decimal::ZERO);
        assert_eq!(
            l.close(day(41), &policy),
            Err(LedgerError::AlreadyReturned { loan_id: 1 })
        );
        assert_eq!(l.renew(&policy), Err(LedgerError::AlreadyReturned { loan_id: 1 }));
        l.refresh_status(day(42), &policy);
        assert_eq!(l, snapshot);
    }

    #[test]
    fn renewal_blocked_by_unpaid_fine_until_paid() {
        let policy = LoanPolicy::default();
        let mut l = loan(BorrowerType::Student);
        l.compute_fine(day(10), &policy);
        l.compute_fine(day(20), &policy);
        assert_eq!(l.fine.total_amount, dec(86));

        assert_eq!(
            l.renew(&policy),
            Err(LedgerError::OutstandingFine { loan_id: 1, amount: dec(86) })
        );
        assert_eq!(l.renewal_count, 0);

        assert_eq!(l.pay_fine(day(20), &policy).unwrap(), dec(86));
        assert!(l.fine.is_paid);
        assert_eq!(l.fine.paid_at, Some(day(20)));

        let old_due = l.due_date;
        assert_eq!(l.renew(&policy).unwrap(), old_due + Duration::days(7));
        assert_eq!(l.renewal_count, 1);
        assert_eq!(l.status, LoanStatus::Borrowed);
        // the assessed fine is kept
        assert_eq!(l.fine.total_amount, dec(86));
    }

    #[test]
    fn renewal_past_new_due_date_keeps_assessed_fine() {
        let policy = LoanPolicy::default();
        let mut l = loan(BorrowerType::Student);
        l.refresh_status(day(20), &policy);
        l.pay_fine(day(20), &policy).unwrap();
        l.renew(&policy).unwrap();
        assert_eq!(l.due_date, day(14));

        // six days past the new due date would only be 12 on its own
        l.refresh_status(day(20), &policy);
        assert_eq!(l.status, LoanStatus::Overdue);
        assert_eq!(l.fine.amount, dec(26));
        assert_eq!(l.fine.total_amount, dec(86));

        l.refresh_status(day(30), &policy);
        assert_eq!(l.fine.amount, dec(32));
        assert_eq!(l.fine.late_fee_amount, dec(60));
        assert_eq!(l.fine.total_amount, dec(92));
    }

    #[test]
    fn early_renewal_keeps_remaining_time() {
        let policy = LoanPolicy::default();
        let mut l = loan(BorrowerType::Faculty);
        assert_eq!(l.renew(&policy).unwrap(), day(28));
    }

    #[test]
    fn third_renewal_is_rejected() {
        let policy = LoanPolicy::default();
        let mut l = loan(BorrowerType::Student);
        l.renew(&policy).unwrap();
        l.renew(&policy).unwrap();
        assert_eq!(
            l.renew(&policy),
            Err(LedgerError::RenewalLimitExceeded { loan_id: 1, max: 2 })
        );
        assert_eq!(l.renewal_count, 2);
        assert_eq!(l.due_date, day(21));

        // still rejected with an unpaid fine on top
        l.compute_fine(day(25), &policy);
        assert!(matches!(
            l.renew(&policy),
            Err(LedgerError::RenewalLimitExceeded { .. })
        ));
    }

    #[test]
    fn paying_twice_or_paying_nothing_is_rejected() {
        let policy = LoanPolicy::default();
        let mut l = loan(BorrowerType::Student);
        assert_eq!(
            l.pay_fine(day(2), &policy),
            Err(LedgerError::NothingToPay { loan_id: 1 })
        );
        assert!(!l.fine.is_paid);

        // the fine grows between the last touch and the payment
        l.compute_fine(day(8), &policy);
        assert_eq!(l.pay_fine(day(9), &policy).unwrap(), dec(4));
        assert_eq!(
            l.pay_fine(day(10), &policy),
            Err(LedgerError::AlreadyPaid { loan_id: 1 })
        );
        assert_eq!(l.status, LoanStatus::Borrowed);
        assert_eq!(l.due_date, day(7));
    }

    #[test]
    fn policy_rates_are_configurable() {
        let mut policy = LoanPolicy::default();
        policy.student.daily_fine = Decimal::new(150, 2);
        policy.late_fee_grace_days = 2;
        policy.late_fee_cap = dec(5);
        let mut l = loan(BorrowerType::Student);
        // 4 days overdue: 4 * 1.50 + min(2 * 10, 5)
        assert_eq!(l.compute_fine(day(11), &policy), Decimal::new(1100, 2));
    }

    #[test]
    fn filter_defaults_to_active_loans() {
        let policy = LoanPolicy::default();
        let mut l = loan(BorrowerType::Student);
        let filter = LoanFilter::default();
        assert!(filter.matches(&l));
        l.close(day(1), &policy).unwrap();
        assert!(!filter.matches(&l));
        assert!(LoanFilter {
            status: Some(LoanStatus::Returned),
            ..Default::default()
        }
        .matches(&l));
        assert!(!LoanFilter {
            borrower_id: Some(1),
            include_returned: Some(true),
            ..Default::default()
        }
        .matches(&l));
    }
}
