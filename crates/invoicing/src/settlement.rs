//! Invoice arithmetic: line totals, grand total, split payments and due.
//!
//! Everything here is a pure function over explicit inputs. Item totals are
//! always recomputed from quantity and unit price and never taken from the
//! caller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use shopledger_accounting::AccountId;
use shopledger_core::money::line_total;
use shopledger_core::{Amount, DomainError, DomainResult, Quantity};
use shopledger_products::ProductId;

/// One invoice line. A negative quantity is a return within the same invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    product: Option<ProductId>,
    name: String,
    quantity: Quantity,
    unit_price: Amount,
    total_price: Amount,
    buying_price: Option<Amount>,
}

impl InvoiceItem {
    pub fn new(
        product: Option<ProductId>,
        name: impl Into<String>,
        quantity: Quantity,
        unit_price: Amount,
    ) -> DomainResult<Self> {
        let name = name.into();
        if unit_price < 0 {
            return Err(DomainError::validation(format!(
                "item '{name}': unit price cannot be negative"
            )));
        }
        let total_price = checked_line_total(&name, quantity, unit_price)?;
        Ok(Self {
            product,
            name,
            quantity,
            unit_price,
            total_price,
            buying_price: None,
        })
    }

    /// Snapshot of the product's cost at the time of sale.
    pub fn with_buying_price(mut self, buying_price: Amount) -> Self {
        self.buying_price = Some(buying_price);
        self
    }

    pub fn product(&self) -> Option<ProductId> {
        self.product
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn unit_price(&self) -> Amount {
        self.unit_price
    }

    pub fn total_price(&self) -> Amount {
        self.total_price
    }

    pub fn buying_price(&self) -> Option<Amount> {
        self.buying_price
    }

    pub fn is_return(&self) -> bool {
        self.quantity < 0
    }

    /// A line counts as filled once it names something and moves a quantity.
    pub fn is_filled(&self) -> bool {
        self.quantity != 0 && (self.product.is_some() || !self.name.trim().is_empty())
    }

    pub fn set_quantity(&mut self, quantity: Quantity) -> DomainResult<()> {
        self.total_price = checked_line_total(&self.name, quantity, self.unit_price)?;
        self.quantity = quantity;
        Ok(())
    }

    pub fn set_unit_price(&mut self, unit_price: Amount) -> DomainResult<()> {
        if unit_price < 0 {
            return Err(DomainError::validation(format!(
                "item '{}': unit price cannot be negative",
                self.name
            )));
        }
        self.total_price = checked_line_total(&self.name, self.quantity, unit_price)?;
        self.unit_price = unit_price;
        Ok(())
    }

    /// Flip the line between sale and return.
    pub fn toggle_return(&mut self) -> DomainResult<()> {
        let flipped = self.quantity.checked_neg().ok_or_else(|| {
            DomainError::invalid_quantity(format!("item '{}'", self.name), "quantity overflows")
        })?;
        self.set_quantity(flipped)
    }
}

fn checked_line_total(name: &str, quantity: Quantity, unit_price: Amount) -> DomainResult<Amount> {
    line_total(quantity, unit_price).ok_or_else(|| {
        DomainError::invalid_quantity(format!("item '{name}'"), "line total overflows")
    })
}

/// One leg of a (possibly split) payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub account_id: AccountId,
    /// Gross amount handed over by the customer.
    pub amount: Amount,
    /// Charge withheld by the payment channel; the shop receives `amount - fee`.
    #[serde(default)]
    pub fee: Amount,
}

impl Payment {
    pub fn new(account_id: AccountId, amount: Amount) -> Self {
        Self {
            account_id,
            amount,
            fee: 0,
        }
    }

    pub fn with_fee(mut self, fee: Amount) -> Self {
        self.fee = fee;
        self
    }

    /// What actually lands in the account.
    pub fn net(&self) -> Amount {
        self.amount - self.fee
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.amount <= 0 {
            return Err(DomainError::validation(format!(
                "payment to account {} must be positive",
                self.account_id
            )));
        }
        if self.fee < 0 || self.fee > self.amount {
            return Err(DomainError::validation(format!(
                "payment fee {} must be between 0 and the amount {}",
                self.fee, self.amount
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Unpaid,
    Single(AccountId),
    Split,
}

impl PaymentMethod {
    pub fn of(payments: &[Payment]) -> Self {
        match payments {
            [] => PaymentMethod::Unpaid,
            [only] => PaymentMethod::Single(only.account_id),
            _ => PaymentMethod::Split,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub sub_total: Amount,
    pub grand_total: Amount,
    pub paid_total: Amount,
    pub fee_total: Amount,
    /// May be negative (overpayment); never clamped.
    pub due: Amount,
}

impl InvoiceTotals {
    /// How much this invoice adds to what the customer owes, beyond the
    /// previous due it carried forward.
    pub fn contribution(&self, previous_due: Amount) -> Amount {
        self.due - previous_due
    }
}

pub fn compute_totals(
    items: &[InvoiceItem],
    previous_due: Amount,
    discount: Amount,
    payments: &[Payment],
) -> DomainResult<InvoiceTotals> {
    let overflow = || DomainError::validation("invoice totals overflow");

    if discount < 0 {
        return Err(DomainError::validation("discount cannot be negative"));
    }

    let mut sub_total: Amount = 0;
    for item in items {
        let total = checked_line_total(&item.name, item.quantity, item.unit_price)?;
        sub_total = sub_total.checked_add(total).ok_or_else(overflow)?;
    }

    let mut paid_total: Amount = 0;
    let mut fee_total: Amount = 0;
    for payment in payments {
        paid_total = paid_total.checked_add(payment.amount).ok_or_else(overflow)?;
        fee_total = fee_total.checked_add(payment.fee).ok_or_else(overflow)?;
    }

    let grand_total = sub_total
        .checked_add(previous_due)
        .and_then(|t| t.checked_sub(discount))
        .ok_or_else(overflow)?;
    let due = grand_total
        .checked_sub(paid_total - fee_total)
        .ok_or_else(overflow)?;

    Ok(InvoiceTotals {
        sub_total,
        grand_total,
        paid_total,
        fee_total,
        due,
    })
}

/// Turn the legacy "single paid amount, no payment list" shape into an
/// explicit payment trail.
///
/// An explicit payment list always wins. A non-zero legacy amount without a
/// list needs an account to land in.
pub fn normalize_payments(
    payments: Vec<Payment>,
    legacy_paid: Option<Amount>,
    default_account: Option<AccountId>,
) -> DomainResult<Vec<Payment>> {
    if !payments.is_empty() {
        return Ok(payments);
    }
    match legacy_paid {
        None | Some(0) => Ok(payments),
        Some(paid) => {
            let account = default_account.ok_or_else(|| {
                DomainError::validation(format!(
                    "paid amount {paid} has no account to record it against"
                ))
            })?;
            Ok(vec![Payment::new(account, paid)])
        }
    }
}

/// Net quantity each product leaves the shop with (returns count negative).
pub fn stock_demand(items: &[InvoiceItem]) -> BTreeMap<ProductId, Quantity> {
    let mut demand = BTreeMap::new();
    for item in items {
        if let Some(product) = item.product {
            *demand.entry(product).or_insert(0) += item.quantity;
        }
    }
    demand.retain(|_, q| *q != 0);
    demand
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn item(quantity: Quantity, unit_price: Amount) -> InvoiceItem {
        InvoiceItem::new(None, "widget", quantity, unit_price).unwrap()
    }

    #[test]
    fn worked_example_with_fee() {
        let account = AccountId::generate();
        let items = vec![item(2, 100), item(1, 50)];
        let payments = vec![Payment::new(account, 150).with_fee(5)];

        let totals = compute_totals(&items, 30, 10, &payments).unwrap();
        assert_eq!(totals.sub_total, 250);
        assert_eq!(totals.grand_total, 270);
        assert_eq!(totals.paid_total, 150);
        assert_eq!(totals.fee_total, 5);
        assert_eq!(totals.due, 125);
        assert_eq!(totals.contribution(30), 95);
    }

    #[test]
    fn overpayment_leaves_negative_due() {
        let payments = vec![Payment::new(AccountId::generate(), 500)];
        let totals = compute_totals(&[item(1, 300)], 0, 0, &payments).unwrap();
        assert_eq!(totals.due, -200);
    }

    #[test]
    fn toggle_return_flips_sign_and_total() {
        let mut line = item(3, 40);
        line.toggle_return().unwrap();
        assert_eq!(line.quantity(), -3);
        assert_eq!(line.total_price(), -120);
        assert!(line.is_return());

        let totals = compute_totals(&[item(2, 100), line], 0, 0, &[]).unwrap();
        assert_eq!(totals.sub_total, 80);
    }

    #[test]
    fn editing_a_line_recomputes_total() {
        let mut line = item(2, 10);
        line.set_quantity(5).unwrap();
        assert_eq!(line.total_price(), 50);
        line.set_unit_price(12).unwrap();
        assert_eq!(line.total_price(), 60);
        assert_eq!(line.set_unit_price(-1).unwrap_err().kind(), "validation");
    }

    #[test]
    fn legacy_paid_becomes_single_payment() {
        let account = AccountId::generate();
        let payments = normalize_payments(vec![], Some(400), Some(account)).unwrap();
        assert_eq!(payments, vec![Payment::new(account, 400)]);
        assert_eq!(PaymentMethod::of(&payments), PaymentMethod::Single(account));

        assert!(normalize_payments(vec![], Some(0), None).unwrap().is_empty());
        assert_eq!(
            normalize_payments(vec![], Some(400), None).unwrap_err().kind(),
            "validation"
        );
    }

    #[test]
    fn explicit_payments_win_over_legacy_amount() {
        let (a, b) = (AccountId::generate(), AccountId::generate());
        let split = vec![Payment::new(a, 100), Payment::new(b, 50)];
        let payments = normalize_payments(split.clone(), Some(999), Some(a)).unwrap();
        assert_eq!(payments, split);
        assert_eq!(PaymentMethod::of(&payments), PaymentMethod::Split);
    }

    #[test]
    fn stock_demand_nets_returns_per_product() {
        let p = ProductId::generate();
        let items = vec![
            InvoiceItem::new(Some(p), "soap", 5, 30).unwrap(),
            InvoiceItem::new(Some(p), "soap", -2, 30).unwrap(),
            item(1, 99),
        ];
        let demand = stock_demand(&items);
        assert_eq!(demand.get(&p), Some(&3));
        assert_eq!(demand.len(), 1);
    }

    #[test]
    fn fee_larger_than_amount_is_rejected() {
        let payment = Payment::new(AccountId::generate(), 10).with_fee(11);
        assert_eq!(payment.validate().unwrap_err().kind(), "validation");
    }

    proptest! {
        /// due == grand_total - (paid - fees) and sub_total == Σ qty*price.
        #[test]
        fn due_identity_holds(
            lines in prop::collection::vec((-50i64..50, 0i64..10_000), 0..12),
            previous_due in -10_000i64..10_000,
            discount in 0i64..5_000,
            paid in prop::collection::vec((1i64..10_000, 0i64..100), 0..4),
        ) {
            let account = AccountId::generate();
            let items: Vec<_> = lines.iter().map(|(q, p)| item(*q, *p)).collect();
            let payments: Vec<_> = paid
                .iter()
                .map(|(a, f)| Payment::new(account, *a).with_fee((*f).min(*a)))
                .collect();

            let totals = compute_totals(&items, previous_due, discount, &payments).unwrap();
            let expected_sub: i64 = lines.iter().map(|(q, p)| q * p).sum();
            let net: i64 = payments.iter().map(Payment::net).sum();
            prop_assert_eq!(totals.sub_total, expected_sub);
            prop_assert_eq!(totals.grand_total, expected_sub + previous_due - discount);
            prop_assert_eq!(totals.due, totals.grand_total - net);
        }
    }
}
