mod common;

use chrono::Utc;

use shopledger_infra::services::{CustomerDirectory, InvoiceDraft, ProductCatalog};
use shopledger_invoicing::{InvoiceItem, Payment, PaymentMethod};

use common::{cash, customer, engine, rice, sample_draft};

#[test]
fn saving_an_invoice_moves_stock_ledger_and_due_together() -> anyhow::Result<()> {
    let engine = engine();
    let (cash, rice, nadia) = (cash(&engine, 0), rice(&engine), customer(&engine, "01711000000", 30));

    let invoice = engine.invoices.save(sample_draft("INV-1001", nadia, rice, cash))?;

    let totals = invoice.totals();
    assert_eq!(totals.sub_total, 250);
    assert_eq!(totals.grand_total, 270);
    assert_eq!(totals.due, 125);
    assert_eq!(invoice.payment_method(), PaymentMethod::Single(cash));

    assert_eq!(engine.catalog.get_product(rice)?.quantity(), 8);
    assert_eq!(engine.ledger.balance(cash)?, 145);
    assert_eq!(engine.customers.get_due(nadia)?, 125);

    let credit = engine.ledger.transactions(cash)?.remove(0).transaction;
    assert_eq!(credit.invoice_number.as_deref(), Some("INV-1001"));
    assert_eq!(credit.customer, Some(nadia));
    Ok(())
}

#[test]
fn revising_an_invoice_applies_only_the_differences() -> anyhow::Result<()> {
    let engine = engine();
    let (cash, rice, nadia) = (cash(&engine, 0), rice(&engine), customer(&engine, "01711000001", 30));
    let first = engine.invoices.save(sample_draft("INV-1002", nadia, rice, cash))?;

    let mut draft = InvoiceDraft::from_invoice(&first).unwrap();
    draft.items[0].set_quantity(3)?;
    draft.payments = vec![Payment::new(cash, 200).with_fee(5)];
    let revised = engine.invoices.save(draft)?;

    assert_eq!(revised.revision(), 2);
    assert_eq!(revised.due(), 175);
    assert_eq!(engine.catalog.get_product(rice)?.quantity(), 7);
    assert_eq!(engine.ledger.balance(cash)?, 195);
    assert_eq!(engine.customers.get_due(nadia)?, 175);

    let live: Vec<_> = engine
        .ledger
        .transactions(cash)?
        .into_iter()
        .filter(|r| !r.is_undone())
        .collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].transaction.amount, 195);
    Ok(())
}

#[test]
fn saving_unchanged_content_is_a_no_op() -> anyhow::Result<()> {
    let engine = engine();
    let (cash, rice, nadia) = (cash(&engine, 0), rice(&engine), customer(&engine, "01711000002", 30));
    let first = engine.invoices.save(sample_draft("INV-1003", nadia, rice, cash))?;
    let again = engine.invoices.save(InvoiceDraft::from_invoice(&first).unwrap())?;

    assert_eq!(again.revision(), 1);
    assert_eq!(engine.catalog.get_product(rice)?.quantity(), 8);
    assert_eq!(engine.customers.get_due(nadia)?, 125);
    Ok(())
}

#[test]
fn issuing_an_existing_number_is_rejected() -> anyhow::Result<()> {
    let engine = engine();
    let (cash, rice, nadia) = (cash(&engine, 0), rice(&engine), customer(&engine, "01711000003", 30));
    engine.invoices.issue(sample_draft("INV-1004", nadia, rice, cash))?;

    let err = engine
        .invoices
        .issue(sample_draft("INV-1004", nadia, rice, cash))
        .unwrap_err();
    assert_eq!(err.kind(), "duplicate_invoice_number");
    assert_eq!(engine.catalog.get_product(rice)?.quantity(), 8);
    assert_eq!(engine.customers.get_due(nadia)?, 125);
    Ok(())
}

#[test]
fn a_failed_payment_leg_leaves_nothing_behind() -> anyhow::Result<()> {
    let engine = engine();
    let (cash, rice, nadia) = (cash(&engine, 0), rice(&engine), customer(&engine, "01711000004", 30));
    engine.ledger.disable_account(cash)?;

    let err = engine
        .invoices
        .save(sample_draft("INV-1005", nadia, rice, cash))
        .unwrap_err();
    assert_eq!(err.kind(), "account_disabled");

    assert_eq!(engine.catalog.get_product(rice)?.quantity(), 10);
    assert_eq!(engine.customers.get_due(nadia)?, 30);
    assert!(engine.invoices.invoice("INV-1005")?.is_none());
    Ok(())
}

#[test]
fn selling_more_than_on_hand_is_rejected() -> anyhow::Result<()> {
    let engine = engine();
    let (cash, rice, nadia) = (cash(&engine, 0), rice(&engine), customer(&engine, "01711000005", 0));
    let draft = InvoiceDraft::new("INV-1006", Utc::now())
        .for_customer(nadia, 0)
        .with_item(InvoiceItem::new(Some(rice), "Rice 5kg", 11, 100)?)
        .with_payment(Payment::new(cash, 100));

    let err = engine.invoices.save(draft).unwrap_err();
    assert_eq!(err.kind(), "insufficient_stock");
    assert_eq!(engine.catalog.get_product(rice)?.quantity(), 10);
    assert_eq!(engine.ledger.balance(cash)?, 0);
    Ok(())
}

#[test]
fn returns_put_stock_back() -> anyhow::Result<()> {
    let engine = engine();
    let (rice, nadia) = (rice(&engine), customer(&engine, "01711000006", 0));
    let mut returned = InvoiceItem::new(Some(rice), "Rice 5kg", 2, 100)?;
    returned.toggle_return()?;
    let draft = InvoiceDraft::new("RET-1", Utc::now())
        .for_customer(nadia, 0)
        .with_item(returned);

    let invoice = engine.invoices.save(draft)?;
    assert_eq!(invoice.due(), -200);
    assert_eq!(engine.catalog.get_product(rice)?.quantity(), 12);
    assert_eq!(engine.customers.get_due(nadia)?, -200);
    Ok(())
}

#[test]
fn an_invoice_without_customer_or_items_is_empty() {
    let engine = engine();
    let err = engine
        .invoices
        .save(InvoiceDraft::new("INV-EMPTY", Utc::now()))
        .unwrap_err();
    assert_eq!(err.kind(), "empty_invoice");
}

#[test]
fn legacy_paid_amount_lands_in_the_selected_account() -> anyhow::Result<()> {
    let engine = engine();
    let cash = cash(&engine, 0);
    let mut draft = InvoiceDraft::new("INV-1007", Utc::now())
        .with_item(InvoiceItem::new(None, "Gift wrap", 1, 100)?);
    draft.legacy_paid = Some(100);

    let err = engine.invoices.save(draft.clone()).unwrap_err();
    assert_eq!(err.kind(), "validation");

    draft.selected_account = Some(cash);
    let invoice = engine.invoices.save(draft)?;
    assert_eq!(invoice.payments(), &[Payment::new(cash, 100)]);
    assert_eq!(invoice.due(), 0);
    assert_eq!(engine.ledger.balance(cash)?, 100);
    Ok(())
}

#[test]
fn due_collection_credits_the_account_and_lowers_the_due() -> anyhow::Result<()> {
    let engine = engine();
    let (cash, nadia) = (cash(&engine, 0), customer(&engine, "01711000008", 300));

    let receipt = engine
        .invoices
        .record_due_payment(nadia, Payment::new(cash, 120), Utc::now())?;
    assert_eq!(receipt.balance_of(cash), Some(120));
    assert_eq!(engine.customers.get_due(nadia)?, 180);

    let err = engine
        .invoices
        .record_due_payment(nadia, Payment::new(cash, 0), Utc::now())
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    Ok(())
}

#[test]
fn invoices_are_listed_per_customer() -> anyhow::Result<()> {
    let engine = engine();
    let (cash, rice) = (cash(&engine, 0), rice(&engine));
    let (a, b) = (customer(&engine, "01711000009", 30), customer(&engine, "01711000010", 30));
    engine.invoices.save(sample_draft("A-1", a, rice, cash))?;
    engine.invoices.save(sample_draft("A-2", a, rice, cash))?;
    engine.invoices.save(sample_draft("B-1", b, rice, cash))?;

    assert_eq!(engine.invoices.invoices_for_customer(a)?.len(), 2);
    assert_eq!(engine.invoices.invoices()?.len(), 3);
    assert_eq!(
        engine.invoices.invoice("B-1")?.unwrap().customer(),
        Some(b)
    );
    Ok(())
}

#[test]
fn invoice_payments_cannot_be_undone_behind_the_invoice() -> anyhow::Result<()> {
    let engine = engine();
    let (cash, rice, nadia) = (cash(&engine, 0), rice(&engine), customer(&engine, "01711000020", 30));
    engine.invoices.save(sample_draft("INV-1020", nadia, rice, cash))?;

    let payment = engine
        .ledger
        .transactions(cash)?
        .into_iter()
        .find(|r| r.transaction.invoice_number.as_deref() == Some("INV-1020"))
        .expect("payment is posted")
        .transaction
        .id;
    let err = engine.ledger.undo_transaction(payment).unwrap_err();
    assert_eq!(err.kind(), "validation");
    let err = engine.ledger.reinstate_transaction(payment).unwrap_err();
    assert_eq!(err.kind(), "validation");

    assert_eq!(engine.ledger.balance(cash)?, 145);
    assert_eq!(engine.invoices.invoice("INV-1020")?.expect("saved").totals().paid_total, 150);
    assert!(engine.auditor.find_discrepancies()?.is_empty());

    // Dropping the payment through the invoice still works.
    let mut draft = sample_draft("INV-1020", nadia, rice, cash);
    draft.payments.clear();
    engine.invoices.save(draft)?;
    assert_eq!(engine.ledger.balance(cash)?, 0);
    assert_eq!(engine.customers.get_due(nadia)?, 270);
    Ok(())
}

#[test]
fn a_due_payment_eaten_by_its_fee_is_rejected() -> anyhow::Result<()> {
    let engine = engine();
    let (cash, nadia) = (cash(&engine, 0), customer(&engine, "01711000021", 90));

    let err = engine
        .invoices
        .record_due_payment(nadia, Payment::new(cash, 40).with_fee(40), Utc::now())
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert_eq!(engine.ledger.balance(cash)?, 0);
    assert_eq!(engine.customers.get_due(nadia)?, 90);
    Ok(())
}
