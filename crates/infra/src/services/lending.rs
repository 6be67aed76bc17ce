//! Lending (challan) settlement over stock and invoicing.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use shopledger_core::{Aggregate, AggregateRoot, DomainError, Quantity};
use shopledger_events::{EventBus, EventEnvelope};
use shopledger_invoicing::{Invoice, InvoiceItem};
use shopledger_lending::{
    Challan, ChallanCommand, ChallanEvent, ChallanId, ChallanLine, CreateChallan, CustomerRef,
    DeleteChallan, ItemSettlement, RevertSettlement, SettleItems, SettlementKind,
};
use shopledger_products::{ProductId, StockMovementReason};

use crate::command_dispatcher::CommandDispatcher;
use crate::error::EngineResult;
use crate::event_store::EventStore;
use crate::locks::KeyedLocks;
use crate::read_model::{InMemoryKeyIndex, KeyIndex};
use crate::services::catalog::ProductCatalog;
use crate::services::compensation::UndoLog;
use crate::services::customers::CustomerDirectory;
use crate::services::invoices::InvoiceService;

pub const CHALLAN_AGGREGATE: &str = "lending.challan";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallanDraft {
    pub challan_number: String,
    pub customer: CustomerRef,
    pub lines: Vec<ChallanLine>,
    pub date: DateTime<Utc>,
}

/// Result of settling challan lines. `invoice` is set when any line was
/// billed.
#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    pub challan: Challan,
    pub invoice: Option<Invoice>,
}

pub struct LendingService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    catalog: Arc<dyn ProductCatalog>,
    customers: Arc<dyn CustomerDirectory>,
    invoices: Arc<InvoiceService<S, B>>,
    numbers: InMemoryKeyIndex<String, ChallanId>,
    number_locks: KeyedLocks<String>,
    locks: KeyedLocks<ChallanId>,
}

impl<S, B> LendingService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        catalog: Arc<dyn ProductCatalog>,
        customers: Arc<dyn CustomerDirectory>,
        invoices: Arc<InvoiceService<S, B>>,
    ) -> Self {
        Self {
            dispatcher,
            catalog,
            customers,
            invoices,
            numbers: InMemoryKeyIndex::new(),
            number_locks: KeyedLocks::new(),
            locks: KeyedLocks::new(),
        }
    }

    fn load(&self, challan_id: ChallanId) -> EngineResult<Challan> {
        self.dispatcher
            .load(challan_id.0, |_| Challan::empty(challan_id))
    }

    pub fn challan(&self, challan_id: ChallanId) -> EngineResult<Challan> {
        let challan = self.load(challan_id)?;
        if !challan.is_created() {
            return Err(DomainError::not_found(format!("challan {challan_id}")).into());
        }
        Ok(challan)
    }

    /// Every challan that has not been deleted.
    pub fn challans(&self) -> EngineResult<Vec<Challan>> {
        let mut out = Vec::new();
        for id in self.dispatcher.stream_ids(CHALLAN_AGGREGATE)? {
            let challan = self.challan(ChallanId::new(id))?;
            if !challan.is_deleted() {
                out.push(challan);
            }
        }
        Ok(out)
    }

    pub fn challan_by_number(&self, challan_number: &str) -> EngineResult<Option<Challan>> {
        let number = challan_number.trim();
        if let Some(id) = self.numbers.get(&number.to_string()) {
            return Ok(Some(self.challan(id)?));
        }
        let found = self
            .challans()?
            .into_iter()
            .find(|c| c.challan_number() == number);
        if let Some(challan) = &found {
            self.numbers
                .upsert(number.to_string(), challan.id_typed());
        }
        Ok(found)
    }

    /// Record goods leaving the shop. Stock for every product line is taken
    /// out before the challan is committed.
    pub fn create(&self, draft: ChallanDraft) -> EngineResult<Challan> {
        let number = draft.challan_number.trim().to_string();
        self.number_locks.with_locked([number.clone()], || -> EngineResult<Challan> {
            if self.challan_by_number(&number)?.is_some() {
                return Err(DomainError::conflict(format!("challan number {number} is already used")).into());
            }
            if let Some(customer) = draft.customer.customer_id() {
                self.customers.get_customer(customer)?;
            }

            let challan_id = ChallanId::generate();
            let mut challan = Challan::empty(challan_id);
            let decided = challan.handle(&ChallanCommand::CreateChallan(CreateChallan {
                challan_id,
                challan_number: number.clone(),
                customer: draft.customer,
                lines: draft.lines.clone(),
                date: draft.date,
                occurred_at: Utc::now(),
            }))?;

            let mut issued: BTreeMap<ProductId, Quantity> = BTreeMap::new();
            for line in &draft.lines {
                if let Some(product) = line.product {
                    *issued.entry(product).or_insert(0) += line.quantity;
                }
            }

            let mut undo = UndoLog::new();
            let outcome = self
                .move_stock(&mut undo, &issued, -1, StockMovementReason::LendingIssued)
                .and_then(|()| {
                    self.dispatcher
                        .commit(challan_id.0, CHALLAN_AGGREGATE, &mut challan, decided)
                        .map(|_| ())
                });
            if let Err(err) = outcome {
                tracing::warn!(challan_number = %number, error = %err, "challan creation failed; compensating");
                undo.unwind();
                return Err(err);
            }

            self.numbers.upsert(number.clone(), challan_id);
            tracing::info!(challan_id = %challan_id, challan_number = %number, "challan created");
            Ok(challan)
        })?
    }

    /// Apply `sign * quantity` to each product's stock, logging the inverse.
    fn move_stock<'a>(
        &'a self,
        undo: &mut UndoLog<'a>,
        quantities: &BTreeMap<ProductId, Quantity>,
        sign: Quantity,
        reason: StockMovementReason,
    ) -> EngineResult<()> {
        for (&product, &quantity) in quantities {
            let delta = sign * quantity;
            if delta == 0 {
                continue;
            }
            self.catalog.adjust_stock(product, delta, reason)?;
            undo.push(format!("stock of {product}"), move || {
                self.catalog
                    .adjust_stock(product, -delta, StockMovementReason::Rollback)
                    .map(|_| ())
            });
        }
        Ok(())
    }

    /// Return and bill challan lines in one batch.
    ///
    /// The whole batch is checked against each line's remaining quantity
    /// before anything changes. Returned and billed goods come back into
    /// stock; billed lines are then added to `invoice_number` (or a new
    /// invoice numbered after the challan), which sells them again.
    pub fn settle(
        &self,
        challan_id: ChallanId,
        settlements: Vec<ItemSettlement>,
        invoice_number: Option<String>,
    ) -> EngineResult<SettlementOutcome> {
        self.locks.with_locked([challan_id], || -> EngineResult<SettlementOutcome> {
            let mut challan = self.challan(challan_id)?;
            let occurred_at = Utc::now();
            let decided = challan.handle(&ChallanCommand::SettleItems(SettleItems {
                challan_id,
                settlements: settlements.clone(),
                occurred_at,
            }))?;

            let mut restored: BTreeMap<ProductId, Quantity> = BTreeMap::new();
            let mut billed = Vec::new();
            for s in &settlements {
                let item = challan.item(s.line_no).ok_or_else(|| {
                    DomainError::not_found(format!("challan {} line {}", challan.challan_number(), s.line_no))
                })?;
                if let Some(product) = item.product {
                    *restored.entry(product).or_insert(0) += s.quantity;
                }
                if s.kind == SettlementKind::Bill {
                    billed.push(
                        InvoiceItem::new(item.product, item.description.clone(), s.quantity, item.unit_price)?,
                    );
                }
            }

            let mut undo = UndoLog::new();
            let outcome = self.settle_effects(
                &mut undo,
                &mut challan,
                decided,
                &settlements,
                &restored,
                billed,
                invoice_number.as_deref(),
            );
            match outcome {
                Ok(invoice) => {
                    tracing::info!(
                        challan_id = %challan_id,
                        lines = settlements.len(),
                        invoice_number = invoice.as_ref().map(|i| i.invoice_number()),
                        "challan items settled"
                    );
                    Ok(SettlementOutcome { challan, invoice })
                }
                Err(err) => {
                    tracing::warn!(challan_id = %challan_id, error = %err, "challan settlement failed; compensating");
                    undo.unwind();
                    Err(err)
                }
            }
        })?
    }

    #[allow(clippy::too_many_arguments)]
    fn settle_effects<'a>(
        &'a self,
        undo: &mut UndoLog<'a>,
        challan: &mut Challan,
        decided: Vec<ChallanEvent>,
        settlements: &[ItemSettlement],
        restored: &BTreeMap<ProductId, Quantity>,
        billed: Vec<InvoiceItem>,
        invoice_number: Option<&str>,
    ) -> EngineResult<Option<Invoice>> {
        let challan_id = challan.id_typed();
        self.move_stock(undo, restored, 1, StockMovementReason::LendingRestored)?;

        self.dispatcher
            .commit(challan_id.0, CHALLAN_AGGREGATE, challan, decided)?;
        let reverted = settlements.to_vec();
        undo.push(format!("settlement of challan {challan_id}"), move || {
            self.revert(challan_id, reverted)
        });

        if billed.is_empty() {
            return Ok(None);
        }
        let number = match invoice_number {
            Some(n) => n.to_string(),
            None => format!("{}/{}", challan.challan_number(), challan.version()),
        };
        let customer = challan.customer().and_then(CustomerRef::customer_id);
        let invoice = self
            .invoices
            .append_items(&number, customer, billed, Utc::now())?;
        Ok(Some(invoice))
    }

    fn revert(&self, challan_id: ChallanId, settlements: Vec<ItemSettlement>) -> EngineResult<()> {
        self.dispatcher.dispatch(
            challan_id.0,
            CHALLAN_AGGREGATE,
            &ChallanCommand::RevertSettlement(RevertSettlement {
                challan_id,
                settlements,
                occurred_at: Utc::now(),
            }),
            |_| Challan::empty(challan_id),
        )?;
        Ok(())
    }

    /// Delete a challan, putting every unsettled product quantity back.
    pub fn delete(&self, challan_id: ChallanId) -> EngineResult<Challan> {
        self.locks.with_locked([challan_id], || -> EngineResult<Challan> {
            let mut challan = self.challan(challan_id)?;
            let decided = challan.handle(&ChallanCommand::DeleteChallan(DeleteChallan {
                challan_id,
                occurred_at: Utc::now(),
            }))?;

            let mut restored: BTreeMap<ProductId, Quantity> = BTreeMap::new();
            for event in &decided {
                if let ChallanEvent::ChallanDeleted(deleted) = event {
                    for r in &deleted.restored {
                        *restored.entry(r.product).or_insert(0) += r.quantity;
                    }
                }
            }

            let mut undo = UndoLog::new();
            let outcome = self
                .move_stock(&mut undo, &restored, 1, StockMovementReason::LendingRestored)
                .and_then(|()| {
                    self.dispatcher
                        .commit(challan_id.0, CHALLAN_AGGREGATE, &mut challan, decided)
                        .map(|_| ())
                });
            if let Err(err) = outcome {
                tracing::warn!(challan_id = %challan_id, error = %err, "challan delete failed; compensating");
                undo.unwind();
                return Err(err);
            }

            self.numbers
                .remove(&challan.challan_number().to_string());
            tracing::info!(challan_id = %challan_id, "challan deleted");
            Ok(challan)
        })?
    }
}
