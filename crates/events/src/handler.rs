/// Execute an aggregate command in place: decide, then apply each event.
///
/// No IO and no persistence. Domain unit tests use this to drive an aggregate
/// through a lifecycle; services go through the infra dispatcher instead,
/// which adds the event store and optimistic concurrency.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: shopledger_core::Aggregate,
{
    let events = aggregate.handle(command)?;
    for ev in &events {
        aggregate.apply(ev);
    }
    Ok(events)
}
