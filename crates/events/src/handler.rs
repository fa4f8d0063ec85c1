/// Execute an aggregate command in place: decide, then apply every decided event.
///
/// Handy in domain unit tests; production paths go through the infrastructure
/// unit of work, which also persists and publishes.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: procura_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
