use crate::model::*;

/// First existing reservation whose window intersects `span` (half-open).
/// Abutting windows (`existing.end == span.start`) do not conflict.
pub(crate) fn find_conflict<'a>(ts: &'a TableState, span: &Span) -> Option<&'a Reservation> {
    ts.overlapping(span).next()
}
