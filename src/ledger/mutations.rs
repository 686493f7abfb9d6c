use ulid::Ulid;

use crate::model::*;
use crate::window::TimeWindow;

use super::conflict::find_conflict;
use super::{Ledger, LedgerError};

impl Ledger {
    /// Book `window` on `table_id` unless it overlaps an existing reservation.
    ///
    /// Check, WAL append and apply all happen under the table's write lock.
    /// A conflict is returned as `LedgerError::Conflict` naming the colliding
    /// reservation; the ledger is left unchanged.
    pub async fn insert_if_free(
        &self,
        client_id: ClientId,
        table_id: TableId,
        window: TimeWindow,
    ) -> Result<Reservation, LedgerError> {
        let ts = self.table_entry(table_id);
        let mut guard = ts.write().await;

        if let Some(existing) = find_conflict(&guard, &window.span()) {
            return Err(LedgerError::Conflict {
                table_id,
                existing: existing.id,
                window: existing.window,
            });
        }

        let reservation = Reservation {
            id: Ulid::new(),
            client_id,
            table_id,
            window,
        };
        self.persist_and_apply(&mut guard, reservation.clone()).await?;
        Ok(reservation)
    }
}
