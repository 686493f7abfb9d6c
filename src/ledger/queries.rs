use chrono::NaiveDate;

use crate::model::*;

use super::{Ledger, SharedTableState};

impl Ledger {
    pub async fn get(&self, id: ReservationId) -> Option<Reservation> {
        let table_id = self.table_for_reservation(&id)?;
        let ts = self.table_state(table_id)?;
        let guard = ts.read().await;
        guard.reservations.iter().find(|r| r.id == id).cloned()
    }

    /// A table's reservations in start order, optionally limited to one reservation date.
    pub async fn reservations_for_table(
        &self,
        table_id: TableId,
        date: Option<NaiveDate>,
    ) -> Vec<Reservation> {
        let Some(ts) = self.table_state(table_id) else {
            return Vec::new();
        };
        let guard = ts.read().await;
        guard
            .reservations
            .iter()
            .filter(|r| date.is_none_or(|d| r.date() == d))
            .cloned()
            .collect()
    }

    /// A client's reservations, newest start first.
    pub async fn reservations_for_client(&self, client_id: ClientId) -> Vec<Reservation> {
        let ids = self
            .by_client
            .get(&client_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(r) = self.get(id).await {
                out.push(r);
            }
        }
        out.sort_by(|a, b| b.start().cmp(&a.start()));
        out
    }

    pub async fn reservation_count(&self) -> usize {
        let tables: Vec<SharedTableState> = self.tables.iter().map(|e| e.value().clone()).collect();
        let mut n = 0;
        for ts in tables {
            n += ts.read().await.reservations.len();
        }
        n
    }
}
