//! The reservation ledger: the authoritative set of booked windows per table.
//!
//! Each table's state sits behind its own `RwLock`. Conflict-checked insertion
//! takes the table's write lock for check + WAL append + apply, so two
//! overlapping requests on one table serialize while other tables proceed.

mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::LedgerError;

use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;
use crate::wal::{Wal, WalWriter};
use crate::window::TimeWindow;

pub type SharedTableState = Arc<RwLock<TableState>>;

pub struct Ledger {
    tables: DashMap<TableId, SharedTableState>,
    wal: WalWriter,
    /// Reverse lookup: reservation id → table id.
    reservation_to_table: DashMap<ReservationId, TableId>,
    /// Client → reservation ids, in commit order.
    by_client: DashMap<ClientId, Vec<ReservationId>>,
}

/// Apply a confirmed reservation. Caller holds the table's write lock.
fn apply_to_table(
    ts: &mut TableState,
    reservation: Reservation,
    reservation_to_table: &DashMap<ReservationId, TableId>,
    by_client: &DashMap<ClientId, Vec<ReservationId>>,
) {
    reservation_to_table.insert(reservation.id, reservation.table_id);
    by_client
        .entry(reservation.client_id)
        .or_default()
        .push(reservation.id);
    ts.insert(reservation);
}

impl Ledger {
    /// Replay `path` and start its WAL writer. Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = WalWriter::spawn(Wal::open(path)?);
        let ledger = Self::from_events(events, wal);
        let replayed = ledger.reservation_to_table.len();
        if replayed > 0 {
            tracing::info!("replayed {replayed} reservations from {}", path.display());
        }
        Ok(ledger)
    }

    /// Build state from already-replayed `events`, persisting new ones to `wal`.
    pub(crate) fn from_events(events: Vec<Event>, wal: WalWriter) -> Self {
        let ledger = Self {
            tables: DashMap::new(),
            wal,
            reservation_to_table: DashMap::new(),
            by_client: DashMap::new(),
        };

        // We're the sole owner of these Arcs, so try_write always succeeds.
        // Never block here: open may run inside an async context.
        for event in events {
            let Event::ReservationConfirmed { id, client_id, table_id, date, start, end } = event else {
                continue;
            };
            let window = match TimeWindow::new(date, start, end) {
                Ok(w) => w,
                Err(e) => {
                    tracing::warn!("replay: skipping reservation {id}: {e}");
                    continue;
                }
            };
            let reservation = Reservation { id, client_id, table_id, window };
            let ts = ledger.table_entry(table_id);
            let mut guard = ts.try_write().expect("replay: uncontended write");
            apply_to_table(&mut guard, reservation, &ledger.reservation_to_table, &ledger.by_client);
        }
        ledger
    }

    /// Table state, created empty on first use.
    fn table_entry(&self, table_id: TableId) -> SharedTableState {
        self.tables
            .entry(table_id)
            .or_insert_with(|| Arc::new(RwLock::new(TableState::new(table_id))))
            .value()
            .clone()
    }

    pub(crate) fn table_state(&self, table_id: TableId) -> Option<SharedTableState> {
        self.tables.get(&table_id).map(|e| e.value().clone())
    }

    pub fn table_for_reservation(&self, id: &Ulid) -> Option<TableId> {
        self.reservation_to_table.get(id).map(|e| *e.value())
    }

    /// WAL-append then apply. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        ts: &mut TableState,
        reservation: Reservation,
    ) -> Result<(), LedgerError> {
        self.wal
            .append(&Event::reservation_confirmed(&reservation))
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        apply_to_table(ts, reservation, &self.reservation_to_table, &self.by_client);
        Ok(())
    }
}
