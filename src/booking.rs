//! Booking service: window parsing, table and client validation, then
//! conflict-checked insertion into the ledger.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::directory::TableDirectory;
use crate::identity::IdentityStore;
use crate::ledger::{Ledger, LedgerError};
use crate::model::*;
use crate::window::{TimeWindow, WindowError};

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("invalid window: {0}")]
    InvalidWindow(String),
    #[error("table {0} not found")]
    TableNotFound(TableId),
    #[error("client {0} not found")]
    ClientNotFound(ClientId),
    #[error("table {table_id} already reserved for {window} by reservation {existing}")]
    SlotConflict {
        table_id: TableId,
        existing: ReservationId,
        window: TimeWindow,
    },
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl BookingError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::MalformedInput(_) => "malformed_input",
            BookingError::InvalidWindow(_) => "invalid_window",
            BookingError::TableNotFound(_) => "table_not_found",
            BookingError::ClientNotFound(_) => "client_not_found",
            BookingError::SlotConflict { .. } => "slot_conflict",
            BookingError::StorageUnavailable(_) => "storage_unavailable",
        }
    }
}

impl From<WindowError> for BookingError {
    fn from(e: WindowError) -> Self {
        match e {
            WindowError::Malformed { .. } => BookingError::MalformedInput(e.to_string()),
            WindowError::Inverted { .. } => BookingError::InvalidWindow(e.to_string()),
        }
    }
}

impl From<LedgerError> for BookingError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Conflict { table_id, existing, window } => {
                BookingError::SlotConflict { table_id, existing, window }
            }
            LedgerError::Storage(msg) => BookingError::StorageUnavailable(msg),
        }
    }
}

pub struct BookingService {
    ledger: Arc<Ledger>,
    directory: Arc<TableDirectory>,
    identity: Arc<dyn IdentityStore>,
}

impl BookingService {
    pub fn new(ledger: Arc<Ledger>, directory: Arc<TableDirectory>, identity: Arc<dyn IdentityStore>) -> Self {
        Self { ledger, directory, identity }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn directory(&self) -> &TableDirectory {
        &self.directory
    }

    /// Book a table for a client. Each step has its own failure kind:
    /// window → table → client → ledger. Nothing is retried.
    pub async fn book(
        &self,
        client_id: ClientId,
        table_id: TableId,
        date: &str,
        start: &str,
        end: &str,
    ) -> Result<Reservation, BookingError> {
        let started = Instant::now();
        let result = self.try_book(client_id, table_id, date, start, end).await;
        let outcome = match &result {
            Ok(r) => {
                info!("booked {} for client {client_id} on table {table_id} {}", r.id, r.window);
                "confirmed"
            }
            Err(e @ BookingError::StorageUnavailable(_)) => {
                error!("booking for client {client_id} on table {table_id} failed: {e}");
                e.kind()
            }
            Err(e) => {
                debug!("booking for client {client_id} on table {table_id} rejected: {e}");
                e.kind()
            }
        };
        metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(crate::observability::BOOKING_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn try_book(
        &self,
        client_id: ClientId,
        table_id: TableId,
        date: &str,
        start: &str,
        end: &str,
    ) -> Result<Reservation, BookingError> {
        let window = TimeWindow::parse(date, start, end)?;
        if !self.directory.exists(table_id) {
            return Err(BookingError::TableNotFound(table_id));
        }
        if !self.identity.client_exists(client_id) {
            return Err(BookingError::ClientNotFound(client_id));
        }
        Ok(self.ledger.insert_if_free(client_id, table_id, window).await?)
    }

    /// The client's reservations with table and restaurant details, newest first.
    pub async fn reservations_for_client(
        &self,
        client_id: ClientId,
    ) -> Result<Vec<ReservationDetail>, BookingError> {
        if !self.identity.client_exists(client_id) {
            return Err(BookingError::ClientNotFound(client_id));
        }
        let reservations = self.ledger.reservations_for_client(client_id).await;
        Ok(reservations.into_iter().filter_map(|r| self.detail(r)).collect())
    }

    pub async fn reservations_for_table(
        &self,
        table_id: TableId,
        date: Option<chrono::NaiveDate>,
    ) -> Result<Vec<ReservationDetail>, BookingError> {
        if !self.directory.exists(table_id) {
            return Err(BookingError::TableNotFound(table_id));
        }
        let reservations = self.ledger.reservations_for_table(table_id, date).await;
        Ok(reservations.into_iter().filter_map(|r| self.detail(r)).collect())
    }

    /// Join with reference data. Reservations on tables no longer in the
    /// directory are dropped from listings.
    fn detail(&self, reservation: Reservation) -> Option<ReservationDetail> {
        let table = self.directory.table(reservation.table_id)?;
        let restaurant = self.directory.restaurant(table.restaurant_id)?.clone();
        Some(ReservationDetail {
            table_number: table.number,
            table_capacity: table.capacity,
            restaurant,
            reservation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    struct FixedClients(HashSet<u64>);

    impl IdentityStore for FixedClients {
        fn client_exists(&self, id: ClientId) -> bool {
            self.0.contains(&id.0)
        }
    }

    const DIRECTORY: &str = r#"{
        "restaurants": [
            {"id": 1, "name": "Cantina", "address": "Rua A, 10", "phone": "1130000000", "capacity": 40}
        ],
        "tables": [
            {"id": 5, "number": 1, "capacity": 4, "restaurant_id": 1},
            {"id": 6, "number": 2, "capacity": 2, "restaurant_id": 1}
        ]
    }"#;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tablebook_test_booking");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn service(name: &str) -> Arc<BookingService> {
        let ledger = Arc::new(Ledger::open(&test_wal_path(name)).unwrap());
        let directory = Arc::new(TableDirectory::from_json(DIRECTORY).unwrap());
        let clients = Arc::new(FixedClients([1, 2].into_iter().collect()));
        Arc::new(BookingService::new(ledger, directory, clients))
    }

    #[tokio::test]
    async fn dinner_scenario() {
        let svc = service("dinner_scenario.wal");

        let first = svc.book(ClientId(1), TableId(5), "2024-06-01", "18:00", "19:00").await.unwrap();
        assert_eq!(first.client_id, ClientId(1));
        assert_eq!(first.table_id, TableId(5));
        assert_eq!(first.start().format("%H:%M").to_string(), "18:00");
        assert_eq!(first.end().format("%H:%M").to_string(), "19:00");

        let err = svc
            .book(ClientId(1), TableId(5), "2024-06-01", "18:30", "19:30")
            .await
            .unwrap_err();
        match err {
            BookingError::SlotConflict { table_id, existing, .. } => {
                assert_eq!(table_id, TableId(5));
                assert_eq!(existing, first.id);
            }
            other => panic!("expected SlotConflict, got {other:?}"),
        }

        svc.book(ClientId(1), TableId(5), "2024-06-01", "19:00", "20:00").await.unwrap();
        assert_eq!(svc.ledger().reservation_count().await, 2);
    }

    #[tokio::test]
    async fn failure_kinds_in_order() {
        let svc = service("failure_kinds.wal");

        // Window is checked before anything else, even for unknown tables and clients.
        let err = svc.book(ClientId(99), TableId(99), "2024/06/01", "18:00", "19:00").await.unwrap_err();
        assert!(matches!(err, BookingError::MalformedInput(_)), "{err:?}");

        let err = svc.book(ClientId(99), TableId(99), "2024-06-01", "19:00", "18:00").await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidWindow(_)), "{err:?}");

        let err = svc.book(ClientId(99), TableId(99), "2024-06-01", "18:00", "19:00").await.unwrap_err();
        assert!(matches!(err, BookingError::TableNotFound(TableId(99))), "{err:?}");

        let err = svc.book(ClientId(99), TableId(5), "2024-06-01", "18:00", "19:00").await.unwrap_err();
        assert!(matches!(err, BookingError::ClientNotFound(ClientId(99))), "{err:?}");

        assert_eq!(svc.ledger().reservation_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_table_leaves_ledger_unchanged() {
        let svc = service("unknown_table.wal");
        svc.book(ClientId(1), TableId(5), "2024-06-01", "18:00", "19:00").await.unwrap();

        let err = svc.book(ClientId(1), TableId(7), "2024-06-01", "20:00", "21:00").await.unwrap_err();
        assert_eq!(err.kind(), "table_not_found");
        assert_eq!(svc.ledger().reservation_count().await, 1);
        assert!(svc.ledger().reservations_for_table(TableId(7), None).await.is_empty());
    }

    #[tokio::test]
    async fn storage_failure_is_reported_and_nothing_is_booked() {
        use std::sync::atomic::Ordering;

        use crate::wal::testing::MemSink;
        use crate::wal::{Wal, WalWriter};

        let sink = MemSink::default();
        let wal = WalWriter::spawn(Wal::with_sink(sink.clone(), 0, PathBuf::from("booking_mem.wal")));
        let ledger = Arc::new(Ledger::from_events(Vec::new(), wal));
        let directory = Arc::new(TableDirectory::from_json(DIRECTORY).unwrap());
        let clients = Arc::new(FixedClients([1].into_iter().collect()));
        let svc = BookingService::new(ledger, directory, clients);

        sink.fail_sync.store(true, Ordering::SeqCst);
        let err = svc.book(ClientId(1), TableId(5), "2024-06-01", "18:00", "19:00").await.unwrap_err();
        assert!(matches!(err, BookingError::StorageUnavailable(_)), "{err:?}");
        assert_eq!(err.kind(), "storage_unavailable");
        assert_eq!(svc.ledger().reservation_count().await, 0);
        assert!(svc.reservations_for_client(ClientId(1)).await.unwrap().is_empty());
        assert!(sink.contents().is_empty());
    }

    #[tokio::test]
    async fn same_window_on_different_tables_both_succeed() {
        let svc = service("different_tables.wal");
        svc.book(ClientId(1), TableId(5), "2024-06-01", "18:00", "19:00").await.unwrap();
        svc.book(ClientId(2), TableId(6), "2024-06-01", "18:00", "19:00").await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_overlapping_bookings_admit_exactly_one() {
        let svc = service("concurrent_book.wal");
        let n = 16;

        let mut handles = Vec::new();
        for i in 0..n {
            let svc = svc.clone();
            // Every window contains 19:00-19:30, so all pairs overlap.
            let start = format!("18:{:02}", i);
            handles.push(tokio::spawn(async move {
                svc.book(ClientId(1 + (i % 2) as u64), TableId(5), "2024-06-01", &start, "19:30").await
            }));
        }

        let (mut ok, mut conflicts) = (0, 0);
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(BookingError::SlotConflict { .. }) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, n - 1);
        assert_eq!(svc.ledger().reservations_for_table(TableId(5), None).await.len(), 1);
    }

    #[tokio::test]
    async fn listing_joins_table_and_restaurant() {
        let svc = service("listing.wal");
        svc.book(ClientId(1), TableId(5), "2024-06-01", "12:00", "13:00").await.unwrap();
        svc.book(ClientId(1), TableId(6), "2024-06-02", "20:00", "21:00").await.unwrap();
        svc.book(ClientId(2), TableId(5), "2024-06-01", "20:00", "21:00").await.unwrap();

        let mine = svc.reservations_for_client(ClientId(1)).await.unwrap();
        assert_eq!(mine.len(), 2);
        // Newest first.
        assert_eq!(mine[0].reservation.table_id, TableId(6));
        assert_eq!(mine[0].table_number, 2);
        assert_eq!(mine[1].reservation.table_id, TableId(5));
        assert_eq!(mine[1].restaurant.name, "Cantina");

        let err = svc.reservations_for_client(ClientId(42)).await.unwrap_err();
        assert!(matches!(err, BookingError::ClientNotFound(ClientId(42))));

        let date = chrono::NaiveDate::from_ymd_opt(2024, 6, 1);
        let table5 = svc.reservations_for_table(TableId(5), date).await.unwrap();
        assert_eq!(table5.len(), 2);
        assert!(svc.reservations_for_table(TableId(99), None).await.is_err());
    }
}
