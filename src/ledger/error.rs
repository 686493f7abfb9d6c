use thiserror::Error;

use crate::model::{ReservationId, TableId};
use crate::window::TimeWindow;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("table {table_id} already reserved for {window} by reservation {existing}")]
    Conflict {
        table_id: TableId,
        existing: ReservationId,
        window: TimeWindow,
    },
    #[error("WAL error: {0}")]
    Storage(String),
}
