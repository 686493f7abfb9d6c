use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::window::TimeWindow;

/// Milliseconds on the naive local timeline. Only used for interval arithmetic.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

macro_rules! numeric_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(ClientId);
numeric_id!(TableId);
numeric_id!(RestaurantId);

pub type ReservationId = Ulid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub email: String,
    pub phone: String,
    /// Opaque credential handed over by the authentication layer.
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: RestaurantId,
    pub name: String,
    pub address: String,
    pub phone: String,
    /// Total seats across the dining room.
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    /// Number printed on the table, unique only within its restaurant.
    pub number: u32,
    pub capacity: u32,
    pub restaurant_id: RestaurantId,
}

/// A confirmed booking of one table for one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: ReservationId,
    pub client_id: ClientId,
    pub table_id: TableId,
    pub window: TimeWindow,
}

impl Reservation {
    pub fn date(&self) -> NaiveDate {
        self.window.date
    }

    pub fn start(&self) -> NaiveDateTime {
        self.window.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.window.end
    }

    pub fn span(&self) -> Span {
        self.window.span()
    }
}

/// Per-table booking state. The unit of locking in the ledger.
#[derive(Debug, Clone)]
pub struct TableState {
    pub id: TableId,
    /// Sorted by `window.start`. Pairwise non-overlapping.
    pub reservations: Vec<Reservation>,
}

impl TableState {
    pub fn new(id: TableId) -> Self {
        Self {
            id,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by start.
    pub fn insert(&mut self, reservation: Reservation) {
        let start = reservation.span().start;
        let pos = self
            .reservations
            .binary_search_by_key(&start, |r| r.span().start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    /// Reservations whose window overlaps `query`.
    /// Everything starting at or after `query.end` is skipped by binary search.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span().start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span().end > query.start)
    }
}

/// WAL record format. Flat, one variant per durable fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ClientRegistered {
        id: ClientId,
        name: String,
        email: String,
        phone: String,
        secret: String,
    },
    ReservationConfirmed {
        id: ReservationId,
        client_id: ClientId,
        table_id: TableId,
        date: NaiveDate,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

impl Event {
    pub fn reservation_confirmed(r: &Reservation) -> Self {
        Event::ReservationConfirmed {
            id: r.id,
            client_id: r.client_id,
            table_id: r.table_id,
            date: r.window.date,
            start: r.window.start,
            end: r.window.end,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// A reservation joined with its table and restaurant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDetail {
    pub reservation: Reservation,
    pub table_number: u32,
    pub table_capacity: u32,
    pub restaurant: Restaurant,
}
