use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::model::*;
use crate::window::{WindowError, parse_date};

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    RegisterClient {
        name: String,
        email: String,
        phone: String,
        secret: String,
    },
    AuthenticateClient {
        email: String,
        secret: String,
    },
    /// Date and time tokens stay raw; the booking service owns their parsing.
    BookReservation {
        client_id: ClientId,
        table_id: TableId,
        date: String,
        start: String,
        end: String,
    },
    SelectClientReservations {
        client_id: ClientId,
    },
    SelectTableReservations {
        table_id: TableId,
        date: Option<NaiveDate>,
    },
    SelectTables {
        restaurant_id: Option<RestaurantId>,
    },
    SelectRestaurants,
}

const CLIENT_COLUMNS: [&str; 4] = ["name", "email", "phone", "secret"];
const RESERVATION_COLUMNS: [&str; 5] = ["client_id", "table_id", "date", "start", "end"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        _ => return Err(SqlError::Unsupported("one statement per query".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        Statement::Delete(_) => Err(SqlError::Unsupported("reservations cannot be deleted".into())),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let row = extract_single_row(insert)?;

    match table.as_str() {
        "clients" => {
            let values = bind_columns("clients", &CLIENT_COLUMNS, &insert.columns, &row)?;
            Ok(Command::RegisterClient {
                name: parse_text(values[0])?,
                email: parse_text(values[1])?,
                phone: parse_text(values[2])?,
                secret: parse_text(values[3])?,
            })
        }
        "reservations" => {
            let values = bind_columns("reservations", &RESERVATION_COLUMNS, &insert.columns, &row)?;
            Ok(Command::BookReservation {
                client_id: ClientId(parse_u64(values[0])?),
                table_id: TableId(parse_u64(values[1])?),
                date: parse_text(values[2])?,
                start: parse_text(values[3])?,
                end: parse_text(values[4])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let filter = |col: &str| filters.iter().find(|(c, _)| c == col).map(|(_, e)| *e);

    match table.as_str() {
        "clients" => {
            only_filters(&filters, &["email", "secret"])?;
            Ok(Command::AuthenticateClient {
                email: parse_text(filter("email").ok_or(SqlError::MissingFilter("email"))?)?,
                secret: parse_text(filter("secret").ok_or(SqlError::MissingFilter("secret"))?)?,
            })
        }
        "reservations" => {
            only_filters(&filters, &["client_id", "table_id", "date"])?;
            match (filter("client_id"), filter("table_id")) {
                (Some(client), None) => {
                    if filter("date").is_some() {
                        return Err(SqlError::Unsupported("date filter requires table_id".into()));
                    }
                    Ok(Command::SelectClientReservations { client_id: ClientId(parse_u64(client)?) })
                }
                (None, Some(table)) => Ok(Command::SelectTableReservations {
                    table_id: TableId(parse_u64(table)?),
                    date: filter("date")
                        .map(|e| parse_text(e).and_then(|s| Ok(parse_date(&s)?)))
                        .transpose()?,
                }),
                (Some(_), Some(_)) => Err(SqlError::Unsupported(
                    "filter reservations by client_id or table_id, not both".into(),
                )),
                (None, None) => Err(SqlError::MissingFilter("client_id or table_id")),
            }
        }
        "tables" => {
            only_filters(&filters, &["restaurant_id"])?;
            Ok(Command::SelectTables {
                restaurant_id: filter("restaurant_id").map(parse_u64).transpose()?.map(RestaurantId),
            })
        }
        "restaurants" => {
            only_filters(&filters, &[])?;
            Ok(Command::SelectRestaurants)
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = x AND b = y AND ...` into (column, value) pairs.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, right.as_ref()));
            Ok(())
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

fn only_filters(filters: &[(String, &Expr)], allowed: &[&str]) -> Result<(), SqlError> {
    match filters.iter().find(|(c, _)| !allowed.contains(&c.as_str())) {
        Some((col, _)) => Err(SqlError::UnknownColumn(col.clone())),
        None => Ok(()),
    }
}

/// Order the row's values by `expected`, honoring an explicit column list.
fn bind_columns<'a>(
    table: &'static str,
    expected: &[&str],
    columns: &[impl std::fmt::Display],
    row: &'a [Expr],
) -> Result<Vec<&'a Expr>, SqlError> {
    if row.len() != expected.len() {
        return Err(SqlError::WrongArity(table, expected.len(), row.len()));
    }
    if columns.is_empty() {
        return Ok(row.iter().collect());
    }
    if columns.len() != row.len() {
        return Err(SqlError::WrongArity(table, columns.len(), row.len()));
    }
    let names: Vec<String> = columns
        .iter()
        .map(|c| c.to_string().trim_matches('"').to_lowercase())
        .collect();
    if let Some(unknown) = names.iter().find(|n| !expected.contains(&n.as_str())) {
        return Err(SqlError::UnknownColumn(unknown.clone()));
    }
    expected
        .iter()
        .map(|want| {
            names
                .iter()
                .position(|n| n == want)
                .map(|i| &row[i])
                .ok_or_else(|| SqlError::UnknownColumn(format!("missing column {want}")))
        })
        .collect()
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_single_row(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

/// Text column. NULL reads as empty so field validation reports it as missing.
fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(Value::Null) => Ok(String::new()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_u64(expr: &Expr) -> Result<u64, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad id {s:?}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected id, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error(transparent)]
    InvalidDate(#[from] WindowError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_register_client() {
        let sql = "INSERT INTO clients (name, email, phone, secret) VALUES ('Ana', 'ana@example.com', '5551234', 'pw')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::RegisterClient {
                name: "Ana".into(),
                email: "ana@example.com".into(),
                phone: "5551234".into(),
                secret: "pw".into(),
            }
        );
    }

    #[test]
    fn insert_columns_may_be_reordered() {
        let sql = "INSERT INTO clients (email, secret, name, phone) VALUES ('ana@example.com', 'pw', 'Ana', 5551234)";
        match parse_sql(sql).unwrap() {
            Command::RegisterClient { name, email, phone, secret } => {
                assert_eq!(name, "Ana");
                assert_eq!(email, "ana@example.com");
                assert_eq!(phone, "5551234");
                assert_eq!(secret, "pw");
            }
            other => panic!("expected RegisterClient, got {other:?}"),
        }
    }

    #[test]
    fn null_text_reads_as_empty() {
        let sql = "INSERT INTO clients VALUES (NULL, 'ana@example.com', '5551234', 'pw')";
        match parse_sql(sql).unwrap() {
            Command::RegisterClient { name, .. } => assert_eq!(name, ""),
            other => panic!("expected RegisterClient, got {other:?}"),
        }
    }

    #[test]
    fn parse_authenticate_client() {
        let sql = "SELECT * FROM clients WHERE email = 'ana@example.com' AND secret = 'pw'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::AuthenticateClient { email: "ana@example.com".into(), secret: "pw".into() }
        );
        let sql = "SELECT * FROM clients WHERE email = 'ana@example.com'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("secret"))));
    }

    #[test]
    fn parse_book_reservation() {
        let sql = r#"INSERT INTO reservations (client_id, table_id, date, start, "end") VALUES (1, 5, '2024-06-01', '18:00', '19:00')"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::BookReservation {
                client_id: ClientId(1),
                table_id: TableId(5),
                date: "2024-06-01".into(),
                start: "18:00".into(),
                end: "19:00".into(),
            }
        );
    }

    #[test]
    fn book_reservation_keeps_tokens_raw() {
        // Token validation belongs to the booking service, not the parser.
        let sql = r#"INSERT INTO reservations VALUES ('1', '5', '2024-13-45', '6pm', '2024-06-02 01:00')"#;
        match parse_sql(sql).unwrap() {
            Command::BookReservation { client_id, date, start, end, .. } => {
                assert_eq!(client_id, ClientId(1));
                assert_eq!(date, "2024-13-45");
                assert_eq!(start, "6pm");
                assert_eq!(end, "2024-06-02 01:00");
            }
            other => panic!("expected BookReservation, got {other:?}"),
        }
    }

    #[test]
    fn book_reservation_wrong_arity() {
        let sql = "INSERT INTO reservations VALUES (1, 5, '2024-06-01', '18:00')";
        assert!(matches!(parse_sql(sql), Err(SqlError::WrongArity("reservations", 5, 4))));
    }

    #[test]
    fn negative_ids_are_rejected() {
        let sql = r#"INSERT INTO reservations VALUES (-1, 5, '2024-06-01', '18:00', '19:00')"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn multi_row_insert_is_unsupported() {
        let sql = r#"INSERT INTO reservations VALUES (1, 5, '2024-06-01', '18:00', '19:00'), (1, 5, '2024-06-01', '20:00', '21:00')"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_client_reservations() {
        let sql = "SELECT * FROM reservations WHERE client_id = 7";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectClientReservations { client_id: ClientId(7) }
        );
    }

    #[test]
    fn parse_table_reservations_with_date() {
        let sql = "SELECT * FROM reservations WHERE table_id = 5 AND date = '2024-06-01'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectTableReservations {
                table_id: TableId(5),
                date: NaiveDate::from_ymd_opt(2024, 6, 1),
            }
        );
        let sql = "SELECT * FROM reservations WHERE table_id = 5";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectTableReservations { table_id: TableId(5), date: None }
        );
    }

    #[test]
    fn bad_listing_date_is_rejected() {
        let sql = "SELECT * FROM reservations WHERE table_id = 5 AND date = '06/01/2024'";
        assert!(matches!(parse_sql(sql), Err(SqlError::InvalidDate(WindowError::Malformed { .. }))));
    }

    #[test]
    fn reservation_listing_needs_one_owner() {
        assert!(matches!(
            parse_sql("SELECT * FROM reservations"),
            Err(SqlError::MissingFilter(_))
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM reservations WHERE client_id = 1 AND table_id = 5"),
            Err(SqlError::Unsupported(_))
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM reservations WHERE client_id = 1 AND date = '2024-06-01'"),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn range_filters_are_unsupported() {
        let sql = "SELECT * FROM reservations WHERE table_id >= 5";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_directory_listings() {
        assert_eq!(
            parse_sql("SELECT * FROM tables").unwrap(),
            Command::SelectTables { restaurant_id: None }
        );
        assert_eq!(
            parse_sql("SELECT * FROM tables WHERE restaurant_id = 2").unwrap(),
            Command::SelectTables { restaurant_id: Some(RestaurantId(2)) }
        );
        assert_eq!(parse_sql("SELECT * FROM restaurants").unwrap(), Command::SelectRestaurants);
        assert!(matches!(
            parse_sql("SELECT * FROM restaurants WHERE name = 'x'"),
            Err(SqlError::UnknownColumn(c)) if c == "name"
        ));
    }

    #[test]
    fn delete_is_unsupported() {
        let sql = "DELETE FROM reservations WHERE id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = "INSERT INTO foobar (id) VALUES (1)";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownTable(t)) if t == "foobar"));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn multiple_statements_are_rejected() {
        let sql = r#"SELECT * FROM tables; INSERT INTO reservations (client_id, table_id, date, start, "end") VALUES (1, 5, '2024-06-01', '18:00', '19:00')"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
        // A trailing semicolon is still a single statement.
        assert!(parse_sql("SELECT * FROM tables;").is_ok());
    }
}
