use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo, QueryResponse,
    Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SharedPasswordAuthSource;
use crate::booking::{BookingError, BookingService};
use crate::identity::{ClientRegistry, IdentityError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::window::{DATE_FORMAT, TIMESTAMP_FORMAT};

pub struct TablebookHandler {
    service: Arc<BookingService>,
    clients: Arc<ClientRegistry>,
    query_parser: Arc<TablebookQueryParser>,
}

impl TablebookHandler {
    pub fn new(service: Arc<BookingService>, clients: Arc<ClientRegistry>) -> Self {
        Self {
            service,
            clients,
            query_parser: Arc::new(TablebookQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, sql: &str, format: &Format) -> PgWireResult<Response> {
        let started = Instant::now();
        let (label, result) = match sql::parse_sql(sql) {
            Ok(cmd) => {
                let label = observability::command_label(&cmd);
                (label, self.execute_command(cmd, format).await)
            }
            Err(e) => ("invalid", Err(sql_err(e))),
        };
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command, format: &Format) -> PgWireResult<Response> {
        match cmd {
            Command::RegisterClient { name, email, phone, secret } => {
                let client = self
                    .clients
                    .register(&name, &email, &phone, &secret)
                    .await
                    .map_err(identity_err)?;
                rows(client_schema(format), [client], encode_client)
            }
            Command::AuthenticateClient { email, secret } => {
                let id = self.clients.verify_credentials(&email, &secret).map_err(identity_err)?;
                let client = self
                    .clients
                    .get(id)
                    .ok_or_else(|| identity_err(IdentityError::InvalidCredentials))?;
                rows(client_schema(format), [client], encode_client)
            }
            Command::BookReservation { client_id, table_id, date, start, end } => {
                let reservation = self
                    .service
                    .book(client_id, table_id, &date, &start, &end)
                    .await
                    .map_err(booking_err)?;
                rows(reservation_schema(format), [reservation], encode_reservation)
            }
            Command::SelectClientReservations { client_id } => {
                let details = self
                    .service
                    .reservations_for_client(client_id)
                    .await
                    .map_err(booking_err)?;
                rows(reservation_detail_schema(format), details, encode_reservation_detail)
            }
            Command::SelectTableReservations { table_id, date } => {
                let details = self
                    .service
                    .reservations_for_table(table_id, date)
                    .await
                    .map_err(booking_err)?;
                rows(reservation_detail_schema(format), details, encode_reservation_detail)
            }
            Command::SelectTables { restaurant_id } => {
                let tables = self.service.directory().tables(restaurant_id);
                rows(table_schema(format), tables, encode_table)
            }
            Command::SelectRestaurants => {
                let restaurants = self.service.directory().restaurants();
                rows(restaurant_schema(format), restaurants, encode_restaurant)
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn rows<T>(
    schema: Vec<FieldInfo>,
    items: impl IntoIterator<Item = T>,
    encode: fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, &item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn fields(columns: &[(&str, Type)], format: &Format) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| FieldInfo::new((*name).into(), None, None, ty.clone(), format.format_for(i)))
        .collect()
}

fn client_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("id", Type::INT8),
            ("name", Type::VARCHAR),
            ("email", Type::VARCHAR),
            ("phone", Type::VARCHAR),
        ],
        format,
    )
}

const RESERVATION_COLUMNS: [(&str, Type); 6] = [
    ("id", Type::VARCHAR),
    ("client_id", Type::INT8),
    ("table_id", Type::INT8),
    ("date", Type::VARCHAR),
    ("start", Type::VARCHAR),
    ("end", Type::VARCHAR),
];

fn reservation_schema(format: &Format) -> Vec<FieldInfo> {
    fields(&RESERVATION_COLUMNS, format)
}

fn reservation_detail_schema(format: &Format) -> Vec<FieldInfo> {
    let mut columns = RESERVATION_COLUMNS.to_vec();
    columns.extend([
        ("table_number", Type::INT8),
        ("table_capacity", Type::INT8),
        ("restaurant_id", Type::INT8),
        ("restaurant_name", Type::VARCHAR),
        ("restaurant_address", Type::VARCHAR),
        ("restaurant_phone", Type::VARCHAR),
    ]);
    fields(&columns, format)
}

fn table_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("id", Type::INT8),
            ("number", Type::INT8),
            ("capacity", Type::INT8),
            ("restaurant_id", Type::INT8),
        ],
        format,
    )
}

fn restaurant_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("id", Type::INT8),
            ("name", Type::VARCHAR),
            ("address", Type::VARCHAR),
            ("phone", Type::VARCHAR),
            ("capacity", Type::INT8),
        ],
        format,
    )
}

fn int8(v: impl Into<u64>) -> i64 {
    i64::try_from(v.into()).unwrap_or(i64::MAX)
}

fn encode_client(e: &mut DataRowEncoder, c: &Client) -> PgWireResult<()> {
    e.encode_field(&int8(c.id.0))?;
    e.encode_field(&c.name)?;
    e.encode_field(&c.email)?;
    e.encode_field(&c.phone)
}

fn encode_reservation(e: &mut DataRowEncoder, r: &Reservation) -> PgWireResult<()> {
    e.encode_field(&r.id.to_string())?;
    e.encode_field(&int8(r.client_id.0))?;
    e.encode_field(&int8(r.table_id.0))?;
    e.encode_field(&r.date().format(DATE_FORMAT).to_string())?;
    e.encode_field(&r.start().format(TIMESTAMP_FORMAT).to_string())?;
    e.encode_field(&r.end().format(TIMESTAMP_FORMAT).to_string())
}

fn encode_reservation_detail(e: &mut DataRowEncoder, d: &ReservationDetail) -> PgWireResult<()> {
    encode_reservation(e, &d.reservation)?;
    e.encode_field(&int8(d.table_number))?;
    e.encode_field(&int8(d.table_capacity))?;
    e.encode_field(&int8(d.restaurant.id.0))?;
    e.encode_field(&d.restaurant.name)?;
    e.encode_field(&d.restaurant.address)?;
    e.encode_field(&d.restaurant.phone)
}

fn encode_table(e: &mut DataRowEncoder, t: &Table) -> PgWireResult<()> {
    e.encode_field(&int8(t.id.0))?;
    e.encode_field(&int8(t.number))?;
    e.encode_field(&int8(t.capacity))?;
    e.encode_field(&int8(t.restaurant_id.0))
}

fn encode_restaurant(e: &mut DataRowEncoder, r: &Restaurant) -> PgWireResult<()> {
    e.encode_field(&int8(r.id.0))?;
    e.encode_field(&r.name)?;
    e.encode_field(&r.address)?;
    e.encode_field(&r.phone)?;
    e.encode_field(&int8(r.capacity))
}

/// Result columns for a statement, decided from its verb and target table.
fn describe_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    let words: Vec<String> = sql
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';' || c == ',')
        .filter(|w| !w.is_empty())
        .map(|w| w.trim_matches('"').to_lowercase())
        .collect();
    let verb = words.first().map(String::as_str);
    let target = words
        .windows(2)
        .find(|w| w[0] == "from" || w[0] == "into")
        .map(|w| w[1].as_str());
    match (verb, target) {
        (Some("insert"), Some("reservations")) => reservation_schema(format),
        (Some("select"), Some("reservations")) => reservation_detail_schema(format),
        (Some("insert" | "select"), Some("clients")) => client_schema(format),
        (Some("select"), Some("tables")) => table_schema(format),
        (Some("select"), Some("restaurants")) => restaurant_schema(format),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for TablebookHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query, &Format::UnifiedText).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TablebookQueryParser;

#[async_trait]
impl QueryParser for TablebookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(describe_schema(stmt, column_format.unwrap_or(&Format::UnifiedBinary)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for TablebookHandler {
    type Statement = String;
    type QueryParser = TablebookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(&sql, &portal.result_column_format).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            describe_schema(&target.statement, &Format::UnifiedBinary),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(describe_schema(
            &target.statement.statement,
            &target.result_column_format,
        )))
    }
}

enum Piece<'a> {
    Text(&'a str),
    Param(usize),
}

/// Split `sql` into literal text and `$N` placeholders (N >= 1). Placeholders
/// inside single-quoted strings or double-quoted identifiers stay text.
fn split_placeholders(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut pieces = Vec::new();
    let mut quote: Option<u8> = None;
    let mut text_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote closes and immediately reopens, which is equivalent.
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let digits = bytes[i + 1..].iter().take_while(|d| d.is_ascii_digit()).count();
                let n = sql[i + 1..i + 1 + digits].parse::<usize>().unwrap_or(0);
                if n > 0 {
                    pieces.push(Piece::Text(&sql[text_start..i]));
                    pieces.push(Piece::Param(n));
                    i += 1 + digits;
                    text_start = i;
                    continue;
                }
            }
            None => {}
        }
        i += 1;
    }
    pieces.push(Piece::Text(&sql[text_start..]));
    pieces
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    split_placeholders(sql)
        .iter()
        .filter_map(|p| match p {
            Piece::Param(n) => Some(*n),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<&[u8]>> = portal.parameters.iter().map(|p| p.as_deref()).collect();
    substitute(&portal.statement.statement, &params)
}

/// One left-to-right pass: bound values are emitted as quoted literals and
/// never rescanned. Placeholders without a bound value are left as written.
fn substitute(sql: &str, params: &[Option<&[u8]>]) -> String {
    let mut result = String::with_capacity(sql.len());
    for piece in split_placeholders(sql) {
        match piece {
            Piece::Text(text) => result.push_str(text),
            Piece::Param(n) => match params.get(n - 1) {
                Some(Some(bytes)) => {
                    let text = String::from_utf8_lossy(bytes);
                    result.push('\'');
                    result.push_str(&text.replace('\'', "''"));
                    result.push('\'');
                }
                Some(None) => result.push_str("NULL"),
                None => {
                    result.push('$');
                    result.push_str(&n.to_string());
                }
            },
        }
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct TablebookFactory {
    handler: Arc<TablebookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SharedPasswordAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl TablebookFactory {
    pub fn new(service: Arc<BookingService>, clients: Arc<ClientRegistry>, password: String) -> Self {
        let auth_source = SharedPasswordAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(TablebookHandler::new(service, clients)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TablebookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    service: Arc<BookingService>,
    clients: Arc<ClientRegistry>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(TablebookFactory::new(service, clients, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn booking_sqlstate(e: &BookingError) -> &'static str {
    match e {
        BookingError::MalformedInput(_) => "22007",
        BookingError::InvalidWindow(_) => "22023",
        BookingError::TableNotFound(_) | BookingError::ClientNotFound(_) => "23503",
        BookingError::SlotConflict { .. } => "23P01",
        BookingError::StorageUnavailable(_) => "58030",
    }
}

fn identity_sqlstate(e: &IdentityError) -> &'static str {
    match e {
        IdentityError::MissingField(_) | IdentityError::LimitExceeded(_) => "22023",
        IdentityError::EmailTaken(_) => "23505",
        IdentityError::InvalidCredentials => "28P01",
        IdentityError::Storage(_) => "58030",
    }
}

fn sql_sqlstate(e: &SqlError) -> &'static str {
    match e {
        SqlError::InvalidDate(_) => "22007",
        _ => "42601",
    }
}

fn booking_err(e: BookingError) -> PgWireError {
    user_error(booking_sqlstate(&e), e.to_string())
}

fn identity_err(e: IdentityError) -> PgWireError {
    user_error(identity_sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(sql_sqlstate(&e), e.to_string())
}
