use std::fmt::Debug;
use std::io;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, METADATA_USER, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{Passwords, ReservdAuthSource};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{self, AUTH_FAILURES_TOTAL, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

pub struct ReservdHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ReservdQueryParser>,
}

impl ReservdHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ReservdQueryParser),
        }
    }

    fn session_role<C: ClientInfo>(client: &C) -> Role {
        Role::from_user(client.metadata().get(METADATA_USER).map(String::as_str))
    }

    /// Authorize, run and time one command.
    async fn dispatch(&self, role: Role, cmd: Command) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        if cmd.requires_admin() && !role.is_admin() {
            metrics::counter!(AUTH_FAILURES_TOTAL, "command" => label).increment(1);
            tracing::warn!("{role:?} session refused {label}");
            return Err(user_error("42501", format!("permission denied: {label} requires the admin role")));
        }

        let start = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::SelectAvailability { start, end } => {
                let days = engine.list_availability(start, end).await.map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let rows = days
                    .iter()
                    .map(|day| encode_day(&schema, day))
                    .collect::<Vec<_>>();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::InsertReservation(req) => {
                let created = engine.create_reservation(req).await.map_err(engine_err)?;
                Ok(reservation_response(vec![created]))
            }
            Command::SelectReservations { id: None } => {
                Ok(reservation_response(engine.list_reservations().await))
            }
            Command::SelectReservations { id: Some(id) } => {
                let found = match engine.get_reservation(id).await {
                    Ok(r) => vec![r],
                    Err(EngineError::NotFound(_)) => vec![],
                    Err(e) => return Err(engine_err(e)),
                };
                Ok(reservation_response(found))
            }
            Command::UpdateStatus { id, status } => {
                let updated = engine.update_status(id, status).await.map_err(engine_err)?;
                Ok(reservation_response(vec![updated]))
            }
            Command::DeleteReservation { id } => {
                let removed = engine.delete_reservation(id).await.map_err(engine_err)?;
                Ok(reservation_response(vec![removed]))
            }
        }
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("date"),
        text_field("slots"),
        FieldInfo::new("total_used".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("total_remaining".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("is_available".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("full_name"),
        text_field("email"),
        text_field("phone"),
        text_field("date"),
        text_field("time"),
        FieldInfo::new("number_of_people".into(), None, None, Type::INT8, FieldFormat::Text),
        text_field("status"),
        text_field("notes"),
        text_field("created_at"),
    ]
}

/// Slots as a JSON object keyed by slot label, in slot order.
fn slots_json(day: &DayAvailability) -> PgWireResult<String> {
    let mut slots = serde_json::Map::new();
    for (slot, capacity) in &day.slots {
        let value = serde_json::to_value(capacity).map_err(|e| PgWireError::ApiError(Box::new(e)))?;
        slots.insert(slot.label().to_string(), value);
    }
    Ok(serde_json::Value::Object(slots).to_string())
}

fn encode_day(schema: &Arc<Vec<FieldInfo>>, day: &DayAvailability) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&day.date.to_string())?;
    encoder.encode_field(&slots_json(day)?)?;
    encoder.encode_field(&i64::from(day.total_used))?;
    encoder.encode_field(&i64::from(day.total_remaining))?;
    encoder.encode_field(&day.is_available)?;
    Ok(encoder.take_row())
}

fn format_created_at(ms: Ms) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

fn encode_reservation(
    schema: &Arc<Vec<FieldInfo>>,
    r: &Reservation,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.full_name)?;
    encoder.encode_field(&r.email)?;
    encoder.encode_field(&r.phone)?;
    encoder.encode_field(&r.date.to_string())?;
    encoder.encode_field(&r.slot.label().to_string())?;
    encoder.encode_field(&i64::from(r.party_size))?;
    encoder.encode_field(&r.status.as_str().to_string())?;
    encoder.encode_field(&r.notes)?;
    encoder.encode_field(&format_created_at(r.created_at))?;
    Ok(encoder.take_row())
}

fn reservation_response(reservations: Vec<Reservation>) -> Response {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<_> = reservations
        .iter()
        .map(|r| encode_reservation(&schema, r))
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Result columns for a statement, decided before its parameters are bound.
/// Placeholders usually block a full parse, so fall back to the target table
/// named outside string literals.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    if let Ok(cmd) = sql::parse_sql(sql) {
        return match cmd {
            Command::SelectAvailability { .. } => availability_schema(),
            _ => reservation_schema(),
        };
    }
    let upper = outside_literals(sql).to_uppercase();
    if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("RESERVATIONS") {
        reservation_schema()
    } else {
        vec![]
    }
}

fn outside_literals(sql: &str) -> String {
    let mut in_literal = false;
    sql.chars()
        .filter(|&c| {
            if c == '\'' {
                in_literal = !in_literal;
                return false;
            }
            !in_literal
        })
        .collect()
}

#[async_trait]
impl SimpleQueryHandler for ReservdHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let role = Self::session_role(client);
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.dispatch(role, cmd).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ReservdQueryParser;

#[async_trait]
impl QueryParser for ReservdQueryParser {
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
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ReservdHandler {
    type Statement = String;
    type QueryParser = ReservdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let role = Self::session_role(client);
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.dispatch(role, cmd).await
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
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Byte range and index of every `$N` placeholder outside quoted literals and identifiers.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                // A doubled quote closes and reopens, which lands in the same place.
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'$' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((start..i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// The highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Replace placeholders with bound values (text format) in one left-to-right pass.
/// Inserted text is never rescanned, so values may themselves contain `$N` or quotes.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|idx| params.get(idx)) else {
            continue;
        };
        out.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                out.push('\'');
                out.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ReservdFactory {
    handler: Arc<ReservdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<ReservdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ReservdFactory {
    pub fn new(engine: Arc<Engine>, passwords: Passwords) -> Self {
        Self {
            handler: Arc::new(ReservdHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                ReservdAuthSource::new(passwords),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ReservdFactory {
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

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    passwords: Passwords,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(ReservdFactory::new(engine, passwords));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE and client-facing message. Storage failures carry no detail.
fn engine_error_info(e: &EngineError) -> (&'static str, String) {
    let code = match e {
        EngineError::Validation { .. } => "22023",
        EngineError::CapacityExceeded { .. } => "53400",
        EngineError::NotFound(_) => "P0002",
        EngineError::FixedState { .. } => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    };
    if e.is_transient() {
        return (code, "storage failure, the request was not applied".into());
    }
    (code, e.to_string())
}

fn engine_err(e: EngineError) -> PgWireError {
    if e.is_transient() {
        tracing::error!("storage failure: {e}");
    }
    let (code, message) = engine_error_info(&e);
    user_error(code, message)
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = if e.is_invalid_value() { "22023" } else { "42601" };
    user_error(code, e.to_string())
}
