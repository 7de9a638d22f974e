use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream, Sink, SinkExt};
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use ulid::Ulid;

use crate::auth::GridlaneAuthSource;
use crate::engine::{Engine, EngineError};
use crate::grid::{DayLayout, GridLayout};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

const CHANNEL_PREFIX: &str = "calendar_";

/// Query handler for one client connection. Holds that connection's LISTEN
/// subscriptions; pending notifications are flushed ahead of each response.
pub struct GridlaneHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<GridlaneQueryParser>,
    subscriptions: Mutex<HashMap<Ulid, broadcast::Receiver<Event>>>,
}

impl GridlaneHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(GridlaneQueryParser),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Send every queued event for this connection's channels.
    async fn flush_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let mut pending = Vec::new();
        {
            let mut subs = self.subscriptions.lock().await;
            // a closed channel means the calendar was deleted
            subs.retain(|calendar_id, rx| loop {
                match rx.try_recv() {
                    Ok(event) => pending.push((*calendar_id, event)),
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        tracing::warn!("listener on calendar {calendar_id} lagged by {n} events");
                    }
                    Err(broadcast::error::TryRecvError::Empty) => break true,
                    Err(broadcast::error::TryRecvError::Closed) => break false,
                }
            });
        }
        for (calendar_id, event) in pending {
            let payload = serde_json::to_string(&event)
                .map_err(|e| user_error("XX000", format!("notification encoding: {e}")))?;
            client
                .send(PgWireBackendMessage::NotificationResponse(NotificationResponse::new(
                    0,
                    format!("{CHANNEL_PREFIX}{calendar_id}"),
                    payload,
                )))
                .await?;
        }
        Ok(())
    }

    async fn run<C>(
        &self,
        client: &mut C,
        query: &str,
        format: &Format,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&engine, cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        self.flush_notifications(client).await?;
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
        format: &Format,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertCalendar { id, name } => {
                engine.create_calendar(id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteCalendar { id } => {
                engine.delete_calendar(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertAppointment {
                id,
                calendar_id,
                start,
                end,
                title,
            } => {
                engine
                    .schedule_appointment(id, calendar_id, start, end, title)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::BatchInsertAppointments { appointments } => {
                let count = appointments.len();
                engine
                    .batch_schedule_appointments(appointments)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::MoveAppointment { id, start, end } => {
                engine.move_appointment(id, start, end).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteAppointment { id } => {
                engine.cancel_appointment(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectCalendars => {
                let schema = Arc::new(schema(CALENDAR_COLUMNS, format));
                let rows: Vec<PgWireResult<_>> = engine
                    .list_calendars()
                    .await
                    .into_iter()
                    .map(|cal| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&cal.id.to_string())?;
                        encoder.encode_field(&cal.name)?;
                        encoder.encode_field(&(cal.appointment_count as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAppointments { calendar_id } => {
                let schema = Arc::new(schema(APPOINTMENT_COLUMNS, format));
                let rows: Vec<PgWireResult<_>> = engine
                    .get_appointments(calendar_id)
                    .await
                    .into_iter()
                    .map(|a| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&a.id.to_string())?;
                        encoder.encode_field(&a.calendar_id.to_string())?;
                        encoder.encode_field(&a.start)?;
                        encoder.encode_field(&a.end)?;
                        encoder.encode_field(&a.title)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectLayout {
                calendar_id,
                view,
                json,
            } => {
                let layout = engine
                    .grid_layout(calendar_id, &view)
                    .await
                    .map_err(engine_err)?;
                if json {
                    let schema = Arc::new(schema(LAYOUT_JSON_COLUMNS, format));
                    let doc = serde_json::to_string(&layout)
                        .map_err(|e| user_error("XX000", format!("layout encoding: {e}")))?;
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&doc)?;
                    let rows = vec![Ok(encoder.take_row())];
                    return Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))]);
                }
                let schema = Arc::new(schema(LAYOUT_COLUMNS, format));
                let rows: Vec<PgWireResult<_>> = layout_rows(&layout)
                    .map(|(day, node_layout, node)| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&day)?;
                        encoder.encode_field(&node.entry.id.to_string())?;
                        encoder.encode_field(&node.entry.span.start)?;
                        encoder.encode_field(&node.entry.span.end)?;
                        encoder.encode_field(&(node.level as i32))?;
                        encoder.encode_field(&(node.width as i32))?;
                        encoder.encode_field(&(node_layout.max_level as i32))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::Listen { channel } => {
                let calendar_id = channel
                    .strip_prefix(CHANNEL_PREFIX)
                    .ok_or_else(|| {
                        user_error(
                            "42000",
                            format!("invalid channel: {channel} (expected {CHANNEL_PREFIX}{{id}})"),
                        )
                    })
                    .and_then(|id| {
                        Ulid::from_string(id)
                            .map_err(|e| user_error("42000", format!("bad ULID in channel: {e}")))
                    })?;
                let mut subs = self.subscriptions.lock().await;
                if !subs.contains_key(&calendar_id) {
                    // subscribe before the lookup so a concurrent delete closes it
                    let rx = engine.notify.subscribe(calendar_id);
                    if engine.get_calendar(&calendar_id).is_none() {
                        drop(rx);
                        engine.notify.remove_if_idle(&calendar_id);
                        return Err(engine_err(EngineError::NotFound(calendar_id)));
                    }
                    subs.insert(calendar_id, rx);
                }
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

/// Blocker rows first (day `all-day`), then each day column in date order.
fn layout_rows(
    layout: &GridLayout,
) -> impl Iterator<Item = (String, &DayLayout, &crate::grid::LayoutNode)> {
    let blockers = layout
        .blockers
        .nodes
        .iter()
        .map(|node| ("all-day".to_string(), &layout.blockers, node));
    let days = layout.days.iter().flat_map(|(day, day_layout)| {
        day_layout
            .nodes
            .iter()
            .map(move |node| (day.to_string(), day_layout, node))
    });
    blockers.chain(days)
}

const CALENDAR_COLUMNS: &[(&str, Type)] = &[
    ("id", Type::VARCHAR),
    ("name", Type::VARCHAR),
    ("appointment_count", Type::INT8),
];

const APPOINTMENT_COLUMNS: &[(&str, Type)] = &[
    ("id", Type::VARCHAR),
    ("calendar_id", Type::VARCHAR),
    ("start", Type::INT8),
    ("end", Type::INT8),
    ("title", Type::VARCHAR),
];

const LAYOUT_COLUMNS: &[(&str, Type)] = &[
    ("day", Type::VARCHAR),
    ("appointment_id", Type::VARCHAR),
    ("start", Type::INT8),
    ("end", Type::INT8),
    ("level", Type::INT4),
    ("width", Type::INT4),
    ("max_level", Type::INT4),
];

const LAYOUT_JSON_COLUMNS: &[(&str, Type)] = &[("layout", Type::VARCHAR)];

fn schema(columns: &[(&str, Type)], format: &Format) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            FieldInfo::new((*name).into(), None, None, ty.clone(), format.format_for(i))
        })
        .collect()
}

/// Result columns for a statement, from the table it selects from.
fn result_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    if !lower.trim_start().starts_with("select") {
        return Vec::new();
    }
    let table = lower
        .split(" from ")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .map(|t| t.trim_matches(|c| c == ';' || c == '"'));
    let columns = match table {
        Some("calendars") => CALENDAR_COLUMNS,
        Some("appointments") => APPOINTMENT_COLUMNS,
        Some("layout") => LAYOUT_COLUMNS,
        Some("layout_json") => LAYOUT_JSON_COLUMNS,
        _ => return Vec::new(),
    };
    schema(columns, format)
}

#[async_trait]
impl SimpleQueryHandler for GridlaneHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query, &Format::UnifiedText).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct GridlaneQueryParser;

#[async_trait]
impl QueryParser for GridlaneQueryParser {
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
        Ok(result_schema(
            stmt,
            column_format.unwrap_or(&Format::UnifiedText),
        ))
    }
}

#[async_trait]
impl ExtendedQueryHandler for GridlaneHandler {
    type Statement = String;
    type QueryParser = GridlaneQueryParser;

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
        let sql = substitute_params(portal);
        let mut responses = self
            .run(client, &sql, &portal.result_column_format)
            .await?;
        responses
            .pop()
            .ok_or_else(|| user_error("XX000", "statement produced no response".into()))
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
            result_schema(&target.statement, &Format::UnifiedText),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
            &target.result_column_format,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0;
    let mut i = 0;
    while i < bytes.len() {
        i += 1;
        if bytes[i - 1] != b'$' {
            continue;
        }
        let digits = bytes[i..].iter().take_while(|b| b.is_ascii_digit()).count();
        if let Ok(n) = sql[i..i + digits].parse::<usize>() {
            max = max.max(n);
        }
        i += digits;
    }
    max
}

/// Inline bound text parameters as quoted literals, highest index first so
/// `$1` never clobbers `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

pub struct GridlaneFactory {
    handler: Arc<GridlaneHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<GridlaneAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl GridlaneFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(GridlaneHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                GridlaneAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for GridlaneFactory {
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

/// Serve one client socket until it disconnects. Each connection gets its
/// own handler so LISTEN state is never shared.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(GridlaneFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error("P0001", e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
