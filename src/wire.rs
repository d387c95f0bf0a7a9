use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream, Sink, SinkExt};
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
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
use tokio::sync::broadcast::{self, error::TryRecvError};
use ulid::Ulid;

use crate::auth::{CoversAuthSource, Credentials};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::notify::{self, Notice};
use crate::observability;
use crate::sql::{self, Command, Shape, SqlError};
use crate::tenant::TenantManager;

/// Per-connection handler. Owns the connection's LISTEN subscriptions.
pub struct CoversHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<CoversQueryParser>,
    subscriptions: Mutex<HashMap<String, broadcast::Receiver<Notice>>>,
}

impl CoversHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(CoversQueryParser),
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

    fn subscriptions(&self) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Receiver<Notice>>> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Everything queued on this connection's channels, oldest first per channel.
    fn take_pending(&self) -> Vec<(String, String)> {
        let mut pending = Vec::new();
        self.subscriptions().retain(|channel, rx| loop {
            match rx.try_recv() {
                Ok(notice) => pending.push((channel.clone(), notice.payload())),
                Err(TryRecvError::Empty) => break true,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("listener on {channel} lagged, {skipped} notifications dropped");
                }
                Err(TryRecvError::Closed) => break false,
            }
        });
        pending
    }

    async fn deliver_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        let pid = std::process::id() as i32;
        for (channel, payload) in self.take_pending() {
            client
                .send(PgWireBackendMessage::NotificationResponse(
                    NotificationResponse::new(pid, channel, payload),
                ))
                .await?;
        }
        Ok(())
    }

    /// Parse, execute and record metrics for one statement, then flush any
    /// notifications queued for this connection. Rows are encoded in the
    /// result format the client asked for.
    async fn run_statement<C>(&self, client: &mut C, query: &str, format: &Format) -> PgWireResult<Response>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let result = match sql::parse_sql(query) {
            Ok(cmd) => {
                let label = observability::command_label(&cmd);
                let started = Instant::now();
                let result = match self.resolve_engine(client) {
                    Ok(engine) => self.execute_command(&engine, cmd, format).await,
                    Err(e) => Err(e),
                };
                let status = if result.is_ok() { "ok" } else { "error" };
                metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
                    .increment(1);
                metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
                    .record(started.elapsed().as_secs_f64());
                result
            }
            Err(e) => {
                metrics::counter!(observability::QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                    .increment(1);
                Err(sql_err(e))
            }
        };
        self.deliver_notifications(client).await?;
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
        format: &Format,
    ) -> PgWireResult<Response> {
        match cmd {
            Command::CreateReservation(candidate) => {
                let outcome = engine.create(candidate).await.map_err(engine_err)?;
                Ok(outcome_response(format, None, outcome))
            }
            Command::ChangeStatus { id, status } => {
                let outcome = engine.change_status(id, status).await.map_err(engine_err)?;
                Ok(outcome_response(format, Some(id), outcome))
            }
            Command::CancelReservation { id } => {
                let outcome = engine.cancel(id).await.map_err(engine_err)?;
                Ok(outcome_response(format, Some(id), outcome))
            }
            Command::EditReservation { id, edit } => {
                let outcome = engine.edit(id, edit).await.map_err(engine_err)?;
                Ok(outcome_response(format, Some(id), outcome))
            }
            Command::AssignTable { id, table } => {
                let updated = engine.assign_table(id, table).await.map_err(engine_err)?;
                Ok(outcome_response(format, Some(id), Outcome::Done(updated)))
            }
            Command::SetRules(update) => {
                engine
                    .set_rules_keeping_capacity(update.into_rules(Default::default()))
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SetPeriodCapacity { period, capacity } => {
                engine
                    .set_period_capacity(&period, capacity)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpsertPeriod(period) => {
                engine.upsert_period(period).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeletePeriod { id } => {
                engine.remove_period(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectAvailability {
                date,
                period,
                adults,
                children,
            } => {
                let decision = engine
                    .check(date, &period, adults.saturating_add(children))
                    .await;
                let remaining = engine.remaining(date, &period).await;
                let row = (date, period, decision, remaining);
                let schema = with_format(availability_schema(), format);
                rows_response(schema, vec![row], |enc, (date, period, decision, remaining)| {
                    let reason = match decision {
                        Decision::Accept => None,
                        Decision::Reject(reason) => Some(reason.code().to_string()),
                    };
                    enc.encode_field(&date.to_string())?;
                    enc.encode_field(period)?;
                    enc.encode_field(&decision.is_accept())?;
                    enc.encode_field(&reason)?;
                    enc.encode_field(&remaining.map(i64::from))
                })
            }
            Command::SelectReservations { id, filter } => {
                let reservations = match id {
                    Some(id) => engine
                        .get(id)
                        .into_iter()
                        .filter(|r| filter.matches(r))
                        .collect(),
                    None => engine.list(&filter).await.map_err(engine_err)?,
                };
                rows_response(with_format(reservations_schema(), format), reservations, encode_reservation)
            }
            Command::SelectSummaries { from, to } => {
                let summaries = engine.summaries(from, to).await.map_err(engine_err)?;
                rows_response(with_format(summaries_schema(), format), summaries, |enc, s| {
                    enc.encode_field(&s.date.to_string())?;
                    enc.encode_field(&s.weekday.to_string().to_lowercase())?;
                    enc.encode_field(&s.period)?;
                    enc.encode_field(&i64::from(s.reservation_count))?;
                    enc.encode_field(&i64::from(s.guest_count))
                })
            }
            Command::SelectPeriods { date } => {
                let periods = match date {
                    Some(date) => engine.open_periods(date).await.map_err(engine_err)?,
                    None => engine.periods().await,
                };
                rows_response(with_format(periods_schema(), format), periods, encode_period)
            }
            Command::SelectRules => {
                let rules: Vec<BookingRules> = engine.rules().await.into_iter().collect();
                rows_response(with_format(rules_schema(), format), rules, |enc, r| {
                    let capacity = serde_json::to_string(&r.period_capacity)
                        .map_err(|e| user_error("XX000", e.to_string()))?;
                    enc.encode_field(&i64::from(r.min_party_size))?;
                    enc.encode_field(&i64::from(r.max_party_size))?;
                    enc.encode_field(&r.same_day_cutoff.format("%H:%M:%S").to_string())?;
                    enc.encode_field(&r.closed_weekdays.to_string())?;
                    enc.encode_field(&capacity)
                })
            }
            Command::Listen { channel } => {
                if !notify::is_known_channel(&channel) {
                    return Err(user_error(
                        "42000",
                        format!("invalid channel: {channel} (expected reservations or reservations_YYYYMMDD)"),
                    ));
                }
                self.subscriptions()
                    .entry(channel)
                    .or_insert_with_key(|channel| engine.notify.subscribe(channel));
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::Unlisten { channel } => {
                self.subscriptions().remove(&channel);
                engine.notify.prune();
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
            Command::UnlistenAll => {
                self.subscriptions().clear();
                engine.notify.prune();
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn outcome_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("accepted", Type::BOOL),
        field("reason", Type::VARCHAR),
        field("message", Type::VARCHAR),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("date", Type::VARCHAR),
        field("period", Type::VARCHAR),
        field("accepted", Type::BOOL),
        field("reason", Type::VARCHAR),
        field("remaining", Type::INT8),
    ]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("client_id", Type::VARCHAR),
        field("party_name", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("period", Type::VARCHAR),
        field("adults", Type::INT8),
        field("children", Type::INT8),
        field("party_size", Type::INT8),
        field("status", Type::VARCHAR),
        field("source", Type::VARCHAR),
        field("table_label", Type::VARCHAR),
        field("notes", Type::VARCHAR),
        field("is_birthday", Type::BOOL),
        field("created_at", Type::INT8),
        field("updated_at", Type::INT8),
    ]
}

fn summaries_schema() -> Vec<FieldInfo> {
    vec![
        field("date", Type::VARCHAR),
        field("weekday", Type::VARCHAR),
        field("period", Type::VARCHAR),
        field("reservation_count", Type::INT8),
        field("guest_count", Type::INT8),
    ]
}

fn periods_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("weekday", Type::VARCHAR),
        field("specific_date", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("active", Type::BOOL),
        field("capacity_override", Type::INT8),
    ]
}

fn rules_schema() -> Vec<FieldInfo> {
    vec![
        field("min_party_size", Type::INT8),
        field("max_party_size", Type::INT8),
        field("same_day_cutoff", Type::VARCHAR),
        field("closed_weekdays", Type::VARCHAR),
        field("period_capacity", Type::VARCHAR),
    ]
}

/// Per-column text or binary, as requested at bind time. Columns the
/// client gave no code for stay text.
fn with_format(schema: Vec<FieldInfo>, format: &Format) -> Vec<FieldInfo> {
    schema
        .into_iter()
        .enumerate()
        .map(|(i, f)| {
            let wanted = match format {
                Format::Individual(codes) if i >= codes.len() => FieldFormat::Text,
                _ => format.format_for(i),
            };
            FieldInfo::new(f.name().into(), f.table_id(), f.column_id(), f.datatype().clone(), wanted)
        })
        .collect()
}

fn schema_for(shape: Shape) -> Vec<FieldInfo> {
    match shape {
        Shape::None => vec![],
        Shape::Outcome => outcome_schema(),
        Shape::Availability => availability_schema(),
        Shape::Reservations => reservations_schema(),
        Shape::Summaries => summaries_schema(),
        Shape::Periods => periods_schema(),
        Shape::Rules => rules_schema(),
    }
}

fn rows_response<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// One row: the affected reservation, or why the request was turned down.
fn outcome_response(format: &Format, id: Option<Ulid>, outcome: Outcome<Reservation>) -> Response {
    let schema = Arc::new(with_format(outcome_schema(), format));
    let mut encoder = DataRowEncoder::new(schema.clone());
    let encoded = match &outcome {
        Outcome::Done(r) => encode_outcome(
            &mut encoder,
            Some(r.id),
            Some(r.status),
            None,
        ),
        Outcome::Rejected(reason) => encode_outcome(&mut encoder, id, None, Some(*reason)),
    };
    let row = encoded.map(|()| encoder.take_row());
    Response::Query(QueryResponse::new(schema, stream::iter(vec![row])))
}

fn encode_outcome(
    enc: &mut DataRowEncoder,
    id: Option<Ulid>,
    status: Option<Status>,
    reason: Option<RejectReason>,
) -> PgWireResult<()> {
    enc.encode_field(&id.map(|id| id.to_string()))?;
    enc.encode_field(&status.map(|s| s.to_string()))?;
    enc.encode_field(&reason.is_none())?;
    enc.encode_field(&reason.map(|r| r.code().to_string()))?;
    enc.encode_field(&reason.map(|r| r.to_string()))
}

fn encode_reservation(enc: &mut DataRowEncoder, r: &Reservation) -> PgWireResult<()> {
    let d = &r.details;
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.client_id)?;
    enc.encode_field(&d.party_name)?;
    enc.encode_field(&d.date.to_string())?;
    enc.encode_field(&d.period)?;
    enc.encode_field(&i64::from(d.adults))?;
    enc.encode_field(&i64::from(d.children))?;
    enc.encode_field(&i64::from(r.party_size()))?;
    enc.encode_field(&r.status.to_string())?;
    enc.encode_field(&r.source.as_str().to_string())?;
    enc.encode_field(&r.table)?;
    enc.encode_field(&d.notes)?;
    enc.encode_field(&d.is_birthday)?;
    enc.encode_field(&r.created_at)?;
    enc.encode_field(&r.updated_at)
}

fn encode_period(enc: &mut DataRowEncoder, p: &Period) -> PgWireResult<()> {
    let (weekday, specific_date) = match p.recurrence {
        Recurrence::Weekly(day) => (Some(day.to_string().to_lowercase()), None),
        Recurrence::On(date) => (None, Some(date.to_string())),
    };
    enc.encode_field(&p.id.to_string())?;
    enc.encode_field(&weekday)?;
    enc.encode_field(&specific_date)?;
    enc.encode_field(&p.name)?;
    enc.encode_field(&p.start_time.format("%H:%M:%S").to_string())?;
    enc.encode_field(&p.end_time.format("%H:%M:%S").to_string())?;
    enc.encode_field(&p.active)?;
    enc.encode_field(&p.capacity_override.map(i64::from))
}

// ── Simple Query Protocol ────────────────────────────────────────

#[async_trait]
impl SimpleQueryHandler for CoversHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run_statement(client, query, &Format::UnifiedText).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CoversQueryParser;

#[async_trait]
impl QueryParser for CoversQueryParser {
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
        let schema = schema_for(sql::statement_shape(stmt));
        Ok(match column_format {
            Some(format) => with_format(schema, format),
            None => schema,
        })
    }
}

#[async_trait]
impl ExtendedQueryHandler for CoversHandler {
    type Statement = String;
    type QueryParser = CoversQueryParser;

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
        self.run_statement(client, &sql, &portal.result_column_format).await
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
        let schema = schema_for(sql::statement_shape(&target.statement));
        Ok(DescribeStatementResponse::new(param_types, schema))
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
        let schema = schema_for(sql::statement_shape(&target.statement.statement));
        Ok(DescribePortalResponse::new(with_format(schema, &target.result_column_format)))
    }
}

/// Count the highest $N parameter placeholder outside quoted literals.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let mut in_quote = false;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_quote = !in_quote;
                i += 1;
            }
            b'$' if !in_quote => {
                i += 1;
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    max = max.max(n);
                }
            }
            _ => i += 1,
        }
    }
    max
}

/// Substitute $1, $2, ... with bound parameter values as quoted literals.
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_params(&portal.statement.statement, &params)
}

/// One left-to-right pass over the statement text. Bound values are never
/// rescanned, and `$N` inside a quoted literal stays literal.
fn bind_params(sql: &str, params: &[Option<String>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut in_quote = false;
    let mut rest = sql;
    while let Some(c) = rest.chars().next() {
        if c == '\'' {
            in_quote = !in_quote;
        } else if c == '$' && !in_quote {
            let digits = rest[1..].bytes().take_while(u8::is_ascii_digit).count();
            let index = rest[1..1 + digits].parse::<usize>().ok();
            if let Some(param) = index.and_then(|n| n.checked_sub(1)).and_then(|i| params.get(i)) {
                match param {
                    Some(text) => {
                        result.push('\'');
                        result.push_str(&text.replace('\'', "''"));
                        result.push('\'');
                    }
                    None => result.push_str("NULL"),
                }
                rest = &rest[1 + digits..];
                continue;
            }
        }
        result.push(c);
        rest = &rest[c.len_utf8()..];
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CoversFactory {
    handler: Arc<CoversHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<CoversAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CoversFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, credentials: Credentials) -> Self {
        let auth_source = CoversAuthSource::new(credentials);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CoversHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CoversFactory {
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

/// Serve one client connection until it closes. Subscriptions live and die
/// with the connection.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    credentials: Credentials,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = CoversFactory::new(tenant_manager, credentials);
    pgwire::tokio::process_socket(socket, tls, factory)
        .await
        .map_err(io::Error::other)
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::TenantNotConfigured
        | EngineError::InvalidTransition { .. }
        | EngineError::ReservationCanceled(_) => "55000",
        EngineError::InvalidRules(_)
        | EngineError::InvalidPeriod(_)
        | EngineError::InvalidReservation(_)
        | EngineError::UnknownPeriod(_)
        | EngineError::DuplicatePeriodName(_)
        | EngineError::LimitExceeded(_) => "22023",
        EngineError::Contention(_) => "40001",
        EngineError::WalError(_) => "58000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if e.is_transient() {
        tracing::warn!("transient engine error: {e}");
    }
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::BadValue { .. } => "22P02",
        _ => "42601",
    };
    user_error(code, e.to_string())
}
