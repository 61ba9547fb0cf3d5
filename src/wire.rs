use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
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
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::engine::{parse_date, parse_window, Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, ReservationFilter, SqlError};
use crate::tenant::TenantManager;

// ── Auth ─────────────────────────────────────────────────────────

/// One shared password for every user and tenant.
#[derive(Debug)]
pub struct StaydAuthSource {
    password: String,
}

#[async_trait]
impl AuthSource for StaydAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Handler ──────────────────────────────────────────────────────

pub struct StaydHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<StaydQueryParser>,
}

impl StaydHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(StaydQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();

        let result = execute_command(engine, cmd).await;

        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.status().label(),
        };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result.map_err(engine_err)
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn deleted() -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(1))
}

async fn execute_command(engine: &Engine, cmd: Command) -> Result<Response, EngineError> {
    match cmd {
        Command::InsertStay {
            id,
            name,
            max_guests,
            pricing,
        } => {
            engine
                .create_resource(id, ListingKind::Stay, name, max_guests, pricing)
                .await?;
            Ok(inserted())
        }
        Command::InsertEvent {
            id,
            name,
            date,
            seats,
            pricing,
        } => {
            let date = parse_date(&date)?;
            engine
                .create_resource(id, ListingKind::Event { date }, name, seats, pricing)
                .await?;
            Ok(inserted())
        }
        Command::InsertExperience {
            id,
            name,
            seats,
            pricing,
        } => {
            engine
                .create_resource(id, ListingKind::Experience, name, seats, pricing)
                .await?;
            Ok(inserted())
        }
        Command::SetPricing {
            resource_id,
            pricing,
        } => {
            engine.set_pricing(resource_id, pricing).await?;
            Ok(inserted())
        }
        Command::DeleteResource { id } => {
            engine.delete_resource(id).await?;
            Ok(deleted())
        }
        Command::BookStay {
            resource_id,
            guest_id,
            check_in,
            check_out,
            guests,
            note,
        } => {
            let request = BookingRequest::Stay {
                resource_id,
                guest_id,
                check_in: parse_date(&check_in)?,
                check_out: parse_date(&check_out)?,
                guests,
                note,
            };
            let reservation = engine.admit(request).await?;
            Ok(reservation_rows(vec![reservation]))
        }
        Command::BookEvent {
            resource_id,
            guest_id,
            tickets,
            note,
        } => {
            let request = BookingRequest::Event {
                resource_id,
                guest_id,
                tickets,
                note,
            };
            let reservation = engine.admit(request).await?;
            Ok(reservation_rows(vec![reservation]))
        }
        Command::BookExperience {
            resource_id,
            guest_id,
            date,
            participants,
            note,
        } => {
            let request = BookingRequest::Experience {
                resource_id,
                guest_id,
                date: parse_date(&date)?,
                participants,
                note,
            };
            let reservation = engine.admit(request).await?;
            Ok(reservation_rows(vec![reservation]))
        }
        Command::CancelReservation { id } => {
            engine.cancel_reservation(id).await?;
            Ok(deleted())
        }
        Command::SelectResources => Ok(resource_rows(engine.list_resources().await)),
        Command::SelectReservations { filter } => {
            let reservations = match filter {
                ReservationFilter::All => {
                    let mut all = Vec::new();
                    for info in engine.list_resources().await {
                        all.extend(engine.get_reservations(info.id).await);
                    }
                    all
                }
                ReservationFilter::Resource(id) => engine.get_reservations(id).await,
                ReservationFilter::Id(id) => engine.get_reservation(id).await.into_iter().collect(),
            };
            Ok(reservation_rows(reservations))
        }
        Command::SelectAvailability {
            resource_id,
            start,
            end,
            min_nights,
        } => {
            let window = parse_window(&start, &end)?;
            let openings = engine
                .compute_availability(resource_id, window, min_nights)
                .await?;
            Ok(availability_rows(resource_id, openings))
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("resource_id", Type::INT8),
        field("guest_id", Type::INT8),
        field("kind", Type::VARCHAR),
        field("check_in", Type::VARCHAR),
        field("check_out", Type::VARCHAR),
        field("nights", Type::INT8),
        field("guests", Type::INT8),
        field("total", Type::INT8),
        field("note", Type::VARCHAR),
        field("created_at", Type::INT8),
    ]
}

fn resource_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("kind", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("capacity", Type::INT8),
        field("date", Type::VARCHAR),
        field("base_price", Type::INT8),
        field("cleaning_fee", Type::INT8),
        field("service_fee", Type::INT8),
        field("reservations", Type::INT8),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("resource_id", Type::INT8),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("nights", Type::INT8),
        field("remaining", Type::INT8),
    ]
}

fn query_response(schema: Vec<FieldInfo>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(Arc::new(schema), stream::iter(rows)))
}

fn reservation_rows(reservations: Vec<Reservation>) -> Response {
    let schema = Arc::new(reservation_schema());
    let rows = reservations
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.resource_id)?;
            encoder.encode_field(&r.guest_id)?;
            encoder.encode_field(&r.kind.label().to_string())?;
            encoder.encode_field(&r.check_in.to_string())?;
            encoder.encode_field(&r.check_out.to_string())?;
            encoder.encode_field(&i64::from(r.nights))?;
            encoder.encode_field(&i64::from(r.guests))?;
            encoder.encode_field(&r.total)?;
            encoder.encode_field(&r.note)?;
            encoder.encode_field(&r.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(reservation_schema(), rows)
}

fn resource_rows(resources: Vec<ResourceInfo>) -> Response {
    let schema = Arc::new(resource_schema());
    let rows = resources
        .into_iter()
        .map(|info| {
            let date = match info.kind {
                ListingKind::Event { date } => Some(date.to_string()),
                ListingKind::Stay | ListingKind::Experience => None,
            };
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&info.id)?;
            encoder.encode_field(&info.kind.label().to_string())?;
            encoder.encode_field(&info.name)?;
            encoder.encode_field(&i64::from(info.capacity))?;
            encoder.encode_field(&date)?;
            encoder.encode_field(&info.pricing.map(|p| p.base_price))?;
            encoder.encode_field(&info.pricing.map(|p| p.cleaning_fee))?;
            encoder.encode_field(&info.pricing.map(|p| p.service_fee))?;
            encoder.encode_field(&(info.reservation_count as i64))?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(resource_schema(), rows)
}

fn availability_rows(resource_id: ResourceId, openings: Vec<Opening>) -> Response {
    let schema = Arc::new(availability_schema());
    let rows = openings
        .into_iter()
        .map(|o| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&resource_id)?;
            encoder.encode_field(&o.span.start.to_string())?;
            encoder.encode_field(&o.span.end.to_string())?;
            encoder.encode_field(&o.span.nights())?;
            encoder.encode_field(&i64::from(o.remaining))?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(availability_schema(), rows)
}

/// Columns a statement will return, guessed from its text so that
/// statements with unbound `$n` placeholders can be described.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    if lower.contains("availability") {
        availability_schema()
    } else if lower.contains("_bookings") || (lower.contains("select") && lower.contains("reservations")) {
        reservation_schema()
    } else if lower.contains("select") && lower.contains("resources") {
        resource_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for StaydHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        Ok(vec![self.run(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct StaydQueryParser;

#[async_trait]
impl QueryParser for StaydQueryParser {
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
impl ExtendedQueryHandler for StaydHandler {
    type Statement = String;
    type QueryParser = StaydQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(&engine, &sql).await
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
            result_schema(&target.statement),
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
        )))
    }
}

/// Byte ranges of `$N` placeholders outside single-quoted literals, with N.
fn placeholders(sql: &str) -> Vec<(usize, usize, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            // `''` inside a literal closes and reopens it, which nets out.
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((start, i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).iter().map(|&(_, _, n)| n).max().unwrap_or(0)
}

/// Inline bound text parameters as quoted literals in one pass over the
/// statement. Bound values are never rescanned.
fn substitute_params(sql: &str, params: &[Option<bytes::Bytes>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (start, end, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        result.push_str(&sql[copied..start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct StaydFactory {
    handler: Arc<StaydHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<StaydAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl StaydFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(StaydHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                StaydAuthSource { password },
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for StaydFactory {
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
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(StaydFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM resources"), 0);
        assert_eq!(
            count_params("INSERT INTO event_bookings (resource_id, guest_id, tickets) VALUES ($1, $2, $3)"),
            3
        );
        assert_eq!(count_params("SELECT $2, $10, $1"), 10);
    }

    #[test]
    fn substitute_params_quotes_and_nulls() {
        let params = vec![
            Some(bytes::Bytes::from_static(b"7")),
            Some(bytes::Bytes::from_static(b"O'Hara")),
            None,
        ];
        assert_eq!(
            substitute_params("VALUES ($1, $2, $3)", &params),
            "VALUES ('7', 'O''Hara', NULL)"
        );
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let params = vec![
            Some(bytes::Bytes::from_static(b"7")),
            Some(bytes::Bytes::from_static(b"pay $1 deposit")),
        ];
        assert_eq!(
            substitute_params("VALUES ($1, $2)", &params),
            "VALUES ('7', 'pay $1 deposit')"
        );

        let params = vec![Some(bytes::Bytes::from_static(b"x', 'injected"))];
        assert_eq!(
            substitute_params("SELECT $1, $1", &params),
            "SELECT 'x'', ''injected', 'x'', ''injected'"
        );
    }

    #[test]
    fn placeholders_inside_literals_are_left_alone() {
        let params = vec![Some(bytes::Bytes::from_static(b"9"))];
        assert_eq!(
            substitute_params("VALUES ($1, 'costs $1', 'it''s $1')", &params),
            "VALUES ('9', 'costs $1', 'it''s $1')"
        );
        assert_eq!(count_params("VALUES ($1, 'costs $7')"), 1);
    }

    #[test]
    fn two_digit_placeholders_stay_distinct() {
        let params: Vec<_> = (1..=10)
            .map(|n| Some(bytes::Bytes::from(n.to_string())))
            .collect();
        assert_eq!(substitute_params("$10 $1", &params), "'10' '1'");
        // Out of range placeholders are left for the parser to reject.
        assert_eq!(substitute_params("$1 $11", &params[..1]), "'1' $11");
    }

    #[test]
    fn result_schema_by_statement() {
        let width = |sql: &str| result_schema(sql).len();
        assert_eq!(width("SELECT * FROM availability WHERE resource_id = $1"), 5);
        assert_eq!(width("INSERT INTO stay_bookings VALUES ($1)"), 11);
        assert_eq!(width("SELECT * FROM reservations"), 11);
        assert_eq!(width("SELECT * FROM resources"), 9);
        assert_eq!(width("DELETE FROM resources WHERE id = 1"), 0);
    }
}
