use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
///
/// Dates stay as text here; the engine parses them so a malformed date is
/// reported as an invalid date range rather than a syntax error.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertStay {
        id: ResourceId,
        name: Option<String>,
        max_guests: u32,
        pricing: Option<Pricing>,
    },
    InsertEvent {
        id: ResourceId,
        name: Option<String>,
        date: String,
        seats: u32,
        pricing: Option<Pricing>,
    },
    InsertExperience {
        id: ResourceId,
        name: Option<String>,
        seats: u32,
        pricing: Option<Pricing>,
    },
    SetPricing {
        resource_id: ResourceId,
        pricing: Pricing,
    },
    DeleteResource {
        id: ResourceId,
    },
    BookStay {
        resource_id: ResourceId,
        guest_id: GuestId,
        check_in: String,
        check_out: String,
        guests: u32,
        note: Option<String>,
    },
    BookEvent {
        resource_id: ResourceId,
        guest_id: GuestId,
        tickets: u32,
        note: Option<String>,
    },
    BookExperience {
        resource_id: ResourceId,
        guest_id: GuestId,
        date: String,
        participants: u32,
        note: Option<String>,
    },
    CancelReservation {
        id: Ulid,
    },
    SelectResources,
    SelectReservations {
        filter: ReservationFilter,
    },
    SelectAvailability {
        resource_id: ResourceId,
        start: String,
        end: String,
        min_nights: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationFilter {
    All,
    Resource(ResourceId),
    Id(Ulid),
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Optional trailing column: absent and NULL both mean `None`.
fn optional<'a>(values: &'a [Expr], i: usize) -> Option<&'a Expr> {
    values.get(i).filter(|e| !is_null(e))
}

fn require(values: &[Expr], table: &'static str, n: usize) -> Result<(), SqlError> {
    if values.len() < n {
        return Err(SqlError::WrongArity(table, n, values.len()));
    }
    Ok(())
}

/// Pricing from a base price and fees; no base price means no pricing record.
fn pricing_from(
    base: Option<&Expr>,
    cleaning: Option<&Expr>,
    service: Option<&Expr>,
) -> Result<Option<Pricing>, SqlError> {
    let Some(base) = base else {
        return Ok(None);
    };
    Ok(Some(Pricing {
        base_price: parse_i64_expr(base)?,
        cleaning_fee: cleaning.map(parse_i64_expr).transpose()?.unwrap_or(0),
        service_fee: service.map(parse_i64_expr).transpose()?.unwrap_or(0),
    }))
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let v = extract_insert_values(insert)?;
    let v = v.as_slice();

    match table.as_str() {
        // (id, name, max_guests, base_price, cleaning_fee, service_fee)
        "stays" => {
            require(v, "stays", 3)?;
            Ok(Command::InsertStay {
                id: parse_i64_expr(&v[0])?,
                name: parse_string_or_null(&v[1])?,
                max_guests: parse_u32(&v[2])?,
                pricing: pricing_from(optional(v, 3), optional(v, 4), optional(v, 5))?,
            })
        }
        // (id, name, date, seats, base_price, service_fee)
        "events" => {
            require(v, "events", 4)?;
            Ok(Command::InsertEvent {
                id: parse_i64_expr(&v[0])?,
                name: parse_string_or_null(&v[1])?,
                date: parse_string(&v[2])?,
                seats: parse_u32(&v[3])?,
                pricing: pricing_from(optional(v, 4), None, optional(v, 5))?,
            })
        }
        // (id, name, seats, base_price, service_fee)
        "experiences" => {
            require(v, "experiences", 3)?;
            Ok(Command::InsertExperience {
                id: parse_i64_expr(&v[0])?,
                name: parse_string_or_null(&v[1])?,
                seats: parse_u32(&v[2])?,
                pricing: pricing_from(optional(v, 3), None, optional(v, 4))?,
            })
        }
        // (resource_id, base_price, cleaning_fee, service_fee)
        "pricing" => {
            require(v, "pricing", 2)?;
            let pricing = pricing_from(optional(v, 1), optional(v, 2), optional(v, 3))?
                .ok_or(SqlError::MissingValue("base_price"))?;
            Ok(Command::SetPricing {
                resource_id: parse_i64_expr(&v[0])?,
                pricing,
            })
        }
        // (resource_id, guest_id, check_in, check_out, guests, note)
        "stay_bookings" => {
            require(v, "stay_bookings", 5)?;
            Ok(Command::BookStay {
                resource_id: parse_i64_expr(&v[0])?,
                guest_id: parse_i64_expr(&v[1])?,
                check_in: parse_string(&v[2])?,
                check_out: parse_string(&v[3])?,
                guests: parse_u32(&v[4])?,
                note: optional(v, 5).map(parse_string).transpose()?,
            })
        }
        // (resource_id, guest_id, tickets, note)
        "event_bookings" => {
            require(v, "event_bookings", 3)?;
            Ok(Command::BookEvent {
                resource_id: parse_i64_expr(&v[0])?,
                guest_id: parse_i64_expr(&v[1])?,
                tickets: parse_u32(&v[2])?,
                note: optional(v, 3).map(parse_string).transpose()?,
            })
        }
        // (resource_id, guest_id, date, participants, note)
        "experience_bookings" => {
            require(v, "experience_bookings", 4)?;
            Ok(Command::BookExperience {
                resource_id: parse_i64_expr(&v[0])?,
                guest_id: parse_i64_expr(&v[1])?,
                date: parse_string(&v[2])?,
                participants: parse_u32(&v[3])?,
                note: optional(v, 4).map(parse_string).transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "resources" => Ok(Command::DeleteResource {
            id: parse_i64_expr(id)?,
        }),
        // Kind tables only take inserts; a delete there would not check the kind.
        "stays" | "events" | "experiences" => Err(SqlError::Unsupported(format!(
            "DELETE FROM {table} (delete listings from resources)"
        ))),
        "reservations" => Ok(Command::CancelReservation {
            id: parse_ulid_expr(id)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    match table.as_str() {
        "resources" => Ok(Command::SelectResources),
        "reservations" => {
            let filter = match &select.selection {
                None => ReservationFilter::All,
                Some(expr) => reservation_filter(expr)?,
            };
            Ok(Command::SelectReservations { filter })
        }
        "availability" => {
            let mut filters = AvailabilityFilters::default();
            if let Some(selection) = &select.selection {
                filters.collect(selection)?;
            }
            Ok(Command::SelectAvailability {
                resource_id: filters.resource_id.ok_or(SqlError::MissingFilter("resource_id"))?,
                start: filters.start.ok_or(SqlError::MissingFilter("start"))?,
                end: filters.end.ok_or(SqlError::MissingFilter("end"))?,
                min_nights: filters.min_nights,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn reservation_filter(expr: &Expr) -> Result<ReservationFilter, SqlError> {
    if let Expr::BinaryOp {
        left,
        op: ast::BinaryOperator::Eq,
        right,
    } = expr
    {
        match expr_column_name(left).as_deref() {
            Some("resource_id") => return Ok(ReservationFilter::Resource(parse_i64_expr(right)?)),
            Some("id") => return Ok(ReservationFilter::Id(parse_ulid_expr(right)?)),
            _ => {}
        }
    }
    Err(SqlError::Unsupported(format!("reservations filter: {expr}")))
}

#[derive(Default)]
struct AvailabilityFilters {
    resource_id: Option<ResourceId>,
    start: Option<String>,
    end: Option<String>,
    min_nights: Option<u32>,
}

impl AvailabilityFilters {
    fn collect(&mut self, expr: &Expr) -> Result<(), SqlError> {
        let Expr::BinaryOp { left, op, right } = expr else {
            return Ok(());
        };
        let col = expr_column_name(left);
        match (op, col.as_deref()) {
            (ast::BinaryOperator::And, _) => {
                self.collect(left)?;
                self.collect(right)?;
            }
            (ast::BinaryOperator::Eq, Some("resource_id")) => {
                self.resource_id = Some(parse_i64_expr(right)?);
            }
            (ast::BinaryOperator::Eq, Some("min_nights")) => {
                self.min_nights = Some(parse_u32(right)?);
            }
            (ast::BinaryOperator::GtEq, Some("start")) => {
                self.start = Some(parse_string(right)?);
            }
            (ast::BinaryOperator::LtEq, Some("end")) => {
                self.end = Some(parse_string(right)?);
            }
            _ => {}
        }
        Ok(())
    }
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

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

/// First VALUES row. Multi-row inserts are refused: each booking is its own
/// admission and must succeed or fail on its own.
fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
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

fn extract_where_id(selection: &Option<Expr>) -> Result<&Expr, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some("id") => Ok(&**right),
        _ => Err(SqlError::MissingFilter("id")),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    MissingValue(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::MissingValue(col) => write!(f, "missing value: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
