use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime, Weekday};
use sqlparser::ast::{
    self, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, UnaryOperator, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::ReservationFilter;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    CreateReservation(Candidate),
    ChangeStatus {
        id: Ulid,
        status: Status,
    },
    CancelReservation {
        id: Ulid,
    },
    EditReservation {
        id: Ulid,
        edit: DetailsEdit,
    },
    AssignTable {
        id: Ulid,
        table: Option<String>,
    },
    SetRules(RulesUpdate),
    SetPeriodCapacity {
        period: String,
        capacity: Option<u32>,
    },
    UpsertPeriod(Period),
    DeletePeriod {
        id: Ulid,
    },
    SelectAvailability {
        date: NaiveDate,
        period: String,
        adults: u32,
        children: u32,
    },
    SelectReservations {
        id: Option<Ulid>,
        filter: ReservationFilter,
    },
    SelectSummaries {
        from: NaiveDate,
        to: NaiveDate,
    },
    SelectPeriods {
        date: Option<NaiveDate>,
    },
    SelectRules,
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

/// A `booking_rules` row; the per-period capacity map is managed separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesUpdate {
    pub min_party_size: u32,
    pub max_party_size: u32,
    pub same_day_cutoff: NaiveTime,
    pub closed_weekdays: WeekdaySet,
}

impl RulesUpdate {
    pub fn into_rules(self, period_capacity: std::collections::BTreeMap<String, u32>) -> BookingRules {
        BookingRules {
            min_party_size: self.min_party_size,
            max_party_size: self.max_party_size,
            same_day_cutoff: self.same_day_cutoff,
            closed_weekdays: self.closed_weekdays,
            period_capacity,
        }
    }
}

/// Rows a statement produces, known before any parameter is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Command tag only.
    None,
    Outcome,
    Availability,
    Reservations,
    Summaries,
    Periods,
    Rules,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    if let Some(cmd) = parse_listen(sql) {
        return Ok(cmd);
    }
    let stmt = parse_statement(sql)?;
    match &stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Result shape of a statement, from its kind and table alone.
pub fn statement_shape(sql: &str) -> Shape {
    if parse_listen(sql).is_some() {
        return Shape::None;
    }
    let Ok(stmt) = parse_statement(sql) else {
        return Shape::None;
    };
    match &stmt {
        Statement::Insert(insert) => match insert_table_name(insert).as_deref() {
            Ok("reservations" | "status_changes" | "edits" | "table_assignments") => Shape::Outcome,
            _ => Shape::None,
        },
        Statement::Delete(delete) => match delete_table_name(delete).as_deref() {
            Ok("reservations") => Shape::Outcome,
            _ => Shape::None,
        },
        Statement::Query(query) => match select_table_name(query).as_deref() {
            Ok("availability") => Shape::Availability,
            Ok("reservations") => Shape::Reservations,
            Ok("summaries") => Shape::Summaries,
            Ok("periods") => Shape::Periods,
            Ok("booking_rules") => Shape::Rules,
            _ => Shape::None,
        },
        _ => Shape::None,
    }
}

fn parse_statement(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts =
        Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    Ok(stmts.swap_remove(0))
}

/// LISTEN / UNLISTEN are matched by prefix. Unquoted names fold to lower case.
fn parse_listen(sql: &str) -> Option<Command> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let (keyword, rest) = trimmed.split_once(char::is_whitespace)?;
    let rest = rest.trim();
    let channel = match rest.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        Some(quoted) => quoted.to_string(),
        None => rest.to_lowercase(),
    };
    match keyword.to_uppercase().as_str() {
        "LISTEN" => Some(Command::Listen { channel }),
        "UNLISTEN" if rest == "*" => Some(Command::UnlistenAll),
        "UNLISTEN" => Some(Command::Unlisten { channel }),
        _ => None,
    }
}

// ── INSERT ────────────────────────────────────────────────────

const RESERVATION_COLUMNS: &[&str] = &[
    "client_id",
    "party_name",
    "date",
    "period",
    "adults",
    "children",
    "notes",
    "is_birthday",
    "status",
    "source",
    "idempotency_key",
];

const EDIT_COLUMNS: &[&str] = &[
    "reservation_id",
    "party_name",
    "date",
    "period",
    "adults",
    "children",
    "notes",
    "is_birthday",
];

const PERIOD_COLUMNS: &[&str] = &[
    "id",
    "weekday",
    "specific_date",
    "name",
    "start_time",
    "end_time",
    "active",
    "capacity_override",
];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "reservations" => {
            let row = Row::new(insert, "reservations", RESERVATION_COLUMNS)?;
            let client_id = row.optional("client_id", text)?;
            let source = row
                .optional("source", source)?
                .unwrap_or(if client_id.is_some() { Source::Link } else { Source::Manual });
            Ok(Command::CreateReservation(Candidate {
                client_id,
                source,
                status: row.optional("status", status)?,
                idempotency_key: row.optional("idempotency_key", text)?,
                details: BookingDetails {
                    party_name: row.required("party_name", text)?,
                    date: row.required("date", date)?,
                    period: row.required("period", text)?,
                    adults: row.required("adults", uint)?,
                    children: row.optional("children", uint)?.unwrap_or(0),
                    notes: row.optional("notes", text)?,
                    is_birthday: row.optional("is_birthday", boolean)?.unwrap_or(false),
                },
            }))
        }
        "status_changes" => {
            let row = Row::new(insert, "status_changes", &["reservation_id", "status"])?;
            Ok(Command::ChangeStatus {
                id: row.required("reservation_id", ulid_text)?,
                status: row.required("status", status)?,
            })
        }
        "edits" => {
            let row = Row::new(insert, "edits", EDIT_COLUMNS)?;
            let notes = if row.has("notes") {
                Some(row.optional("notes", text)?)
            } else {
                None
            };
            Ok(Command::EditReservation {
                id: row.required("reservation_id", ulid_text)?,
                edit: DetailsEdit {
                    party_name: row.optional("party_name", text)?,
                    date: row.optional("date", date)?,
                    period: row.optional("period", text)?,
                    adults: row.optional("adults", uint)?,
                    children: row.optional("children", uint)?,
                    notes,
                    is_birthday: row.optional("is_birthday", boolean)?,
                },
            })
        }
        "table_assignments" => {
            let row = Row::new(insert, "table_assignments", &["reservation_id", "table_label"])?;
            Ok(Command::AssignTable {
                id: row.required("reservation_id", ulid_text)?,
                table: row.optional("table_label", text)?,
            })
        }
        "booking_rules" => {
            let row = Row::new(
                insert,
                "booking_rules",
                &["min_party_size", "max_party_size", "same_day_cutoff", "closed_weekdays"],
            )?;
            Ok(Command::SetRules(RulesUpdate {
                min_party_size: row.required("min_party_size", uint)?,
                max_party_size: row.required("max_party_size", uint)?,
                same_day_cutoff: row.required("same_day_cutoff", time)?,
                closed_weekdays: row
                    .optional("closed_weekdays", weekday_set)?
                    .unwrap_or_default(),
            }))
        }
        "period_capacity" => {
            let row = Row::new(insert, "period_capacity", &["period", "capacity"])?;
            Ok(Command::SetPeriodCapacity {
                period: row.required("period", text)?,
                capacity: row.optional("capacity", uint)?,
            })
        }
        "periods" => {
            let row = Row::new(insert, "periods", PERIOD_COLUMNS)?;
            let recurrence = match (
                row.optional("weekday", weekday)?,
                row.optional("specific_date", date)?,
            ) {
                (Some(day), None) => Recurrence::Weekly(day),
                (None, Some(d)) => Recurrence::On(d),
                _ => {
                    return Err(SqlError::BadValue {
                        column: "weekday".into(),
                        reason: "exactly one of weekday or specific_date is required".into(),
                    });
                }
            };
            Ok(Command::UpsertPeriod(Period {
                id: row.optional("id", ulid_text)?.unwrap_or_else(Ulid::new),
                recurrence,
                name: row.required("name", text)?,
                start_time: row.required("start_time", time)?,
                end_time: row.required("end_time", time)?,
                active: row.optional("active", boolean)?.unwrap_or(true),
                capacity_override: row.optional("capacity_override", uint)?,
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// First VALUES row of an INSERT, addressed by column name.
struct Row<'a> {
    table: &'static str,
    values: HashMap<String, &'a Expr>,
}

impl<'a> Row<'a> {
    fn new(
        insert: &'a ast::Insert,
        table: &'static str,
        allowed: &[&str],
    ) -> Result<Self, SqlError> {
        if insert.columns.is_empty() {
            return Err(SqlError::MissingColumnList(table));
        }
        let rows = insert_rows(insert)?;
        if rows.len() != 1 {
            return Err(SqlError::Unsupported(format!(
                "{table}: one row per statement, got {}",
                rows.len()
            )));
        }
        let exprs = &rows[0];
        if exprs.len() != insert.columns.len() {
            return Err(SqlError::WrongArity(table, insert.columns.len(), exprs.len()));
        }
        let mut values = HashMap::with_capacity(exprs.len());
        for (ident, expr) in insert.columns.iter().zip(exprs) {
            let column = ident.value.to_lowercase();
            if !allowed.contains(&column.as_str()) {
                return Err(SqlError::UnknownColumn { table, column });
            }
            values.insert(column, expr);
        }
        Ok(Self { table, values })
    }

    fn has(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// Absent and NULL both read as `None`.
    fn optional<T>(
        &self,
        column: &'static str,
        parse: fn(&str) -> Result<T, String>,
    ) -> Result<Option<T>, SqlError> {
        let Some(expr) = self.values.get(column) else {
            return Ok(None);
        };
        match literal(expr)? {
            None => Ok(None),
            Some(s) => parse(&s).map(Some).map_err(|reason| SqlError::BadValue {
                column: column.into(),
                reason,
            }),
        }
    }

    fn required<T>(
        &self,
        column: &'static str,
        parse: fn(&str) -> Result<T, String>,
    ) -> Result<T, SqlError> {
        self.optional(column, parse)?
            .ok_or(SqlError::MissingColumn(self.table, column))
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "reservations" => Ok(Command::CancelReservation { id }),
        "periods" => Ok(Command::DeletePeriod { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    let preds = predicates(sel)?;
    match preds.as_slice() {
        [Predicate { column, op: Op::Eq, value }] if column == "id" => value_of(column, value, ulid_text),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

// ── SELECT ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    GtEq,
    LtEq,
}

struct Predicate<'a> {
    column: String,
    op: Op,
    value: &'a Expr,
}

/// Flatten `a = x AND (b >= y AND c <= z)` into column predicates.
fn predicates(expr: &Expr) -> Result<Vec<Predicate<'_>>, SqlError> {
    let mut out = Vec::new();
    collect_predicates(expr, &mut out)?;
    Ok(out)
}

fn collect_predicates<'a>(expr: &'a Expr, out: &mut Vec<Predicate<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_predicates(inner, out),
        Expr::BinaryOp { left, op: BinaryOperator::And, right } => {
            collect_predicates(left, out)?;
            collect_predicates(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                BinaryOperator::Eq => Op::Eq,
                BinaryOperator::GtEq => Op::GtEq,
                BinaryOperator::LtEq => Op::LtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("predicate on {left}")))?;
            out.push(Predicate { column, op, value: right });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let table = select_table_name(query)?;
    let preds = match select_of(query)?.selection.as_ref() {
        Some(selection) => predicates(selection)?,
        None => Vec::new(),
    };

    match table.as_str() {
        "availability" => {
            let (mut date_eq, mut period, mut adults, mut children) = (None, None, None, None);
            for p in &preds {
                match (p.column.as_str(), p.op) {
                    ("date", Op::Eq) => date_eq = Some(value_of("date", p.value, date)?),
                    ("period", Op::Eq) => period = Some(value_of("period", p.value, text)?),
                    ("adults", Op::Eq) => adults = Some(value_of("adults", p.value, uint)?),
                    ("children", Op::Eq) => children = Some(value_of("children", p.value, uint)?),
                    _ => return Err(unsupported_filter("availability", p)),
                }
            }
            Ok(Command::SelectAvailability {
                date: date_eq.ok_or(SqlError::MissingFilter("date"))?,
                period: period.ok_or(SqlError::MissingFilter("period"))?,
                adults: adults.ok_or(SqlError::MissingFilter("adults"))?,
                children: children.unwrap_or(0),
            })
        }
        "reservations" => {
            let mut id = None;
            let mut filter = ReservationFilter::default();
            for p in &preds {
                match (p.column.as_str(), p.op) {
                    ("id", Op::Eq) => id = Some(value_of("id", p.value, ulid_text)?),
                    ("client_id", Op::Eq) => {
                        filter.client_id = Some(value_of("client_id", p.value, text)?)
                    }
                    ("status", Op::Eq) => filter.status = Some(value_of("status", p.value, status)?),
                    ("period", Op::Eq) => filter.period = Some(value_of("period", p.value, text)?),
                    ("date", op) => {
                        let d = value_of("date", p.value, date)?;
                        if op != Op::LtEq {
                            filter.from = Some(d);
                        }
                        if op != Op::GtEq {
                            filter.to = Some(d);
                        }
                    }
                    _ => return Err(unsupported_filter("reservations", p)),
                }
            }
            Ok(Command::SelectReservations { id, filter })
        }
        "summaries" => {
            let (mut from, mut to) = (None, None);
            for p in &preds {
                match (p.column.as_str(), p.op) {
                    ("date", op) => {
                        let d = value_of("date", p.value, date)?;
                        if op != Op::LtEq {
                            from = Some(d);
                        }
                        if op != Op::GtEq {
                            to = Some(d);
                        }
                    }
                    _ => return Err(unsupported_filter("summaries", p)),
                }
            }
            Ok(Command::SelectSummaries {
                from: from.ok_or(SqlError::MissingFilter("date >="))?,
                to: to.ok_or(SqlError::MissingFilter("date <="))?,
            })
        }
        "periods" => {
            let mut on = None;
            for p in &preds {
                match (p.column.as_str(), p.op) {
                    ("date", Op::Eq) => on = Some(value_of("date", p.value, date)?),
                    _ => return Err(unsupported_filter("periods", p)),
                }
            }
            Ok(Command::SelectPeriods { date: on })
        }
        "booking_rules" => match preds.first() {
            None => Ok(Command::SelectRules),
            Some(p) => Err(unsupported_filter("booking_rules", p)),
        },
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn unsupported_filter(table: &str, p: &Predicate<'_>) -> SqlError {
    SqlError::Unsupported(format!("{table}: filter on {} ({:?})", p.column, p.op))
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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn select_of(query: &ast::Query) -> Result<&ast::Select, SqlError> {
    match query.body.as_ref() {
        SetExpr::Select(s) => Ok(s),
        _ => Err(SqlError::Unsupported("non-SELECT query".into())),
    }
}

fn select_table_name(query: &ast::Query) -> Result<String, SqlError> {
    let select = select_of(query)?;
    let first = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    table_factor_name(&first.relation)
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(&values.rows),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
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

/// Literal as text; `None` for NULL. Bound parameters arrive as quoted strings,
/// so every typed parser below works on text.
fn literal(expr: &Expr) -> Result<Option<String>, SqlError> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) | Value::Number(s, _) => Ok(Some(s.clone())),
            Value::Boolean(b) => Ok(Some(b.to_string())),
            other => Err(SqlError::Parse(format!("unsupported literal {other}"))),
        },
        Expr::UnaryOp { op: UnaryOperator::Minus, expr } => {
            Ok(literal(expr)?.map(|s| format!("-{s}")))
        }
        other => Err(SqlError::Parse(format!("expected literal, got {other}"))),
    }
}

fn value_of<T>(
    column: &str,
    expr: &Expr,
    parse: fn(&str) -> Result<T, String>,
) -> Result<T, SqlError> {
    let s = literal(expr)?.ok_or_else(|| SqlError::BadValue {
        column: column.into(),
        reason: "NULL not allowed".into(),
    })?;
    parse(&s).map_err(|reason| SqlError::BadValue {
        column: column.into(),
        reason,
    })
}

fn text(s: &str) -> Result<String, String> {
    Ok(s.to_string())
}

fn uint(s: &str) -> Result<u32, String> {
    s.trim().parse().map_err(|_| format!("expected a non-negative integer, got {s:?}"))
}

fn boolean(s: &str) -> Result<bool, String> {
    match s.trim().to_lowercase().as_str() {
        "true" | "t" | "1" => Ok(true),
        "false" | "f" | "0" => Ok(false),
        _ => Err(format!("bad bool: {s}")),
    }
}

fn ulid_text(s: &str) -> Result<Ulid, String> {
    Ulid::from_string(s.trim()).map_err(|e| format!("bad ULID: {e}"))
}

fn date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| format!("bad date {s:?}: {e}"))
}

/// `HH:MM` or `HH:MM:SS`.
fn time(s: &str) -> Result<NaiveTime, String> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| format!("bad time {s:?}: {e}"))
}

fn status(s: &str) -> Result<Status, String> {
    s.trim().parse()
}

fn source(s: &str) -> Result<Source, String> {
    s.trim().parse()
}

fn weekday(s: &str) -> Result<Weekday, String> {
    s.trim()
        .parse()
        .map_err(|_| format!("unknown weekday: {s}"))
}

fn weekday_set(s: &str) -> Result<WeekdaySet, String> {
    s.parse()
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
    #[error("{table}: unknown column {column}")]
    UnknownColumn { table: &'static str, column: String },
    #[error("{0}: an explicit column list is required")]
    MissingColumnList(&'static str),
    #[error("{0}: missing value for {1}")]
    MissingColumn(&'static str, &'static str),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("invalid value for {column}: {reason}")]
    BadValue { column: String, reason: String },
}
