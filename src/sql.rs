use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectAvailability {
        start: NaiveDate,
        end: NaiveDate,
    },
    InsertReservation(NewReservation),
    /// All reservations, or the one with `id`.
    SelectReservations {
        id: Option<Ulid>,
    },
    UpdateStatus {
        id: Ulid,
        status: Status,
    },
    DeleteReservation {
        id: Ulid,
    },
}

impl Command {
    /// Operator-only commands: listing and every change to an existing reservation.
    pub fn requires_admin(&self) -> bool {
        !matches!(self, Command::SelectAvailability { .. } | Command::InsertReservation(_))
    }
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
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let values = extract_insert_values(insert)?;
    if insert.columns.len() != values.len() {
        return Err(SqlError::WrongArity("reservations", insert.columns.len(), values.len()));
    }

    let mut fields = InsertFields::default();
    for (column, value) in insert.columns.iter().zip(values.iter()) {
        let column = column.value.to_lowercase();
        match column.as_str() {
            "full_name" => fields.full_name = parse_text_or_null(value)?,
            "email" => fields.email = parse_text_or_null(value)?,
            "phone" => fields.phone = parse_text_or_null(value)?,
            "notes" => fields.notes = parse_text_or_null(value)?,
            "date" => fields.date = Some(parse_date(value, "date")?),
            "time" => fields.slot = Some(parse_slot(value)?),
            "number_of_people" => fields.party_size = Some(parse_u32(value, "number_of_people")?),
            _ => return Err(SqlError::UnknownColumn(column)),
        }
    }

    // Missing contact fields become empty and are rejected by the engine's validation.
    Ok(Command::InsertReservation(NewReservation {
        full_name: fields.full_name.unwrap_or_default(),
        email: fields.email.unwrap_or_default(),
        phone: fields.phone.unwrap_or_default(),
        date: fields.date.ok_or(SqlError::MissingColumn("date"))?,
        slot: fields.slot.ok_or(SqlError::MissingColumn("time"))?,
        party_size: fields.party_size.ok_or(SqlError::MissingColumn("number_of_people"))?,
        notes: fields.notes,
    }))
}

#[derive(Default)]
struct InsertFields {
    full_name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    notes: Option<String>,
    date: Option<NaiveDate>,
    slot: Option<TimeSlot>,
    party_size: Option<u32>,
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(&delete.selection)?;
    Ok(Command::DeleteReservation { id })
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }

    let mut status = None;
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            _ => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        if column != "status" {
            return Err(SqlError::ReadOnlyColumn(column));
        }
        let raw = parse_text(&assignment.value)?;
        status = Some(Status::parse(&raw).ok_or_else(|| SqlError::InvalidValue {
            column: "status",
            reason: format!("unknown status '{raw}'"),
        })?);
    }

    let status = status.ok_or(SqlError::MissingColumn("status"))?;
    let id = extract_where_id(selection)?;
    Ok(Command::UpdateStatus { id, status })
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
        "availability" => {
            let (mut start, mut end) = (None, None);
            if let Some(selection) = &select.selection {
                extract_availability_filters(selection, &mut start, &mut end)?;
            }
            Ok(Command::SelectAvailability {
                start: start.ok_or(SqlError::MissingFilter("start"))?,
                end: end.ok_or(SqlError::MissingFilter("end"))?,
            })
        }
        "reservations" => {
            let id = match &select.selection {
                Some(_) => Some(extract_where_id(&select.selection)?),
                None => None,
            };
            Ok(Command::SelectReservations { id })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `start >= d AND "end" <= d`, or `date = d` for a single day.
fn extract_availability_filters(
    expr: &Expr,
    start: &mut Option<NaiveDate>,
    end: &mut Option<NaiveDate>,
) -> Result<(), SqlError> {
    let Expr::BinaryOp { left, op, right } = expr else {
        return Err(SqlError::Unsupported(format!("filter {expr}")));
    };
    let column = expr_column_name(left);
    match (op, column.as_deref()) {
        (ast::BinaryOperator::And, _) => {
            extract_availability_filters(left, start, end)?;
            extract_availability_filters(right, start, end)?;
        }
        (ast::BinaryOperator::GtEq, Some("start")) => *start = Some(parse_date(right, "start")?),
        (ast::BinaryOperator::LtEq, Some("end")) => *end = Some(parse_date(right, "end")?),
        (ast::BinaryOperator::Eq, Some("date")) => {
            let day = parse_date(right, "date")?;
            *start = Some(day);
            *end = Some(day);
        }
        _ => return Err(SqlError::Unsupported(format!("filter {expr}"))),
    }
    Ok(())
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

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::InvalidValue {
        column: "id",
        reason: format!("bad ULID: {e}"),
    })
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_text(expr).map(Some),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    let s = parse_text(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer '{s}': {e}")))
}

fn parse_u32(expr: &Expr, column: &'static str) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::InvalidValue {
        column,
        reason: format!("{v} is out of range"),
    })
}

fn parse_date(expr: &Expr, column: &'static str) -> Result<NaiveDate, SqlError> {
    let raw = parse_text(expr)?;
    normalize_date(&raw).ok_or_else(|| SqlError::InvalidValue {
        column,
        reason: format!("unrecognized date '{raw}'"),
    })
}

fn parse_slot(expr: &Expr) -> Result<TimeSlot, SqlError> {
    let raw = parse_text(expr)?;
    TimeSlot::parse(&raw).ok_or_else(|| SqlError::InvalidValue {
        column: "time",
        reason: format!("'{raw}' is not one of 12:00, 14:00, 16:00, 18:00, 20:00"),
    })
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
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
    #[error("column {0} cannot be updated")]
    ReadOnlyColumn(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("invalid {column}: {reason}")]
    InvalidValue { column: &'static str, reason: String },
}

impl SqlError {
    /// Well-formed SQL carrying a value the domain rejects.
    pub fn is_invalid_value(&self) -> bool {
        matches!(self, SqlError::InvalidValue { .. } | SqlError::MissingColumn(_))
    }
}
