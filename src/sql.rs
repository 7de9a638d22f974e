use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::calendar::DayKey;
use crate::grid::ViewWindow;
use crate::model::*;

/// Columns shown when a layout query gives no `days` filter.
pub const DEFAULT_LAYOUT_DAYS: u32 = 7;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertCalendar {
        id: Ulid,
        name: Option<String>,
    },
    DeleteCalendar {
        id: Ulid,
    },
    InsertAppointment {
        id: Ulid,
        calendar_id: Ulid,
        start: Option<Ms>,
        end: Option<Ms>,
        title: Option<String>,
    },
    BatchInsertAppointments {
        appointments: Vec<AppointmentInfo>,
    },
    MoveAppointment {
        id: Ulid,
        start: Ms,
        end: Ms,
    },
    DeleteAppointment {
        id: Ulid,
    },
    SelectCalendars,
    SelectAppointments {
        calendar_id: Ulid,
    },
    /// `layout` returns one row per node, `layout_json` a single JSON document.
    SelectLayout {
        calendar_id: Ulid,
        view: ViewWindow,
        json: bool,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if let Some(prefix) = trimmed.get(..7)
        && prefix.eq_ignore_ascii_case("LISTEN ")
    {
        let channel = trimmed[7..].trim().trim_end_matches(';').trim().to_string();
        return Ok(Command::Listen { channel });
    }

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

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;

    match table.as_str() {
        "calendars" => {
            let values = single_row(&rows, "calendars")?;
            let Some(id) = values.first() else {
                return Err(SqlError::WrongArity("calendars", 1, 0));
            };
            Ok(Command::InsertCalendar {
                id: parse_ulid(id)?,
                name: values.get(1).map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        "appointments" => {
            let mut appointments = rows
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    parse_appointment_row(row).map_err(|e| match e {
                        SqlError::Parse(msg) if rows.len() > 1 => {
                            SqlError::Parse(format!("row {i}: {msg}"))
                        }
                        other => other,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if appointments.len() > 1 {
                return Ok(Command::BatchInsertAppointments { appointments });
            }
            let AppointmentInfo { id, calendar_id, start, end, title } =
                appointments.remove(0);
            Ok(Command::InsertAppointment { id, calendar_id, start, end, title })
        }
        "moves" => {
            let values = single_row(&rows, "moves")?;
            if values.len() < 3 {
                return Err(SqlError::WrongArity("moves", 3, values.len()));
            }
            Ok(Command::MoveAppointment {
                id: parse_ulid(&values[0])?,
                start: parse_i64(&values[1])?,
                end: parse_i64(&values[2])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `(id, calendar_id, start, "end" [, title])`. Bounds and title may be NULL.
fn parse_appointment_row(values: &[Expr]) -> Result<AppointmentInfo, SqlError> {
    if values.len() < 4 {
        return Err(SqlError::WrongArity("appointments", 4, values.len()));
    }
    Ok(AppointmentInfo {
        id: parse_ulid(&values[0])?,
        calendar_id: parse_ulid(&values[1])?,
        start: parse_i64_or_null(&values[2])?,
        end: parse_i64_or_null(&values[3])?,
        title: values.get(4).map(parse_string_or_null).transpose()?.flatten(),
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "calendars" => Ok(Command::DeleteCalendar { id }),
        "appointments" => Ok(Command::DeleteAppointment { id }),
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

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters);
    }
    let filter = |col: &str| filters.iter().find(|(c, _)| c == col).map(|(_, e)| *e);

    match table.as_str() {
        "calendars" => Ok(Command::SelectCalendars),
        "appointments" => {
            let calendar_id = filter("calendar_id").ok_or(SqlError::MissingFilter("calendar_id"))?;
            Ok(Command::SelectAppointments {
                calendar_id: parse_ulid(calendar_id)?,
            })
        }
        "layout" | "layout_json" => {
            let calendar_id = filter("calendar_id").ok_or(SqlError::MissingFilter("calendar_id"))?;
            let start = filter("start").ok_or(SqlError::MissingFilter("start"))?;
            let days = filter("days").map(parse_u32).transpose()?;
            let start_hour = filter("start_hour").map(parse_u32).transpose()?;
            let end_hour = filter("end_hour").map(parse_u32).transpose()?;
            let view = ViewWindow::new(parse_day_key(start)?, days.unwrap_or(DEFAULT_LAYOUT_DAYS))
                .with_visible_hours(start_hour.unwrap_or(0), end_hour.unwrap_or(23));
            Ok(Command::SelectLayout {
                calendar_id: parse_ulid(calendar_id)?,
                view,
                json: table == "layout_json",
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Gather `column = value` terms from an AND chain. Other predicates are ignored.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out);
            collect_eq_filters(right, out);
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if let Some(col) = expr_column_name(left) {
                out.push((col, right));
            }
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        _ => {}
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let source = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match source.body.as_ref() {
        SetExpr::Values(values) if values.rows.is_empty() => {
            Err(SqlError::Parse("empty VALUES".into()))
        }
        SetExpr::Values(values) => Ok(&values.rows),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn single_row<'a>(rows: &'a [Vec<Expr>], table: &'static str) -> Result<&'a [Expr], SqlError> {
    match rows {
        [row] => Ok(row.as_slice()),
        _ => Err(SqlError::Unsupported(format!("multi-row INSERT into {table}"))),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
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
    match extract_value(expr) {
        Some(Value::Number(s, _) | Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_i64(expr).map(Some)
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string or NULL, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

/// `'20240101'` or `20240101`.
fn parse_day_key(expr: &Expr) -> Result<DayKey, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => DayKey::parse(s)
            .ok_or_else(|| SqlError::Parse(format!("bad day key {s:?}: expected YYYYMMDD"))),
        Some(value) => Err(SqlError::Parse(format!("expected day key, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
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
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
