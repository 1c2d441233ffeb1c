//! ClickHouse statement builder
//!
//! Every DDL/DML statement the console issues is assembled here. Identifiers
//! are back-quoted when they are not plain words, string literals are escaped,
//! and free-form fragments (column types, engine clauses, default
//! expressions) are checked so they cannot terminate the statement or smuggle
//! in a comment.

use std::fmt::Write as _;

use crate::connections::DataSource;
use crate::error::{OwlError, OwlResult};

/// Quote an identifier only when it is not a plain word (like ClickHouse's `backQuoteIfNeed`)
pub fn quote_ident(name: &str) -> String {
    let mut chars = name.chars();
    let plain = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if plain {
        name.to_string()
    } else {
        let escaped = name.replace('\\', "\\\\").replace('`', "\\`");
        format!("`{escaped}`")
    }
}

/// `database.table` with both parts quoted as needed
pub fn qualified(database: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(database), quote_ident(table))
}

/// Single-quoted string literal
pub fn quote_str(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

/// Check a user-supplied identifier before it is quoted into a statement
pub fn validate_identifier<'a>(value: &'a str, field: &str) -> OwlResult<&'a str> {
    let value = OwlError::require(value, field)?;
    if value.contains('\0') || value.len() > 255 {
        return Err(OwlError::Validation(format!("Invalid {field}: '{value}'")));
    }
    Ok(value)
}

/// Check a type or engine expression such as `Nullable(String)` or `ReplacingMergeTree(ver)`
pub fn validate_type_expression(expr: &str, field: &str) -> OwlResult<()> {
    let expr = OwlError::require(expr, field)?;
    let first = expr.trim_start().chars().next().unwrap_or(' ');
    if !first.is_ascii_alphabetic() {
        return Err(OwlError::Validation(format!("Invalid {field}: '{expr}'")));
    }
    scan_fragment(expr, field, |c| {
        c.is_ascii_alphanumeric() || " _(),.=-".contains(c)
    })
}

/// Check a free-form expression such as a DEFAULT value or a PARTITION BY key
pub fn validate_expression(expr: &str, field: &str) -> OwlResult<()> {
    let expr = OwlError::require(expr, field)?;
    scan_fragment(expr, field, |c| c != ';' && c != '#')
}

/// Walk a fragment outside string literals, enforcing balanced parentheses,
/// no comment openers and an allowed character set
fn scan_fragment(expr: &str, field: &str, allowed: impl Fn(char) -> bool) -> OwlResult<()> {
    let invalid = |reason: &str| {
        Err(OwlError::Validation(format!(
            "Invalid {field} '{expr}': {reason}"
        )))
    };

    let mut depth = 0i32;
    let mut in_quote = false;
    let mut escaped = false;
    let mut prev = '\0';

    for ch in expr.chars() {
        if in_quote {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '\'' => in_quote = false,
                _ => {}
            }
            prev = ch;
            continue;
        }

        match ch {
            '\'' => in_quote = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return invalid("unbalanced parentheses");
                }
            }
            '-' if prev == '-' => return invalid("comments are not allowed"),
            '*' if prev == '/' => return invalid("comments are not allowed"),
            c if !allowed(c) => return invalid(&format!("unexpected character '{c}'")),
            _ => {}
        }
        prev = ch;
    }

    if in_quote {
        return invalid("unterminated string literal");
    }
    if depth != 0 {
        return invalid("unbalanced parentheses");
    }
    Ok(())
}

/// Engine name without its parameter list
pub fn engine_family(engine: &str) -> &str {
    engine.split('(').next().unwrap_or(engine).trim()
}

/// MergeTree-family engines require an ordering key
pub fn is_merge_tree(engine: &str) -> bool {
    engine_family(engine).ends_with("MergeTree")
}

/// Column in a CREATE TABLE statement
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: false,
            default: None,
            primary_key: false,
        }
    }

    fn validate(&self) -> OwlResult<()> {
        validate_identifier(&self.name, "column name")?;
        validate_type_expression(&self.data_type, "column type")?;
        if let Some(default) = self.default.as_deref().filter(|d| !d.trim().is_empty()) {
            validate_expression(default, "column default")?;
        }
        Ok(())
    }

    /// `name Type [DEFAULT expr]`
    pub fn to_sql(&self) -> String {
        let data_type = self.data_type.trim();
        let data_type = if self.nullable && !data_type.starts_with("Nullable(") {
            format!("Nullable({data_type})")
        } else {
            data_type.to_string()
        };

        let mut sql = format!("{} {}", quote_ident(&self.name), data_type);
        if let Some(default) = self.default.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            let _ = write!(sql, " DEFAULT {default}");
        }
        sql
    }
}

fn key_list(keys: &[String]) -> String {
    keys.iter()
        .map(|k| quote_ident(k.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// CREATE TABLE statement
#[derive(Debug, Clone)]
pub struct CreateTable {
    pub database: String,
    pub name: String,
    pub engine: String,
    pub columns: Vec<ColumnSpec>,
    pub order_by: Vec<String>,
    pub partition_by: Option<String>,
}

impl CreateTable {
    pub fn validate(&self) -> OwlResult<()> {
        validate_identifier(&self.database, "database")?;
        validate_identifier(&self.name, "name")?;
        validate_type_expression(&self.engine, "engine")?;
        if self.columns.is_empty() {
            return Err(OwlError::validation("At least one column is required"));
        }
        for column in &self.columns {
            column.validate()?;
        }
        for key in &self.order_by {
            validate_identifier(key, "orderBy")?;
        }
        if let Some(partition) = self.partition_by.as_deref() {
            validate_expression(partition, "partitionBy")?;
        }
        Ok(())
    }

    /// Ordering key: explicit `order_by`, else `tuple()`
    fn ordering_key(&self) -> Option<String> {
        if !is_merge_tree(&self.engine) {
            return None;
        }
        if self.order_by.is_empty() {
            Some("tuple()".to_string())
        } else {
            Some(format!("({})", key_list(&self.order_by)))
        }
    }

    pub fn to_sql(&self) -> OwlResult<String> {
        self.validate()?;

        let columns = self
            .columns
            .iter()
            .map(ColumnSpec::to_sql)
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "CREATE TABLE {} ({}) ENGINE = {}",
            qualified(&self.database, &self.name),
            columns,
            self.engine.trim()
        );

        if is_merge_tree(&self.engine) {
            if let Some(partition) = self.partition_by.as_deref().filter(|p| !p.trim().is_empty()) {
                let _ = write!(sql, " PARTITION BY {}", partition.trim());
            }
        }
        if let Some(key) = self.ordering_key() {
            let _ = write!(sql, " ORDER BY {key}");
        }
        Ok(sql)
    }
}

/// One action of an ALTER TABLE statement
#[derive(Debug, Clone, PartialEq)]
pub enum AlterAction {
    AddColumn {
        column: ColumnSpec,
        after: Option<String>,
    },
    DropColumn {
        name: String,
    },
    ModifyColumn {
        name: String,
        data_type: String,
    },
    RenameColumn {
        from: String,
        to: String,
    },
    CommentColumn {
        name: String,
        comment: String,
    },
}

impl AlterAction {
    fn to_sql(&self) -> OwlResult<String> {
        match self {
            AlterAction::AddColumn { column, after } => {
                column.validate()?;
                let mut sql = format!("ADD COLUMN {}", column.to_sql());
                if let Some(after) = after.as_deref().filter(|a| !a.trim().is_empty()) {
                    validate_identifier(after, "after")?;
                    let _ = write!(sql, " AFTER {}", quote_ident(after));
                }
                Ok(sql)
            }
            AlterAction::DropColumn { name } => {
                validate_identifier(name, "column name")?;
                Ok(format!("DROP COLUMN {}", quote_ident(name)))
            }
            AlterAction::ModifyColumn { name, data_type } => {
                validate_identifier(name, "column name")?;
                validate_type_expression(data_type, "column type")?;
                Ok(format!(
                    "MODIFY COLUMN {} {}",
                    quote_ident(name),
                    data_type.trim()
                ))
            }
            AlterAction::RenameColumn { from, to } => {
                validate_identifier(from, "from")?;
                validate_identifier(to, "to")?;
                Ok(format!(
                    "RENAME COLUMN {} TO {}",
                    quote_ident(from),
                    quote_ident(to)
                ))
            }
            AlterAction::CommentColumn { name, comment } => {
                validate_identifier(name, "column name")?;
                Ok(format!(
                    "COMMENT COLUMN {} {}",
                    quote_ident(name),
                    quote_str(comment)
                ))
            }
        }
    }
}

pub fn alter_table(database: &str, table: &str, actions: &[AlterAction]) -> OwlResult<String> {
    validate_identifier(database, "database")?;
    validate_identifier(table, "table")?;
    if actions.is_empty() {
        return Err(OwlError::validation("At least one ALTER action is required"));
    }
    let actions = actions
        .iter()
        .map(AlterAction::to_sql)
        .collect::<OwlResult<Vec<_>>>()?;
    Ok(format!(
        "ALTER TABLE {} {}",
        qualified(database, table),
        actions.join(", ")
    ))
}

pub fn rename_table(database: &str, table: &str, new_name: &str) -> OwlResult<String> {
    validate_identifier(database, "database")?;
    validate_identifier(table, "table")?;
    validate_identifier(new_name, "newName")?;
    Ok(format!(
        "RENAME TABLE {} TO {}",
        qualified(database, table),
        qualified(database, new_name)
    ))
}

pub fn drop_table(database: &str, table: &str) -> OwlResult<String> {
    validate_identifier(database, "database")?;
    validate_identifier(table, "table")?;
    Ok(format!("DROP TABLE {}", qualified(database, table)))
}

pub fn truncate_table(database: &str, table: &str) -> OwlResult<String> {
    validate_identifier(database, "database")?;
    validate_identifier(table, "table")?;
    Ok(format!("TRUNCATE TABLE {}", qualified(database, table)))
}

/// `CREATE TABLE new AS source` copies the structure and engine, not the rows
pub fn create_table_like(database: &str, source: &str, new_name: &str) -> OwlResult<String> {
    validate_identifier(database, "database")?;
    validate_identifier(source, "table")?;
    validate_identifier(new_name, "newName")?;
    Ok(format!(
        "CREATE TABLE {} AS {}",
        qualified(database, new_name),
        qualified(database, source)
    ))
}

pub fn copy_rows(database: &str, source: &str, target: &str) -> OwlResult<String> {
    validate_identifier(database, "database")?;
    validate_identifier(source, "table")?;
    validate_identifier(target, "newName")?;
    Ok(format!(
        "INSERT INTO {} SELECT * FROM {}",
        qualified(database, target),
        qualified(database, source)
    ))
}

pub fn select_sample(database: &str, table: &str, limit: usize) -> OwlResult<String> {
    validate_identifier(database, "database")?;
    validate_identifier(table, "table")?;
    Ok(format!(
        "SELECT * FROM {} LIMIT {limit}",
        qualified(database, table)
    ))
}

pub fn create_database(name: &str, engine: Option<&str>) -> OwlResult<String> {
    validate_identifier(name, "name")?;
    match engine.map(str::trim).filter(|e| !e.is_empty()) {
        Some(engine) => {
            validate_type_expression(engine, "engine")?;
            Ok(format!("CREATE DATABASE {} ENGINE = {engine}", quote_ident(name)))
        }
        None => Ok(format!("CREATE DATABASE {}", quote_ident(name))),
    }
}

pub fn drop_database(name: &str, if_exists: bool) -> OwlResult<String> {
    validate_identifier(name, "name")?;
    let clause = if if_exists { "IF EXISTS " } else { "" };
    Ok(format!("DROP DATABASE {clause}{}", quote_ident(name)))
}

/// Engine clause of a federated database: `PostgreSQL('host:port', 'db', 'user', 'password'[, 'schema'])`
pub fn federated_database_engine(source: &DataSource) -> String {
    let mut args = vec![
        quote_str(&source.address()),
        quote_str(&source.database),
        quote_str(&source.username),
        quote_str(&source.password),
    ];
    if let Some(schema) = postgres_schema(source) {
        args.push(quote_str(schema));
    }
    format!("{}({})", source.engine.engine_name(), args.join(", "))
}

/// Arguments addressing one remote table: `'host:port', 'db', 'table', 'user', 'password'[, 'schema']`
pub fn federated_table_args(source: &DataSource, table: &str) -> String {
    let mut args = vec![
        quote_str(&source.address()),
        quote_str(&source.database),
        quote_str(table),
        quote_str(&source.username),
        quote_str(&source.password),
    ];
    if let Some(schema) = postgres_schema(source) {
        args.push(quote_str(schema));
    }
    args.join(", ")
}

/// Table backed by a remote table: `CREATE TABLE db.t ENGINE = PostgreSQL(...)`
pub fn linked_table(
    database: &str,
    name: &str,
    source: &DataSource,
    source_table: &str,
) -> OwlResult<String> {
    validate_identifier(database, "database")?;
    validate_identifier(name, "name")?;
    OwlError::require(source_table, "sourceTable")?;
    Ok(format!(
        "CREATE TABLE {} ENGINE = {}({})",
        qualified(database, name),
        source.engine.engine_name(),
        federated_table_args(source, source_table)
    ))
}

/// Local MergeTree copy of a remote table, filled through the engine's table function
pub fn copied_table(
    database: &str,
    name: &str,
    source: &DataSource,
    source_table: &str,
    order_by: &[String],
) -> OwlResult<String> {
    validate_identifier(database, "database")?;
    validate_identifier(name, "name")?;
    OwlError::require(source_table, "sourceTable")?;
    for key in order_by {
        validate_identifier(key, "orderBy")?;
    }
    let key = if order_by.is_empty() {
        "tuple()".to_string()
    } else {
        format!("({})", key_list(order_by))
    };
    Ok(format!(
        "CREATE TABLE {} ENGINE = MergeTree ORDER BY {key} AS SELECT * FROM {}({})",
        qualified(database, name),
        source.engine.table_function(),
        federated_table_args(source, source_table)
    ))
}

fn postgres_schema(source: &DataSource) -> Option<&str> {
    match source.engine {
        crate::connections::SourceEngine::PostgreSQL => source
            .schema
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty()),
        crate::connections::SourceEngine::MySQL => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::SourceEngine;
    use rstest::rstest;

    fn id_table(order_by: Vec<String>) -> CreateTable {
        CreateTable {
            database: "default".into(),
            name: "events".into(),
            engine: "MergeTree".into(),
            columns: vec![ColumnSpec::new("id", "UInt64")],
            order_by,
            partition_by: None,
        }
    }

    #[rstest]
    #[case("id", "id")]
    #[case("_tmp1", "_tmp1")]
    #[case("my table", "`my table`")]
    #[case("1st", "`1st`")]
    #[case("we`ird", "`we\\`ird`")]
    #[case("drop;--", "`drop;--`")]
    fn test_quote_ident(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(quote_ident(input), expected);
    }

    #[test]
    fn test_quote_str_escapes() {
        assert_eq!(quote_str("it's"), "'it\\'s'");
        assert_eq!(quote_str("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn test_merge_tree_without_order_by_is_unordered() {
        let sql = id_table(vec![]).to_sql().unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE default.events (id UInt64) ENGINE = MergeTree ORDER BY tuple()"
        );
    }

    #[test]
    fn test_merge_tree_with_order_by() {
        let sql = id_table(vec!["id".into()]).to_sql().unwrap();
        assert!(sql.ends_with("ORDER BY (id)"), "{sql}");
    }

    #[test]
    fn test_primary_key_columns_do_not_imply_ordering_key() {
        let mut table = id_table(vec![]);
        table.columns[0].primary_key = true;
        assert_eq!(
            table.to_sql().unwrap(),
            "CREATE TABLE default.events (id UInt64) ENGINE = MergeTree ORDER BY tuple()"
        );
    }

    #[test]
    fn test_non_merge_tree_has_no_order_by() {
        let mut table = id_table(vec!["id".into()]);
        table.engine = "Memory".into();
        let sql = table.to_sql().unwrap();
        assert!(!sql.contains("ORDER BY"));
    }

    #[test]
    fn test_nullable_and_default_columns() {
        let mut column = ColumnSpec::new("name", "String");
        column.nullable = true;
        column.default = Some("'n/a'".into());
        assert_eq!(column.to_sql(), "name Nullable(String) DEFAULT 'n/a'");

        let mut already = ColumnSpec::new("x", "Nullable(Int32)");
        already.nullable = true;
        assert_eq!(already.to_sql(), "x Nullable(Int32)");
    }

    #[test]
    fn test_partition_by_only_for_merge_tree() {
        let mut table = id_table(vec!["id".into()]);
        table.partition_by = Some("toYYYYMM(ts)".into());
        assert!(table.to_sql().unwrap().contains("PARTITION BY toYYYYMM(ts) ORDER BY (id)"));
    }

    #[rstest]
    #[case("String")]
    #[case("Nullable(String)")]
    #[case("DateTime64(3, 'UTC')")]
    #[case("Enum8('a' = 1, 'b' = -2)")]
    #[case("ReplacingMergeTree(version)")]
    fn test_valid_type_expressions(#[case] expr: &str) {
        assert!(validate_type_expression(expr, "type").is_ok(), "{expr}");
    }

    #[rstest]
    #[case("String; DROP TABLE x")]
    #[case("String -- comment")]
    #[case("String /* x */")]
    #[case("Nullable(String")]
    #[case("String)")]
    #[case("'quoted")]
    #[case("")]
    fn test_invalid_type_expressions(#[case] expr: &str) {
        assert!(validate_type_expression(expr, "type").is_err(), "{expr}");
    }

    #[test]
    fn test_expression_allows_operators_but_not_terminators() {
        assert!(validate_expression("now() + INTERVAL 1 DAY", "default").is_ok());
        assert!(validate_expression("'a;b'", "default").is_ok());
        assert!(validate_expression("1; DROP TABLE t", "default").is_err());
    }

    #[test]
    fn test_missing_columns_rejected() {
        let mut table = id_table(vec![]);
        table.columns.clear();
        assert!(table.to_sql().is_err());
    }

    #[test]
    fn test_alter_actions() {
        let mut column = ColumnSpec::new("email", "String");
        column.default = Some("''".into());
        let sql = alter_table(
            "shop",
            "users",
            &[
                AlterAction::AddColumn {
                    column,
                    after: Some("id".into()),
                },
                AlterAction::DropColumn { name: "legacy".into() },
                AlterAction::ModifyColumn {
                    name: "age".into(),
                    data_type: "UInt16".into(),
                },
                AlterAction::RenameColumn {
                    from: "nick".into(),
                    to: "nickname".into(),
                },
            ],
        )
        .unwrap();
        assert_eq!(
            sql,
            "ALTER TABLE shop.users ADD COLUMN email String DEFAULT '' AFTER id, DROP COLUMN legacy, MODIFY COLUMN age UInt16, RENAME COLUMN nick TO nickname"
        );
        assert!(alter_table("shop", "users", &[]).is_err());
    }

    #[test]
    fn test_simple_statements() {
        assert_eq!(
            rename_table("db", "a", "b").unwrap(),
            "RENAME TABLE db.a TO db.b"
        );
        assert_eq!(drop_table("db", "a").unwrap(), "DROP TABLE db.a");
        assert_eq!(truncate_table("db", "a").unwrap(), "TRUNCATE TABLE db.a");
        assert_eq!(
            create_table_like("db", "a", "a copy").unwrap(),
            "CREATE TABLE db.`a copy` AS db.a"
        );
        assert_eq!(
            copy_rows("db", "a", "b").unwrap(),
            "INSERT INTO db.b SELECT * FROM db.a"
        );
        assert_eq!(
            drop_database("pg", true).unwrap(),
            "DROP DATABASE IF EXISTS pg"
        );
        assert!(drop_table("", "a").is_err());
    }

    #[test]
    fn test_federated_clauses() {
        let source = DataSource {
            id: String::new(),
            name: "pg".into(),
            engine: SourceEngine::PostgreSQL,
            host: "pg.internal".into(),
            port: Some(5433),
            username: "reader".into(),
            password: "p'w".into(),
            database: "shop".into(),
            schema: Some("sales".into()),
            ssl: false,
        };
        assert_eq!(
            federated_database_engine(&source),
            "PostgreSQL('pg.internal:5433', 'shop', 'reader', 'p\\'w', 'sales')"
        );

        let mysql = DataSource {
            engine: SourceEngine::MySQL,
            port: None,
            ..source
        };
        assert_eq!(
            federated_table_args(&mysql, "orders"),
            "'pg.internal:3306', 'shop', 'orders', 'reader', 'p\\'w'"
        );

        assert_eq!(
            linked_table("local", "orders", &mysql, "orders").unwrap(),
            "CREATE TABLE local.orders ENGINE = MySQL('pg.internal:3306', 'shop', 'orders', 'reader', 'p\\'w')"
        );
        assert_eq!(
            copied_table("local", "orders", &mysql, "orders", &["id".to_string()]).unwrap(),
            "CREATE TABLE local.orders ENGINE = MergeTree ORDER BY (id) AS SELECT * FROM mysql('pg.internal:3306', 'shop', 'orders', 'reader', 'p\\'w')"
        );
        assert!(copied_table("local", "orders", &mysql, "", &[]).is_err());
    }
}
