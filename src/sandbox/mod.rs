//! Read-only execution of learner SQL against the practice tables, and answer checking
//! against an exercise's reference query.

use async_trait::async_trait;
use serde::{ser::SerializeStruct, Serialize, Serializer};
use serde_json::{Map, Value};
use sqlx::postgres::{PgColumn, PgPool, PgRow};
use sqlx::{Column as _, Row, TypeInfo};

mod compare;
pub use compare::{normalize_row, result_sets_match};

/// Checked in this order; the first keyword found anywhere in the statement wins.
pub const DENYLIST: [&str; 7] = [
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "TRUNCATE", "CREATE",
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SandboxError {
    #[error("Only SELECT queries can be executed")]
    NotReadQuery,
    #[error("{0} operations are not allowed")]
    Disallowed(&'static str),
    #[error("Only one SQL statement can be executed at a time")]
    MultipleStatements,
}

/// Textual gate applied before any learner query reaches the database.
///
/// Matching is by substring on the upper-cased text, so identifiers such as
/// `created_at` are rejected too. A `;` is only accepted at the very end.
pub fn check_read_only(sql: &str) -> Result<(), SandboxError> {
    let upper = sql.trim().to_uppercase();
    if !upper.starts_with("SELECT") {
        return Err(SandboxError::NotReadQuery);
    }
    if let Some(keyword) = DENYLIST.iter().find(|keyword| upper.contains(**keyword)) {
        return Err(SandboxError::Disallowed(*keyword));
    }
    if upper.trim_end_matches(|c: char| c == ';' || c.is_whitespace()).contains(';') {
        return Err(SandboxError::MultipleStatements);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Boolean,
    Text,
}

impl ColumnKind {
    fn from_type_name(name: &str) -> Self {
        match name {
            "INT2" | "INT4" | "INT8" => ColumnKind::Integer,
            "FLOAT4" | "FLOAT8" => ColumnKind::Float,
            "BOOL" => ColumnKind::Boolean,
            _ => ColumnKind::Text,
        }
    }

    fn render(self, value: &str) -> Value {
        match self {
            ColumnKind::Integer => value
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::from(value)),
            ColumnKind::Float => value
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::from(value)),
            ColumnKind::Boolean => Value::Bool(value == "t" || value == "true"),
            ColumnKind::Text => Value::from(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

/// Rows in PostgreSQL text form. `None` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    fn from_pg_rows(columns: &[PgColumn], rows: &[PgRow]) -> sqlx::Result<Self> {
        let columns = columns
            .iter()
            .map(|column| Column {
                name: column.name().to_string(),
                kind: ColumnKind::from_type_name(column.type_info().name()),
            })
            .collect();

        let rows = rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| row.try_get_unchecked::<Option<String>, _>(i))
                    .collect::<sqlx::Result<Vec<_>>>()
            })
            .collect::<sqlx::Result<Vec<_>>>()?;

        Ok(ResultSet { columns, rows })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Rows as JSON objects keyed by column name. A repeated column name keeps the
    /// last value.
    pub fn json_rows(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(column, value)| {
                        let value = match value {
                            Some(v) => column.kind.render(v),
                            None => Value::Null,
                        };
                        (column.name.clone(), value)
                    })
                    .collect()
            })
            .collect()
    }
}

impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ResultSet", 3)?;
        state.serialize_field("rows", &self.json_rows())?;
        state.serialize_field("rowCount", &self.row_count())?;
        state.serialize_field("fields", &self.field_names())?;
        state.end()
    }
}

/// Anything that can run a raw SQL string and hand back its rows.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn fetch(&self, sql: &str) -> Result<ResultSet, String>;
}

#[async_trait]
impl QueryRunner for PgPool {
    async fn fetch(&self, sql: &str) -> Result<ResultSet, String> {
        // Simple query protocol: every value arrives in text form.
        let rows = sqlx::raw_sql(sql)
            .fetch_all(self)
            .await
            .map_err(describe_error)?;

        // An empty result carries no row metadata, so ask the server for the columns.
        let columns = match rows.first() {
            Some(row) => row.columns().to_vec(),
            None => match sqlx::Executor::describe(self, sql).await {
                Ok(described) => described.columns().to_vec(),
                Err(e) => {
                    tracing::debug!("could not describe empty result: {}", e);
                    Vec::new()
                }
            },
        };
        ResultSet::from_pg_rows(&columns, &rows).map_err(describe_error)
    }
}

fn describe_error(err: sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db) => db.message().to_string(),
        other => other.to_string(),
    }
}

/// Outcome of running a learner query. Failures are data, not HTTP errors.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub result: ResultSet,
}

impl Execution {
    fn failed(error: String) -> Self {
        Execution {
            success: false,
            error: Some(error),
            result: ResultSet::default(),
        }
    }
}

/// Validates and, when allowed, executes a learner query.
pub async fn run_user_query<R>(runner: &R, sql: &str) -> Execution
where
    R: QueryRunner + ?Sized,
{
    if let Err(e) = check_read_only(sql) {
        tracing::debug!("rejected query: {}", e);
        return Execution::failed(e.to_string());
    }

    match runner.fetch(sql).await {
        Ok(result) => Execution {
            success: true,
            error: None,
            result,
        },
        Err(e) => Execution::failed(e),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Correct,
    Incorrect,
    /// The reference query itself failed.
    Unverifiable,
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub verdict: Verdict,
    pub user_result: Execution,
    pub expected: Option<ResultSet>,
    pub message: String,
}

impl Verification {
    pub fn is_correct(&self) -> bool {
        self.verdict == Verdict::Correct
    }
}

/// Runs the learner query, then the reference query, and compares the results.
pub async fn verify<R>(runner: &R, user_sql: &str, reference_sql: &str) -> Verification
where
    R: QueryRunner + ?Sized,
{
    let user_result = run_user_query(runner, user_sql).await;
    if !user_result.success {
        let message = format!(
            "SQL error: {}",
            user_result.error.as_deref().unwrap_or("unknown error")
        );
        return Verification {
            verdict: Verdict::Incorrect,
            user_result,
            expected: None,
            message,
        };
    }

    let expected = match runner.fetch(reference_sql).await {
        Ok(expected) => expected,
        Err(e) => {
            tracing::error!("reference query failed: {}", e);
            return Verification {
                verdict: Verdict::Unverifiable,
                user_result,
                expected: None,
                message: "Could not run the reference answer, please try again later".to_string(),
            };
        }
    };

    let (verdict, message) = if result_sets_match(&user_result.result.rows, &expected.rows) {
        (Verdict::Correct, "Correct, well done!")
    } else {
        (Verdict::Incorrect, "Not quite right, try again")
    };

    Verification {
        verdict,
        user_result,
        expected: Some(expected),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Answers from a fixed table of queries and records what was executed.
    #[derive(Default)]
    struct FakeRunner {
        answers: HashMap<String, Result<ResultSet, String>>,
        executed: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        fn answer(mut self, sql: &str, result: Result<ResultSet, String>) -> Self {
            self.answers.insert(sql.to_string(), result);
            self
        }

        fn executed(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QueryRunner for FakeRunner {
        async fn fetch(&self, sql: &str) -> Result<ResultSet, String> {
            self.executed.lock().unwrap().push(sql.to_string());
            self.answers
                .get(sql)
                .cloned()
                .unwrap_or_else(|| Err(format!("unexpected query: {}", sql)))
        }
    }

    fn sno_rows(values: &[&str]) -> ResultSet {
        ResultSet {
            columns: vec![Column {
                name: "sno".to_string(),
                kind: ColumnKind::Text,
            }],
            rows: values.iter().map(|v| vec![Some(v.to_string())]).collect(),
        }
    }

    #[test]
    fn test_check_read_only() {
        assert_eq!(check_read_only("  select * from practice_student"), Ok(()));
        assert_eq!(
            check_read_only("DROP TABLE practice_student"),
            Err(SandboxError::NotReadQuery)
        );
        assert_eq!(
            check_read_only("WITH t AS (SELECT 1) SELECT * FROM t"),
            Err(SandboxError::NotReadQuery)
        );
        assert_eq!(
            check_read_only("SELECT 1; delete from practice_sc"),
            Err(SandboxError::Disallowed("DELETE"))
        );
        // Substring match over-blocks identifiers.
        assert_eq!(
            check_read_only("SELECT created_at FROM exercises"),
            Err(SandboxError::Disallowed("CREATE"))
        );
        assert_eq!(
            SandboxError::Disallowed("UPDATE").to_string(),
            "UPDATE operations are not allowed"
        );
    }

    #[test]
    fn test_single_statement_only() {
        assert_eq!(check_read_only("SELECT 1;"), Ok(()));
        assert_eq!(check_read_only("SELECT 1 ;  \n"), Ok(()));
        assert_eq!(
            check_read_only("SELECT 1 AS a; SELECT 'x' AS b, 'y' AS c"),
            Err(SandboxError::MultipleStatements)
        );
        assert_eq!(
            check_read_only("SELECT 1;;SELECT 2;"),
            Err(SandboxError::MultipleStatements)
        );
    }

    #[test]
    fn test_denylist_order_decides_reported_keyword() {
        assert_eq!(
            check_read_only("SELECT 'insert', 'drop'"),
            Err(SandboxError::Disallowed("DROP"))
        );
    }

    #[tokio::test]
    async fn test_rejected_query_is_never_executed() {
        let runner = FakeRunner::default();

        let outcome = run_user_query(&runner, "DELETE FROM practice_sc").await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Only SELECT queries can be executed"));
        assert!(outcome.result.rows.is_empty());

        let outcome = run_user_query(&runner, "SELECT * FROM t; TRUNCATE t").await;
        assert_eq!(outcome.error.as_deref(), Some("TRUNCATE operations are not allowed"));

        assert!(runner.executed().is_empty());
    }

    #[tokio::test]
    async fn test_verify_correct_regardless_of_order() {
        let runner = FakeRunner::default()
            .answer("SELECT Sno FROM practice_sc WHERE Grade < 60", Ok(sno_rows(&["2022103", "2022102"])))
            .answer(
                "SELECT DISTINCT Sno FROM practice_sc WHERE Grade < 60",
                Ok(sno_rows(&["2022102", "2022103"])),
            );

        let verification = verify(
            &runner,
            "SELECT Sno FROM practice_sc WHERE Grade < 60",
            "SELECT DISTINCT Sno FROM practice_sc WHERE Grade < 60",
        )
        .await;
        assert_eq!(verification.verdict, Verdict::Correct);
        assert!(verification.is_correct());
        assert_eq!(verification.message, "Correct, well done!");
        assert_eq!(verification.expected.map(|e| e.row_count()), Some(2));
    }

    #[tokio::test]
    async fn test_verify_incorrect_on_different_row_count() {
        let runner = FakeRunner::default()
            .answer("SELECT sno FROM a", Ok(sno_rows(&["1", "1", "2"])))
            .answer("SELECT sno FROM b", Ok(sno_rows(&["1", "2"])));

        let verification = verify(&runner, "SELECT sno FROM a", "SELECT sno FROM b").await;
        assert_eq!(verification.verdict, Verdict::Incorrect);
        assert!(verification.user_result.success);
    }

    #[tokio::test]
    async fn test_user_error_short_circuits() {
        let runner = FakeRunner::default().answer(
            "SELECT * FROM missing",
            Err("relation \"missing\" does not exist".to_string()),
        );

        let verification = verify(&runner, "SELECT * FROM missing", "SELECT 1").await;
        assert_eq!(verification.verdict, Verdict::Incorrect);
        assert_eq!(
            verification.message,
            "SQL error: relation \"missing\" does not exist"
        );
        assert!(verification.expected.is_none());
        assert_eq!(runner.executed(), vec!["SELECT * FROM missing".to_string()]);
    }

    #[tokio::test]
    async fn test_reference_error_is_unverifiable() {
        let runner = FakeRunner::default()
            .answer("SELECT 1", Ok(sno_rows(&["1"])))
            .answer("SELECT broken", Err("syntax error".to_string()));

        let verification = verify(&runner, "SELECT 1", "SELECT broken").await;
        assert_eq!(verification.verdict, Verdict::Unverifiable);
        assert!(!verification.is_correct());
        assert!(verification.user_result.success);
    }

    #[test]
    fn test_result_set_json_rendering() {
        let result = ResultSet {
            columns: vec![
                Column {
                    name: "sno".to_string(),
                    kind: ColumnKind::Text,
                },
                Column {
                    name: "grade".to_string(),
                    kind: ColumnKind::Integer,
                },
                Column {
                    name: "passed".to_string(),
                    kind: ColumnKind::Boolean,
                },
                Column {
                    name: "avg".to_string(),
                    kind: ColumnKind::Text,
                },
            ],
            rows: vec![vec![
                Some("2022101".to_string()),
                Some("92".to_string()),
                Some("t".to_string()),
                Some("77.5000000000000000".to_string()),
            ]],
        };

        let json = serde_json::to_value(Execution {
            success: true,
            error: None,
            result,
        })
        .unwrap();
        assert_eq!(json["success"], true);
        assert!(json.get("error").is_none());
        assert_eq!(json["rowCount"], 1);
        assert_eq!(json["fields"], serde_json::json!(["sno", "grade", "passed", "avg"]));
        assert_eq!(json["rows"][0]["grade"], 92);
        assert_eq!(json["rows"][0]["passed"], true);
        assert_eq!(json["rows"][0]["avg"], "77.5000000000000000");
    }

    #[tokio::test]
    #[ignore = "needs a PostgreSQL DATABASE_URL"]
    async fn test_empty_result_keeps_column_names() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.unwrap();

        let result = QueryRunner::fetch(&pool, "SELECT 1 AS sno, 'x' AS cname WHERE false")
            .await
            .unwrap();
        assert_eq!(result.row_count(), 0);
        assert_eq!(result.field_names(), vec!["sno", "cname"]);

        let result = QueryRunner::fetch(&pool, "SELECT 7 AS grade").await.unwrap();
        assert_eq!(result.json_rows()[0]["grade"], 7);
    }

    #[test]
    fn test_null_renders_as_json_null() {
        let result = ResultSet {
            columns: vec![Column {
                name: "grade".to_string(),
                kind: ColumnKind::Integer,
            }],
            rows: vec![vec![None]],
        };
        assert_eq!(result.json_rows()[0]["grade"], Value::Null);
    }
}
