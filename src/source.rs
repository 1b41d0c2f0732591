use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{ConfigurationError, Error};
use crate::observer::TransactionObserverSink;
use crate::value::{Row, Value};

/// A prepared statement: the SQL layer's contract with this crate. Binding,
/// planning and row decoding live entirely on the implementer's side; this
/// crate only asks for a source-table set (for transaction-scope filtering)
/// and a full fetch.
pub trait Statement {
    fn placeholder_count(&self) -> usize;
    fn bind(&mut self, arguments: &[Value]) -> Result<(), Error>;
    fn source_tables(&self) -> HashSet<String>;
    fn fetch_all(&mut self) -> Result<Vec<Row>, Error>;
}

/// A live database handle capable of preparing statements. Implemented by
/// whatever embeds this crate (e.g. a `rusqlite`-backed adapter); this crate
/// never constructs one itself.
pub trait Database {
    fn prepare(&self, sql: &str) -> Result<Box<dyn Statement>, Error>;
}

/// The host's serial write queue. `write` runs `job` against the live
/// database and blocks the caller until it returns — the same contract as
/// GRDB's `DatabaseWriter.write(_:)`, which is how this crate gets
/// synchronous `ConfigurationError`s out of `perform_fetch` despite never
/// touching the connection itself.
///
/// `add_transaction_observer` wires this crate's [`TransactionObserverSink`]
/// into the host's preupdate/commit/rollback hooks (e.g.
/// `sqlite3_preupdate_hook`/`sqlite3_commit_hook`/`sqlite3_rollback_hook`).
pub trait DatabaseWriter: Send + Sync {
    fn write(&self, job: Box<dyn FnOnce(&dyn Database) + Send>);
    fn add_transaction_observer(&self, observer: Arc<dyn TransactionObserverSink>);
}

/// Runs `f` on `writer`'s serial queue and returns its result, bridging the
/// void-returning [`DatabaseWriter::write`] contract back into an ordinary
/// `Result`-returning call. Relies on `write` being synchronous: the slot is
/// guaranteed populated by the time `write` returns.
pub fn run_on_writer<T: Send + 'static>(
    writer: &dyn DatabaseWriter,
    f: impl FnOnce(&dyn Database) -> T + Send + 'static,
) -> T {
    let slot: Arc<std::sync::Mutex<Option<T>>> = Arc::new(std::sync::Mutex::new(None));
    let slot2 = Arc::clone(&slot);
    writer.write(Box::new(move |db| {
        *slot2.lock().unwrap() = Some(f(db));
    }));
    slot.lock()
        .unwrap()
        .take()
        .expect("DatabaseWriter::write must invoke its job exactly once, synchronously")
}

/// A request built with an external query-builder DSL (joins, associations,
/// etc.). Out of scope for this crate; modeled as an opaque closure over a
/// `Database`.
pub type QueryBuilderRequest = Box<dyn Fn(&dyn Database) -> Result<Box<dyn Statement>, Error> + Send + Sync>;

/// A uniform handle that produces a prepared statement from either raw SQL
/// (with optional bind arguments) or a query-builder request.
pub enum QuerySource {
    Sql { text: String, arguments: Vec<Value> },
    Request(QueryBuilderRequest),
}

impl QuerySource {
    pub fn sql(text: impl Into<String>) -> Self {
        QuerySource::Sql { text: text.into(), arguments: Vec::new() }
    }

    pub fn sql_with_arguments(text: impl Into<String>, arguments: Vec<Value>) -> Self {
        QuerySource::Sql { text: text.into(), arguments }
    }

    pub fn request(request: QueryBuilderRequest) -> Self {
        QuerySource::Request(request)
    }

    /// Prepares the statement and reports its source tables. For the SQL
    /// variant, arguments are validated against the statement's placeholder
    /// arity and bound before returning.
    pub fn prepare(&self, db: &dyn Database) -> Result<(Box<dyn Statement>, HashSet<String>), Error> {
        let statement = match self {
            QuerySource::Sql { text, arguments } => {
                let mut statement = db.prepare(text)?;
                let expected = statement.placeholder_count();
                if expected != arguments.len() {
                    return Err(Error::Configuration(ConfigurationError::ArgumentCountMismatch {
                        expected,
                        got: arguments.len(),
                    }));
                }
                statement.bind(arguments)?;
                statement
            }
            QuerySource::Request(request) => request(db)?,
        };
        let tables = statement.source_tables();
        Ok((statement, tables))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeStatement {
        rows: Vec<Row>,
        tables: HashSet<String>,
        placeholders: usize,
        bound: RefCell<Vec<Value>>,
    }

    impl Statement for FakeStatement {
        fn placeholder_count(&self) -> usize {
            self.placeholders
        }
        fn bind(&mut self, arguments: &[Value]) -> Result<(), Error> {
            *self.bound.borrow_mut() = arguments.to_vec();
            Ok(())
        }
        fn source_tables(&self) -> HashSet<String> {
            self.tables.clone()
        }
        fn fetch_all(&mut self) -> Result<Vec<Row>, Error> {
            Ok(self.rows.clone())
        }
    }

    struct FakeDb;

    impl Database for FakeDb {
        fn prepare(&self, _sql: &str) -> Result<Box<dyn Statement>, Error> {
            Ok(Box::new(FakeStatement {
                rows: vec![],
                tables: ["people".to_string()].into_iter().collect(),
                placeholders: 1,
                bound: RefCell::new(vec![]),
            }))
        }
    }

    #[test]
    fn argument_count_mismatch_is_configuration_error() {
        let source = QuerySource::sql("select * from people where id = ?");
        let db = FakeDb;
        let err = source.prepare(&db).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::ArgumentCountMismatch { expected: 1, got: 0 })
        ));
    }

    #[test]
    fn matching_arguments_prepare_successfully() {
        let source = QuerySource::sql_with_arguments(
            "select * from people where id = ?",
            vec![Value::Integer(1)],
        );
        let db = FakeDb;
        let (_, tables) = source.prepare(&db).unwrap();
        assert!(tables.contains("people"));
    }
}
