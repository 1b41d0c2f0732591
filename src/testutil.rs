//! A minimal in-memory [`Database`]/[`DatabaseWriter`] pair for exercising
//! the controller without a real SQL engine. Test-only: gated behind the
//! `testutil` feature so integration tests in `tests/` can depend on it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::observer::TransactionObserverSink;
use crate::source::{Database, DatabaseWriter, Statement};
use crate::value::{Row, Value};

/// A single named table, queried in full by every statement prepared
/// against it. No SQL parsing: `prepare`'s `sql` argument is ignored, so
/// this is only useful for exercising the diff/delegate pipeline, not SQL
/// semantics.
pub struct MemoryWriter {
    table_name: String,
    rows: Arc<Mutex<Vec<Row>>>,
    observers: Mutex<Vec<Arc<dyn TransactionObserverSink>>>,
}

impl MemoryWriter {
    pub fn new(table_name: impl Into<String>, rows: Vec<Row>) -> Self {
        MemoryWriter {
            table_name: table_name.into(),
            rows: Arc::new(Mutex::new(rows)),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Runs `body` against the table, then notifies every registered
    /// observer as if the host's own commit hook had just fired: one
    /// `table_changed` for the table, then `committed`.
    pub fn transact(&self, body: impl FnOnce(&mut Vec<Row>)) {
        body(&mut self.rows.lock().unwrap());
        let observers = self.observers.lock().unwrap();
        for observer in observers.iter() {
            observer.table_changed(&self.table_name);
        }
        let db = MemoryDatabase { table_name: self.table_name.clone(), rows: Arc::clone(&self.rows) };
        for observer in observers.iter() {
            observer.committed(&db);
        }
    }

    /// Like [`Self::transact`], but rolls back: observers are told the
    /// transaction failed and `body`'s mutation is discarded.
    pub fn transact_and_rollback(&self, body: impl FnOnce(&mut Vec<Row>)) {
        let mut snapshot = self.rows.lock().unwrap().clone();
        body(&mut snapshot);
        let observers = self.observers.lock().unwrap();
        for observer in observers.iter() {
            observer.table_changed(&self.table_name);
        }
        for observer in observers.iter() {
            observer.rolled_back();
        }
    }
}

impl DatabaseWriter for MemoryWriter {
    fn write(&self, job: Box<dyn FnOnce(&dyn Database) + Send>) {
        let db = MemoryDatabase { table_name: self.table_name.clone(), rows: Arc::clone(&self.rows) };
        job(&db);
    }

    fn add_transaction_observer(&self, observer: Arc<dyn TransactionObserverSink>) {
        self.observers.lock().unwrap().push(observer);
    }
}

struct MemoryDatabase {
    table_name: String,
    rows: Arc<Mutex<Vec<Row>>>,
}

impl Database for MemoryDatabase {
    fn prepare(&self, _sql: &str) -> Result<Box<dyn Statement>, Error> {
        Ok(Box::new(MemoryStatement { table_name: self.table_name.clone(), rows: Arc::clone(&self.rows) }))
    }
}

struct MemoryStatement {
    table_name: String,
    rows: Arc<Mutex<Vec<Row>>>,
}

impl Statement for MemoryStatement {
    fn placeholder_count(&self) -> usize {
        0
    }

    fn bind(&mut self, _arguments: &[Value]) -> Result<(), Error> {
        Ok(())
    }

    fn source_tables(&self) -> HashSet<String> {
        std::iter::once(self.table_name.clone()).collect()
    }

    fn fetch_all(&mut self) -> Result<Vec<Row>, Error> {
        Ok(self.rows.lock().unwrap().clone())
    }
}
