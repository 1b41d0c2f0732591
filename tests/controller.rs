#![cfg(feature = "testutil")]

use std::sync::{Arc, Mutex, Weak};

use fetched_records::testutil::MemoryWriter;
use fetched_records::{
    DatabaseWriter, Error, FetchedRecordsController, FetchedRecordsDelegate, FetchedRecordsEvent,
    QuerySource, RecordIdentity, Row, Value,
};

#[derive(Debug, Clone, PartialEq)]
struct Person {
    id: i64,
    name: String,
}

fn person_row(id: i64, name: &str) -> Row {
    let mut row = Row::new();
    row.set("id", id).set("name", name);
    row
}

fn decode(row: &Row) -> Person {
    let id = match row.get("id") {
        Some(Value::Integer(v)) => *v,
        _ => panic!("missing id"),
    };
    let name = match row.get("name") {
        Some(Value::Text(v)) => v.clone(),
        _ => panic!("missing name"),
    };
    Person { id, name }
}

#[derive(Default)]
struct RecordingDelegate {
    events: Mutex<Vec<String>>,
    failures: Mutex<Vec<Error>>,
}

impl FetchedRecordsDelegate<Person> for RecordingDelegate {
    fn will_change_records(&self, _controller: &FetchedRecordsController<Person>) {
        self.events.lock().unwrap().push("will".to_string());
    }

    fn did_change_record(&self, _controller: &FetchedRecordsController<Person>, event: FetchedRecordsEvent<Person>) {
        let label = match event {
            FetchedRecordsEvent::Insertion { record, .. } => format!("insert:{}", record.id),
            FetchedRecordsEvent::Deletion { record, .. } => format!("delete:{}", record.id),
            FetchedRecordsEvent::Move { record, .. } => format!("move:{}", record.id),
            FetchedRecordsEvent::Update { record, .. } => format!("update:{}", record.id),
        };
        self.events.lock().unwrap().push(label);
    }

    fn did_change_records(&self, _controller: &FetchedRecordsController<Person>) {
        self.events.lock().unwrap().push("did".to_string());
    }

    fn did_fail(&self, _controller: &FetchedRecordsController<Person>, error: Error) {
        self.failures.lock().unwrap().push(error);
    }
}

fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..20_000 {
        if predicate() {
            return;
        }
        std::thread::yield_now();
    }
    panic!("condition never became true");
}

fn controller_with(rows: Vec<Row>) -> (FetchedRecordsController<Person>, Arc<MemoryWriter>) {
    let writer = Arc::new(MemoryWriter::new("people", rows));
    let controller = FetchedRecordsController::new(
        Arc::clone(&writer) as Arc<dyn DatabaseWriter>,
        QuerySource::sql("select id, name from people order by id"),
        decode,
    )
    .with_identity(RecordIdentity::new(|a: &Person, b: &Person| a.id == b.id));
    controller.perform_fetch().unwrap();
    (controller, writer)
}

#[test]
fn initial_fetch_reflects_seed_rows() {
    let (controller, _writer) = controller_with(vec![person_row(1, "alice"), person_row(2, "bob")]);
    assert_eq!(
        controller.fetched_records(),
        Some(vec![Person { id: 1, name: "alice".to_string() }, Person { id: 2, name: "bob".to_string() }])
    );
}

#[test]
fn insert_fires_single_insertion_event() {
    let (controller, writer) = controller_with(vec![person_row(1, "alice")]);
    let delegate = Arc::new(RecordingDelegate::default());
    controller.set_delegate(Arc::downgrade(&delegate) as Weak<dyn FetchedRecordsDelegate<Person>>);

    writer.transact(|rows| rows.push(person_row(2, "bob")));
    wait_until(|| controller.count() == 2);

    assert_eq!(delegate.events.lock().unwrap().clone(), vec!["will", "insert:2", "did"]);
}

#[test]
fn update_in_place_fires_single_update_event() {
    let (controller, writer) = controller_with(vec![person_row(1, "alice"), person_row(2, "bob")]);
    let delegate = Arc::new(RecordingDelegate::default());
    controller.set_delegate(Arc::downgrade(&delegate) as Weak<dyn FetchedRecordsDelegate<Person>>);

    writer.transact(|rows| rows[1] = person_row(2, "bobby"));
    wait_until(|| controller.record_at(1) == Person { id: 2, name: "bobby".to_string() });

    assert_eq!(delegate.events.lock().unwrap().clone(), vec!["will", "update:2", "did"]);
}

#[test]
fn move_without_content_change_fires_single_move_event() {
    let (controller, writer) =
        controller_with(vec![person_row(1, "alice"), person_row(2, "bob"), person_row(3, "carl")]);
    let delegate = Arc::new(RecordingDelegate::default());
    controller.set_delegate(Arc::downgrade(&delegate) as Weak<dyn FetchedRecordsDelegate<Person>>);

    writer.transact(|rows| rows.swap(0, 2));
    wait_until(|| controller.record_at(0) == Person { id: 3, name: "carl".to_string() });

    assert_eq!(delegate.events.lock().unwrap().clone(), vec!["will", "move:3", "did"]);
}

#[test]
fn rollback_does_not_recompute() {
    let (controller, writer) = controller_with(vec![person_row(1, "alice")]);
    let delegate = Arc::new(RecordingDelegate::default());
    controller.set_delegate(Arc::downgrade(&delegate) as Weak<dyn FetchedRecordsDelegate<Person>>);

    writer.transact_and_rollback(|rows| rows.push(person_row(2, "bob")));

    // A subsequent, genuinely committed transaction proves the rolled-back
    // one never scheduled a diff: if it had, this commit's delegate events
    // would include stale entries for the rolled-back insert too.
    writer.transact(|rows| rows.push(person_row(3, "carl")));
    wait_until(|| controller.count() == 2);

    assert_eq!(
        controller.fetched_records(),
        Some(vec![Person { id: 1, name: "alice".to_string() }, Person { id: 3, name: "carl".to_string() }])
    );
    assert_eq!(delegate.events.lock().unwrap().clone(), vec!["will", "insert:3", "did"]);
}

#[test]
fn reattaching_resyncs_without_refetching() {
    let (controller, writer) = controller_with(vec![person_row(1, "alice")]);
    writer.transact(|rows| rows.push(person_row(2, "bob")));
    wait_until(|| controller.count() == 2);

    // Re-attach: this must not refetch (count stays whatever the consumer
    // last delivered), only resync the diff baseline.
    controller.perform_fetch().unwrap();
    assert_eq!(controller.count(), 2);
}
