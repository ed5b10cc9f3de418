#![allow(dead_code)]

use asupersync::runtime::RuntimeBuilder;
use relmodel::{
    Columns, Cx, EntityTypeDescriptor, Error, JunctionTable, Outcome, PersistenceClient,
    PersistenceError, PersistenceOperation, Value,
};
use std::future::Future;
use std::sync::{Arc, Mutex};

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn block_on<T>(f: impl Future<Output = T>) -> T {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(f)
}

#[derive(Debug, Default)]
struct State {
    log: Vec<String>,
    next_id: i64,
    fail_on: Option<usize>,
}

/// Records each write as one line and hands out sequential generated ids.
#[derive(Debug, Clone, Default)]
pub struct RecordingClient {
    state: Arc<Mutex<State>>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`th call (zero-based).
    pub fn failing_on(n: usize) -> Self {
        let client = Self::default();
        client.state.lock().unwrap().fail_on = Some(n);
        client
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    fn write(
        &self,
        op: PersistenceOperation,
        target: &str,
        line: String,
    ) -> Outcome<(), PersistenceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_on == Some(state.log.len()) {
            return Outcome::Err(PersistenceError::new(op, target, "duplicate key"));
        }
        state.log.push(line);
        Outcome::Ok(())
    }
}

fn cols(columns: &[(String, Value)]) -> String {
    columns
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl PersistenceClient for RecordingClient {
    fn insert_row(
        &self,
        _cx: &Cx,
        entity: &EntityTypeDescriptor,
        columns: &[(String, Value)],
    ) -> impl Future<Output = Outcome<Columns, PersistenceError>> + Send {
        let line = format!("INSERT {} ({})", entity.table_name, cols(columns));
        let outcome = match self.write(PersistenceOperation::InsertRow, &entity.name, line) {
            Outcome::Ok(()) => {
                let mut state = self.state.lock().unwrap();
                let generated = entity
                    .primary_columns
                    .iter()
                    .filter(|c| c.generated && !columns.iter().any(|(name, _)| *name == c.name))
                    .map(|c| {
                        state.next_id += 1;
                        (c.name.clone(), Value::BigInt(state.next_id))
                    })
                    .collect();
                Outcome::Ok(generated)
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        };
        async move { outcome }
    }

    fn update_row(
        &self,
        _cx: &Cx,
        entity: &EntityTypeDescriptor,
        key: &[(String, Value)],
        columns: &[(String, Value)],
    ) -> impl Future<Output = Outcome<(), PersistenceError>> + Send {
        let line = format!(
            "UPDATE {} SET {} WHERE {}",
            entity.table_name,
            cols(columns),
            cols(key)
        );
        let outcome = self.write(PersistenceOperation::UpdateRow, &entity.name, line);
        async move { outcome }
    }

    fn delete_row(
        &self,
        _cx: &Cx,
        entity: &EntityTypeDescriptor,
        key: &[(String, Value)],
    ) -> impl Future<Output = Outcome<(), PersistenceError>> + Send {
        let line = format!("DELETE {} WHERE {}", entity.table_name, cols(key));
        let outcome = self.write(PersistenceOperation::DeleteRow, &entity.name, line);
        async move { outcome }
    }

    fn insert_junction_row(
        &self,
        _cx: &Cx,
        junction: &JunctionTable,
        owner_key: &[(String, Value)],
        inverse_key: &[(String, Value)],
    ) -> impl Future<Output = Outcome<(), PersistenceError>> + Send {
        let line = format!(
            "LINK {} ({}, {})",
            junction.table_name,
            cols(owner_key),
            cols(inverse_key)
        );
        let outcome = self.write(
            PersistenceOperation::InsertJunctionRow,
            &junction.table_name,
            line,
        );
        async move { outcome }
    }

    fn delete_junction_row(
        &self,
        _cx: &Cx,
        junction: &JunctionTable,
        owner_key: &[(String, Value)],
        inverse_key: &[(String, Value)],
    ) -> impl Future<Output = Outcome<(), PersistenceError>> + Send {
        let line = format!(
            "UNLINK {} ({}, {})",
            junction.table_name,
            cols(owner_key),
            cols(inverse_key)
        );
        let outcome = self.write(
            PersistenceOperation::DeleteJunctionRow,
            &junction.table_name,
            line,
        );
        async move { outcome }
    }
}
