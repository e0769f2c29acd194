//! Atomic commit of queued statement batches.

use cipherstore_db::{Connection, ResultSet, Statement, TransactionMode, Value};
use log::debug;

use super::error::{SessionError, SessionResult};

/// Collects the statements of one transaction in call order.
///
/// Handed to the body passed to
/// [`Session::transaction`](crate::Session::transaction). Nothing runs
/// until the body returns; the queued statements are then committed as a
/// single unit.
#[derive(Debug, Default)]
pub struct TransactionBuilder {
    statements: Vec<Statement>,
}

impl TransactionBuilder {
    pub(crate) const fn new() -> Self {
        Self {
            statements: Vec::new(),
        }
    }

    /// Queues a statement and returns its position in the batch.
    ///
    /// The position is also the index of its [`ResultSet`] in the
    /// transaction's return value.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::BindingArity`] if the placeholder count does
    /// not match `params`.
    pub fn execute_sql(
        &mut self,
        text: impl Into<String>,
        params: impl Into<Vec<Value>>,
    ) -> SessionResult<usize> {
        let statement = Statement::new(text, params)?;
        Ok(self.push(statement))
    }

    /// Queues an already-built statement and returns its position.
    pub fn push(&mut self, statement: Statement) -> usize {
        self.statements.push(statement);
        self.statements.len() - 1
    }

    /// Returns the number of queued statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Returns `true` when nothing has been queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub(crate) fn into_statements(self) -> Vec<Statement> {
        self.statements
    }
}

/// Runs `statements` in one engine transaction.
///
/// Stops at the first failing statement and rolls the whole batch back.
/// An empty batch never touches the engine.
pub(crate) fn commit_batch(
    conn: &Connection,
    statements: &[Statement],
    mode: TransactionMode,
) -> SessionResult<Vec<ResultSet>> {
    if statements.is_empty() {
        return Ok(Vec::new());
    }

    let tx = conn
        .transaction(mode)
        .map_err(|err| SessionError::aborted_at(None, err.into()))?;
    let mut results = Vec::with_capacity(statements.len());
    for (index, statement) in statements.iter().enumerate() {
        match tx.execute(statement) {
            Ok(result) => results.push(result),
            Err(err) => {
                debug!("transaction rolled back at statement {index}: {err}");
                return Err(SessionError::aborted_at(Some(index), err.into()));
            }
        }
    }
    tx.commit()
        .map_err(|err| SessionError::aborted_at(None, err.into()))?;
    Ok(results)
}
