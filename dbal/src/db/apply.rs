//! Change-set application
//!
//! Applies one table's operations: every step is validated and rendered
//! before the first statement runs, so a rejected alteration leaves the
//! table untouched. Once execution starts a failing statement stops the
//! apply; earlier DDL stays applied unless the table runs inside its own
//! transaction.

use tracing::{error, info, trace, warn};

use crate::db::driver::Statement;
use crate::db::executor::Database;
use crate::error::{Error, Result};
use crate::schema::diff::{apply_operations, Operation};
use crate::schema::types::TableState;

/// Where a table apply stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    Diffed,
    Validating,
    Rendering,
    Executing,
    Applied,
    Failed,
}

/// Result of a successful apply
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    /// The table as it stands after the operations
    pub table: TableState,
    /// Statements in execution order
    pub statements: Vec<Statement>,
    pub state: ApplyState,
}

struct TableApply<'a> {
    table: &'a str,
    state: ApplyState,
}

impl<'a> TableApply<'a> {
    fn transition(&mut self, next: ApplyState) {
        trace!(table = self.table, from = ?self.state, to = ?next, "apply state");
        self.state = next;
    }

    fn fail(&mut self, err: Error) -> Error {
        self.transition(ApplyState::Failed);
        err
    }
}

/// Statements of one table apply, split by where they run
struct Rendered {
    /// Before the transaction opens
    setup: Vec<Statement>,
    body: Vec<Statement>,
    /// After it closes, also when the body fails
    teardown: Vec<Statement>,
}

impl Rendered {
    fn into_statements(self) -> Vec<Statement> {
        let mut statements = self.setup;
        statements.extend(self.body);
        statements.extend(self.teardown);
        statements
    }
}

/// Render every step of `operations` against `before`
pub fn render(db: &Database, before: &TableState, operations: &[Operation]) -> Result<Vec<Statement>> {
    let mut tracker = TableApply {
        table: &before.name,
        state: ApplyState::Diffed,
    };
    Ok(render_steps(db, before, operations, &mut tracker)?.into_statements())
}

fn render_steps(
    db: &Database,
    before: &TableState,
    operations: &[Operation],
    tracker: &mut TableApply<'_>,
) -> Result<Rendered> {
    let handler = db.handler();
    let after = apply_operations(before, operations);
    let steps = handler.plan(operations.to_vec());
    let (setup, teardown) = handler.session_wrap(&steps);
    let mut table = before.name.clone();
    let mut body = Vec::new();

    for step in &steps {
        tracker.transition(ApplyState::Validating);
        for operation in step.operations() {
            handler
                .validate(&table, operation)
                .map_err(|e| tracker.fail(e))?;
        }

        tracker.transition(ApplyState::Rendering);
        let rendered = handler
            .render_step(&table, step, before, &after)
            .map_err(|e| tracker.fail(e))?;
        trace!(table = %table, step = %step.describe(), statements = rendered.len(), "rendered");
        body.extend(rendered);

        for operation in step.operations() {
            if let Operation::RenameTable { to, .. } = operation {
                table = to.clone();
            }
        }
    }
    Ok(Rendered {
        setup,
        body,
        teardown,
    })
}

async fn run_statement(db: &Database, table: &str, statement: &Statement) -> Result<()> {
    match db.run(statement).await {
        Ok(_) => Ok(()),
        Err(err @ Error::ReadonlyConnectionError { .. }) => Err(err),
        Err(other) => Err(Error::DdlExecutionError {
            table: table.to_string(),
            statement: statement.clone(),
            source: Box::new(other),
        }),
    }
}

/// The body, inside its own transaction when `transactional`
async fn run_body(db: &Database, table: &str, body: &[Statement], transactional: bool) -> Result<()> {
    if transactional {
        db.begin_transaction().await?;
    }
    for statement in body {
        if let Err(err) = run_statement(db, table, statement).await {
            error!(table, error = %err, "statement failed");
            if transactional {
                if let Err(rollback) = db.rollback().await {
                    warn!(table, error = %rollback, "rollback failed");
                }
            }
            return Err(err);
        }
    }
    if transactional {
        db.commit().await?;
    }
    Ok(())
}

/// Apply `operations` to the table described by `before`
pub async fn apply(db: &Database, before: &TableState, operations: &[Operation]) -> Result<ApplyOutcome> {
    let after = apply_operations(before, operations);
    let mut tracker = TableApply {
        table: &before.name,
        state: ApplyState::Diffed,
    };
    if operations.is_empty() {
        tracker.transition(ApplyState::Applied);
        return Ok(ApplyOutcome {
            table: after,
            statements: Vec::new(),
            state: tracker.state,
        });
    }

    let rendered = render_steps(db, before, operations, &mut tracker)?;

    // Nothing reaches the driver from a read-only handle, not even BEGIN
    if db.is_readonly() {
        let sql = rendered
            .setup
            .iter()
            .chain(&rendered.body)
            .next()
            .map(|s| s.sql.clone())
            .unwrap_or_default();
        return Err(tracker.fail(Error::ReadonlyConnectionError { sql }));
    }

    tracker.transition(ApplyState::Executing);
    for statement in &rendered.setup {
        run_statement(db, &before.name, statement)
            .await
            .map_err(|e| tracker.fail(e))?;
    }

    let mut result = run_body(db, &before.name, &rendered.body, db.options().transaction_per_table).await;
    for statement in &rendered.teardown {
        if let Err(err) = run_statement(db, &before.name, statement).await {
            if result.is_ok() {
                result = Err(err);
            } else {
                warn!(table = %before.name, error = %err, "session restore failed");
            }
        }
    }
    result.map_err(|e| tracker.fail(e))?;

    tracker.transition(ApplyState::Applied);
    let statements = rendered.into_statements();
    info!(
        table = %after.name,
        operations = operations.len(),
        statements = statements.len(),
        "table applied"
    );

    Ok(ApplyOutcome {
        table: after,
        statements,
        state: tracker.state,
    })
}
