use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    PgPool, Postgres, Row, Transaction,
    postgres::{PgPoolOptions, PgRow},
};
use uuid::Uuid;

use crate::{
    Money, OrderId, OrderRecord, OrderState, PendingOrder, Result, StoreError, UserId, Withdrawal,
    store::{LedgerStore, LedgerTransaction, OrderStore, WithdrawalStore},
};

const SUM_ACCEPTED: &str = r#"
    SELECT COALESCE(SUM(accrual), 0)::BIGINT
    FROM orders
    WHERE user_id = $1 AND status = 'PROCESSED'
"#;

const SUM_WITHDRAWALS: &str = r#"
    SELECT COALESCE(SUM(sum), 0)::BIGINT
    FROM withdrawals
    WHERE user_id = $1
"#;

/// Persisted names of the states an order may leave for `next`.
fn source_states(next: OrderState) -> Vec<&'static str> {
    OrderState::ALL
        .into_iter()
        .filter(|from| from.can_transition_to(next))
        .map(|from| from.as_str())
        .collect()
}

/// PostgreSQL-backed ledger store implementation.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Creates a new PostgreSQL ledger store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool to `database_uri`.
    pub async fn connect(database_uri: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_uri)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("ledger migrations applied");
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<OrderRecord> {
        let status: String = row.try_get("status")?;
        let state = OrderState::parse(&status)
            .ok_or_else(|| StoreError::InvalidRecord(format!("unknown order status {status}")))?;
        let accrual: Option<i64> = row.try_get("accrual")?;

        Ok(OrderRecord {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            number: row.try_get("number")?,
            state,
            accrual: accrual.map(Money::from_cents),
            uploaded_at: row.try_get("uploaded_at")?,
        })
    }

    fn row_to_withdrawal(row: PgRow) -> Result<Withdrawal> {
        Ok(Withdrawal {
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            order: row.try_get("order_number")?,
            sum: Money::from_cents(row.try_get("sum")?),
            processed_at: row.try_get("processed_at")?,
        })
    }
}

#[async_trait]
impl OrderStore for PostgresLedgerStore {
    async fn create_order(
        &self,
        user_id: UserId,
        number: &str,
        state: OrderState,
        uploaded_at: DateTime<Utc>,
    ) -> Result<OrderId> {
        if state == OrderState::Accepted {
            return Err(StoreError::InvalidStateUpdate(state));
        }

        let id = OrderId::new();
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, number, status, uploaded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(number)
        .bind(state.as_str())
        .bind(uploaded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_order_number")
            {
                return StoreError::DuplicateOrderNumber(number.to_string());
            }
            StoreError::Database(e)
        })?;

        Ok(id)
    }

    async fn find_owner_by_number(&self, number: &str) -> Result<Option<UserId>> {
        let owner: Option<Uuid> = sqlx::query_scalar("SELECT user_id FROM orders WHERE number = $1")
            .bind(number)
            .fetch_optional(&self.pool)
            .await?;

        Ok(owner.map(UserId::from_uuid))
    }

    async fn list_orders_by_user(&self, user_id: UserId) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, number, status, accrual, uploaded_at
            FROM orders
            WHERE user_id = $1
            ORDER BY uploaded_at DESC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn fetch_pending_batch(&self, limit: usize) -> Result<Vec<PendingOrder>> {
        let rows = sqlx::query(
            r#"
            SELECT id, number, user_id
            FROM orders
            WHERE status IN ('NEW', 'PROCESSING')
            ORDER BY uploaded_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(PendingOrder {
                    id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
                    number: row.try_get("number")?,
                    user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
                })
            })
            .collect()
    }

    async fn set_state(&self, order_id: OrderId, state: OrderState) -> Result<()> {
        if matches!(state, OrderState::New | OrderState::Accepted) {
            return Err(StoreError::InvalidStateUpdate(state));
        }

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1
            WHERE id = $2 AND status = ANY($3)
            "#,
        )
        .bind(state.as_str())
        .bind(order_id.as_uuid())
        .bind(source_states(state))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotPending(order_id));
        }
        Ok(())
    }

    async fn set_state_accepted(&self, order_id: OrderId, accrual: Money) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'PROCESSED',
                accrual = $1
            WHERE id = $2 AND status = ANY($3)
            "#,
        )
        .bind(accrual.cents())
        .bind(order_id.as_uuid())
        .bind(source_states(OrderState::Accepted))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotPending(order_id));
        }
        Ok(())
    }
}

#[async_trait]
impl WithdrawalStore for PostgresLedgerStore {
    async fn sum_accepted(&self, user_id: UserId) -> Result<Money> {
        let cents: i64 = sqlx::query_scalar(SUM_ACCEPTED)
            .bind(user_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        Ok(Money::from_cents(cents))
    }

    async fn sum_withdrawals(&self, user_id: UserId) -> Result<Money> {
        let cents: i64 = sqlx::query_scalar(SUM_WITHDRAWALS)
            .bind(user_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        Ok(Money::from_cents(cents))
    }

    async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, order_number, sum, processed_at
            FROM withdrawals
            WHERE user_id = $1
            ORDER BY processed_at DESC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_withdrawal).collect()
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        let tx = self.pool.begin().await?;
        Ok(PostgresTransaction { tx })
    }
}

/// Transaction over [`PostgresLedgerStore`]. Rolled back on drop unless committed.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PostgresTransaction {
    async fn lock_user(&mut self, user_id: UserId) -> Result<()> {
        // Held until the transaction ends.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(user_id.to_string())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn sum_accepted(&mut self, user_id: UserId) -> Result<Money> {
        let cents: i64 = sqlx::query_scalar(SUM_ACCEPTED)
            .bind(user_id.as_uuid())
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(Money::from_cents(cents))
    }

    async fn sum_withdrawals(&mut self, user_id: UserId) -> Result<Money> {
        let cents: i64 = sqlx::query_scalar(SUM_WITHDRAWALS)
            .bind(user_id.as_uuid())
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(Money::from_cents(cents))
    }

    async fn append_withdrawal(&mut self, withdrawal: Withdrawal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO withdrawals (id, user_id, order_number, sum, processed_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(withdrawal.user_id.as_uuid())
        .bind(&withdrawal.order)
        .bind(withdrawal.sum.cents())
        .bind(withdrawal.processed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
