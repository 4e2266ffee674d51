use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, Clock, ProductId, SystemClock};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::ledger::{DEFAULT_RESERVATION_TTL_SECS, InventoryLedger};
use crate::reservation::{
    Reservation, ReservationLine, ReservationStatus, ReservationTransition, StockLevel,
    normalize_lines,
};

/// PostgreSQL-backed ledger.
///
/// Reservations decrement availability with a conditional
/// `UPDATE ... WHERE on_hand - held >= $n`, so two orders racing for the last
/// units are decided by row locks in the database. Stock rows are always
/// locked in product order.
#[derive(Clone)]
pub struct PostgresInventoryLedger {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
}

impl PostgresInventoryLedger {
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(
            pool,
            Arc::new(SystemClock),
            chrono::Duration::seconds(DEFAULT_RESERVATION_TTL_SECS),
        )
    }

    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>, ttl: chrono::Duration) -> Self {
        Self { pool, clock, ttl }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load(conn: &mut PgConnection, order_id: AggregateId) -> Result<Option<Reservation>> {
        let Some(row) = sqlx::query(
            "SELECT status, created_at, expires_at, updated_at FROM reservations WHERE order_id = $1",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
        else {
            return Ok(None);
        };

        let lines = sqlx::query(
            "SELECT product_id, quantity FROM reservation_lines WHERE order_id = $1 ORDER BY position",
        )
        .bind(order_id.as_uuid())
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|line| -> Result<ReservationLine> {
            Ok(ReservationLine {
                product_id: ProductId::new(line.try_get::<String, _>("product_id")?),
                quantity: to_u32(line.try_get("quantity")?),
            })
        })
        .collect::<Result<Vec<_>>>()?;

        Ok(Some(Reservation {
            order_id,
            lines,
            status: parse_status(&row.try_get::<String, _>("status")?)?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn require(conn: &mut PgConnection, order_id: AggregateId) -> Result<Reservation> {
        Self::load(conn, order_id)
            .await?
            .ok_or(LedgerError::NotFound { order_id })
    }

    /// Locks the reservation row and returns its status and expiry.
    async fn lock_reservation(
        tx: &mut Transaction<'_, Postgres>,
        order_id: AggregateId,
    ) -> Result<Option<(ReservationStatus, DateTime<Utc>)>> {
        let row = sqlx::query(
            "SELECT status, expires_at FROM reservations WHERE order_id = $1 FOR UPDATE",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await?;

        row.map(|row| -> Result<(ReservationStatus, DateTime<Utc>)> {
            Ok((
                parse_status(&row.try_get::<String, _>("status")?)?,
                row.try_get("expires_at")?,
            ))
        })
        .transpose()
    }

    /// Moves held reservations to `to`, adjusting their stock rows.
    async fn settle(
        tx: &mut Transaction<'_, Postgres>,
        order_ids: &[Uuid],
        to: ReservationStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            SELECT s.product_id FROM stock s
            WHERE s.product_id IN (
                SELECT product_id FROM reservation_lines WHERE order_id = ANY($1)
            )
            ORDER BY s.product_id
            FOR UPDATE
            "#,
        )
        .bind(order_ids)
        .fetch_all(&mut **tx)
        .await?;

        let confirming = to == ReservationStatus::Confirmed;
        sqlx::query(
            r#"
            UPDATE stock s
            SET held = s.held - l.total,
                on_hand = CASE WHEN $2 THEN s.on_hand - l.total ELSE s.on_hand END,
                confirmed = CASE WHEN $2 THEN s.confirmed + l.total ELSE s.confirmed END,
                updated_at = $3
            FROM (
                SELECT product_id, SUM(quantity)::BIGINT AS total
                FROM reservation_lines
                WHERE order_id = ANY($1)
                GROUP BY product_id
            ) l
            WHERE s.product_id = l.product_id
            "#,
        )
        .bind(order_ids)
        .bind(confirming)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            "UPDATE reservations SET status = $2, updated_at = $3 WHERE order_id = ANY($1)",
        )
        .bind(order_ids)
        .bind(to.as_str())
        .bind(now)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO reservation_transitions (order_id, from_status, to_status, reason, at)
            SELECT id, 'held', $2, $3, $4 FROM UNNEST($1::uuid[]) AS id
            "#,
        )
        .bind(order_ids)
        .bind(to.as_str())
        .bind(reason)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<AggregateId>> {
        let mut tx = self.pool.begin().await?;

        // SKIP LOCKED lets concurrent sweeps split the work instead of
        // queueing behind each other.
        let due: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT order_id FROM reservations
            WHERE status = 'held' AND expires_at <= $1
            ORDER BY order_id
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        if due.is_empty() {
            return Ok(vec![]);
        }

        Self::settle(&mut tx, &due, ReservationStatus::Released, "expired", now).await?;
        tx.commit().await?;

        metrics::counter!("reservations_expired_total").increment(due.len() as u64);
        Ok(due.into_iter().map(AggregateId::from_uuid).collect())
    }

    async fn level(&self, product_id: &ProductId) -> Result<StockLevel> {
        let row = sqlx::query("SELECT on_hand, held, confirmed FROM stock WHERE product_id = $1")
            .bind(product_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => stock_level(product_id, &row)?,
            None => StockLevel::empty(product_id.clone()),
        })
    }
}

fn parse_status(value: &str) -> Result<ReservationStatus> {
    ReservationStatus::parse(value)
        .ok_or_else(|| LedgerError::InvalidRequest(format!("unknown reservation status {value}")))
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn stock_level(product_id: &ProductId, row: &sqlx::postgres::PgRow) -> Result<StockLevel> {
    let on_hand = to_u64(row.try_get("on_hand")?);
    let held = to_u64(row.try_get("held")?);
    Ok(StockLevel {
        product_id: product_id.clone(),
        on_hand,
        held,
        confirmed: to_u64(row.try_get("confirmed")?),
        available: on_hand.saturating_sub(held),
    })
}

fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.constraint() == Some(constraint))
}

#[async_trait]
impl InventoryLedger for PostgresInventoryLedger {
    #[tracing::instrument(skip_all, fields(%order_id))]
    async fn reserve(
        &self,
        order_id: AggregateId,
        lines: &[ReservationLine],
    ) -> Result<Reservation> {
        let lines = normalize_lines(lines)?;
        let now = self.clock.now();
        self.expire_due(now).await?;

        let mut tx = self.pool.begin().await?;

        if let Some((status, _)) = Self::lock_reservation(&mut tx, order_id).await? {
            return match status {
                ReservationStatus::Held => Self::require(&mut tx, order_id).await,
                status => Err(LedgerError::Closed { order_id, status }),
            };
        }

        for line in &lines {
            let requested = i64::from(line.quantity);
            let updated = sqlx::query(
                r#"
                UPDATE stock SET held = held + $2, updated_at = $3
                WHERE product_id = $1 AND on_hand - held >= $2
                "#,
            )
            .bind(line.product_id.as_str())
            .bind(requested)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                let available: Option<i64> =
                    sqlx::query_scalar("SELECT on_hand - held FROM stock WHERE product_id = $1")
                        .bind(line.product_id.as_str())
                        .fetch_optional(&mut *tx)
                        .await?;
                // Dropping the transaction rolls back the lines already held.
                return Err(LedgerError::InsufficientStock {
                    product_id: line.product_id.clone(),
                    requested: u64::from(line.quantity),
                    available: available.map(to_u64).unwrap_or(0),
                });
            }
        }

        let expires_at = now + self.ttl;
        let inserted = sqlx::query(
            r#"
            INSERT INTO reservations (order_id, status, created_at, expires_at, updated_at)
            VALUES ($1, 'held', $2, $3, $2)
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(now)
        .bind(expires_at)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if is_unique_violation(&err, "reservations_pkey") {
                // A concurrent reserve for the same order won.
                drop(tx);
                let mut conn = self.pool.acquire().await?;
                let existing = Self::require(&mut conn, order_id).await?;
                return match existing.status {
                    ReservationStatus::Held => Ok(existing),
                    status => Err(LedgerError::Closed { order_id, status }),
                };
            }
            return Err(err.into());
        }

        for (position, line) in lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO reservation_lines (order_id, position, product_id, quantity)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(order_id.as_uuid())
            .bind(position as i32)
            .bind(line.product_id.as_str())
            .bind(i64::from(line.quantity))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO reservation_transitions (order_id, from_status, to_status, reason, at)
            VALUES ($1, NULL, 'held', 'reserved', $2)
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(%expires_at, "stock reserved");
        Ok(Reservation {
            order_id,
            lines,
            status: ReservationStatus::Held,
            created_at: now,
            expires_at,
            updated_at: now,
        })
    }

    #[tracing::instrument(skip_all, fields(%order_id))]
    async fn confirm(&self, order_id: AggregateId) -> Result<Reservation> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let (status, expires_at) = Self::lock_reservation(&mut tx, order_id)
            .await?
            .ok_or(LedgerError::NotFound { order_id })?;

        match status {
            ReservationStatus::Confirmed => Self::require(&mut tx, order_id).await,
            ReservationStatus::Released => Err(LedgerError::Released { order_id }),
            ReservationStatus::Held if expires_at <= now => {
                Self::settle(
                    &mut tx,
                    &[order_id.as_uuid()],
                    ReservationStatus::Released,
                    "expired",
                    now,
                )
                .await?;
                tx.commit().await?;
                metrics::counter!("reservations_expired_total").increment(1);
                Err(LedgerError::Expired { order_id })
            }
            ReservationStatus::Held => {
                Self::settle(
                    &mut tx,
                    &[order_id.as_uuid()],
                    ReservationStatus::Confirmed,
                    "confirmed",
                    now,
                )
                .await?;
                let reservation = Self::require(&mut tx, order_id).await?;
                tx.commit().await?;
                Ok(reservation)
            }
        }
    }

    #[tracing::instrument(skip_all, fields(%order_id))]
    async fn release(&self, order_id: AggregateId) -> Result<Reservation> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let (status, _) = Self::lock_reservation(&mut tx, order_id)
            .await?
            .ok_or(LedgerError::NotFound { order_id })?;

        match status {
            ReservationStatus::Confirmed => Err(LedgerError::AlreadyConfirmed { order_id }),
            ReservationStatus::Released => Self::require(&mut tx, order_id).await,
            ReservationStatus::Held => {
                Self::settle(
                    &mut tx,
                    &[order_id.as_uuid()],
                    ReservationStatus::Released,
                    "released",
                    now,
                )
                .await?;
                let reservation = Self::require(&mut tx, order_id).await?;
                tx.commit().await?;
                Ok(reservation)
            }
        }
    }

    async fn get_reservation(&self, order_id: AggregateId) -> Result<Option<Reservation>> {
        let mut conn = self.pool.acquire().await?;
        Self::load(&mut conn, order_id).await
    }

    async fn history(&self, order_id: AggregateId) -> Result<Vec<ReservationTransition>> {
        let rows = sqlx::query(
            r#"
            SELECT from_status, to_status, reason, at FROM reservation_transitions
            WHERE order_id = $1 ORDER BY id
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<ReservationTransition> {
                let from: Option<String> = row.try_get("from_status")?;
                Ok(ReservationTransition {
                    order_id,
                    from: from.as_deref().map(parse_status).transpose()?,
                    to: parse_status(&row.try_get::<String, _>("to_status")?)?,
                    reason: row.try_get("reason")?,
                    at: row.try_get("at")?,
                })
            })
            .collect()
    }

    #[tracing::instrument(skip_all, fields(%product_id))]
    async fn restock(&self, product_id: &ProductId, quantity: u32) -> Result<StockLevel> {
        if quantity == 0 {
            return Err(LedgerError::InvalidRequest(
                "restock quantity must be positive".into(),
            ));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO stock (product_id, on_hand, updated_at) VALUES ($1, $2, $3)
            ON CONFLICT (product_id) DO UPDATE
            SET on_hand = stock.on_hand + EXCLUDED.on_hand, updated_at = EXCLUDED.updated_at
            RETURNING on_hand, held, confirmed
            "#,
        )
        .bind(product_id.as_str())
        .bind(i64::from(quantity))
        .bind(self.clock.now())
        .fetch_one(&self.pool)
        .await?;

        stock_level(product_id, &row)
    }

    async fn stock_level(&self, product_id: &ProductId) -> Result<StockLevel> {
        self.expire_due(self.clock.now()).await?;
        self.level(product_id).await
    }

    #[tracing::instrument(skip(self))]
    async fn release_expired(&self) -> Result<Vec<AggregateId>> {
        let released = self.expire_due(self.clock.now()).await?;
        if !released.is_empty() {
            tracing::info!(count = released.len(), "released expired reservations");
        }
        Ok(released)
    }
}
