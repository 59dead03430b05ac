use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgExecutor, PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::shifts::repo_types::{NewShift, Shift, ShiftQuery};
use crate::shifts::services::{ensure_no_overlap, Candidate};
use crate::store::{generate_id, ShiftStore, UserStore, SHIFT_ID_LEN, USER_ID_LEN};
use crate::users::repo_types::{NewUser, User, UserChanges, UserRow};

const SHIFT_COLUMNS: &str = "id, user_id, start_at, end_at, created_at, updated_at";
const USER_COLUMNS: &str = "id, name, password_hash, role, created_at, updated_at";

// SQLSTATE codes
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const EXCLUSION_VIOLATION: &str = "23P01";

#[derive(Clone)]
pub struct PgStore {
    pub db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("run migrations")?;
        Ok(())
    }

    /// Serializes shift writes per owner until the transaction ends.
    async fn lock_user(tx: &mut Transaction<'_, Postgres>, user_id: &str) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(user_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn check_overlap(
        tx: &mut Transaction<'_, Postgres>,
        candidate: &Candidate<'_>,
    ) -> Result<(), StoreError> {
        let existing = select_shifts(&mut **tx, &ShiftQuery::for_user(candidate.user_id)).await?;
        ensure_no_overlap(candidate, &existing)?;
        Ok(())
    }
}

async fn select_shifts<'e, E: PgExecutor<'e>>(
    exec: E,
    query: &ShiftQuery,
) -> Result<Vec<Shift>, sqlx::Error> {
    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("SELECT {SHIFT_COLUMNS} FROM shifts WHERE TRUE"));
    if let Some(uid) = &query.user_id {
        qb.push(" AND user_id = ").push_bind(uid.clone());
    }
    if let Some(start) = query.start {
        qb.push(" AND start_at >= ").push_bind(start);
    }
    if let Some(end) = query.end {
        qb.push(" AND end_at <= ").push_bind(end);
    }
    qb.push(" ORDER BY start_at, id");
    if let Some(limit) = query.row_limit() {
        qb.push(" LIMIT ").push_bind(limit);
    }
    qb.build_query_as::<Shift>().fetch_all(exec).await
}

/// Maps constraint violations to their domain meaning.
fn classify(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        match db_err.code().as_deref() {
            Some(EXCLUSION_VIOLATION) => {
                return StoreError::Overlap {
                    conflicting_id: String::new(),
                }
            }
            Some(FOREIGN_KEY_VIOLATION) => return StoreError::UnknownUser,
            Some(UNIQUE_VIOLATION) if db_err.constraint() == Some("users_name_key") => {
                return StoreError::NameTaken
            }
            _ => {}
        }
    }
    StoreError::Other(e.into())
}

#[async_trait]
impl ShiftStore for PgStore {
    async fn list_shifts(&self, query: &ShiftQuery) -> Result<Vec<Shift>, StoreError> {
        Ok(select_shifts(&self.db, query).await?)
    }

    async fn find_shift(&self, id: &str) -> Result<Option<Shift>, StoreError> {
        let shift = sqlx::query_as::<_, Shift>(&format!(
            "SELECT {SHIFT_COLUMNS} FROM shifts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(shift)
    }

    async fn insert_shift(&self, new: NewShift) -> Result<Shift, StoreError> {
        let mut tx = self.db.begin().await?;
        Self::lock_user(&mut tx, &new.user_id).await?;
        Self::check_overlap(&mut tx, &Candidate::insert(&new)).await?;

        let shift = sqlx::query_as::<_, Shift>(&format!(
            r#"
            INSERT INTO shifts (id, user_id, start_at, end_at)
            VALUES ($1, $2, $3, $4)
            RETURNING {SHIFT_COLUMNS}
            "#
        ))
        .bind(generate_id(SHIFT_ID_LEN))
        .bind(&new.user_id)
        .bind(new.start)
        .bind(new.end)
        .fetch_one(&mut *tx)
        .await
        .map_err(classify)?;

        tx.commit().await?;
        debug!(shift_id = %shift.id, user_id = %shift.user_id, "shift inserted");
        Ok(shift)
    }

    async fn update_shift(&self, id: &str, owner: &str, change: NewShift) -> Result<Shift, StoreError> {
        let mut tx = self.db.begin().await?;
        // row lock first, then the new owner's lock; no path takes them in reverse
        let current: Option<String> =
            sqlx::query_scalar("SELECT user_id FROM shifts WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        match current {
            None => return Err(StoreError::NotFound),
            Some(actual) if actual != owner => {
                debug!(shift_id = %id, expected = %owner, %actual, "shift owner changed");
                return Err(StoreError::OwnerChanged);
            }
            Some(_) => {}
        }
        Self::lock_user(&mut tx, &change.user_id).await?;
        Self::check_overlap(&mut tx, &Candidate::update(id, &change)).await?;

        let shift = sqlx::query_as::<_, Shift>(&format!(
            r#"
            UPDATE shifts
               SET user_id = $2, start_at = $3, end_at = $4, updated_at = now()
             WHERE id = $1
            RETURNING {SHIFT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&change.user_id)
        .bind(change.start)
        .bind(change.end)
        .fetch_optional(&mut *tx)
        .await
        .map_err(classify)?
        .ok_or(StoreError::NotFound)?;

        tx.commit().await?;
        Ok(shift)
    }

    async fn delete_shift(&self, id: &str) -> Result<(), StoreError> {
        let res = sqlx::query("DELETE FROM shifts WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn into_user(row: UserRow) -> Result<User, StoreError> {
    User::try_from(row).map_err(|e| {
        warn!(error = %e, "stored user row is invalid");
        StoreError::Other(e)
    })
}

#[async_trait]
impl UserStore for PgStore {
    async fn list_users(&self, limit: i64) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY name LIMIT $1"
        ))
        // NULL disables the limit
        .bind((limit > 0).then_some(limit))
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(into_user).collect()
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .map(into_user)
            .transpose()
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE name = $1"))
            .bind(name)
            .fetch_optional(&self.db)
            .await?
            .map(into_user)
            .transpose()
    }

    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, name, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(generate_id(USER_ID_LEN))
        .bind(&new.name)
        .bind(&new.password_hash)
        .bind(new.role.as_str())
        .fetch_one(&self.db)
        .await
        .map_err(classify)?;
        into_user(row)
    }

    async fn update_user(&self, id: &str, change: UserChanges) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET name = COALESCE($2, name),
                   password_hash = COALESCE($3, password_hash),
                   role = COALESCE($4, role),
                   updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(change.name)
        .bind(change.password_hash)
        .bind(change.role.map(|r| r.as_str()))
        .fetch_optional(&self.db)
        .await
        .map_err(classify)?
        .ok_or(StoreError::NotFound)?;
        into_user(row)
    }

    async fn delete_user(&self, id: &str) -> Result<(), StoreError> {
        // shifts go with it through ON DELETE CASCADE
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::repo_types::Role;
    use std::sync::Arc;
    use time::macros::datetime;

    async fn test_store() -> PgStore {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
        let store = PgStore::connect(&url, 20).await.expect("connect");
        store.migrate().await.expect("migrate");
        store
    }

    async fn fresh_user(store: &PgStore) -> User {
        store
            .insert_user(NewUser {
                name: format!("pg-{}", generate_id(USER_ID_LEN)),
                password_hash: "x".into(),
                role: Role::User,
            })
            .await
            .expect("insert user")
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn listing_and_overlap_against_postgres() {
        let store = test_store().await;
        let user = fresh_user(&store).await;
        let new = |start, end| NewShift { user_id: user.id.clone(), start, end };

        store
            .insert_shift(new(datetime!(2024-01-10 08:00 UTC), datetime!(2024-01-10 17:00 UTC)))
            .await
            .unwrap();
        assert!(matches!(
            store
                .insert_shift(new(datetime!(2024-01-10 16:00 UTC), datetime!(2024-01-10 20:00 UTC)))
                .await,
            Err(StoreError::Overlap { .. })
        ));
        store
            .insert_shift(new(datetime!(2024-01-10 17:00 UTC), datetime!(2024-01-10 20:00 UTC)))
            .await
            .unwrap();

        let q = ShiftQuery { limit: 1, ..ShiftQuery::for_user(user.id.as_str()) };
        let rows = store.list_shifts(&q).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].start, datetime!(2024-01-10 08:00 UTC));

        store.delete_user(&user.id).await.unwrap();
        assert!(store
            .list_shifts(&ShiftQuery::for_user(user.id.as_str()))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn concurrent_overlapping_creates_persist_exactly_one() {
        let store = Arc::new(test_store().await);
        let user = fresh_user(&store).await;

        let mut handles = Vec::new();
        for i in 0..12i64 {
            let store = store.clone();
            let new = NewShift {
                user_id: user.id.clone(),
                start: datetime!(2024-02-01 08:00 UTC) + time::Duration::minutes(i),
                end: datetime!(2024-02-01 17:00 UTC) + time::Duration::minutes(i),
            };
            handles.push(tokio::spawn(async move { store.insert_shift(new).await }));
        }

        let mut ok = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(StoreError::Overlap { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);

        store.delete_user(&user.id).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn updates_respect_owner_and_window_against_postgres() {
        let store = Arc::new(test_store().await);
        let (a, b) = (fresh_user(&store).await, fresh_user(&store).await);
        let span = |u: &User, start, end| NewShift { user_id: u.id.clone(), start, end };

        let s = store
            .insert_shift(span(&a, datetime!(2024-03-01 08:00 UTC), datetime!(2024-03-01 17:00 UTC)))
            .await
            .unwrap();
        store.update_shift(&s.id, &a.id, span(&b, s.start, s.end)).await.unwrap();
        assert!(matches!(
            store.update_shift(&s.id, &a.id, span(&a, s.start, s.end)).await,
            Err(StoreError::OwnerChanged)
        ));

        let mut ids = Vec::new();
        for day in [2, 3] {
            let start = datetime!(2024-03-01 08:00 UTC) + time::Duration::days(day);
            ids.push(store.insert_shift(span(&a, start, start + time::Duration::hours(8))).await.unwrap().id);
        }
        let handles: Vec<_> = ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| {
                let store = store.clone();
                let owner = a.id.clone();
                let start = datetime!(2024-03-10 08:00 UTC) + time::Duration::hours(i as i64);
                let change = span(&a, start, start + time::Duration::hours(8));
                tokio::spawn(async move { store.update_shift(&id, &owner, change).await })
            })
            .collect();
        let mut ok = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(StoreError::Overlap { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);

        store.delete_user(&a.id).await.unwrap();
        store.delete_user(&b.id).await.unwrap();
    }
}
