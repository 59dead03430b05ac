use anyhow::Context;
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::auth::password::hash_password;
use crate::shifts::repo_types::{NewShift, ShiftQuery};
use crate::store::{ShiftStore, Store, UserStore};
use crate::users::repo_types::{NewUser, Role, User};

const DEMO_USERS: [(&str, &str, Role); 2] = [
    ("adminuser", "adminpass", Role::Admin),
    ("testuser", "testpass", Role::User),
];

async fn ensure_user(store: &dyn Store, name: &str, pass: &str, role: Role) -> anyhow::Result<User> {
    if let Some(user) = store.find_user_by_name(name).await? {
        return Ok(user);
    }
    let user = store
        .insert_user(NewUser {
            name: name.into(),
            password_hash: hash_password(pass)?,
            role,
        })
        .await
        .with_context(|| format!("seed user {name}"))?;
    info!(user_id = %user.id, %name, %role, "demo user created");
    Ok(user)
}

/// Creates the demo accounts and, unless `testuser` already has one, an
/// eight hour shift starting now. Existing records are left alone.
pub async fn seed_demo_data(store: &dyn Store) -> anyhow::Result<()> {
    let mut last = None;
    for (name, pass, role) in DEMO_USERS {
        last = Some(ensure_user(store, name, pass, role).await?);
    }
    let Some(user) = last else {
        return Ok(());
    };

    let existing = ShiftQuery {
        limit: 1,
        ..ShiftQuery::for_user(user.id.as_str())
    };
    if !store.list_shifts(&existing).await?.is_empty() {
        info!(user_id = %user.id, "demo shift already present");
        return Ok(());
    }

    let start = OffsetDateTime::now_utc();
    let shift = store
        .insert_shift(NewShift {
            user_id: user.id.clone(),
            start,
            end: start + Duration::hours(8),
        })
        .await
        .context("seed demo shift")?;
    info!(shift_id = %shift.id, user_id = %user.id, "demo shift created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let store = MemoryStore::new();
        seed_demo_data(&store).await.unwrap();
        seed_demo_data(&store).await.unwrap();

        let users = store.list_users(0).await.unwrap();
        assert_eq!(users.len(), 2);
        let admin = users.iter().find(|u| u.name == "adminuser").unwrap();
        assert_eq!(admin.role, Role::Admin);

        let shifts = store.list_shifts(&ShiftQuery::default()).await.unwrap();
        assert_eq!(shifts.len(), 1);
    }

    #[tokio::test]
    async fn reseeding_after_the_demo_shift_ended_adds_nothing() {
        let store = MemoryStore::new();
        seed_demo_data(&store).await.unwrap();

        // a restart days later no longer overlaps the first demo shift
        let seeded = store.list_shifts(&ShiftQuery::default()).await.unwrap().remove(0);
        let start = seeded.start - Duration::days(3);
        store
            .update_shift(
                &seeded.id,
                &seeded.user_id,
                NewShift { user_id: seeded.user_id.clone(), start, end: start + Duration::hours(8) },
            )
            .await
            .unwrap();

        seed_demo_data(&store).await.unwrap();
        assert_eq!(store.list_shifts(&ShiftQuery::default()).await.unwrap().len(), 1);
    }
}
