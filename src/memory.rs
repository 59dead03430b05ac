use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::shifts::repo_types::{NewShift, Shift, ShiftQuery};
use crate::shifts::services::{ensure_no_overlap, Candidate};
use crate::store::{generate_id, ShiftStore, UserStore, SHIFT_ID_LEN, USER_ID_LEN};
use crate::users::repo_types::{NewUser, User, UserChanges};

#[derive(Default)]
struct Inner {
    users: HashMap<String, User>,
    shifts: HashMap<String, Shift>,
}

fn fresh_id(len: usize, taken: impl Fn(&str) -> bool) -> String {
    loop {
        let id = generate_id(len);
        if !taken(&id) {
            return id;
        }
    }
}

impl Inner {
    fn name_taken(&self, name: &str, except: Option<&str>) -> bool {
        self.users
            .values()
            .any(|u| u.name == name && Some(u.id.as_str()) != except)
    }

    fn check_overlap(&self, candidate: &Candidate<'_>) -> Result<(), StoreError> {
        let existing = ShiftQuery::for_user(candidate.user_id).apply(self.shifts.values());
        ensure_no_overlap(candidate, &existing)?;
        Ok(())
    }
}

/// Process-local store, used when no database is configured and in tests.
/// Writes hold the lock across check and mutation, so each check-and-write
/// is atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShiftStore for MemoryStore {
    async fn list_shifts(&self, query: &ShiftQuery) -> Result<Vec<Shift>, StoreError> {
        let inner = self.inner.read().await;
        Ok(query.apply(inner.shifts.values()))
    }

    async fn find_shift(&self, id: &str) -> Result<Option<Shift>, StoreError> {
        Ok(self.inner.read().await.shifts.get(id).cloned())
    }

    async fn insert_shift(&self, new: NewShift) -> Result<Shift, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&new.user_id) {
            return Err(StoreError::UnknownUser);
        }
        inner.check_overlap(&Candidate::insert(&new))?;

        let id = fresh_id(SHIFT_ID_LEN, |id| inner.shifts.contains_key(id));
        let now = OffsetDateTime::now_utc();
        let shift = Shift {
            id: id.clone(),
            start: new.start,
            end: new.end,
            user_id: new.user_id,
            created_at: now,
            updated_at: now,
        };
        inner.shifts.insert(id, shift.clone());
        debug!(shift_id = %shift.id, user_id = %shift.user_id, "shift inserted");
        Ok(shift)
    }

    async fn update_shift(&self, id: &str, owner: &str, change: NewShift) -> Result<Shift, StoreError> {
        let mut inner = self.inner.write().await;
        let current = inner.shifts.get(id).ok_or(StoreError::NotFound)?;
        if current.user_id != owner {
            debug!(shift_id = %id, expected = %owner, actual = %current.user_id, "shift owner changed");
            return Err(StoreError::OwnerChanged);
        }
        if !inner.users.contains_key(&change.user_id) {
            return Err(StoreError::UnknownUser);
        }
        inner.check_overlap(&Candidate::update(id, &change))?;

        let shift = inner.shifts.get_mut(id).ok_or(StoreError::NotFound)?;
        shift.user_id = change.user_id;
        shift.start = change.start;
        shift.end = change.end;
        shift.updated_at = OffsetDateTime::now_utc();
        Ok(shift.clone())
    }

    async fn delete_shift(&self, id: &str) -> Result<(), StoreError> {
        match self.inner.write().await.shifts.remove(id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound),
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn list_users(&self, limit: i64) -> Result<Vec<User>, StoreError> {
        let inner = self.inner.read().await;
        let mut users: Vec<User> = inner.users.values().cloned().collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        if limit > 0 {
            users.truncate(limit as usize);
        }
        Ok(users)
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(id).cloned())
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().find(|u| u.name == name).cloned())
    }

    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.name_taken(&new.name, None) {
            return Err(StoreError::NameTaken);
        }
        let id = fresh_id(USER_ID_LEN, |id| inner.users.contains_key(id));
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: id.clone(),
            name: new.name,
            password_hash: new.password_hash,
            role: new.role,
            created_at: now,
            updated_at: now,
        };
        inner.users.insert(id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, id: &str, change: UserChanges) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(name) = &change.name {
            if inner.name_taken(name, Some(id)) {
                return Err(StoreError::NameTaken);
            }
        }
        let user = inner.users.get_mut(id).ok_or(StoreError::NotFound)?;
        if let Some(name) = change.name {
            user.name = name;
        }
        if let Some(hash) = change.password_hash {
            user.password_hash = hash;
        }
        if let Some(role) = change.role {
            user.role = role;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }

    async fn delete_user(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.users.remove(id).is_none() {
            return Err(StoreError::NotFound);
        }
        inner.shifts.retain(|_, s| s.user_id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::repo_types::Role;
    use std::sync::Arc;
    use time::macros::datetime;

    async fn store_with_user(name: &str) -> (MemoryStore, User) {
        let store = MemoryStore::new();
        let user = store
            .insert_user(NewUser {
                name: name.into(),
                password_hash: "x".into(),
                role: Role::User,
            })
            .await
            .unwrap();
        (store, user)
    }

    fn span(user: &User, start: OffsetDateTime, end: OffsetDateTime) -> NewShift {
        NewShift { user_id: user.id.clone(), start, end }
    }

    #[tokio::test]
    async fn day_shift_scenario() {
        let (store, a) = store_with_user("alice").await;
        let b = store
            .insert_user(NewUser { name: "bob".into(), password_hash: "x".into(), role: Role::User })
            .await
            .unwrap();

        store
            .insert_shift(span(&a, datetime!(2024-01-10 08:00 UTC), datetime!(2024-01-10 17:00 UTC)))
            .await
            .unwrap();

        let err = store
            .insert_shift(span(&a, datetime!(2024-01-10 16:00 UTC), datetime!(2024-01-10 20:00 UTC)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Overlap { .. }));

        store
            .insert_shift(span(&a, datetime!(2024-01-10 17:00 UTC), datetime!(2024-01-10 20:00 UTC)))
            .await
            .expect("touching shift is accepted");
        store
            .insert_shift(span(&b, datetime!(2024-01-10 08:00 UTC), datetime!(2024-01-10 17:00 UTC)))
            .await
            .expect("other user is independent");

        assert_eq!(store.list_shifts(&ShiftQuery::for_user(a.id.as_str())).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_to_same_interval_does_not_conflict_with_itself() {
        let (store, a) = store_with_user("alice").await;
        let s = store
            .insert_shift(span(&a, datetime!(2024-01-10 08:00 UTC), datetime!(2024-01-10 17:00 UTC)))
            .await
            .unwrap();
        let updated = store
            .update_shift(&s.id, &a.id, span(&a, s.start, s.end))
            .await
            .unwrap();
        assert_eq!(updated.id, s.id);
        assert!(updated.updated_at >= s.updated_at);
    }

    #[tokio::test]
    async fn update_into_neighbour_is_rejected() {
        let (store, a) = store_with_user("alice").await;
        let first = store
            .insert_shift(span(&a, datetime!(2024-01-10 08:00 UTC), datetime!(2024-01-10 12:00 UTC)))
            .await
            .unwrap();
        store
            .insert_shift(span(&a, datetime!(2024-01-10 13:00 UTC), datetime!(2024-01-10 17:00 UTC)))
            .await
            .unwrap();
        let err = store
            .update_shift(&first.id, &a.id, span(&a, first.start, datetime!(2024-01-10 14:00 UTC)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Overlap { .. }));
        let unchanged = store.find_shift(&first.id).await.unwrap().unwrap();
        assert_eq!(unchanged.end, datetime!(2024-01-10 12:00 UTC));
    }

    #[tokio::test]
    async fn shift_for_unknown_user_is_rejected() {
        let store = MemoryStore::new();
        let err = store
            .insert_shift(NewShift {
                user_id: "nobody00".into(),
                start: datetime!(2024-01-10 08:00 UTC),
                end: datetime!(2024-01-10 09:00 UTC),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownUser));
    }

    #[tokio::test]
    async fn deleting_user_cascades_to_shifts() {
        let (store, a) = store_with_user("alice").await;
        store
            .insert_shift(span(&a, datetime!(2024-01-10 08:00 UTC), datetime!(2024-01-10 17:00 UTC)))
            .await
            .unwrap();
        store.delete_user(&a.id).await.unwrap();
        assert!(store.list_shifts(&ShiftQuery::default()).await.unwrap().is_empty());
        assert!(matches!(store.delete_user(&a.id).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let (store, a) = store_with_user("alice").await;
        let dup = store
            .insert_user(NewUser { name: "alice".into(), password_hash: "y".into(), role: Role::Admin })
            .await;
        assert!(matches!(dup, Err(StoreError::NameTaken)));

        let bob = store
            .insert_user(NewUser { name: "bob".into(), password_hash: "y".into(), role: Role::User })
            .await
            .unwrap();
        let rename = store
            .update_user(&bob.id, UserChanges { name: Some("alice".into()), ..Default::default() })
            .await;
        assert!(matches!(rename, Err(StoreError::NameTaken)));

        // keeping one's own name is not a collision
        store
            .update_user(&a.id, UserChanges { name: Some("alice".into()), ..Default::default() })
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_overlapping_creates_persist_exactly_one() {
        let (store, a) = store_with_user("alice").await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..16i64 {
            let store = store.clone();
            let new = span(
                &a,
                datetime!(2024-01-10 08:00 UTC) + time::Duration::minutes(i),
                datetime!(2024-01-10 17:00 UTC) + time::Duration::minutes(i),
            );
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
        assert_eq!(store.list_shifts(&ShiftQuery::for_user(a.id.as_str())).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_against_stale_owner_is_refused() {
        let (store, a) = store_with_user("alice").await;
        let b = store
            .insert_user(NewUser { name: "bob".into(), password_hash: "x".into(), role: Role::User })
            .await
            .unwrap();
        let s = store
            .insert_shift(span(&a, datetime!(2024-01-10 08:00 UTC), datetime!(2024-01-10 17:00 UTC)))
            .await
            .unwrap();

        // reassigned to bob after alice's write was authorized
        store.update_shift(&s.id, &a.id, span(&b, s.start, s.end)).await.unwrap();

        let err = store
            .update_shift(&s.id, &a.id, span(&a, s.start, datetime!(2024-01-10 12:00 UTC)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::OwnerChanged));

        let stored = store.find_shift(&s.id).await.unwrap().unwrap();
        assert_eq!(stored.user_id, b.id);
        assert_eq!(stored.end, s.end);

        assert!(matches!(
            store.update_shift("missing000", &a.id, span(&a, s.start, s.end)).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_into_one_window_persist_exactly_one() {
        for round in 0..20i64 {
            let (store, a) = store_with_user("alice").await;
            let store = Arc::new(store);
            let day = datetime!(2024-01-10 08:00 UTC) + time::Duration::days(round);

            let mut ids = Vec::new();
            for offset in [1, 2] {
                let start = day + time::Duration::days(offset * 30);
                let s = store
                    .insert_shift(span(&a, start, start + time::Duration::hours(8)))
                    .await
                    .unwrap();
                ids.push(s.id);
            }

            let handles: Vec<_> = ids
                .into_iter()
                .enumerate()
                .map(|(i, id)| {
                    let store = store.clone();
                    let owner = a.id.clone();
                    let start = day + time::Duration::hours(i as i64);
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
            assert_eq!(ok, 1, "round {round}");

            let window = store.list_shifts(&ShiftQuery::for_user(a.id.as_str())).await.unwrap();
            let inside = window.iter().filter(|s| s.start < day + time::Duration::days(1)).count();
            assert_eq!(inside, 1, "round {round}");
        }
    }
}
