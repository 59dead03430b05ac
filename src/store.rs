use async_trait::async_trait;
use rand::Rng;

use crate::error::StoreError;
use crate::shifts::repo_types::{NewShift, Shift, ShiftQuery};
use crate::users::repo_types::{NewUser, User, UserChanges};

pub const SHIFT_ID_LEN: usize = 10;
pub const USER_ID_LEN: usize = 8;

const ID_ALPHABET: &[u8] = b"_-0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Random URL-safe identifier of `len` characters.
pub fn generate_id(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Shift persistence. `insert_shift` and `update_shift` must run the overlap
/// check and the write as one critical section per target user.
/// `update_shift` only applies while the shift still belongs to `owner`, the
/// user the caller was authorized against.
#[async_trait]
pub trait ShiftStore: Send + Sync {
    async fn list_shifts(&self, query: &ShiftQuery) -> Result<Vec<Shift>, StoreError>;
    async fn find_shift(&self, id: &str) -> Result<Option<Shift>, StoreError>;
    async fn insert_shift(&self, new: NewShift) -> Result<Shift, StoreError>;
    async fn update_shift(&self, id: &str, owner: &str, change: NewShift) -> Result<Shift, StoreError>;
    async fn delete_shift(&self, id: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Users ordered by name; `limit <= 0` means unlimited.
    async fn list_users(&self, limit: i64) -> Result<Vec<User>, StoreError>;
    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError>;
    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError>;
    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError>;
    async fn update_user(&self, id: &str, change: UserChanges) -> Result<User, StoreError>;
    /// Removes the user together with every shift they own.
    async fn delete_user(&self, id: &str) -> Result<(), StoreError>;
}

pub trait Store: ShiftStore + UserStore {}

impl<T: ShiftStore + UserStore> Store for T {}
