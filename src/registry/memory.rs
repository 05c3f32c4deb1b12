use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{NewToken, RegistryError, TokenRecord, TokenRegistry};
use crate::auth::TokenKind;

/// Registry kept in process memory.
///
/// One mutex guards all records and is never held across an await, so each
/// trait call (including `rotate`) is atomic with respect to the others.
#[derive(Default)]
pub struct InMemoryTokenRegistry {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_id: i64,
    records: Vec<TokenRecord>,
}

impl State {
    fn insert(&mut self, new: NewToken) -> Result<TokenRecord, RegistryError> {
        let new = new.normalized()?;

        let duplicate = self.records.iter().any(|r| {
            (r.kind == new.kind && r.token == new.token)
                || (new.jti.is_some() && r.jti == new.jti)
        });
        if duplicate {
            return Err(RegistryError::DuplicateToken(new.kind));
        }

        self.next_id += 1;
        let record = TokenRecord {
            id: self.next_id,
            user_id: new.user_id,
            token: new.token,
            jti: new.jti,
            kind: new.kind,
            created_at: Utc::now(),
            expires_at: new.expires_at,
            user_agent: new.user_agent,
            ip_address: new.ip_address,
            is_active: true,
            revoked: false,
        };
        self.records.push(record.clone());
        Ok(record)
    }

    /// Both inserts or neither.
    fn insert_pair(
        &mut self,
        access: NewToken,
        refresh: NewToken,
    ) -> Result<(TokenRecord, TokenRecord), RegistryError> {
        let checkpoint = (self.next_id, self.records.len());
        let access = self.insert(access)?;
        match self.insert(refresh) {
            Ok(refresh) => Ok((access, refresh)),
            Err(e) => {
                self.next_id = checkpoint.0;
                self.records.truncate(checkpoint.1);
                Err(e)
            }
        }
    }

    fn revoke_user(&mut self, user_id: i64) -> u64 {
        let mut count = 0;
        for record in self
            .records
            .iter_mut()
            .filter(|r| r.user_id == user_id && r.is_live())
        {
            revoke(record);
            count += 1;
        }
        count
    }

    fn live_refresh_position(&self, jti: &str) -> Option<usize> {
        self.records.iter().position(|r| {
            r.kind == TokenKind::Refresh && r.jti.as_deref() == Some(jti) && r.is_live()
        })
    }
}

fn revoke(record: &mut TokenRecord) {
    record.is_active = false;
    record.revoked = true;
}

impl InMemoryTokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record ever stored, live or not, oldest first.
    pub fn all_records(&self) -> Vec<TokenRecord> {
        self.lock().records.clone()
    }

    /// Synchronous `store_pair`, for stores that pair their own update with it.
    pub(crate) fn store_pair_now(
        &self,
        access: NewToken,
        refresh: NewToken,
    ) -> Result<(TokenRecord, TokenRecord), RegistryError> {
        self.lock().insert_pair(access, refresh)
    }

    /// Synchronous `revoke_all`, for stores that pair their own update with it.
    pub(crate) fn revoke_all_now(&self, user_id: i64) -> u64 {
        self.lock().revoke_user(user_id)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TokenRegistry for InMemoryTokenRegistry {
    async fn store(&self, new: NewToken) -> Result<TokenRecord, RegistryError> {
        self.lock().insert(new)
    }

    async fn store_pair(
        &self,
        access: NewToken,
        refresh: NewToken,
    ) -> Result<(TokenRecord, TokenRecord), RegistryError> {
        self.store_pair_now(access, refresh)
    }

    async fn rotate(
        &self,
        old_jti: &str,
        access: NewToken,
        refresh: NewToken,
    ) -> Result<Option<(TokenRecord, TokenRecord)>, RegistryError> {
        let mut state = self.lock();

        let Some(index) = state.live_refresh_position(old_jti) else {
            return Ok(None);
        };

        let pair = state.insert_pair(access, refresh)?;
        revoke(&mut state.records[index]);
        Ok(Some(pair))
    }

    async fn find_active_access(&self, token: &str) -> Result<Option<TokenRecord>, RegistryError> {
        Ok(self
            .lock()
            .records
            .iter()
            .find(|r| r.kind == TokenKind::Access && r.token == token && r.is_live())
            .cloned())
    }

    async fn is_refresh_active(&self, jti: &str) -> Result<bool, RegistryError> {
        Ok(self.lock().live_refresh_position(jti).is_some())
    }

    async fn list_active(&self, user_id: i64) -> Result<Vec<TokenRecord>, RegistryError> {
        let mut records: Vec<TokenRecord> = self
            .lock()
            .records
            .iter()
            .filter(|r| r.user_id == user_id && r.is_live())
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    async fn revoke_by_token(&self, token: &str, kind: TokenKind) -> Result<bool, RegistryError> {
        let mut state = self.lock();
        match state
            .records
            .iter_mut()
            .find(|r| r.kind == kind && r.token == token && r.is_active)
        {
            Some(record) => {
                revoke(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_by_jti(&self, jti: &str) -> Result<bool, RegistryError> {
        let mut state = self.lock();
        match state.records.iter_mut().find(|r| {
            r.kind == TokenKind::Refresh && r.jti.as_deref() == Some(jti) && !r.revoked
        }) {
            Some(record) => {
                revoke(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_all(&self, user_id: i64) -> Result<u64, RegistryError> {
        Ok(self.revoke_all_now(user_id))
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, RegistryError> {
        let mut state = self.lock();
        let mut count = 0;
        for record in state
            .records
            .iter_mut()
            .filter(|r| r.is_active && r.expires_at.map_or(false, |at| at < now))
        {
            revoke(record);
            count += 1;
        }
        Ok(count)
    }
}
