//! Process-wide coordination via PostgreSQL advisory locks.
//!
//! An advisory lock is scoped to the database session that acquired it, so
//! the lock holder must pin one dedicated connection for the whole locked
//! region and release the lock on that same connection. [`SessionLock`]
//! detaches a connection from the pool for exactly that reason: if the guard
//! is dropped without an explicit [`SessionLock::release`], the connection is
//! closed outright and the server frees the lock with the session.
//!
//! - <https://www.postgresql.org/docs/current/explicit-locking.html#ADVISORY-LOCKS>

use std::time::Duration;

use deadpool_postgres::{ClientWrapper, Object, Pool};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};

/// Prepended to lock names before hashing, to keep pgmigrate's lock ids away
/// from other users of advisory locks.
const ID_PREFIX: &str = "sessionlock-";

/// Sleep between `pg_try_advisory_lock` attempts while the lock is held
/// elsewhere.
pub const SPIN_WAIT: Duration = Duration::from_millis(100);

/// Hash a lock name to the integer key used with `pg_advisory_lock()` and
/// `pg_advisory_unlock()`. CRC-32/IEEE of `"sessionlock-" + name`.
pub fn lock_id(name: &str) -> i64 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(ID_PREFIX.as_bytes());
    hasher.update(name.as_bytes());
    i64::from(hasher.finalize())
}

/// A held advisory lock on a dedicated database session.
pub struct SessionLock {
    client: ClientWrapper,
    id: i64,
    name: String,
    released: bool,
}

impl SessionLock {
    /// Take a connection out of `pool` and acquire the named advisory lock
    /// on it.
    ///
    /// Acquisition spins on `pg_try_advisory_lock` with a fixed
    /// [`SPIN_WAIT`] back-off instead of blocking in `pg_advisory_lock`.
    /// Callers routinely set `lock_timeout` / `statement_timeout` on their
    /// connections to bound their migrations, and a blocking lock call would
    /// be cancelled by those; the spin keeps every individual query short
    /// while waiting indefinitely. The wait ends early when `cancel` fires.
    pub async fn acquire(pool: &Pool, name: &str, cancel: &CancellationToken) -> Result<Self> {
        let object = pool.get().await.map_err(|e| {
            MigrateError::pool(e, format!("sessionlock({name}): opening connection"))
        })?;
        // Detach from the pool: this session must not be handed to anyone
        // else while the lock is held, and closing it on drop is what makes
        // release unconditional.
        let client = Object::take(object);
        let id = lock_id(name);

        loop {
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            let row = client
                .query_one("SELECT pg_try_advisory_lock($1)", &[&id])
                .await?;
            if row.get::<_, bool>(0) {
                break;
            }
            debug!(lock = name, id, "advisory lock busy, retrying");
            tokio::select! {
                _ = cancel.cancelled() => return Err(MigrateError::Cancelled),
                _ = tokio::time::sleep(SPIN_WAIT) => {}
            }
        }
        debug!(lock = name, id, "acquired advisory lock");
        Ok(Self {
            client,
            id,
            name: name.to_string(),
            released: false,
        })
    }

    /// The locked session. All work that must happen under the lock runs on
    /// this client.
    pub fn client(&self) -> &ClientWrapper {
        &self.client
    }

    /// Mutable access to the locked session, needed to open transactions.
    pub fn client_mut(&mut self) -> &mut ClientWrapper {
        &mut self.client
    }

    /// Release the lock with `pg_advisory_unlock` and close the session.
    ///
    /// An unlock failure is reported to the caller; the session is closed
    /// either way, which frees the lock server-side.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let result = self
            .client
            .execute("SELECT pg_advisory_unlock($1)", &[&self.id])
            .await;
        match result {
            Ok(_) => {
                debug!(lock = %self.name, id = self.id, "released advisory lock");
                Ok(())
            }
            Err(e) => Err(MigrateError::Config(format!(
                "sessionlock({}): failed to unlock: {e}",
                self.name
            ))),
        }
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if !self.released {
            // The detached connection closes with this guard, which frees
            // the advisory lock along with the session.
            warn!(
                lock = %self.name,
                id = self.id,
                "session lock dropped without release, closing session"
            );
        }
    }
}
