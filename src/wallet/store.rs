/// Wallet persistence
use crate::db::account::Wallet;
use chrono::Utc;
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct WalletStore {
    db: SqlitePool,
}

impl WalletStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Resolve the wallet row for an address, creating it on first sight.
    ///
    /// The address is lower-cased before it touches storage. The upsert is a
    /// single statement, so concurrent first logins land on the same row.
    pub async fn get_or_create(&self, address: &str, system: &str) -> Result<Wallet, sqlx::Error> {
        let address = address.to_lowercase();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO wallets (address, system, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(address) DO UPDATE SET updated_at = excluded.updated_at",
        )
        .bind(&address)
        .bind(system)
        .bind(now)
        .execute(&self.db)
        .await?;

        sqlx::query_as::<_, Wallet>(
            "SELECT id, address, system, created_at, updated_at FROM wallets WHERE address = ?1",
        )
        .bind(&address)
        .fetch_one(&self.db)
        .await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Wallet>, sqlx::Error> {
        sqlx::query_as::<_, Wallet>(
            "SELECT id, address, system, created_at, updated_at FROM wallets WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = WalletStore::new(test_pool().await);

        let first = store.get_or_create("0xAbCdEf", "ethereum").await.unwrap();
        let second = store.get_or_create("0xabcdef", "ethereum").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.address, "0xabcdef");
        assert!(second.updated_at >= first.updated_at);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM wallets")
            .fetch_one(&store.db)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let store = WalletStore::new(test_pool().await);
        let wallet = store.get_or_create("0xabc", "ethereum").await.unwrap();

        let found = store.get_by_id(wallet.id).await.unwrap().unwrap();
        assert_eq!(found.address, "0xabc");
        assert!(store.get_by_id(wallet.id + 1).await.unwrap().is_none());
    }
}
