use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{
    model::{Account, NewAccount},
    store::{AccountStore, StoreError},
};

const ACCOUNT_COLUMNS: &str = r#"
    id, email, password_hash, oauth_provider, oauth_id, login_type, name, avatar_url,
    scopes, forgot_password_token, last_login_at, password_changed_at, is_deleted,
    created_at, updated_at
"#;

/// Postgres-backed account store. Uniqueness is enforced by the schema
/// (see `migrations/`), so `create` surfaces code 23505 as `UniqueViolation`.
#[derive(Clone)]
pub struct PgAccountStore {
    db: PgPool,
}

impl PgAccountStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_one(&self, filter: &str, binds: &[&str]) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {filter}");
        let mut query = sqlx::query_as::<_, Account>(&sql);
        for b in binds {
            query = query.bind(*b);
        }
        Ok(query.fetch_optional(&self.db).await?)
    }

    async fn execute_for(&self, sql: &str, id: Uuid, value: Option<&str>) -> Result<(), StoreError> {
        let mut query = sqlx::query(sql).bind(id);
        if let Some(v) = value {
            query = query.bind(v);
        }
        let result = query.execute(&self.db).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(account)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        self.find_one("email = $1", &[email]).await
    }

    async fn find_by_oauth_id(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        self.find_one(
            "oauth_provider = $1 AND oauth_id = $2",
            &[provider, provider_account_id],
        )
        .await
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM accounts WHERE email = $1)")
                .bind(email)
                .fetch_one(&self.db)
                .await?;
        Ok(exists)
    }

    async fn create(&self, new: NewAccount) -> Result<Account, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO accounts
                (id, email, password_hash, oauth_provider, oauth_id, login_type, name, avatar_url, scopes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(new.id)
            .bind(&new.email)
            .bind(&new.password_hash)
            .bind(&new.oauth_provider)
            .bind(&new.oauth_id)
            .bind(new.login_type.as_str())
            .bind(&new.name)
            .bind(&new.avatar_url)
            .bind(&new.scopes)
            .fetch_one(&self.db)
            .await
            .map_err(map_insert_error)
    }

    async fn update_forgot_password_token(&self, id: Uuid, token: &str) -> Result<(), StoreError> {
        self.execute_for(
            "UPDATE accounts SET forgot_password_token = $2, updated_at = now() WHERE id = $1",
            id,
            Some(token),
        )
        .await
    }

    async fn clear_forgot_password_token(&self, id: Uuid) -> Result<(), StoreError> {
        self.execute_for(
            "UPDATE accounts SET forgot_password_token = '', updated_at = now() WHERE id = $1",
            id,
            None,
        )
        .await
    }

    async fn update_password_hash(&self, id: Uuid, hash: &str) -> Result<(), StoreError> {
        self.execute_for(
            r#"
            UPDATE accounts
               SET password_hash = $2, password_changed_at = now(), updated_at = now()
             WHERE id = $1
            "#,
            id,
            Some(hash),
        )
        .await
    }

    async fn update_last_login_at(&self, id: Uuid) -> Result<(), StoreError> {
        self.execute_for(
            "UPDATE accounts SET last_login_at = now(), updated_at = now() WHERE id = $1",
            id,
            None,
        )
        .await
    }
}

fn map_insert_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            let constraint = db_err.constraint().unwrap_or_default().to_owned();
            return StoreError::UniqueViolation(constraint);
        }
    }
    StoreError::Database(err)
}
