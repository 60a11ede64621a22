use rusqlite::{named_params, params};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{credentials::Credentials, ctx::BaseParams, db, notes::writer, Error, Result, DB};

use super::*;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RegisterInput {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LoginInput {
    /// Username or email.
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AuthResponse {
    pub user: PublicUser,
    pub token: String,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct UpdateUserInput {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchQuery {
    pub q: Option<String>,
}

pub const SEARCH_LIMIT: u32 = 10;

pub async fn register(input: RegisterInput, db: DB, credentials: &Credentials) -> Result<AuthResponse> {
    let RegisterInput {
        username,
        email,
        password,
    } = input;
    let username = username.trim().to_owned();
    let email = email.trim().to_owned();

    if username.is_empty() || email.is_empty() || password.is_empty() {
        return Err(Error::Validation("All fields are required".into()));
    }
    validate_email(&email)?;
    validate_password(&password)?;

    let hash = credentials.hash(&password)?;

    let user = db
        .call(move |conn| {
            conn.query_row(
                &format!(
                    r#"INSERT INTO users (username, email, password, created_at)
                    VALUES (:username, :email, :password, :created_at)
                    RETURNING {PUBLIC_COLUMNS}"#
                ),
                named_params! {
                    ":username": username,
                    ":email": email,
                    ":password": hash,
                    ":created_at": chrono::Utc::now(),
                },
                |row| PublicUser::try_from(row),
            )
            .map_err(|e| e.into())
        })
        .await
        .map_err(db::Error::from)
        .map_err(|e| e.conflict_message("Username or email already taken"))?;

    tracing::info!(user_id = %user.id, "registered user {}", user.username);

    let token = credentials.issue_token(user.id, &user.username, &user.email)?;
    Ok(AuthResponse { user, token })
}

pub async fn login(input: LoginInput, db: DB, credentials: &Credentials) -> Result<AuthResponse> {
    let LoginInput { username, password } = input;
    let login = username.trim().to_owned();

    if login.is_empty() || password.is_empty() {
        return Err(Error::Validation("Username and password are required".into()));
    }

    let record = db
        .call(move |conn| find_record(conn, &login).map_err(|e| e.into()))
        .await?;

    // Unknown user and wrong password are indistinguishable to the caller.
    let Some(UserRecord { user, password: hash }) = record else {
        return Err(Error::Unauthorized);
    };
    if !credentials.verify(&password, &hash) {
        tracing::debug!(user_id = %user.id, "password mismatch");
        return Err(Error::Unauthorized);
    }

    let token = credentials.issue_token(user.id, &user.username, &user.email)?;
    Ok(AuthResponse { user, token })
}

pub async fn profile(BaseParams { db, ctx }: BaseParams) -> Result<PublicUser> {
    get_user(ctx.require_user_id()?, db).await
}

pub async fn list_users(BaseParams { db, ctx }: BaseParams) -> Result<Vec<PublicUser>> {
    ctx.require_user()?;

    db.call(|conn| {
        let users = conn
            .prepare(&format!("SELECT {PUBLIC_COLUMNS} FROM users ORDER BY username"))?
            .query_map([], |row| PublicUser::try_from(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    })
    .await
    .map_err(Error::from)
}

fn like_pattern(query: &str) -> String {
    let escaped = query
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

pub async fn search_users(SearchQuery { q }: SearchQuery, BaseParams { db, ctx }: BaseParams) -> Result<Vec<PublicUser>> {
    ctx.require_user()?;

    let query = q.unwrap_or_default();
    let query = query.trim();
    if query.is_empty() {
        return Ok(vec![]);
    }
    let pattern = like_pattern(query);

    db.call(move |conn| {
        let users = conn
            .prepare(&format!(
                r#"SELECT {PUBLIC_COLUMNS} FROM users
                WHERE lower(username) LIKE ?1 ESCAPE '\' OR lower(email) LIKE ?1 ESCAPE '\'
                ORDER BY username
                LIMIT ?2"#
            ))?
            .query_map(params![pattern, SEARCH_LIMIT], |row| PublicUser::try_from(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    })
    .await
    .map_err(Error::from)
}

async fn get_user(user_id: UserId, db: DB) -> Result<PublicUser> {
    db.call(move |conn| find_by_id(conn, user_id).map_err(|e| e.into()))
        .await?
        .ok_or_else(|| Error::NotFound(format!("User '{user_id}' not found")))
}

pub async fn get_user_by_id(user_id: UserId, BaseParams { db, ctx }: BaseParams) -> Result<PublicUser> {
    ctx.require_user()?;
    get_user(user_id, db).await
}

fn require_self(user_id: UserId, requester: UserId) -> Result<()> {
    if user_id != requester {
        return Err(Error::Forbidden("Users can only modify their own account".into()));
    }
    Ok(())
}

pub async fn update_user(
    user_id: UserId,
    input: UpdateUserInput,
    credentials: &Credentials,
    BaseParams { db, ctx }: BaseParams,
) -> Result<PublicUser> {
    require_self(user_id, ctx.require_user_id()?)?;

    let UpdateUserInput {
        username,
        email,
        password,
    } = input;
    let username = username.map(|u| u.trim().to_owned());
    let email = email.map(|e| e.trim().to_owned());

    if let Some(username) = &username {
        validate_username(username)?;
    }
    if let Some(email) = &email {
        validate_email(email)?;
    }
    let password = match password {
        Some(password) => {
            validate_password(&password)?;
            Some(credentials.hash(&password)?)
        }
        None => None,
    };

    db.call(move |conn| {
        conn.query_row(
            &format!(
                r#"UPDATE users SET
                    username = coalesce(:username, username),
                    email = coalesce(:email, email),
                    password = coalesce(:password, password),
                    updated_at = :updated_at
                WHERE id = :id
                RETURNING {PUBLIC_COLUMNS}"#
            ),
            named_params! {
                ":username": username,
                ":email": email,
                ":password": password,
                ":updated_at": chrono::Utc::now(),
                ":id": user_id,
            },
            |row| PublicUser::try_from(row),
        )
        .map_err(|e| e.into())
    })
    .await
    .map_err(db::Error::from)
    .map_err(|e| e.not_found_message(format!("User '{user_id}' not found")))
    .map_err(|e| e.conflict_message("Username or email already taken"))
    .map_err(Error::from)
}

/// Deletes the account with everything it owns. Returns the stored paths
/// of removed media that no remaining note references.
pub async fn delete_user(user_id: UserId, BaseParams { db, ctx }: BaseParams) -> Result<Vec<String>> {
    require_self(user_id, ctx.require_user_id()?)?;

    let paths = db
        .call(move |conn| {
            let tx = conn.transaction()?;

            let paths = tx
                .prepare(
                    r#"SELECT m.file_path FROM media m
                    JOIN notes n ON n.id = m.note_id
                    WHERE n.owner_id = ?"#,
                )?
                .query_map([user_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let deleted = tx.execute("DELETE FROM users WHERE id = ?", [user_id])?;
            if deleted == 0 {
                return Err(Error::NotFound(format!("User '{user_id}' not found")).into());
            }
            let paths = writer::unreferenced(&tx, paths)?;

            tx.commit()?;
            Ok(paths)
        })
        .await?;

    tracing::info!(user_id = %user_id, "deleted user and {} media files", paths.len());
    Ok(paths)
}

/// Creates the demo account when it does not exist yet.
pub async fn seed_demo_user(db: DB, credentials: &Credentials) -> Result<()> {
    let hash = credentials.hash("demo123")?;

    let created = db
        .call(move |conn| {
            conn.execute(
                r#"INSERT INTO users (username, email, password, created_at)
                VALUES ('demo', 'demo@example.com', ?, ?)
                ON CONFLICT DO NOTHING"#,
                params![hash, chrono::Utc::now()],
            )
            .map_err(|e| e.into())
        })
        .await?;

    if created > 0 {
        tracing::info!("seeded demo user");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{ctx::Ctx, db::init_test_db};

    fn credentials() -> Credentials {
        Credentials::new("test-secret", Duration::hours(1))
    }

    fn register_input(username: &str, email: &str) -> RegisterInput {
        RegisterInput {
            username: username.into(),
            email: email.into(),
            password: "demo123".into(),
        }
    }

    fn as_user(db: DB, user: &PublicUser) -> BaseParams {
        BaseParams::new(
            db,
            Ctx::new(Some(crate::ctx::User {
                id: user.id,
                username: user.username.clone(),
                email: user.email.clone(),
            })),
        )
    }

    #[tokio::test]
    async fn register_and_login() -> Result<()> {
        let db = init_test_db().await?;
        let credentials = credentials();

        let registered = register(register_input("demo", "demo@x.com"), db.clone(), &credentials).await?;
        assert_eq!(registered.user.username, "demo");
        assert_eq!(credentials.verify_token(&registered.token)?.sub, registered.user.id);

        let by_name = login(
            LoginInput {
                username: "demo".into(),
                password: "demo123".into(),
            },
            db.clone(),
            &credentials,
        )
        .await?;
        assert_eq!(by_name.user.id, registered.user.id);

        let by_email = login(
            LoginInput {
                username: "demo@x.com".into(),
                password: "demo123".into(),
            },
            db,
            &credentials,
        )
        .await?;
        assert_eq!(by_email.user.id, registered.user.id);
        Ok(())
    }

    #[tokio::test]
    async fn register_rejects_taken_username_and_email() -> Result<()> {
        let db = init_test_db().await?;
        let credentials = credentials();
        register(register_input("demo", "demo@x.com"), db.clone(), &credentials).await?;

        let same_name = register(register_input("demo", "other@x.com"), db.clone(), &credentials).await;
        assert!(matches!(same_name, Err(Error::Conflict(_))));

        let same_email = register(register_input("other", "demo@x.com"), db, &credentials).await;
        assert!(matches!(same_email, Err(Error::Conflict(_))));
        Ok(())
    }

    #[tokio::test]
    async fn register_validates_input() -> Result<()> {
        let db = init_test_db().await?;
        let credentials = credentials();

        let missing = register(register_input("", "demo@x.com"), db.clone(), &credentials).await;
        assert!(matches!(missing, Err(Error::Validation(_))));

        let bad_email = register(register_input("demo", "demo"), db.clone(), &credentials).await;
        assert!(matches!(bad_email, Err(Error::Validation(_))));

        let short = register(
            RegisterInput {
                username: "demo".into(),
                email: "demo@x.com".into(),
                password: "12345".into(),
            },
            db,
            &credentials,
        )
        .await;
        assert!(matches!(short, Err(Error::Validation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_unauthorized() -> Result<()> {
        let db = init_test_db().await?;
        let credentials = credentials();
        register(register_input("demo", "demo@x.com"), db.clone(), &credentials).await?;

        let wrong = login(
            LoginInput {
                username: "demo".into(),
                password: "wrong-password".into(),
            },
            db.clone(),
            &credentials,
        )
        .await;
        assert!(matches!(wrong, Err(Error::Unauthorized)));

        let unknown = login(
            LoginInput {
                username: "ghost".into(),
                password: "demo123".into(),
            },
            db,
            &credentials,
        )
        .await;
        assert!(matches!(unknown, Err(Error::Unauthorized)));
        Ok(())
    }

    #[tokio::test]
    async fn search_is_case_insensitive_and_limited() -> Result<()> {
        let db = init_test_db().await?;
        let credentials = credentials();
        let me = register(register_input("me", "me@x.com"), db.clone(), &credentials).await?.user;

        db.call(|conn| {
            for i in 0..12 {
                conn.execute(
                    "INSERT INTO users (username, email, password) VALUES (?, ?, 'h')",
                    params![format!("Alice{i:02}"), format!("alice{i:02}@x.com")],
                )?;
            }
            Ok(())
        })
        .await?;

        let found = search_users(SearchQuery { q: Some("ALICE".into()) }, as_user(db.clone(), &me)).await?;
        assert_eq!(found.len(), SEARCH_LIMIT as usize);
        assert_eq!(found[0].username, "Alice00");

        let blank = search_users(SearchQuery { q: Some("  ".into()) }, as_user(db.clone(), &me)).await?;
        assert!(blank.is_empty());

        let wildcard = search_users(SearchQuery { q: Some("%".into()) }, as_user(db, &me)).await?;
        assert!(wildcard.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn update_is_self_only() -> Result<()> {
        let db = init_test_db().await?;
        let credentials = credentials();
        let alice = register(register_input("alice", "alice@x.com"), db.clone(), &credentials).await?.user;
        let bob = register(register_input("bob", "bob@x.com"), db.clone(), &credentials).await?.user;

        let renamed = update_user(
            alice.id,
            UpdateUserInput {
                username: Some("alicia".into()),
                ..Default::default()
            },
            &credentials,
            as_user(db.clone(), &alice),
        )
        .await?;
        assert_eq!(renamed.username, "alicia");
        assert_eq!(renamed.email, "alice@x.com");

        let foreign = update_user(
            alice.id,
            UpdateUserInput {
                username: Some("mallory".into()),
                ..Default::default()
            },
            &credentials,
            as_user(db.clone(), &bob),
        )
        .await;
        assert!(matches!(foreign, Err(Error::Forbidden(_))));

        let taken = update_user(
            bob.id,
            UpdateUserInput {
                email: Some("alice@x.com".into()),
                ..Default::default()
            },
            &credentials,
            as_user(db, &bob),
        )
        .await;
        assert!(matches!(taken, Err(Error::Conflict(_))));
        Ok(())
    }

    #[tokio::test]
    async fn delete_cascades_owned_notes() -> Result<()> {
        let db = init_test_db().await?;
        let credentials = credentials();
        let alice = register(register_input("alice", "alice@x.com"), db.clone(), &credentials).await?.user;

        let alice_id = alice.id;
        db.call(move |conn| {
            let note_id: Uuid = conn.query_row(
                "INSERT INTO notes (owner_id, title) VALUES (?, 'mine') RETURNING id",
                [alice_id],
                |r| r.get(0),
            )?;
            conn.execute(
                r#"INSERT INTO media (note_id, kind, filename, original_name, file_path)
                VALUES (?, 'image', 'a.png', 'a.png', 'images/a.png')"#,
                [note_id],
            )?;
            Ok(())
        })
        .await?;

        let paths = delete_user(alice.id, as_user(db.clone(), &alice)).await?;
        assert_eq!(paths, vec!["images/a.png".to_string()]);

        let remaining = db
            .call(|conn| {
                conn.query_row(
                    "SELECT (SELECT count(*) FROM notes) + (SELECT count(*) FROM media)",
                    [],
                    |r| r.get::<_, i64>(0),
                )
                .map_err(|e| e.into())
            })
            .await?;
        assert_eq!(remaining, 0);
        Ok(())
    }
}
