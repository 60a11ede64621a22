use lazy_static::lazy_static;
use rusqlite_migration::{Migrations, M};

lazy_static! {
    pub static ref MIGRATIONS: Migrations<'static> = Migrations::new(vec![
        M::up(
            r#"
            CREATE TABLE users (
                id BLOB PRIMARY KEY CHECK(length(id) = 16) NOT NULL UNIQUE DEFAULT (uuid7_now()),
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL,

                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME
            );
        "#
        ),
        M::up(
            r#"
            CREATE TABLE notes (
                id BLOB PRIMARY KEY CHECK(length(id) = 16) NOT NULL UNIQUE DEFAULT (uuid7_now()),
                owner_id BLOB NOT NULL CHECK(length(owner_id) = 16),

                title TEXT NOT NULL DEFAULT '',
                text TEXT NOT NULL DEFAULT '',
                reminder DATETIME,

                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,

                FOREIGN KEY (owner_id) REFERENCES users (id) ON DELETE CASCADE
            );

            CREATE INDEX notes_owner_id ON notes (owner_id);
        "#
        ),
        M::up(
            r#"
            CREATE TABLE checklist_items (
                id BLOB PRIMARY KEY CHECK(length(id) = 16) NOT NULL UNIQUE DEFAULT (uuid7_now()),
                note_id BLOB NOT NULL CHECK(length(note_id) = 16),

                text TEXT NOT NULL DEFAULT '',
                checked BOOLEAN NOT NULL DEFAULT FALSE,
                position INTEGER NOT NULL DEFAULT 0,

                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,

                FOREIGN KEY (note_id) REFERENCES notes (id) ON DELETE CASCADE
            );

            CREATE INDEX checklist_items_note_id ON checklist_items (note_id);

            CREATE TABLE collaborators (
                note_id BLOB NOT NULL CHECK(length(note_id) = 16),
                user_id BLOB NOT NULL CHECK(length(user_id) = 16),

                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,

                PRIMARY KEY (note_id, user_id),
                FOREIGN KEY (note_id) REFERENCES notes (id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
            );

            CREATE INDEX collaborators_user_id ON collaborators (user_id);

            CREATE TABLE media (
                id BLOB PRIMARY KEY CHECK(length(id) = 16) NOT NULL UNIQUE DEFAULT (uuid7_now()),
                note_id BLOB NOT NULL CHECK(length(note_id) = 16),

                kind TEXT NOT NULL CHECK (kind IN ('image', 'file', 'voice')),
                filename TEXT NOT NULL,
                original_name TEXT NOT NULL,
                mime_type TEXT NOT NULL DEFAULT 'application/octet-stream',
                file_size INTEGER NOT NULL DEFAULT 0,
                file_path TEXT NOT NULL,

                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,

                FOREIGN KEY (note_id) REFERENCES notes (id) ON DELETE CASCADE
            );

            CREATE INDEX media_note_id ON media (note_id);
        "#
        ),
    ]);
}
