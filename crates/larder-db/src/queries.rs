use rusqlite::{Connection, params};
use tracing::debug;

use larder_types::models::{Kind, SyncCursor};

use crate::models::{EdgeRow, ImageOp, KindCommit, PartnerRow, RecordRow, UserRow};
use crate::{Database, StoreError};

impl Database {
    // -- Users --

    #[allow(clippy::too_many_arguments)]
    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        name: &str,
        password_hash: &str,
        remote_token: &str,
        partner_code: &str,
    ) -> Result<UserRow, StoreError> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, name, password, remote_token, partner_code)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, email, name, password_hash, remote_token, partner_code],
            )?;
            query_user(conn, "id = ?1", id)?
                .ok_or(StoreError::Db(rusqlite::Error::QueryReturnedNoRows))
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user(conn, "email = ?1", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    pub fn get_user_by_partner_code(&self, code: &str) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user(conn, "partner_code = ?1", code))
    }

    pub fn update_remote_token(&self, user_id: &str, remote_token: &str) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET remote_token = ?1 WHERE id = ?2",
                params![remote_token, user_id],
            )?;
            Ok(())
        })
    }

    pub fn get_cursor(&self, user_id: &str) -> Result<SyncCursor, StoreError> {
        self.with_conn(|conn| {
            let raw: String =
                conn.query_row("SELECT cursor FROM users WHERE id = ?1", [user_id], |row| {
                    row.get(0)
                })?;
            Ok(serde_json::from_str(&raw)?)
        })
    }

    /// Wholesale cursor replace; only valid after every dirty kind of a
    /// refresh run committed.
    pub fn replace_cursor(&self, user_id: &str, cursor: &SyncCursor) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET cursor = ?1 WHERE id = ?2",
                params![serde_json::to_string(cursor)?, user_id],
            )?;
            Ok(())
        })
    }

    // -- Records --

    pub fn records(&self, user_id: &str, kind: Kind) -> Result<Vec<RecordRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, uid, data FROM records WHERE user_id = ?1 AND kind = ?2",
            )?;
            let rows = stmt
                .query_map(params![user_id, kind.as_str()], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, uid, data)| {
                    Ok(RecordRow {
                        id,
                        uid,
                        data: serde_json::from_str(&data)?,
                    })
                })
                .collect()
        })
    }

    pub fn get_record(
        &self,
        user_id: &str,
        kind: Kind,
        id: i64,
    ) -> Result<Option<RecordRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, uid, data FROM records
                     WHERE user_id = ?1 AND kind = ?2 AND id = ?3",
                    params![user_id, kind.as_str(), id],
                    |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                    },
                )
                .optional()?;
            match row {
                Some((id, uid, data)) => Ok(Some(RecordRow {
                    id,
                    uid,
                    data: serde_json::from_str(&data)?,
                })),
                None => Ok(None),
            }
        })
    }

    /// Primary-key lookup without an account scope; the image routes serve
    /// records through less-guessable URLs instead of authentication, so
    /// they resolve by id alone. Returns the owning user id alongside.
    pub fn get_record_global(
        &self,
        kind: Kind,
        id: i64,
    ) -> Result<Option<(String, RecordRow)>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, id, uid, data FROM records WHERE kind = ?1 AND id = ?2",
                    params![kind.as_str(), id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;
            match row {
                Some((user_id, id, uid, data)) => Ok(Some((
                    user_id,
                    RecordRow {
                        id,
                        uid,
                        data: serde_json::from_str(&data)?,
                    },
                ))),
                None => Ok(None),
            }
        })
    }

    pub fn get_image_global(&self, kind: Kind, id: i64) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_conn(|conn| {
            let image = conn
                .query_row(
                    "SELECT image FROM records WHERE kind = ?1 AND id = ?2",
                    params![kind.as_str(), id],
                    |row| row.get::<_, Option<Vec<u8>>>(0),
                )
                .optional()?;
            Ok(image.flatten())
        })
    }

    pub fn get_record_image(
        &self,
        user_id: &str,
        kind: Kind,
        id: i64,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_conn(|conn| {
            let image = conn
                .query_row(
                    "SELECT image FROM records WHERE user_id = ?1 AND kind = ?2 AND id = ?3",
                    params![user_id, kind.as_str(), id],
                    |row| row.get::<_, Option<Vec<u8>>>(0),
                )
                .optional()?;
            Ok(image.flatten())
        })
    }

    /// Apply one kind's reconciliation outcome atomically: deletions,
    /// updates, creations and the kind's cursor entry land in a single
    /// transaction. A uniqueness violation (a concurrent run inserted the
    /// same `(user, kind, uid)`) rolls everything back and surfaces as
    /// [`StoreError::Conflict`].
    pub fn apply_commit(
        &self,
        user_id: &str,
        kind: Kind,
        commit: &KindCommit,
        cursor_counter: Option<i64>,
    ) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            for id in &commit.deleted {
                tx.execute("DELETE FROM records WHERE id = ?1", [id])?;
            }

            for update in &commit.updated {
                let data = update.data.to_string();
                match &update.image {
                    ImageOp::Keep => tx.execute(
                        "UPDATE records SET data = ?1 WHERE id = ?2",
                        params![data, update.id],
                    )?,
                    ImageOp::Set(bytes) => tx.execute(
                        "UPDATE records SET data = ?1, image = ?2 WHERE id = ?3",
                        params![data, bytes, update.id],
                    )?,
                    ImageOp::Clear => tx.execute(
                        "UPDATE records SET data = ?1, image = NULL WHERE id = ?2",
                        params![data, update.id],
                    )?,
                };
            }

            for record in &commit.created {
                tx.execute(
                    "INSERT INTO records (user_id, kind, uid, data, image)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        user_id,
                        kind.as_str(),
                        record.uid,
                        record.data.to_string(),
                        record.image
                    ],
                )
                .map_err(constraint_to_conflict)?;
            }

            if let Some(counter) = cursor_counter {
                let raw: String = tx.query_row(
                    "SELECT cursor FROM users WHERE id = ?1",
                    [user_id],
                    |row| row.get(0),
                )?;
                let mut cursor: SyncCursor = serde_json::from_str(&raw)?;
                cursor.set(kind.as_str(), counter);
                tx.execute(
                    "UPDATE users SET cursor = ?1 WHERE id = ?2",
                    params![serde_json::to_string(&cursor)?, user_id],
                )?;
            }

            tx.commit()?;
            debug!(
                "Committed {} ({} created, {} updated, {} deleted)",
                kind,
                commit.created.len(),
                commit.updated.len(),
                commit.deleted.len()
            );
            Ok(())
        })
    }

    // -- Partner edges --

    pub fn get_edge(&self, source_id: &str, target_id: &str) -> Result<Option<EdgeRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT source_id, target_id, approved FROM partner_edges
                     WHERE source_id = ?1 AND target_id = ?2",
                    params![source_id, target_id],
                    |row| {
                        Ok(EdgeRow {
                            source_id: row.get(0)?,
                            target_id: row.get(1)?,
                            approved: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn insert_edge(&self, source_id: &str, target_id: &str) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO partner_edges (source_id, target_id) VALUES (?1, ?2)",
                params![source_id, target_id],
            )?;
            Ok(())
        })
    }

    pub fn approve_edge(&self, source_id: &str, target_id: &str) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE partner_edges SET approved = 1
                 WHERE source_id = ?1 AND target_id = ?2",
                params![source_id, target_id],
            )?;
            Ok(())
        })
    }

    pub fn delete_edge(&self, source_id: &str, target_id: &str) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM partner_edges WHERE source_id = ?1 AND target_id = ?2",
                params![source_id, target_id],
            )?;
            Ok(())
        })
    }

    /// Mutually approved partners, with their locally-mirrored recipe count.
    pub fn active_partners(&self, user_id: &str) -> Result<Vec<PartnerRow>, StoreError> {
        self.with_conn(|conn| query_partners(conn, user_id, PartnerFilter::Active))
    }

    /// Users with an unapproved request pointing at this user.
    pub fn pending_incoming(&self, user_id: &str) -> Result<Vec<PartnerRow>, StoreError> {
        self.with_conn(|conn| query_partners(conn, user_id, PartnerFilter::Incoming))
    }

    /// Users this user has an unapproved request pointing at.
    pub fn pending_outgoing(&self, user_id: &str) -> Result<Vec<PartnerRow>, StoreError> {
        self.with_conn(|conn| query_partners(conn, user_id, PartnerFilter::Outgoing))
    }
}

enum PartnerFilter {
    Active,
    Incoming,
    Outgoing,
}

fn query_partners(
    conn: &Connection,
    user_id: &str,
    filter: PartnerFilter,
) -> Result<Vec<PartnerRow>, StoreError> {
    let subquery = match filter {
        PartnerFilter::Active => {
            "SELECT target_id FROM partner_edges WHERE source_id = ?1 AND approved = 1
             UNION
             SELECT source_id FROM partner_edges WHERE target_id = ?1 AND approved = 1"
        }
        PartnerFilter::Incoming => {
            "SELECT source_id FROM partner_edges WHERE target_id = ?1 AND approved = 0"
        }
        PartnerFilter::Outgoing => {
            "SELECT target_id FROM partner_edges WHERE source_id = ?1 AND approved = 0"
        }
    };
    let sql = format!(
        "SELECT u.id, u.name,
                (SELECT COUNT(*) FROM records r
                 WHERE r.user_id = u.id AND r.kind = 'recipes') AS recipe_count
         FROM users u
         WHERE u.id IN ({subquery})
         ORDER BY u.name COLLATE NOCASE"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id], |row| {
            Ok(PartnerRow {
                id: row.get(0)?,
                name: row.get(1)?,
                recipe_count: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_user(conn: &Connection, filter: &str, value: &str) -> Result<Option<UserRow>, StoreError> {
    let sql = format!(
        "SELECT id, email, name, password, remote_token, partner_code, cursor, created_at
         FROM users WHERE {filter}"
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                name: row.get(2)?,
                password: row.get(3)?,
                remote_token: row.get(4)?,
                partner_code: row.get(5)?,
                cursor: row.get(6)?,
                created_at: row.get(7)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn constraint_to_conflict(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict
        }
        _ => StoreError::Db(err),
    }
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, StoreError>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, StoreError> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
