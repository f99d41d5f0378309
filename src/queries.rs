use crate::error::{Error, Result};
use crate::model::{Query, QueryStatus, Reply, Role};
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;
use uuid::Uuid;

/// Create a new query. Status is always forced to `pending` and the reply
/// log starts empty regardless of input.
pub fn create_query(
    conn: &Connection,
    student_id: &Uuid,
    student_name: &str,
    subject: &str,
    description: &str,
) -> Result<Query> {
    if subject.trim().is_empty() {
        return Err(Error::Validation("empty_subject"));
    }
    if description.trim().is_empty() {
        return Err(Error::Validation("empty_description"));
    }
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO queries (id, student_id, student_name, subject, description, status, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6)",
        params![
            id.to_string(),
            student_id.to_string(),
            student_name,
            subject,
            description,
            now
        ],
    )?;
    Ok(Query {
        id,
        student_id: *student_id,
        student_name: student_name.into(),
        subject: subject.into(),
        description: description.into(),
        status: QueryStatus::Pending,
        created_at: now,
        updated_at: now,
        replies: Vec::new(),
    })
}

fn row_to_query(row: &rusqlite::Row<'_>) -> rusqlite::Result<Query> {
    Ok(Query {
        id: Uuid::parse_str(row.get::<_, String>(0)?.as_str()).unwrap(),
        student_id: Uuid::parse_str(row.get::<_, String>(1)?.as_str()).unwrap(),
        student_name: row.get(2)?,
        subject: row.get(3)?,
        description: row.get(4)?,
        status: row.get::<_, String>(5)?.parse().unwrap(),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        replies: Vec::new(),
    })
}

fn row_to_reply(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reply> {
    Ok(Reply {
        id: Uuid::parse_str(row.get::<_, String>(0)?.as_str()).unwrap(),
        query_id: Uuid::parse_str(row.get::<_, String>(1)?.as_str()).unwrap(),
        user_id: Uuid::parse_str(row.get::<_, String>(2)?.as_str()).unwrap(),
        user_name: row.get(3)?,
        user_role: row.get::<_, String>(4)?.parse().unwrap(),
        message: row.get(5)?,
        created_at: row.get(6)?,
    })
}

// Replies keep insertion order; rowid breaks same-second ties.
fn load_replies(conn: &Connection, query_id: &Uuid) -> Result<Vec<Reply>> {
    let mut stmt = conn.prepare(
        "SELECT id, query_id, user_id, user_name, user_role, message, created_at \
         FROM query_replies WHERE query_id = ?1 ORDER BY rowid",
    )?;
    let replies = stmt
        .query_map([query_id.to_string()], row_to_reply)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(replies)
}

/// Fetch a single query with its reply log.
pub fn get_query(conn: &Connection, id: &Uuid) -> Result<Query> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, student_name, subject, description, status, created_at, updated_at \
         FROM queries WHERE id = ?1",
    )?;
    let mut query = stmt
        .query_row([id.to_string()], row_to_query)
        .optional()?
        .ok_or(Error::NotFound("query"))?;
    query.replies = load_replies(conn, id)?;
    Ok(query)
}

/// Append a reply. A `pending` query advances to `in-progress`; any later
/// state is left untouched. `updated_at` refreshes on every append.
pub fn add_reply(
    conn: &Connection,
    query_id: &Uuid,
    user_id: &Uuid,
    user_name: &str,
    user_role: Role,
    message: &str,
) -> Result<Query> {
    if message.trim().is_empty() {
        return Err(Error::Validation("empty_message"));
    }
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM queries WHERE id = ?1",
            [query_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    let status: QueryStatus = status.ok_or(Error::NotFound("query"))?.parse()?;
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO query_replies (id, query_id, user_id, user_name, user_role, message, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            Uuid::new_v4().to_string(),
            query_id.to_string(),
            user_id.to_string(),
            user_name,
            user_role.as_str(),
            message,
            now
        ],
    )?;
    let next = if status == QueryStatus::Pending {
        QueryStatus::InProgress
    } else {
        status
    };
    conn.execute(
        "UPDATE queries SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![query_id.to_string(), next.as_str(), now],
    )?;
    get_query(conn, query_id)
}

/// Overwrite the status unconditionally. Any state is reachable from any
/// state; there are no transition restrictions.
pub fn set_status(conn: &Connection, id: &Uuid, status: QueryStatus) -> Result<Query> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let changed = conn.execute(
        "UPDATE queries SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), status.as_str(), now],
    )?;
    if changed == 0 {
        return Err(Error::NotFound("query"));
    }
    get_query(conn, id)
}

/// List queries, optionally filtered by status.
pub fn list_queries(conn: &Connection, status: Option<QueryStatus>) -> Result<Vec<Query>> {
    let mut stmt = match status {
        Some(_) => conn.prepare(
            "SELECT id, student_id, student_name, subject, description, status, created_at, updated_at \
             FROM queries WHERE status = ?1 ORDER BY created_at DESC",
        )?,
        None => conn.prepare(
            "SELECT id, student_id, student_name, subject, description, status, created_at, updated_at \
             FROM queries ORDER BY created_at DESC",
        )?,
    };
    let rows = match status {
        Some(s) => stmt.query_map([s.as_str()], row_to_query)?,
        None => stmt.query_map([], row_to_query)?,
    };
    let mut queries = rows.collect::<std::result::Result<Vec<_>, _>>()?;
    for q in &mut queries {
        q.replies = load_replies(conn, &q.id)?;
    }
    Ok(queries)
}

/// List queries raised by one student.
pub fn list_by_student(conn: &Connection, student_id: &Uuid) -> Result<Vec<Query>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, student_name, subject, description, status, created_at, updated_at \
         FROM queries WHERE student_id = ?1 ORDER BY created_at DESC",
    )?;
    let mut queries = stmt
        .query_map([student_id.to_string()], row_to_query)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for q in &mut queries {
        q.replies = load_replies(conn, &q.id)?;
    }
    Ok(queries)
}
