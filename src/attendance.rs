use crate::error::{Error, Result};
use crate::model::{AttendanceRequest, AttendanceStatus, AttendanceType};
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;
use uuid::Uuid;

/// Create an outing/home-visit request at `pending`.
pub fn create_request(
    conn: &Connection,
    student_id: &Uuid,
    student_name: &str,
    kind: AttendanceType,
    start_date: OffsetDateTime,
    end_date: OffsetDateTime,
    reason: &str,
) -> Result<AttendanceRequest> {
    if reason.trim().is_empty() {
        return Err(Error::Validation("empty_reason"));
    }
    if end_date < start_date {
        return Err(Error::Validation("invalid_date_range"));
    }
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO attendance (id, student_id, student_name, type, start_date, end_date, reason, status, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)",
        params![
            id.to_string(),
            student_id.to_string(),
            student_name,
            kind.as_str(),
            start_date.unix_timestamp(),
            end_date.unix_timestamp(),
            reason,
            now
        ],
    )?;
    Ok(AttendanceRequest {
        id,
        student_id: *student_id,
        student_name: student_name.into(),
        kind,
        start_date,
        end_date,
        reason: reason.into(),
        status: AttendanceStatus::Pending,
        created_at: now,
    })
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRequest> {
    Ok(AttendanceRequest {
        id: Uuid::parse_str(row.get::<_, String>(0)?.as_str()).unwrap(),
        student_id: Uuid::parse_str(row.get::<_, String>(1)?.as_str()).unwrap(),
        student_name: row.get(2)?,
        kind: row.get::<_, String>(3)?.parse().unwrap(),
        start_date: OffsetDateTime::from_unix_timestamp(row.get(4)?).unwrap(),
        end_date: OffsetDateTime::from_unix_timestamp(row.get(5)?).unwrap(),
        reason: row.get(6)?,
        status: row.get::<_, String>(7)?.parse().unwrap(),
        created_at: row.get(8)?,
    })
}

const REQUEST_COLS: &str =
    "id, student_id, student_name, type, start_date, end_date, reason, status, created_at";

/// Fetch a single request.
pub fn get_request(conn: &Connection, id: &Uuid) -> Result<AttendanceRequest> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REQUEST_COLS} FROM attendance WHERE id = ?1"
    ))?;
    stmt.query_row([id.to_string()], row_to_request)
        .optional()?
        .ok_or(Error::NotFound("attendance"))
}

/// Record a warden/admin decision. The write is unconditional: a request
/// that was already decided can be decided again and the last write wins.
pub fn decide(conn: &Connection, id: &Uuid, decision: AttendanceStatus) -> Result<AttendanceRequest> {
    if !matches!(
        decision,
        AttendanceStatus::Approved | AttendanceStatus::Rejected
    ) {
        return Err(Error::Validation("invalid_status"));
    }
    let changed = conn.execute(
        "UPDATE attendance SET status = ?2 WHERE id = ?1",
        params![id.to_string(), decision.as_str()],
    )?;
    if changed == 0 {
        return Err(Error::NotFound("attendance"));
    }
    get_request(conn, id)
}

/// List requests, optionally filtered by status.
pub fn list_requests(
    conn: &Connection,
    status: Option<AttendanceStatus>,
) -> Result<Vec<AttendanceRequest>> {
    let mut stmt = match status {
        Some(_) => conn.prepare(&format!(
            "SELECT {REQUEST_COLS} FROM attendance WHERE status = ?1 ORDER BY created_at DESC"
        ))?,
        None => conn.prepare(&format!(
            "SELECT {REQUEST_COLS} FROM attendance ORDER BY created_at DESC"
        ))?,
    };
    let rows = match status {
        Some(s) => stmt.query_map([s.as_str()], row_to_request)?,
        None => stmt.query_map([], row_to_request)?,
    };
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// List requests filed by one student.
pub fn list_by_student(conn: &Connection, student_id: &Uuid) -> Result<Vec<AttendanceRequest>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REQUEST_COLS} FROM attendance WHERE student_id = ?1 ORDER BY created_at DESC"
    ))?;
    let rows = stmt.query_map([student_id.to_string()], row_to_request)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}
