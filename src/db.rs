use crate::scoping::AssignmentKey;
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "merittrac.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!("failed to create workspace {}", workspace.to_string_lossy())
    })?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            role TEXT NOT NULL,
            prn TEXT,
            avatar TEXT,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semesters(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            year INTEGER NOT NULL,
            start_date TEXT,
            end_date TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_assignments(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            teacher_name TEXT NOT NULL,
            subject_name TEXT NOT NULL,
            semester_name TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES users(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id),
            UNIQUE(teacher_id, subject_id, semester_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_teacher ON teacher_assignments(teacher_id)",
        [],
    )?;

    // Components stay NULL until entered; total/grade are NULL while all four are.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            ca1 REAL,
            ca2 REAL,
            mid_term REAL,
            end_term REAL,
            total REAL,
            grade TEXT,
            teacher_id TEXT,
            last_updated TEXT NOT NULL,
            student_name TEXT NOT NULL,
            subject_name TEXT NOT NULL,
            semester_name TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id),
            UNIQUE(student_id, subject_id, semester_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_subject_semester ON marks(subject_id, semester_id)",
        [],
    )?;

    Ok(conn)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn count_users(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
}

/// Returns `(name, role)` for a user id.
pub fn user_name_role(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<(String, String)>> {
    conn.query_row(
        "SELECT name, role FROM users WHERE id = ?",
        [user_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()
}

pub fn subject_name(conn: &Connection, subject_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT name FROM subjects WHERE id = ?", [subject_id], |r| {
        r.get(0)
    })
    .optional()
}

pub fn semester_name(conn: &Connection, semester_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT name FROM semesters WHERE id = ?",
        [semester_id],
        |r| r.get(0),
    )
    .optional()
}

pub fn load_assignment_keys(
    conn: &Connection,
    teacher_id: Option<&str>,
) -> rusqlite::Result<Vec<AssignmentKey>> {
    let map_row = |r: &rusqlite::Row<'_>| {
        Ok(AssignmentKey {
            teacher_id: r.get(0)?,
            subject_id: r.get(1)?,
            semester_id: r.get(2)?,
        })
    };
    match teacher_id {
        Some(tid) => {
            let mut stmt = conn.prepare(
                "SELECT teacher_id, subject_id, semester_id
                 FROM teacher_assignments
                 WHERE teacher_id = ?
                 ORDER BY rowid",
            )?;
            let rows = stmt.query_map([tid], map_row)?;
            rows.collect()
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT teacher_id, subject_id, semester_id
                 FROM teacher_assignments
                 ORDER BY rowid",
            )?;
            let rows = stmt.query_map([], map_row)?;
            rows.collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn open_db_is_reentrant() {
        let ws = temp_dir("merittrac-db-open");
        {
            let conn = open_db(&ws).expect("first open");
            assert_eq!(count_users(&conn).expect("count"), 0);
            conn.execute(
                "INSERT INTO users(id, email, name, role, created_at)
                 VALUES('a1', 'a1@x', 'A', 'admin', ?)",
                [now_rfc3339()],
            )
            .expect("user");
        }
        let conn = open_db(&ws).expect("second open");
        assert_eq!(count_users(&conn).expect("count"), 1);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn assignment_triples_are_unique() {
        let ws = temp_dir("merittrac-db-assign");
        let conn = open_db(&ws).expect("open");
        conn.execute(
            "INSERT INTO users(id, email, name, role) VALUES('t1', 't1@x', 'T', 'teacher')",
            [],
        )
        .expect("user");
        conn.execute("INSERT INTO subjects(id, name, code) VALUES('s1', 'Maths', 'M1')", [])
            .expect("subject");
        conn.execute(
            "INSERT INTO semesters(id, name, year) VALUES('m1', 'Sem 1', 2025)",
            [],
        )
        .expect("semester");

        let insert = "INSERT INTO teacher_assignments(
                id, teacher_id, subject_id, semester_id, teacher_name, subject_name, semester_name)
             VALUES(?, 't1', 's1', 'm1', 'T', 'Maths', 'Sem 1')";
        conn.execute(insert, ["a1"]).expect("first assignment");
        assert!(conn.execute(insert, ["a2"]).is_err());

        let keys = load_assignment_keys(&conn, Some("t1")).expect("keys");
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].subject_id, "s1");
        let _ = std::fs::remove_dir_all(ws);
    }
}
