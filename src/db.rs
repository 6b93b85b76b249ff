use rusqlite::Connection;
use std::path::Path;
use uuid::Uuid;

pub fn open_db(path: &Path) -> anyhow::Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // Staff directory. Populated outside the importer; lookup only.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS persons(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_persons_full_name ON persons(full_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            abbreviation TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS descriptor_versions(
            id TEXT PRIMARY KEY,
            title TEXT,
            credit TEXT,
            org_unit TEXT NOT NULL,
            completion_method TEXT,
            language TEXT,
            study_plan_year TEXT,
            study_plan_semester TEXT,
            exam_weight TEXT,
            grade_a INTEGER,
            grade_b INTEGER,
            grade_c INTEGER,
            grade_d INTEGER,
            grade_e INTEGER,
            grade_fx INTEGER,
            grade_total INTEGER,
            prerequisites TEXT,
            exclusions TEXT,
            approved_at TEXT,
            imported_by TEXT NOT NULL,
            imported_at TEXT NOT NULL,
            FOREIGN KEY(imported_by) REFERENCES persons(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS descriptor_translations(
            id TEXT PRIMARY KEY,
            version_id TEXT NOT NULL,
            lang TEXT NOT NULL,
            title TEXT,
            objectives TEXT,
            completion_conditions TEXT,
            outline TEXT,
            literature TEXT,
            UNIQUE(version_id, lang),
            FOREIGN KEY(version_id) REFERENCES descriptor_versions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_descriptor_translations_version
         ON descriptor_translations(version_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS descriptor_course_links(
            version_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            PRIMARY KEY(version_id, course_id),
            FOREIGN KEY(version_id) REFERENCES descriptor_versions(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_descriptor_course_links_course
         ON descriptor_course_links(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS descriptor_staff(
            id TEXT PRIMARY KEY,
            version_id TEXT NOT NULL,
            person_id TEXT NOT NULL,
            role_code TEXT NOT NULL,
            FOREIGN KEY(version_id) REFERENCES descriptor_versions(id),
            FOREIGN KEY(person_id) REFERENCES persons(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_descriptor_staff_version ON descriptor_staff(version_id)",
        [],
    )?;

    // One row per distinct person on a version, in first-seen order.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS descriptor_staff_positions(
            version_id TEXT NOT NULL,
            person_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            PRIMARY KEY(version_id, person_id),
            FOREIGN KEY(version_id) REFERENCES descriptor_versions(id),
            FOREIGN KEY(person_id) REFERENCES persons(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS descriptor_activities(
            id TEXT PRIMARY KEY,
            version_id TEXT NOT NULL,
            study_mode TEXT,
            activity_code TEXT NOT NULL,
            hours INTEGER NOT NULL,
            per_week INTEGER NOT NULL,
            FOREIGN KEY(version_id) REFERENCES descriptor_versions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_descriptor_activities_version
         ON descriptor_activities(version_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS descriptor_headers(
            id TEXT PRIMARY KEY,
            version_id TEXT NOT NULL,
            locked INTEGER NOT NULL DEFAULT 0,
            imported INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(version_id) REFERENCES descriptor_versions(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_descriptors(
            course_id TEXT NOT NULL,
            header_id TEXT NOT NULL,
            PRIMARY KEY(course_id, header_id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(header_id) REFERENCES descriptor_headers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_descriptors_course
         ON course_descriptors(course_id)",
        [],
    )?;

    Ok(())
}

pub fn insert_person(conn: &Connection, full_name: &str) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO persons(id, full_name) VALUES(?, ?)",
        [id.as_str(), full_name],
    )?;
    Ok(id)
}
