use crate::diag::{Ctx, Diag};
use crate::extract::{PeriodUnit, Record};
use crate::formula::Token;
use anyhow::{anyhow, bail};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

/// What identifies a course for duplicate detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKey {
    /// Course code alone.
    Code,
    /// Course code plus the organizational unit on the imported version.
    CodeAndOrgUnit,
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Substring filter on course codes; non-matching records are skipped.
    pub code_filter: Option<String>,
    pub duplicate_key: DuplicateKey,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            code_filter: None,
            duplicate_key: DuplicateKey::Code,
        }
    }
}

/// Counters for one imported batch. Merged across documents into the run
/// report.
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub imported: usize,
    pub skipped_duplicates: usize,
    pub skipped_filtered: usize,
    pub staff_assignments: usize,
    pub staff_skipped: usize,
    pub referenced_courses: usize,
}

impl BatchReport {
    pub fn merge(&mut self, other: &BatchReport) {
        self.imported += other.imported;
        self.skipped_duplicates += other.skipped_duplicates;
        self.skipped_filtered += other.skipped_filtered;
        self.staff_assignments += other.staff_assignments;
        self.staff_skipped += other.staff_skipped;
        self.referenced_courses += other.referenced_courses;
    }
}

/// Repository over the `courses` table. Finding and creating are separate
/// operations; the caller decides when a placeholder is created.
pub struct CourseRepo<'c> {
    conn: &'c Connection,
}

impl<'c> CourseRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        CourseRepo { conn }
    }

    pub fn find(&self, code: &str) -> anyhow::Result<Option<String>> {
        let id = self
            .conn
            .query_row("SELECT id FROM courses WHERE code = ?", [code], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(id)
    }

    /// Creates a course row. When no abbreviation is supplied it is derived
    /// from the code: the second slash-delimited component, else the whole
    /// code (placeholder courses referenced only inside formulas).
    pub fn create(&self, code: &str, abbreviation: Option<&str>) -> anyhow::Result<String> {
        let derived;
        let abbreviation = match abbreviation {
            Some(a) => a,
            None => {
                derived = derive_abbreviation(code);
                derived
            }
        };
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO courses(id, code, abbreviation) VALUES(?, ?, ?)",
            [id.as_str(), code, abbreviation],
        )?;
        Ok(id)
    }

    pub fn find_or_create(
        &self,
        code: &str,
        abbreviation: Option<&str>,
    ) -> anyhow::Result<String> {
        match self.find(code)? {
            Some(id) => Ok(id),
            None => self.create(code, abbreviation),
        }
    }
}

pub fn derive_abbreviation(code: &str) -> &str {
    code.split('/').nth(1).filter(|p| !p.is_empty()).unwrap_or(code)
}

/// All person ids whose full name matches exactly.
pub fn find_persons(conn: &Connection, full_name: &str) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM persons WHERE full_name = ?")?;
    let ids = stmt
        .query_map([full_name], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Resolves the importing user; anything other than exactly one match
/// aborts the run before any record is touched.
pub fn resolve_importing_user(conn: &Connection, full_name: &str) -> anyhow::Result<String> {
    let ids = find_persons(conn, full_name)?;
    match ids.as_slice() {
        [] => bail!("importing user {:?} not found", full_name),
        [one] => Ok(one.clone()),
        many => bail!(
            "importing user {:?} is ambiguous ({} matches)",
            full_name,
            many.len()
        ),
    }
}

/// Loads one document's records. The caller supplies the transaction
/// connection; the whole run shares one and commits or rolls back as a
/// unit, so a fatal error here leaves no partial course behind.
pub fn import_batch(
    conn: &Connection,
    records: &[Record],
    cfg: &ImportConfig,
    user_id: &str,
    ctx: &Ctx,
    diag: &mut Diag,
) -> anyhow::Result<BatchReport> {
    let repo = CourseRepo::new(conn);
    let mut report = BatchReport::default();

    for rec in records {
        let code = rec
            .code
            .as_deref()
            .ok_or_else(|| anyhow!("course descriptor without a code"))?;
        let ctx = ctx.with("course", code);

        if let Some(filter) = &cfg.code_filter {
            if !code.contains(filter.as_str()) {
                diag.note(&ctx, "skipped by code filter");
                report.skipped_filtered += 1;
                continue;
            }
        }

        if is_duplicate(conn, code, &rec.org_unit, cfg.duplicate_key)? {
            diag.warn(&ctx, "course already imported, skipping");
            report.skipped_duplicates += 1;
            continue;
        }

        // Distinct referenced course ids, in first-reference order.
        let mut referenced: Vec<String> = Vec::new();
        let prerequisites = rewrite_formula(&rec.prerequisites, &repo, &mut referenced)?;
        let exclusions = rewrite_formula(&rec.exclusions, &repo, &mut referenced)?;
        report.referenced_courses += referenced.len();

        let version_id = insert_version(conn, rec, user_id, prerequisites, exclusions)?;

        for course_id in &referenced {
            conn.execute(
                "INSERT INTO descriptor_course_links(version_id, course_id) VALUES(?, ?)",
                [&version_id, course_id],
            )?;
        }

        conn.execute(
            "INSERT INTO descriptor_translations(id, version_id, lang, title, objectives,
                completion_conditions, outline, literature)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                Uuid::new_v4().to_string(),
                version_id,
                rec.lang,
                rec.title,
                rec.objectives,
                rec.completion_conditions,
                rec.outline,
                rec.literature,
            ],
        )?;

        insert_staff(conn, &version_id, rec, &ctx, diag, &mut report)?;

        for entry in &rec.load {
            conn.execute(
                "INSERT INTO descriptor_activities(id, version_id, study_mode, activity_code,
                    hours, per_week)
                 VALUES(?, ?, ?, ?, ?, ?)",
                params![
                    Uuid::new_v4().to_string(),
                    version_id,
                    rec.study_mode,
                    entry.activity_code,
                    entry.hours,
                    entry.period == PeriodUnit::PerWeek,
                ],
            )?;
        }

        let header_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO descriptor_headers(id, version_id, locked, imported) VALUES(?, ?, 0, 1)",
            [&header_id, &version_id],
        )?;

        let course_id = match repo.find(code)? {
            Some(id) => id,
            None => repo.create(code, rec.abbreviation.as_deref())?,
        };
        conn.execute(
            "INSERT INTO course_descriptors(course_id, header_id) VALUES(?, ?)",
            [&course_id, &header_id],
        )?;

        report.imported += 1;
    }

    Ok(report)
}

fn is_duplicate(
    conn: &Connection,
    code: &str,
    org_unit: &str,
    key: DuplicateKey,
) -> anyhow::Result<bool> {
    let found: Option<i64> = match key {
        DuplicateKey::Code => conn
            .query_row(
                "SELECT 1 FROM courses c
                 JOIN course_descriptors cd ON cd.course_id = c.id
                 WHERE c.code = ? LIMIT 1",
                [code],
                |row| row.get(0),
            )
            .optional()?,
        DuplicateKey::CodeAndOrgUnit => conn
            .query_row(
                "SELECT 1 FROM courses c
                 JOIN course_descriptors cd ON cd.course_id = c.id
                 JOIN descriptor_headers h ON h.id = cd.header_id
                 JOIN descriptor_versions v ON v.id = h.version_id
                 WHERE c.code = ? AND v.org_unit = ? LIMIT 1",
                [code, org_unit],
                |row| row.get(0),
            )
            .optional()?,
    };
    Ok(found.is_some())
}

/// Renders a token sequence with every course code replaced by its
/// persisted identity, creating placeholder courses on first reference.
fn rewrite_formula(
    tokens: &[Token],
    repo: &CourseRepo,
    referenced: &mut Vec<String>,
) -> anyhow::Result<Option<String>> {
    if tokens.is_empty() {
        return Ok(None);
    }
    let mut parts: Vec<String> = Vec::with_capacity(tokens.len());
    for token in tokens {
        let part = match token {
            Token::Open => "(".to_string(),
            Token::Close => ")".to_string(),
            Token::And => "AND".to_string(),
            Token::Or => "OR".to_string(),
            Token::Course(code) => {
                let id = repo.find_or_create(code, None)?;
                if !referenced.contains(&id) {
                    referenced.push(id.clone());
                }
                id
            }
        };
        parts.push(part);
    }
    Ok(Some(parts.join(" ")))
}

fn insert_version(
    conn: &Connection,
    rec: &Record,
    user_id: &str,
    prerequisites: Option<String>,
    exclusions: Option<String>,
) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    let grades = rec.grades.as_ref();
    conn.execute(
        "INSERT INTO descriptor_versions(id, title, credit, org_unit, completion_method,
            language, study_plan_year, study_plan_semester, exam_weight,
            grade_a, grade_b, grade_c, grade_d, grade_e, grade_fx, grade_total,
            prerequisites, exclusions, approved_at, imported_by, imported_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            rec.title,
            rec.credit,
            rec.org_unit,
            rec.completion_method,
            rec.language,
            rec.study_plan_year,
            rec.study_plan_semester,
            rec.exam_weight,
            grades.map(|g| g.a),
            grades.map(|g| g.b),
            grades.map(|g| g.c),
            grades.map(|g| g.d),
            grades.map(|g| g.e),
            grades.map(|g| g.fx),
            grades.map(|g| g.total),
            prerequisites,
            exclusions,
            rec.approved_at.map(|d| d.to_string()),
            user_id,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(id)
}

fn insert_staff(
    conn: &Connection,
    version_id: &str,
    rec: &Record,
    ctx: &Ctx,
    diag: &mut Diag,
    report: &mut BatchReport,
) -> anyhow::Result<()> {
    // Person ids already holding an ordinal row on this version.
    let mut positioned: Vec<String> = Vec::new();
    for entry in &rec.staff {
        let ids = find_persons(conn, &entry.full_name)?;
        let person_id = match ids.as_slice() {
            [] => {
                diag.warn(ctx, format!("no person record for {:?}", entry.full_name));
                report.staff_skipped += 1;
                continue;
            }
            [one] => one,
            many => {
                diag.warn(
                    ctx,
                    format!(
                        "ambiguous person record for {:?} ({} matches)",
                        entry.full_name,
                        many.len()
                    ),
                );
                report.staff_skipped += 1;
                continue;
            }
        };

        conn.execute(
            "INSERT INTO descriptor_staff(id, version_id, person_id, role_code)
             VALUES(?, ?, ?, ?)",
            params![
                Uuid::new_v4().to_string(),
                version_id,
                person_id,
                entry.role_code,
            ],
        )?;
        report.staff_assignments += 1;

        if !positioned.iter().any(|p| p == person_id) {
            conn.execute(
                "INSERT INTO descriptor_staff_positions(version_id, person_id, ordinal)
                 VALUES(?, ?, ?)",
                params![version_id, person_id, positioned.len() as i64],
            )?;
            positioned.push(person_id.clone());
        }
    }
    Ok(())
}
