use courseimport::db;
use courseimport::diag::{Ctx, Diag};
use courseimport::extract;
use courseimport::import::{self, DuplicateKey, ImportConfig};
use rusqlite::Connection;

const DOCUMENT: &str = r#"<courseDocument>
  <orgUnit>FMFI.KI</orgUnit>
  <courseDescriptors>
    <courseDescriptor>
      <code>FMFI.KI/A-B-1/15</code>
      <abbreviation>A-B-1</abbreviation>
      <title>Algorithms</title>
      <credit>5</credit>
      <completionMethod>Exam</completionMethod>
      <language>sk</language>
      <approvalDate>03.06.2015</approvalDate>
      <studyModes><studyMode>In-person</studyMode></studyModes>
      <teachingActivities>Lecture / Exercise</teachingActivities>
      <weeklyHours>2 / 2</weeklyHours>
      <prerequisites>FMFI.KI/X-Y-9/15 alebo FMFI.KI/C-D-2/15</prerequisites>
      <examWeight><content><p>60/40</p></content></examWeight>
      <gradeDistribution total="6">
        <grade code="A" count="1"/>
        <grade code="B" count="2"/>
        <grade code="C" count="3"/>
        <grade code="D" count="0"/>
        <grade code="E" count="0"/>
        <grade code="FX" count="0"/>
      </gradeDistribution>
      <staff>
        <member><role>P</role><fullName>Jana Uchitelova</fullName></member>
        <member><role>C</role><fullName>Jana Uchitelova</fullName></member>
        <member><role>C</role><fullName>Ghost Person</fullName></member>
      </staff>
      <outline><content><p>Graphs.</p><p>- BFS</p><p>- DFS</p></content></outline>
    </courseDescriptor>
    <courseDescriptor>
      <code>FMFI.KI/C-D-2/15</code>
      <abbreviation>C-D-2</abbreviation>
      <title>Data Structures</title>
      <studyModes><studyMode>In-person</studyMode></studyModes>
      <teachingActivities>Lecture</teachingActivities>
      <weeklyHours>3</weeklyHours>
    </courseDescriptor>
  </courseDescriptors>
</courseDocument>"#;

fn setup() -> (Connection, String) {
    let conn = db::open_in_memory().expect("open db");
    db::insert_person(&conn, "Jana Uchitelova").expect("insert person");
    let user_id = db::insert_person(&conn, "Admin User").expect("insert user");
    (conn, user_id)
}

fn import_document(
    conn: &Connection,
    document: &str,
    user_id: &str,
    cfg: &ImportConfig,
    diag: &mut Diag,
) {
    let ctx = Ctx::new().with("file", "fixture.xml");
    let records = extract::extract_records(document, "sk", &ctx, diag).expect("extract");
    import::import_batch(conn, &records, cfg, user_id, &ctx, diag).expect("import");
}

fn run_import(conn: &Connection, user_id: &str, cfg: &ImportConfig, diag: &mut Diag) {
    import_document(conn, DOCUMENT, user_id, cfg, diag);
}

fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |r| r.get(0)).expect("count query")
}

#[test]
fn import_creates_versions_links_and_placeholders() {
    let (conn, user_id) = setup();
    let mut diag = Diag::new();
    run_import(&conn, &user_id, &ImportConfig::default(), &mut diag);

    assert_eq!(count(&conn, "SELECT COUNT(*) FROM descriptor_versions"), 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM descriptor_headers"), 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM course_descriptors"), 2);

    // Two imported courses plus the placeholder referenced only in the
    // prerequisite formula.
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM courses"), 3);
    let abbr: String = conn
        .query_row(
            "SELECT abbreviation FROM courses WHERE code = ?",
            ["FMFI.KI/X-Y-9/15"],
            |r| r.get(0),
        )
        .expect("placeholder course");
    assert_eq!(abbr, "X-Y-9");

    // The two formula references both resolve to persisted identities.
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM descriptor_course_links"),
        2
    );
    let prereq: String = conn
        .query_row(
            "SELECT v.prerequisites FROM descriptor_versions v WHERE v.title = 'Algorithms'",
            [],
            |r| r.get(0),
        )
        .expect("rewritten formula");
    assert!(prereq.contains(" OR "));
    assert!(
        !prereq.contains("FMFI.KI"),
        "course codes must be rewritten to identities: {}",
        prereq
    );

    // The later descriptor reuses the placeholder created by the formula.
    let linked: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM courses WHERE code = ?",
            ["FMFI.KI/C-D-2/15"],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(linked, 1);
}

#[test]
fn reimport_is_idempotent_with_one_warning_per_course() {
    let (conn, user_id) = setup();
    let cfg = ImportConfig::default();

    let mut diag = Diag::new();
    run_import(&conn, &user_id, &cfg, &mut diag);
    let versions_after_first = count(&conn, "SELECT COUNT(*) FROM descriptor_versions");

    let mut diag2 = Diag::new();
    run_import(&conn, &user_id, &cfg, &mut diag2);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM descriptor_versions"),
        versions_after_first
    );
    let dup_warnings = diag2
        .warnings()
        .iter()
        .filter(|w| w.contains("already imported"))
        .count();
    assert_eq!(dup_warnings, 2);
}

#[test]
fn same_person_under_two_roles_gets_one_position_row() {
    let (conn, user_id) = setup();
    let mut diag = Diag::new();
    run_import(&conn, &user_id, &ImportConfig::default(), &mut diag);

    assert_eq!(count(&conn, "SELECT COUNT(*) FROM descriptor_staff"), 2);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM descriptor_staff_positions"),
        1
    );
    let ordinal: i64 = conn
        .query_row(
            "SELECT ordinal FROM descriptor_staff_positions",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(ordinal, 0);

    // The unknown staff member is skipped with a warning, not an error.
    assert!(diag
        .warnings()
        .iter()
        .any(|w| w.contains("Ghost Person")));
}

#[test]
fn code_filter_skips_without_warning() {
    let (conn, user_id) = setup();
    let cfg = ImportConfig {
        code_filter: Some("A-B-1".to_string()),
        ..ImportConfig::default()
    };
    let mut diag = Diag::new();
    run_import(&conn, &user_id, &cfg, &mut diag);

    assert_eq!(count(&conn, "SELECT COUNT(*) FROM descriptor_versions"), 1);
    assert!(diag.notes().iter().any(|n| n.contains("code filter")));
    assert!(!diag.warnings().iter().any(|w| w.contains("code filter")));
}

// The same course code taught out of a different department.
const OTHER_UNIT_DOCUMENT: &str = r#"<courseDocument>
  <orgUnit>FMFI.KM</orgUnit>
  <courseDescriptors>
    <courseDescriptor>
      <code>FMFI.KI/A-B-1/15</code>
      <abbreviation>A-B-1</abbreviation>
      <title>Algorithms</title>
      <studyModes><studyMode>In-person</studyMode></studyModes>
      <teachingActivities>Lecture</teachingActivities>
      <weeklyHours>2</weeklyHours>
    </courseDescriptor>
  </courseDescriptors>
</courseDocument>"#;

#[test]
fn duplicate_key_can_include_the_org_unit() {
    let (conn, user_id) = setup();
    let cfg = ImportConfig {
        duplicate_key: DuplicateKey::CodeAndOrgUnit,
        ..ImportConfig::default()
    };
    let mut diag = Diag::new();
    run_import(&conn, &user_id, &cfg, &mut diag);

    // The same code from another org unit is a fresh descriptor under the
    // wider key.
    let mut diag2 = Diag::new();
    import_document(&conn, OTHER_UNIT_DOCUMENT, &user_id, &cfg, &mut diag2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM descriptor_versions"), 3);
    assert!(!diag2
        .warnings()
        .iter()
        .any(|w| w.contains("already imported")));

    // Re-importing that unit again is a duplicate.
    let mut diag3 = Diag::new();
    import_document(&conn, OTHER_UNIT_DOCUMENT, &user_id, &cfg, &mut diag3);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM descriptor_versions"), 3);
    assert!(diag3
        .warnings()
        .iter()
        .any(|w| w.contains("already imported")));
}

#[test]
fn plain_code_key_skips_the_other_org_unit() {
    let (conn, user_id) = setup();
    let cfg = ImportConfig::default();
    let mut diag = Diag::new();
    run_import(&conn, &user_id, &cfg, &mut diag);

    let mut diag2 = Diag::new();
    import_document(&conn, OTHER_UNIT_DOCUMENT, &user_id, &cfg, &mut diag2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM descriptor_versions"), 2);
    assert!(diag2
        .warnings()
        .iter()
        .any(|w| w.contains("already imported")));
}

#[test]
fn version_rows_carry_grades_weight_and_load() {
    let (conn, user_id) = setup();
    let mut diag = Diag::new();
    run_import(&conn, &user_id, &ImportConfig::default(), &mut diag);

    let (weight, grade_c, approved): (String, i64, String) = conn
        .query_row(
            "SELECT exam_weight, grade_c, approved_at FROM descriptor_versions
             WHERE title = 'Algorithms'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .expect("version row");
    assert_eq!(weight, "40");
    assert_eq!(grade_c, 3);
    assert_eq!(approved, "2015-06-03");

    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM descriptor_activities"),
        3
    );
    let per_week: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM descriptor_activities WHERE per_week = 1",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(per_week, 3);

    let (lang, outline): (String, String) = conn
        .query_row(
            "SELECT t.lang, t.outline FROM descriptor_translations t
             JOIN descriptor_versions v ON v.id = t.version_id
             WHERE v.title = 'Algorithms'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("translation row");
    assert_eq!(lang, "sk");
    assert_eq!(outline, "Graphs.\n\n- BFS\n- DFS");
}
