use crate::diag::{Ctx, Diag};
use crate::formula;
use anyhow::{anyhow, bail, Context};
use chrono::NaiveDate;
use roxmltree::Node;

/// Activity-type vocabulary. An activity name outside this table is fatal.
const ACTIVITY_CODES: &[(&str, &str)] = &[
    ("Lecture", "L"),
    ("Seminar", "S"),
    ("Exercise", "E"),
    ("Lab exercise", "B"),
    ("Practice", "P"),
    ("Course", "C"),
    ("Other", "O"),
];

/// Study-mode vocabulary.
const STUDY_MODE_CODES: &[(&str, &str)] = &[
    ("In-person", "P"),
    ("Distance", "D"),
    ("Combined", "K"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodUnit {
    PerWeek,
    PerSemester,
}

/// One scheduled teaching activity: (type code, hours, period unit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadEntry {
    pub activity_code: String,
    pub hours: i64,
    pub period: PeriodUnit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffEntry {
    pub role_code: String,
    pub full_name: String,
}

/// Per-grade counts plus the declared total. Validated on extraction:
/// the counts must sum to the total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradeDistribution {
    pub a: i64,
    pub b: i64,
    pub c: i64,
    pub d: i64,
    pub e: i64,
    pub fx: i64,
    pub total: i64,
}

/// One course descriptor, extracted from a single `<courseDescriptor>`
/// element. Built once, read-only afterwards. Absent source fields stay
/// `None`; which absences are fatal is decided per field by the parsers.
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub org_unit: String,
    pub lang: String,
    pub code: Option<String>,
    pub abbreviation: Option<String>,
    pub title: Option<String>,
    pub credit: Option<String>,
    pub completion_method: Option<String>,
    pub study_plan_year: Option<String>,
    pub study_plan_semester: Option<String>,
    pub language: Option<String>,
    pub approved_at: Option<NaiveDate>,
    pub study_mode: Option<String>,
    pub exam_weight: Option<String>,
    pub load: Vec<LoadEntry>,
    pub prerequisites: Vec<formula::Token>,
    pub exclusions: Vec<formula::Token>,
    pub staff: Vec<StaffEntry>,
    pub grades: Option<GradeDistribution>,
    pub objectives: Option<String>,
    pub completion_conditions: Option<String>,
    pub outline: Option<String>,
    pub literature: Option<String>,
}

/// Parses one course-descriptor document and extracts every record in
/// document order.
pub fn extract_records(
    xml_text: &str,
    lang: &str,
    ctx: &Ctx,
    diag: &mut Diag,
) -> anyhow::Result<Vec<Record>> {
    let doc = roxmltree::Document::parse(xml_text)
        .map_err(|e| anyhow!("invalid XML document: {}", e))?;
    let root = doc.root_element();
    if !root.has_tag_name("courseDocument") {
        bail!("unexpected root element <{}>", root.tag_name().name());
    }

    let org_unit = child_text(root, "orgUnit")
        .ok_or_else(|| anyhow!("document is missing <orgUnit>"))?;
    let list = child(root, "courseDescriptors")
        .ok_or_else(|| anyhow!("document is missing <courseDescriptors>"))?;

    let mut records: Vec<Record> = Vec::new();
    for el in list.children().filter(|n| n.has_tag_name("courseDescriptor")) {
        let code = child_text(el, "code");
        let ctx = ctx.with("course", code.as_deref().unwrap_or("?"));
        let rec = extract_record(el, &org_unit, lang, &ctx, diag)
            .with_context(|| format!("course {}", code.as_deref().unwrap_or("?")))?;
        records.push(rec);
    }
    Ok(records)
}

fn extract_record(
    el: Node,
    org_unit: &str,
    lang: &str,
    ctx: &Ctx,
    diag: &mut Diag,
) -> anyhow::Result<Record> {
    let mut rec = Record {
        org_unit: org_unit.to_string(),
        lang: lang.to_string(),
        code: child_text(el, "code"),
        abbreviation: child_text(el, "abbreviation"),
        title: child_text(el, "title"),
        credit: child_text(el, "credit"),
        completion_method: child_text(el, "completionMethod"),
        study_plan_year: child_text(el, "studyPlanYear"),
        study_plan_semester: child_text(el, "studyPlanSemester"),
        language: child_text(el, "language"),
        ..Record::default()
    };

    rec.approved_at = parse_approval_date(child_text(el, "approvalDate").as_deref(), ctx, diag);
    rec.study_mode = parse_study_mode(el, ctx, diag)?;

    let weight_raw = child(el, "examWeight")
        .and_then(|n| child(n, "content"))
        .and_then(|n| child_text(n, "p"));
    rec.exam_weight = parse_exam_weight(weight_raw.as_deref(), ctx, diag)?;

    rec.load = parse_teaching_load(
        child_text(el, "teachingActivities").as_deref(),
        child_text(el, "weeklyHours").as_deref(),
        child_text(el, "semesterHours").as_deref(),
        ctx,
        diag,
    )?;

    rec.prerequisites = formula::parse(child_text(el, "prerequisites").as_deref().unwrap_or(""))?;
    rec.exclusions = formula::parse(child_text(el, "exclusions").as_deref().unwrap_or(""))?;

    rec.staff = extract_staff(el, ctx, diag);
    rec.grades = extract_grades(el)?;

    rec.objectives = flatten_field(el, "objectives")?;
    rec.completion_conditions = flatten_field(el, "completionConditions")?;
    rec.outline = flatten_field(el, "outline")?;
    rec.literature = flatten_field(el, "literature")?;

    Ok(rec)
}

/// Parses the `a/b` exam-weight text. Empty or absent input means no
/// weight. Input that is not two plain integers around a slash is a
/// warning, not an error; input that looks like a fraction but does not
/// split into exactly two parts (e.g. `1/2/3`) is fatal. The weight kept
/// is the second part.
pub fn parse_exam_weight(
    raw: Option<&str>,
    ctx: &Ctx,
    diag: &mut Diag,
) -> anyhow::Result<Option<String>> {
    let Some(raw) = raw else { return Ok(None) };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    if !starts_with_fraction(raw) {
        diag.warn(ctx, format!("malformed exam weight {:?}", raw));
        return Ok(None);
    }

    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() != 2 {
        bail!(
            "exam weight {:?} splits into {} parts, expected 2",
            raw,
            parts.len()
        );
    }
    if !parts.iter().all(|p| is_unsigned_int(p.trim())) {
        diag.warn(ctx, format!("malformed exam weight {:?}", raw));
        return Ok(None);
    }
    Ok(Some(parts[1].trim().to_string()))
}

fn is_unsigned_int(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// True when the string begins with `<int>/<int>` (surrounding whitespace
/// around the slash allowed).
fn starts_with_fraction(s: &str) -> bool {
    let mut rest = s.trim_start();
    let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return false;
    }
    rest = rest[digits..].trim_start();
    let Some(after_slash) = rest.strip_prefix('/') else {
        return false;
    };
    after_slash
        .trim_start()
        .starts_with(|c: char| c.is_ascii_digit())
}

/// Parses the three parallel `/`-delimited lists describing the teaching
/// load. Per position, the weekly value wins over the semester value; a
/// trailing `s`/`t` on an hour token overrides the period unit
/// (s = per-semester, t = per-week) and is stripped before the numeric
/// parse. Bad numerics degrade to 0 with a warning; an activity name
/// outside the vocabulary is fatal.
pub fn parse_teaching_load(
    activities: Option<&str>,
    weekly: Option<&str>,
    semester: Option<&str>,
    ctx: &Ctx,
    diag: &mut Diag,
) -> anyhow::Result<Vec<LoadEntry>> {
    let names = split_list(activities);
    if names.is_empty() {
        diag.warn(ctx, "no teaching activities declared");
        return Ok(Vec::new());
    }

    let weekly = split_list(weekly);
    let semester = split_list(semester);
    if weekly.is_empty() && semester.is_empty() {
        diag.warn(ctx, "teaching activities declared without any hour lists");
        return Ok(Vec::new());
    }

    let mut entries: Vec<LoadEntry> = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let code = lookup(ACTIVITY_CODES, name)
            .ok_or_else(|| anyhow!("unknown teaching activity {:?}", name))?;

        let wk = weekly.get(i).map(|s| s.as_str()).filter(|s| !s.is_empty());
        let se = semester.get(i).map(|s| s.as_str()).filter(|s| !s.is_empty());
        let (raw, derived) = match (wk, se) {
            (Some(w), _) => (w, PeriodUnit::PerWeek),
            (None, Some(s)) => (s, PeriodUnit::PerSemester),
            (None, None) => {
                diag.warn(ctx, format!("no hour value for activity {:?}", name));
                entries.push(LoadEntry {
                    activity_code: code.to_string(),
                    hours: 0,
                    period: PeriodUnit::PerWeek,
                });
                continue;
            }
        };

        let (digits, period) = strip_period_suffix(raw, derived, ctx, diag);
        let hours = match digits.trim().parse::<i64>() {
            Ok(h) if h >= 0 => h,
            _ => {
                diag.warn(
                    ctx,
                    format!("unparseable hour value {:?} for activity {:?}", raw, name),
                );
                0
            }
        };

        entries.push(LoadEntry {
            activity_code: code.to_string(),
            hours,
            period,
        });
    }
    Ok(entries)
}

fn strip_period_suffix<'a>(
    raw: &'a str,
    derived: PeriodUnit,
    ctx: &Ctx,
    diag: &mut Diag,
) -> (&'a str, PeriodUnit) {
    let Some(last) = raw.chars().last() else {
        return (raw, derived);
    };
    let period = match last.to_ascii_lowercase() {
        's' => PeriodUnit::PerSemester,
        't' => PeriodUnit::PerWeek,
        _ => return (raw, derived),
    };
    diag.warn(
        ctx,
        format!("hour value {:?} carries a period suffix, overriding", raw),
    );
    (&raw[..raw.len() - last.len_utf8()], period)
}

/// Splits a `/`-delimited list into trimmed parts, preserving empty inner
/// positions. A blank or absent input is an empty list.
fn split_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else { return Vec::new() };
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split('/').map(|p| p.trim().to_string()).collect()
}

fn parse_approval_date(raw: Option<&str>, ctx: &Ctx, diag: &mut Diag) -> Option<NaiveDate> {
    let raw = raw?;
    match NaiveDate::parse_from_str(raw.trim(), "%d.%m.%Y") {
        Ok(d) => Some(d),
        Err(_) => {
            diag.warn(ctx, format!("unparseable approval date {:?}", raw));
            None
        }
    }
}

fn parse_study_mode(el: Node, ctx: &Ctx, diag: &mut Diag) -> anyhow::Result<Option<String>> {
    let Some(list) = child(el, "studyModes") else {
        diag.warn(ctx, "no study mode declared");
        return Ok(None);
    };
    let modes: Vec<String> = list
        .children()
        .filter(|n| n.has_tag_name("studyMode"))
        .filter_map(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    match modes.as_slice() {
        [] => {
            diag.warn(ctx, "no study mode declared");
            Ok(None)
        }
        [one] => {
            let code = lookup(STUDY_MODE_CODES, one)
                .ok_or_else(|| anyhow!("unknown study mode {:?}", one))?;
            Ok(Some(code.to_string()))
        }
        many => bail!("expected exactly one study mode, found {}", many.len()),
    }
}

fn extract_staff(el: Node, ctx: &Ctx, diag: &mut Diag) -> Vec<StaffEntry> {
    let Some(list) = child(el, "staff") else {
        return Vec::new();
    };
    let mut staff: Vec<StaffEntry> = Vec::new();
    for member in list.children().filter(|n| n.has_tag_name("member")) {
        let role = child_text(member, "role");
        let name = child_text(member, "fullName");
        match (role, name) {
            (Some(role_code), Some(full_name)) => staff.push(StaffEntry {
                role_code,
                full_name,
            }),
            _ => diag.warn(ctx, "staff member without role or full name, skipping"),
        }
    }
    staff
}

fn extract_grades(el: Node) -> anyhow::Result<Option<GradeDistribution>> {
    let Some(block) = child(el, "gradeDistribution") else {
        return Ok(None);
    };

    // The evaluation count takes precedence over the student count when the
    // export carries both.
    let declared = block
        .attribute("evaluations")
        .or_else(|| block.attribute("total"))
        .ok_or_else(|| anyhow!("grade distribution without a declared total"))?;
    let total: i64 = declared
        .trim()
        .parse()
        .with_context(|| format!("bad grade total {:?}", declared))?;

    let mut dist = GradeDistribution {
        total,
        ..GradeDistribution::default()
    };
    for grade in block.children().filter(|n| n.has_tag_name("grade")) {
        let symbol = grade
            .attribute("code")
            .ok_or_else(|| anyhow!("grade entry without a code"))?;
        let count: i64 = grade
            .attribute("count")
            .ok_or_else(|| anyhow!("grade {} without a count", symbol))?
            .trim()
            .parse()
            .with_context(|| format!("bad count for grade {}", symbol))?;
        match symbol {
            "A" => dist.a = count,
            "B" => dist.b = count,
            "C" => dist.c = count,
            "D" => dist.d = count,
            "E" => dist.e = count,
            "FX" => dist.fx = count,
            other => bail!("unknown grade symbol {:?}", other),
        }
    }

    let sum = dist.a + dist.b + dist.c + dist.d + dist.e + dist.fx;
    if sum != dist.total {
        bail!(
            "grade counts sum to {} but the declared total is {}",
            sum,
            dist.total
        );
    }
    Ok(Some(dist))
}

fn flatten_field(el: Node, name: &str) -> anyhow::Result<Option<String>> {
    let Some(field) = child(el, name) else {
        return Ok(None);
    };
    flatten_content(field).with_context(|| format!("in <{}>", name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockMode {
    Paragraph,
    Bullet,
    Ordered,
}

/// Flattens a rich-text `<content>` fragment into one plain-text block.
/// Consecutive items of the same list mode join with a single newline,
/// any mode transition with a blank line. Non-`<p>` blocks are fatal.
pub fn flatten_content(field: Node) -> anyhow::Result<Option<String>> {
    let Some(content) = child(field, "content") else {
        return Ok(None);
    };

    let mut out = String::new();
    let mut prev: Option<BlockMode> = None;
    for block in content.children().filter(|n| n.is_element()) {
        if !block.has_tag_name("p") {
            bail!(
                "unsupported block element <{}> in rich text",
                block.tag_name().name()
            );
        }
        let text = inline_text(block);
        let text = text.trim();
        let mode = classify_block(text);
        if !out.is_empty() {
            if prev == Some(mode) && mode != BlockMode::Paragraph {
                out.push('\n');
            } else {
                out.push_str("\n\n");
            }
        }
        out.push_str(text);
        prev = Some(mode);
    }

    let out = out.trim().to_string();
    Ok(if out.is_empty() { None } else { Some(out) })
}

fn classify_block(text: &str) -> BlockMode {
    if text.starts_with('-') {
        return BlockMode::Bullet;
    }
    let digits = text.len() - text.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 && text[digits..].starts_with('.') {
        return BlockMode::Ordered;
    }
    BlockMode::Paragraph
}

fn inline_text(node: Node) -> String {
    let mut out = String::new();
    for d in node.descendants() {
        if let Some(t) = d.text() {
            if d.is_text() {
                out.push_str(t);
            }
        }
    }
    out
}

fn lookup(table: &'static [(&'static str, &'static str)], name: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, code)| *code)
}

fn child<'a, 'input>(el: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    el.children().find(|n| n.has_tag_name(name))
}

/// Trimmed text of a named child element; `None` when the element is absent
/// or blank.
fn child_text(el: Node, name: &str) -> Option<String> {
    let text = child(el, name)?.text()?.trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
