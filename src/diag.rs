use tracing::{info, warn};

/// Breadcrumbs identifying what the pipeline is currently working on
/// (input file, course code, ...).
///
/// The value is immutable: entering a nested scope extends a clone and the
/// extension is dropped with the scope, so a later record can never inherit
/// stale frames.
#[derive(Debug, Clone, Default)]
pub struct Ctx {
    frames: Vec<(String, String)>,
}

impl Ctx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(&self, key: &str, value: impl Into<String>) -> Self {
        let mut frames = self.frames.clone();
        frames.push((key.to_string(), value.into()));
        Ctx { frames }
    }

    pub fn render(&self) -> String {
        if self.frames.is_empty() {
            return "<run>".to_string();
        }
        let parts: Vec<String> = self
            .frames
            .iter()
            .map(|(k, v)| format!("{} {}", k, v))
            .collect();
        format!("<{}>", parts.join(", "))
    }
}

/// Operator-facing diagnostics sink. Every warning is streamed immediately
/// as `<breadcrumbs>: message` and kept for the run report.
#[derive(Debug, Default)]
pub struct Diag {
    warnings: Vec<String>,
    notes: Vec<String>,
}

impl Diag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, ctx: &Ctx, msg: impl AsRef<str>) {
        let line = format!("{}: {}", ctx.render(), msg.as_ref());
        warn!("{}", line);
        self.warnings.push(line);
    }

    /// Informational note (e.g. a record excluded by the code filter).
    pub fn note(&mut self, ctx: &Ctx, msg: impl AsRef<str>) {
        let line = format!("{}: {}", ctx.render(), msg.as_ref());
        info!("{}", line);
        self.notes.push(line);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }
}
