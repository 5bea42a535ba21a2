//! Runtime overlay: a size-capped, marker-bounded block the leader appends
//! to a worker's "model instructions" file before each launch.
//!
//! A plain `String` builder with explicit size arithmetic rather than a
//! templating crate, since the payload is a handful of short sections under
//! a hard byte budget.

pub const RUNTIME_START: &str = "<!-- OMX:RUNTIME:START -->";
pub const RUNTIME_END: &str = "<!-- OMX:RUNTIME:END -->";
const MAX_OVERLAY_BYTES: usize = 2000;
const MAX_STRIP_OCCURRENCES: usize = 50;
const ELLIPSIS: &str = "...";
const MARKER_PREFIX: &str = "<!-- OMX:";

/// Per-section caps applied during rendering, independent of the drop
/// cascade below. A notepad or mode list can be arbitrarily large; these
/// keep a single section from starving the whole budget so that dropping
/// `project_context` alone is usually enough to fit: huge priority-notes
/// and active-modes content survives truncated, while only the
/// lowest-priority section is dropped outright.
const ACTIVE_MODES_MAX_BYTES: usize = 600;
const PRIORITY_NOTES_MAX_BYTES: usize = 400;

/// Best-effort inputs to [`generate`]. Every field is optional; a field
/// left empty simply drops its section.
#[derive(Debug, Clone, Default)]
pub struct OverlayContext {
    pub session_id: String,
    pub current_session_modes: Vec<String>,
    pub global_modes: Vec<String>,
    pub priority_notes: Vec<String>,
    pub project_stack: Option<String>,
    pub project_conventions: Option<String>,
    pub build_command: Option<String>,
    /// Up to 3 are rendered; the rest are dropped by the caller's ordering,
    /// not here.
    pub high_priority_directives: Vec<String>,
}

struct Section {
    name: &'static str,
    required: bool,
    body: Option<String>,
}

/// Build the runtime overlay body for `ctx` as of `generated_at` (an
/// RFC3339 timestamp supplied by the caller so this function stays pure:
/// identical `ctx`/`generated_at` always yields identical bytes).
pub fn generate(ctx: &OverlayContext, generated_at: &str) -> String {
    let mut sections = vec![
        Section {
            name: "session_meta",
            required: true,
            body: Some(render_session_meta(ctx, generated_at)),
        },
        Section {
            name: "active_modes",
            required: false,
            body: render_active_modes(ctx),
        },
        Section {
            name: "priority_notes",
            required: false,
            body: render_priority_notes(ctx),
        },
        Section {
            name: "project_context",
            required: false,
            body: render_project_context(ctx),
        },
        Section {
            name: "compaction_protocol",
            required: true,
            body: Some(render_compaction_protocol()),
        },
    ];

    // Lowest-priority-first drop order, per the section ordering above.
    let drop_order = ["project_context", "priority_notes", "active_modes"];
    let mut drop_idx = 0;
    loop {
        let wrapped = wrap(&render_body(&sections));
        if wrapped.len() <= MAX_OVERLAY_BYTES {
            return wrapped;
        }
        if drop_idx >= drop_order.len() {
            break;
        }
        let name = drop_order[drop_idx];
        for s in sections.iter_mut() {
            if s.name == name {
                s.body = None;
            }
        }
        drop_idx += 1;
    }

    truncate_last_and_wrap(&mut sections)
}

fn render_body(sections: &[Section]) -> String {
    sections
        .iter()
        .filter_map(|s| s.body.as_ref().map(|b| format!("### {}\n{}", s.name, b)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn wrap(body: &str) -> String {
    format!("{RUNTIME_START}\n{body}\n{RUNTIME_END}")
}

fn render_session_meta(ctx: &OverlayContext, generated_at: &str) -> String {
    format!("session: {}\ngenerated_at: {}", ctx.session_id, generated_at)
}

fn render_active_modes(ctx: &OverlayContext) -> Option<String> {
    if ctx.current_session_modes.is_empty() && ctx.global_modes.is_empty() {
        return None;
    }
    let mut lines = Vec::new();
    for m in &ctx.current_session_modes {
        lines.push(format!("- {m} (session)"));
    }
    for m in &ctx.global_modes {
        lines.push(format!("- {m} (global)"));
    }
    Some(cap_with_ellipsis(&lines.join("\n"), ACTIVE_MODES_MAX_BYTES))
}

fn render_priority_notes(ctx: &OverlayContext) -> Option<String> {
    if ctx.priority_notes.is_empty() {
        return None;
    }
    let body = ctx.priority_notes.iter().map(|n| format!("- {n}")).collect::<Vec<_>>().join("\n");
    Some(cap_with_ellipsis(&body, PRIORITY_NOTES_MAX_BYTES))
}

/// Truncate `s` to at most `max` bytes (at a char boundary), appending an
/// ellipsis when truncated. Used for the intrinsic per-section caps, kept
/// separate from the whole-section drop cascade in [`generate`].
fn cap_with_ellipsis(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let allowed = max.saturating_sub(ELLIPSIS.len());
    format!("{}{ELLIPSIS}", truncate_to_bytes(s, allowed))
}

fn render_project_context(ctx: &OverlayContext) -> Option<String> {
    let mut lines = Vec::new();
    if let Some(stack) = &ctx.project_stack {
        lines.push(format!("stack: {stack}"));
    }
    if let Some(conventions) = &ctx.project_conventions {
        lines.push(format!("conventions: {conventions}"));
    }
    if let Some(build) = &ctx.build_command {
        lines.push(format!("build: {build}"));
    }
    for directive in ctx.high_priority_directives.iter().take(3) {
        lines.push(format!("- {directive}"));
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn render_compaction_protocol() -> String {
    "Before context is compacted, write your current plan and task id to \
     the worker status file so the next turn can resume without asking."
        .to_string()
}

/// Only `session_meta` and `compaction_protocol` remain at this point (both
/// required, so neither can be dropped). Truncate the last section instead.
fn truncate_last_and_wrap(sections: &mut [Section]) -> String {
    let present: Vec<usize> = sections
        .iter()
        .enumerate()
        .filter(|(_, s)| s.body.is_some())
        .map(|(i, _)| i)
        .collect();
    let Some(&last) = present.last() else {
        return wrap("");
    };

    let overhead = wrap(&render_body(sections)).len();
    let last_body_len = sections[last].body.as_ref().unwrap().len();
    let other_len = overhead - last_body_len;
    let budget = MAX_OVERLAY_BYTES.saturating_sub(other_len);
    let allowed = budget.saturating_sub(ELLIPSIS.len());

    let truncated = truncate_to_bytes(sections[last].body.as_ref().unwrap(), allowed);
    sections[last].body = Some(format!("{truncated}{ELLIPSIS}"));
    wrap(&render_body(sections))
}

fn truncate_to_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Replace any existing runtime block in `text` with `overlay`, appending
/// it at the end if none was present. Idempotent: applying the same
/// overlay twice in a row yields the same result as applying it once.
pub fn apply(text: &str, overlay: &str) -> String {
    let stripped = strip(text);
    let stripped = stripped.trim_end_matches('\n');
    if stripped.is_empty() {
        format!("{overlay}\n")
    } else {
        format!("{stripped}\n\n{overlay}\n")
    }
}

/// Remove every runtime overlay block from `text`, leaving any
/// `OMX:TEAM:WORKER` block (or any other `OMX:`-prefixed marker block)
/// untouched. Tolerates a malformed block missing its `END` marker by
/// stopping at the next recognized marker, or at end of file if none
/// follows.
pub fn strip(text: &str) -> String {
    let mut result = text.to_string();
    for _ in 0..MAX_STRIP_OCCURRENCES {
        match find_runtime_block(&result) {
            Some((start, end)) => {
                result.replace_range(start..end, "");
            }
            None => break,
        }
    }
    collapse_blank_runs(&result)
}

fn find_runtime_block(text: &str) -> Option<(usize, usize)> {
    let start = text.find(RUNTIME_START)?;
    let after_start = start + RUNTIME_START.len();
    let end = match text[after_start..].find(RUNTIME_END) {
        Some(rel) => after_start + rel + RUNTIME_END.len(),
        None => match text[after_start..].find(MARKER_PREFIX) {
            Some(rel) => after_start + rel,
            None => text.len(),
        },
    };
    Some((start, end))
}

fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.split('\n') {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_ctx() -> OverlayContext {
        OverlayContext {
            session_id: "s1".to_string(),
            current_session_modes: vec!["focus".to_string()],
            global_modes: vec!["base".to_string()],
            priority_notes: vec!["watch the rate limiter".to_string()],
            project_stack: Some("rust/tokio".to_string()),
            project_conventions: Some("no unwrap outside tests".to_string()),
            build_command: Some("cargo build".to_string()),
            high_priority_directives: vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()],
        }
    }

    #[test]
    fn stays_within_size_cap() {
        let overlay = generate(&full_ctx(), "2026-01-01T00:00:00Z");
        assert!(overlay.len() <= MAX_OVERLAY_BYTES);
        assert!(overlay.starts_with(RUNTIME_START));
        assert!(overlay.ends_with(RUNTIME_END));
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let a = generate(&full_ctx(), "2026-01-01T00:00:00Z");
        let b = generate(&full_ctx(), "2026-01-01T00:00:00Z");
        assert_eq!(a, b);
    }

    #[test]
    fn oversized_priority_notes_are_capped_not_dropped() {
        let mut ctx = full_ctx();
        ctx.priority_notes = vec!["x".repeat(3000)];
        let overlay = generate(&ctx, "2026-01-01T00:00:00Z");
        assert!(overlay.len() <= MAX_OVERLAY_BYTES);
        assert!(overlay.contains("priority_notes"));
        assert!(overlay.contains("compaction_protocol"));
    }

    #[test]
    fn drops_project_context_before_truncating_required_one() {
        let mut ctx = full_ctx();
        ctx.project_stack = Some("x".repeat(3000));
        ctx.project_conventions = Some("y".repeat(3000));
        let overlay = generate(&ctx, "2026-01-01T00:00:00Z");
        assert!(overlay.len() <= MAX_OVERLAY_BYTES);
        assert!(!overlay.contains("project_context"));
        assert!(overlay.contains("compaction_protocol"));
    }

    /// Mirrors the concrete overflow scenario: a huge priority notepad, a
    /// huge project-memory summary, and 40 active-mode files. Only
    /// `project_context` (lowest priority) is dropped outright; the
    /// others survive, capped.
    #[test]
    fn overflow_scenario_drops_only_project_context() {
        let ctx = OverlayContext {
            session_id: "overflow-session".to_string(),
            current_session_modes: (0..40).map(|i| format!("mode-{i}")).collect(),
            global_modes: Vec::new(),
            priority_notes: vec!["N".repeat(8_000)],
            project_stack: Some("s".repeat(9_000)),
            project_conventions: Some("c".repeat(9_000)),
            build_command: Some("cargo build".to_string()),
            high_priority_directives: vec!["d".repeat(3_000)],
        };
        let overlay = generate(&ctx, "2026-01-01T00:00:00Z");
        assert!(overlay.len() <= MAX_OVERLAY_BYTES);
        assert!(overlay.contains("active_modes"));
        assert!(overlay.contains("priority_notes"));
        assert!(overlay.contains("compaction_protocol"));
        assert!(!overlay.contains("project_context"));

        let second = generate(&ctx, "2026-01-01T00:00:00Z");
        assert_eq!(overlay, second);
    }

    #[test]
    fn apply_then_strip_restores_original() {
        let original = "# Instructions\n\nDo the thing.\n";
        let overlay = generate(&full_ctx(), "2026-01-01T00:00:00Z");
        let applied = apply(original, &overlay);
        let restored = strip(&applied);
        assert_eq!(restored.trim_end(), original.trim_end());
    }

    #[test]
    fn apply_is_idempotent() {
        let original = "# Instructions\n";
        let overlay = generate(&full_ctx(), "2026-01-01T00:00:00Z");
        let once = apply(original, &overlay);
        let twice = apply(&once, &overlay);
        assert_eq!(once, twice);
    }

    #[test]
    fn strip_never_touches_worker_overlay_block() {
        let text = format!(
            "{RUNTIME_START}\nstuff\n{RUNTIME_END}\n<!-- OMX:TEAM:WORKER:START -->\nworker stuff\n<!-- OMX:TEAM:WORKER:END -->\n"
        );
        let stripped = strip(&text);
        assert!(stripped.contains("OMX:TEAM:WORKER:START"));
        assert!(stripped.contains("worker stuff"));
        assert!(!stripped.contains("OMX:RUNTIME:START"));
    }

    #[test]
    fn strip_handles_malformed_block_missing_end_marker() {
        let text = format!("{RUNTIME_START}\norphaned\n<!-- OMX:TEAM:WORKER:START -->\nkeep me\n");
        let stripped = strip(&text);
        assert!(!stripped.contains("orphaned"));
        assert!(stripped.contains("keep me"));
    }
}
