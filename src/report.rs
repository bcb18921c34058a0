//! Plain-text reports for the CLI.

use meldwork_core::{InheritMarker, Inherits, Instance, PhaseTarget, Runtime, ROOT_PATTERN};
use std::collections::HashSet;
use std::fmt::Write;

/// Numbered resolution order of `pattern`.
pub fn resolution(runtime: &Runtime, pattern: &str, skip_core: bool) -> String {
    let resolved = if skip_core {
        runtime.extend_inherits(&Inherits::from(pattern), true)
    } else {
        runtime.resolved_inherits(pattern)
    };
    let mut out = String::new();
    if !runtime.has_pattern(pattern) {
        let _ = writeln!(out, "warning: '{}' is not registered", pattern);
    }
    for (i, name) in resolved.iter().enumerate() {
        let _ = writeln!(out, "{:>3}. {}", i + 1, name);
    }
    out
}

/// Descendant tree from the root. Soft edges are marked with `~`, patterns
/// only reachable through a cycle are listed at the end.
pub fn tree(runtime: &Runtime) -> String {
    let mut out = String::new();
    let mut seen = HashSet::new();
    walk(runtime, ROOT_PATTERN, None, 0, &mut seen, &mut out);
    let orphans: Vec<String> = runtime
        .pattern_names()
        .into_iter()
        .filter(|name| !seen.contains(name))
        .collect();
    if !orphans.is_empty() {
        let _ = writeln!(out, "unreachable: {}", orphans.join(", "));
    }
    out
}

fn walk(
    runtime: &Runtime,
    name: &str,
    parent: Option<&str>,
    depth: usize,
    seen: &mut HashSet<String>,
    out: &mut String,
) {
    let soft = parent
        .and_then(|p| runtime.get_pattern(name).map(|pat| (p, pat)))
        .is_some_and(|(p, pat)| !matches!(pat.inherits.get(p), Some(InheritMarker::Hard)));
    let marker = if soft { "~" } else { "" };
    let indent = "  ".repeat(depth);
    if !seen.insert(name.to_string()) {
        let _ = writeln!(out, "{}{}{} (see above)", indent, marker, name);
        return;
    }
    let _ = writeln!(out, "{}{}{}", indent, marker, name);
    for child in runtime.descendants_of(name) {
        walk(runtime, &child, Some(name), depth + 1, seen, out);
    }
}

/// Summary of a built object and its children.
pub fn object(obj: &Instance) -> String {
    let mut out = String::new();
    describe(obj, 0, &mut out);
    out
}

fn describe(obj: &Instance, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let phase = match obj.built_to() {
        Some(PhaseTarget::Final) => "final".to_string(),
        Some(PhaseTarget::Named(name)) => name,
        Some(PhaseTarget::Skip) | None => "-".to_string(),
    };
    let _ = writeln!(out, "{}{} [{}] built to {}", indent, obj.pattern(), obj.id(), phase);
    let _ = writeln!(out, "{}  inherits: {}", indent, obj.inherits().join(" > "));
    let _ = writeln!(out, "{}  phases:   {}", indent, obj.completed_phases().join(", "));
    let json = serde_json::to_string(&obj.to_json()).unwrap_or_default();
    let _ = writeln!(out, "{}  props:    {}", indent, json);
    for (path, child) in obj.built_children() {
        let _ = writeln!(out, "{}  {}:", indent, path);
        if let Some(built) = child.instance {
            describe(&built, depth + 2, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meldwork_core::Idea;

    #[test]
    fn tree_marks_soft_edges() {
        let rt = Runtime::new();
        rt.pattern("shape", (), Idea::new()).unwrap();
        rt.pattern("decor", Inherits::none().hard("object").soft("shape"), Idea::new())
            .unwrap();
        let text = tree(&rt);
        assert!(text.contains("\n  shape\n"), "{}", text);
        assert!(text.contains("~decor"), "{}", text);
    }

    #[test]
    fn resolution_is_numbered() {
        let rt = Runtime::new();
        rt.pattern("shape", (), Idea::new()).unwrap();
        let text = resolution(&rt, "shape", false);
        assert_eq!(text, "  1. object\n  2. shape\n");
    }
}
